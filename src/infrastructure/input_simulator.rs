use crate::domain::errors::InjectionError;
use crate::domain::models::{HotkeyEvent, InjectedKeySet, KeyStroke};
use std::sync::Arc;
use tracing::debug;

pub const VK_SHIFT: u16 = 0x10;
pub const VK_CONTROL: u16 = 0x11;
/// Alt
pub const VK_MENU: u16 = 0x12;
pub const VK_LWIN: u16 = 0x5B;

/// Synthesizes system-wide keyboard input
pub trait KeyInjector: Send + Sync {
    fn inject(&self, keys: &[KeyStroke]) -> Result<(), InjectionError>;
}

/// Build the press sequence `ctrl, shift, win, alt, key` (only set modifiers)
/// and the release sequence `win, alt, ctrl, shift, key` (always all five).
pub fn build_key_sequence(hotkey: &HotkeyEvent) -> InjectedKeySet {
    let key = u16::from(hotkey.key_code);
    let modifiers = hotkey.modifiers;

    let press = [
        (modifiers.ctrl, VK_CONTROL),
        (modifiers.shift, VK_SHIFT),
        (modifiers.win, VK_LWIN),
        (modifiers.alt, VK_MENU),
        (true, key),
    ]
    .into_iter()
    .filter(|(pressed, _)| *pressed)
    .map(|(_, vk)| KeyStroke::down(vk))
    .collect();

    // Release everything, pressed or not, so no modifier is left stuck
    let release = [VK_LWIN, VK_MENU, VK_CONTROL, VK_SHIFT, key]
        .into_iter()
        .map(KeyStroke::up)
        .collect();

    InjectedKeySet { press, release }
}

/// Replays decoded hotkeys through a [`KeyInjector`]
#[derive(Clone)]
pub struct InputReplayer {
    injector: Arc<dyn KeyInjector>,
}

impl InputReplayer {
    pub fn new(injector: Arc<dyn KeyInjector>) -> Self {
        Self { injector }
    }

    pub fn replay(&self, hotkey: &HotkeyEvent) -> Result<(), InjectionError> {
        let keys = build_key_sequence(hotkey);
        debug!(
            "Replaying {:?} key {:#04X} ({} down, {} up)",
            hotkey.modifiers,
            hotkey.key_code,
            keys.press.len(),
            keys.release.len()
        );
        self.injector.inject(&keys.press)?;
        self.injector.inject(&keys.release)
    }
}

#[cfg(windows)]
pub use self::windows_input::InputSimulator;

#[cfg(windows)]
mod windows_input {
    use super::KeyInjector;
    use crate::domain::errors::InjectionError;
    use crate::domain::models::{KeyAction, KeyStroke};
    use tracing::trace;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP,
        VIRTUAL_KEY,
    };

    /// `SendInput`-backed keyboard injector
    pub struct InputSimulator;

    impl InputSimulator {
        pub fn new() -> Self {
            Self
        }
    }

    impl KeyInjector for InputSimulator {
        fn inject(&self, keys: &[KeyStroke]) -> Result<(), InjectionError> {
            let inputs: Vec<INPUT> = keys
                .iter()
                .map(|stroke| {
                    trace!("Key {:?}: {:#04X}", stroke.action, stroke.virtual_key);
                    INPUT {
                        r#type: INPUT_KEYBOARD,
                        Anonymous: INPUT_0 {
                            ki: KEYBDINPUT {
                                wVk: VIRTUAL_KEY(stroke.virtual_key),
                                wScan: 0,
                                dwFlags: match stroke.action {
                                    KeyAction::Down => KEYBD_EVENT_FLAGS(0),
                                    KeyAction::Up => KEYEVENTF_KEYUP,
                                },
                                time: 0,
                                dwExtraInfo: 0,
                            },
                        },
                    }
                })
                .collect();

            let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) } as usize;
            if sent != inputs.len() {
                return Err(InjectionError::Partial {
                    sent,
                    expected: inputs.len(),
                });
            }
            Ok(())
        }
    }
}
