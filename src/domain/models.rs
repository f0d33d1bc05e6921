/// Connection-relevant status snapshot reported by the platform for a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub is_connectable: Option<bool>,
    pub is_connected: bool,
    pub is_paired: bool,
}

/// A device observed by the watcher, keyed by its platform identity string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    pub status: DeviceStatus,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: DeviceStatus::default(),
        }
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// Name for display purposes; unnamed devices show their identity
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Partial change delivered by an "updated" watcher event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub id: String,
    pub name: Option<String>,
    pub is_connectable: Option<bool>,
    pub is_connected: Option<bool>,
    pub is_paired: Option<bool>,
}

impl DeviceUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Modifier keys carried by byte 0 of a hotkey payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierFlags {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub win: bool,
}

/// A decoded hotkey notification: modifiers plus one raw virtual-key code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyEvent {
    pub modifiers: ModifierFlags,
    pub key_code: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

/// One entry handed to the input injector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub virtual_key: u16,
    pub action: KeyAction,
}

impl KeyStroke {
    pub fn down(virtual_key: u16) -> Self {
        Self {
            virtual_key,
            action: KeyAction::Down,
        }
    }

    pub fn up(virtual_key: u16) -> Self {
        Self {
            virtual_key,
            action: KeyAction::Up,
        }
    }
}

/// Ordered press and release sequences derived from one hotkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedKeySet {
    pub press: Vec<KeyStroke>,
    pub release: Vec<KeyStroke>,
}

/// Lifecycle of the single GATT session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Subscribed,
    /// Characteristic selected, no active subscription
    Connected,
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::DiscoveringServices => "Discovering services",
            Self::DiscoveringCharacteristics => "Discovering characteristics",
            Self::Subscribing => "Subscribing",
            Self::Subscribed => "Subscribed",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatusKind {
    NotRunning,
    Running,
    Stopping,
    EnumerationCompleted,
}

/// Events posted to the presentation thread
#[derive(Debug, Clone)]
pub enum AppEvent {
    LogMessage(StatusMessage),
    SessionState(SessionState),
    WatcherStatus(WatcherStatusKind),
    DeviceListChanged,
    DeviceSelected(DeviceIdentity),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Commands sent from the presentation thread to the Bluetooth thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartWatcher,
    StopWatcher,
    Connect(String),
    Subscribe,
    Unsubscribe,
    Disconnect,
    Pair,
    Shutdown,
}
