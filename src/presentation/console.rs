//! Console front end
//!
//! Runs on the owner thread. Everything the Bluetooth thread wants shown
//! arrives as an [`AppEvent`]; device lists are re-read from the shared
//! registry under its lock when a change is announced.

use crate::domain::models::{
    AppEvent, MessageSeverity, SessionState, StatusMessage, WatcherStatusKind,
};
use crate::domain::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::watcher::{lock_discovery, SharedDiscovery};
use std::io::Write;
use tokio::sync::mpsc;

pub struct ConsolePresenter {
    discovery: SharedDiscovery,
    show_unknown: bool,
    session_state: SessionState,
    last_list: Vec<String>,
}

impl ConsolePresenter {
    pub fn new(discovery: SharedDiscovery, show_unknown: bool) -> Self {
        Self {
            discovery,
            show_unknown,
            session_state: SessionState::Idle,
            last_list: Vec::new(),
        }
    }

    /// Drain events until every sender is gone
    pub fn run(mut self, mut events: mpsc::UnboundedReceiver<AppEvent>) {
        while let Some(event) = events.blocking_recv() {
            let lines = self.render(event);
            let mut out = std::io::stdout().lock();
            for line in lines {
                let _ = writeln!(out, "{}", line);
            }
            let _ = out.flush();
        }
    }

    /// Lines to print for one event
    pub fn render(&mut self, event: AppEvent) -> Vec<String> {
        match event {
            AppEvent::LogMessage(msg) => vec![format_status(&msg)],
            AppEvent::SessionState(state) => {
                if state == self.session_state {
                    return Vec::new();
                }
                self.session_state = state;
                vec![format!("[state] {}", state.label())]
            }
            AppEvent::WatcherStatus(status) => vec![format!("[watcher] {}", watcher_label(status))],
            AppEvent::DeviceSelected(device) => {
                vec![format!("[select] {} ({})", device.display_name(), device.id)]
            }
            AppEvent::DeviceListChanged => {
                let list = self.device_list();
                if list == self.last_list {
                    return Vec::new();
                }
                self.last_list = list.clone();
                list
            }
        }
    }

    /// Current device list, read under the registry lock
    pub fn device_list(&self) -> Vec<String> {
        let state = lock_discovery(&self.discovery);
        render_device_list(&state.registry, self.show_unknown)
    }
}

pub fn format_status(msg: &StatusMessage) -> String {
    let tag = match msg.severity {
        MessageSeverity::Info => "info",
        MessageSeverity::Success => " ok ",
        MessageSeverity::Warning => "warn",
        MessageSeverity::Error => "FAIL",
    };
    format!("[{}] {}", tag, msg.message)
}

fn watcher_label(status: WatcherStatusKind) -> &'static str {
    match status {
        WatcherStatusKind::NotRunning => "not running",
        WatcherStatusKind::Running => "running",
        WatcherStatusKind::Stopping => "stopping",
        WatcherStatusKind::EnumerationCompleted => "enumeration completed",
    }
}

pub fn render_device_list(registry: &DeviceRegistry, show_unknown: bool) -> Vec<String> {
    let known = registry.known();
    let mut lines = vec![format!("Devices ({} known):", known.len())];
    lines.extend(known.iter().enumerate().map(|(i, device)| {
        let mut flags = Vec::new();
        if device.status.is_paired {
            flags.push("paired");
        }
        if device.status.is_connected {
            flags.push("connected");
        }
        if flags.is_empty() {
            format!("  {:>2}. {}  {}", i + 1, device.name, device.id)
        } else {
            format!(
                "  {:>2}. {}  {}  [{}]",
                i + 1,
                device.name,
                device.id,
                flags.join(", ")
            )
        }
    }));

    if show_unknown {
        let unknown = registry.unknown();
        lines.push(format!("Unnamed ({}):", unknown.len()));
        lines.extend(unknown.iter().map(|device| format!("      {}", device.id)));
    }
    lines
}
