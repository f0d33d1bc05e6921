use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};
use tokio::sync::mpsc;

/// Fire-and-forget channel to the presentation thread.
///
/// Sending never blocks, so it is safe to call from platform callback
/// threads; the presentation thread renders whatever arrives.
#[derive(Clone)]
pub struct StatusSink {
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl StatusSink {
    pub fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { event_sender }
    }

    pub fn send(&self, event: AppEvent) {
        // Receiver gone means the front end is shutting down
        let _ = self.event_sender.send(event);
    }

    pub fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send_log(message, MessageSeverity::Info);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send_log(message, MessageSeverity::Success);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send_log(message, MessageSeverity::Warning);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send_log(message, MessageSeverity::Error);
    }
}
