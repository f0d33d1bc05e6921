//! Error taxonomy for the watcher, the GATT session and the hotkey pipeline.
//!
//! Raw platform failures are carried as [`PlatformError`] and converted into
//! one of the named kinds at the operation that issued the platform call.

use crate::domain::models::MessageSeverity;
use thiserror::Error;

/// Device or radio is not available (radio switched off)
pub const E_DEVICE_NOT_AVAILABLE: u32 = 0x8007_10DF;
/// General access denied
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
/// ATT: the attribute cannot be written
pub const E_BLUETOOTH_ATT_WRITE_NOT_PERMITTED: u32 = 0x8065_0003;
/// ATT: the attribute PDU was invalid
pub const E_BLUETOOTH_ATT_INVALID_PDU: u32 = 0x8065_0004;

/// Failure reported by the BLE stack, with its numeric result code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (0x{code:08X})")]
pub struct PlatformError {
    pub code: u32,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_device_unavailable(&self) -> bool {
        self.code == E_DEVICE_NOT_AVAILABLE
    }

    /// Write rejected because the characteristic does not really support it
    pub fn is_write_authorization_failure(&self) -> bool {
        matches!(
            self.code,
            E_BLUETOOTH_ATT_WRITE_NOT_PERMITTED | E_BLUETOOTH_ATT_INVALID_PDU | E_ACCESSDENIED
        )
    }
}

/// Outcome status of a GATT request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationStatus {
    Success,
    Unreachable,
    ProtocolError,
    AccessDenied,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    #[error("Device watcher is already running")]
    AlreadyRunning,
    #[error("Device watcher could not start: {0}")]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Bluetooth radio is off or the device is unavailable")]
    DeviceUnavailable,
    #[error("Failed to connect to device{}", detail_suffix(.0))]
    ConnectFailed(Option<String>),
    #[error("Device unreachable ({0:?})")]
    ServicesUnreachable(CommunicationStatus),
    #[error("Access to the device service is denied")]
    AccessDenied,
    #[error("Characteristic supports neither Notify nor Indicate")]
    NotSubscribable,
    #[error("Characteristic rejected the subscription request: {0}")]
    SubscriptionAuthFailure(String),
    #[error("Error registering for value changes: {0}")]
    SubscribeFailed(String),
    #[error("A characteristic is already subscribed")]
    AlreadySubscribed,
    #[error("No active subscription to clear")]
    NotSubscribed,
    #[error("Failed to clear the notification configuration: {0}")]
    TeardownFailure(String),
    #[error("A GATT session is already active; tear it down first")]
    SessionActive,
    #[error("No GATT session is active")]
    NoSession,
}

impl SessionError {
    /// Radio-off and access problems are surfaced as warnings, the rest as errors
    pub fn severity(&self) -> MessageSeverity {
        match self {
            Self::DeviceUnavailable | Self::AccessDenied | Self::NotSubscribed => {
                MessageSeverity::Warning
            }
            _ => MessageSeverity::Error,
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed payload: expected 2 bytes, got {0}")]
    MalformedPayload(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    #[error("Input injection accepted {sent} of {expected} key events")]
    Partial { sent: usize, expected: usize },
}
