//! BLE stack abstraction
//!
//! The watcher and the session manager talk to the radio only through these
//! traits. The WinRT adapter implements them on Windows; tests use an
//! in-memory stack.

use crate::domain::errors::{CommunicationStatus, PlatformError};
use crate::domain::models::{DeviceIdentity, DeviceUpdate};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one watcher run; events carry it so stale ones can be discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEventKind {
    Added(DeviceIdentity),
    Updated(DeviceUpdate),
    Removed(String),
    EnumerationCompleted,
    Stopped,
}

/// A device-enumeration callback, tagged with the watcher run that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub source: WatcherToken,
    pub kind: DeviceEventKind,
}

pub type WatcherEventSender = mpsc::UnboundedSender<WatcherEvent>;

/// Called from the platform's delivery thread with each raw notification payload
pub type NotificationHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A running platform enumeration
pub trait DeviceFeed: Send {
    /// Detach every listener and ask the platform to halt the scan
    fn stop(&mut self) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    DeniedByUser,
    DeniedBySystem,
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// Client Characteristic Configuration Descriptor value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccdValue {
    None,
    Notify,
    Indicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Paired,
    AlreadyPaired,
    NotReadyToPair,
    NotPaired,
    ConnectionRejected,
    TooManyConnections,
    HardwareFailure,
    AuthenticationTimeout,
    AuthenticationNotAllowed,
    AuthenticationFailure,
    NoSupportedProfiles,
    ProtectionLevelCouldNotBeMet,
    AccessDenied,
    InvalidCeremonyData,
    PairingCanceled,
    OperationAlreadyInProgress,
    RequiredHandlerNotRegistered,
    RejectedByHandler,
    RemoteDeviceHasAssociation,
    Failed,
}

impl PairingStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Paired | Self::AlreadyPaired)
    }
}

#[async_trait]
pub trait BleStack: Send + Sync {
    /// Begin enumerating BLE devices; every callback is posted to `sender` tagged with `token`
    fn start_enumeration(
        &self,
        token: WatcherToken,
        sender: WatcherEventSender,
    ) -> Result<Box<dyn DeviceFeed>, PlatformError>;

    /// Open a connection; `Ok(None)` means the platform returned no handle
    async fn connect(&self, id: &str) -> Result<Option<Box<dyn GattConnection>>, PlatformError>;

    async fn pair(&self, id: &str) -> Result<PairingStatus, PlatformError>;
}

#[async_trait]
pub trait GattConnection: Send + Sync {
    fn device_name(&self) -> String;

    /// Full service list, always re-queried from the device
    async fn services_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattService>>), PlatformError>;

    fn close(&self) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> String;

    async fn request_access(&self) -> Result<AccessStatus, PlatformError>;

    async fn characteristics_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattCharacteristic>>), PlatformError>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> String;

    fn properties(&self) -> CharacteristicProperties;

    async fn write_cccd(&self, value: CccdValue) -> Result<CommunicationStatus, PlatformError>;

    fn attach_value_changed(&self, handler: NotificationHandler) -> Result<(), PlatformError>;

    fn detach_value_changed(&self) -> Result<(), PlatformError>;
}
