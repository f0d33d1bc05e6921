//! GATT Session Module
//!
//! Drives connect → discover services → discover characteristics →
//! subscribe for the single active device session, and turns each
//! notification into replayed keyboard input.

use crate::domain::errors::{CommunicationStatus, SessionError};
use crate::domain::models::{AppEvent, DeviceIdentity, SessionState};
use crate::infrastructure::bluetooth::platform::{
    AccessStatus, BleStack, CccdValue, GattCharacteristic, GattConnection, GattService,
    NotificationHandler,
};
use crate::infrastructure::bluetooth::protocol::{self, HOTKEY_CHAR_UUID, SERVICE_UUID};
use crate::infrastructure::input_simulator::InputReplayer;
use crate::infrastructure::status::StatusSink;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One connected device. Not `Clone`: a new connection replaces it wholesale.
pub struct GattSession {
    identity: String,
    connection: Box<dyn GattConnection>,
    service_uuid: Option<String>,
    characteristic: Option<Arc<dyn GattCharacteristic>>,
    subscribed: bool,
}

impl GattSession {
    fn new(identity: &str, connection: Box<dyn GattConnection>) -> Self {
        Self {
            identity: identity.to_string(),
            connection,
            service_uuid: None,
            characteristic: None,
            subscribed: false,
        }
    }

    #[cfg(test)]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[cfg(test)]
    pub fn service_uuid(&self) -> Option<&str> {
        self.service_uuid.as_deref()
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

pub struct GattSessionManager {
    stack: Arc<dyn BleStack>,
    state: SessionState,
    session: Option<GattSession>,
    notification_handler: NotificationHandler,
    status: StatusSink,
}

impl GattSessionManager {
    pub fn new(stack: Arc<dyn BleStack>, replayer: InputReplayer, status: StatusSink) -> Self {
        let handler_status = status.clone();
        let notification_handler: NotificationHandler = Arc::new(move |payload: Vec<u8>| {
            handle_notification(&replayer, &handler_status, &payload)
        });

        Self {
            stack,
            state: SessionState::Idle,
            session: None,
            notification_handler,
            status,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&GattSession> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.subscribed)
    }

    /// Run the whole pipeline for `device`.
    ///
    /// Returns the resulting state: `Subscribed`, or `Idle` when the device
    /// does not expose the hotkey service/characteristic.
    pub async fn start(&mut self, device: &DeviceIdentity) -> Result<SessionState, SessionError> {
        if self.session.is_some() || self.state != SessionState::Idle {
            warn!(
                "Refusing to start a session for {} while in state {:?}",
                device.id, self.state
            );
            return Err(SessionError::SessionActive);
        }

        self.connect(&device.id).await?;

        let Some(characteristic) = self.discover_services().await? else {
            info!("Hotkey characteristic not found on {}", device.id);
            self.status
                .info("Hotkey service or characteristic not found on this device");
            self.release_connection();
            return Ok(self.state);
        };

        if let Some(session) = self.session.as_mut() {
            session.characteristic = Some(characteristic);
        }
        self.set_state(SessionState::Subscribing);
        self.enable_notifications().await?;
        Ok(self.state)
    }

    async fn connect(&mut self, id: &str) -> Result<(), SessionError> {
        info!("Connecting to {}", id);
        self.set_state(SessionState::Connecting);

        let connection = match self.stack.connect(id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                self.set_state(SessionState::Idle);
                return Err(SessionError::ConnectFailed(None));
            }
            Err(e) if e.is_device_unavailable() => {
                warn!("Device unavailable: {}", e);
                self.set_state(SessionState::Idle);
                return Err(SessionError::DeviceUnavailable);
            }
            Err(e) => {
                error!("Connect failed: {}", e);
                self.set_state(SessionState::Idle);
                return Err(SessionError::ConnectFailed(Some(e.to_string())));
            }
        };

        info!("Connected to {:?}", connection.device_name());
        self.session = Some(GattSession::new(id, connection));
        self.set_state(SessionState::DiscoveringServices);
        Ok(())
    }

    /// Scan every service whose UUID contains the target and return the first
    /// matching characteristic found in any of them
    async fn discover_services(
        &mut self,
    ) -> Result<Option<Arc<dyn GattCharacteristic>>, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;

        let (status, services) = match session.connection.services_uncached().await {
            Ok(result) => result,
            Err(e) => {
                warn!("Service enumeration failed: {}", e);
                (CommunicationStatus::Unreachable, Vec::new())
            }
        };

        if status != CommunicationStatus::Success {
            error!("Failed to get GATT services. Status: {:?}", status);
            self.release_connection();
            return Err(SessionError::ServicesUnreachable(status));
        }
        info!("Found {} services", services.len());

        for service in services {
            let uuid = service.uuid();
            if !protocol::uuid_matches(&uuid, SERVICE_UUID) {
                debug!("Skipping service {}", uuid);
                continue;
            }

            info!("Found hotkey service {}", uuid);
            if let Some(session) = self.session.as_mut() {
                session.service_uuid = Some(uuid);
            }
            self.set_state(SessionState::DiscoveringCharacteristics);

            if let Some(characteristic) = self.discover_characteristics(service.as_ref()).await {
                return Ok(Some(characteristic));
            }
        }

        Ok(None)
    }

    /// Soft failures here count as "no characteristics" so the service loop continues
    async fn discover_characteristics(
        &self,
        service: &dyn GattService,
    ) -> Option<Arc<dyn GattCharacteristic>> {
        let access = match service.request_access().await {
            Ok(access) => access,
            Err(e) => {
                warn!("Service access request failed: {}", e);
                AccessStatus::Unspecified
            }
        };
        if access != AccessStatus::Allowed {
            warn!("Service access status: {:?}", access);
            self.status
                .warning(format!("{} ({:?})", SessionError::AccessDenied, access));
            return None;
        }

        let characteristics = match service.characteristics_uncached().await {
            Ok((CommunicationStatus::Success, characteristics)) => characteristics,
            Ok((status, _)) => {
                warn!("Failed to get characteristics. Status: {:?}", status);
                self.status.warning("Error accessing service");
                return None;
            }
            Err(e) => {
                warn!("Characteristic enumeration failed: {}", e);
                self.status.warning("Error accessing service");
                return None;
            }
        };
        info!("Found {} characteristics", characteristics.len());

        characteristics
            .into_iter()
            .find(|c| protocol::uuid_matches(&c.uuid(), HOTKEY_CHAR_UUID))
    }

    /// Re-enable notifications on the already selected characteristic
    pub async fn subscribe(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connected => {}
            SessionState::Subscribed => return Err(SessionError::AlreadySubscribed),
            _ => return Err(SessionError::NoSession),
        }
        self.set_state(SessionState::Subscribing);
        self.enable_notifications().await
    }

    async fn enable_notifications(&mut self) -> Result<(), SessionError> {
        let characteristic = {
            let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
            if session.subscribed {
                return Err(SessionError::AlreadySubscribed);
            }
            session
                .characteristic
                .clone()
                .ok_or(SessionError::NoSession)?
        };

        let properties = characteristic.properties();
        let value = if properties.indicate {
            CccdValue::Indicate
        } else if properties.notify {
            CccdValue::Notify
        } else {
            error!("Characteristic {} cannot notify", characteristic.uuid());
            self.release_connection();
            return Err(SessionError::NotSubscribable);
        };

        info!("Writing CCCD {:?}", value);
        let failure = match characteristic.write_cccd(value).await {
            Ok(CommunicationStatus::Success) => {
                match characteristic.attach_value_changed(self.notification_handler.clone()) {
                    Ok(()) => None,
                    Err(e) => {
                        // The device is already pushing values nobody listens to
                        match characteristic.write_cccd(CccdValue::None).await {
                            Ok(CommunicationStatus::Success) => {}
                            Ok(status) => warn!("Could not reset CCCD: {:?}", status),
                            Err(clear) => warn!("Could not reset CCCD: {}", clear),
                        }
                        Some(SessionError::SubscribeFailed(e.to_string()))
                    }
                }
            }
            Ok(status) => Some(SessionError::SubscribeFailed(format!("{:?}", status))),
            Err(e) if e.is_write_authorization_failure() => {
                Some(SessionError::SubscriptionAuthFailure(e.to_string()))
            }
            Err(e) => Some(SessionError::SubscribeFailed(e.to_string())),
        };

        if let Some(err) = failure {
            error!("Subscription failed: {}", err);
            self.set_state(SessionState::Failed);
            return Err(err);
        }

        if let Some(session) = self.session.as_mut() {
            session.subscribed = true;
        }
        self.set_state(SessionState::Subscribed);
        self.status.success("Successfully subscribed for value changes");
        Ok(())
    }

    /// Clear the CCCD; the handler is detached only if the write succeeds
    pub async fn unsubscribe(&mut self) -> Result<(), SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoSession)?;
        if !session.subscribed {
            return Err(SessionError::NotSubscribed);
        }
        self.clear_subscription().await?;
        if self.state == SessionState::Subscribed {
            self.set_state(SessionState::Connected);
        }
        Ok(())
    }

    async fn clear_subscription(&mut self) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoSession)?;
        if !session.subscribed {
            return Ok(());
        }
        let Some(characteristic) = session.characteristic.clone() else {
            session.subscribed = false;
            return Ok(());
        };

        match characteristic.write_cccd(CccdValue::None).await {
            Ok(CommunicationStatus::Success) => {}
            Ok(status) => {
                return Err(SessionError::TeardownFailure(format!("{:?}", status)));
            }
            Err(e) => return Err(SessionError::TeardownFailure(e.to_string())),
        }

        if let Err(e) = characteristic.detach_value_changed() {
            warn!("Failed to detach value-changed handler: {}", e);
        }
        session.subscribed = false;
        info!("Unsubscribed from {}", characteristic.uuid());
        Ok(())
    }

    /// Tear the session down: clear the subscription, then release the connection.
    ///
    /// If clearing the subscription fails the session is kept intact for a retry.
    pub async fn teardown(&mut self) -> Result<(), SessionError> {
        if self.session.is_none() {
            self.set_state(SessionState::Idle);
            return Ok(());
        }

        if let Err(e) = self.clear_subscription().await {
            error!("Teardown failed, keeping session: {}", e);
            return Err(e);
        }

        self.release_connection();
        Ok(())
    }

    fn release_connection(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.connection.close() {
                warn!("Failed to close connection to {}: {}", session.identity, e);
            }
            info!("Released connection to {}", session.identity);
        }
        self.set_state(SessionState::Idle);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.status.send(AppEvent::SessionState(state));
        }
    }
}

/// Decode one value-changed payload and replay it as keyboard input.
///
/// Runs on the platform's notification thread; the status line goes through
/// the channel to the presentation thread.
pub fn handle_notification(replayer: &InputReplayer, status: &StatusSink, payload: &[u8]) {
    let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
    let dump = protocol::hex_dump(payload);

    let hotkey = match protocol::decode_payload(payload) {
        Ok(hotkey) => hotkey,
        Err(e) => {
            warn!("Dropping notification [{}]: {}", dump, e);
            status.error(format!("{} at {}: {}", e, timestamp, dump));
            return;
        }
    };

    if let Err(e) = replayer.replay(&hotkey) {
        error!("Input injection failed: {}", e);
        status.error(format!("Input injection failed: {}", e));
    }
    status.info(format!("Value changed at {}: {}", timestamp, dump));
}
