//! In-memory BLE stack for exercising the watcher and session state machines.

use super::platform::{
    AccessStatus, BleStack, CccdValue, CharacteristicProperties, DeviceFeed, GattCharacteristic,
    GattConnection, GattService, NotificationHandler, PairingStatus, WatcherEventSender,
    WatcherToken,
};
use crate::domain::errors::{CommunicationStatus, PlatformError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FakeCharacteristic {
    uuid: String,
    properties: CharacteristicProperties,
    write_results: Mutex<VecDeque<Result<CommunicationStatus, PlatformError>>>,
    pub writes: Mutex<Vec<CccdValue>>,
    handler: Mutex<Option<NotificationHandler>>,
    pub attach_count: AtomicUsize,
    fail_attach: AtomicBool,
}

impl FakeCharacteristic {
    pub fn new(uuid: &str, properties: CharacteristicProperties) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            properties,
            write_results: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            attach_count: AtomicUsize::new(0),
            fail_attach: AtomicBool::new(false),
        })
    }

    pub fn notifying(uuid: &str) -> Arc<Self> {
        Self::new(
            uuid,
            CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
        )
    }

    /// Queue the outcome of the next CCCD write; unqueued writes succeed
    pub fn push_write_result(&self, result: Result<CommunicationStatus, PlatformError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    /// Make the next handler registration fail
    pub fn fail_next_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn written(&self) -> Vec<CccdValue> {
        self.writes.lock().unwrap().clone()
    }

    /// Deliver a value-changed event the way the platform would
    pub fn notify(&self, payload: &[u8]) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(payload.to_vec());
        }
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    async fn write_cccd(&self, value: CccdValue) -> Result<CommunicationStatus, PlatformError> {
        self.writes.lock().unwrap().push(value);
        self.write_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(CommunicationStatus::Success))
    }

    fn attach_value_changed(&self, handler: NotificationHandler) -> Result<(), PlatformError> {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.swap(false, Ordering::SeqCst) {
            return Err(PlatformError::new(0x8000_FFFF, "handler registration failed"));
        }
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn detach_value_changed(&self) -> Result<(), PlatformError> {
        *self.handler.lock().unwrap() = None;
        Ok(())
    }
}

pub struct FakeService {
    uuid: String,
    access: AccessStatus,
    status: CommunicationStatus,
    characteristics: Vec<Arc<FakeCharacteristic>>,
}

impl FakeService {
    pub fn new(uuid: &str, characteristics: Vec<Arc<FakeCharacteristic>>) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            access: AccessStatus::Allowed,
            status: CommunicationStatus::Success,
            characteristics,
        })
    }

    pub fn with_access(uuid: &str, access: AccessStatus) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            access,
            status: CommunicationStatus::Success,
            characteristics: Vec::new(),
        })
    }

    pub fn with_status(uuid: &str, status: CommunicationStatus) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            access: AccessStatus::Allowed,
            status,
            characteristics: Vec::new(),
        })
    }
}

#[async_trait]
impl GattService for FakeService {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn request_access(&self) -> Result<AccessStatus, PlatformError> {
        Ok(self.access)
    }

    async fn characteristics_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattCharacteristic>>), PlatformError> {
        let characteristics = self
            .characteristics
            .iter()
            .map(|c| c.clone() as Arc<dyn GattCharacteristic>)
            .collect();
        Ok((self.status, characteristics))
    }
}

#[derive(Clone)]
pub struct FakeConnection {
    status: CommunicationStatus,
    services: Vec<Arc<FakeService>>,
    pub closed: Arc<AtomicBool>,
}

impl FakeConnection {
    pub fn new(services: Vec<Arc<FakeService>>) -> Self {
        Self {
            status: CommunicationStatus::Success,
            services,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            status: CommunicationStatus::Unreachable,
            services: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GattConnection for FakeConnection {
    fn device_name(&self) -> String {
        "Fake Hotkey".to_string()
    }

    async fn services_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattService>>), PlatformError> {
        let services = self
            .services
            .iter()
            .map(|s| s.clone() as Arc<dyn GattService>)
            .collect();
        Ok((self.status, services))
    }

    fn close(&self) -> Result<(), PlatformError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub enum FakeConnect {
    Connection(FakeConnection),
    NoHandle,
    Error(PlatformError),
}

pub struct FakeFeed {
    stopped: Arc<AtomicUsize>,
}

impl DeviceFeed for FakeFeed {
    fn stop(&mut self) -> Result<(), PlatformError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBleStack {
    pub feeds: Mutex<Vec<(WatcherToken, WatcherEventSender)>>,
    pub feed_stops: Arc<AtomicUsize>,
    connect: Mutex<FakeConnect>,
    pub connect_calls: Mutex<Vec<String>>,
    pairing: Mutex<Result<PairingStatus, PlatformError>>,
    pub pair_calls: Mutex<Vec<String>>,
}

impl FakeBleStack {
    pub fn new(connect: FakeConnect) -> Arc<Self> {
        Arc::new(Self {
            feeds: Mutex::new(Vec::new()),
            feed_stops: Arc::new(AtomicUsize::new(0)),
            connect: Mutex::new(connect),
            connect_calls: Mutex::new(Vec::new()),
            pairing: Mutex::new(Ok(PairingStatus::Paired)),
            pair_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connect(&self, connect: FakeConnect) {
        *self.connect.lock().unwrap() = connect;
    }

    pub fn set_pairing(&self, result: Result<PairingStatus, PlatformError>) {
        *self.pairing.lock().unwrap() = result;
    }

    pub fn last_token(&self) -> Option<WatcherToken> {
        self.feeds.lock().unwrap().last().map(|(token, _)| *token)
    }
}

#[async_trait]
impl BleStack for FakeBleStack {
    fn start_enumeration(
        &self,
        token: WatcherToken,
        sender: WatcherEventSender,
    ) -> Result<Box<dyn DeviceFeed>, PlatformError> {
        self.feeds.lock().unwrap().push((token, sender));
        Ok(Box::new(FakeFeed {
            stopped: self.feed_stops.clone(),
        }))
    }

    async fn connect(&self, id: &str) -> Result<Option<Box<dyn GattConnection>>, PlatformError> {
        self.connect_calls.lock().unwrap().push(id.to_string());
        let connect = self.connect.lock().unwrap().clone();
        match connect {
            FakeConnect::Connection(conn) => Ok(Some(Box::new(conn))),
            FakeConnect::NoHandle => Ok(None),
            FakeConnect::Error(err) => Err(err),
        }
    }

    async fn pair(&self, id: &str) -> Result<PairingStatus, PlatformError> {
        self.pair_calls.lock().unwrap().push(id.to_string());
        self.pairing.lock().unwrap().clone()
    }
}
