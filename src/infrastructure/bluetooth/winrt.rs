//! WinRT BLE Stack
//!
//! Implements the platform traits on top of `Windows.Devices.Enumeration`
//! and `Windows.Devices.Bluetooth`. HRESULTs are carried in
//! [`PlatformError`] and never leave this layer unconverted.

use crate::domain::errors::{CommunicationStatus, PlatformError};
use crate::domain::models::{DeviceIdentity, DeviceStatus, DeviceUpdate};
use crate::infrastructure::bluetooth::platform::{
    AccessStatus, BleStack, CccdValue, CharacteristicProperties, DeviceEventKind, DeviceFeed,
    GattCharacteristic, GattConnection, GattService, NotificationHandler, PairingStatus,
    WatcherEvent, WatcherEventSender, WatcherToken,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};
use windows::core::{IInspectable, Interface, Ref, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Devices::Enumeration::{
    DeviceAccessStatus, DeviceInformation, DeviceInformationUpdate, DevicePairingResultStatus,
    DeviceWatcher, DeviceWatcherStatus,
};
use windows::Foundation::Collections::IMapView;
use windows::Foundation::{IReference, TypedEventHandler};
use windows::Storage::Streams::DataReader;

const PROP_NAME: &str = "System.ItemNameDisplay";
const PROP_IS_CONNECTED: &str = "System.Devices.Aep.IsConnected";
const PROP_IS_CONNECTABLE: &str = "System.Devices.Aep.Bluetooth.Le.IsConnectable";
const PROP_IS_PAIRED: &str = "System.Devices.Aep.IsPaired";

impl From<windows::core::Error> for PlatformError {
    fn from(e: windows::core::Error) -> Self {
        PlatformError::new(e.code().0 as u32, e.message().to_string())
    }
}

fn communication_status(status: GattCommunicationStatus) -> CommunicationStatus {
    match status {
        GattCommunicationStatus::Success => CommunicationStatus::Success,
        GattCommunicationStatus::AccessDenied => CommunicationStatus::AccessDenied,
        GattCommunicationStatus::ProtocolError => CommunicationStatus::ProtocolError,
        _ => CommunicationStatus::Unreachable,
    }
}

fn lookup<T>(props: &IMapView<HSTRING, IInspectable>, key: &str) -> Option<T>
where
    T: windows::core::RuntimeType + 'static,
    IReference<T>: Interface,
{
    let key = HSTRING::from(key);
    if !props.HasKey(&key).ok()? {
        return None;
    }
    props
        .Lookup(&key)
        .ok()?
        .cast::<IReference<T>>()
        .ok()?
        .Value()
        .ok()
}

fn device_from_info(info: &DeviceInformation) -> windows::core::Result<DeviceIdentity> {
    let props = info.Properties()?;
    Ok(DeviceIdentity {
        id: info.Id()?.to_string(),
        name: info.Name()?.to_string(),
        status: DeviceStatus {
            is_connectable: lookup::<bool>(&props, PROP_IS_CONNECTABLE),
            is_connected: lookup::<bool>(&props, PROP_IS_CONNECTED).unwrap_or(false),
            is_paired: info.Pairing()?.IsPaired()?,
        },
    })
}

fn update_from_info(info: &DeviceInformationUpdate) -> windows::core::Result<DeviceUpdate> {
    let props = info.Properties()?;
    Ok(DeviceUpdate {
        id: info.Id()?.to_string(),
        name: lookup::<HSTRING>(&props, PROP_NAME).map(|n| n.to_string()),
        is_connectable: lookup::<bool>(&props, PROP_IS_CONNECTABLE),
        is_connected: lookup::<bool>(&props, PROP_IS_CONNECTED),
        is_paired: lookup::<bool>(&props, PROP_IS_PAIRED),
    })
}

/// Event registration tokens for the four device listeners
struct DeviceListeners {
    added: i64,
    updated: i64,
    removed: i64,
    enumeration_completed: i64,
}

pub struct WinDeviceFeed {
    watcher: DeviceWatcher,
    listeners: Option<DeviceListeners>,
    stopped: i64,
}

impl DeviceFeed for WinDeviceFeed {
    fn stop(&mut self) -> Result<(), PlatformError> {
        if let Some(listeners) = self.listeners.take() {
            self.watcher.RemoveAdded(listeners.added)?;
            self.watcher.RemoveUpdated(listeners.updated)?;
            self.watcher.RemoveRemoved(listeners.removed)?;
            self.watcher
                .RemoveEnumerationCompleted(listeners.enumeration_completed)?;
        }

        let status = self.watcher.Status()?;
        if status == DeviceWatcherStatus::Started
            || status == DeviceWatcherStatus::EnumerationCompleted
        {
            self.watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for WinDeviceFeed {
    fn drop(&mut self) {
        let _ = self.stop();
        let _ = self.watcher.RemoveStopped(self.stopped);
    }
}

pub struct WinBleStack;

impl WinBleStack {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BleStack for WinBleStack {
    fn start_enumeration(
        &self,
        token: WatcherToken,
        sender: WatcherEventSender,
    ) -> Result<Box<dyn DeviceFeed>, PlatformError> {
        let selector = HSTRING::from(format!(
            "({}) OR ({})",
            BluetoothLEDevice::GetDeviceSelectorFromPairingState(true)?,
            BluetoothLEDevice::GetDeviceSelectorFromPairingState(false)?
        ));
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&selector)?;

        let post = move |kind: DeviceEventKind| {
            let _ = sender.send(WatcherEvent {
                source: token,
                kind,
            });
        };

        let on_added = post.clone();
        let added = watcher.Added(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    on_added(DeviceEventKind::Added(device_from_info(info)?));
                }
                Ok(())
            },
        ))?;

        let on_updated = post.clone();
        let updated = watcher.Updated(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformationUpdate>| {
                if let Some(info) = info.as_ref() {
                    on_updated(DeviceEventKind::Updated(update_from_info(info)?));
                }
                Ok(())
            },
        ))?;

        let on_removed = post.clone();
        let removed = watcher.Removed(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformationUpdate>| {
                if let Some(info) = info.as_ref() {
                    on_removed(DeviceEventKind::Removed(info.Id()?.to_string()));
                }
                Ok(())
            },
        ))?;

        let on_completed = post.clone();
        let enumeration_completed = watcher.EnumerationCompleted(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, _: Ref<IInspectable>| {
                on_completed(DeviceEventKind::EnumerationCompleted);
                Ok(())
            },
        ))?;

        let stopped = watcher.Stopped(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, _: Ref<IInspectable>| {
                post(DeviceEventKind::Stopped);
                Ok(())
            },
        ))?;

        watcher.Start()?;
        debug!("DeviceWatcher started for {:?}", token);

        Ok(Box::new(WinDeviceFeed {
            watcher,
            listeners: Some(DeviceListeners {
                added,
                updated,
                removed,
                enumeration_completed,
            }),
            stopped,
        }))
    }

    async fn connect(&self, id: &str) -> Result<Option<Box<dyn GattConnection>>, PlatformError> {
        match BluetoothLEDevice::FromIdAsync(&HSTRING::from(id))?.await {
            Ok(device) => Ok(Some(Box::new(WinConnection { device }))),
            // A null device comes back as an error carrying S_OK
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn pair(&self, id: &str) -> Result<PairingStatus, PlatformError> {
        let info = DeviceInformation::CreateFromIdAsync(&HSTRING::from(id))?.await?;
        let result = info.Pairing()?.PairAsync()?.await?;
        Ok(pairing_status(result.Status()?))
    }
}

fn pairing_status(status: DevicePairingResultStatus) -> PairingStatus {
    match status {
        DevicePairingResultStatus::Paired => PairingStatus::Paired,
        DevicePairingResultStatus::AlreadyPaired => PairingStatus::AlreadyPaired,
        DevicePairingResultStatus::NotReadyToPair => PairingStatus::NotReadyToPair,
        DevicePairingResultStatus::NotPaired => PairingStatus::NotPaired,
        DevicePairingResultStatus::ConnectionRejected => PairingStatus::ConnectionRejected,
        DevicePairingResultStatus::TooManyConnections => PairingStatus::TooManyConnections,
        DevicePairingResultStatus::HardwareFailure => PairingStatus::HardwareFailure,
        DevicePairingResultStatus::AuthenticationTimeout => PairingStatus::AuthenticationTimeout,
        DevicePairingResultStatus::AuthenticationNotAllowed => {
            PairingStatus::AuthenticationNotAllowed
        }
        DevicePairingResultStatus::AuthenticationFailure => PairingStatus::AuthenticationFailure,
        DevicePairingResultStatus::NoSupportedProfiles => PairingStatus::NoSupportedProfiles,
        DevicePairingResultStatus::ProtectionLevelCouldNotBeMet => {
            PairingStatus::ProtectionLevelCouldNotBeMet
        }
        DevicePairingResultStatus::AccessDenied => PairingStatus::AccessDenied,
        DevicePairingResultStatus::InvalidCeremonyData => PairingStatus::InvalidCeremonyData,
        DevicePairingResultStatus::PairingCanceled => PairingStatus::PairingCanceled,
        DevicePairingResultStatus::OperationAlreadyInProgress => {
            PairingStatus::OperationAlreadyInProgress
        }
        DevicePairingResultStatus::RequiredHandlerNotRegistered => {
            PairingStatus::RequiredHandlerNotRegistered
        }
        DevicePairingResultStatus::RejectedByHandler => PairingStatus::RejectedByHandler,
        DevicePairingResultStatus::RemoteDeviceHasAssociation => {
            PairingStatus::RemoteDeviceHasAssociation
        }
        _ => PairingStatus::Failed,
    }
}

struct WinConnection {
    device: BluetoothLEDevice,
}

#[async_trait]
impl GattConnection for WinConnection {
    fn device_name(&self) -> String {
        self.device
            .Name()
            .map(|n| n.to_string())
            .unwrap_or_default()
    }

    async fn services_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattService>>), PlatformError> {
        let result = self
            .device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        let status = communication_status(result.Status()?);

        let mut services: Vec<Arc<dyn GattService>> = Vec::new();
        if status == CommunicationStatus::Success {
            let list = result.Services()?;
            for i in 0..list.Size()? {
                services.push(Arc::new(WinService {
                    service: list.GetAt(i)?,
                }));
            }
        }
        Ok((status, services))
    }

    fn close(&self) -> Result<(), PlatformError> {
        self.device.Close()?;
        Ok(())
    }
}

struct WinService {
    service: GattDeviceService,
}

#[async_trait]
impl GattService for WinService {
    fn uuid(&self) -> String {
        self.service
            .Uuid()
            .map(|guid| format!("{:?}", guid))
            .unwrap_or_default()
    }

    async fn request_access(&self) -> Result<AccessStatus, PlatformError> {
        let status = self.service.RequestAccessAsync()?.await?;
        Ok(match status {
            DeviceAccessStatus::Allowed => AccessStatus::Allowed,
            DeviceAccessStatus::DeniedByUser => AccessStatus::DeniedByUser,
            DeviceAccessStatus::DeniedBySystem => AccessStatus::DeniedBySystem,
            _ => AccessStatus::Unspecified,
        })
    }

    async fn characteristics_uncached(
        &self,
    ) -> Result<(CommunicationStatus, Vec<Arc<dyn GattCharacteristic>>), PlatformError> {
        let result = self
            .service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        let status = communication_status(result.Status()?);

        let mut characteristics: Vec<Arc<dyn GattCharacteristic>> = Vec::new();
        if status == CommunicationStatus::Success {
            let list = result.Characteristics()?;
            for i in 0..list.Size()? {
                characteristics.push(Arc::new(WinGattCharacteristic {
                    characteristic: list.GetAt(i)?,
                    value_changed: Mutex::new(None),
                }));
            }
        }
        Ok((status, characteristics))
    }
}

struct WinGattCharacteristic {
    characteristic: WinCharacteristic,
    value_changed: Mutex<Option<i64>>,
}

#[async_trait]
impl GattCharacteristic for WinGattCharacteristic {
    fn uuid(&self) -> String {
        self.characteristic
            .Uuid()
            .map(|guid| format!("{:?}", guid))
            .unwrap_or_default()
    }

    fn properties(&self) -> CharacteristicProperties {
        let props = match self.characteristic.CharacteristicProperties() {
            Ok(props) => props,
            Err(e) => {
                warn!("Could not read characteristic properties: {}", e);
                return CharacteristicProperties::default();
            }
        };
        CharacteristicProperties {
            read: props.contains(GattCharacteristicProperties::Read),
            write: props.contains(GattCharacteristicProperties::Write),
            notify: props.contains(GattCharacteristicProperties::Notify),
            indicate: props.contains(GattCharacteristicProperties::Indicate),
        }
    }

    async fn write_cccd(&self, value: CccdValue) -> Result<CommunicationStatus, PlatformError> {
        let value = match value {
            CccdValue::None => GattClientCharacteristicConfigurationDescriptorValue::None,
            CccdValue::Notify => GattClientCharacteristicConfigurationDescriptorValue::Notify,
            CccdValue::Indicate => GattClientCharacteristicConfigurationDescriptorValue::Indicate,
        };
        let status = self
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
            .await?;
        Ok(communication_status(status))
    }

    fn attach_value_changed(&self, handler: NotificationHandler) -> Result<(), PlatformError> {
        let mut registration = self
            .value_changed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if registration.is_some() {
            return Err(PlatformError::new(
                crate::domain::errors::E_ACCESSDENIED,
                "A value-changed handler is already attached",
            ));
        }

        let token = self.characteristic.ValueChanged(&TypedEventHandler::new(
            move |_: Ref<WinCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let reader = DataReader::FromBuffer(&args.CharacteristicValue()?)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    trace!("ValueChanged: {:02X?}", bytes);
                    handler(bytes);
                }
                Ok(())
            },
        ))?;
        *registration = Some(token);
        Ok(())
    }

    fn detach_value_changed(&self) -> Result<(), PlatformError> {
        let mut registration = self
            .value_changed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = registration.take() {
            self.characteristic.RemoveValueChanged(token)?;
        }
        Ok(())
    }
}
