//! Bluetooth Service Coordinator
//!
//! Owns the device watcher and the GATT session manager and is the single
//! consumer of user commands and watcher events.

use crate::domain::models::{AppEvent, BluetoothCommand, DeviceIdentity, WatcherStatusKind};
use crate::infrastructure::bluetooth::pairing;
use crate::infrastructure::bluetooth::platform::{BleStack, WatcherEvent};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::session::GattSessionManager;
use crate::infrastructure::bluetooth::watcher::{
    lock_discovery, DiscoveryWatcher, MatchPredicate, SharedDiscovery, WatcherOutcome,
};
use crate::infrastructure::input_simulator::InputReplayer;
use crate::infrastructure::status::StatusSink;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Behavior switches taken from settings and the command line
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub auto_connect: bool,
    pub pair_before_connect: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            pair_before_connect: false,
        }
    }
}

pub struct BluetoothService {
    stack: Arc<dyn BleStack>,
    watcher: DiscoveryWatcher,
    sessions: GattSessionManager,
    watcher_events: Option<mpsc::UnboundedReceiver<WatcherEvent>>,
    status: StatusSink,
    options: ServiceOptions,
}

impl BluetoothService {
    pub fn new(
        stack: Arc<dyn BleStack>,
        replayer: InputReplayer,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        options: ServiceOptions,
    ) -> Self {
        let status = StatusSink::new(event_sender);
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();

        Self {
            watcher: DiscoveryWatcher::new(stack.clone(), watcher_tx),
            sessions: GattSessionManager::new(stack.clone(), replayer, status.clone()),
            stack,
            watcher_events: Some(watcher_rx),
            status,
            options,
        }
    }

    /// Registry handle for the presentation layer
    pub fn discovery(&self) -> SharedDiscovery {
        self.watcher.shared()
    }

    /// Process commands and watcher events until shutdown, then tear down
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) -> Result<()> {
        let mut watcher_events = self
            .watcher_events
            .take()
            .context("Bluetooth service is already running")?;

        self.start_watcher();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BluetoothCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = watcher_events.recv() => self.handle_watcher_event(event).await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn handle_command(&mut self, command: BluetoothCommand) {
        debug!("Command: {:?}", command);
        match command {
            BluetoothCommand::StartWatcher => self.start_watcher(),
            BluetoothCommand::StopWatcher => {
                self.watcher.stop();
                self.status
                    .send(AppEvent::WatcherStatus(WatcherStatusKind::Stopping));
                self.status.info("Device watcher stopped.");
            }
            BluetoothCommand::Connect(id) => match self.watcher.select(&id) {
                Some(device) => {
                    self.status.send(AppEvent::DeviceSelected(device.clone()));
                    self.connect_to(device).await;
                }
                None => self.status.error(format!("Unknown device: {}", id)),
            },
            BluetoothCommand::Subscribe => {
                if let Err(e) = self.sessions.subscribe().await {
                    self.status.send_log(e.to_string(), e.severity());
                }
            }
            BluetoothCommand::Unsubscribe => match self.sessions.unsubscribe().await {
                Ok(()) => self.status.info("Successfully un-registered for notifications"),
                Err(e) => self.status.send_log(e.to_string(), e.severity()),
            },
            BluetoothCommand::Disconnect => match self.sessions.teardown().await {
                Ok(()) => self.status.info("Disconnected from device"),
                Err(e) => self.status.error(format!("Disconnect failed, try again: {}", e)),
            },
            BluetoothCommand::Pair => {
                let selected = self.watcher.selected();
                if let Err(e) =
                    pairing::pair_device(self.stack.as_ref(), selected.as_ref(), &self.status).await
                {
                    debug!("Pairing did not complete: {}", e);
                }
            }
            BluetoothCommand::Shutdown => self.shutdown().await,
        }
    }

    pub async fn handle_watcher_event(&mut self, event: WatcherEvent) {
        match self.watcher.handle_event(event) {
            WatcherOutcome::Discarded => {}
            WatcherOutcome::Applied { list_changed } => {
                if list_changed {
                    self.status.send(AppEvent::DeviceListChanged);
                }
            }
            WatcherOutcome::EnumerationCompleted => {
                let count = lock_discovery(&self.watcher.shared()).registry.len();
                self.status.info(format!(
                    "{} devices found. Enumeration completed. Watching for updates...",
                    count
                ));
                self.status.send(AppEvent::WatcherStatus(
                    WatcherStatusKind::EnumerationCompleted,
                ));
            }
            WatcherOutcome::Stopped => {
                self.status.info("No longer watching for devices.");
                self.status
                    .send(AppEvent::WatcherStatus(WatcherStatusKind::NotRunning));
            }
            WatcherOutcome::TargetMatched(device) => {
                self.status.send(AppEvent::DeviceListChanged);
                self.status
                    .send(AppEvent::WatcherStatus(WatcherStatusKind::Stopping));
                self.status.send(AppEvent::DeviceSelected(device.clone()));
                self.status
                    .success(format!("Found {}, connecting", device.display_name()));

                if self.options.pair_before_connect {
                    let _ = pairing::pair_device(self.stack.as_ref(), Some(&device), &self.status)
                        .await;
                }
                self.connect_to(device).await;
            }
        }
    }

    fn start_watcher(&mut self) {
        let predicate = self
            .options
            .auto_connect
            .then(|| Arc::new(protocol::is_target_device) as MatchPredicate);

        match self.watcher.start(predicate) {
            Ok(()) => {
                self.status.info("Device watcher started.");
                self.status
                    .send(AppEvent::WatcherStatus(WatcherStatusKind::Running));
                self.status.send(AppEvent::DeviceListChanged);
            }
            Err(e) => {
                warn!("Device watcher not started: {}", e);
                self.status.error(e.to_string());
            }
        }
    }

    /// Replace the current session: explicit teardown first, then connect
    async fn connect_to(&mut self, device: DeviceIdentity) {
        if let Err(e) = self.sessions.teardown().await {
            error!("Could not tear down previous session: {}", e);
            self.status
                .error(format!("Error: Unable to reset state, try again. {}", e));
            return;
        }

        self.status
            .info(format!("Connecting to {}...", device.display_name()));
        match self.sessions.start(&device).await {
            Ok(state) => info!("Session for {} ended pipeline in {:?}", device.id, state),
            Err(e) => {
                warn!("Session for {} failed: {}", device.id, e);
                self.status.send_log(e.to_string(), e.severity());
            }
        }
    }

    async fn shutdown(&mut self) {
        self.watcher.stop();
        if let Err(e) = self.sessions.teardown().await {
            error!("Shutdown left the session in place: {}", e);
            self.status
                .error(format!("Could not release the device cleanly: {}", e));
        }
        info!("Bluetooth service stopped");
    }
}
