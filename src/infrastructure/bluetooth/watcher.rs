//! Device Watcher Module
//!
//! Wraps the platform device-enumeration feed. Every callback arrives as a
//! [`WatcherEvent`] tagged with the run that produced it; events from a run
//! that is no longer active are dropped before they reach the registry.

use crate::domain::errors::WatcherError;
use crate::domain::models::DeviceIdentity;
use crate::domain::registry::{DeviceRegistry, Partition, RegistryChange};
use crate::infrastructure::bluetooth::platform::{
    BleStack, DeviceEventKind, DeviceFeed, WatcherEvent, WatcherEventSender, WatcherToken,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Decides whether a freshly added, named device is the auto-connect target
pub type MatchPredicate = Arc<dyn Fn(&DeviceIdentity) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    NotRunning,
    Running(WatcherToken),
    Stopping(WatcherToken),
}

/// Registry plus watcher identity, guarded by a single lock
#[derive(Debug)]
pub struct DiscoveryState {
    pub registry: DeviceRegistry,
    status: WatcherStatus,
    selected: Option<DeviceIdentity>,
    matched: bool,
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryState {
    fn new() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            status: WatcherStatus::NotRunning,
            selected: None,
            matched: false,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> WatcherStatus {
        self.status
    }

    #[cfg(test)]
    pub fn selected(&self) -> Option<&DeviceIdentity> {
        self.selected.as_ref()
    }
}

pub type SharedDiscovery = Arc<Mutex<DiscoveryState>>;

/// Enter the discovery lock; a panic elsewhere does not invalidate the registry
pub fn lock_discovery(shared: &SharedDiscovery) -> MutexGuard<'_, DiscoveryState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What handling one watcher event amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherOutcome {
    /// Event came from a run that is no longer active
    Discarded,
    Applied { list_changed: bool },
    /// The target appeared; the watcher has already stopped itself
    TargetMatched(DeviceIdentity),
    EnumerationCompleted,
    Stopped,
}

pub struct DiscoveryWatcher {
    stack: Arc<dyn BleStack>,
    shared: SharedDiscovery,
    event_sender: WatcherEventSender,
    feed: Option<Box<dyn DeviceFeed>>,
    predicate: Option<MatchPredicate>,
    next_token: u64,
}

impl DiscoveryWatcher {
    pub fn new(stack: Arc<dyn BleStack>, event_sender: WatcherEventSender) -> Self {
        Self {
            stack,
            shared: Arc::new(Mutex::new(DiscoveryState::new())),
            event_sender,
            feed: None,
            predicate: None,
            next_token: 0,
        }
    }

    /// Handle for readers (the presentation layer) sharing the same lock
    pub fn shared(&self) -> SharedDiscovery {
        self.shared.clone()
    }

    #[cfg(test)]
    pub fn status(&self) -> WatcherStatus {
        lock_discovery(&self.shared).status
    }

    pub fn selected(&self) -> Option<DeviceIdentity> {
        lock_discovery(&self.shared).selected.clone()
    }

    /// Start a new run. The registry is cleared; `predicate` enables auto-connect.
    pub fn start(&mut self, predicate: Option<MatchPredicate>) -> Result<(), WatcherError> {
        let token = {
            let mut state = lock_discovery(&self.shared);
            if matches!(state.status, WatcherStatus::Running(_)) {
                return Err(WatcherError::AlreadyRunning);
            }
            if !state.registry.is_empty() {
                debug!("Clearing {} devices from the previous run", state.registry.len());
            }
            state.registry.clear();
            state.matched = false;
            self.next_token += 1;
            let token = WatcherToken(self.next_token);
            state.status = WatcherStatus::Running(token);
            token
        };
        self.predicate = predicate;

        match self.stack.start_enumeration(token, self.event_sender.clone()) {
            Ok(feed) => {
                info!("Device watcher started ({:?})", token);
                self.feed = Some(feed);
                Ok(())
            }
            Err(e) => {
                lock_discovery(&self.shared).status = WatcherStatus::NotRunning;
                Err(WatcherError::Platform(e))
            }
        }
    }

    /// Stop the current run. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let stopping = {
            let mut state = lock_discovery(&self.shared);
            match state.status {
                WatcherStatus::Running(token) => {
                    state.status = WatcherStatus::Stopping(token);
                    Some(token)
                }
                _ => None,
            }
        };

        // The feed stays alive until the platform reports Stopped
        if let Some(token) = stopping {
            info!("Device watcher stopping ({:?})", token);
            if let Some(feed) = self.feed.as_mut() {
                if let Err(e) = feed.stop() {
                    warn!("Device watcher did not stop cleanly: {}", e);
                }
            }
        }
    }

    /// Mark a Known device as the selected one (manual selection)
    pub fn select(&self, id: &str) -> Option<DeviceIdentity> {
        let mut state = lock_discovery(&self.shared);
        let device = match state.registry.find(id) {
            Some((device, Partition::Known)) => device.clone(),
            _ => return None,
        };
        state.selected = Some(device.clone());
        Some(device)
    }

    pub fn handle_event(&mut self, event: WatcherEvent) -> WatcherOutcome {
        let mut stopped_while_running = false;
        let outcome = {
            let mut state = lock_discovery(&self.shared);
            match (state.status, event.kind) {
                (
                    WatcherStatus::Running(active) | WatcherStatus::Stopping(active),
                    DeviceEventKind::Stopped,
                ) if active == event.source => {
                    stopped_while_running = matches!(state.status, WatcherStatus::Running(_));
                    state.status = WatcherStatus::NotRunning;
                    WatcherOutcome::Stopped
                }
                (WatcherStatus::Running(active), kind) if active == event.source => {
                    apply_event(&mut state, kind, self.predicate.as_ref())
                }
                (_, kind) => {
                    trace!("Discarding stale {:?} from {:?}", kind, event.source);
                    WatcherOutcome::Discarded
                }
            }
        };

        match &outcome {
            WatcherOutcome::TargetMatched(device) => {
                info!("Target device found: {} ({})", device.name, device.id);
                self.stop();
            }
            WatcherOutcome::Stopped => {
                info!("Device watcher stopped");
                if let Some(mut feed) = self.feed.take() {
                    // Platform ended the scan on its own; detach our listeners too
                    if stopped_while_running {
                        let _ = feed.stop();
                    }
                }
            }
            _ => {}
        }

        outcome
    }
}

fn apply_event(
    state: &mut DiscoveryState,
    kind: DeviceEventKind,
    predicate: Option<&MatchPredicate>,
) -> WatcherOutcome {
    match kind {
        DeviceEventKind::Added(device) => {
            let change = state.registry.on_added(device.clone());
            debug!("Added {} -> {:?}", device.id, change);

            // Only a fresh insert into Known counts; a duplicate add is ignored
            // even when it carries a name the registry never stored
            let is_target = !state.matched
                && change == RegistryChange::Inserted(Partition::Known)
                && predicate.is_some_and(|matches| matches(&device));
            if is_target {
                state.matched = true;
                state.selected = Some(device.clone());
                return WatcherOutcome::TargetMatched(device);
            }
            WatcherOutcome::Applied {
                list_changed: change != RegistryChange::Ignored,
            }
        }
        DeviceEventKind::Updated(update) => {
            let change = state.registry.on_updated(&update);
            trace!("Updated {} -> {:?}", update.id, change);
            WatcherOutcome::Applied {
                list_changed: change != RegistryChange::Ignored,
            }
        }
        DeviceEventKind::Removed(id) => {
            let change = state.registry.on_removed(&id);
            debug!("Removed {} -> {:?}", id, change);
            WatcherOutcome::Applied {
                list_changed: change != RegistryChange::Ignored,
            }
        }
        DeviceEventKind::EnumerationCompleted => {
            info!(
                "Device enumeration completed, {} devices found",
                state.registry.len()
            );
            WatcherOutcome::EnumerationCompleted
        }
        // Stopped from the active run is handled by the caller
        DeviceEventKind::Stopped => WatcherOutcome::Discarded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceUpdate;
    use crate::infrastructure::bluetooth::fake::{FakeBleStack, FakeConnect};
    use crate::infrastructure::bluetooth::protocol;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    const TARGET_ID: &str = "BluetoothLE#BluetoothLE00:1a:7d:da:71:13-f0:5e:cd:48:9c:21";

    fn watcher() -> (DiscoveryWatcher, Arc<FakeBleStack>) {
        let stack = FakeBleStack::new(FakeConnect::NoHandle);
        let (tx, _rx) = mpsc::unbounded_channel();
        (DiscoveryWatcher::new(stack.clone(), tx), stack)
    }

    fn target_predicate() -> MatchPredicate {
        Arc::new(protocol::is_target_device)
    }

    fn event(source: WatcherToken, kind: DeviceEventKind) -> WatcherEvent {
        WatcherEvent { source, kind }
    }

    fn added(id: &str, name: &str) -> DeviceEventKind {
        DeviceEventKind::Added(DeviceIdentity::new(id, name))
    }

    #[test]
    fn start_twice_is_rejected_without_state_change() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();
        watcher.handle_event(event(token, added("a", "Pad")));

        assert_eq!(watcher.start(None), Err(WatcherError::AlreadyRunning));
        assert_eq!(watcher.status(), WatcherStatus::Running(token));
        assert_eq!(lock_discovery(&watcher.shared()).registry.len(), 1);
        assert_eq!(stack.feeds.lock().unwrap().len(), 1);
    }

    #[test]
    fn events_from_active_run_update_registry() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();

        assert_eq!(
            watcher.handle_event(event(token, added("a", ""))),
            WatcherOutcome::Applied { list_changed: true }
        );
        watcher.handle_event(event(
            token,
            DeviceEventKind::Updated(DeviceUpdate::new("a").with_name("Pad")),
        ));

        let shared = watcher.shared();
        let state = lock_discovery(&shared);
        assert_eq!(
            state.registry.find("a").map(|(d, p)| (d.name.clone(), p)),
            Some(("Pad".to_string(), Partition::Known))
        );
    }

    #[test]
    fn late_event_after_stop_is_discarded() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();
        watcher.handle_event(event(token, added("a", "Pad")));

        watcher.stop();
        assert_eq!(stack.feed_stops.load(Ordering::SeqCst), 1);

        assert_eq!(
            watcher.handle_event(event(token, added("b", "Late"))),
            WatcherOutcome::Discarded
        );
        assert_eq!(
            watcher.handle_event(event(token, DeviceEventKind::Removed("a".into()))),
            WatcherOutcome::Discarded
        );
        let shared = watcher.shared();
        let state = lock_discovery(&shared);
        assert_eq!(state.registry.len(), 1);
        assert!(state.registry.find("b").is_none());
    }

    #[test]
    fn stop_is_idempotent_and_completes_on_stopped_event() {
        let (mut watcher, stack) = watcher();
        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::NotRunning);

        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();
        watcher.stop();
        watcher.stop();
        assert_eq!(stack.feed_stops.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.status(), WatcherStatus::Stopping(token));

        assert_eq!(
            watcher.handle_event(event(token, DeviceEventKind::Stopped)),
            WatcherOutcome::Stopped
        );
        assert_eq!(watcher.status(), WatcherStatus::NotRunning);
    }

    #[test]
    fn events_from_previous_run_do_not_leak_into_new_run() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let first = stack.last_token().unwrap();
        watcher.handle_event(event(first, added("old", "Old")));
        watcher.stop();

        watcher.start(None).unwrap();
        let second = stack.last_token().unwrap();
        assert_ne!(first, second);
        assert!(lock_discovery(&watcher.shared()).registry.is_empty());

        assert_eq!(
            watcher.handle_event(event(first, added("stale", "Stale"))),
            WatcherOutcome::Discarded
        );
        assert_eq!(
            watcher.handle_event(event(first, DeviceEventKind::Stopped)),
            WatcherOutcome::Discarded
        );
        assert_eq!(watcher.status(), WatcherStatus::Running(second));
    }

    #[test]
    fn named_target_triggers_single_match_and_stops_watcher() {
        let (mut watcher, stack) = watcher();
        watcher.start(Some(target_predicate())).unwrap();
        let token = stack.last_token().unwrap();

        let outcome = watcher.handle_event(event(token, added(TARGET_ID, "Hotkey")));
        assert!(matches!(outcome, WatcherOutcome::TargetMatched(ref d) if d.id == TARGET_ID));
        assert_eq!(watcher.status(), WatcherStatus::Stopping(token));
        assert_eq!(stack.feed_stops.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.selected().map(|d| d.id), Some(TARGET_ID.to_string()));

        // In-flight duplicate after the stop must not re-trigger
        assert_eq!(
            watcher.handle_event(event(token, added(TARGET_ID, "Hotkey"))),
            WatcherOutcome::Discarded
        );
    }

    #[test]
    fn unnamed_target_is_not_matched() {
        let (mut watcher, stack) = watcher();
        watcher.start(Some(target_predicate())).unwrap();
        let token = stack.last_token().unwrap();

        assert_eq!(
            watcher.handle_event(event(token, added(TARGET_ID, ""))),
            WatcherOutcome::Applied { list_changed: true }
        );
        assert!(matches!(watcher.status(), WatcherStatus::Running(_)));
        assert!(watcher.selected().is_none());
    }

    #[test]
    fn named_duplicate_of_unnamed_target_does_not_match() {
        let (mut watcher, stack) = watcher();
        watcher.start(Some(target_predicate())).unwrap();
        let token = stack.last_token().unwrap();

        watcher.handle_event(event(token, added(TARGET_ID, "")));
        assert_eq!(
            watcher.handle_event(event(token, added(TARGET_ID, "Hotkey"))),
            WatcherOutcome::Applied {
                list_changed: false
            }
        );

        assert!(matches!(watcher.status(), WatcherStatus::Running(_)));
        assert!(watcher.selected().is_none());
        assert_eq!(stack.feed_stops.load(Ordering::SeqCst), 0);
        let shared = watcher.shared();
        let state = lock_discovery(&shared);
        assert_eq!(
            state.registry.find(TARGET_ID).map(|(d, p)| (d.name.clone(), p)),
            Some((String::new(), Partition::Unknown))
        );
    }

    #[test]
    fn platform_stop_returns_watcher_to_not_running() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();

        assert_eq!(
            watcher.handle_event(event(token, DeviceEventKind::EnumerationCompleted)),
            WatcherOutcome::EnumerationCompleted
        );
        assert_eq!(
            watcher.handle_event(event(token, DeviceEventKind::Stopped)),
            WatcherOutcome::Stopped
        );
        assert_eq!(watcher.status(), WatcherStatus::NotRunning);
        assert_eq!(stack.feed_stops.load(Ordering::SeqCst), 1);

        watcher.start(None).unwrap();
    }

    #[test]
    fn select_requires_registered_device() {
        let (mut watcher, stack) = watcher();
        watcher.start(None).unwrap();
        let token = stack.last_token().unwrap();
        watcher.handle_event(event(token, added("a", "Pad")));

        watcher.handle_event(event(token, added("b", "")));

        assert!(watcher.select("missing").is_none());
        assert!(watcher.select("b").is_none());
        assert_eq!(watcher.select("a").map(|d| d.name), Some("Pad".to_string()));
        assert_eq!(watcher.selected().map(|d| d.id), Some("a".to_string()));
    }
}
