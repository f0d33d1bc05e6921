//! Console command parsing
//!
//! Device numbers refer to the Known list as last rendered, so the lookup
//! happens against the same registry snapshot the presenter prints from.

use crate::domain::models::BluetoothCommand;
use crate::domain::registry::Partition;
use crate::infrastructure::bluetooth::watcher::{lock_discovery, SharedDiscovery};

pub const HELP: &str = "\
Commands:
  start           start the device watcher
  stop            stop the device watcher
  list            print the device list
  connect <n>     connect to device number <n> of the Known list
  sub             subscribe to hotkey notifications
  unsub           unsubscribe from hotkey notifications
  pair            pair the selected device
  disconnect      tear down the current session
  help            show this text
  quit            exit";

/// What a console line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Bluetooth(BluetoothCommand),
    List,
    Help,
}

pub fn parse_command(line: &str, discovery: &SharedDiscovery) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let command = match verb.as_str() {
        "start" => BluetoothCommand::StartWatcher,
        "stop" => BluetoothCommand::StopWatcher,
        "sub" | "subscribe" => BluetoothCommand::Subscribe,
        "unsub" | "unsubscribe" => BluetoothCommand::Unsubscribe,
        "pair" => BluetoothCommand::Pair,
        "disconnect" | "reset" => BluetoothCommand::Disconnect,
        "quit" | "exit" => BluetoothCommand::Shutdown,
        "list" | "ls" => return Ok(ConsoleCommand::List),
        "help" | "?" => return Ok(ConsoleCommand::Help),
        "connect" => {
            let arg = words
                .next()
                .ok_or_else(|| "Usage: connect <n>".to_string())?;
            BluetoothCommand::Connect(resolve_device(arg, discovery)?)
        }
        "" => return Err(String::new()),
        other => return Err(format!("Unknown command '{}', type 'help'", other)),
    };
    Ok(ConsoleCommand::Bluetooth(command))
}

/// Accept either a 1-based Known-list number or a full device identity
fn resolve_device(arg: &str, discovery: &SharedDiscovery) -> Result<String, String> {
    let state = lock_discovery(discovery);
    match arg.parse::<usize>() {
        Ok(n) => state
            .registry
            .known()
            .into_iter()
            .nth(n.wrapping_sub(1))
            .map(|device| device.id)
            .ok_or_else(|| format!("No device number {}", n)),
        Err(_) => match state.registry.find(arg) {
            Some((_, Partition::Known)) => Ok(arg.to_string()),
            Some((_, Partition::Unknown)) => Err(format!("Device '{}' has no name yet", arg)),
            None => Err(format!("No device '{}'", arg)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceIdentity;
    use crate::infrastructure::bluetooth::watcher::DiscoveryState;
    use std::sync::{Arc, Mutex};

    fn discovery_with(devices: &[(&str, &str)]) -> SharedDiscovery {
        let mut state = DiscoveryState::default();
        for (id, name) in devices {
            state.registry.on_added(DeviceIdentity::new(*id, *name));
        }
        Arc::new(Mutex::new(state))
    }

    #[test]
    fn simple_verbs_map_to_bluetooth_commands() {
        let discovery = discovery_with(&[]);
        assert_eq!(
            parse_command("start", &discovery),
            Ok(ConsoleCommand::Bluetooth(BluetoothCommand::StartWatcher))
        );
        assert_eq!(
            parse_command("  UNSUB ", &discovery),
            Ok(ConsoleCommand::Bluetooth(BluetoothCommand::Unsubscribe))
        );
        assert_eq!(parse_command("list", &discovery), Ok(ConsoleCommand::List));
        assert!(parse_command("bogus", &discovery).is_err());
    }

    #[test]
    fn connect_resolves_known_list_number() {
        let discovery = discovery_with(&[("id-b", "Beta"), ("id-a", "Alpha"), ("id-x", "")]);
        // Known list is ordered by identity: id-a, id-b
        assert_eq!(
            parse_command("connect 2", &discovery),
            Ok(ConsoleCommand::Bluetooth(BluetoothCommand::Connect(
                "id-b".to_string()
            )))
        );
        assert!(parse_command("connect 3", &discovery).is_err());
        assert!(parse_command("connect 0", &discovery).is_err());
        assert!(parse_command("connect", &discovery).is_err());
    }

    #[test]
    fn connect_accepts_full_identity() {
        let discovery = discovery_with(&[("id-a", "Alpha"), ("id-x", "")]);
        assert_eq!(
            parse_command("connect id-a", &discovery),
            Ok(ConsoleCommand::Bluetooth(BluetoothCommand::Connect(
                "id-a".to_string()
            )))
        );
        assert!(parse_command("connect id-z", &discovery).is_err());
        // Unnamed devices are listed but cannot be picked
        assert_eq!(
            parse_command("connect id-x", &discovery),
            Err("Device 'id-x' has no name yet".to_string())
        );
    }
}
