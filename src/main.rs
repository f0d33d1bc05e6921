mod domain;
mod infrastructure;
mod presentation;

use crate::domain::models::{AppEvent, BluetoothCommand};
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::bluetooth::platform::BleStack;
use crate::infrastructure::bluetooth::watcher::{lock_discovery, SharedDiscovery};
use crate::infrastructure::bluetooth::{BluetoothService, ServiceOptions};
use crate::infrastructure::input_simulator::{InputReplayer, KeyInjector};
use crate::presentation::commands::{self, ConsoleCommand};
use crate::presentation::console::{render_device_list, ConsolePresenter};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "ble_hotkey",
    about = "Replays hotkeys sent by a BLE keypad as local key presses",
    version
)]
struct Cli {
    /// Only list devices; never connect to the target on sight
    #[arg(long)]
    no_auto_connect: bool,

    /// Pair with the target before connecting to it
    #[arg(long)]
    pair: bool,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Also list devices that have not reported a name
    #[arg(long)]
    show_unknown: bool,
}

/// Command-line flags override the settings file for this run only
fn apply_cli(settings: &mut Settings, cli: &Cli) {
    if cli.no_auto_connect {
        settings.auto_connect = false;
    }
    if cli.pair {
        settings.pair_before_connect = true;
    }
    if cli.show_unknown {
        settings.show_unknown_devices = true;
    }
}

#[cfg(windows)]
fn platform_backend() -> Result<(Arc<dyn BleStack>, Arc<dyn KeyInjector>)> {
    use crate::infrastructure::bluetooth::winrt::WinBleStack;
    use crate::infrastructure::input_simulator::InputSimulator;

    Ok((Arc::new(WinBleStack::new()), Arc::new(InputSimulator::new())))
}

#[cfg(not(windows))]
fn platform_backend() -> Result<(Arc<dyn BleStack>, Arc<dyn KeyInjector>)> {
    anyhow::bail!("No Bluetooth LE stack is available on this platform")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match SettingsService::new() {
        Ok(service) => {
            // Writes the defaults on first run so the file can be edited
            if let Err(e) = service.save() {
                eprintln!("Failed to save settings: {}", e);
            }
            service.get().clone()
        }
        Err(e) => {
            eprintln!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    };
    apply_cli(&mut settings, &cli);

    let _logging_guard =
        infrastructure::logging::init_logger(&settings.log_settings, cli.log_level.as_deref())
            .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
            .ok();

    info!("Starting BLE hotkey receiver");

    let (stack, injector) = platform_backend()?;
    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (command_tx, command_rx) = mpsc::unbounded_channel::<BluetoothCommand>();

    let service = BluetoothService::new(
        stack,
        InputReplayer::new(injector),
        event_tx,
        ServiceOptions {
            auto_connect: settings.auto_connect,
            pair_before_connect: settings.pair_before_connect,
        },
    );
    let discovery = service.discovery();

    let bluetooth = std::thread::Builder::new()
        .name("bluetooth".into())
        .spawn(move || -> Result<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime for Bluetooth")?;
            rt.block_on(service.run(command_rx))
        })
        .context("Failed to spawn the Bluetooth thread")?;

    let input_discovery = discovery.clone();
    let input_events = command_tx.clone();
    std::thread::Builder::new()
        .name("console-input".into())
        .spawn(move || read_console(input_discovery, input_events))
        .context("Failed to spawn the console reader")?;

    println!("{}", commands::HELP);
    ConsolePresenter::new(discovery, settings.show_unknown_devices).run(event_rx);

    // Presenter returns once the Bluetooth thread has dropped its sender
    drop(command_tx);
    match bluetooth.join() {
        Ok(result) => result,
        Err(_) => {
            error!("Bluetooth thread panicked");
            anyhow::bail!("Bluetooth thread panicked")
        }
    }
}

/// Forward console lines as Bluetooth commands until stdin closes or `quit`
fn read_console(discovery: SharedDiscovery, commands_tx: mpsc::UnboundedSender<BluetoothCommand>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match commands::parse_command(&line, &discovery) {
            Ok(ConsoleCommand::Bluetooth(command)) => {
                let quit = command == BluetoothCommand::Shutdown;
                if commands_tx.send(command).is_err() || quit {
                    return;
                }
            }
            Ok(ConsoleCommand::List) => {
                let lines = render_device_list(&lock_discovery(&discovery).registry, true);
                for line in lines {
                    println!("{}", line);
                }
            }
            Ok(ConsoleCommand::Help) => println!("{}", commands::HELP),
            Err(message) if message.is_empty() => {}
            Err(message) => println!("{}", message),
        }
    }
    // stdin closed: treat like quit
    let _ = commands_tx.send(BluetoothCommand::Shutdown);
}
