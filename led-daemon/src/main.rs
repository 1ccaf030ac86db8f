//! LED Fleet Daemon
//!
//! Loads the device registry, connects to every configured controller board
//! and keeps group state in step with the hardware until interrupted.
//!
//! Usage: `led-daemon [--list-ports | --init] [SETTINGS_PATH]`

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use led_mux::{LedManager, SharedRegistry};
use led_registry::{JsonFileStore, Registry};
use settings::Settings;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct Args {
    list_ports: bool,
    init: bool,
    settings_path: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        for arg in args {
            match arg.as_str() {
                "--list-ports" => parsed.list_ports = true,
                "--init" => parsed.init = true,
                flag if flag.starts_with("--") => anyhow::bail!("Unknown option {flag}"),
                path => {
                    if parsed.settings_path.is_some() {
                        anyhow::bail!("Only one settings path may be given");
                    }
                    parsed.settings_path = Some(PathBuf::from(path));
                }
            }
        }
        Ok(parsed)
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{} (USB {:04x}:{:04x}{})",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.map(|p| format!(" {p}")).unwrap_or_default()
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

/// Log group transitions as they are broadcast
async fn log_group_events(mut events: broadcast::Receiver<led_mux::GroupStateEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(
                "Group {} is now {} at {}%",
                event.group_id,
                if event.is_on { "on" } else { "off" },
                event.brightness
            ),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Group event log skipped {} events", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.list_ports {
        return list_ports();
    }

    let settings_path = args.settings_path.or_else(Settings::default_path);
    let settings = match &settings_path {
        Some(path) => Settings::load_from(path)?,
        None => Settings::default(),
    };

    if args.init {
        let path = settings_path.context("Could not determine settings path")?;
        settings.save_to(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| settings::DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LED fleet daemon");

    let registry_path = settings.resolved_registry_path(settings_path.as_deref());
    let registry = Registry::load(JsonFileStore::new(&registry_path))
        .with_context(|| format!("Failed to load registry {}", registry_path.display()))?;
    info!(
        "Loaded registry {} ({} controllers, {} groups)",
        registry_path.display(),
        registry.controllers().count(),
        registry.groups().count()
    );

    let registry: SharedRegistry = Arc::new(Mutex::new(registry));
    let manager = LedManager::start(registry, settings.manager.clone()).await;
    let group_log = tokio::spawn(log_group_events(manager.subscribe_group_events()));

    for (controller_id, status) in manager.controller_serial_status().await {
        match status.error {
            Some(error) => warn!("Controller {}: {}", controller_id, error),
            None if status.is_open => info!("Controller {} online", controller_id),
            None => info!("Controller {} not connected", controller_id),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    manager.shutdown().await;
    group_log.abort();
    Ok(())
}
