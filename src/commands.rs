use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use crate::config::ConnectionConfig;
use crate::device::{DeviceEvent, DeviceStatus, QuantumDevice};

/// Monitor a Quantum filter controller over its serial port
#[derive(Parser, Clone, Debug)]
#[command(name = "quantum-link", version)]
pub struct Cli {
    /// Serial port the controller is attached to (e.g. /dev/ttyUSB0 or COM3)
    pub port: String,

    /// JSON connection config
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Wing-shift to set once connected, in tenths
    #[arg(short, long, allow_hyphen_values = true)]
    pub wing_shift: Option<i32>,

    /// Stop after this many status updates
    #[arg(short = 'n', long)]
    pub cycles: Option<u64>,

    /// Print status updates as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Connect, report identity and status updates, then disconnect.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ConnectionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConnectionConfig::default(),
    };

    let mut device = QuantumDevice::new(config);
    let mut events = device.subscribe_events();
    device.connect(&cli.port)?;

    let mut updates = 0u64;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };

        match event {
            Ok(DeviceEvent::Connected) => {
                print_identity(&device);
                if let Some(tenths) = cli.wing_shift {
                    device
                        .set_wing_shift(tenths)
                        .context("Failed to queue wing-shift command")?;
                }
            }
            Ok(DeviceEvent::ConnectFailed { reason }) => {
                bail!("Could not connect to a Quantum on {}: {}", cli.port, reason);
            }
            Ok(DeviceEvent::StatusUpdated) => {
                print_status(&device.status(), cli.json)?;
                updates += 1;
                if cli.cycles.is_some_and(|limit| updates >= limit) {
                    break;
                }
            }
            Ok(DeviceEvent::FatalError { code }) => {
                log::warn!("Status poll failed (code {})", code);
            }
            Err(RecvError::Lagged(missed)) => log::warn!("Missed {} device events", missed),
            Err(RecvError::Closed) => break,
        }
    }

    device.disconnect().await?;
    Ok(())
}

fn print_identity(device: &QuantumDevice) {
    if let Some(identity) = device.identity() {
        println!(
            "{} {}Å  bandwidth {}Å  serial {}  firmware {}",
            identity.model_name,
            identity.design_wavelength,
            identity.bandwidth,
            identity.serial_number,
            identity.firmware_version
        );
    }
}

fn print_status(status: &DeviceStatus, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    let band = if status.on_band { "on band" } else { "not on band" };
    let mut line = format!(
        "{:.1}Å  wing-shift {:+.1}Å  {}  heater {:.1}° ({:.0}%)",
        status.center_wavelength,
        status.wing_shift,
        band,
        status.heater1.temperature,
        status.heater1.duty_percent
    );
    if let Some(heater2) = &status.heater2 {
        line.push_str(&format!(
            "  heater 2 {:.1}° ({:.0}%)",
            heater2.temperature, heater2.duty_percent
        ));
    }
    line.push_str(&format!(
        "  {:.2}V  {}",
        status.input_voltage,
        status.error_description()
    ));
    println!("{}", line);
    Ok(())
}
