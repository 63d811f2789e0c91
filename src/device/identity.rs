//! One-time identity handshake run before polling starts.

use crate::serial::protocol::{
    self, Fields, NumericMode, CMD_GET_BANDWIDTH, CMD_GET_BODY_STYLE, CMD_GET_DESIGN_WAVELENGTH,
    CMD_GET_INFO, CMD_GET_MODEL_NAME, CMD_GET_RUNTIME, CMD_GET_SERIAL_NUMBER, MIN_INFO_TELEGRAM_LEN,
};
use crate::serial::{Result, SerialError, SerialInterface};

use super::models::{BootInfo, DeviceIdentity, DeviceStatus};

/// Everything learned while identifying the device.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub identity: DeviceIdentity,
    /// Numeric encoding for every later exchange.
    pub mode: NumericMode,
    /// First status snapshot, decoded from the handshake's `GI` reply.
    pub status: DeviceStatus,
}

/// Identify the device.
///
/// The `GI` reply seeds both the firmware version and the first status
/// snapshot. The identity commands follow in a fixed order and any failure
/// aborts the whole handshake. `GY` is only tried when `query_boot_info` is
/// set, and its failure is ignored.
pub async fn perform_handshake(
    interface: &mut SerialInterface,
    query_boot_info: bool,
) -> Result<Handshake> {
    let info = interface.send_command(CMD_GET_INFO).await?;
    if info.len() < MIN_INFO_TELEGRAM_LEN {
        return Err(SerialError::MalformedTelegram(format!(
            "info telegram has {} characters, expected at least {}",
            info.len(),
            MIN_INFO_TELEGRAM_LEN
        )));
    }

    let firmware_version = Fields::new(&info, NumericMode::Hex)
        .require("firmware tag")?
        .to_string();
    let old_firmware = protocol::is_old_firmware(&firmware_version);
    let mode = NumericMode::for_firmware(&firmware_version);
    log::debug!("Firmware {} uses {:?} fields", firmware_version, mode);

    let mut status = protocol::parse_status(&info, mode)?;

    let serial_number = interface.send_command(CMD_GET_SERIAL_NUMBER).await?;
    let body_style =
        mode.parse_unsigned_prefix(&interface.send_command(CMD_GET_BODY_STYLE).await?)?;
    let design_wavelength = {
        let reply = interface.send_command(CMD_GET_DESIGN_WAVELENGTH).await?;
        let raw = mode.parse_unsigned_prefix(&reply)?;
        format!("{:.1}", raw as f32 * 0.1)
    };
    let model_name = interface.send_command(CMD_GET_MODEL_NAME).await?;
    let bandwidth = interface.send_command(CMD_GET_BANDWIDTH).await?;

    if query_boot_info {
        match read_boot_info(interface, mode).await {
            Ok(boot_info) => status.boot_info = Some(boot_info),
            Err(e) => log::debug!("Boot info unavailable: {}", e),
        }
    }

    let identity = DeviceIdentity {
        serial_number,
        firmware_version,
        model_name,
        bandwidth,
        design_wavelength,
        body_style,
        old_firmware,
    };

    log::info!(
        "Identified {} (serial {}, firmware {}, design wavelength {}, bandwidth {})",
        identity.model_name,
        identity.serial_number,
        identity.firmware_version,
        identity.design_wavelength,
        identity.bandwidth
    );

    Ok(Handshake {
        identity,
        mode,
        status,
    })
}

/// Query boot count and run minutes. Known to time out on real hardware.
pub async fn read_boot_info(interface: &mut SerialInterface, mode: NumericMode) -> Result<BootInfo> {
    let reply = interface.send_command(CMD_GET_RUNTIME).await?;
    protocol::parse_boot_info(&reply, mode)
}
