use serde::{Deserialize, Serialize};

// Re-export serial protocol models
pub use crate::serial::protocol::{BootInfo, DeviceStatus, HeaterReading};

/// Sentinel carried by `DeviceEvent::FatalError` when a status poll fails.
pub const POLL_FAILURE_CODE: i32 = -1;

/// Fixed facts about the instrument, read once during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub firmware_version: String,
    pub model_name: String,
    pub bandwidth: String,
    /// Design wavelength, formatted with one decimal place.
    pub design_wavelength: String,
    pub body_style: u32,
    /// Firmware older than 1.26 reports numbers in decimal instead of hex.
    pub old_firmware: bool,
}

/// Worker lifecycle as seen by the consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PollerState {
    /// Port opening or handshake in progress.
    Idle,
    Polling,
    Stopped,
}

/// Lifecycle notifications published by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceEvent {
    Connected,
    ConnectFailed { reason: String },
    StatusUpdated,
    FatalError { code: i32 },
}

/// Human readable meaning of a device error code.
pub fn describe_error_code(code: u32) -> String {
    let text = match code {
        0 => "No errors",
        1 => "Supply voltage too low (less than 8V)",
        2 => "Ambient temperature too low. Cannot reach setpoint.",
        3 => "Low power (supply voltage below 10V)",
        4 => "High voltage (supply voltage above 30V)",
        5 => "Ambient temperature too hot. Cannot reach setpoint.",
        0x0a => "Thermistor connection open (broken wire). Service required.",
        0x0b => "Thermistor connection shorted. Service required.",
        _ => return format!("Unknown error, code {:x}", code),
    };
    text.to_string()
}

impl DeviceStatus {
    pub fn error_description(&self) -> String {
        describe_error_code(self.error_code)
    }
}
