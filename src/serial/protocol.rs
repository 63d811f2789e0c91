use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Result, SerialError};

// Wire commands. Replies are single space-separated lines.
pub const CMD_GET_INFO: &str = "GI\n"; // Status telegram, also carries the firmware tag
pub const CMD_GET_SERIAL_NUMBER: &str = "GS\n";
pub const CMD_GET_RUNTIME: &str = "GY\n"; // Boot count and run minutes
pub const CMD_GET_BODY_STYLE: &str = "GA\n";
pub const CMD_GET_BANDWIDTH: &str = "GB\n";
pub const CMD_GET_MODEL_NAME: &str = "GN\n";
pub const CMD_GET_DESIGN_WAVELENGTH: &str = "GX\n";

/// Shortest acceptable `GI` reply during the handshake.
pub const MIN_INFO_TELEGRAM_LEN: usize = 74;

/// More separators than this means the telegram carries a second heater.
pub const DUAL_HEATER_SEPARATORS: usize = 11;

/// Firmware below this version reports numbers in decimal, newer in hex.
pub const OLD_FIRMWARE_LIMIT: f64 = 1.26;

/// Wing-shift limit reachable by stepping, in wavelength units.
pub const WING_SHIFT_LIMIT: f32 = 1.0;

/// Numeric encoding of every field, fixed by the firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericMode {
    Decimal,
    Hex,
}

impl NumericMode {
    /// Select the encoding from a firmware tag such as `v2.00`.
    pub fn for_firmware(tag: &str) -> Self {
        if is_old_firmware(tag) {
            NumericMode::Decimal
        } else {
            NumericMode::Hex
        }
    }

    pub fn parse_unsigned(self, field: &str) -> Result<u32> {
        let field = field.trim();
        let parsed = match self {
            NumericMode::Decimal => field.parse::<u32>().ok(),
            NumericMode::Hex => u32::from_str_radix(strip_hex_prefix(field), 16).ok(),
        };
        parsed.ok_or_else(|| self.invalid(field))
    }

    /// Signed fields are plain decimal on old firmware. In hex mode only the
    /// low byte is significant and is read as an 8-bit two's-complement value.
    pub fn parse_signed(self, field: &str) -> Result<i32> {
        let field = field.trim();
        match self {
            NumericMode::Decimal => field.parse::<i32>().map_err(|_| self.invalid(field)),
            NumericMode::Hex => {
                let raw = u32::from_str_radix(strip_hex_prefix(field), 16)
                    .map_err(|_| self.invalid(field))?;
                Ok(i32::from(raw as u8 as i8))
            }
        }
    }

    /// Read the leading run of digits in this mode. Whatever follows them is
    /// ignored; a field without leading digits is malformed.
    pub fn parse_unsigned_prefix(self, field: &str) -> Result<u32> {
        let field = field.trim();
        let (digits, radix) = match self {
            NumericMode::Decimal => (field, 10),
            NumericMode::Hex => (strip_hex_prefix(field), 16),
        };
        let end = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        u32::from_str_radix(&digits[..end], radix).map_err(|_| self.invalid(field))
    }

    fn invalid(self, field: &str) -> SerialError {
        SerialError::MalformedTelegram(format!("{:?} is not a {:?} number", field, self))
    }
}

fn strip_hex_prefix(field: &str) -> &str {
    field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field)
}

/// Numeric part of a firmware tag: the first character is skipped and the
/// longest `digits[.digits]` prefix parsed. Unreadable tags yield 0.0.
pub fn firmware_number(tag: &str) -> f64 {
    let mut chars = tag.trim().chars();
    chars.next();
    let rest = chars.as_str();

    let mut seen_dot = false;
    let end = rest
        .char_indices()
        .find(|&(_, c)| {
            if c == '.' && !seen_dot {
                seen_dot = true;
                false
            } else {
                !c.is_ascii_digit()
            }
        })
        .map(|(i, _)| i)
        .unwrap_or(rest.len());

    rest[..end].parse().unwrap_or(0.0)
}

pub fn is_old_firmware(tag: &str) -> bool {
    firmware_number(tag) < OLD_FIRMWARE_LIMIT
}

/// Ordered walk over the space-separated fields of one telegram.
pub struct Fields<'a> {
    tokens: std::str::Split<'a, char>,
    mode: NumericMode,
    position: usize,
}

impl<'a> Fields<'a> {
    pub fn new(telegram: &'a str, mode: NumericMode) -> Self {
        Self {
            tokens: telegram.trim().split(' '),
            mode,
            position: 0,
        }
    }

    pub fn require(&mut self, name: &str) -> Result<&'a str> {
        let position = self.position + 1;
        self.next().ok_or_else(|| {
            SerialError::MalformedTelegram(format!("missing {} (field {})", name, position))
        })
    }

    pub fn unsigned(&mut self, name: &str) -> Result<u32> {
        let field = self.require(name)?;
        self.mode.parse_unsigned(field).map_err(|e| with_field(name, e))
    }

    pub fn signed(&mut self, name: &str) -> Result<i32> {
        let field = self.require(name)?;
        self.mode.parse_signed(field).map_err(|e| with_field(name, e))
    }

    /// Fields consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        // Consecutive separators collapse, like the firmware's own tokenizer
        let field = self.tokens.find(|token| !token.is_empty())?;
        self.position += 1;
        Some(field)
    }
}

fn with_field(name: &str, error: SerialError) -> SerialError {
    match error {
        SerialError::MalformedTelegram(detail) => {
            SerialError::MalformedTelegram(format!("{}: {}", name, detail))
        }
        other => other,
    }
}

/// One heater's drive level and temperature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterReading {
    /// Duty cycle as a percentage of `duty_limit`.
    pub duty_percent: f32,
    /// Device-reported duty ceiling (raw units).
    pub duty_limit: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub boot_count: u32,
    pub run_minutes: u32,
}

/// Snapshot of one `GI` telegram. Replaced wholesale every poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub error_code: u32,
    pub on_band: bool,
    /// Center wavelength in wavelength units (0.1 resolution).
    pub center_wavelength: f32,
    /// Signed trim of the center wavelength (0.1 resolution).
    pub wing_shift: f32,
    pub heater1: HeaterReading,
    /// Set when the telegram carried dual-heater fields; `heater2` is
    /// present exactly when this is true.
    pub dual_heaters: bool,
    pub heater2: Option<HeaterReading>,
    pub input_voltage: f32,
    pub calibration_pot_position: u32,
    pub boot_info: Option<BootInfo>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Count the space separators of a telegram (the dual-heater cue).
pub fn separator_count(telegram: &str) -> usize {
    telegram.trim().bytes().filter(|&b| b == b' ').count()
}

fn duty_percent(raw: u32, limit: u32) -> f32 {
    if limit == 0 {
        return 0.0;
    }
    (raw as f32 * 100.0) / limit as f32
}

/// Decode a `GI` telegram.
///
/// Field order: firmware tag, error code, on-band, wavelength, wing-shift,
/// heater 1 duty, heater 1 duty limit, heater 1 temperature, [heater 2
/// temperature], input voltage, calibration pot, [heater 2 duty, heater 2
/// duty limit]. Bracketed fields appear only in dual-heater telegrams.
/// Trailing fields past these are ignored.
///
/// example: v2.00 00 01 0001005C 00 0026 039D 0000289F 00000488 00000000 00002EE0 00ED
pub fn parse_status(telegram: &str, mode: NumericMode) -> Result<DeviceStatus> {
    let dual_heaters = separator_count(telegram) > DUAL_HEATER_SEPARATORS;
    let mut fields = Fields::new(telegram, mode);

    fields.require("firmware tag")?;
    let error_code = fields.unsigned("error code")?;
    let on_band = fields.unsigned("on-band indicator")? == 1;
    let center_wavelength = fields.unsigned("wavelength")? as f32 * 0.1;
    let wing_shift = fields.signed("wing-shift")? as f32 * 0.1;

    let heater1_duty = fields.unsigned("heater 1 duty")?;
    let heater1_limit = fields.unsigned("heater 1 duty limit")?;
    let heater1 = HeaterReading {
        duty_percent: duty_percent(heater1_duty, heater1_limit),
        duty_limit: heater1_limit,
        temperature: fields.unsigned("heater 1 temperature")? as f32 * 0.01,
    };

    let heater2_temperature = if dual_heaters {
        Some(fields.unsigned("heater 2 temperature")? as f32 * 0.01)
    } else {
        None
    };

    let input_voltage = fields.unsigned("input voltage")? as f32 * 0.01;
    let calibration_pot_position = fields.unsigned("calibration pot position")?;

    let heater2 = match heater2_temperature {
        Some(temperature) => {
            let duty = fields.unsigned("heater 2 duty")?;
            let limit = fields.unsigned("heater 2 duty limit")?;
            Some(HeaterReading {
                duty_percent: duty_percent(duty, limit),
                duty_limit: limit,
                temperature,
            })
        }
        None => None,
    };

    Ok(DeviceStatus {
        error_code,
        on_band,
        center_wavelength,
        wing_shift,
        heater1,
        dual_heaters,
        heater2,
        input_voltage,
        calibration_pot_position,
        boot_info: None,
        updated_at: Some(Utc::now()),
    })
}

/// Decode a `GY` reply: boot count and run minutes.
pub fn parse_boot_info(reply: &str, mode: NumericMode) -> Result<BootInfo> {
    let mut fields = Fields::new(reply, mode);
    Ok(BootInfo {
        boot_count: fields.unsigned("boot count")?,
        run_minutes: fields.unsigned("run minutes")?,
    })
}

/// Append the line terminator if the caller left it off.
pub fn terminate(command: &str) -> String {
    if command.ends_with('\n') {
        command.to_string()
    } else {
        format!("{}\n", command)
    }
}

/// `SE` command setting the wing-shift in tenths.
pub fn set_wing_shift(tenths: i32) -> String {
    format!("SE{}\n", tenths)
}

/// Next `SE` command one tenth up or down from `current`, or `None` when
/// `current` already sits at the limit in that direction.
pub fn step_wing_shift(current: f32, up: bool) -> Option<String> {
    if (up && current >= WING_SHIFT_LIMIT) || (!up && current <= -WING_SHIFT_LIMIT) {
        return None;
    }
    let tenths = (current * 10.0).round() as i32;
    let next = if up { tenths + 1 } else { tenths - 1 };
    Some(set_wing_shift(next))
}
