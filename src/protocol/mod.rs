//! Wire protocol spoken with the LED controller firmware.
//!
//! Host→device frames are `[0xF0, 0xAA] + opcode + payload`. Device→host
//! messages are a bare opcode byte followed by its fixed payload. Neither
//! direction carries a length field or a checksum, so both sides must know
//! each opcode's payload layout statically.

mod frame;
mod inbound;

use serde::{Deserialize, Serialize};

pub use frame::{encode, HostCommand};
pub use inbound::{read_message, InboundMessage};

/// Sync header prefixed to every host→device frame
pub const SYNC_HEADER: [u8; 2] = [0xF0, 0xAA];

/// Host→device opcodes
pub mod send_codes {
    pub const PING: u8 = 0x01;
    pub const HELLO: u8 = 0x02;
    pub const DATA_START: u8 = 0x03;
    pub const DATA_HSV: u8 = 0x05;
    pub const SET_MODE: u8 = 0x06;
    pub const CANCEL: u8 = 0x07;
}

/// Device→host opcodes
pub mod receive_codes {
    pub const PONG: u8 = 0x01;
    pub const HELLO: u8 = 0x02;
    pub const DATA_READY: u8 = 0x03;
    pub const CUR_MODE: u8 = 0x04;
    pub const IDLE: u8 = 0x05;
}

/// Operating mode reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    #[default]
    Unknown,
    FreeForm,
    MusicSync,
}

impl ControllerMode {
    pub fn to_byte(self) -> u8 {
        match self {
            ControllerMode::Unknown => 0xFF,
            ControllerMode::FreeForm => 0x00,
            ControllerMode::MusicSync => 0x01,
        }
    }

    /// Any byte the firmware does not define maps to `Unknown`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ControllerMode::FreeForm,
            0x01 => ControllerMode::MusicSync,
            _ => ControllerMode::Unknown,
        }
    }
}

/// Capabilities announced by the device in its HELLO reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub total_leds: u16,
    pub spectrum_lines: u16,
}

impl DeviceInfo {
    /// Decode the 4-byte HELLO payload (two little-endian u16)
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        DeviceInfo {
            total_leds: u16::from_le_bytes([bytes[0], bytes[1]]),
            spectrum_lines: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Free-form animation kind, with its timing fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeFormEffect {
    Static,
    FadeIn { ms: u16 },
    FadeOut { ms: u16 },
    FadeInOut { ms_in: u16, ms_out: u16 },
}

impl FreeFormEffect {
    pub fn sub_opcode(&self) -> u8 {
        match self {
            FreeFormEffect::Static => 0x00,
            FreeFormEffect::FadeIn { .. } => 0x01,
            FreeFormEffect::FadeOut { .. } => 0x02,
            FreeFormEffect::FadeInOut { .. } => 0x03,
        }
    }
}

/// Data mode byte values following the free-form timing fields
pub mod data_mode {
    pub const UNIFORM: u8 = 0x00;
    pub const UNIQUE: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bytes() {
        assert_eq!(ControllerMode::FreeForm.to_byte(), 0x00);
        assert_eq!(ControllerMode::MusicSync.to_byte(), 0x01);
        assert_eq!(ControllerMode::Unknown.to_byte(), 0xFF);
        assert_eq!(ControllerMode::from_byte(0x01), ControllerMode::MusicSync);
        assert_eq!(ControllerMode::from_byte(0x42), ControllerMode::Unknown);
    }

    #[test]
    fn test_device_info_little_endian() {
        let info = DeviceInfo::from_bytes([60, 0, 16, 0]);
        assert_eq!(info, DeviceInfo { total_leds: 60, spectrum_lines: 16 });

        let info = DeviceInfo::from_bytes([0x2C, 0x01, 0x00, 0x01]);
        assert_eq!(info.total_leds, 300);
        assert_eq!(info.spectrum_lines, 256);
    }

    #[test]
    fn test_mode_from_config_string() {
        let mode: ControllerMode = serde_json::from_str("\"music_sync\"").unwrap();
        assert_eq!(mode, ControllerMode::MusicSync);
    }
}
