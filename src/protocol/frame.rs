use super::{data_mode, send_codes, ControllerMode, FreeFormEffect, SYNC_HEADER};
use crate::color::ColorData;

/// A host→device command, borrowed from the caller's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand<'a> {
    Ping,
    Hello,
    /// One intensity byte per spectrum line
    DataStart(&'a [u8]),
    DataHsv {
        effect: FreeFormEffect,
        colors: &'a ColorData,
    },
    SetMode(ControllerMode),
    Cancel,
}

/// Build the complete frame for a command.
///
/// Length checks against the negotiated device info happen before this is
/// called; encoding itself never fails.
pub fn encode(command: &HostCommand<'_>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + payload_len(command));

    // Header
    frame.extend_from_slice(&SYNC_HEADER);

    match command {
        HostCommand::Ping => frame.push(send_codes::PING),
        HostCommand::Hello => frame.push(send_codes::HELLO),
        HostCommand::Cancel => frame.push(send_codes::CANCEL),
        HostCommand::SetMode(mode) => {
            frame.push(send_codes::SET_MODE);
            frame.push(mode.to_byte());
        }
        HostCommand::DataStart(levels) => {
            frame.push(send_codes::DATA_START);
            frame.extend_from_slice(levels);
        }
        HostCommand::DataHsv { effect, colors } => {
            frame.push(send_codes::DATA_HSV);
            frame.push(effect.sub_opcode());

            // Timing fields
            match *effect {
                FreeFormEffect::Static => {}
                FreeFormEffect::FadeIn { ms } | FreeFormEffect::FadeOut { ms } => {
                    frame.extend_from_slice(&ms.to_le_bytes());
                }
                FreeFormEffect::FadeInOut { ms_in, ms_out } => {
                    frame.extend_from_slice(&ms_in.to_le_bytes());
                    frame.extend_from_slice(&ms_out.to_le_bytes());
                }
            }

            frame.push(match colors {
                ColorData::Uniform(_) => data_mode::UNIFORM,
                ColorData::Unique(_) => data_mode::UNIQUE,
            });
            frame.extend_from_slice(&colors.to_bytes());
        }
    }

    frame
}

fn payload_len(command: &HostCommand<'_>) -> usize {
    match command {
        HostCommand::Ping | HostCommand::Hello | HostCommand::Cancel => 0,
        HostCommand::SetMode(_) => 1,
        HostCommand::DataStart(levels) => levels.len(),
        HostCommand::DataHsv { colors, .. } => 6 + colors.len() * 3,
    }
}
