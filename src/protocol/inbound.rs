use std::io::{ErrorKind, Read};

use super::{receive_codes, ControllerMode, DeviceInfo};

/// A decoded device→host message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMessage {
    Pong,
    Hello(DeviceInfo),
    DataReady,
    CurrentMode(ControllerMode),
    Idle,
    /// Opcode the firmware sent that this host does not know
    Unknown(u8),
}

/// Block until one complete message has been read.
///
/// Returns `Ok(None)` once the transport is closed, including when it closes
/// partway through a payload. Read timeouts are silence, not closure, and are
/// retried.
pub fn read_message<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Option<InboundMessage>> {
    let Some(opcode) = read_byte(reader)? else {
        return Ok(None);
    };

    let message = match opcode {
        receive_codes::PONG => InboundMessage::Pong,
        receive_codes::DATA_READY => InboundMessage::DataReady,
        receive_codes::IDLE => InboundMessage::Idle,
        receive_codes::HELLO => {
            let mut payload = [0u8; 4];
            for slot in payload.iter_mut() {
                match read_byte(reader)? {
                    Some(b) => *slot = b,
                    None => return Ok(None),
                }
            }
            InboundMessage::Hello(DeviceInfo::from_bytes(payload))
        }
        receive_codes::CUR_MODE => match read_byte(reader)? {
            Some(b) => InboundMessage::CurrentMode(ControllerMode::from_byte(b)),
            None => return Ok(None),
        },
        other => InboundMessage::Unknown(other),
    };

    Ok(Some(message))
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<InboundMessage> {
        let mut reader = bytes;
        let mut out = Vec::new();
        while let Some(message) = read_message(&mut reader).unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_decode_stream() {
        let bytes = [0x02, 60, 0, 16, 0, 0x04, 0x00, 0x05, 0x03, 0x01];
        assert_eq!(
            decode_all(&bytes),
            vec![
                InboundMessage::Hello(DeviceInfo { total_leds: 60, spectrum_lines: 16 }),
                InboundMessage::CurrentMode(ControllerMode::FreeForm),
                InboundMessage::Idle,
                InboundMessage::DataReady,
                InboundMessage::Pong,
            ]
        );
    }

    #[test]
    fn test_unknown_opcode_is_surfaced() {
        assert_eq!(decode_all(&[0x7E]), vec![InboundMessage::Unknown(0x7E)]);
    }

    #[test]
    fn test_truncated_payload_is_closure() {
        let mut reader: &[u8] = &[0x02, 60, 0];
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }

    /// Reader that times out before every byte, like an idle serial port
    struct SlowReader {
        data: Vec<u8>,
        pos: usize,
        timed_out: bool,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.timed_out {
                self.timed_out = true;
                return Err(std::io::Error::new(ErrorKind::TimedOut, "idle"));
            }
            self.timed_out = false;
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn test_timeouts_are_retried() {
        let mut reader = SlowReader { data: vec![0x04, 0x01], pos: 0, timed_out: false };
        assert_eq!(
            read_message(&mut reader).unwrap(),
            Some(InboundMessage::CurrentMode(ControllerMode::MusicSync))
        );
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }
}
