use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::SerialConfig;

/// Read timeout on the serial port; the codec treats an expiry as silence
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Both halves of a duplex byte stream
pub struct Transport {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Open the serial link to the controller (8N1, no flow control)
pub fn open_serial(config: &SerialConfig) -> Result<Transport> {
    let mut port = serialport::new(&config.port, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
        .context(format!("Failed to open serial port {}", config.port))?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        log::warn!("Failed to set DTR on {}: {}", config.port, e);
    }

    // Allow device to initialize
    thread::sleep(Duration::from_millis(100));

    let reader = port
        .try_clone()
        .context(format!("Failed to clone serial port {} for reading", config.port))?;

    log::info!("Opened {} @ {} baud", config.port, config.baud_rate);

    Ok(Transport {
        reader: Box::new(reader),
        writer: Box::new(port),
    })
}
