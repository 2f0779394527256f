//! Pre-transmission guard against the firmware's interrupt blind spot.
//!
//! While the firmware shifts data out to a WS2812-style strip it needs ~30 µs
//! per LED with interrupts disabled, and any serial bytes arriving in that time
//! are dropped. Before a command is sent to a device that may be mid-shift,
//! CANCEL frames are repeated for longer than the blind spot so at least one
//! lands while the device is listening and aborts the running animation.

use std::io::{self, Write};
use std::time::Duration;

use crate::clock::Clock;
use crate::protocol::{encode, HostCommand};

/// Time the firmware needs per LED while interrupts are off
const LED_SHIFT_MICROS: u64 = 30;

/// Number of CANCEL frames spread over one blind-spot window
const CANCELS_PER_WINDOW: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingGuard {
    window: Duration,
}

impl TimingGuard {
    /// Guard sized for a strip, with 1.5x headroom over the raw shift time
    pub fn for_leds(total_leds: u16) -> Self {
        let micros = u64::from(total_leds) * LED_SHIFT_MICROS * 3 / 2;
        TimingGuard { window: Duration::from_micros(micros) }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Make the link safe for the next command.
    ///
    /// `was_idle` is the device idle flag, already cleared by the caller since
    /// the command about to be sent makes the device busy again. An idle device
    /// needs nothing. Otherwise this spins for the full window, sending a
    /// CANCEL each time another tenth of it has elapsed. Returns the number of
    /// CANCEL frames written.
    pub fn await_device_ready<W: Write + ?Sized>(
        &self,
        was_idle: bool,
        link: &mut W,
        clock: &dyn Clock,
    ) -> io::Result<u32> {
        if was_idle {
            return Ok(0);
        }

        let cancel = encode(&HostCommand::Cancel);
        let step = self.window / CANCELS_PER_WINDOW;
        let start = clock.now();
        let mut sent = 0u32;

        loop {
            let elapsed = clock.now().saturating_sub(start);
            if elapsed >= self.window {
                break;
            }
            if sent < CANCELS_PER_WINDOW && elapsed >= step * sent {
                link.write_all(&cancel)?;
                link.flush()?;
                sent += 1;
            }
            std::hint::spin_loop();
        }

        log::trace!("Guard sent {} CANCEL frames over {:?}", sent, self.window);
        Ok(sent)
    }
}
