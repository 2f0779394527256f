use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::EffectProducer;
use crate::controller::Controller;
use crate::error::Result;

/// Floor applied to every shaped band so the strip never goes fully dark
const MIN_LEVEL: f64 = 5.0;

const GAMMA: f64 = 1.3;

/// Reshape raw spectrum levels for display.
///
/// The low bands carry most of the energy in music, so bands from index 1
/// upward are stretched over the output by linear interpolation (three
/// output slots per input band), then passed through a gamma curve with a
/// small floor. Band 0 takes the raw value of band 1.
pub fn shape_spectrum(levels: &[u8]) -> Vec<u8> {
    if levels.len() < 3 {
        return levels.to_vec();
    }

    let mut shaped = vec![0u8; levels.len()];
    shaped[0] = levels[1];

    let mut band = 1;
    for i in 1..levels.len() {
        let low = f64::from(levels[band]);
        let high = f64::from(levels[band + 1]);
        let t = ((i - 1) % 3) as f64 / 3.0;
        let interpolated = (low + (high - low) * t).ceil();

        let curved = (interpolated / 255.0).powf(GAMMA) * 255.0;
        shaped[i] = curved.clamp(MIN_LEVEL, 255.0) as u8;

        if (i + 1) % 3 == 1 {
            band += 1;
        }
    }

    shaped
}

/// Forwards spectrum frames to a device in music sync mode.
///
/// The device asks for each frame with DATA_READY; frames offered in between
/// are skipped so the link is never flooded faster than the strip renders.
pub struct MusicFeed {
    controller: Arc<Controller>,
    active: AtomicBool,
    ready: AtomicBool,
}

impl MusicFeed {
    pub fn new(controller: Arc<Controller>) -> Self {
        MusicFeed {
            controller,
            active: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// The device asked for the next frame
    pub fn on_data_ready(&self) {
        if self.active.load(Ordering::Relaxed) {
            self.ready.store(true, Ordering::Relaxed);
        }
    }

    /// Offer the latest spectrum. Returns whether it was sent.
    pub fn offer(&self, levels: &[u8]) -> Result<bool> {
        if !self.active.load(Ordering::Relaxed) || !self.ready.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let shaped = shape_spectrum(levels);
        match self.controller.send_music_frame(&shaped) {
            Ok(()) => Ok(true),
            Err(e) => {
                // Nothing reached the device, keep the request open
                self.ready.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

impl EffectProducer for MusicFeed {
    fn name(&self) -> &'static str {
        "music feed"
    }

    fn start(&self) -> Result<()> {
        self.active.store(true, Ordering::Relaxed);
        // The first frame goes out unrequested
        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
    }
}
