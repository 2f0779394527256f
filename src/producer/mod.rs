//! Effect producers built on top of the controller and scheduler.

mod game;
mod music;

pub use game::{effect_for, GameEffects, GameEvent, Team};
pub use music::{shape_spectrum, MusicFeed};

use crate::error::Result;

/// A source of device commands that can be switched on and off, typically
/// when the device changes mode.
pub trait EffectProducer: Send + Sync {
    fn name(&self) -> &'static str;

    fn start(&self) -> Result<()>;

    fn stop(&self);
}
