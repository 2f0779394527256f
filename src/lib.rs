//! Host controller for a serial-attached LED strip.
//!
//! ```text
//! producer → EffectScheduler (priority + pacing) → Controller → TimingGuard → protocol → serial
//! serial → protocol::read_message → Controller::handle_message → ControllerEvent
//! ```

pub mod clock;
pub mod color;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod producer;
pub mod protocol;
pub mod scheduler;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use color::{ColorData, ColorSample};
pub use config::Config;
pub use controller::{Controller, ControllerEvent, LinkState};
pub use error::ControllerError;
pub use protocol::{ControllerMode, DeviceInfo, FreeFormEffect};
pub use scheduler::{EffectRequest, EffectScheduler, PacingTimer};
