use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ControllerMode;
use crate::scheduler::DEFAULT_PACING_INTERVAL;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub serial: SerialConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Mode requested right after the handshake completes
    #[serde(default)]
    pub startup_mode: Option<ControllerMode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            pacing_interval_ms: default_pacing_interval_ms(),
        }
    }
}

fn default_pacing_interval_ms() -> u64 {
    DEFAULT_PACING_INTERVAL.as_millis() as u64
}
