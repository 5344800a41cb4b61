//! Controller configuration, loadable from a JSON document.
//!
//! ```json
//! {
//!     "gains": { "kp": 30.0, "ki": 1.5, "kd": 0.0 },
//!     "limits": { "min": 4.0, "max": 99.0 },
//!     "initial_target": 25.0,
//!     "tick_millis": 100,
//!     "tolerance": 1.5
//! }
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::log::error;
use crate::program::DEFAULT_TOLERANCE;
use crate::temperature_pid::{Gains, TargetLimits};
use crate::{CONTROL_TICK_MILLIS, DEFAULT_TARGET_TEMP};

pub const DEFAULT_GAINS: Gains = Gains::new(30.0, 1.5, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub gains: Gains,
    pub limits: TargetLimits,
    pub initial_target: f32,
    /// Period of the control loop.
    pub tick_millis: u32,
    /// How close to the setpoint a program step counts as reached, in °C.
    pub tolerance: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gains: DEFAULT_GAINS,
            limits: TargetLimits::default(),
            initial_target: DEFAULT_TARGET_TEMP,
            tick_millis: CONTROL_TICK_MILLIS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl ControllerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let (config, _) = serde_json_core::from_str::<Self>(json).map_err(|_| {
            error!("Invalid controller configuration");
            ConfigError::ParseError
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.min > self.limits.max {
            error!(
                "Limits out of order: min {} > max {}",
                self.limits.min, self.limits.max
            );
            return Err(ConfigError::InvalidLimits);
        }
        Ok(())
    }
}
