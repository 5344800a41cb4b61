#![cfg_attr(not(test), no_std)]

#[cfg(feature = "defmt")]
pub use defmt as log;

#[cfg(not(feature = "defmt"))]
pub use log;

pub mod clock;
pub mod config;
pub mod error;
pub mod peltier;
pub mod program;
pub mod service;
pub mod simulation;
pub mod temperature_pid;

pub use clock::{Clock, EmbassyClock};
pub use config::ControllerConfig;
pub use error::DriveError;
pub use peltier::{PeltierDriver, Polarity};
pub use temperature_pid::{Gains, TargetLimits, TemperaturePidController};

pub static VERSION: &str = "v0.1";

/// Lowest target temperature accepted by [`TargetLimits::default`], in °C.
pub const MIN_TEMP: f32 = 0.0;
/// Highest target temperature accepted by [`TargetLimits::default`], in °C.
pub const MAX_TEMP: f32 = 100.0;
pub const DEFAULT_TARGET_TEMP: f32 = 25.0;

/// Magnitude bound of the signed controller output, equal to full PWM duty.
pub const OUTPUT_LIMIT: f32 = 255.0;
pub const CONTROL_TICK_MILLIS: u32 = 100;
