use core::fmt;

/// H-bridge output failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveError<PinE, PwmE> {
    /// Writing the forward or reverse direction pin failed.
    Direction(PinE),
    /// Writing the PWM duty cycle failed.
    Pwm(PwmE),
}

impl<PinE: fmt::Debug, PwmE: fmt::Debug> fmt::Display for DriveError<PinE, PwmE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::Direction(e) => write!(f, "direction pin error: {:?}", e),
            DriveError::Pwm(e) => write!(f, "PWM error: {:?}", e),
        }
    }
}

/// Configuration document rejected by [`crate::ControllerConfig::from_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ParseError,
    InvalidLimits,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError => write!(f, "Configuration parse error"),
            ConfigError::InvalidLimits => write!(f, "Minimum temperature above maximum"),
        }
    }
}
