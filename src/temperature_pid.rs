//! Closed-loop temperature control of a Peltier element.
//!
//! - Uses `f32` math
//! - PI law: the derivative gain is stored but never applied
//! - Integral time taken from a [`Clock`], wraparound safe
//! - Anti-windup by conditional integration: the integrator is frozen while
//!   the unclamped output saturates in the direction it is pushing
//! - Signed output in `-255..=255`; sign selects heating or cooling
//!
//! Example
//! ```ignore
//! let mut controller = TemperaturePidController::new(
//!     Gains::new(10.0, 0.5, 0.0),
//!     TargetLimits::default(),
//!     25.0,
//!     PeltierDriver::new(forward, reverse, pwm),
//!     EmbassyClock,
//! );
//! controller.setup()?;
//! controller.set_target(94.0);
//! controller.enable();
//! loop {
//!     controller.control(read_temperature())?;
//! }
//! ```

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use serde::Deserialize;

use crate::clock::{elapsed_millis, Clock};
use crate::error::DriveError;
use crate::log::{debug, info, trace, warn};
use crate::peltier::{PeltierDriver, Polarity};
use crate::{MAX_TEMP, MIN_TEMP, OUTPUT_LIMIT};

/// Controller gains.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Gains {
    /// Output units per °C of error.
    pub kp: f32,
    /// Output units per °C of error per second.
    pub ki: f32,
    /// Accepted for interface compatibility, not used by the control law.
    #[serde(default)]
    pub kd: f32,
}

impl Gains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Legal setpoint range, in °C.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TargetLimits {
    pub min: f32,
    pub max: f32,
}

impl TargetLimits {
    /// Limits given in either order are sorted.
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        clamp(value, self.min, self.max)
    }
}

impl Default for TargetLimits {
    fn default() -> Self {
        Self {
            min: MIN_TEMP,
            max: MAX_TEMP,
        }
    }
}

pub struct TemperaturePidController<F, R, P, C> {
    gains: Gains,
    limits: TargetLimits,
    driver: PeltierDriver<F, R, P>,
    clock: C,

    target_value: f32,
    integrated_output: f32,
    last_output: f32,
    control_enabled: bool,
    last_tick_millis: u32,
}

impl<F, R, P, C> TemperaturePidController<F, R, P, C>
where
    F: OutputPin,
    R: OutputPin<Error = F::Error>,
    P: SetDutyCycle,
    C: Clock,
{
    /// Create a disabled controller. No output is written.
    ///
    /// `target_temperature` is clamped to `limits`.
    pub fn new(
        gains: Gains,
        limits: TargetLimits,
        target_temperature: f32,
        driver: PeltierDriver<F, R, P>,
        clock: C,
    ) -> Self {
        let last_tick_millis = clock.now_millis();
        Self {
            gains,
            limits,
            driver,
            clock,
            target_value: limits.clamp(target_temperature),
            integrated_output: 0.0,
            last_output: 0.0,
            control_enabled: false,
            last_tick_millis,
        }
    }

    /// Turn the PWM output off and restart the integral timing.
    ///
    /// Call once before the first [`control`](Self::control).
    pub fn setup(&mut self) -> Result<(), DriveError<F::Error, P::Error>> {
        self.driver.setup()?;
        self.last_tick_millis = self.clock.now_millis();
        Ok(())
    }

    /// Store a new setpoint, clamped to the configured limits.
    pub fn set_target(&mut self, target: f32) {
        let clamped = self.limits.clamp(target);
        if clamped != target {
            warn!(
                "Target {} outside [{}, {}], using {}",
                target, self.limits.min, self.limits.max, clamped
            );
        }
        self.target_value = clamped;
    }

    /// Start controlling. The time spent disabled is not integrated.
    pub fn enable(&mut self) {
        self.last_tick_millis = self.clock.now_millis();
        self.control_enabled = true;
        info!("Temperature control enabled, target {}", self.target_value);
    }

    /// Stop controlling: PWM goes to zero and the integrator is cleared, so
    /// the next [`enable`](Self::enable) starts from rest.
    pub fn disable(&mut self) -> Result<(), DriveError<F::Error, P::Error>> {
        self.control_enabled = false;
        self.integrated_output = 0.0;
        self.last_output = 0.0;
        info!("Temperature control disabled");
        self.driver.set_duty(0)
    }

    /// Run one control tick against the measured temperature and drive the
    /// element accordingly.
    pub fn control(&mut self, current_value: f32) -> Result<(), DriveError<F::Error, P::Error>> {
        self.last_output = if self.control_enabled {
            self.compute_output(current_value, -OUTPUT_LIMIT, OUTPUT_LIMIT)
        } else {
            0.0
        };

        let (polarity, duty) = self.driver.drive(self.last_output)?;
        debug!(
            "Temperature: {}, target: {}, output: {}, duty: {}",
            current_value, self.target_value, self.last_output, duty
        );
        trace!("Polarity: {:?}", polarity);
        Ok(())
    }

    /// The control law. Returns the output clamped to `min_out..=max_out`.
    ///
    /// Callable on its own; it shares the timing reference with
    /// [`control`](Self::control), so every call consumes the elapsed time.
    pub fn compute_output(&mut self, input: f32, min_out: f32, max_out: f32) -> f32 {
        let diff = self.target_value - input;
        let out = diff * self.gains.kp + self.integrated_output;

        let now = self.clock.now_millis();
        let delta_t = elapsed_millis(now, self.last_tick_millis) as f32 / 1000.0;
        let delta_output = diff * self.gains.ki;
        self.last_tick_millis = now;

        // Integrate only while the raw output is not saturated in the
        // direction the integral is pushing.
        if (out < max_out || delta_output < 0.0) && (out > min_out || delta_output > 0.0) {
            self.integrated_output += delta_output * delta_t;
        }

        clamp(out, min_out, max_out)
    }

    pub fn target(&self) -> f32 {
        self.target_value
    }

    pub fn limits(&self) -> TargetLimits {
        self.limits
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn is_enabled(&self) -> bool {
        self.control_enabled
    }

    /// Signed output of the last tick, `0.0` while disabled.
    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    pub fn integrated_output(&self) -> f32 {
        self.integrated_output
    }

    /// Polarity and duty that the last tick wrote.
    pub fn drive_state(&self) -> (Polarity, u8) {
        (
            Polarity::from_output(self.last_output),
            crate::peltier::duty_from_output(self.last_output),
        )
    }

    /// Give back the driver and clock.
    pub fn release(self) -> (PeltierDriver<F, R, P>, C) {
        (self.driver, self.clock)
    }
}

#[inline]
fn clamp(x: f32, min: f32, max: f32) -> f32 {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}
