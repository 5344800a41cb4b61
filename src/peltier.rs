//! H-bridge output stage for a Peltier element.
//!
//! Two direction pins select the current flow through the element and a PWM
//! channel sets its magnitude. Pins are handed over already configured as
//! outputs; the `embedded-hal` handle types carry that guarantee.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use serde::Serialize;

use crate::error::DriveError;

/// Highest duty level accepted by [`PeltierDriver::set_duty`].
pub const MAX_DUTY: u8 = u8::MAX;

/// Current direction through the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Forward pin high, reverse pin low.
    Heat,
    /// Forward pin low, reverse pin high.
    Cool,
}

impl Polarity {
    /// Polarity selected for a signed controller output.
    ///
    /// Only a strictly positive output heats; zero selects [`Polarity::Cool`],
    /// which is harmless since the duty is zero as well.
    pub fn from_output(output: f32) -> Self {
        if output > 0.0 {
            Polarity::Heat
        } else {
            Polarity::Cool
        }
    }
}

/// Duty level for a signed controller output: its magnitude truncated into
/// `0..=255`. NaN maps to 0.
pub fn duty_from_output(output: f32) -> u8 {
    let magnitude = if output < 0.0 { -output } else { output };
    // Float to int casts saturate.
    magnitude as u8
}

pub struct PeltierDriver<F, R, P> {
    forward: F,
    reverse: R,
    pwm: P,
}

impl<F, R, P> PeltierDriver<F, R, P>
where
    F: OutputPin,
    R: OutputPin<Error = F::Error>,
    P: SetDutyCycle,
{
    pub fn new(forward: F, reverse: R, pwm: P) -> Self {
        Self {
            forward,
            reverse,
            pwm,
        }
    }

    /// De-energize the element. Direction pins are left as they are.
    pub fn setup(&mut self) -> Result<(), DriveError<F::Error, P::Error>> {
        self.set_duty(0)
    }

    pub fn set_polarity(
        &mut self,
        polarity: Polarity,
    ) -> Result<(), DriveError<F::Error, P::Error>> {
        match polarity {
            Polarity::Heat => {
                self.forward.set_high().map_err(DriveError::Direction)?;
                self.reverse.set_low().map_err(DriveError::Direction)?;
            }
            Polarity::Cool => {
                self.forward.set_low().map_err(DriveError::Direction)?;
                self.reverse.set_high().map_err(DriveError::Direction)?;
            }
        }
        Ok(())
    }

    /// Set the duty level, `0` off to [`MAX_DUTY`] fully on, scaled onto the
    /// channel's own range.
    pub fn set_duty(&mut self, duty: u8) -> Result<(), DriveError<F::Error, P::Error>> {
        self.pwm
            .set_duty_cycle_fraction(duty as u16, MAX_DUTY as u16)
            .map_err(DriveError::Pwm)
    }

    /// Apply a signed output in `-255.0..=255.0`: sign picks the polarity,
    /// magnitude the duty. Returns what was written.
    pub fn drive(
        &mut self,
        output: f32,
    ) -> Result<(Polarity, u8), DriveError<F::Error, P::Error>> {
        let polarity = Polarity::from_output(output);
        let duty = duty_from_output(output);
        self.set_polarity(polarity)?;
        self.set_duty(duty)?;
        Ok((polarity, duty))
    }

    /// Hand the pins back.
    pub fn release(self) -> (F, R, P) {
        (self.forward, self.reverse, self.pwm)
    }
}
