//! Host-side stand-ins for the H-bridge and the thermal block.

use core::convert::Infallible;

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::peltier::{PeltierDriver, MAX_DUTY};

/// Output levels of a simulated H-bridge, shared between the pin handles
/// and whoever observes them.
#[derive(Debug, Default)]
pub struct SimulatedBridge {
    forward: AtomicBool,
    reverse: AtomicBool,
    duty: AtomicU8,
}

pub type SimulatedDriver<'a> = PeltierDriver<SimPin<'a>, SimPin<'a>, SimPwm<'a>>;

impl SimulatedBridge {
    pub const fn new() -> Self {
        Self {
            forward: AtomicBool::new(false),
            reverse: AtomicBool::new(false),
            duty: AtomicU8::new(0),
        }
    }

    pub fn forward_pin(&self) -> SimPin<'_> {
        SimPin {
            level: &self.forward,
        }
    }

    pub fn reverse_pin(&self) -> SimPin<'_> {
        SimPin {
            level: &self.reverse,
        }
    }

    pub fn pwm(&self) -> SimPwm<'_> {
        SimPwm { duty: &self.duty }
    }

    pub fn driver(&self) -> SimulatedDriver<'_> {
        PeltierDriver::new(self.forward_pin(), self.reverse_pin(), self.pwm())
    }

    pub fn forward_is_high(&self) -> bool {
        self.forward.load(Ordering::Relaxed)
    }

    pub fn reverse_is_high(&self) -> bool {
        self.reverse.load(Ordering::Relaxed)
    }

    pub fn duty(&self) -> u8 {
        self.duty.load(Ordering::Relaxed)
    }

    /// Duty as seen by the element: positive heating, negative cooling.
    /// Zero when both or neither direction pin is high.
    pub fn signed_duty(&self) -> i16 {
        let duty = self.duty() as i16;
        match (self.forward_is_high(), self.reverse_is_high()) {
            (true, false) => duty,
            (false, true) => -duty,
            _ => 0,
        }
    }
}

pub struct SimPin<'a> {
    level: &'a AtomicBool,
}

impl digital::ErrorType for SimPin<'_> {
    type Error = Infallible;
}

impl OutputPin for SimPin<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.store(true, Ordering::Relaxed);
        Ok(())
    }
}

pub struct SimPwm<'a> {
    duty: &'a AtomicU8,
}

impl pwm::ErrorType for SimPwm<'_> {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm<'_> {
    fn max_duty_cycle(&self) -> u16 {
        MAX_DUTY as u16
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty
            .store(duty.min(MAX_DUTY as u16) as u8, Ordering::Relaxed);
        Ok(())
    }
}

/// First-order model of a Peltier-driven block.
#[derive(Debug, Clone)]
pub struct ThermalPlant {
    pub temperature: f32,
    pub ambient: f32,
    /// °C per second at full heating duty.
    pub max_heating_rate: f32,
    /// °C per second at full cooling duty.
    pub max_cooling_rate: f32,
    /// Heat loss to ambient per degree of difference, per second.
    pub heat_loss_coefficient: f32,
}

impl ThermalPlant {
    pub fn new(ambient: f32) -> Self {
        Self {
            temperature: ambient,
            ambient,
            max_heating_rate: 3.0,
            max_cooling_rate: 2.0,
            heat_loss_coefficient: 0.02,
        }
    }

    /// Advance the model by `dt_secs` with the given signed duty and return
    /// the new block temperature.
    pub fn step(&mut self, signed_duty: i16, dt_secs: f32) -> f32 {
        let fraction = signed_duty as f32 / MAX_DUTY as f32;
        let drive = if fraction >= 0.0 {
            self.max_heating_rate * fraction
        } else {
            self.max_cooling_rate * fraction
        };
        let heat_loss = self.heat_loss_coefficient * (self.temperature - self.ambient);
        self.temperature += (drive - heat_loss) * dt_secs;
        self.temperature
    }

    pub fn reset(&mut self) {
        self.temperature = self.ambient;
    }
}
