//! Async control loop around a [`TemperaturePidController`].
//!
//! Other tasks talk to the loop through the statics below: commands go in
//! through [`PELTIER_COMMAND_CHANNEL`], measurements through
//! [`CURRENT_TEMPERATURE`], and every tick publishes a [`ControllerState`]
//! on [`CONTROLLER_STATE`].

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_sync::watch::{Receiver, Watch};
use embassy_time::Timer;
use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::DriveError;
use crate::log::{error, info};
use crate::peltier::Polarity;
use crate::temperature_pid::TemperaturePidController;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeltierCommand {
    SetTarget(f32),
    Enable,
    Disable,
    /// Set the target and enable control.
    Hold(f32),
}

/// Snapshot of the controller after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerState {
    pub enabled: bool,
    pub target_temperature: f32,
    /// `None` until the first measurement arrives.
    pub current_temperature: Option<f32>,
    pub output: f32,
    pub polarity: Polarity,
    pub duty: u8,
}

impl ControllerState {
    pub fn to_json(&self) -> Result<heapless::String<256>, serde_json_core::ser::Error> {
        serde_json_core::to_string(self)
    }
}

pub type CommandChannel<M> = Channel<M, PeltierCommand, 4>;
pub type TemperatureSignal<M> = Signal<M, f32>;
pub type StateWatch<M> = Watch<M, ControllerState, 2>;
pub type StateReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, ControllerState, 2>;

pub static PELTIER_COMMAND_CHANNEL: CommandChannel<CriticalSectionRawMutex> = Channel::new();
pub static CURRENT_TEMPERATURE: TemperatureSignal<CriticalSectionRawMutex> = Signal::new();
pub static CONTROLLER_STATE: StateWatch<CriticalSectionRawMutex> = Watch::new();

pub fn apply_command<F, R, P, C>(
    controller: &mut TemperaturePidController<F, R, P, C>,
    command: PeltierCommand,
) -> Result<(), DriveError<F::Error, P::Error>>
where
    F: OutputPin,
    R: OutputPin<Error = F::Error>,
    P: SetDutyCycle,
    C: Clock,
{
    match command {
        PeltierCommand::SetTarget(target) => controller.set_target(target),
        PeltierCommand::Enable => controller.enable(),
        PeltierCommand::Disable => controller.disable()?,
        PeltierCommand::Hold(target) => {
            controller.set_target(target);
            controller.enable();
        }
    }
    Ok(())
}

/// One loop iteration: drain pending commands, run a control tick with the
/// newest measurement and publish the resulting state.
///
/// Without any measurement yet, the control tick is skipped.
pub fn service_tick<F, R, P, C, M>(
    controller: &mut TemperaturePidController<F, R, P, C>,
    current_temperature: &mut Option<f32>,
    commands: &CommandChannel<M>,
    temperature: &TemperatureSignal<M>,
    state: &StateWatch<M>,
) -> Result<ControllerState, DriveError<F::Error, P::Error>>
where
    F: OutputPin,
    R: OutputPin<Error = F::Error>,
    P: SetDutyCycle,
    C: Clock,
    M: RawMutex,
{
    while let Ok(command) = commands.try_receive() {
        info!("Command: {:?}", command);
        apply_command(controller, command)?;
    }

    if let Some(measured) = temperature.try_take() {
        *current_temperature = Some(measured);
    }
    if let Some(measured) = *current_temperature {
        controller.control(measured)?;
    }

    let (polarity, duty) = controller.drive_state();
    let snapshot = ControllerState {
        enabled: controller.is_enabled(),
        target_temperature: controller.target(),
        current_temperature: *current_temperature,
        output: controller.last_output(),
        polarity,
        duty,
    };
    state.sender().send(snapshot);
    Ok(snapshot)
}

/// Run the controller forever on the global channels, one tick every
/// `tick_millis`.
///
/// A failed output write disables control and the loop keeps going.
pub async fn run_controller<F, R, P, C>(
    mut controller: TemperaturePidController<F, R, P, C>,
    tick_millis: u32,
) -> !
where
    F: OutputPin,
    R: OutputPin<Error = F::Error>,
    P: SetDutyCycle,
    C: Clock,
{
    info!("Starting controller loop, tick {} ms", tick_millis);
    if controller.setup().is_err() {
        error!("Failed to initialise Peltier outputs");
    }

    let mut current_temperature = None;
    loop {
        if service_tick(
            &mut controller,
            &mut current_temperature,
            &PELTIER_COMMAND_CHANNEL,
            &CURRENT_TEMPERATURE,
            &CONTROLLER_STATE,
        )
        .is_err()
        {
            error!("Peltier output failed, disabling control");
            let _ = controller.disable();
        }
        Timer::after_millis(tick_millis.into()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests::ManualClock;
    use crate::simulation::SimulatedBridge;
    use crate::temperature_pid::{Gains, TargetLimits};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    struct Loop {
        commands: CommandChannel<NoopRawMutex>,
        temperature: TemperatureSignal<NoopRawMutex>,
        state: StateWatch<NoopRawMutex>,
    }

    impl Loop {
        fn new() -> Self {
            Self {
                commands: Channel::new(),
                temperature: Signal::new(),
                state: Watch::new(),
            }
        }
    }

    #[test]
    fn hold_sets_target_and_enables() {
        let bridge = SimulatedBridge::new();
        let clock = ManualClock::default();
        let mut controller = TemperaturePidController::new(
            Gains::new(10.0, 0.0, 0.0),
            TargetLimits::default(),
            25.0,
            bridge.driver(),
            &clock,
        );

        apply_command(&mut controller, PeltierCommand::Hold(94.0)).unwrap();
        assert!(controller.is_enabled());
        assert_eq!(controller.target(), 94.0);

        apply_command(&mut controller, PeltierCommand::SetTarget(250.0)).unwrap();
        assert_eq!(controller.target(), 100.0);

        apply_command(&mut controller, PeltierCommand::Disable).unwrap();
        assert!(!controller.is_enabled());
    }

    #[test]
    fn tick_applies_commands_then_controls() {
        let bridge = SimulatedBridge::new();
        let clock = ManualClock::default();
        let mut controller = TemperaturePidController::new(
            Gains::new(10.0, 0.0, 0.0),
            TargetLimits::default(),
            25.0,
            bridge.driver(),
            &clock,
        );
        let channels = Loop::new();
        let mut receiver = channels.state.receiver().unwrap();
        let mut current = None;

        // No measurement yet: nothing is driven.
        channels.commands.try_send(PeltierCommand::Hold(30.0)).unwrap();
        let state = service_tick(
            &mut controller,
            &mut current,
            &channels.commands,
            &channels.temperature,
            &channels.state,
        )
        .unwrap();
        assert!(state.enabled);
        assert_eq!(state.current_temperature, None);
        assert_eq!(bridge.duty(), 0);

        channels.temperature.signal(27.0);
        let state = service_tick(
            &mut controller,
            &mut current,
            &channels.commands,
            &channels.temperature,
            &channels.state,
        )
        .unwrap();
        assert_eq!(state.current_temperature, Some(27.0));
        assert_eq!(state.output, 30.0);
        assert_eq!((state.polarity, state.duty), (Polarity::Heat, 30));
        assert_eq!(bridge.signed_duty(), 30);
        assert_eq!(receiver.try_get(), Some(state));

        // The last measurement is reused until a new one arrives.
        channels.commands.try_send(PeltierCommand::SetTarget(20.0)).unwrap();
        let state = service_tick(
            &mut controller,
            &mut current,
            &channels.commands,
            &channels.temperature,
            &channels.state,
        )
        .unwrap();
        assert_eq!(state.output, -70.0);
        assert_eq!(bridge.signed_duty(), -70);
    }

    #[test]
    fn state_serializes_to_json() {
        let state = ControllerState {
            enabled: true,
            target_temperature: 94.0,
            current_temperature: Some(90.5),
            output: 35.0,
            polarity: Polarity::Heat,
            duty: 35,
        };
        let json = state.to_json().unwrap();
        assert!(json.starts_with("{\"enabled\":true,\"target_temperature\":94"));
        assert!(json.contains("\"polarity\":\"Heat\""));
        assert!(json.ends_with("\"duty\":35}"));
    }
}
