#![no_std]
#![no_main]

use assign_resources::assign_resources;
use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::adc::{self, Adc};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::pwm::{self, Pwm, PwmOutput};
use embassy_rp::{bind_interrupts, peripherals, Peri};
use embassy_time::Timer;
use peltier_controller::program::{CycleProgram, ProgramRunner, RunnerEvent};
use peltier_controller::service::{
    run_controller, PeltierCommand, CONTROLLER_STATE, CURRENT_TEMPERATURE,
    PELTIER_COMMAND_CHANNEL,
};
use peltier_controller::{
    Clock, ControllerConfig, EmbassyClock, PeltierDriver, TemperaturePidController,
};
use {defmt_rtt as _, panic_probe as _};

assign_resources! {
    peltier: PeltierResources {
        forward: PIN_16,
        reverse: PIN_17,
        pwm_slice: PWM_SLICE1,
        pwm: PIN_18,
    },
    sensor: SensorResources {
        adc: ADC,
        temp_sensor: ADC_TEMP_SENSOR,
    },
}

bind_interrupts!(struct Irqs {
    ADC_IRQ_FIFO => adc::InterruptHandler;
});

/// PWM wrap value: 125 MHz / 16384 ≈ 7.6 kHz, inside the H-bridge's
/// switching limit.
const PWM_TOP: u16 = 16_383;
const SENSOR_PERIOD_MILLIS: u64 = 500;

type FirmwareController =
    TemperaturePidController<Output<'static>, Output<'static>, PwmOutput<'static>, EmbassyClock>;

#[embassy_executor::task]
async fn controller_task(controller: FirmwareController, tick_millis: u32) {
    run_controller(controller, tick_millis).await
}

/// On-die temperature sensor standing in for the block sensor.
#[embassy_executor::task]
async fn sensor_task(r: SensorResources) -> ! {
    let mut adc = Adc::new(r.adc, Irqs, adc::Config::default());
    let mut channel = adc::Channel::new_temp_sensor(r.temp_sensor);

    loop {
        match adc.read(&mut channel).await {
            Ok(raw) => CURRENT_TEMPERATURE.signal(convert_to_celsius(raw)),
            Err(e) => warn!("ADC read failed: {}", e),
        }
        Timer::after_millis(SENSOR_PERIOD_MILLIS).await;
    }
}

#[embassy_executor::task]
async fn program_task(program: CycleProgram, tolerance: f32) {
    let mut runner = ProgramRunner::with_tolerance(program, tolerance);
    let mut state = unwrap!(CONTROLLER_STATE.receiver());
    let commands = PELTIER_COMMAND_CHANNEL.sender();

    if let Some(target) = runner.start() {
        commands.send(PeltierCommand::Hold(target)).await;
    }

    loop {
        let snapshot = state.changed().await;
        let Some(temperature) = snapshot.current_temperature else {
            continue;
        };
        match runner.update(EmbassyClock.now_millis(), temperature) {
            RunnerEvent::TargetChanged(target) => {
                commands.send(PeltierCommand::SetTarget(target)).await;
            }
            RunnerEvent::Finished => {
                commands.send(PeltierCommand::Disable).await;
                info!("Program complete");
                return;
            }
            RunnerEvent::Holding | RunnerEvent::Waiting => {}
        }
    }
}

fn convert_to_celsius(raw: u16) -> f32 {
    let volts = raw as f32 * 3.3 / 4096.0;
    27.0 - (volts - 0.706) / 0.001721
}

fn peltier_driver(
    r: PeltierResources,
) -> PeltierDriver<Output<'static>, Output<'static>, PwmOutput<'static>> {
    let forward = Output::new(r.forward, Level::Low);
    let reverse = Output::new(r.reverse, Level::Low);

    let mut config = pwm::Config::default();
    config.top = PWM_TOP;
    config.compare_a = 0;
    let (output, _) = Pwm::new_output_a(r.pwm_slice, r.pwm, config).split();
    let output = unwrap!(output);

    PeltierDriver::new(forward, reverse, output)
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    let config = ControllerConfig::default();
    let controller = TemperaturePidController::new(
        config.gains,
        config.limits,
        config.initial_target,
        peltier_driver(r.peltier),
        EmbassyClock,
    );

    spawner.spawn(unwrap!(controller_task(controller, config.tick_millis)));
    spawner.spawn(unwrap!(sensor_task(r.sensor)));
    spawner.spawn(unwrap!(program_task(CycleProgram::pcr(), config.tolerance)));
}
