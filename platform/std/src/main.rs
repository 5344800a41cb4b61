use std::path::PathBuf;

use clap::Parser;
use embassy_executor::Spawner;
use embassy_time::Timer;
use log::*;
use peltier_controller::clock::{Clock, EmbassyClock};
use peltier_controller::program::{CycleProgram, ProgramRunner, RunnerEvent};
use peltier_controller::service::{
    run_controller, PeltierCommand, CONTROLLER_STATE, CURRENT_TEMPERATURE,
    PELTIER_COMMAND_CHANNEL,
};
use peltier_controller::simulation::{SimPin, SimPwm, SimulatedBridge, ThermalPlant};
use peltier_controller::{ControllerConfig, TemperaturePidController};

static BRIDGE: SimulatedBridge = SimulatedBridge::new();

/// Run a thermocycling program against a simulated Peltier block.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Controller configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Thermocycling program (JSON); defaults to the PCR profile
    #[arg(long)]
    program: Option<PathBuf>,

    /// Number of PCR cycles when no program file is given
    #[arg(long, default_value_t = 30)]
    cycles: u16,

    /// Simulated milliseconds per real millisecond
    #[arg(long, default_value_t = 1)]
    time_scale: u32,

    /// Ambient temperature of the simulated block
    #[arg(long, default_value_t = 25.0)]
    ambient: f32,
}

/// Embassy time sped up by a constant factor.
#[derive(Clone, Copy)]
struct ScaledClock {
    scale: u32,
}

impl Clock for ScaledClock {
    fn now_millis(&self) -> u32 {
        EmbassyClock.now_millis().wrapping_mul(self.scale)
    }
}

type SimController =
    TemperaturePidController<SimPin<'static>, SimPin<'static>, SimPwm<'static>, ScaledClock>;

#[embassy_executor::task]
async fn controller_task(controller: SimController, tick_millis: u32) {
    run_controller(controller, tick_millis).await
}

#[embassy_executor::task]
async fn plant_task(
    program: CycleProgram,
    config: ControllerConfig,
    clock: ScaledClock,
    ambient: f32,
) {
    let mut plant = ThermalPlant::new(ambient);
    let mut runner = ProgramRunner::with_tolerance(program, config.tolerance);
    let mut state = unwrap_receiver();
    let commands = PELTIER_COMMAND_CHANNEL.sender();

    info!(
        "Program: {} steps, {} s of hold time",
        runner.program().len(),
        runner.program().total_hold_secs()
    );
    if let Some(target) = runner.start() {
        commands.send(PeltierCommand::Hold(target)).await;
    }

    let dt_secs = (config.tick_millis * clock.scale) as f32 / 1000.0;
    let mut ticks: u32 = 0;
    loop {
        let temperature = plant.step(BRIDGE.signed_duty(), dt_secs);
        CURRENT_TEMPERATURE.signal(temperature);

        match runner.update(clock.now_millis(), temperature) {
            RunnerEvent::TargetChanged(target) => {
                commands.send(PeltierCommand::SetTarget(target)).await;
            }
            RunnerEvent::Finished => {
                commands.send(PeltierCommand::Disable).await;
                info!("Program complete at {:.2} °C", temperature);
                Timer::after_millis(config.tick_millis.into()).await;
                std::process::exit(0);
            }
            RunnerEvent::Holding | RunnerEvent::Waiting => {}
        }

        ticks = ticks.wrapping_add(1);
        if ticks % 10 == 0 {
            if let Some(snapshot) = state.try_get() {
                match snapshot.to_json() {
                    Ok(json) => info!("Step {}: {}", runner.step_index() + 1, json),
                    Err(_) => warn!("State does not fit the JSON buffer"),
                }
            }
        }

        Timer::after_millis(config.tick_millis.into()).await;
    }
}

fn unwrap_receiver() -> peltier_controller::service::StateReceiver<'static> {
    match CONTROLLER_STATE.receiver() {
        Some(receiver) => receiver,
        None => {
            error!("No state receiver left");
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> ControllerConfig {
    let Some(path) = path else {
        return ControllerConfig::default();
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            error!("Cannot read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    match ControllerConfig::from_json(&text) {
        Ok(config) => config,
        Err(e) => {
            error!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn load_program(path: Option<&PathBuf>, cycles: u16) -> CycleProgram {
    let Some(path) = path else {
        return CycleProgram::pcr_with_cycles(cycles);
    };
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| {
            serde_json_core::from_str::<CycleProgram>(&text)
                .map(|(program, _)| program)
                .map_err(|e| e.to_string())
        });
    match parsed {
        Ok(program) => program,
        Err(e) => {
            error!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .parse_default_env()
        .init();

    info!("peltier-controller {}", peltier_controller::VERSION);
    let args = Args::parse();
    let config = load_config(args.config.as_ref());
    let program = load_program(args.program.as_ref(), args.cycles);
    let clock = ScaledClock {
        scale: args.time_scale.max(1),
    };

    let controller = TemperaturePidController::new(
        config.gains,
        config.limits,
        config.initial_target,
        BRIDGE.driver(),
        clock,
    );

    spawner.spawn(controller_task(controller, config.tick_millis).unwrap());
    spawner.spawn(plant_task(program, config, clock, args.ambient).unwrap());
}
