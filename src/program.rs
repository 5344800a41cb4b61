//! Thermocycling programs: a sequence of setpoints, each held for a fixed
//! time once the block has come within tolerance of it.

use heapless::Vec;
use serde::Deserialize;

use crate::clock::elapsed_millis;
use crate::log::info;

/// Distance from the setpoint, in °C, at which a step counts as reached.
pub const DEFAULT_TOLERANCE: f32 = 1.5;
/// Steps per program section.
pub const MAX_SECTION_STEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Step {
    /// Setpoint in °C.
    pub temperature: f32,
    /// Seconds to hold once the setpoint is reached.
    pub hold_secs: u32,
}

impl Step {
    pub const fn new(temperature: f32, hold_secs: u32) -> Self {
        Self {
            temperature,
            hold_secs,
        }
    }
}

pub type Section = Vec<Step, MAX_SECTION_STEPS>;

/// Start steps, then the cycle steps `cycles` times, then the end steps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CycleProgram {
    #[serde(default)]
    pub start: Section,
    #[serde(default)]
    pub cycle: Section,
    #[serde(default)]
    pub cycles: u16,
    #[serde(default)]
    pub end: Section,
}

impl CycleProgram {
    pub fn new(start: &[Step], cycle: &[Step], cycles: u16, end: &[Step]) -> Option<Self> {
        Some(Self {
            start: Vec::from_slice(start).ok()?,
            cycle: Vec::from_slice(cycle).ok()?,
            cycles,
            end: Vec::from_slice(end).ok()?,
        })
    }

    /// Polymerase chain reaction profile.
    ///
    /// Melt at 94 °C, then 30 rounds of melt / anneal / extend, a final
    /// extension at 68 °C and a long hold at 10 °C for storage.
    pub fn pcr() -> Self {
        Self::pcr_with_cycles(30)
    }

    pub fn pcr_with_cycles(cycles: u16) -> Self {
        let mut program = Self {
            start: Vec::new(),
            cycle: Vec::new(),
            cycles,
            end: Vec::new(),
        };
        // Capacities are well above these lengths.
        let _ = program.start.push(Step::new(94.0, 3 * 60));
        let _ = program.cycle.extend_from_slice(&[
            Step::new(94.0, 30),
            Step::new(48.0, 30),
            Step::new(68.0, 45),
        ]);
        let _ = program
            .end
            .extend_from_slice(&[Step::new(68.0, 5 * 60), Step::new(10.0, 5 * 60 * 60)]);
        program
    }

    /// Total number of steps once cycles are unrolled.
    pub fn len(&self) -> usize {
        self.start.len() + self.cycle.len() * self.cycles as usize + self.end.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step(&self, index: usize) -> Option<Step> {
        if index < self.start.len() {
            return Some(self.start[index]);
        }
        let index = index - self.start.len();
        let cycled = self.cycle.len() * self.cycles as usize;
        if index < cycled {
            return Some(self.cycle[index % self.cycle.len()]);
        }
        self.end.get(index - cycled).copied()
    }

    /// Sum of all hold times, ignoring time spent reaching each setpoint.
    pub fn total_hold_secs(&self) -> u64 {
        (0..self.len())
            .filter_map(|i| self.step(i))
            .map(|step| step.hold_secs as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Driving towards the current step's setpoint.
    Approaching,
    /// Within tolerance since `since` (milliseconds).
    Holding { since: u32 },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunnerEvent {
    /// Nothing changed.
    Waiting,
    /// A new step started; apply this setpoint.
    TargetChanged(f32),
    /// The current step's setpoint was just reached.
    Holding,
    /// The last step has been held for its full time.
    Finished,
}

/// Walks a [`CycleProgram`] against measured temperatures.
#[derive(Debug, Clone)]
pub struct ProgramRunner {
    program: CycleProgram,
    tolerance: f32,
    index: usize,
    phase: Phase,
}

impl ProgramRunner {
    pub fn new(program: CycleProgram) -> Self {
        Self::with_tolerance(program, DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(program: CycleProgram, tolerance: f32) -> Self {
        let phase = if program.is_empty() {
            Phase::Finished
        } else {
            Phase::Approaching
        };
        Self {
            program,
            tolerance,
            index: 0,
            phase,
        }
    }

    /// Setpoint of the first step, if any.
    pub fn start(&mut self) -> Option<f32> {
        self.index = 0;
        match self.program.step(0) {
            Some(step) => {
                self.phase = Phase::Approaching;
                info!("Step 1/{}: {}", self.program.len(), step.temperature);
                Some(step.temperature)
            }
            None => {
                self.phase = Phase::Finished;
                None
            }
        }
    }

    pub fn update(&mut self, now_millis: u32, measured: f32) -> RunnerEvent {
        let step = match (self.phase, self.program.step(self.index)) {
            (Phase::Finished, _) | (_, None) => {
                self.phase = Phase::Finished;
                return RunnerEvent::Waiting;
            }
            (_, Some(step)) => step,
        };

        match self.phase {
            Phase::Approaching => {
                let distance = measured - step.temperature;
                let distance = if distance < 0.0 { -distance } else { distance };
                if distance < self.tolerance {
                    self.phase = Phase::Holding { since: now_millis };
                    info!(
                        "Step {}/{}: reached {}, holding {} s",
                        self.index + 1,
                        self.program.len(),
                        step.temperature,
                        step.hold_secs
                    );
                    // A zero-length hold completes on the next update.
                    return RunnerEvent::Holding;
                }
                RunnerEvent::Waiting
            }
            Phase::Holding { since } => {
                let held_millis = elapsed_millis(now_millis, since) as u64;
                if held_millis < step.hold_secs as u64 * 1000 {
                    return RunnerEvent::Waiting;
                }
                self.index += 1;
                match self.program.step(self.index) {
                    Some(next) => {
                        self.phase = Phase::Approaching;
                        info!(
                            "Step {}/{}: {}",
                            self.index + 1,
                            self.program.len(),
                            next.temperature
                        );
                        RunnerEvent::TargetChanged(next.temperature)
                    }
                    None => {
                        self.phase = Phase::Finished;
                        info!("Program finished");
                        RunnerEvent::Finished
                    }
                }
            }
            Phase::Finished => RunnerEvent::Waiting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Zero-based index of the current step.
    pub fn step_index(&self) -> usize {
        self.index
    }

    pub fn current_step(&self) -> Option<Step> {
        self.program.step(self.index)
    }

    pub fn program(&self) -> &CycleProgram {
        &self.program
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_program() -> CycleProgram {
        CycleProgram::new(
            &[Step::new(90.0, 2)],
            &[Step::new(60.0, 1), Step::new(70.0, 1)],
            2,
            &[Step::new(20.0, 0)],
        )
        .unwrap()
    }

    #[test]
    fn pcr_profile_unrolls_in_order() {
        let program = CycleProgram::pcr();
        assert_eq!(program.len(), 1 + 3 * 30 + 2);
        assert_eq!(program.step(0), Some(Step::new(94.0, 180)));
        assert_eq!(program.step(1), Some(Step::new(94.0, 30)));
        assert_eq!(program.step(2), Some(Step::new(48.0, 30)));
        assert_eq!(program.step(3), Some(Step::new(68.0, 45)));
        assert_eq!(program.step(90), Some(Step::new(68.0, 45)));
        assert_eq!(program.step(91), Some(Step::new(68.0, 300)));
        assert_eq!(program.step(92), Some(Step::new(10.0, 18_000)));
        assert_eq!(program.step(93), None);
        assert_eq!(program.total_hold_secs(), 180 + 30 * 105 + 300 + 18_000);
    }

    #[test]
    fn zero_cycles_skip_the_cycle_section() {
        let program = CycleProgram::pcr_with_cycles(0);
        assert_eq!(program.len(), 3);
        assert_eq!(program.step(1), Some(Step::new(68.0, 300)));
    }

    #[test]
    fn oversized_section_is_rejected() {
        let steps = [Step::new(50.0, 1); MAX_SECTION_STEPS + 1];
        assert!(CycleProgram::new(&steps, &[], 0, &[]).is_none());
    }

    #[test]
    fn program_parses_from_json() {
        let json = r#"{
            "start": [{ "temperature": 95.0, "hold_secs": 120 }],
            "cycle": [
                { "temperature": 95.0, "hold_secs": 15 },
                { "temperature": 55.0, "hold_secs": 20 }
            ],
            "cycles": 3
        }"#;
        let (program, _) = serde_json_core::from_str::<CycleProgram>(json).unwrap();
        assert_eq!(program.len(), 7);
        assert!(program.end.is_empty());
        assert_eq!(program.step(6), Some(Step::new(55.0, 20)));
    }

    #[test]
    fn runner_waits_until_within_tolerance() {
        let mut runner = ProgramRunner::new(short_program());
        assert_eq!(runner.start(), Some(90.0));

        assert_eq!(runner.update(0, 25.0), RunnerEvent::Waiting);
        assert_eq!(runner.update(1_000, 88.4), RunnerEvent::Waiting);
        assert_eq!(runner.phase(), Phase::Approaching);
        assert_eq!(runner.update(2_000, 88.6), RunnerEvent::Holding);
        assert_eq!(runner.phase(), Phase::Holding { since: 2_000 });
    }

    #[test]
    fn hold_time_counts_from_reaching_the_setpoint() {
        let mut runner = ProgramRunner::new(short_program());
        runner.start();
        runner.update(10_000, 90.0);

        // Leaving tolerance while holding does not restart the hold.
        assert_eq!(runner.update(11_000, 80.0), RunnerEvent::Waiting);
        assert_eq!(runner.update(11_999, 90.0), RunnerEvent::Waiting);
        assert_eq!(runner.update(12_000, 90.0), RunnerEvent::TargetChanged(60.0));
        assert_eq!(runner.step_index(), 1);
        assert_eq!(runner.phase(), Phase::Approaching);
    }

    #[test]
    fn runner_walks_the_whole_program() {
        let mut runner = ProgramRunner::new(short_program());
        let mut target = runner.start().unwrap();
        let mut targets = std::vec![target];
        let mut now = 0u32;

        while !runner.is_finished() {
            now += 500;
            // An ideal block: always at the setpoint.
            match runner.update(now, target) {
                RunnerEvent::TargetChanged(next) => {
                    target = next;
                    targets.push(next);
                }
                RunnerEvent::Finished => break,
                _ => {}
            }
            assert!(now < 60_000, "program did not finish");
        }

        assert_eq!(targets, [90.0_f32, 60.0, 70.0, 60.0, 70.0, 20.0]);
        assert!(runner.is_finished());
        assert_eq!(runner.update(now + 500, 20.0), RunnerEvent::Waiting);
    }

    #[test]
    fn hold_survives_clock_rollover() {
        let program = CycleProgram::new(&[Step::new(50.0, 1), Step::new(40.0, 1)], &[], 0, &[])
            .unwrap();
        let mut runner = ProgramRunner::new(program);
        runner.start();
        let reached = u32::MAX - 400;
        runner.update(reached, 50.0);
        assert_eq!(
            runner.update(reached.wrapping_add(999), 50.0),
            RunnerEvent::Waiting
        );
        assert_eq!(
            runner.update(reached.wrapping_add(1_000), 50.0),
            RunnerEvent::TargetChanged(40.0)
        );
    }

    #[test]
    fn empty_program_is_finished_immediately() {
        let mut runner = ProgramRunner::new(CycleProgram::new(&[], &[], 5, &[]).unwrap());
        assert!(runner.is_finished());
        assert_eq!(runner.start(), None);
        assert_eq!(runner.update(0, 25.0), RunnerEvent::Waiting);
    }
}
