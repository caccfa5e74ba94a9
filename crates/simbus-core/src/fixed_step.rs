//! The fixed-step scheduler.
//!
//! The simulation progresses at a fixed base step size. Subsimulators step
//! in parallel at an optional integer multiple of the base step (their
//! decimation factor), and outputs propagate only at common tick boundaries.

use crate::connection::{SimulatorIndex, StepNumber};
use crate::function::Function;
use crate::scheduler::{SchedulerCore, SchedulerError, calculate_decimation_factor};
use crate::simulator::SlaveSimulator;
use crate::time::{Duration, TimePoint};
use std::collections::BTreeSet;

/// Synchronous multi-rate scheduler with a constant macro-step size.
pub struct FixedStepScheduler {
    base_step_size: Duration,
    core: SchedulerCore,
}

impl FixedStepScheduler {
    /// Create a fixed-step scheduler.
    ///
    /// `worker_count` limits the worker pool; the default is the hardware
    /// parallelism minus one, and 0 selects synchronous in-caller dispatch.
    ///
    /// # Panics
    ///
    /// Panics if `base_step_size` is not positive.
    pub fn new(base_step_size: Duration, worker_count: Option<usize>) -> Self {
        assert!(
            base_step_size > Duration::ZERO,
            "base step size must be positive"
        );
        Self {
            base_step_size,
            core: SchedulerCore::new(worker_count),
        }
    }

    pub fn base_step_size(&self) -> Duration {
        self.base_step_size
    }

    /// The number of completed ticks.
    pub fn step_counter(&self) -> StepNumber {
        self.core.step_counter()
    }

    pub(crate) fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    pub(crate) fn add_simulator(
        &mut self,
        index: SimulatorIndex,
        name: &str,
        step_size_hint: Duration,
    ) {
        let factor = calculate_decimation_factor(name, self.base_step_size, step_size_hint);
        self.core.add_simulator(index, factor);
    }

    pub(crate) fn initialize(
        &mut self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        self.core.initialize(simulators, functions)
    }

    pub(crate) fn do_step(
        &mut self,
        current_time: TimePoint,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(Duration, BTreeSet<SimulatorIndex>), SchedulerError> {
        let finished = self
            .core
            .dispatch_steps(current_time, self.base_step_size, simulators)?;
        self.core.calculate_and_transfer(simulators, functions)?;
        Ok((self.base_step_size, finished))
    }
}
