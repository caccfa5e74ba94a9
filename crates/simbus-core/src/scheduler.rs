//! Scheduler machinery shared by the fixed-step and energy-controlled
//! schedulers, and the closed [`Scheduler`] dispatch type.
//!
//! The scheduler owns per-entity *metadata* -- decimation factors, outgoing
//! connection lists, the step counter, the worker pool -- while the execution
//! retains ownership of the subsimulator and function tables and lends them
//! to the scheduler for each phase.
//!
//! # Multi-rate rules
//!
//! A subsimulator with decimation factor `df` steps at tick `k` iff
//! `k % df == 0`, covering `df` base steps at once. A transfer over an edge
//! happens iff `k % lcm(df(source), df(target)) == 0`, i.e. only at common
//! tick boundaries. A function's decimation factor is the lcm of the factors
//! of all subsimulators consuming its outputs.

use crate::connection::{
    FunToSimConnection, FunctionIndex, FunctionIoId, SimToFunConnection, SimToSimConnection,
    SimulatorIndex, VariableId,
};
use crate::function::{Function, FunctionError};
use crate::model::{StepResult, VariableType};
use crate::simulator::{SimulatorError, SlaveSimulator};
use crate::time::{Duration, TimePoint, duration_to_secs};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::warn;

pub use crate::ecco::{EccoParameters, EccoScheduler, PowerBond};
pub use crate::fixed_step::FixedStepScheduler;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while scheduling.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// One or more subsimulators failed their step; the message concatenates
    /// the per-subsimulator reports.
    #[error("simulation error: {message}")]
    SimulationFailed { message: String },
    #[error(transparent)]
    Simulator(#[from] SimulatorError),
    #[error(transparent)]
    Function(#[from] FunctionError),
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Fan-out pool for per-subsimulator operations.
///
/// `None` means no worker threads: operations run synchronously in the
/// caller. Each fan-out is followed by an implicit join (the collected
/// result vector).
pub(crate) struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Build a pool of `min(requested, available_parallelism - 1)` threads.
    /// A requested count of 0 selects synchronous execution.
    pub(crate) fn new(requested: Option<usize>) -> Self {
        let max_threads = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1);
        let thread_count = requested.unwrap_or(max_threads).min(max_threads);
        let pool = if thread_count == 0 {
            None
        } else {
            rayon::ThreadPoolBuilder::new()
                .num_threads(thread_count)
                .build()
                .ok()
        };
        Self { pool }
    }

    /// Run `op` for every selected subsimulator and collect the results.
    /// Returns after all tasks have finished.
    pub(crate) fn for_each_simulator<R: Send>(
        &self,
        simulators: &mut [SlaveSimulator],
        select: impl Fn(SimulatorIndex) -> bool + Sync,
        op: impl Fn(SimulatorIndex, &mut SlaveSimulator) -> R + Sync,
    ) -> Vec<(SimulatorIndex, R)> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                simulators
                    .par_iter_mut()
                    .enumerate()
                    .filter(|(index, _)| select(*index))
                    .map(|(index, sim)| (index, op(index, sim)))
                    .collect()
            }),
            None => simulators
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| select(*index))
                .map(|(index, sim)| (index, op(index, sim)))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decimation arithmetic
// ---------------------------------------------------------------------------

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

pub(crate) fn lcm(a: i64, b: i64) -> i64 {
    a / gcd(a, b) * b
}

/// Derive a decimation factor from a step-size hint: the largest whole
/// multiple of the base step not exceeding the hint, at least 1. A non-whole
/// hint is rounded down with a warning.
pub(crate) fn calculate_decimation_factor(
    name: &str,
    base_step_size: Duration,
    step_size_hint: Duration,
) -> i64 {
    if step_size_hint == Duration::ZERO {
        return 1;
    }
    let quot = step_size_hint.as_nanos() / base_step_size.as_nanos();
    let rem = step_size_hint.as_nanos() % base_step_size.as_nanos();
    let factor = quot.max(1);
    if rem > 0 || quot < 1 {
        let actual = base_step_size * factor;
        warn!(
            simulator = name,
            "effective step size will be {} s instead of configured value {} s",
            duration_to_secs(actual, TimePoint::ZERO),
            duration_to_secs(step_size_hint, TimePoint::ZERO),
        );
    }
    factor
}

// ---------------------------------------------------------------------------
// Scheduler core
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct SimulatorInfo {
    pub(crate) decimation_factor: i64,
    pub(crate) outgoing_sim_connections: Vec<SimToSimConnection>,
    pub(crate) outgoing_fun_connections: Vec<SimToFunConnection>,
}

#[derive(Default)]
pub(crate) struct FunctionInfo {
    pub(crate) decimation_factor: i64,
    pub(crate) outgoing_sim_connections: Vec<FunToSimConnection>,
}

/// Connection tables, decimation bookkeeping, and fan-out phases shared by
/// both scheduler kinds.
pub(crate) struct SchedulerCore {
    start_time: TimePoint,
    stop_time: Option<TimePoint>,
    simulators: BTreeMap<SimulatorIndex, SimulatorInfo>,
    functions: BTreeMap<FunctionIndex, FunctionInfo>,
    step_counter: i64,
    pool: WorkerPool,
}

impl SchedulerCore {
    pub(crate) fn new(worker_count: Option<usize>) -> Self {
        Self {
            start_time: TimePoint::ZERO,
            stop_time: None,
            simulators: BTreeMap::new(),
            functions: BTreeMap::new(),
            step_counter: 0,
            pool: WorkerPool::new(worker_count),
        }
    }

    pub(crate) fn step_counter(&self) -> i64 {
        self.step_counter
    }

    pub(crate) fn add_simulator(&mut self, index: SimulatorIndex, decimation_factor: i64) {
        debug_assert!(!self.simulators.contains_key(&index));
        self.simulators.insert(
            index,
            SimulatorInfo {
                decimation_factor,
                ..SimulatorInfo::default()
            },
        );
    }

    pub(crate) fn add_function(&mut self, index: FunctionIndex) {
        debug_assert!(!self.functions.contains_key(&index));
        self.functions.insert(
            index,
            FunctionInfo {
                decimation_factor: 1,
                ..FunctionInfo::default()
            },
        );
    }

    pub(crate) fn decimation_factor(&self, index: SimulatorIndex) -> i64 {
        self.simulators
            .get(&index)
            .map(|info| info.decimation_factor)
            .unwrap_or(1)
    }

    pub(crate) fn set_decimation_factor(&mut self, index: SimulatorIndex, factor: i64) {
        if let Some(info) = self.simulators.get_mut(&index) {
            info.decimation_factor = factor;
        }
        // Derived function factors depend on their consumers' factors.
        self.update_function_decimation_factors();
    }

    pub(crate) fn setup(&mut self, start_time: TimePoint, stop_time: Option<TimePoint>) {
        self.start_time = start_time;
        self.stop_time = stop_time;
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    pub(crate) fn connect_sim_to_sim(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: VariableId,
        target: VariableId,
    ) -> Result<(), SimulatorError> {
        simulators[source.simulator].expose_for_getting(source.variable_type, source.reference)?;
        simulators[target.simulator].expose_for_setting(target.variable_type, target.reference)?;
        if let Some(info) = self.simulators.get_mut(&source.simulator) {
            info.outgoing_sim_connections
                .push(SimToSimConnection { source, target });
        }
        Ok(())
    }

    pub(crate) fn connect_sim_to_fun(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: VariableId,
        target: FunctionIoId,
    ) -> Result<(), SimulatorError> {
        simulators[source.simulator].expose_for_getting(source.variable_type, source.reference)?;
        if let Some(info) = self.simulators.get_mut(&source.simulator) {
            info.outgoing_fun_connections
                .push(SimToFunConnection { source, target });
        }
        Ok(())
    }

    pub(crate) fn connect_fun_to_sim(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: FunctionIoId,
        target: VariableId,
    ) -> Result<(), SimulatorError> {
        simulators[target.simulator].expose_for_setting(target.variable_type, target.reference)?;
        if let Some(info) = self.functions.get_mut(&source.function) {
            info.outgoing_sim_connections
                .push(FunToSimConnection { source, target });
        }
        self.update_function_decimation_factors();
        Ok(())
    }

    /// Remove the single edge terminating at a subsimulator input.
    pub(crate) fn disconnect_variable(&mut self, target: VariableId) {
        for info in self.simulators.values_mut() {
            let before = info.outgoing_sim_connections.len();
            info.outgoing_sim_connections.retain(|c| c.target != target);
            if info.outgoing_sim_connections.len() != before {
                return;
            }
        }
        for info in self.functions.values_mut() {
            let before = info.outgoing_sim_connections.len();
            info.outgoing_sim_connections.retain(|c| c.target != target);
            if info.outgoing_sim_connections.len() != before {
                return;
            }
        }
    }

    /// Remove the single edge terminating at a function input.
    pub(crate) fn disconnect_function_io(&mut self, target: FunctionIoId) {
        for info in self.simulators.values_mut() {
            let before = info.outgoing_fun_connections.len();
            info.outgoing_fun_connections.retain(|c| c.target != target);
            if info.outgoing_fun_connections.len() != before {
                return;
            }
        }
    }

    fn update_function_decimation_factors(&mut self) {
        for info in self.functions.values_mut() {
            info.decimation_factor = info.outgoing_sim_connections.iter().fold(1, |current, c| {
                let consumer = self
                    .simulators
                    .get(&c.target.simulator)
                    .map(|s| s.decimation_factor)
                    .unwrap_or(1);
                lcm(current, consumer)
            });
        }
    }

    // -----------------------------------------------------------------------
    // Fan-out phases
    // -----------------------------------------------------------------------

    /// Parallel `setup` on all subsimulators, then the fixed-point
    /// initial-value iterations, then parallel `start_simulation`.
    pub(crate) fn initialize(
        &mut self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        let start_time = self.start_time;
        let stop_time = self.stop_time;
        let results = self.pool.for_each_simulator(
            simulators,
            |_| true,
            |_, sim| sim.setup(start_time, stop_time, None),
        );
        aggregate_failures(results.into_iter().map(|(_, r)| r))?;

        // Run N iterations of the subsimulators' and functions' iteration and
        // calculation procedures, where N is the number of entities in the
        // system, to propagate initial values to a fixed point.
        let iterations = self.simulators.len() + self.functions.len();
        for _ in 0..iterations {
            let results = self
                .pool
                .for_each_simulator(simulators, |_| true, |_, sim| sim.do_iteration());
            aggregate_failures(results.into_iter().map(|(_, r)| r))?;
            self.calculate_and_transfer(simulators, functions)?;
        }

        let results = self
            .pool
            .for_each_simulator(simulators, |_| true, |_, sim| sim.start_simulation());
        aggregate_failures(results.into_iter().map(|(_, r)| r))?;
        Ok(())
    }

    /// Dispatch `do_step` to every subsimulator whose decimation factor
    /// divides the step counter, increment the counter, and return the set
    /// of subsimulators that finished a step this tick.
    ///
    /// Steps run in parallel through the worker pool; any non-complete
    /// result or error is aggregated into a single failure after the join.
    pub(crate) fn dispatch_steps(
        &mut self,
        current_time: TimePoint,
        step_size: Duration,
        simulators: &mut [SlaveSimulator],
    ) -> Result<BTreeSet<SimulatorIndex>, SchedulerError> {
        let counter = self.step_counter;
        let factors: BTreeMap<SimulatorIndex, i64> = self
            .simulators
            .iter()
            .map(|(index, info)| (*index, info.decimation_factor))
            .collect();

        let results = self.pool.for_each_simulator(
            simulators,
            |index| factors.get(&index).is_some_and(|df| counter % df == 0),
            |index, sim| {
                let df = factors.get(&index).copied().unwrap_or(1);
                sim.do_step(current_time, step_size * df)
            },
        );

        self.step_counter += 1;
        let finished: BTreeSet<SimulatorIndex> = self
            .simulators
            .iter()
            .filter(|(_, info)| self.step_counter % info.decimation_factor == 0)
            .map(|(index, _)| *index)
            .collect();

        let mut message = String::new();
        let mut failed = false;
        for (index, result) in results {
            match result {
                Ok(StepResult::Complete) => {}
                Ok(_) => {
                    let _ = writeln!(message, "{}: step not complete", simulators[index].name());
                    failed = true;
                }
                Err(e) => {
                    let _ = writeln!(message, "{e}");
                    failed = true;
                }
            }
        }
        if failed {
            return Err(SchedulerError::SimulationFailed { message });
        }

        Ok(finished)
    }

    // -----------------------------------------------------------------------
    // Variable transfer
    // -----------------------------------------------------------------------

    /// Transfer the outputs of subsimulators that finished within the
    /// current tick, then run due functions and transfer their outputs.
    pub(crate) fn calculate_and_transfer(
        &self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        for info in self.simulators.values() {
            if self.step_counter % info.decimation_factor == 0 {
                self.transfer_sim_connections(simulators, &info.outgoing_sim_connections)?;
                self.transfer_fun_connections(simulators, functions, &info.outgoing_fun_connections)?;
            }
        }
        self.calculate_and_transfer_functions(simulators, functions)
    }

    /// Transfer outgoing edges for an explicit finished set (used by the
    /// adaptive scheduler, whose finished set is computed before transfer).
    pub(crate) fn transfer_finished(
        &self,
        finished: &BTreeSet<SimulatorIndex>,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        for index in finished {
            let Some(info) = self.simulators.get(index) else {
                continue;
            };
            self.transfer_sim_connections(simulators, &info.outgoing_sim_connections)?;
            self.transfer_fun_connections(simulators, functions, &info.outgoing_fun_connections)?;
        }
        self.calculate_and_transfer_functions(simulators, functions)
    }

    fn calculate_and_transfer_functions(
        &self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        for (index, info) in &self.functions {
            if self.step_counter % info.decimation_factor == 0 {
                functions[*index].calculate()?;
                self.transfer_fun_to_sim_connections(
                    simulators,
                    functions,
                    &info.outgoing_sim_connections,
                )?;
            }
        }
        Ok(())
    }

    fn transfer_sim_connections(
        &self,
        simulators: &mut [SlaveSimulator],
        connections: &[SimToSimConnection],
    ) -> Result<(), SchedulerError> {
        for c in connections {
            let sdf = self.decimation_factor(c.source.simulator);
            let tdf = self.decimation_factor(c.target.simulator);
            if self.step_counter % lcm(sdf, tdf) == 0 {
                transfer_sim_to_sim(simulators, c)?;
            }
        }
        Ok(())
    }

    fn transfer_fun_connections(
        &self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
        connections: &[SimToFunConnection],
    ) -> Result<(), SchedulerError> {
        for c in connections {
            let sdf = self.decimation_factor(c.source.simulator);
            let tdf = self
                .functions
                .get(&c.target.function)
                .map(|f| f.decimation_factor)
                .unwrap_or(1);
            if self.step_counter % lcm(sdf, tdf) == 0 {
                transfer_sim_to_fun(simulators, functions, c)?;
            }
        }
        Ok(())
    }

    fn transfer_fun_to_sim_connections(
        &self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
        connections: &[FunToSimConnection],
    ) -> Result<(), SchedulerError> {
        for c in connections {
            let sdf = self
                .functions
                .get(&c.source.function)
                .map(|f| f.decimation_factor)
                .unwrap_or(1);
            let tdf = self.decimation_factor(c.target.simulator);
            if self.step_counter % lcm(sdf, tdf) == 0 {
                transfer_fun_to_sim(simulators, functions, c)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-edge transfers
// ---------------------------------------------------------------------------

fn transfer_sim_to_sim(
    simulators: &mut [SlaveSimulator],
    c: &SimToSimConnection,
) -> Result<(), SchedulerError> {
    debug_assert_eq!(c.source.variable_type, c.target.variable_type);
    match c.target.variable_type {
        VariableType::Real => {
            let v = simulators[c.source.simulator].get_real(c.source.reference)?;
            simulators[c.target.simulator].set_real(c.target.reference, v)?;
        }
        VariableType::Integer => {
            let v = simulators[c.source.simulator].get_integer(c.source.reference)?;
            simulators[c.target.simulator].set_integer(c.target.reference, v)?;
        }
        VariableType::Boolean => {
            let v = simulators[c.source.simulator].get_boolean(c.source.reference)?;
            simulators[c.target.simulator].set_boolean(c.target.reference, v)?;
        }
        VariableType::String => {
            let v = simulators[c.source.simulator]
                .get_string(c.source.reference)?
                .to_owned();
            simulators[c.target.simulator].set_string(c.target.reference, &v)?;
        }
        VariableType::Enumeration => {
            return Err(SimulatorError::UnsupportedType {
                simulator: simulators[c.target.simulator].name().to_owned(),
                variable_type: VariableType::Enumeration,
            }
            .into());
        }
    }
    Ok(())
}

fn transfer_sim_to_fun(
    simulators: &mut [SlaveSimulator],
    functions: &mut [Box<dyn Function>],
    c: &SimToFunConnection,
) -> Result<(), SchedulerError> {
    debug_assert_eq!(c.source.variable_type, c.target.variable_type);
    let function = &mut functions[c.target.function];
    match c.target.variable_type {
        VariableType::Real => {
            let v = simulators[c.source.simulator].get_real(c.source.reference)?;
            function.set_real(c.target.reference, v)?;
        }
        VariableType::Integer => {
            let v = simulators[c.source.simulator].get_integer(c.source.reference)?;
            function.set_integer(c.target.reference, v)?;
        }
        VariableType::Boolean => {
            let v = simulators[c.source.simulator].get_boolean(c.source.reference)?;
            function.set_boolean(c.target.reference, v)?;
        }
        VariableType::String => {
            let v = simulators[c.source.simulator]
                .get_string(c.source.reference)?
                .to_owned();
            function.set_string(c.target.reference, &v)?;
        }
        VariableType::Enumeration => {
            return Err(SimulatorError::UnsupportedType {
                simulator: simulators[c.source.simulator].name().to_owned(),
                variable_type: VariableType::Enumeration,
            }
            .into());
        }
    }
    Ok(())
}

fn transfer_fun_to_sim(
    simulators: &mut [SlaveSimulator],
    functions: &mut [Box<dyn Function>],
    c: &FunToSimConnection,
) -> Result<(), SchedulerError> {
    debug_assert_eq!(c.source.variable_type, c.target.variable_type);
    let function = &functions[c.source.function];
    match c.target.variable_type {
        VariableType::Real => {
            let v = function.get_real(c.source.reference)?;
            simulators[c.target.simulator].set_real(c.target.reference, v)?;
        }
        VariableType::Integer => {
            let v = function.get_integer(c.source.reference)?;
            simulators[c.target.simulator].set_integer(c.target.reference, v)?;
        }
        VariableType::Boolean => {
            let v = function.get_boolean(c.source.reference)?;
            simulators[c.target.simulator].set_boolean(c.target.reference, v)?;
        }
        VariableType::String => {
            let v = function.get_string(c.source.reference)?;
            simulators[c.target.simulator].set_string(c.target.reference, &v)?;
        }
        VariableType::Enumeration => {
            return Err(SimulatorError::UnsupportedType {
                simulator: simulators[c.target.simulator].name().to_owned(),
                variable_type: VariableType::Enumeration,
            }
            .into());
        }
    }
    Ok(())
}

fn aggregate_failures(
    results: impl Iterator<Item = Result<(), SimulatorError>>,
) -> Result<(), SchedulerError> {
    let mut message = String::new();
    let mut failed = false;
    for result in results {
        if let Err(e) = result {
            let _ = writeln!(message, "{e}");
            failed = true;
        }
    }
    if failed {
        return Err(SchedulerError::SimulationFailed { message });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduler dispatch
// ---------------------------------------------------------------------------

/// The co-simulation scheduler: a closed set of kinds known at compile time.
pub enum Scheduler {
    FixedStep(FixedStepScheduler),
    Ecco(EccoScheduler),
}

impl Scheduler {
    pub(crate) fn setup(&mut self, start_time: TimePoint, stop_time: Option<TimePoint>) {
        match self {
            Scheduler::FixedStep(s) => s.core_mut().setup(start_time, stop_time),
            Scheduler::Ecco(s) => s.core_mut().setup(start_time, stop_time),
        }
    }

    pub(crate) fn add_simulator(
        &mut self,
        index: SimulatorIndex,
        name: &str,
        step_size_hint: Duration,
    ) {
        match self {
            Scheduler::FixedStep(s) => s.add_simulator(index, name, step_size_hint),
            Scheduler::Ecco(s) => s.add_simulator(index, name, step_size_hint),
        }
    }

    pub(crate) fn add_function(&mut self, index: FunctionIndex) {
        match self {
            Scheduler::FixedStep(s) => s.core_mut().add_function(index),
            Scheduler::Ecco(s) => s.core_mut().add_function(index),
        }
    }

    pub(crate) fn connect_sim_to_sim(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: VariableId,
        target: VariableId,
    ) -> Result<(), SimulatorError> {
        self.core_mut().connect_sim_to_sim(simulators, source, target)
    }

    pub(crate) fn connect_sim_to_fun(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: VariableId,
        target: FunctionIoId,
    ) -> Result<(), SimulatorError> {
        self.core_mut().connect_sim_to_fun(simulators, source, target)
    }

    pub(crate) fn connect_fun_to_sim(
        &mut self,
        simulators: &mut [SlaveSimulator],
        source: FunctionIoId,
        target: VariableId,
    ) -> Result<(), SimulatorError> {
        self.core_mut().connect_fun_to_sim(simulators, source, target)
    }

    pub(crate) fn disconnect_variable(&mut self, target: VariableId) {
        self.core_mut().disconnect_variable(target);
    }

    pub(crate) fn disconnect_function_io(&mut self, target: FunctionIoId) {
        self.core_mut().disconnect_function_io(target);
    }

    pub(crate) fn initialize(
        &mut self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        match self {
            Scheduler::FixedStep(s) => s.initialize(simulators, functions),
            Scheduler::Ecco(s) => s.initialize(simulators, functions),
        }
    }

    pub(crate) fn do_step(
        &mut self,
        current_time: TimePoint,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(Duration, BTreeSet<SimulatorIndex>), SchedulerError> {
        match self {
            Scheduler::FixedStep(s) => s.do_step(current_time, simulators, functions),
            Scheduler::Ecco(s) => s.do_step(current_time, simulators, functions),
        }
    }

    /// Override a subsimulator's decimation factor. Must be called after the
    /// subsimulator has been added.
    pub fn set_decimation_factor(&mut self, index: SimulatorIndex, factor: i64) {
        assert!(factor > 0, "decimation factor must be positive");
        self.core_mut().set_decimation_factor(index, factor);
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        match self {
            Scheduler::FixedStep(s) => s.core_mut(),
            Scheduler::Ecco(s) => s.core_mut(),
        }
    }
}

impl From<FixedStepScheduler> for Scheduler {
    fn from(s: FixedStepScheduler) -> Self {
        Scheduler::FixedStep(s)
    }
}

impl From<EccoScheduler> for Scheduler {
    fn from(s: EccoScheduler) -> Self {
        Scheduler::Ecco(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcm_of_common_factors() {
        assert_eq!(lcm(1, 1), 1);
        assert_eq!(lcm(2, 3), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(5, 5), 5);
    }

    #[test]
    fn decimation_factor_from_whole_hint() {
        let base = Duration::from_nanos(100);
        assert_eq!(calculate_decimation_factor("s", base, Duration::ZERO), 1);
        assert_eq!(
            calculate_decimation_factor("s", base, Duration::from_nanos(100)),
            1
        );
        assert_eq!(
            calculate_decimation_factor("s", base, Duration::from_nanos(300)),
            3
        );
    }

    #[test]
    fn decimation_factor_rounds_down_non_whole_hints() {
        let base = Duration::from_nanos(100);
        // 250 ns is not a whole multiple; nearest multiple <= hint is 2.
        assert_eq!(
            calculate_decimation_factor("s", base, Duration::from_nanos(250)),
            2
        );
        // Hints below the base step clamp to 1.
        assert_eq!(
            calculate_decimation_factor("s", base, Duration::from_nanos(50)),
            1
        );
    }

    #[test]
    fn worker_pool_zero_is_synchronous() {
        let pool = WorkerPool::new(Some(0));
        assert!(pool.pool.is_none());
        let mut simulators: Vec<crate::simulator::SlaveSimulator> = Vec::new();
        let results = pool.for_each_simulator(&mut simulators, |_| true, |i, _| i);
        assert!(results.is_empty());
    }
}
