//! The execution runner.
//!
//! An [`Execution`] owns the scheduler, the subsimulator and function
//! tables, and the connection maps; observers and manipulators are shared
//! handles. It drives the per-step data flow: manipulator hooks → scheduler
//! dispatch → time/counter advance → observer hooks, with lazy
//! initialisation on the first step.
//!
//! Entity tables are mutated only between steps, from the owning thread.
//! The stop flag is atomic and may be set from any thread through a
//! [`StopHandle`]; the running loop honours it after completing the current
//! macro step.

use crate::connection::{
    ConnectionError, FunctionIndex, FunctionIoId, SimulatorIndex, StepNumber, VariableId,
};
use crate::function::Function;
use crate::manipulator::{Manipulator, SharedManipulator};
use crate::model::{ModelDescription, ValueReference, VariableCausality, VariableType};
use crate::observer::{Observer, SharedObserver};
use crate::pacing::{RealTimeConfig, RealTimeMetrics, RealTimeTimer};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::serialize::StateNode;
use crate::simulator::{SimulatorError, SlaveSimulator, SlaveState};
use crate::slave::Slave;
use crate::time::{Duration, TimePoint};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Relative tolerance used when deciding whether the end time was reached.
const STOP_TIME_TOLERANCE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by the execution runner.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A request outside the core's promise, e.g. setting initial values
    /// after initialisation or snapshotting an incapable slave.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Simulator(#[from] SimulatorError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// An imported state tree did not have the expected shape.
    #[error("malformed state tree: {0}")]
    MalformedState(String),
}

// ---------------------------------------------------------------------------
// Stop handle
// ---------------------------------------------------------------------------

/// Cloneable handle for stopping a running simulation from any thread.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop. The simulation loop finishes its current macro step
    /// and then returns.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// A co-simulation run: subsimulators, functions, connections, hooks, and
/// the scheduler that advances them along a common time axis.
pub struct Execution {
    current_time: TimePoint,
    last_step: StepNumber,
    initialized: bool,
    stopped: Arc<AtomicBool>,

    scheduler: Scheduler,
    simulators: Vec<SlaveSimulator>,
    functions: Vec<Box<dyn Function>>,
    observers: Vec<SharedObserver>,
    manipulators: Vec<SharedManipulator>,

    // Destination-keyed connection maps, used to reject duplicate inputs.
    ss_connections: HashMap<VariableId, VariableId>,
    sf_connections: HashMap<FunctionIoId, VariableId>,
    fs_connections: HashMap<VariableId, FunctionIoId>,

    timer: RealTimeTimer,
}

impl Execution {
    /// Create an execution starting at `start_time`, driven by the given
    /// scheduler.
    pub fn new(start_time: TimePoint, scheduler: impl Into<Scheduler>) -> Self {
        let mut scheduler = scheduler.into();
        scheduler.setup(start_time, None);
        Self {
            current_time: start_time,
            last_step: 0,
            initialized: false,
            stopped: Arc::new(AtomicBool::new(true)),
            scheduler,
            simulators: Vec::new(),
            functions: Vec::new(),
            observers: Vec::new(),
            manipulators: Vec::new(),
            ss_connections: HashMap::new(),
            sf_connections: HashMap::new(),
            fs_connections: HashMap::new(),
            timer: RealTimeTimer::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Wrap and register a slave. Returns its dense index.
    pub fn add_slave(
        &mut self,
        slave: Box<dyn Slave>,
        name: impl Into<String>,
        step_size_hint: Option<Duration>,
    ) -> SimulatorIndex {
        let index = self.simulators.len();
        self.simulators.push(SlaveSimulator::new(slave, name));
        let simulator = &mut self.simulators[index];
        self.scheduler.add_simulator(
            index,
            simulator.name(),
            step_size_hint.unwrap_or(Duration::ZERO),
        );
        for observer in &self.observers {
            observer
                .lock()
                .simulator_added(index, simulator, self.current_time);
        }
        for manipulator in &self.manipulators {
            manipulator
                .lock()
                .simulator_added(index, simulator, self.current_time);
        }
        index
    }

    /// Register a function instance. Returns its dense index.
    pub fn add_function(&mut self, function: Box<dyn Function>) -> FunctionIndex {
        let index = self.functions.len();
        self.functions.push(function);
        self.scheduler.add_function(index);
        index
    }

    /// Attach an observer. It is immediately told about all existing
    /// subsimulators and, if initialisation already happened, about that
    /// too.
    pub fn add_observer(&mut self, observer: SharedObserver) {
        {
            let mut obs = observer.lock();
            for (index, simulator) in self.simulators.iter().enumerate() {
                obs.simulator_added(index, simulator, self.current_time);
            }
            if self.initialized {
                obs.simulation_initialized(self.last_step, self.current_time);
            }
        }
        self.observers.push(observer);
    }

    /// Attach a manipulator. It is immediately told about all existing
    /// subsimulators.
    pub fn add_manipulator(&mut self, manipulator: SharedManipulator) {
        {
            let mut man = manipulator.lock();
            for (index, simulator) in self.simulators.iter_mut().enumerate() {
                man.simulator_added(index, simulator, self.current_time);
            }
        }
        self.manipulators.push(manipulator);
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Connect a subsimulator output to a subsimulator input.
    pub fn connect_variables(
        &mut self,
        source: VariableId,
        target: VariableId,
    ) -> Result<(), ExecutionError> {
        self.validate_source_variable(source)?;
        self.validate_target_variable(target)?;
        if source.variable_type != target.variable_type {
            return Err(ConnectionError::TypeMismatch {
                source_type: source.variable_type,
                target: target.variable_type,
            }
            .into());
        }
        if self.ss_connections.contains_key(&target) || self.fs_connections.contains_key(&target) {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        self.scheduler
            .connect_sim_to_sim(&mut self.simulators, source, target)?;
        self.ss_connections.insert(target, source);
        Ok(())
    }

    /// Connect a subsimulator output to a function input.
    pub fn connect_variable_to_function(
        &mut self,
        source: VariableId,
        target: FunctionIoId,
    ) -> Result<(), ExecutionError> {
        self.validate_source_variable(source)?;
        self.validate_function_io(target, VariableCausality::Input)?;
        if source.variable_type != target.variable_type {
            return Err(ConnectionError::TypeMismatch {
                source_type: source.variable_type,
                target: target.variable_type,
            }
            .into());
        }
        if source.variable_type == VariableType::String {
            return Err(ConnectionError::UnsupportedType(VariableType::String).into());
        }
        if self.sf_connections.contains_key(&target) {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        self.scheduler
            .connect_sim_to_fun(&mut self.simulators, source, target)?;
        self.sf_connections.insert(target, source);
        Ok(())
    }

    /// Connect a function output to a subsimulator input.
    pub fn connect_function_to_variable(
        &mut self,
        source: FunctionIoId,
        target: VariableId,
    ) -> Result<(), ExecutionError> {
        self.validate_function_io(source, VariableCausality::Output)?;
        self.validate_target_variable(target)?;
        if source.variable_type != target.variable_type {
            return Err(ConnectionError::TypeMismatch {
                source_type: source.variable_type,
                target: target.variable_type,
            }
            .into());
        }
        if source.variable_type == VariableType::String {
            return Err(ConnectionError::UnsupportedType(VariableType::String).into());
        }
        if self.fs_connections.contains_key(&target) || self.ss_connections.contains_key(&target) {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        self.scheduler
            .connect_fun_to_sim(&mut self.simulators, source, target)?;
        self.fs_connections.insert(target, source);
        Ok(())
    }

    /// Remove the connection terminating at a subsimulator input.
    pub fn disconnect_variable(&mut self, target: VariableId) {
        self.ss_connections.remove(&target);
        self.fs_connections.remove(&target);
        self.scheduler.disconnect_variable(target);
    }

    /// Remove the connection terminating at a function input.
    pub fn disconnect_function_io(&mut self, target: FunctionIoId) {
        self.sf_connections.remove(&target);
        self.scheduler.disconnect_function_io(target);
    }

    // -----------------------------------------------------------------------
    // Initial values
    // -----------------------------------------------------------------------

    pub fn set_real_initial_value(
        &mut self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: f64,
    ) -> Result<(), ExecutionError> {
        self.require_uninitialized()?;
        let sim = self.simulator_mut_checked(simulator)?;
        sim.expose_for_setting(VariableType::Real, reference)?;
        sim.set_real(reference, value)?;
        Ok(())
    }

    pub fn set_integer_initial_value(
        &mut self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: i32,
    ) -> Result<(), ExecutionError> {
        self.require_uninitialized()?;
        let sim = self.simulator_mut_checked(simulator)?;
        sim.expose_for_setting(VariableType::Integer, reference)?;
        sim.set_integer(reference, value)?;
        Ok(())
    }

    pub fn set_boolean_initial_value(
        &mut self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: bool,
    ) -> Result<(), ExecutionError> {
        self.require_uninitialized()?;
        let sim = self.simulator_mut_checked(simulator)?;
        sim.expose_for_setting(VariableType::Boolean, reference)?;
        sim.set_boolean(reference, value)?;
        Ok(())
    }

    pub fn set_string_initial_value(
        &mut self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: &str,
    ) -> Result<(), ExecutionError> {
        self.require_uninitialized()?;
        let sim = self.simulator_mut_checked(simulator)?;
        sim.expose_for_setting(VariableType::String, reference)?;
        sim.set_string(reference, value)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the simulation by one macro step. The first call triggers
    /// scheduler initialisation (fixed-point initial-value propagation).
    /// Returns the step size that was applied.
    pub fn step(&mut self) -> Result<Duration, ExecutionError> {
        if !self.initialized {
            debug!("initializing execution");
            self.scheduler
                .initialize(&mut self.simulators, &mut self.functions)?;
            self.initialized = true;
            for observer in &self.observers {
                observer
                    .lock()
                    .simulation_initialized(self.last_step, self.current_time);
            }
        }
        for manipulator in &self.manipulators {
            manipulator
                .lock()
                .step_commencing(self.current_time, &mut self.simulators)?;
        }
        let (step_size, finished) =
            self.scheduler
                .do_step(self.current_time, &mut self.simulators, &mut self.functions)?;
        self.current_time += step_size;
        self.last_step += 1;
        for observer in &self.observers {
            let mut obs = observer.lock();
            for index in &finished {
                obs.simulator_step_complete(
                    *index,
                    self.last_step,
                    step_size,
                    self.current_time,
                    &self.simulators[*index],
                );
            }
            obs.step_complete(self.last_step, step_size, self.current_time, &self.simulators);
        }
        Ok(step_size)
    }

    /// Step repeatedly, interleaved with pacing sleeps, until `end_time` is
    /// reached (within 1 % of a step) or the stop flag is set.
    ///
    /// Returns `Ok(true)` if the end was reached and `Ok(false)` if the run
    /// was stopped externally. With no end time, only a stop ends the loop.
    pub fn simulate_until(
        &mut self,
        end_time: Option<TimePoint>,
    ) -> Result<bool, ExecutionError> {
        self.stopped.store(false, Ordering::Release);
        self.timer.start(self.current_time);
        let completed = loop {
            let step_size = match self.step() {
                Ok(step_size) => step_size,
                Err(e) => {
                    self.stopped.store(true, Ordering::Release);
                    return Err(e);
                }
            };
            self.timer.sleep(self.current_time);
            if self.stopped.load(Ordering::Acquire) {
                break false;
            }
            if end_time_reached(end_time, self.current_time, step_size) {
                break true;
            }
        };
        self.stopped.store(true, Ordering::Release);
        Ok(completed)
    }

    /// Run [`Execution::simulate_until`] on a dedicated thread. The
    /// execution moves into the thread and comes back from
    /// [`AsyncSimulation::join`].
    pub fn simulate_until_async(self, end_time: Option<TimePoint>) -> AsyncSimulation {
        let stop = self.stop_handle();
        let mut execution = self;
        let handle = std::thread::spawn(move || {
            let result = execution.simulate_until(end_time);
            (execution, result)
        });
        AsyncSimulation { stop, handle }
    }

    /// Set the stop flag. Safe to call from any thread via
    /// [`Execution::stop_handle`].
    pub fn stop_simulation(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// A cloneable handle to the stop flag.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stopped))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn current_time(&self) -> TimePoint {
        self.current_time
    }

    /// The number of completed macro steps.
    pub fn step_number(&self) -> StepNumber {
        self.last_step
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    pub fn simulator(&self, index: SimulatorIndex) -> Option<&SlaveSimulator> {
        self.simulators.get(index)
    }

    /// Mutable access to a subsimulator. Only valid between steps, from the
    /// owning thread.
    pub fn simulator_mut(&mut self, index: SimulatorIndex) -> Option<&mut SlaveSimulator> {
        self.simulators.get_mut(index)
    }

    pub fn simulator_count(&self) -> usize {
        self.simulators.len()
    }

    pub fn model_description(&self, index: SimulatorIndex) -> Option<&ModelDescription> {
        self.simulators.get(index).map(|s| s.model_description())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mutable scheduler access, e.g. for decimation-factor overrides or
    /// power-bond registration. Only valid between steps.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn real_time_config(&self) -> Arc<RealTimeConfig> {
        self.timer.config()
    }

    pub fn real_time_metrics(&self) -> Arc<RealTimeMetrics> {
        self.timer.metrics()
    }

    /// All variables that currently have an input or output modifier
    /// installed, across all subsimulators.
    pub fn get_modified_variables(&self) -> Vec<VariableId> {
        let mut modified = Vec::new();
        for (index, sim) in self.simulators.iter().enumerate() {
            for &reference in sim.modified_real_variables() {
                modified.push(VariableId {
                    simulator: index,
                    variable_type: VariableType::Real,
                    reference,
                });
            }
            for &reference in sim.modified_integer_variables() {
                modified.push(VariableId {
                    simulator: index,
                    variable_type: VariableType::Integer,
                    reference,
                });
            }
            for &reference in sim.modified_boolean_variables() {
                modified.push(VariableId {
                    simulator: index,
                    variable_type: VariableType::Boolean,
                    reference,
                });
            }
            for &reference in sim.modified_string_variables() {
                modified.push(VariableId {
                    simulator: index,
                    variable_type: VariableType::String,
                    reference,
                });
            }
        }
        modified
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Export the execution state as a snapshot tree. Every slave must have
    /// the save-state capability.
    pub fn export_state(&self) -> Result<StateNode, ExecutionError> {
        let mut simulators = BTreeMap::new();
        for (index, sim) in self.simulators.iter().enumerate() {
            if !sim.model_description().capabilities.can_save_state {
                return Err(ExecutionError::UnsupportedFeature(format!(
                    "state saving is not supported by simulator '{}'",
                    sim.name()
                )));
            }
            let mut entry = BTreeMap::new();
            entry.insert("name".to_owned(), StateNode::String(sim.name().to_owned()));
            if let Some(state) = sim.save_state()? {
                entry.insert("state".to_owned(), state);
            }
            simulators.insert(index.to_string(), StateNode::Branch(entry));
        }
        Ok(StateNode::branch([
            (
                "time",
                StateNode::Integer(self.current_time.as_nanos()),
            ),
            ("step", StateNode::Integer(self.last_step)),
            ("initialized", StateNode::Boolean(self.initialized)),
            ("simulators", StateNode::Branch(simulators)),
        ]))
    }

    /// Restore state previously produced by [`Execution::export_state`].
    /// The execution must contain the same subsimulators in the same order.
    pub fn import_state(&mut self, state: &StateNode) -> Result<(), ExecutionError> {
        let time = state
            .child("time")
            .and_then(StateNode::as_integer)
            .ok_or_else(|| ExecutionError::MalformedState("missing 'time'".into()))?;
        let step = state
            .child("step")
            .and_then(StateNode::as_integer)
            .ok_or_else(|| ExecutionError::MalformedState("missing 'step'".into()))?;
        let initialized = state
            .child("initialized")
            .and_then(StateNode::as_boolean)
            .ok_or_else(|| ExecutionError::MalformedState("missing 'initialized'".into()))?;
        let simulators = state
            .child("simulators")
            .ok_or_else(|| ExecutionError::MalformedState("missing 'simulators'".into()))?;

        for (index, sim) in self.simulators.iter_mut().enumerate() {
            let entry = simulators.child(&index.to_string()).ok_or_else(|| {
                ExecutionError::MalformedState(format!("missing simulator entry {index}"))
            })?;
            if let Some(slave_state) = entry.child("state") {
                sim.restore_state(slave_state)?;
            }
        }

        self.current_time = TimePoint::from_nanos(time);
        self.last_step = step;
        self.initialized = initialized;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation helpers
    // -----------------------------------------------------------------------

    fn require_uninitialized(&self) -> Result<(), ExecutionError> {
        if self.initialized {
            return Err(ExecutionError::UnsupportedFeature(
                "initial values must be set before simulation is started".into(),
            ));
        }
        Ok(())
    }

    fn simulator_mut_checked(
        &mut self,
        index: SimulatorIndex,
    ) -> Result<&mut SlaveSimulator, ConnectionError> {
        self.simulators
            .get_mut(index)
            .ok_or(ConnectionError::NoSuchSimulator(index))
    }

    /// A connection source must be an output or calculated parameter.
    fn validate_source_variable(&self, variable: VariableId) -> Result<(), ConnectionError> {
        self.validate_simulator_variable(
            variable,
            &[
                VariableCausality::Output,
                VariableCausality::CalculatedParameter,
            ],
        )
    }

    /// A connection target must be an input.
    fn validate_target_variable(&self, variable: VariableId) -> Result<(), ConnectionError> {
        self.validate_simulator_variable(variable, &[VariableCausality::Input])
    }

    fn validate_simulator_variable(
        &self,
        variable: VariableId,
        allowed: &[VariableCausality],
    ) -> Result<(), ConnectionError> {
        let sim = self
            .simulators
            .get(variable.simulator)
            .ok_or(ConnectionError::NoSuchSimulator(variable.simulator))?;
        let found = sim
            .model_description()
            .variables
            .iter()
            .any(|vd| {
                vd.variable_type == variable.variable_type
                    && vd.reference == variable.reference
                    && allowed.contains(&vd.causality)
            });
        if !found {
            return Err(ConnectionError::NoSuchVariable {
                simulator: variable.simulator,
                name: sim.name().to_owned(),
                variable_type: variable.variable_type,
                causality: allowed[0],
                reference: variable.reference,
            });
        }
        Ok(())
    }

    fn validate_function_io(
        &self,
        io: FunctionIoId,
        causality: VariableCausality,
    ) -> Result<(), ConnectionError> {
        let function = self
            .functions
            .get(io.function)
            .ok_or(ConnectionError::NoSuchFunction(io.function))?;
        let description = function.description();
        let io_description = description.io(io.reference).ok_or({
            ConnectionError::NoSuchFunctionIo {
                group: io.reference.group,
                io: io.reference.io,
            }
        })?;
        if io_description.causality != causality {
            return Err(ConnectionError::FunctionCausalityMismatch);
        }
        if io_description.variable_type != io.variable_type {
            return Err(ConnectionError::TypeMismatch {
                source_type: io.variable_type,
                target: io_description.variable_type,
            });
        }
        Ok(())
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        // Give every live slave an orderly shutdown; failures at teardown
        // have nowhere to go.
        for sim in &mut self.simulators {
            if matches!(
                sim.state(),
                SlaveState::Initialisation | SlaveState::Simulation
            ) {
                let _ = sim.end_simulation();
            }
        }
    }
}

fn end_time_reached(
    end_time: Option<TimePoint>,
    current_time: TimePoint,
    step_size: Duration,
) -> bool {
    match end_time {
        Some(end) => {
            ((end - current_time).as_nanos() as f64)
                < step_size.as_nanos() as f64 * STOP_TIME_TOLERANCE
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Async variant
// ---------------------------------------------------------------------------

/// A simulation loop running on a dedicated thread.
pub struct AsyncSimulation {
    stop: StopHandle,
    handle: std::thread::JoinHandle<(Execution, Result<bool, ExecutionError>)>,
}

impl AsyncSimulation {
    /// Handle for stopping the loop from this or any other thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the loop to finish and take the execution back.
    pub fn join(self) -> (Execution, Result<bool, ExecutionError>) {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
