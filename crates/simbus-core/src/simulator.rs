//! The stateful wrapper around an opaque slave.
//!
//! A [`SlaveSimulator`] adapts a [`Slave`] for use by the scheduler: it
//! enforces the lifecycle state machine, keeps the exposed-variable
//! registries and the per-type I/O caches, and batches all variable traffic
//! so that each lifecycle call performs exactly one bulk set and one bulk
//! get against the slave.
//!
//! # Lifecycle
//!
//! `Created → Initialisation → Simulation → (Terminated | Error)`. During a
//! call into the slave the state is `Indeterminate`; it is restored to the
//! operation's final state on success and collapses to the terminal `Error`
//! state on failure.

use crate::cache::{CacheError, GetCache, Modifier, SetCache};
use crate::model::{
    ModelDescription, ScalarValue, StepResult, ValueReference, VariableCausality,
    VariableDescription, VariableType, VariableVariability,
};
use crate::slave::{Slave, SlaveError};
use crate::time::{Duration, TimePoint};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of a wrapped slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Created,
    Initialisation,
    Simulation,
    Terminated,
    Error,
    /// Transient state held for the duration of any call into the slave.
    Indeterminate,
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SlaveState::Created => "created",
            SlaveState::Initialisation => "initialisation",
            SlaveState::Simulation => "simulation",
            SlaveState::Terminated => "terminated",
            SlaveState::Error => "error",
            SlaveState::Indeterminate => "indeterminate",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by the subsimulator wrapper.
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// A cache precondition failed; the report names the subsimulator and
    /// the offending reference.
    #[error("{simulator}: {variable_type} variable {reference}: {source}")]
    Cache {
        simulator: String,
        variable_type: VariableType,
        reference: ValueReference,
        source: CacheError,
    },
    /// An operation was requested in the wrong lifecycle state.
    #[error("{simulator}: cannot {operation} in state '{state}'")]
    InvalidState {
        simulator: String,
        operation: &'static str,
        state: SlaveState,
    },
    /// The requested variable type cannot be handled by the core.
    #[error("{simulator}: variables of type '{variable_type}' are not supported")]
    UnsupportedType {
        simulator: String,
        variable_type: VariableType,
    },
    /// No variable with the given type and reference exists in the model
    /// description.
    #[error(
        "{simulator}: variable with reference {reference} and type {variable_type} not found \
         in model description"
    )]
    NoSuchVariable {
        simulator: String,
        variable_type: VariableType,
        reference: ValueReference,
    },
    /// The slave reported a fault.
    #[error("{simulator}: {source}")]
    Slave {
        simulator: String,
        source: SlaveError,
    },
}

// ---------------------------------------------------------------------------
// SlaveSimulator
// ---------------------------------------------------------------------------

/// Stateful adapter around an opaque slave.
///
/// Exclusively owned by the execution; created when a slave is added and
/// destroyed on execution teardown.
pub struct SlaveSimulator {
    slave: Box<dyn Slave>,
    name: String,
    model_description: ModelDescription,
    state: SlaveState,

    real_get_cache: GetCache<f64>,
    integer_get_cache: GetCache<i32>,
    boolean_get_cache: GetCache<bool>,
    string_get_cache: GetCache<String>,

    real_set_cache: SetCache<f64>,
    integer_set_cache: SetCache<i32>,
    boolean_set_cache: SetCache<bool>,
    string_set_cache: SetCache<String>,

    modified_real_variables: HashSet<ValueReference>,
    modified_integer_variables: HashSet<ValueReference>,
    modified_boolean_variables: HashSet<ValueReference>,
    modified_string_variables: HashSet<ValueReference>,
}

impl SlaveSimulator {
    /// Wrap a slave. The model description is read once and cached.
    pub fn new(slave: Box<dyn Slave>, name: impl Into<String>) -> Self {
        let model_description = slave.model_description();
        Self {
            slave,
            name: name.into(),
            model_description,
            state: SlaveState::Created,
            real_get_cache: GetCache::new(),
            integer_get_cache: GetCache::new(),
            boolean_get_cache: GetCache::new(),
            string_get_cache: GetCache::new(),
            real_set_cache: SetCache::new(),
            integer_set_cache: SetCache::new(),
            boolean_set_cache: SetCache::new(),
            string_set_cache: SetCache::new(),
            modified_real_variables: HashSet::new(),
            modified_integer_variables: HashSet::new(),
            modified_boolean_variables: HashSet::new(),
            modified_string_variables: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_description(&self) -> &ModelDescription {
        &self.model_description
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    // -----------------------------------------------------------------------
    // Exposure and value access
    // -----------------------------------------------------------------------

    /// Expose a variable for retrieval with the typed getters.
    ///
    /// Selects which variables get transferred from the slave at each step,
    /// so individual getter calls never trigger slave traffic of their own.
    pub fn expose_for_getting(
        &mut self,
        variable_type: VariableType,
        reference: ValueReference,
    ) -> Result<(), SimulatorError> {
        match variable_type {
            VariableType::Real => self.real_get_cache.expose(reference),
            VariableType::Integer => self.integer_get_cache.expose(reference),
            VariableType::Boolean => self.boolean_get_cache.expose(reference),
            VariableType::String => self.string_get_cache.expose(reference),
            VariableType::Enumeration => {
                return Err(self.unsupported_type(VariableType::Enumeration));
            }
        }
        Ok(())
    }

    pub fn get_real(&self, reference: ValueReference) -> Result<f64, SimulatorError> {
        self.real_get_cache
            .get(reference)
            .copied()
            .map_err(|e| self.cache_error(VariableType::Real, reference, e))
    }

    pub fn get_integer(&self, reference: ValueReference) -> Result<i32, SimulatorError> {
        self.integer_get_cache
            .get(reference)
            .copied()
            .map_err(|e| self.cache_error(VariableType::Integer, reference, e))
    }

    pub fn get_boolean(&self, reference: ValueReference) -> Result<bool, SimulatorError> {
        self.boolean_get_cache
            .get(reference)
            .copied()
            .map_err(|e| self.cache_error(VariableType::Boolean, reference, e))
    }

    pub fn get_string(&self, reference: ValueReference) -> Result<&str, SimulatorError> {
        self.string_get_cache
            .get(reference)
            .map(String::as_str)
            .map_err(|e| self.cache_error(VariableType::String, reference, e))
    }

    /// Expose a variable for writing with the typed setters, seeding its
    /// last-known value from the declared start value.
    pub fn expose_for_setting(
        &mut self,
        variable_type: VariableType,
        reference: ValueReference,
    ) -> Result<(), SimulatorError> {
        let description = self
            .model_description
            .find_variable_by_reference(variable_type, reference)
            .ok_or_else(|| SimulatorError::NoSuchVariable {
                simulator: self.name.clone(),
                variable_type,
                reference,
            })?;
        match variable_type {
            VariableType::Real => self
                .real_set_cache
                .expose(reference, start_real(description)),
            VariableType::Integer => self
                .integer_set_cache
                .expose(reference, start_integer(description)),
            VariableType::Boolean => self
                .boolean_set_cache
                .expose(reference, start_boolean(description)),
            VariableType::String => self
                .string_set_cache
                .expose(reference, start_string(description)),
            VariableType::Enumeration => {
                return Err(self.unsupported_type(VariableType::Enumeration));
            }
        }
        Ok(())
    }

    pub fn set_real(&mut self, reference: ValueReference, value: f64) -> Result<(), SimulatorError> {
        self.real_set_cache
            .set_value(reference, value)
            .map_err(|e| cache_error(&self.name, VariableType::Real, reference, e))
    }

    pub fn set_integer(
        &mut self,
        reference: ValueReference,
        value: i32,
    ) -> Result<(), SimulatorError> {
        self.integer_set_cache
            .set_value(reference, value)
            .map_err(|e| cache_error(&self.name, VariableType::Integer, reference, e))
    }

    pub fn set_boolean(
        &mut self,
        reference: ValueReference,
        value: bool,
    ) -> Result<(), SimulatorError> {
        self.boolean_set_cache
            .set_value(reference, value)
            .map_err(|e| cache_error(&self.name, VariableType::Boolean, reference, e))
    }

    pub fn set_string(
        &mut self,
        reference: ValueReference,
        value: &str,
    ) -> Result<(), SimulatorError> {
        self.string_set_cache
            .set_value(reference, value.to_owned())
            .map_err(|e| cache_error(&self.name, VariableType::String, reference, e))
    }

    // -----------------------------------------------------------------------
    // Modifiers
    // -----------------------------------------------------------------------

    /// Install or clear an input modifier on a real variable. Installing
    /// implicitly exposes the variable for setting.
    pub fn set_real_input_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<f64>>,
    ) -> Result<(), SimulatorError> {
        self.expose_for_setting(VariableType::Real, reference)?;
        let installing = modifier.is_some();
        self.real_set_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Real, reference, e))?;
        track_modified(&mut self.modified_real_variables, reference, installing);
        Ok(())
    }

    pub fn set_integer_input_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<i32>>,
    ) -> Result<(), SimulatorError> {
        self.expose_for_setting(VariableType::Integer, reference)?;
        let installing = modifier.is_some();
        self.integer_set_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Integer, reference, e))?;
        track_modified(&mut self.modified_integer_variables, reference, installing);
        Ok(())
    }

    pub fn set_boolean_input_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<bool>>,
    ) -> Result<(), SimulatorError> {
        self.expose_for_setting(VariableType::Boolean, reference)?;
        let installing = modifier.is_some();
        self.boolean_set_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Boolean, reference, e))?;
        track_modified(&mut self.modified_boolean_variables, reference, installing);
        Ok(())
    }

    pub fn set_string_input_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<String>>,
    ) -> Result<(), SimulatorError> {
        self.expose_for_setting(VariableType::String, reference)?;
        let installing = modifier.is_some();
        self.string_set_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::String, reference, e))?;
        track_modified(&mut self.modified_string_variables, reference, installing);
        Ok(())
    }

    /// Install or clear an output modifier on a real variable. Installing
    /// implicitly exposes the variable for getting.
    pub fn set_real_output_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<f64>>,
    ) -> Result<(), SimulatorError> {
        self.real_get_cache.expose(reference);
        let installing = modifier.is_some();
        self.real_get_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Real, reference, e))?;
        track_modified(&mut self.modified_real_variables, reference, installing);
        Ok(())
    }

    pub fn set_integer_output_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<i32>>,
    ) -> Result<(), SimulatorError> {
        self.integer_get_cache.expose(reference);
        let installing = modifier.is_some();
        self.integer_get_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Integer, reference, e))?;
        track_modified(&mut self.modified_integer_variables, reference, installing);
        Ok(())
    }

    pub fn set_boolean_output_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<bool>>,
    ) -> Result<(), SimulatorError> {
        self.boolean_get_cache.expose(reference);
        let installing = modifier.is_some();
        self.boolean_get_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::Boolean, reference, e))?;
        track_modified(&mut self.modified_boolean_variables, reference, installing);
        Ok(())
    }

    pub fn set_string_output_modifier(
        &mut self,
        reference: ValueReference,
        modifier: Option<Modifier<String>>,
    ) -> Result<(), SimulatorError> {
        self.string_get_cache.expose(reference);
        let installing = modifier.is_some();
        self.string_get_cache
            .set_modifier(reference, modifier)
            .map_err(|e| cache_error(&self.name, VariableType::String, reference, e))?;
        track_modified(&mut self.modified_string_variables, reference, installing);
        Ok(())
    }

    pub fn modified_real_variables(&self) -> &HashSet<ValueReference> {
        &self.modified_real_variables
    }

    pub fn modified_integer_variables(&self) -> &HashSet<ValueReference> {
        &self.modified_integer_variables
    }

    pub fn modified_boolean_variables(&self) -> &HashSet<ValueReference> {
        &self.modified_boolean_variables
    }

    pub fn modified_string_variables(&self) -> &HashSet<ValueReference> {
        &self.modified_string_variables
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Prepare the slave for the simulation run.
    ///
    /// Pending initial values are written first, except those with constant
    /// variability or input causality, which the slave only accepts after
    /// its own setup; they remain buffered and are delivered by the first
    /// [`SlaveSimulator::do_iteration`].
    pub fn setup(
        &mut self,
        start_time: TimePoint,
        stop_time: Option<TimePoint>,
        relative_tolerance: Option<f64>,
    ) -> Result<(), SimulatorError> {
        self.require_state("setup", SlaveState::Created)?;
        self.state = SlaveState::Indeterminate;
        match self.setup_inner(start_time, stop_time, relative_tolerance) {
            Ok(()) => {
                self.state = SlaveState::Initialisation;
                Ok(())
            }
            Err(e) => {
                self.state = SlaveState::Error;
                Err(e)
            }
        }
    }

    /// One fixed-point iteration during initialisation: flush pending
    /// writes, refresh the read caches.
    pub fn do_iteration(&mut self) -> Result<(), SimulatorError> {
        let restore = self.state;
        self.state = SlaveState::Indeterminate;
        match self.do_iteration_inner() {
            Ok(()) => {
                self.state = restore;
                Ok(())
            }
            Err(e) => {
                self.state = SlaveState::Error;
                Err(e)
            }
        }
    }

    /// Leave initialisation mode and begin stepping.
    pub fn start_simulation(&mut self) -> Result<(), SimulatorError> {
        self.require_state("start simulation", SlaveState::Initialisation)?;
        self.state = SlaveState::Indeterminate;
        match self.start_simulation_inner() {
            Ok(()) => {
                self.state = SlaveState::Simulation;
                Ok(())
            }
            Err(e) => {
                self.state = SlaveState::Error;
                Err(e)
            }
        }
    }

    /// Advance the slave by one step of length `delta_t`.
    pub fn do_step(
        &mut self,
        current_time: TimePoint,
        delta_t: Duration,
    ) -> Result<StepResult, SimulatorError> {
        self.require_state("step", SlaveState::Simulation)?;
        self.state = SlaveState::Indeterminate;
        match self.do_step_inner(current_time, delta_t) {
            Ok(r) => {
                self.state = SlaveState::Simulation;
                Ok(r)
            }
            Err(e) => {
                self.state = SlaveState::Error;
                Err(e)
            }
        }
    }

    /// Inform the slave that the run has ended.
    pub fn end_simulation(&mut self) -> Result<(), SimulatorError> {
        if self.state != SlaveState::Initialisation && self.state != SlaveState::Simulation {
            return Err(SimulatorError::InvalidState {
                simulator: self.name.clone(),
                operation: "end simulation",
                state: self.state,
            });
        }
        self.state = SlaveState::Indeterminate;
        match self.slave_call(|s| s.end_simulation()) {
            Ok(()) => {
                self.state = SlaveState::Terminated;
                Ok(())
            }
            Err(e) => {
                self.state = SlaveState::Error;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Capture the slave's internal state, if it has any to save.
    pub fn save_state(&self) -> Result<Option<crate::serialize::StateNode>, SimulatorError> {
        self.slave
            .save_state()
            .map_err(|e| slave_error(&self.name, e))
    }

    /// Restore previously captured slave state.
    pub fn restore_state(
        &mut self,
        state: &crate::serialize::StateNode,
    ) -> Result<(), SimulatorError> {
        let name = self.name.clone();
        self.slave
            .restore_state(state)
            .map_err(|e| slave_error(&name, e))
    }

    // -----------------------------------------------------------------------
    // The batched I/O boundary
    // -----------------------------------------------------------------------

    fn setup_inner(
        &mut self,
        start_time: TimePoint,
        stop_time: Option<TimePoint>,
        relative_tolerance: Option<f64>,
    ) -> Result<(), SimulatorError> {
        let md = &self.model_description;
        let name = &self.name;
        {
            let f = setup_filter::<f64>(md, VariableType::Real);
            let (references, values) = self.real_set_cache.modify_and_get(Duration::ZERO, Some(&f));
            self.slave
                .set_real_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let f = setup_filter::<i32>(md, VariableType::Integer);
            let (references, values) =
                self.integer_set_cache.modify_and_get(Duration::ZERO, Some(&f));
            self.slave
                .set_integer_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let f = setup_filter::<bool>(md, VariableType::Boolean);
            let (references, values) =
                self.boolean_set_cache.modify_and_get(Duration::ZERO, Some(&f));
            self.slave
                .set_boolean_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let f = setup_filter::<String>(md, VariableType::String);
            let (references, values) =
                self.string_set_cache.modify_and_get(Duration::ZERO, Some(&f));
            self.slave
                .set_string_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }

        self.slave
            .setup(start_time, stop_time, relative_tolerance)
            .map_err(|e| slave_error(&self.name, e))?;
        self.get_variables(Duration::ZERO)
    }

    fn do_iteration_inner(&mut self) -> Result<(), SimulatorError> {
        self.set_variables(Duration::ZERO)?;
        self.get_variables(Duration::ZERO)
    }

    fn start_simulation_inner(&mut self) -> Result<(), SimulatorError> {
        self.set_variables(Duration::ZERO)?;
        self.slave_call(|s| s.start_simulation())?;
        self.get_variables(Duration::ZERO)
    }

    fn do_step_inner(
        &mut self,
        current_time: TimePoint,
        delta_t: Duration,
    ) -> Result<StepResult, SimulatorError> {
        self.set_variables(delta_t)?;
        let step_result = self
            .slave
            .do_step(current_time, delta_t)
            .map_err(|e| slave_error(&self.name, e))?;
        self.get_variables(delta_t)?;
        Ok(step_result)
    }

    fn set_variables(&mut self, delta_t: Duration) -> Result<(), SimulatorError> {
        let name = &self.name;
        {
            let (references, values) = self.real_set_cache.modify_and_get(delta_t, None);
            self.slave
                .set_real_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.integer_set_cache.modify_and_get(delta_t, None);
            self.slave
                .set_integer_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.boolean_set_cache.modify_and_get(delta_t, None);
            self.slave
                .set_boolean_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.string_set_cache.modify_and_get(delta_t, None);
            self.slave
                .set_string_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        self.real_set_cache.reset();
        self.integer_set_cache.reset();
        self.boolean_set_cache.reset();
        self.string_set_cache.reset();
        Ok(())
    }

    fn get_variables(&mut self, delta_t: Duration) -> Result<(), SimulatorError> {
        let name = &self.name;
        {
            let (references, values) = self.real_get_cache.read_targets();
            self.slave
                .get_real_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.integer_get_cache.read_targets();
            self.slave
                .get_integer_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.boolean_get_cache.read_targets();
            self.slave
                .get_boolean_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        {
            let (references, values) = self.string_get_cache.read_targets();
            self.slave
                .get_string_variables(references, values)
                .map_err(|e| slave_error(name, e))?;
        }
        self.real_get_cache.run_modifiers(delta_t);
        self.integer_get_cache.run_modifiers(delta_t);
        self.boolean_get_cache.run_modifiers(delta_t);
        self.string_get_cache.run_modifiers(delta_t);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_state(
        &self,
        operation: &'static str,
        expected: SlaveState,
    ) -> Result<(), SimulatorError> {
        if self.state != expected {
            return Err(SimulatorError::InvalidState {
                simulator: self.name.clone(),
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn slave_call(
        &mut self,
        f: impl FnOnce(&mut dyn Slave) -> Result<(), SlaveError>,
    ) -> Result<(), SimulatorError> {
        let name = &self.name;
        f(self.slave.as_mut()).map_err(|e| slave_error(name, e))
    }

    fn cache_error(
        &self,
        variable_type: VariableType,
        reference: ValueReference,
        source: CacheError,
    ) -> SimulatorError {
        cache_error(&self.name, variable_type, reference, source)
    }

    fn unsupported_type(&self, variable_type: VariableType) -> SimulatorError {
        SimulatorError::UnsupportedType {
            simulator: self.name.clone(),
            variable_type,
        }
    }
}

impl fmt::Debug for SlaveSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveSimulator")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn cache_error(
    name: &str,
    variable_type: VariableType,
    reference: ValueReference,
    source: CacheError,
) -> SimulatorError {
    SimulatorError::Cache {
        simulator: name.to_owned(),
        variable_type,
        reference,
        source,
    }
}

fn slave_error(name: &str, source: SlaveError) -> SimulatorError {
    SimulatorError::Slave {
        simulator: name.to_owned(),
        source,
    }
}

fn start_real(vd: &VariableDescription) -> f64 {
    match &vd.start {
        Some(ScalarValue::Real(v)) => *v,
        _ => 0.0,
    }
}

fn start_integer(vd: &VariableDescription) -> i32 {
    match &vd.start {
        Some(ScalarValue::Integer(v)) => *v,
        _ => 0,
    }
}

fn start_boolean(vd: &VariableDescription) -> bool {
    match &vd.start {
        Some(ScalarValue::Boolean(v)) => *v,
        _ => false,
    }
}

fn start_string(vd: &VariableDescription) -> String {
    match &vd.start {
        Some(ScalarValue::String(v)) => v.clone(),
        _ => String::new(),
    }
}

fn track_modified(set: &mut HashSet<ValueReference>, reference: ValueReference, installing: bool) {
    if installing {
        set.insert(reference);
    } else {
        set.remove(&reference);
    }
}

/// Send filter used during setup: constant-variability and input-causality
/// variables are withheld until the first iteration after the slave's own
/// setup.
fn setup_filter<T>(
    md: &ModelDescription,
    variable_type: VariableType,
) -> impl Fn(ValueReference, &T) -> bool {
    move |reference, _| {
        md.find_variable_by_reference(variable_type, reference)
            .map(|vd| {
                vd.variability != VariableVariability::Constant
                    && vd.causality != VariableCausality::Input
            })
            .unwrap_or(true)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockSlave;
    use crate::time::to_time_point;

    fn make(slave: MockSlave) -> SlaveSimulator {
        SlaveSimulator::new(Box::new(slave), "sim")
    }

    fn zero() -> Duration {
        Duration::ZERO
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut sim = make(MockSlave::new());
        assert_eq!(sim.state(), SlaveState::Created);
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        assert_eq!(sim.state(), SlaveState::Initialisation);
        sim.start_simulation().unwrap();
        assert_eq!(sim.state(), SlaveState::Simulation);
        let result = sim.do_step(TimePoint::ZERO, zero()).unwrap();
        assert_eq!(result, StepResult::Complete);
        assert_eq!(sim.state(), SlaveState::Simulation);
        sim.end_simulation().unwrap();
        assert_eq!(sim.state(), SlaveState::Terminated);
    }

    #[test]
    fn lifecycle_preconditions_enforced() {
        let mut sim = make(MockSlave::new());
        assert!(matches!(
            sim.do_step(TimePoint::ZERO, zero()),
            Err(SimulatorError::InvalidState { .. })
        ));
        assert!(matches!(
            sim.start_simulation(),
            Err(SimulatorError::InvalidState { .. })
        ));
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        assert!(matches!(
            sim.setup(TimePoint::ZERO, None, None),
            Err(SimulatorError::InvalidState { .. })
        ));
    }

    #[test]
    fn failing_step_moves_to_error_state() {
        let mut sim = make(MockSlave::new().with_step_failure());
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        sim.start_simulation().unwrap();
        assert!(sim.do_step(TimePoint::ZERO, zero()).is_err());
        assert_eq!(sim.state(), SlaveState::Error);
        // Error is terminal.
        assert!(matches!(
            sim.do_step(TimePoint::ZERO, zero()),
            Err(SimulatorError::InvalidState { .. })
        ));
    }

    #[test]
    fn values_round_trip_through_the_caches() {
        // Identity slave: realOut mirrors realIn after each step.
        let mut sim = make(MockSlave::new());
        sim.expose_for_setting(VariableType::Real, MockSlave::REAL_IN)
            .unwrap();
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        sim.start_simulation().unwrap();

        sim.set_real(MockSlave::REAL_IN, 2.5).unwrap();
        sim.do_step(to_time_point(0.0), zero()).unwrap();
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 2.5);
    }

    #[test]
    fn get_before_expose_fails_with_simulator_name() {
        let sim = make(MockSlave::new());
        let err = sim.get_real(0).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("sim"), "got: {message}");
        assert!(message.contains("not found in exposed variables"), "got: {message}");
    }

    #[test]
    fn unknown_variable_cannot_be_exposed_for_setting() {
        let mut sim = make(MockSlave::new());
        assert!(matches!(
            sim.expose_for_setting(VariableType::Real, 99),
            Err(SimulatorError::NoSuchVariable { .. })
        ));
    }

    #[test]
    fn enumeration_is_rejected() {
        let mut sim = make(MockSlave::new());
        assert!(matches!(
            sim.expose_for_getting(VariableType::Enumeration, 0),
            Err(SimulatorError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn input_modifier_applies_every_tick_without_sets() {
        let mut sim = make(MockSlave::new());
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
        sim.set_real_input_modifier(MockSlave::REAL_IN, Some(Box::new(|_, _| 7.0)))
            .unwrap();
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        sim.start_simulation().unwrap();

        sim.do_step(TimePoint::ZERO, zero()).unwrap();
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 7.0);
        // Second tick: the modifier must still be delivered.
        sim.do_step(TimePoint::ZERO, zero()).unwrap();
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 7.0);
    }

    #[test]
    fn output_modifier_rewrites_reads() {
        let mut sim = make(MockSlave::new());
        sim.expose_for_setting(VariableType::Real, MockSlave::REAL_IN)
            .unwrap();
        sim.set_real_output_modifier(MockSlave::REAL_OUT, Some(Box::new(|v, _| v + 0.5)))
            .unwrap();
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        sim.start_simulation().unwrap();

        sim.set_real(MockSlave::REAL_IN, 1.0).unwrap();
        sim.do_step(TimePoint::ZERO, zero()).unwrap();
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 1.5);
    }

    #[test]
    fn modified_variable_sets_track_installs_and_clears() {
        let mut sim = make(MockSlave::new());
        sim.set_real_input_modifier(MockSlave::REAL_IN, Some(Box::new(|v, _| v)))
            .unwrap();
        sim.set_integer_output_modifier(MockSlave::INTEGER_OUT, Some(Box::new(|v, _| v)))
            .unwrap();
        assert!(sim.modified_real_variables().contains(&MockSlave::REAL_IN));
        assert!(
            sim.modified_integer_variables()
                .contains(&MockSlave::INTEGER_OUT)
        );

        sim.set_real_input_modifier(MockSlave::REAL_IN, None).unwrap();
        assert!(sim.modified_real_variables().is_empty());
    }

    #[test]
    fn initial_input_value_is_delivered_by_first_iteration() {
        // Input-causality initial values are filtered out of the setup write
        // and must reach the slave on the first iteration instead.
        let mut sim = make(MockSlave::new());
        sim.expose_for_setting(VariableType::Real, MockSlave::REAL_IN)
            .unwrap();
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
        sim.set_real(MockSlave::REAL_IN, 3.25).unwrap();

        sim.setup(TimePoint::ZERO, None, None).unwrap();
        // Not visible yet: the setup write filtered the input out.
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 0.0);

        sim.do_iteration().unwrap();
        assert_eq!(sim.get_real(MockSlave::REAL_OUT).unwrap(), 3.25);
    }
}
