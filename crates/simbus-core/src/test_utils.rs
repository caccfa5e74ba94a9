//! Shared test helpers: a mock slave and simple recording observers.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the helpers
//! are available to unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::connection::{SimulatorIndex, StepNumber};
use crate::model::{
    ModelDescription, ScalarValue, SimulatorCapabilities, StepResult, ValueReference,
    VariableCausality, VariableDescription, VariableType, VariableVariability,
};
use crate::observer::Observer;
use crate::serialize::StateNode;
use crate::simulator::SlaveSimulator;
use crate::slave::{Slave, SlaveError};
use crate::time::{Duration, TimePoint};
use std::collections::HashMap;

// ===========================================================================
// MockSlave
// ===========================================================================

type RealOp = Box<dyn Fn(TimePoint, f64) -> f64 + Send>;
type IntegerOp = Box<dyn Fn(TimePoint, i32) -> i32 + Send>;
type BooleanOp = Box<dyn Fn(TimePoint, bool) -> bool + Send>;
type StringOp = Box<dyn Fn(TimePoint, &str) -> String + Send>;
type StepAction = Box<dyn FnMut(TimePoint) + Send>;

/// A simple slave implementation for testing purposes.
///
/// The slave has one input and one output of each of the four data types.
/// The output of each type is a user-defined operation applied to the input
/// of the same type; the default is the identity. An optional step action
/// runs on every `do_step`.
pub struct MockSlave {
    real_op: Option<RealOp>,
    integer_op: Option<IntegerOp>,
    boolean_op: Option<BooleanOp>,
    string_op: Option<StringOp>,
    step_action: Option<StepAction>,
    fail_step: bool,
    incomplete_step: bool,
    state_support: bool,

    current_time: TimePoint,
    real_in: f64,
    integer_in: i32,
    boolean_in: bool,
    string_in: String,
}

impl Default for MockSlave {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSlave {
    pub const REAL_OUT: ValueReference = 0;
    pub const REAL_IN: ValueReference = 1;
    pub const INTEGER_OUT: ValueReference = 0;
    pub const INTEGER_IN: ValueReference = 1;
    pub const BOOLEAN_OUT: ValueReference = 0;
    pub const BOOLEAN_IN: ValueReference = 1;
    pub const STRING_OUT: ValueReference = 0;
    pub const STRING_IN: ValueReference = 1;

    /// An identity slave: every output mirrors the same-typed input.
    pub fn new() -> Self {
        Self {
            real_op: None,
            integer_op: None,
            boolean_op: None,
            string_op: None,
            step_action: None,
            fail_step: false,
            incomplete_step: false,
            state_support: false,
            current_time: TimePoint::ZERO,
            real_in: 0.0,
            integer_in: 0,
            boolean_in: false,
            string_in: String::new(),
        }
    }

    /// Set the operation computing the real output from the real input.
    pub fn with_real_op(mut self, op: impl Fn(f64) -> f64 + Send + 'static) -> Self {
        self.real_op = Some(Box::new(move |_, v| op(v)));
        self
    }

    /// Like [`MockSlave::with_real_op`], but the operation also sees the
    /// slave's current time.
    pub fn with_time_real_op(mut self, op: impl Fn(TimePoint, f64) -> f64 + Send + 'static) -> Self {
        self.real_op = Some(Box::new(op));
        self
    }

    pub fn with_integer_op(mut self, op: impl Fn(i32) -> i32 + Send + 'static) -> Self {
        self.integer_op = Some(Box::new(move |_, v| op(v)));
        self
    }

    pub fn with_boolean_op(mut self, op: impl Fn(bool) -> bool + Send + 'static) -> Self {
        self.boolean_op = Some(Box::new(move |_, v| op(v)));
        self
    }

    pub fn with_string_op(mut self, op: impl Fn(&str) -> String + Send + 'static) -> Self {
        self.string_op = Some(Box::new(move |_, v| op(v)));
        self
    }

    /// Run an action on every `do_step` (before outputs are read).
    pub fn with_step_action(mut self, action: impl FnMut() + Send + 'static) -> Self {
        let mut action = action;
        self.step_action = Some(Box::new(move |_| action()));
        self
    }

    /// Make every `do_step` return a model error.
    pub fn with_step_failure(mut self) -> Self {
        self.fail_step = true;
        self
    }

    /// Make every `do_step` report a non-complete result.
    pub fn with_incomplete_step(mut self) -> Self {
        self.incomplete_step = true;
        self
    }

    /// Advertise and implement the save-state capability.
    pub fn with_state_support(mut self) -> Self {
        self.state_support = true;
        self
    }
}

impl Slave for MockSlave {
    fn model_description(&self) -> ModelDescription {
        let variable = |name: &str,
                        reference: ValueReference,
                        variable_type: VariableType,
                        causality: VariableCausality,
                        start: Option<ScalarValue>| {
            VariableDescription {
                name: name.to_owned(),
                reference,
                variable_type,
                causality,
                variability: VariableVariability::Discrete,
                start,
            }
        };
        ModelDescription {
            name: "mock_slave".to_owned(),
            uuid: "09b7ee06-fc07-4ad0-86f1-cd183fbae519".to_owned(),
            description: String::new(),
            author: String::new(),
            version: String::new(),
            variables: vec![
                variable(
                    "realOut",
                    Self::REAL_OUT,
                    VariableType::Real,
                    VariableCausality::Output,
                    None,
                ),
                variable(
                    "realIn",
                    Self::REAL_IN,
                    VariableType::Real,
                    VariableCausality::Input,
                    Some(ScalarValue::Real(0.0)),
                ),
                variable(
                    "intOut",
                    Self::INTEGER_OUT,
                    VariableType::Integer,
                    VariableCausality::Output,
                    None,
                ),
                variable(
                    "intIn",
                    Self::INTEGER_IN,
                    VariableType::Integer,
                    VariableCausality::Input,
                    Some(ScalarValue::Integer(0)),
                ),
                variable(
                    "booleanOut",
                    Self::BOOLEAN_OUT,
                    VariableType::Boolean,
                    VariableCausality::Output,
                    None,
                ),
                variable(
                    "booleanIn",
                    Self::BOOLEAN_IN,
                    VariableType::Boolean,
                    VariableCausality::Input,
                    Some(ScalarValue::Boolean(false)),
                ),
                variable(
                    "stringOut",
                    Self::STRING_OUT,
                    VariableType::String,
                    VariableCausality::Output,
                    None,
                ),
                variable(
                    "stringIn",
                    Self::STRING_IN,
                    VariableType::String,
                    VariableCausality::Input,
                    Some(ScalarValue::String(String::new())),
                ),
            ],
            capabilities: SimulatorCapabilities {
                can_save_state: self.state_support,
            },
        }
    }

    fn setup(
        &mut self,
        start_time: TimePoint,
        _stop_time: Option<TimePoint>,
        _relative_tolerance: Option<f64>,
    ) -> Result<(), SlaveError> {
        self.current_time = start_time;
        Ok(())
    }

    fn start_simulation(&mut self) -> Result<(), SlaveError> {
        Ok(())
    }

    fn end_simulation(&mut self) -> Result<(), SlaveError> {
        Ok(())
    }

    fn do_step(
        &mut self,
        current_time: TimePoint,
        delta_t: Duration,
    ) -> Result<StepResult, SlaveError> {
        if self.fail_step {
            return Err(SlaveError::Model("step failed".to_owned()));
        }
        if self.incomplete_step {
            return Ok(StepResult::Failed);
        }
        if let Some(action) = &mut self.step_action {
            action(current_time);
        }
        self.current_time = current_time + delta_t;
        Ok(StepResult::Complete)
    }

    fn get_real_variables(
        &self,
        references: &[ValueReference],
        values: &mut [f64],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values.iter_mut()) {
            *value = match *reference {
                Self::REAL_OUT => match &self.real_op {
                    Some(op) => op(self.current_time, self.real_in),
                    None => self.real_in,
                },
                Self::REAL_IN => self.real_in,
                other => return Err(SlaveError::BadReference { reference: other }),
            };
        }
        Ok(())
    }

    fn get_integer_variables(
        &self,
        references: &[ValueReference],
        values: &mut [i32],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values.iter_mut()) {
            *value = match *reference {
                Self::INTEGER_OUT => match &self.integer_op {
                    Some(op) => op(self.current_time, self.integer_in),
                    None => self.integer_in,
                },
                Self::INTEGER_IN => self.integer_in,
                other => return Err(SlaveError::BadReference { reference: other }),
            };
        }
        Ok(())
    }

    fn get_boolean_variables(
        &self,
        references: &[ValueReference],
        values: &mut [bool],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values.iter_mut()) {
            *value = match *reference {
                Self::BOOLEAN_OUT => match &self.boolean_op {
                    Some(op) => op(self.current_time, self.boolean_in),
                    None => self.boolean_in,
                },
                Self::BOOLEAN_IN => self.boolean_in,
                other => return Err(SlaveError::BadReference { reference: other }),
            };
        }
        Ok(())
    }

    fn get_string_variables(
        &self,
        references: &[ValueReference],
        values: &mut [String],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values.iter_mut()) {
            *value = match *reference {
                Self::STRING_OUT => match &self.string_op {
                    Some(op) => op(self.current_time, &self.string_in),
                    None => self.string_in.clone(),
                },
                Self::STRING_IN => self.string_in.clone(),
                other => return Err(SlaveError::BadReference { reference: other }),
            };
        }
        Ok(())
    }

    fn set_real_variables(
        &mut self,
        references: &[ValueReference],
        values: &[f64],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values) {
            match *reference {
                Self::REAL_IN => self.real_in = *value,
                other => return Err(SlaveError::BadReference { reference: other }),
            }
        }
        Ok(())
    }

    fn set_integer_variables(
        &mut self,
        references: &[ValueReference],
        values: &[i32],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values) {
            match *reference {
                Self::INTEGER_IN => self.integer_in = *value,
                other => return Err(SlaveError::BadReference { reference: other }),
            }
        }
        Ok(())
    }

    fn set_boolean_variables(
        &mut self,
        references: &[ValueReference],
        values: &[bool],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values) {
            match *reference {
                Self::BOOLEAN_IN => self.boolean_in = *value,
                other => return Err(SlaveError::BadReference { reference: other }),
            }
        }
        Ok(())
    }

    fn set_string_variables(
        &mut self,
        references: &[ValueReference],
        values: &[String],
    ) -> Result<(), SlaveError> {
        for (reference, value) in references.iter().zip(values) {
            match *reference {
                Self::STRING_IN => self.string_in = value.clone(),
                other => return Err(SlaveError::BadReference { reference: other }),
            }
        }
        Ok(())
    }

    fn save_state(&self) -> Result<Option<StateNode>, SlaveError> {
        if !self.state_support {
            return Ok(None);
        }
        Ok(Some(StateNode::branch([
            ("time", StateNode::Integer(self.current_time.as_nanos())),
            ("real_in", StateNode::Real(self.real_in)),
            ("integer_in", StateNode::Integer(self.integer_in as i64)),
            ("boolean_in", StateNode::Boolean(self.boolean_in)),
            ("string_in", StateNode::String(self.string_in.clone())),
        ])))
    }

    fn restore_state(&mut self, state: &StateNode) -> Result<(), SlaveError> {
        let missing = |field: &str| SlaveError::Model(format!("missing state field '{field}'"));
        self.current_time = TimePoint::from_nanos(
            state
                .child("time")
                .and_then(StateNode::as_integer)
                .ok_or_else(|| missing("time"))?,
        );
        self.real_in = state
            .child("real_in")
            .and_then(StateNode::as_real)
            .ok_or_else(|| missing("real_in"))?;
        self.integer_in = state
            .child("integer_in")
            .and_then(StateNode::as_integer)
            .ok_or_else(|| missing("integer_in"))? as i32;
        self.boolean_in = state
            .child("boolean_in")
            .and_then(StateNode::as_boolean)
            .ok_or_else(|| missing("boolean_in"))?;
        self.string_in = state
            .child("string_in")
            .and_then(StateNode::as_str)
            .ok_or_else(|| missing("string_in"))?
            .to_owned();
        Ok(())
    }
}

// ===========================================================================
// Recording observers
// ===========================================================================

/// Records a value series per watched variable, sampled each time the
/// owning subsimulator finishes a step.
#[derive(Default)]
pub struct TimeSeriesRecorder {
    real_series: HashMap<(SimulatorIndex, ValueReference), Vec<f64>>,
    integer_series: HashMap<(SimulatorIndex, ValueReference), Vec<i32>>,
}

impl TimeSeriesRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a real variable. It must be exposed for getting on the
    /// subsimulator.
    pub fn watch_real(&mut self, simulator: SimulatorIndex, reference: ValueReference) {
        self.real_series.entry((simulator, reference)).or_default();
    }

    pub fn watch_integer(&mut self, simulator: SimulatorIndex, reference: ValueReference) {
        self.integer_series
            .entry((simulator, reference))
            .or_default();
    }

    pub fn real_series(&self, simulator: SimulatorIndex, reference: ValueReference) -> &[f64] {
        self.real_series
            .get(&(simulator, reference))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn integer_series(&self, simulator: SimulatorIndex, reference: ValueReference) -> &[i32] {
        self.integer_series
            .get(&(simulator, reference))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Observer for TimeSeriesRecorder {
    fn simulator_step_complete(
        &mut self,
        index: SimulatorIndex,
        _step: StepNumber,
        _step_size: Duration,
        _time: TimePoint,
        simulator: &SlaveSimulator,
    ) {
        for ((sim, reference), series) in self.real_series.iter_mut() {
            if *sim == index
                && let Ok(value) = simulator.get_real(*reference)
            {
                series.push(value);
            }
        }
        for ((sim, reference), series) in self.integer_series.iter_mut() {
            if *sim == index
                && let Ok(value) = simulator.get_integer(*reference)
            {
                series.push(value);
            }
        }
    }
}

/// Records the last observed value of every watched real variable after
/// each full macro step.
#[derive(Default)]
pub struct LastValueRecorder {
    last_real: HashMap<(SimulatorIndex, ValueReference), f64>,
    watched: Vec<(SimulatorIndex, ValueReference)>,
}

impl LastValueRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_real(&mut self, simulator: SimulatorIndex, reference: ValueReference) {
        self.watched.push((simulator, reference));
    }

    pub fn last_real(&self, simulator: SimulatorIndex, reference: ValueReference) -> Option<f64> {
        self.last_real.get(&(simulator, reference)).copied()
    }
}

impl Observer for LastValueRecorder {
    fn step_complete(
        &mut self,
        _step: StepNumber,
        _step_size: Duration,
        _time: TimePoint,
        simulators: &[SlaveSimulator],
    ) {
        for (simulator, reference) in &self.watched {
            if let Some(sim) = simulators.get(*simulator)
                && let Ok(value) = sim.get_real(*reference)
            {
                self.last_real.insert((*simulator, *reference), value);
            }
        }
    }
}
