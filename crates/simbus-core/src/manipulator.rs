//! The manipulator protocol and the override manipulator.
//!
//! Manipulators are before-step hooks: the execution calls
//! [`Manipulator::step_commencing`] with the current time and the
//! subsimulator table right before dispatching a macro step, letting the
//! manipulator install or clear value modifiers.
//!
//! Like observers, manipulators are shared between the execution and client
//! code.

use crate::connection::SimulatorIndex;
use crate::model::{ValueReference, VariableCausality, VariableType};
use crate::scenario::{ActionModifier, apply_action};
use crate::simulator::{SimulatorError, SlaveSimulator};
use crate::time::TimePoint;
use parking_lot::Mutex;
use std::sync::Arc;

/// A before-step hook set.
pub trait Manipulator: Send {
    /// A subsimulator was added to the execution.
    fn simulator_added(
        &mut self,
        _index: SimulatorIndex,
        _simulator: &mut SlaveSimulator,
        _time: TimePoint,
    ) {
    }

    /// A subsimulator was removed from the execution.
    fn simulator_removed(&mut self, _index: SimulatorIndex, _time: TimePoint) {}

    /// A macro step is about to be dispatched.
    fn step_commencing(
        &mut self,
        time: TimePoint,
        simulators: &mut [SlaveSimulator],
    ) -> Result<(), SimulatorError>;
}

/// Shared manipulator handle as stored by the execution.
pub type SharedManipulator = Arc<Mutex<dyn Manipulator>>;

// ---------------------------------------------------------------------------
// Override manipulator
// ---------------------------------------------------------------------------

/// A pending override: a constant value, or a reset of whatever override is
/// installed.
enum OverridePayload {
    Real(f64),
    Integer(i32),
    Boolean(bool),
    String(String),
    Reset(VariableType),
}

impl OverridePayload {
    fn variable_type(&self) -> VariableType {
        match self {
            OverridePayload::Real(_) => VariableType::Real,
            OverridePayload::Integer(_) => VariableType::Integer,
            OverridePayload::Boolean(_) => VariableType::Boolean,
            OverridePayload::String(_) => VariableType::String,
            OverridePayload::Reset(t) => *t,
        }
    }

    fn into_modifier(self) -> ActionModifier {
        match self {
            OverridePayload::Real(v) => ActionModifier::Real(Some(Box::new(move |_, _| v))),
            OverridePayload::Integer(v) => ActionModifier::Integer(Some(Box::new(move |_, _| v))),
            OverridePayload::Boolean(v) => ActionModifier::Boolean(Some(Box::new(move |_, _| v))),
            OverridePayload::String(v) => {
                ActionModifier::String(Some(Box::new(move |_, _| v.clone())))
            }
            OverridePayload::Reset(t) => match t {
                VariableType::Real => ActionModifier::Real(None),
                VariableType::Integer => ActionModifier::Integer(None),
                VariableType::Boolean => ActionModifier::Boolean(None),
                VariableType::String | VariableType::Enumeration => ActionModifier::String(None),
            },
        }
    }
}

struct PendingOverride {
    simulator: SimulatorIndex,
    reference: ValueReference,
    payload: OverridePayload,
}

/// A manipulator that pins variables to constant values.
///
/// Overrides are queued from any thread and applied at the start of the next
/// macro step. An override on an input-causality variable installs an input
/// modifier; any other causality gets an output modifier, so observed reads
/// see the override too.
#[derive(Default)]
pub struct OverrideManipulator {
    actions: Mutex<Vec<PendingOverride>>,
}

impl OverrideManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the value of a variable with type `real`.
    pub fn override_real_variable(
        &self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: f64,
    ) {
        self.add_action(simulator, reference, OverridePayload::Real(value));
    }

    /// Override the value of a variable with type `integer`.
    pub fn override_integer_variable(
        &self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: i32,
    ) {
        self.add_action(simulator, reference, OverridePayload::Integer(value));
    }

    /// Override the value of a variable with type `boolean`.
    pub fn override_boolean_variable(
        &self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: bool,
    ) {
        self.add_action(simulator, reference, OverridePayload::Boolean(value));
    }

    /// Override the value of a variable with type `string`.
    pub fn override_string_variable(
        &self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        value: impl Into<String>,
    ) {
        self.add_action(simulator, reference, OverridePayload::String(value.into()));
    }

    /// Remove the override of a variable.
    pub fn reset_variable(
        &self,
        simulator: SimulatorIndex,
        variable_type: VariableType,
        reference: ValueReference,
    ) {
        self.add_action(simulator, reference, OverridePayload::Reset(variable_type));
    }

    fn add_action(
        &self,
        simulator: SimulatorIndex,
        reference: ValueReference,
        payload: OverridePayload,
    ) {
        let mut actions = self.actions.lock();
        // A newer action on the same variable supersedes the queued one.
        actions.retain(|a| {
            !(a.simulator == simulator
                && a.reference == reference
                && a.payload.variable_type() == payload.variable_type())
        });
        actions.push(PendingOverride {
            simulator,
            reference,
            payload,
        });
    }
}

impl Manipulator for OverrideManipulator {
    fn step_commencing(
        &mut self,
        _time: TimePoint,
        simulators: &mut [SlaveSimulator],
    ) -> Result<(), SimulatorError> {
        let pending = std::mem::take(&mut *self.actions.lock());
        for action in pending {
            let variable_type = action.payload.variable_type();
            let Some(simulator) = simulators.get_mut(action.simulator) else {
                continue;
            };
            let causality = simulator
                .model_description()
                .find_variable_by_reference(variable_type, action.reference)
                .map(|vd| vd.causality)
                .ok_or_else(|| SimulatorError::NoSuchVariable {
                    simulator: simulator.name().to_owned(),
                    variable_type,
                    reference: action.reference,
                })?;
            let is_input = causality == VariableCausality::Input;
            apply_action(
                simulator,
                action.reference,
                action.payload.into_modifier(),
                is_input,
            )?;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockSlave;
    use crate::time::to_duration;

    fn ready_simulator() -> SlaveSimulator {
        let mut sim = SlaveSimulator::new(Box::new(MockSlave::new()), "sim");
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_IN)
            .unwrap();
        sim.setup(TimePoint::ZERO, None, None).unwrap();
        sim.start_simulation().unwrap();
        sim
    }

    fn step(sim: &mut SlaveSimulator) {
        sim.do_step(TimePoint::ZERO, to_duration(0.1)).unwrap();
    }

    #[test]
    fn input_override_reaches_the_slave() {
        let mut sims = vec![ready_simulator()];
        let mut manipulator = OverrideManipulator::new();
        manipulator.override_real_variable(0, MockSlave::REAL_IN, 2.0);

        manipulator.step_commencing(TimePoint::ZERO, &mut sims).unwrap();
        step(&mut sims[0]);
        assert_eq!(sims[0].get_real(MockSlave::REAL_IN).unwrap(), 2.0);
        assert_eq!(sims[0].get_real(MockSlave::REAL_OUT).unwrap(), 2.0);
    }

    #[test]
    fn output_override_pins_the_observed_value() {
        let mut sims = vec![ready_simulator()];
        let mut manipulator = OverrideManipulator::new();
        manipulator.override_real_variable(0, MockSlave::REAL_OUT, -1.0);

        manipulator.step_commencing(TimePoint::ZERO, &mut sims).unwrap();
        step(&mut sims[0]);
        assert_eq!(sims[0].get_real(MockSlave::REAL_OUT).unwrap(), -1.0);
    }

    #[test]
    fn reset_removes_the_override() {
        let mut sims = vec![ready_simulator()];
        let mut manipulator = OverrideManipulator::new();
        manipulator.override_real_variable(0, MockSlave::REAL_OUT, -1.0);
        manipulator.step_commencing(TimePoint::ZERO, &mut sims).unwrap();
        step(&mut sims[0]);

        manipulator.reset_variable(0, VariableType::Real, MockSlave::REAL_OUT);
        manipulator.step_commencing(TimePoint::ZERO, &mut sims).unwrap();
        step(&mut sims[0]);
        assert_eq!(sims[0].get_real(MockSlave::REAL_OUT).unwrap(), 0.0);
    }

    #[test]
    fn newer_override_supersedes_queued_one() {
        let mut sims = vec![ready_simulator()];
        let mut manipulator = OverrideManipulator::new();
        manipulator.override_real_variable(0, MockSlave::REAL_IN, 1.0);
        manipulator.override_real_variable(0, MockSlave::REAL_IN, 5.0);

        manipulator.step_commencing(TimePoint::ZERO, &mut sims).unwrap();
        step(&mut sims[0]);
        assert_eq!(sims[0].get_real(MockSlave::REAL_IN).unwrap(), 5.0);
    }

    #[test]
    fn unknown_variable_is_reported() {
        let mut sims = vec![ready_simulator()];
        let mut manipulator = OverrideManipulator::new();
        manipulator.override_real_variable(0, 99, 1.0);
        assert!(matches!(
            manipulator.step_commencing(TimePoint::ZERO, &mut sims),
            Err(SimulatorError::NoSuchVariable { .. })
        ));
    }
}
