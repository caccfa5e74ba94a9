//! Timed variable-action scenarios.
//!
//! A scenario is a list of timestamped events, each installing or clearing a
//! value modifier on a subsimulator variable. The [`ScenarioManager`] is a
//! manipulator that activates every event whose time has been reached at the
//! start of a macro step, and uninstalls all still-active modifiers when the
//! scenario's end time passes.

use crate::cache::Modifier;
use crate::connection::SimulatorIndex;
use crate::manipulator::Manipulator;
use crate::model::{ValueReference, VariableType};
use crate::simulator::{SimulatorError, SlaveSimulator};
use crate::time::TimePoint;
use slotmap::{SlotMap, new_key_type};
use tracing::debug;

new_key_type! {
    /// Identifies a loaded, not-yet-activated scenario event.
    struct EventKey;
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A typed modifier payload. `None` inside a variant clears the modifier of
/// that type.
pub enum ActionModifier {
    Real(Option<Modifier<f64>>),
    Integer(Option<Modifier<i32>>),
    Boolean(Option<Modifier<bool>>),
    String(Option<Modifier<String>>),
}

impl ActionModifier {
    pub fn variable_type(&self) -> VariableType {
        match self {
            ActionModifier::Real(_) => VariableType::Real,
            ActionModifier::Integer(_) => VariableType::Integer,
            ActionModifier::Boolean(_) => VariableType::Boolean,
            ActionModifier::String(_) => VariableType::String,
        }
    }

    /// Whether this action clears a modifier rather than installing one.
    pub fn is_clear(&self) -> bool {
        match self {
            ActionModifier::Real(m) => m.is_none(),
            ActionModifier::Integer(m) => m.is_none(),
            ActionModifier::Boolean(m) => m.is_none(),
            ActionModifier::String(m) => m.is_none(),
        }
    }
}

impl std::fmt::Debug for ActionModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ActionModifier::{:?}({})",
            self.variable_type(),
            if self.is_clear() { "clear" } else { "install" }
        )
    }
}

/// A modifier install/uninstall applied to one subsimulator variable.
#[derive(Debug)]
pub struct VariableAction {
    pub simulator: SimulatorIndex,
    pub reference: ValueReference,
    pub modifier: ActionModifier,
    /// `true` installs on the input (set) side, `false` on the output (get)
    /// side.
    pub is_input: bool,
}

/// Install or clear the modifier described by an action on a subsimulator.
pub(crate) fn apply_action(
    simulator: &mut SlaveSimulator,
    reference: ValueReference,
    modifier: ActionModifier,
    is_input: bool,
) -> Result<(), SimulatorError> {
    match (modifier, is_input) {
        (ActionModifier::Real(m), true) => simulator.set_real_input_modifier(reference, m),
        (ActionModifier::Real(m), false) => simulator.set_real_output_modifier(reference, m),
        (ActionModifier::Integer(m), true) => simulator.set_integer_input_modifier(reference, m),
        (ActionModifier::Integer(m), false) => simulator.set_integer_output_modifier(reference, m),
        (ActionModifier::Boolean(m), true) => simulator.set_boolean_input_modifier(reference, m),
        (ActionModifier::Boolean(m), false) => simulator.set_boolean_output_modifier(reference, m),
        (ActionModifier::String(m), true) => simulator.set_string_input_modifier(reference, m),
        (ActionModifier::String(m), false) => simulator.set_string_output_modifier(reference, m),
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// A timed event: at `time`, apply `action`.
#[derive(Debug)]
pub struct ScenarioEvent {
    pub time: TimePoint,
    pub action: VariableAction,
}

/// A scenario: events plus an optional end time at which all still-active
/// modifiers are uninstalled.
#[derive(Debug, Default)]
pub struct Scenario {
    pub events: Vec<ScenarioEvent>,
    pub end: Option<TimePoint>,
}

// ---------------------------------------------------------------------------
// ScenarioManager
// ---------------------------------------------------------------------------

/// Record of an installed modifier, kept so it can be uninstalled when the
/// scenario ends or is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveModifier {
    simulator: SimulatorIndex,
    variable_type: VariableType,
    reference: ValueReference,
    is_input: bool,
}

/// A manipulator that plays back a loaded [`Scenario`].
#[derive(Default)]
pub struct ScenarioManager {
    events: SlotMap<EventKey, ScenarioEvent>,
    end: Option<TimePoint>,
    active: Vec<ActiveModifier>,
    running: bool,
    abort_requested: bool,
}

impl ScenarioManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a scenario, replacing any previous one. Event times are
    /// absolute simulation times.
    pub fn load_scenario(&mut self, scenario: Scenario) {
        self.events.clear();
        for event in scenario.events {
            self.events.insert(event);
        }
        self.end = scenario.end;
        self.running = true;
        self.abort_requested = false;
    }

    /// Request that the scenario stop and its modifiers be uninstalled at
    /// the start of the next macro step.
    pub fn abort_scenario(&mut self) {
        self.abort_requested = true;
    }

    pub fn is_scenario_running(&self) -> bool {
        self.running
    }

    fn uninstall_all(
        &mut self,
        simulators: &mut [SlaveSimulator],
    ) -> Result<(), SimulatorError> {
        for active in std::mem::take(&mut self.active) {
            let cleared = match active.variable_type {
                VariableType::Real => ActionModifier::Real(None),
                VariableType::Integer => ActionModifier::Integer(None),
                VariableType::Boolean => ActionModifier::Boolean(None),
                VariableType::String => ActionModifier::String(None),
                VariableType::Enumeration => continue,
            };
            let Some(simulator) = simulators.get_mut(active.simulator) else {
                continue;
            };
            apply_action(simulator, active.reference, cleared, active.is_input)?;
        }
        Ok(())
    }
}

impl Manipulator for ScenarioManager {
    fn step_commencing(
        &mut self,
        time: TimePoint,
        simulators: &mut [SlaveSimulator],
    ) -> Result<(), SimulatorError> {
        if !self.running {
            return Ok(());
        }

        let ended = self.end.is_some_and(|end| time >= end);
        if self.abort_requested || ended {
            debug!(%time, "scenario finished, restoring variables");
            self.uninstall_all(simulators)?;
            self.events.clear();
            self.running = false;
            self.abort_requested = false;
            return Ok(());
        }

        let mut due: Vec<(EventKey, TimePoint)> = self
            .events
            .iter()
            .filter(|(_, event)| event.time <= time)
            .map(|(key, event)| (key, event.time))
            .collect();
        due.sort_by_key(|(_, event_time)| *event_time);

        for (key, _) in due {
            let Some(event) = self.events.remove(key) else {
                continue;
            };
            let action = event.action;
            debug!(
                simulator = action.simulator,
                reference = action.reference,
                ?action.modifier,
                "activating scenario event"
            );
            let record = ActiveModifier {
                simulator: action.simulator,
                variable_type: action.modifier.variable_type(),
                reference: action.reference,
                is_input: action.is_input,
            };
            let Some(simulator) = simulators.get_mut(action.simulator) else {
                continue;
            };
            if action.modifier.is_clear() {
                self.active.retain(|a| *a != record);
            } else if !self.active.contains(&record) {
                self.active.push(record);
            }
            apply_action(simulator, action.reference, action.modifier, action.is_input)?;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
