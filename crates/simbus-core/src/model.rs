//! Model-descriptive types: variable metadata, scalar values, step results.
//!
//! These types describe what a subsimulator *is* -- its variables, their
//! types, causalities, variabilities, and start values -- as opposed to what
//! it currently computes. Descriptions are immutable once a slave has been
//! wrapped; the wrapper caches them at construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of a variable, unique within a model and data type.
///
/// A real variable and an integer variable may share a reference and are
/// still distinct; two same-typed variables with the same reference are
/// aliases.
pub type ValueReference = u32;

// ---------------------------------------------------------------------------
// Variable metadata enums
// ---------------------------------------------------------------------------

/// Variable data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Real,
    Integer,
    Boolean,
    String,
    /// Reserved by the model metadata; not transferable by the core.
    Enumeration,
}

/// Variable causalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableCausality {
    Parameter,
    CalculatedParameter,
    Input,
    Output,
    Local,
}

/// Variable variabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableVariability {
    Constant,
    Fixed,
    Tunable,
    Discrete,
    Continuous,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VariableType::Real => "real",
            VariableType::Integer => "integer",
            VariableType::Boolean => "boolean",
            VariableType::String => "string",
            VariableType::Enumeration => "enumeration",
        };
        f.write_str(text)
    }
}

impl fmt::Display for VariableCausality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VariableCausality::Parameter => "parameter",
            VariableCausality::CalculatedParameter => "calculated_parameter",
            VariableCausality::Input => "input",
            VariableCausality::Output => "output",
            VariableCausality::Local => "local",
        };
        f.write_str(text)
    }
}

impl fmt::Display for VariableVariability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VariableVariability::Constant => "constant",
            VariableVariability::Fixed => "fixed",
            VariableVariability::Tunable => "tunable",
            VariableVariability::Discrete => "discrete",
            VariableVariability::Continuous => "continuous",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Scalar values
// ---------------------------------------------------------------------------

/// A scalar value of one of the transferable variable types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Real(f64),
    Integer(i32),
    Boolean(bool),
    String(String),
}

impl ScalarValue {
    /// The variable type this value belongs to.
    pub fn variable_type(&self) -> VariableType {
        match self {
            ScalarValue::Real(_) => VariableType::Real,
            ScalarValue::Integer(_) => VariableType::Integer,
            ScalarValue::Boolean(_) => VariableType::Boolean,
            ScalarValue::String(_) => VariableType::String,
        }
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Real(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Integer(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::String(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::String(v.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Variable and model descriptions
// ---------------------------------------------------------------------------

/// A description of a model variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescription {
    /// Textual identifier, unique within the model.
    pub name: String,
    /// Numeric identifier, unique within the model and data type.
    pub reference: ValueReference,
    pub variable_type: VariableType,
    pub causality: VariableCausality,
    pub variability: VariableVariability,
    /// Declared start value, if any. Its type must match `variable_type`.
    pub start: Option<ScalarValue>,
}

/// Capability flags reported by a slave.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorCapabilities {
    /// Whether the slave supports state save/restore.
    pub can_save_state: bool,
}

/// A description of a model.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    /// Universally unique identifier for the model.
    pub uuid: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub variables: Vec<VariableDescription>,
    pub capabilities: SimulatorCapabilities,
}

impl ModelDescription {
    /// Look up a variable description by name.
    pub fn find_variable(&self, name: &str) -> Option<&VariableDescription> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Look up a variable description by (type, reference).
    pub fn find_variable_by_reference(
        &self,
        variable_type: VariableType,
        reference: ValueReference,
    ) -> Option<&VariableDescription> {
        self.variables
            .iter()
            .find(|v| v.variable_type == variable_type && v.reference == reference)
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Possible outcomes of a subsimulator time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    /// Step completed.
    Complete,
    /// Step failed, but can be retried with a shorter step size.
    Failed,
    /// Step canceled.
    Canceled,
}
