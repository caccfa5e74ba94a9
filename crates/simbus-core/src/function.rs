//! The transfer-function protocol.
//!
//! A function is a stateless pure transformation inserted between
//! subsimulator ports. Its I/O ports are grouped hierarchically
//! (group × group instance × io × io instance); the counts and element types
//! of a function *type* may depend on instantiation parameters, so the type
//! description uses symbolic specs that the instance description resolves to
//! concrete values.

use crate::connection::FunctionIoReference;
use crate::model::{VariableCausality, VariableType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// The type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionParameterType {
    Real,
    Integer,
    VariableType,
}

/// A function parameter value supplied at instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FunctionParameterValue {
    Real(f64),
    Integer(i32),
    VariableType(VariableType),
}

/// A description of one function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameterDescription {
    pub name: String,
    pub parameter_type: FunctionParameterType,
    pub default_value: Option<FunctionParameterValue>,
    pub min_value: Option<FunctionParameterValue>,
    pub max_value: Option<FunctionParameterValue>,
}

// ---------------------------------------------------------------------------
// I/O group descriptions
// ---------------------------------------------------------------------------

/// A count in a function *type* description: either a literal or the index
/// of the parameter that supplies it at instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoCountSpec {
    Fixed(usize),
    FromParameter(usize),
}

/// An element type in a function *type* description: either a literal or the
/// index of the parameter that supplies it at instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoTypeSpec {
    Fixed(VariableType),
    FromParameter(usize),
}

/// Symbolic description of one I/O within a group, before instantiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIoTypeDescription {
    /// Empty name means the io inherits its group's name.
    pub name: String,
    pub variable_type: IoTypeSpec,
    pub causality: VariableCausality,
    pub count: IoCountSpec,
}

/// Symbolic description of an I/O group, before instantiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIoGroupTypeDescription {
    pub name: String,
    pub count: IoCountSpec,
    pub ios: Vec<FunctionIoTypeDescription>,
}

/// A description of a function type: its parameters and symbolic I/O layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTypeDescription {
    pub parameters: Vec<FunctionParameterDescription>,
    pub io_groups: Vec<FunctionIoGroupTypeDescription>,
}

/// Concrete description of one I/O of an instantiated function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIoDescription {
    pub name: String,
    pub variable_type: VariableType,
    pub causality: VariableCausality,
    pub count: usize,
}

/// Concrete description of an I/O group of an instantiated function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIoGroupDescription {
    pub name: String,
    pub count: usize,
    pub ios: Vec<FunctionIoDescription>,
}

/// Concrete description of an instantiated function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub io_groups: Vec<FunctionIoGroupDescription>,
}

impl FunctionDescription {
    /// Look up the causality and type of an I/O port, checking instance
    /// bounds.
    pub fn io(&self, reference: FunctionIoReference) -> Option<&FunctionIoDescription> {
        let group = self.io_groups.get(reference.group)?;
        if reference.group_instance >= group.count {
            return None;
        }
        let io = group.ios.get(reference.io)?;
        if reference.io_instance >= io.count {
            return None;
        }
        Some(io)
    }
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Find the index of a parameter by name in a function type description.
pub fn find_parameter(description: &FunctionTypeDescription, name: &str) -> Option<usize> {
    description.parameters.iter().position(|p| p.name == name)
}

/// Find `(group index, io index)` for a named group in an instantiated
/// function description. Ios with empty names inherit the group name.
pub fn find_io(description: &FunctionDescription, group_name: &str) -> Option<(usize, usize)> {
    for (g, group) in description.io_groups.iter().enumerate() {
        if group.name != group_name {
            continue;
        }
        for (i, io) in group.ios.iter().enumerate() {
            if io.name.is_empty() || io.name == group_name {
                return Some((g, i));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by functions and function types.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// An I/O reference points outside the instantiated layout.
    #[error("no such function io: {0:?}")]
    BadIoReference(FunctionIoReference),
    /// A typed accessor was used on an I/O of a different type.
    #[error("function io has type {actual}, not {requested}")]
    IoTypeMismatch {
        requested: VariableType,
        actual: VariableType,
    },
    /// A required instantiation parameter is missing.
    #[error("missing function parameter '{0}'")]
    MissingParameter(String),
    /// An instantiation parameter has the wrong type or an invalid value.
    #[error("bad value for function parameter '{name}': {reason}")]
    BadParameterValue { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An instantiated transfer function.
///
/// The scheduler writes the inputs, invokes [`Function::calculate`], and
/// reads the outputs, once per tick that the function's derived decimation
/// factor divides.
pub trait Function: Send {
    /// Concrete description of the instantiated I/O layout.
    fn description(&self) -> FunctionDescription;

    fn set_real(&mut self, reference: FunctionIoReference, value: f64) -> Result<(), FunctionError>;
    fn set_integer(
        &mut self,
        reference: FunctionIoReference,
        value: i32,
    ) -> Result<(), FunctionError>;
    fn set_boolean(
        &mut self,
        reference: FunctionIoReference,
        value: bool,
    ) -> Result<(), FunctionError>;
    fn set_string(
        &mut self,
        reference: FunctionIoReference,
        value: &str,
    ) -> Result<(), FunctionError>;

    fn get_real(&self, reference: FunctionIoReference) -> Result<f64, FunctionError>;
    fn get_integer(&self, reference: FunctionIoReference) -> Result<i32, FunctionError>;
    fn get_boolean(&self, reference: FunctionIoReference) -> Result<bool, FunctionError>;
    fn get_string(&self, reference: FunctionIoReference) -> Result<String, FunctionError>;

    /// Recompute the outputs from the current inputs.
    fn calculate(&mut self) -> Result<(), FunctionError>;
}

/// A factory for [`Function`] instances.
pub trait FunctionType {
    /// The type's parameters and symbolic I/O layout.
    fn description(&self) -> FunctionTypeDescription;

    /// Create an instance with the given parameter values (keyed by
    /// parameter index). Unsupported parameter combinations are rejected
    /// here, not at transfer time.
    fn instantiate(
        &self,
        parameters: &HashMap<usize, FunctionParameterValue>,
    ) -> Result<Box<dyn Function>, FunctionError>;
}
