//! Fully-qualified port identifiers and typed connection edges.
//!
//! A connection is a directed edge between an output port and an input port.
//! Three kinds exist: subsimulator to subsimulator, subsimulator to function,
//! and function to subsimulator. At most one edge may terminate at any given
//! destination port.

use crate::model::{ValueReference, VariableCausality, VariableType};
use serde::{Deserialize, Serialize};

/// Dense index of a subsimulator within an execution, assigned on
/// registration.
pub type SimulatorIndex = usize;

/// Dense index of a function within an execution.
pub type FunctionIndex = usize;

/// Monotonic macro-step counter. Starts at 0 and increments after each step.
pub type StepNumber = i64;

// ---------------------------------------------------------------------------
// Port identifiers
// ---------------------------------------------------------------------------

/// Identifies a variable of a specific subsimulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableId {
    pub simulator: SimulatorIndex,
    pub variable_type: VariableType,
    pub reference: ValueReference,
}

/// Position of an I/O port within a function's hierarchical group layout:
/// `group × group instance × io × io instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionIoReference {
    pub group: usize,
    pub group_instance: usize,
    pub io: usize,
    pub io_instance: usize,
}

/// Identifies an I/O port of a specific function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionIoId {
    pub function: FunctionIndex,
    pub variable_type: VariableType,
    pub reference: FunctionIoReference,
}

// ---------------------------------------------------------------------------
// Connection records
// ---------------------------------------------------------------------------

/// A subsimulator-to-subsimulator edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimToSimConnection {
    pub source: VariableId,
    pub target: VariableId,
}

/// A subsimulator-to-function edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimToFunConnection {
    pub source: VariableId,
    pub target: FunctionIoId,
}

/// A function-to-subsimulator edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunToSimConnection {
    pub source: FunctionIoId,
    pub target: VariableId,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when a connection is added or validated.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The destination port already has an incoming edge.
    #[error("input variable already connected")]
    AlreadyConnected,
    /// Source and target types differ.
    #[error("connection type mismatch: source is {source_type}, target is {target}")]
    TypeMismatch {
        source_type: VariableType,
        target: VariableType,
    },
    /// The variable type cannot be carried by this edge kind.
    #[error("variables of type '{0}' cannot be transferred on this connection")]
    UnsupportedType(VariableType),
    /// No variable with the requested causality/type/reference exists.
    #[error(
        "cannot find variable with reference {reference}, causality {causality} and type \
         {variable_type} for simulator with index {simulator} and name {name}"
    )]
    NoSuchVariable {
        simulator: SimulatorIndex,
        name: String,
        variable_type: VariableType,
        causality: VariableCausality,
        reference: ValueReference,
    },
    /// A function port was used with the wrong causality.
    #[error("error connecting function variable: wrong causality")]
    FunctionCausalityMismatch,
    /// A function port reference points outside the function's description.
    #[error("no such function io: group {group}, io {io}")]
    NoSuchFunctionIo { group: usize, io: usize },
    /// The simulator index is not registered.
    #[error("no simulator with index {0}")]
    NoSuchSimulator(SimulatorIndex),
    /// The function index is not registered.
    #[error("no function with index {0}")]
    NoSuchFunction(FunctionIndex),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_id_equality_and_hash() {
        use std::collections::HashMap;
        let a = VariableId {
            simulator: 0,
            variable_type: VariableType::Real,
            reference: 1,
        };
        let b = a;
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "edge");
        assert_eq!(map[&b], "edge");
    }

    #[test]
    fn function_io_reference_distinguishes_instances() {
        let a = FunctionIoReference {
            group: 0,
            group_instance: 0,
            io: 0,
            io_instance: 0,
        };
        let b = FunctionIoReference {
            io_instance: 1,
            ..a
        };
        assert_ne!(a, b);
    }
}
