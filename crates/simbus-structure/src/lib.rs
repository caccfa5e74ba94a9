//! System-structure objects and the injection boundary.
//!
//! External configuration front ends (e.g. XML dialect parsers) produce a
//! [`SystemStructure`] -- named entities plus declared connections -- and an
//! initial-value list. [`inject_system_structure`] feeds both into an
//! execution: entities are registered in insertion order for
//! reproducibility, connection direction is derived from the source
//! variable's causality, and initial values are validated and dispatched to
//! the typed setters.
//!
//! With the `json-loader` feature, structures can also be described as JSON
//! documents and resolved against a [`ModelRegistry`].

use simbus_core::connection::{
    FunctionIndex, FunctionIoId, FunctionIoReference, SimulatorIndex, VariableId,
};
use simbus_core::execution::{Execution, ExecutionError};
use simbus_core::function::{
    FunctionError, FunctionParameterValue, FunctionType, find_io,
};
use simbus_core::model::{ModelDescription, ScalarValue, VariableCausality};
use simbus_core::slave::{Slave, SlaveError};
use simbus_core::time::Duration;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "json-loader")]
mod loader;
#[cfg(feature = "json-loader")]
pub use loader::{
    ConnectionDocument, EntityDocument, InitialValueDocument, StructureDocument,
    VariableRefDocument, load_structure_json,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported at the system-structure boundary.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// Connection type mismatch, missing variable, or causality violation.
    #[error("invalid system structure: {0}")]
    InvalidSystemStructure(String),
    /// One or more initial values were rejected; the message merges the
    /// per-value reports.
    #[error("one or more variable writes were rejected:\n{0}")]
    BadValues(String),
    /// A structure document could not be read.
    #[error("bad file: {0}")]
    BadFile(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Function(#[from] FunctionError),
    #[error(transparent)]
    Slave(#[from] SlaveError),
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A model: a named, instantiable slave template.
pub trait Model: Send + Sync {
    fn description(&self) -> ModelDescription;

    /// Create a slave instance for a subsimulator with the given name.
    fn instantiate(&self, name: &str) -> Result<Box<dyn Slave>, SlaveError>;
}

// ---------------------------------------------------------------------------
// Structure declarations
// ---------------------------------------------------------------------------

/// What kind of entity a [`Entity`] describes.
pub enum EntityKind {
    Simulator {
        model: Arc<dyn Model>,
        step_size_hint: Option<Duration>,
    },
    Function {
        function_type: Arc<dyn FunctionType + Send + Sync>,
        parameters: HashMap<usize, FunctionParameterValue>,
    },
}

/// A named entity of the simulated system.
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
}

/// A qualified reference to one connectable variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRef {
    Simulator {
        entity: String,
        variable: String,
    },
    FunctionIo {
        entity: String,
        /// The io group name, e.g. `"in"`.
        group: String,
        group_instance: usize,
        io_instance: usize,
    },
}

impl VariableRef {
    pub fn simulator(entity: impl Into<String>, variable: impl Into<String>) -> Self {
        VariableRef::Simulator {
            entity: entity.into(),
            variable: variable.into(),
        }
    }

    pub fn function_io(
        entity: impl Into<String>,
        group: impl Into<String>,
        group_instance: usize,
        io_instance: usize,
    ) -> Self {
        VariableRef::FunctionIo {
            entity: entity.into(),
            group: group.into(),
            group_instance,
            io_instance,
        }
    }

    /// The entity this reference belongs to.
    pub fn entity(&self) -> &str {
        match self {
            VariableRef::Simulator { entity, .. } => entity,
            VariableRef::FunctionIo { entity, .. } => entity,
        }
    }
}

/// A declared connection between two qualified variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDecl {
    pub source: VariableRef,
    pub target: VariableRef,
}

/// The full declared system: entities plus connections.
#[derive(Default)]
pub struct SystemStructure {
    pub entities: Vec<Entity>,
    pub connections: Vec<ConnectionDecl>,
}

/// One declared initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialValue {
    pub entity: String,
    pub variable: String,
    pub value: ScalarValue,
}

/// Index assignments produced by [`inject_system_structure`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntityIndexMaps {
    pub simulators: HashMap<String, SimulatorIndex>,
    pub functions: HashMap<String, FunctionIndex>,
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Register a declared system in an execution.
///
/// Entities are instantiated and registered in insertion order; connection
/// direction is derived from the endpoints' causalities; initial values are
/// validated (parameter/input causality, simulator entity) and dispatched to
/// the typed setters. Rejected initial values are accumulated and re-raised
/// as one merged [`StructureError::BadValues`] report.
pub fn inject_system_structure(
    execution: &mut Execution,
    structure: &SystemStructure,
    initial_values: &[InitialValue],
) -> Result<EntityIndexMaps, StructureError> {
    let mut maps = EntityIndexMaps::default();

    // Entities, in configuration order.
    for entity in &structure.entities {
        match &entity.kind {
            EntityKind::Simulator {
                model,
                step_size_hint,
            } => {
                let slave = model.instantiate(&entity.name)?;
                let index = execution.add_slave(slave, entity.name.clone(), *step_size_hint);
                debug!(entity = %entity.name, index, "added simulator");
                maps.simulators.insert(entity.name.clone(), index);
            }
            EntityKind::Function {
                function_type,
                parameters,
            } => {
                let function = function_type.instantiate(parameters)?;
                let index = execution.add_function(function);
                debug!(entity = %entity.name, index, "added function");
                maps.functions.insert(entity.name.clone(), index);
            }
        }
    }

    // Connections.
    for connection in &structure.connections {
        connect(execution, structure, &maps, connection)?;
    }

    // Initial values, with accumulated failure reporting.
    let mut failures = String::new();
    for initial in initial_values {
        if let Err(e) = apply_initial_value(execution, structure, &maps, initial) {
            let _ = writeln!(failures, "{}.{}: {e}", initial.entity, initial.variable);
        }
    }
    if !failures.is_empty() {
        return Err(StructureError::BadValues(failures));
    }

    Ok(maps)
}

fn connect(
    execution: &mut Execution,
    structure: &SystemStructure,
    maps: &EntityIndexMaps,
    connection: &ConnectionDecl,
) -> Result<(), StructureError> {
    let source = resolve(execution, structure, maps, &connection.source)?;
    let target = resolve(execution, structure, maps, &connection.target)?;
    match (source, target) {
        (ResolvedRef::Simulator(a, causality_a), ResolvedRef::Simulator(b, causality_b)) => {
            // The writing end is the one with output (or calculated
            // parameter) causality.
            let a_is_source = matches!(
                causality_a,
                VariableCausality::Output | VariableCausality::CalculatedParameter
            );
            let b_is_source = matches!(
                causality_b,
                VariableCausality::Output | VariableCausality::CalculatedParameter
            );
            let (from, to) = match (a_is_source, b_is_source) {
                (true, false) => (a, b),
                (false, true) => (b, a),
                _ => {
                    return Err(StructureError::InvalidSystemStructure(format!(
                        "cannot determine direction of connection between {:?} and {:?}",
                        connection.source, connection.target
                    )));
                }
            };
            execution.connect_variables(from, to)?;
        }
        (ResolvedRef::Simulator(from, _), ResolvedRef::FunctionIo(to)) => {
            execution.connect_variable_to_function(from, to)?;
        }
        (ResolvedRef::FunctionIo(from), ResolvedRef::Simulator(to, _)) => {
            execution.connect_function_to_variable(from, to)?;
        }
        (ResolvedRef::FunctionIo(_), ResolvedRef::FunctionIo(_)) => {
            return Err(StructureError::InvalidSystemStructure(
                "functions cannot be connected directly to functions".to_owned(),
            ));
        }
    }
    Ok(())
}

enum ResolvedRef {
    Simulator(VariableId, VariableCausality),
    FunctionIo(FunctionIoId),
}

fn resolve(
    execution: &Execution,
    structure: &SystemStructure,
    maps: &EntityIndexMaps,
    reference: &VariableRef,
) -> Result<ResolvedRef, StructureError> {
    match reference {
        VariableRef::Simulator { entity, variable } => {
            let index = *maps.simulators.get(entity).ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!("no simulator entity '{entity}'"))
            })?;
            let description = execution.model_description(index).ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!("no simulator entity '{entity}'"))
            })?;
            let vd = description.find_variable(variable).ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!(
                    "entity '{entity}' has no variable '{variable}'"
                ))
            })?;
            Ok(ResolvedRef::Simulator(
                VariableId {
                    simulator: index,
                    variable_type: vd.variable_type,
                    reference: vd.reference,
                },
                vd.causality,
            ))
        }
        VariableRef::FunctionIo {
            entity,
            group,
            group_instance,
            io_instance,
        } => {
            let index = *maps.functions.get(entity).ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!("no function entity '{entity}'"))
            })?;
            let entity_decl = structure
                .entities
                .iter()
                .find(|e| e.name == *entity)
                .ok_or_else(|| {
                    StructureError::InvalidSystemStructure(format!("no entity '{entity}'"))
                })?;
            let EntityKind::Function {
                function_type,
                parameters,
            } = &entity_decl.kind
            else {
                return Err(StructureError::InvalidSystemStructure(format!(
                    "entity '{entity}' is not a function"
                )));
            };
            // The concrete io layout only exists on an instance.
            let instance = function_type.instantiate(parameters)?;
            let description = instance.description();
            let (group_index, io_index) = find_io(&description, group).ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!(
                    "function '{entity}' has no io group '{group}'"
                ))
            })?;
            let io = &description.io_groups[group_index].ios[io_index];
            Ok(ResolvedRef::FunctionIo(FunctionIoId {
                function: index,
                variable_type: io.variable_type,
                reference: FunctionIoReference {
                    group: group_index,
                    group_instance: *group_instance,
                    io: io_index,
                    io_instance: *io_instance,
                },
            }))
        }
    }
}

fn apply_initial_value(
    execution: &mut Execution,
    structure: &SystemStructure,
    maps: &EntityIndexMaps,
    initial: &InitialValue,
) -> Result<(), StructureError> {
    if maps.functions.contains_key(&initial.entity) {
        return Err(StructureError::InvalidSystemStructure(
            "initial values are only supported for simulator variables".to_owned(),
        ));
    }
    let resolved = resolve(
        execution,
        structure,
        maps,
        &VariableRef::simulator(&initial.entity, &initial.variable),
    )?;
    let ResolvedRef::Simulator(id, causality) = resolved else {
        unreachable!("simulator refs resolve to simulator variables");
    };
    if causality != VariableCausality::Parameter && causality != VariableCausality::Input {
        return Err(StructureError::InvalidSystemStructure(
            "initial values are only supported for parameters and inputs".to_owned(),
        ));
    }
    if initial.value.variable_type() != id.variable_type {
        return Err(StructureError::InvalidSystemStructure(format!(
            "variable has type {}, value has type {}",
            id.variable_type,
            initial.value.variable_type()
        )));
    }
    match &initial.value {
        ScalarValue::Real(v) => {
            execution.set_real_initial_value(id.simulator, id.reference, *v)?;
        }
        ScalarValue::Integer(v) => {
            execution.set_integer_initial_value(id.simulator, id.reference, *v)?;
        }
        ScalarValue::Boolean(v) => {
            execution.set_boolean_initial_value(id.simulator, id.reference, *v)?;
        }
        ScalarValue::String(v) => {
            execution.set_string_initial_value(id.simulator, id.reference, v)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A name-to-template registry used when resolving structure documents.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Model>>,
    function_types: HashMap<String, Arc<dyn FunctionType + Send + Sync>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model(&mut self, name: impl Into<String>, model: Arc<dyn Model>) {
        self.models.insert(name.into(), model);
    }

    pub fn register_function_type(
        &mut self,
        name: impl Into<String>,
        function_type: Arc<dyn FunctionType + Send + Sync>,
    ) {
        self.function_types.insert(name.into(), function_type);
    }

    pub fn model(&self, name: &str) -> Option<&Arc<dyn Model>> {
        self.models.get(name)
    }

    pub fn function_type(&self, name: &str) -> Option<&Arc<dyn FunctionType + Send + Sync>> {
        self.function_types.get(name)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
