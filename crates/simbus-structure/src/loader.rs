//! Data-driven structure loading from JSON.
//!
//! Feature-gated behind `json-loader`. A [`StructureDocument`] names models
//! and function types; resolving it against a [`ModelRegistry`] yields a
//! [`SystemStructure`] and the initial-value list ready for
//! [`crate::inject_system_structure`].

use crate::{
    ConnectionDecl, Entity, EntityKind, InitialValue, ModelRegistry, StructureError,
    SystemStructure, VariableRef,
};
use simbus_core::function::{FunctionParameterType, FunctionParameterValue, find_parameter};
use simbus_core::model::{ScalarValue, VariableType};
use simbus_core::time::to_duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Document structures
// ---------------------------------------------------------------------------

/// Top-level structure document.
#[derive(Debug, serde::Deserialize)]
pub struct StructureDocument {
    #[serde(default)]
    pub entities: Vec<EntityDocument>,
    #[serde(default)]
    pub connections: Vec<ConnectionDocument>,
    #[serde(default)]
    pub initial_values: Vec<InitialValueDocument>,
}

/// JSON representation of an entity. Exactly one of `model` and `function`
/// must be set.
#[derive(Debug, serde::Deserialize)]
pub struct EntityDocument {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    /// Step-size hint in seconds (simulators only).
    #[serde(default)]
    pub step_size_hint: Option<f64>,
    /// Function parameters by name (functions only).
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// JSON representation of one connection endpoint. For function entities,
/// `variable` names the io group.
#[derive(Debug, serde::Deserialize)]
pub struct VariableRefDocument {
    pub entity: String,
    pub variable: String,
    #[serde(default)]
    pub group_instance: usize,
    #[serde(default)]
    pub io_instance: usize,
}

/// JSON representation of a connection.
#[derive(Debug, serde::Deserialize)]
pub struct ConnectionDocument {
    pub source: VariableRefDocument,
    pub target: VariableRefDocument,
}

/// JSON representation of an initial value.
#[derive(Debug, serde::Deserialize)]
pub struct InitialValueDocument {
    pub entity: String,
    pub variable: String,
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse a JSON structure document and resolve it against a registry.
pub fn load_structure_json(
    json: &str,
    registry: &ModelRegistry,
) -> Result<(SystemStructure, Vec<InitialValue>), StructureError> {
    let document: StructureDocument =
        serde_json::from_str(json).map_err(|e| StructureError::BadFile(e.to_string()))?;

    let mut structure = SystemStructure::default();
    let mut function_entities: HashSet<String> = HashSet::new();
    let mut entity_models: HashMap<String, String> = HashMap::new();

    for entity in &document.entities {
        let kind = match (&entity.model, &entity.function) {
            (Some(model_name), None) => {
                let model = registry.model(model_name).ok_or_else(|| {
                    StructureError::InvalidSystemStructure(format!(
                        "unknown model '{model_name}'"
                    ))
                })?;
                entity_models.insert(entity.name.clone(), model_name.clone());
                EntityKind::Simulator {
                    model: Arc::clone(model),
                    step_size_hint: entity.step_size_hint.map(to_duration),
                }
            }
            (None, Some(function_name)) => {
                let function_type = registry.function_type(function_name).ok_or_else(|| {
                    StructureError::InvalidSystemStructure(format!(
                        "unknown function type '{function_name}'"
                    ))
                })?;
                let parameters =
                    convert_parameters(function_type.as_ref(), &entity.parameters)?;
                function_entities.insert(entity.name.clone());
                EntityKind::Function {
                    function_type: Arc::clone(function_type),
                    parameters,
                }
            }
            _ => {
                return Err(StructureError::InvalidSystemStructure(format!(
                    "entity '{}' must name exactly one of 'model' and 'function'",
                    entity.name
                )));
            }
        };
        structure.entities.push(Entity {
            name: entity.name.clone(),
            kind,
        });
    }

    for connection in &document.connections {
        structure.connections.push(ConnectionDecl {
            source: convert_ref(&connection.source, &function_entities),
            target: convert_ref(&connection.target, &function_entities),
        });
    }

    let mut initial_values = Vec::new();
    for initial in &document.initial_values {
        let model_name = entity_models.get(&initial.entity).ok_or_else(|| {
            StructureError::InvalidSystemStructure(format!(
                "initial value for unknown simulator entity '{}'",
                initial.entity
            ))
        })?;
        let description = registry
            .model(model_name)
            .map(|m| m.description())
            .ok_or_else(|| {
                StructureError::InvalidSystemStructure(format!("unknown model '{model_name}'"))
            })?;
        let vd = description.find_variable(&initial.variable).ok_or_else(|| {
            StructureError::InvalidSystemStructure(format!(
                "entity '{}' has no variable '{}'",
                initial.entity, initial.variable
            ))
        })?;
        initial_values.push(InitialValue {
            entity: initial.entity.clone(),
            variable: initial.variable.clone(),
            value: convert_scalar(&initial.value, vd.variable_type)?,
        });
    }

    Ok((structure, initial_values))
}

fn convert_ref(
    document: &VariableRefDocument,
    function_entities: &HashSet<String>,
) -> VariableRef {
    if function_entities.contains(&document.entity) {
        VariableRef::FunctionIo {
            entity: document.entity.clone(),
            group: document.variable.clone(),
            group_instance: document.group_instance,
            io_instance: document.io_instance,
        }
    } else {
        VariableRef::Simulator {
            entity: document.entity.clone(),
            variable: document.variable.clone(),
        }
    }
}

fn convert_parameters(
    function_type: &(dyn simbus_core::function::FunctionType + Send + Sync),
    parameters: &HashMap<String, serde_json::Value>,
) -> Result<HashMap<usize, FunctionParameterValue>, StructureError> {
    let description = function_type.description();
    let mut converted = HashMap::new();
    for (name, value) in parameters {
        let index = find_parameter(&description, name).ok_or_else(|| {
            StructureError::InvalidSystemStructure(format!("unknown function parameter '{name}'"))
        })?;
        let parameter = &description.parameters[index];
        let bad = || {
            StructureError::InvalidSystemStructure(format!(
                "bad value for function parameter '{name}'"
            ))
        };
        let converted_value = match parameter.parameter_type {
            FunctionParameterType::Real => {
                FunctionParameterValue::Real(value.as_f64().ok_or_else(bad)?)
            }
            FunctionParameterType::Integer => {
                FunctionParameterValue::Integer(value.as_i64().ok_or_else(bad)? as i32)
            }
            FunctionParameterType::VariableType => {
                let text = value.as_str().ok_or_else(bad)?;
                FunctionParameterValue::VariableType(parse_variable_type(text).ok_or_else(bad)?)
            }
        };
        converted.insert(index, converted_value);
    }
    Ok(converted)
}

fn parse_variable_type(text: &str) -> Option<VariableType> {
    match text {
        "real" => Some(VariableType::Real),
        "integer" => Some(VariableType::Integer),
        "boolean" => Some(VariableType::Boolean),
        "string" => Some(VariableType::String),
        _ => None,
    }
}

fn convert_scalar(
    value: &serde_json::Value,
    variable_type: VariableType,
) -> Result<ScalarValue, StructureError> {
    let bad = || {
        StructureError::InvalidSystemStructure(format!(
            "value {value} does not match variable type {variable_type}"
        ))
    };
    match variable_type {
        VariableType::Real => Ok(ScalarValue::Real(value.as_f64().ok_or_else(bad)?)),
        VariableType::Integer => Ok(ScalarValue::Integer(value.as_i64().ok_or_else(bad)? as i32)),
        VariableType::Boolean => Ok(ScalarValue::Boolean(value.as_bool().ok_or_else(bad)?)),
        VariableType::String => Ok(ScalarValue::String(
            value.as_str().ok_or_else(bad)?.to_owned(),
        )),
        VariableType::Enumeration => Err(bad()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject_system_structure;
    use simbus_core::execution::Execution;
    use simbus_core::fixed_step::FixedStepScheduler;
    use simbus_core::model::ModelDescription;
    use simbus_core::slave::{Slave, SlaveError};
    use simbus_core::test_utils::MockSlave;
    use simbus_core::time::{TimePoint, to_duration, to_time_point};
    use simbus_functions::LinearTransformationType;

    struct IdentityModel;

    impl crate::Model for IdentityModel {
        fn description(&self) -> ModelDescription {
            MockSlave::new().model_description()
        }

        fn instantiate(&self, _name: &str) -> Result<Box<dyn Slave>, SlaveError> {
            Ok(Box::new(MockSlave::new()))
        }
    }

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register_model("identity", Arc::new(IdentityModel));
        registry.register_function_type("linear", Arc::new(LinearTransformationType));
        registry
    }

    const DOCUMENT: &str = r#"{
        "entities": [
            {"name": "src", "model": "identity"},
            {"name": "scale", "function": "linear",
             "parameters": {"offset": 3.0, "factor": 5.0}},
            {"name": "dst", "model": "identity"}
        ],
        "connections": [
            {"source": {"entity": "src", "variable": "realOut"},
             "target": {"entity": "scale", "variable": "in"}},
            {"source": {"entity": "scale", "variable": "out"},
             "target": {"entity": "dst", "variable": "realIn"}}
        ],
        "initial_values": [
            {"entity": "src", "variable": "realIn", "value": 10.0}
        ]
    }"#;

    #[test]
    fn document_resolves_and_runs() {
        let registry = registry();
        let (structure, initial_values) = load_structure_json(DOCUMENT, &registry).unwrap();
        assert_eq!(structure.entities.len(), 3);
        assert_eq!(structure.connections.len(), 2);
        assert_eq!(initial_values.len(), 1);

        let mut exe = Execution::new(
            TimePoint::ZERO,
            FixedStepScheduler::new(to_duration(0.1), Some(0)),
        );
        let maps = inject_system_structure(&mut exe, &structure, &initial_values).unwrap();
        exe.simulator_mut(maps.simulators["dst"])
            .unwrap()
            .expose_for_getting(simbus_core::model::VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
        exe.simulate_until(Some(to_time_point(0.3))).unwrap();
        let dst = exe.simulator(maps.simulators["dst"]).unwrap();
        assert_eq!(dst.get_real(MockSlave::REAL_OUT).unwrap(), 53.0);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let registry = registry();
        let json = r#"{"entities": [{"name": "x", "model": "nope"}]}"#;
        assert!(matches!(
            load_structure_json(json, &registry),
            Err(StructureError::InvalidSystemStructure(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_bad_file() {
        let registry = registry();
        assert!(matches!(
            load_structure_json("{not json", &registry),
            Err(StructureError::BadFile(_))
        ));
    }

    #[test]
    fn entity_must_pick_model_or_function() {
        let registry = registry();
        let json = r#"{"entities": [{"name": "x"}]}"#;
        assert!(matches!(
            load_structure_json(json, &registry),
            Err(StructureError::InvalidSystemStructure(_))
        ));

        let json = r#"{"entities": [{"name": "x", "model": "identity", "function": "linear"}]}"#;
        assert!(matches!(
            load_structure_json(json, &registry),
            Err(StructureError::InvalidSystemStructure(_))
        ));
    }

    #[test]
    fn initial_value_types_follow_the_model_description() {
        let registry = registry();
        let json = r#"{
            "entities": [{"name": "src", "model": "identity"}],
            "initial_values": [{"entity": "src", "variable": "realIn", "value": "oops"}]
        }"#;
        assert!(matches!(
            load_structure_json(json, &registry),
            Err(StructureError::InvalidSystemStructure(_))
        ));
    }
}
