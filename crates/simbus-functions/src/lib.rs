//! Transfer-function implementations for the simbus co-simulation master.
//!
//! Two function families are provided:
//!
//! - [`LinearTransformation`]: `out = offset + factor * in` on a single real
//!   port pair.
//! - [`VectorSum`]: element-wise sum of N equally-dimensioned numeric input
//!   vectors.
//!
//! Each comes with a [`FunctionType`] implementation so instances can be
//! created from parameter maps, e.g. by the system-structure injection
//! helper.

use simbus_core::connection::FunctionIoReference;
use simbus_core::function::{
    Function, FunctionDescription, FunctionError, FunctionIoDescription,
    FunctionIoGroupDescription, FunctionIoGroupTypeDescription, FunctionIoTypeDescription,
    FunctionParameterDescription, FunctionParameterType, FunctionParameterValue, FunctionType,
    FunctionTypeDescription, IoCountSpec, IoTypeSpec,
};
use simbus_core::model::{VariableCausality, VariableType};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Linear transformation
// ---------------------------------------------------------------------------

/// The input port of a [`LinearTransformation`].
pub const LINEAR_TRANSFORMATION_IN: FunctionIoReference = FunctionIoReference {
    group: 0,
    group_instance: 0,
    io: 0,
    io_instance: 0,
};

/// The output port of a [`LinearTransformation`].
pub const LINEAR_TRANSFORMATION_OUT: FunctionIoReference = FunctionIoReference {
    group: 1,
    group_instance: 0,
    io: 0,
    io_instance: 0,
};

/// Parameter indices of [`LinearTransformationType`].
pub mod linear_transformation_parameters {
    pub const OFFSET: usize = 0;
    pub const FACTOR: usize = 1;
}

/// A single-port affine map: `out = offset + factor * in`.
#[derive(Debug, Clone)]
pub struct LinearTransformation {
    offset: f64,
    factor: f64,
    input: f64,
    output: f64,
}

impl LinearTransformation {
    pub fn new(offset: f64, factor: f64) -> Self {
        Self {
            offset,
            factor,
            input: 0.0,
            output: 0.0,
        }
    }
}

impl Function for LinearTransformation {
    fn description(&self) -> FunctionDescription {
        FunctionDescription {
            io_groups: vec![
                FunctionIoGroupDescription {
                    name: "in".to_owned(),
                    count: 1,
                    ios: vec![FunctionIoDescription {
                        name: String::new(),
                        variable_type: VariableType::Real,
                        causality: VariableCausality::Input,
                        count: 1,
                    }],
                },
                FunctionIoGroupDescription {
                    name: "out".to_owned(),
                    count: 1,
                    ios: vec![FunctionIoDescription {
                        name: String::new(),
                        variable_type: VariableType::Real,
                        causality: VariableCausality::Output,
                        count: 1,
                    }],
                },
            ],
        }
    }

    fn set_real(&mut self, reference: FunctionIoReference, value: f64) -> Result<(), FunctionError> {
        if reference != LINEAR_TRANSFORMATION_IN {
            return Err(FunctionError::BadIoReference(reference));
        }
        self.input = value;
        Ok(())
    }

    fn set_integer(&mut self, _: FunctionIoReference, _: i32) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Integer, VariableType::Real))
    }

    fn set_boolean(&mut self, _: FunctionIoReference, _: bool) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Real))
    }

    fn set_string(&mut self, _: FunctionIoReference, _: &str) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Real))
    }

    fn get_real(&self, reference: FunctionIoReference) -> Result<f64, FunctionError> {
        if reference == LINEAR_TRANSFORMATION_IN {
            Ok(self.input)
        } else if reference == LINEAR_TRANSFORMATION_OUT {
            Ok(self.output)
        } else {
            Err(FunctionError::BadIoReference(reference))
        }
    }

    fn get_integer(&self, _: FunctionIoReference) -> Result<i32, FunctionError> {
        Err(type_mismatch(VariableType::Integer, VariableType::Real))
    }

    fn get_boolean(&self, _: FunctionIoReference) -> Result<bool, FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Real))
    }

    fn get_string(&self, _: FunctionIoReference) -> Result<String, FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Real))
    }

    fn calculate(&mut self) -> Result<(), FunctionError> {
        self.output = self.offset + self.factor * self.input;
        Ok(())
    }
}

/// Factory for [`LinearTransformation`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearTransformationType;

impl FunctionType for LinearTransformationType {
    fn description(&self) -> FunctionTypeDescription {
        FunctionTypeDescription {
            parameters: vec![
                FunctionParameterDescription {
                    name: "offset".to_owned(),
                    parameter_type: FunctionParameterType::Real,
                    default_value: Some(FunctionParameterValue::Real(0.0)),
                    min_value: None,
                    max_value: None,
                },
                FunctionParameterDescription {
                    name: "factor".to_owned(),
                    parameter_type: FunctionParameterType::Real,
                    default_value: Some(FunctionParameterValue::Real(1.0)),
                    min_value: None,
                    max_value: None,
                },
            ],
            io_groups: vec![
                FunctionIoGroupTypeDescription {
                    name: "in".to_owned(),
                    count: IoCountSpec::Fixed(1),
                    ios: vec![FunctionIoTypeDescription {
                        name: String::new(),
                        variable_type: IoTypeSpec::Fixed(VariableType::Real),
                        causality: VariableCausality::Input,
                        count: IoCountSpec::Fixed(1),
                    }],
                },
                FunctionIoGroupTypeDescription {
                    name: "out".to_owned(),
                    count: IoCountSpec::Fixed(1),
                    ios: vec![FunctionIoTypeDescription {
                        name: String::new(),
                        variable_type: IoTypeSpec::Fixed(VariableType::Real),
                        causality: VariableCausality::Output,
                        count: IoCountSpec::Fixed(1),
                    }],
                },
            ],
        }
    }

    fn instantiate(
        &self,
        parameters: &HashMap<usize, FunctionParameterValue>,
    ) -> Result<Box<dyn Function>, FunctionError> {
        let offset = real_parameter(
            parameters,
            linear_transformation_parameters::OFFSET,
            "offset",
            0.0,
        )?;
        let factor = real_parameter(
            parameters,
            linear_transformation_parameters::FACTOR,
            "factor",
            1.0,
        )?;
        Ok(Box::new(LinearTransformation::new(offset, factor)))
    }
}

// ---------------------------------------------------------------------------
// Vector sum
// ---------------------------------------------------------------------------

/// Parameter indices of [`VectorSumType`].
pub mod vector_sum_parameters {
    pub const INPUT_COUNT: usize = 0;
    pub const NUMERIC_TYPE: usize = 1;
    pub const DIMENSION: usize = 2;
}

/// Element-wise sum of `input_count` vectors of length `dimension`.
///
/// The `in` group has one instance per summand; the `out` group has a single
/// instance. The io instance index addresses the vector element.
#[derive(Debug, Clone)]
pub struct VectorSum<T> {
    inputs: Vec<Vec<T>>,
    output: Vec<T>,
}

impl<T: Copy + Default + std::ops::AddAssign> VectorSum<T> {
    pub fn new(input_count: usize, dimension: usize) -> Self {
        Self {
            inputs: vec![vec![T::default(); dimension]; input_count],
            output: vec![T::default(); dimension],
        }
    }

    fn describe(&self, element_type: VariableType) -> FunctionDescription {
        FunctionDescription {
            io_groups: vec![
                FunctionIoGroupDescription {
                    name: "in".to_owned(),
                    count: self.inputs.len(),
                    ios: vec![FunctionIoDescription {
                        name: String::new(),
                        variable_type: element_type,
                        causality: VariableCausality::Input,
                        count: self.output.len(),
                    }],
                },
                FunctionIoGroupDescription {
                    name: "out".to_owned(),
                    count: 1,
                    ios: vec![FunctionIoDescription {
                        name: String::new(),
                        variable_type: element_type,
                        causality: VariableCausality::Output,
                        count: self.output.len(),
                    }],
                },
            ],
        }
    }

    fn set_element(&mut self, reference: FunctionIoReference, value: T) -> Result<(), FunctionError> {
        if reference.group != 0 || reference.io != 0 {
            return Err(FunctionError::BadIoReference(reference));
        }
        let element = self
            .inputs
            .get_mut(reference.group_instance)
            .and_then(|input| input.get_mut(reference.io_instance))
            .ok_or(FunctionError::BadIoReference(reference))?;
        *element = value;
        Ok(())
    }

    fn get_element(&self, reference: FunctionIoReference) -> Result<T, FunctionError> {
        if reference.io != 0 {
            return Err(FunctionError::BadIoReference(reference));
        }
        match reference.group {
            0 => self
                .inputs
                .get(reference.group_instance)
                .and_then(|input| input.get(reference.io_instance))
                .copied()
                .ok_or(FunctionError::BadIoReference(reference)),
            1 if reference.group_instance == 0 => self
                .output
                .get(reference.io_instance)
                .copied()
                .ok_or(FunctionError::BadIoReference(reference)),
            _ => Err(FunctionError::BadIoReference(reference)),
        }
    }

    fn sum(&mut self) {
        for (d, out) in self.output.iter_mut().enumerate() {
            *out = T::default();
            for input in &self.inputs {
                *out += input[d];
            }
        }
    }
}

impl Function for VectorSum<f64> {
    fn description(&self) -> FunctionDescription {
        self.describe(VariableType::Real)
    }

    fn set_real(&mut self, reference: FunctionIoReference, value: f64) -> Result<(), FunctionError> {
        self.set_element(reference, value)
    }

    fn set_integer(&mut self, _: FunctionIoReference, _: i32) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Integer, VariableType::Real))
    }

    fn set_boolean(&mut self, _: FunctionIoReference, _: bool) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Real))
    }

    fn set_string(&mut self, _: FunctionIoReference, _: &str) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Real))
    }

    fn get_real(&self, reference: FunctionIoReference) -> Result<f64, FunctionError> {
        self.get_element(reference)
    }

    fn get_integer(&self, _: FunctionIoReference) -> Result<i32, FunctionError> {
        Err(type_mismatch(VariableType::Integer, VariableType::Real))
    }

    fn get_boolean(&self, _: FunctionIoReference) -> Result<bool, FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Real))
    }

    fn get_string(&self, _: FunctionIoReference) -> Result<String, FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Real))
    }

    fn calculate(&mut self) -> Result<(), FunctionError> {
        self.sum();
        Ok(())
    }
}

impl Function for VectorSum<i32> {
    fn description(&self) -> FunctionDescription {
        self.describe(VariableType::Integer)
    }

    fn set_real(&mut self, _: FunctionIoReference, _: f64) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Real, VariableType::Integer))
    }

    fn set_integer(&mut self, reference: FunctionIoReference, value: i32) -> Result<(), FunctionError> {
        self.set_element(reference, value)
    }

    fn set_boolean(&mut self, _: FunctionIoReference, _: bool) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Integer))
    }

    fn set_string(&mut self, _: FunctionIoReference, _: &str) -> Result<(), FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Integer))
    }

    fn get_real(&self, _: FunctionIoReference) -> Result<f64, FunctionError> {
        Err(type_mismatch(VariableType::Real, VariableType::Integer))
    }

    fn get_integer(&self, reference: FunctionIoReference) -> Result<i32, FunctionError> {
        self.get_element(reference)
    }

    fn get_boolean(&self, _: FunctionIoReference) -> Result<bool, FunctionError> {
        Err(type_mismatch(VariableType::Boolean, VariableType::Integer))
    }

    fn get_string(&self, _: FunctionIoReference) -> Result<String, FunctionError> {
        Err(type_mismatch(VariableType::String, VariableType::Integer))
    }

    fn calculate(&mut self) -> Result<(), FunctionError> {
        self.sum();
        Ok(())
    }
}

/// Factory for [`VectorSum`] instances.
///
/// The element type is an instantiation parameter restricted to `real` and
/// `integer`; summing strings or booleans is rejected here rather than at
/// the transfer layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorSumType;

impl FunctionType for VectorSumType {
    fn description(&self) -> FunctionTypeDescription {
        FunctionTypeDescription {
            parameters: vec![
                FunctionParameterDescription {
                    name: "inputCount".to_owned(),
                    parameter_type: FunctionParameterType::Integer,
                    default_value: Some(FunctionParameterValue::Integer(1)),
                    min_value: Some(FunctionParameterValue::Integer(1)),
                    max_value: None,
                },
                FunctionParameterDescription {
                    name: "numericType".to_owned(),
                    parameter_type: FunctionParameterType::VariableType,
                    default_value: Some(FunctionParameterValue::VariableType(VariableType::Real)),
                    min_value: None,
                    max_value: None,
                },
                FunctionParameterDescription {
                    name: "dimension".to_owned(),
                    parameter_type: FunctionParameterType::Integer,
                    default_value: Some(FunctionParameterValue::Integer(1)),
                    min_value: Some(FunctionParameterValue::Integer(1)),
                    max_value: None,
                },
            ],
            io_groups: vec![
                FunctionIoGroupTypeDescription {
                    name: "in".to_owned(),
                    count: IoCountSpec::FromParameter(vector_sum_parameters::INPUT_COUNT),
                    ios: vec![FunctionIoTypeDescription {
                        name: String::new(),
                        variable_type: IoTypeSpec::FromParameter(
                            vector_sum_parameters::NUMERIC_TYPE,
                        ),
                        causality: VariableCausality::Input,
                        count: IoCountSpec::FromParameter(vector_sum_parameters::DIMENSION),
                    }],
                },
                FunctionIoGroupTypeDescription {
                    name: "out".to_owned(),
                    count: IoCountSpec::Fixed(1),
                    ios: vec![FunctionIoTypeDescription {
                        name: String::new(),
                        variable_type: IoTypeSpec::FromParameter(
                            vector_sum_parameters::NUMERIC_TYPE,
                        ),
                        causality: VariableCausality::Output,
                        count: IoCountSpec::FromParameter(vector_sum_parameters::DIMENSION),
                    }],
                },
            ],
        }
    }

    fn instantiate(
        &self,
        parameters: &HashMap<usize, FunctionParameterValue>,
    ) -> Result<Box<dyn Function>, FunctionError> {
        let input_count = integer_parameter(
            parameters,
            vector_sum_parameters::INPUT_COUNT,
            "inputCount",
            1,
        )?;
        let dimension =
            integer_parameter(parameters, vector_sum_parameters::DIMENSION, "dimension", 1)?;
        if input_count < 1 {
            return Err(FunctionError::BadParameterValue {
                name: "inputCount".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if dimension < 1 {
            return Err(FunctionError::BadParameterValue {
                name: "dimension".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let numeric_type = match parameters.get(&vector_sum_parameters::NUMERIC_TYPE) {
            None => VariableType::Real,
            Some(FunctionParameterValue::VariableType(t)) => *t,
            Some(_) => {
                return Err(FunctionError::BadParameterValue {
                    name: "numericType".to_owned(),
                    reason: "expected a variable type".to_owned(),
                });
            }
        };

        match numeric_type {
            VariableType::Real => Ok(Box::new(VectorSum::<f64>::new(
                input_count as usize,
                dimension as usize,
            ))),
            VariableType::Integer => Ok(Box::new(VectorSum::<i32>::new(
                input_count as usize,
                dimension as usize,
            ))),
            other => Err(FunctionError::BadParameterValue {
                name: "numericType".to_owned(),
                reason: format!("cannot sum variables of type '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn type_mismatch(requested: VariableType, actual: VariableType) -> FunctionError {
    FunctionError::IoTypeMismatch { requested, actual }
}

fn real_parameter(
    parameters: &HashMap<usize, FunctionParameterValue>,
    index: usize,
    name: &str,
    default: f64,
) -> Result<f64, FunctionError> {
    match parameters.get(&index) {
        None => Ok(default),
        Some(FunctionParameterValue::Real(v)) => Ok(*v),
        Some(_) => Err(FunctionError::BadParameterValue {
            name: name.to_owned(),
            reason: "expected a real value".to_owned(),
        }),
    }
}

fn integer_parameter(
    parameters: &HashMap<usize, FunctionParameterValue>,
    index: usize,
    name: &str,
    default: i32,
) -> Result<i32, FunctionError> {
    match parameters.get(&index) {
        None => Ok(default),
        Some(FunctionParameterValue::Integer(v)) => Ok(*v),
        Some(_) => Err(FunctionError::BadParameterValue {
            name: name.to_owned(),
            reason: "expected an integer value".to_owned(),
        }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use simbus_core::function::{find_io, find_parameter};

    fn reference(
        group: usize,
        group_instance: usize,
        io: usize,
        io_instance: usize,
    ) -> FunctionIoReference {
        FunctionIoReference {
            group,
            group_instance,
            io,
            io_instance,
        }
    }

    // -----------------------------------------------------------------------
    // Linear transformation
    // -----------------------------------------------------------------------

    #[test]
    fn linear_transformation_standalone() {
        let function_type = LinearTransformationType;
        let type_description = function_type.description();

        let mut parameters = HashMap::new();
        parameters.insert(
            find_parameter(&type_description, "offset").unwrap(),
            FunctionParameterValue::Real(3.0),
        );
        parameters.insert(
            find_parameter(&type_description, "factor").unwrap(),
            FunctionParameterValue::Real(5.0),
        );

        let mut function = function_type.instantiate(&parameters).unwrap();
        let description = function.description();
        assert_eq!(description.io_groups.len(), 2);
        assert_eq!(description.io_groups[0].ios.len(), 1);
        assert_eq!(description.io_groups[1].ios.len(), 1);

        let (in_group, in_io) = find_io(&description, "in").unwrap();
        let (out_group, out_io) = find_io(&description, "out").unwrap();

        function
            .set_real(reference(in_group, 0, in_io, 0), 10.0)
            .unwrap();
        function.calculate().unwrap();
        assert_eq!(
            function.get_real(reference(out_group, 0, out_io, 0)).unwrap(),
            53.0
        );

        function
            .set_real(reference(in_group, 0, in_io, 0), -1.0)
            .unwrap();
        function.calculate().unwrap();
        assert_eq!(
            function.get_real(reference(out_group, 0, out_io, 0)).unwrap(),
            -2.0
        );
    }

    #[test]
    fn linear_transformation_defaults_are_identity() {
        let mut function = LinearTransformationType
            .instantiate(&HashMap::new())
            .unwrap();
        function.set_real(LINEAR_TRANSFORMATION_IN, 4.5).unwrap();
        function.calculate().unwrap();
        assert_eq!(function.get_real(LINEAR_TRANSFORMATION_OUT).unwrap(), 4.5);
    }

    #[test]
    fn linear_transformation_rejects_foreign_ports() {
        let mut function = LinearTransformation::new(0.0, 1.0);
        assert!(matches!(
            function.set_real(reference(3, 0, 0, 0), 1.0),
            Err(FunctionError::BadIoReference(_))
        ));
        assert!(matches!(
            function.set_integer(LINEAR_TRANSFORMATION_IN, 1),
            Err(FunctionError::IoTypeMismatch { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Vector sum
    // -----------------------------------------------------------------------

    #[test]
    fn vector_sum_standalone() {
        let function_type = VectorSumType;
        let type_description = function_type.description();

        let mut parameters = HashMap::new();
        parameters.insert(
            find_parameter(&type_description, "inputCount").unwrap(),
            FunctionParameterValue::Integer(3),
        );
        parameters.insert(
            find_parameter(&type_description, "numericType").unwrap(),
            FunctionParameterValue::VariableType(VariableType::Integer),
        );
        parameters.insert(
            find_parameter(&type_description, "dimension").unwrap(),
            FunctionParameterValue::Integer(2),
        );

        let mut function = function_type.instantiate(&parameters).unwrap();
        let description = function.description();
        assert_eq!(description.io_groups.len(), 2);
        assert_eq!(description.io_groups[0].count, 3);
        assert_eq!(description.io_groups[1].count, 1);
        assert_eq!(
            description.io_groups[0].ios[0].variable_type,
            VariableType::Integer
        );
        assert_eq!(description.io_groups[0].ios[0].count, 2);
        assert_eq!(description.io_groups[1].ios[0].count, 2);

        let (in_group, in_io) = find_io(&description, "in").unwrap();
        let (out_group, out_io) = find_io(&description, "out").unwrap();
        function.set_integer(reference(in_group, 0, in_io, 0), 1).unwrap();
        function.set_integer(reference(in_group, 0, in_io, 1), 2).unwrap();
        function.set_integer(reference(in_group, 1, in_io, 0), 3).unwrap();
        function.set_integer(reference(in_group, 1, in_io, 1), 5).unwrap();
        function.set_integer(reference(in_group, 2, in_io, 0), 7).unwrap();
        function.set_integer(reference(in_group, 2, in_io, 1), 11).unwrap();
        function.calculate().unwrap();
        assert_eq!(
            function.get_integer(reference(out_group, 0, out_io, 0)).unwrap(),
            11
        );
        assert_eq!(
            function.get_integer(reference(out_group, 0, out_io, 1)).unwrap(),
            18
        );
    }

    #[test]
    fn vector_sum_real_instances_sum_reals() {
        let mut function = VectorSum::<f64>::new(2, 1);
        function.set_real(reference(0, 0, 0, 0), 1.5).unwrap();
        function.set_real(reference(0, 1, 0, 0), 2.25).unwrap();
        function.calculate().unwrap();
        assert_eq!(function.get_real(reference(1, 0, 0, 0)).unwrap(), 3.75);
    }

    #[test]
    fn vector_sum_rejects_string_element_type() {
        let mut parameters = HashMap::new();
        parameters.insert(
            vector_sum_parameters::NUMERIC_TYPE,
            FunctionParameterValue::VariableType(VariableType::String),
        );
        assert!(matches!(
            VectorSumType.instantiate(&parameters),
            Err(FunctionError::BadParameterValue { .. })
        ));
    }

    #[test]
    fn vector_sum_rejects_out_of_range_ports() {
        let mut function = VectorSum::<i32>::new(2, 2);
        assert!(function.set_integer(reference(0, 2, 0, 0), 1).is_err());
        assert!(function.set_integer(reference(0, 0, 0, 2), 1).is_err());
        assert!(function.get_integer(reference(1, 1, 0, 0)).is_err());
    }

    #[test]
    fn vector_sum_rejects_non_positive_dimensions() {
        let mut parameters = HashMap::new();
        parameters.insert(
            vector_sum_parameters::DIMENSION,
            FunctionParameterValue::Integer(0),
        );
        assert!(matches!(
            VectorSumType.instantiate(&parameters),
            Err(FunctionError::BadParameterValue { .. })
        ));
    }
}
