//! Transfer functions inside an execution: a linear transformation between
//! two subsimulators, and a vector sum merging two producers.

use parking_lot::Mutex;
use simbus_core::connection::{FunctionIoId, FunctionIoReference, VariableId};
use simbus_core::execution::Execution;
use simbus_core::fixed_step::FixedStepScheduler;
use simbus_core::function::FunctionParameterValue;
use simbus_core::model::VariableType;
use simbus_core::scenario::{ActionModifier, Scenario, ScenarioEvent, ScenarioManager, VariableAction};
use simbus_core::test_utils::{MockSlave, TimeSeriesRecorder};
use simbus_core::time::{TimePoint, to_duration, to_time_point};
use simbus_core::function::FunctionType;
use simbus_functions::{
    LINEAR_TRANSFORMATION_IN, LINEAR_TRANSFORMATION_OUT, LinearTransformation, VectorSumType,
    vector_sum_parameters,
};
use std::collections::HashMap;
use std::sync::Arc;

fn real_id(simulator: usize, reference: u32) -> VariableId {
    VariableId {
        simulator,
        variable_type: VariableType::Real,
        reference,
    }
}

fn real_io(function: usize, reference: FunctionIoReference) -> FunctionIoId {
    FunctionIoId {
        function,
        variable_type: VariableType::Real,
        reference,
    }
}

/// The system simulated here looks like this:
///
/// ```text
///     .----.    .----------------------------.    .----.
///     | S1 |--->| out = offset + factor * in |--->| S2 |
///     '----'    '----------------------------'    '----'
/// ```
///
/// S1 and S2 are identity simulators. S1's output is driven via its input
/// by a scenario, and S2's input is read via its output.
#[test]
fn linear_transformation_between_simulators() {
    let offset = 1.0;
    let factor = 2.0;
    let step_size = to_duration(0.1);

    let mut exe = Execution::new(TimePoint::ZERO, FixedStepScheduler::new(step_size, Some(0)));

    let scenario_manager = Arc::new(Mutex::new(ScenarioManager::new()));
    exe.add_manipulator(scenario_manager.clone());

    let s1 = exe.add_slave(Box::new(MockSlave::new()), "S1", None);
    let f = exe.add_function(Box::new(LinearTransformation::new(offset, factor)));
    let s2 = exe.add_slave(Box::new(MockSlave::new()), "S2", None);

    exe.connect_variable_to_function(
        real_id(s1, MockSlave::REAL_OUT),
        real_io(f, LINEAR_TRANSFORMATION_IN),
    )
    .unwrap();
    exe.connect_function_to_variable(
        real_io(f, LINEAR_TRANSFORMATION_OUT),
        real_id(s2, MockSlave::REAL_IN),
    )
    .unwrap();

    // Drive S1's input to 10 at t=1 and to -10 at t=2.
    scenario_manager.lock().load_scenario(Scenario {
        events: vec![
            ScenarioEvent {
                time: to_time_point(1.0),
                action: VariableAction {
                    simulator: s1,
                    reference: MockSlave::REAL_IN,
                    modifier: ActionModifier::Real(Some(Box::new(|_, _| 10.0))),
                    is_input: true,
                },
            },
            ScenarioEvent {
                time: to_time_point(2.0),
                action: VariableAction {
                    simulator: s1,
                    reference: MockSlave::REAL_IN,
                    modifier: ActionModifier::Real(Some(Box::new(|_, _| -10.0))),
                    is_input: true,
                },
            },
        ],
        end: Some(to_time_point(3.0)),
    });

    let recorder = Arc::new(Mutex::new(TimeSeriesRecorder::new()));
    recorder.lock().watch_real(s2, MockSlave::REAL_OUT);
    exe.simulator_mut(s2)
        .unwrap()
        .expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
        .unwrap();
    exe.add_observer(recorder.clone());

    let completed = exe.simulate_until(Some(to_time_point(3.0))).unwrap();
    assert!(completed);

    let rec = recorder.lock();
    let outputs = rec.real_series(s2, MockSlave::REAL_OUT);
    assert_eq!(outputs.len(), 30);

    // Samples halfway between the events.
    assert_eq!(outputs[4], 1.0); // input 0
    assert_eq!(outputs[14], 21.0); // input 10
    assert_eq!(outputs[24], -19.0); // input -10
}

#[test]
fn vector_sum_merges_two_producers() {
    let mut exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(0.1), Some(0)),
    );

    let a = exe.add_slave(
        Box::new(MockSlave::new().with_real_op(|v| v + 2.0)),
        "a",
        None,
    );
    let b = exe.add_slave(
        Box::new(MockSlave::new().with_real_op(|v| v + 3.0)),
        "b",
        None,
    );
    let dst = exe.add_slave(Box::new(MockSlave::new()), "dst", None);

    let parameters = HashMap::from([(
        vector_sum_parameters::INPUT_COUNT,
        FunctionParameterValue::Integer(2),
    )]);
    let sum = exe.add_function(VectorSumType.instantiate(&parameters).unwrap());

    let summand = |instance: usize| FunctionIoReference {
        group: 0,
        group_instance: instance,
        io: 0,
        io_instance: 0,
    };
    let total = FunctionIoReference {
        group: 1,
        group_instance: 0,
        io: 0,
        io_instance: 0,
    };

    exe.connect_variable_to_function(real_id(a, MockSlave::REAL_OUT), real_io(sum, summand(0)))
        .unwrap();
    exe.connect_variable_to_function(real_id(b, MockSlave::REAL_OUT), real_io(sum, summand(1)))
        .unwrap();
    exe.connect_function_to_variable(real_io(sum, total), real_id(dst, MockSlave::REAL_IN))
        .unwrap();

    exe.simulator_mut(dst)
        .unwrap()
        .expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
        .unwrap();

    exe.simulate_until(Some(to_time_point(0.5))).unwrap();

    let dst_out = exe
        .simulator(dst)
        .unwrap()
        .get_real(MockSlave::REAL_OUT)
        .unwrap();
    assert_eq!(dst_out, 5.0);
}

