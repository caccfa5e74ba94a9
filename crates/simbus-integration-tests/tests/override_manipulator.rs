//! Override manipulator: pinning an input to a constant while the
//! simulation runs, and releasing it again.

use parking_lot::Mutex;
use simbus_core::execution::Execution;
use simbus_core::fixed_step::FixedStepScheduler;
use simbus_core::manipulator::OverrideManipulator;
use simbus_core::model::VariableType;
use simbus_core::test_utils::{MockSlave, TimeSeriesRecorder};
use simbus_core::time::{TimePoint, to_duration};
use std::sync::Arc;

struct Rig {
    exe: Execution,
    manipulator: Arc<Mutex<OverrideManipulator>>,
    recorder: Arc<Mutex<TimeSeriesRecorder>>,
    index: usize,
}

/// One identity-plus-1.234 simulator with both real ports observed.
fn rig() -> Rig {
    let mut exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(0.1), Some(0)),
    );
    let index = exe.add_slave(
        Box::new(MockSlave::new().with_real_op(|v| v + 1.234)),
        "subject",
        None,
    );
    {
        let sim = exe.simulator_mut(index).unwrap();
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_IN)
            .unwrap();
        sim.expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
    }

    let manipulator = Arc::new(Mutex::new(OverrideManipulator::new()));
    exe.add_manipulator(manipulator.clone());

    let recorder = Arc::new(Mutex::new(TimeSeriesRecorder::new()));
    {
        let mut rec = recorder.lock();
        rec.watch_real(index, MockSlave::REAL_IN);
        rec.watch_real(index, MockSlave::REAL_OUT);
    }
    exe.add_observer(recorder.clone());

    Rig {
        exe,
        manipulator,
        recorder,
        index,
    }
}

#[test]
fn overridden_input_is_observed_after_one_step() {
    let mut rig = rig();
    rig.manipulator
        .lock()
        .override_real_variable(rig.index, MockSlave::REAL_IN, 2.0);

    rig.exe.step().unwrap();

    let rec = rig.recorder.lock();
    assert_eq!(rec.real_series(rig.index, MockSlave::REAL_IN), &[2.0]);
    assert_eq!(rec.real_series(rig.index, MockSlave::REAL_OUT), &[3.234]);
}

#[test]
fn reset_restores_the_unmodified_input() {
    let mut rig = rig();
    rig.manipulator
        .lock()
        .override_real_variable(rig.index, MockSlave::REAL_IN, 2.0);
    rig.exe.step().unwrap();

    rig.manipulator
        .lock()
        .reset_variable(rig.index, VariableType::Real, MockSlave::REAL_IN);
    rig.exe.step().unwrap();

    let rec = rig.recorder.lock();
    assert_eq!(rec.real_series(rig.index, MockSlave::REAL_IN), &[2.0, 0.0]);
    assert_eq!(
        rec.real_series(rig.index, MockSlave::REAL_OUT),
        &[3.234, 1.234]
    );
}

#[test]
fn overrides_show_up_in_the_modified_variable_set() {
    let mut rig = rig();
    rig.manipulator
        .lock()
        .override_real_variable(rig.index, MockSlave::REAL_IN, 2.0);
    assert!(rig.exe.get_modified_variables().is_empty());

    // Applied at the start of the next step.
    rig.exe.step().unwrap();
    let modified = rig.exe.get_modified_variables();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].reference, MockSlave::REAL_IN);

    rig.manipulator
        .lock()
        .reset_variable(rig.index, VariableType::Real, MockSlave::REAL_IN);
    rig.exe.step().unwrap();
    assert!(rig.exe.get_modified_variables().is_empty());
}
