//! Identity-chain scenario: ten subsimulators, each adding a constant to
//! its input, connected head to tail. Exercises fixed-point initial-value
//! propagation and per-tick transfer along a deep chain.

use parking_lot::Mutex;
use simbus_core::connection::VariableId;
use simbus_core::execution::Execution;
use simbus_core::fixed_step::FixedStepScheduler;
use simbus_core::model::VariableType;
use simbus_core::test_utils::{LastValueRecorder, MockSlave};
use simbus_core::time::{TimePoint, to_duration, to_time_point};
use std::sync::Arc;

const OFFSET: f64 = 1.234;
const CHAIN_LENGTH: usize = 10;

fn out_id(simulator: usize) -> VariableId {
    VariableId {
        simulator,
        variable_type: VariableType::Real,
        reference: MockSlave::REAL_OUT,
    }
}

fn in_id(simulator: usize) -> VariableId {
    VariableId {
        simulator,
        variable_type: VariableType::Real,
        reference: MockSlave::REAL_IN,
    }
}

fn build_chain(workers: Option<usize>) -> Execution {
    let mut exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(0.1), workers),
    );
    for i in 0..CHAIN_LENGTH {
        exe.add_slave(
            Box::new(MockSlave::new().with_real_op(|v| v + OFFSET)),
            format!("chain{i}"),
            None,
        );
        // Outputs of interior links are exposed by connecting them; the
        // last link's output is read by the assertions.
        exe.simulator_mut(i)
            .unwrap()
            .expose_for_getting(VariableType::Real, MockSlave::REAL_OUT)
            .unwrap();
    }
    for i in 0..CHAIN_LENGTH - 1 {
        exe.connect_variables(out_id(i), in_id(i + 1)).unwrap();
    }
    exe
}

#[test]
fn chain_output_accumulates_the_offset() {
    let mut exe = build_chain(Some(0));
    let recorder = Arc::new(Mutex::new(LastValueRecorder::new()));
    recorder
        .lock()
        .watch_real(CHAIN_LENGTH - 1, MockSlave::REAL_OUT);
    exe.add_observer(recorder.clone());

    let completed = exe.simulate_until(Some(to_time_point(1.0))).unwrap();
    assert!(completed);
    assert_eq!(exe.step_number(), 10);

    let expected = CHAIN_LENGTH as f64 * OFFSET;
    let last = exe.simulator(CHAIN_LENGTH - 1).unwrap();
    let output = last.get_real(MockSlave::REAL_OUT).unwrap();
    assert!(
        (output - expected).abs() < 1.0e-9,
        "expected {expected}, got {output}"
    );

    let observed = recorder
        .lock()
        .last_real(CHAIN_LENGTH - 1, MockSlave::REAL_OUT)
        .unwrap();
    assert_eq!(observed, output);
}

#[test]
fn initialization_propagates_to_fixed_point() {
    // The fixed-point iterations run N = |simulators| passes, enough for the
    // initial values to reach the end of the chain before the first step.
    let mut exe = build_chain(Some(0));
    exe.step().unwrap();

    let last = exe.simulator(CHAIN_LENGTH - 1).unwrap();
    let output = last.get_real(MockSlave::REAL_OUT).unwrap();
    assert!(
        (output - CHAIN_LENGTH as f64 * OFFSET).abs() < 1.0e-9,
        "chain should be at fixed point after the first step, got {output}"
    );

    // A further step changes nothing: the chain is stationary.
    exe.step().unwrap();
    let last = exe.simulator(CHAIN_LENGTH - 1).unwrap();
    let second = last.get_real(MockSlave::REAL_OUT).unwrap();
    assert!((second - output).abs() < 1.0e-12);
}

#[test]
fn chain_behaves_identically_with_worker_pool() {
    let mut sync = build_chain(Some(0));
    let mut pooled = build_chain(Some(2));
    sync.simulate_until(Some(to_time_point(1.0))).unwrap();
    pooled.simulate_until(Some(to_time_point(1.0))).unwrap();

    for i in 0..CHAIN_LENGTH {
        let a = sync.simulator(i).unwrap().get_real(MockSlave::REAL_OUT).unwrap();
        let b = pooled
            .simulator(i)
            .unwrap()
            .get_real(MockSlave::REAL_OUT)
            .unwrap();
        assert_eq!(a, b, "simulator {i} diverged between pool sizes");
    }
}
