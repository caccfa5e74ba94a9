//! Criterion benchmarks for the macro-step pipeline.
//!
//! Two benchmark groups:
//! - `chain`: a linear chain of identity slaves, synchronous dispatch --
//!   measures per-step bookkeeping and transfer cost
//! - `multi_rate`: mixed decimation factors -- measures the lcm-gated
//!   transfer path

use criterion::{Criterion, criterion_group, criterion_main};
use simbus_core::connection::VariableId;
use simbus_core::execution::Execution;
use simbus_core::fixed_step::FixedStepScheduler;
use simbus_core::model::VariableType;
use simbus_core::test_utils::MockSlave;
use simbus_core::time::{TimePoint, to_duration};

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

/// Build a chain of identity-plus-one slaves connected head to tail.
fn build_chain(length: usize) -> Execution {
    let mut exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(0.01), Some(0)),
    );
    let mut previous = None;
    for i in 0..length {
        let index = exe.add_slave(
            Box::new(MockSlave::new().with_real_op(|v| v + 1.0)),
            format!("chain{i}"),
            None,
        );
        if let Some(previous) = previous {
            exe.connect_variables(out_id(previous), in_id(index)).unwrap();
        }
        previous = Some(index);
    }
    exe
}

fn chain_step(c: &mut Criterion) {
    let mut exe = build_chain(32);
    exe.step().unwrap();
    c.bench_function("chain_32_step", |b| {
        b.iter(|| exe.step().unwrap());
    });
}

fn multi_rate_step(c: &mut Criterion) {
    let mut exe = build_chain(16);
    for i in 0..16 {
        exe.scheduler_mut().set_decimation_factor(i, (i as i64 % 4) + 1);
    }
    exe.step().unwrap();
    c.bench_function("multi_rate_16_step", |b| {
        b.iter(|| exe.step().unwrap());
    });
}

criterion_group!(benches, chain_step, multi_rate_step);
criterion_main!(benches);
