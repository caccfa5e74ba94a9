//! Cooperative stop and wall-clock pacing of the simulation loop.

use simbus_core::execution::Execution;
use simbus_core::fixed_step::FixedStepScheduler;
use simbus_core::test_utils::MockSlave;
use simbus_core::time::{TimePoint, to_duration, to_time_point};
use std::time::{Duration as WallDuration, Instant};

fn paced_execution(step_secs: f64, factor: f64) -> Execution {
    let exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(step_secs), Some(0)),
    );
    let config = exe.real_time_config();
    config.set_real_time_simulation(true);
    config.set_real_time_factor_target(factor);
    exe
}

#[test]
fn stop_from_another_thread_ends_the_loop() {
    // Pace the loop to roughly real time so it is still running when the
    // stop request lands.
    let mut exe = paced_execution(0.01, 1.0);
    exe.add_slave(Box::new(MockSlave::new()), "slow", None);

    let stop = exe.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(WallDuration::from_millis(50));
        stop.stop();
    });

    let completed = exe.simulate_until(None).unwrap();
    stopper.join().unwrap();
    assert!(!completed, "an externally stopped run must not report completion");
    assert!(!exe.is_running());
    // The loop honoured the stop within a bounded number of steps, not at
    // some distant end time.
    assert!(exe.current_time() < to_time_point(60.0));
}

#[test]
fn async_variant_returns_the_execution() {
    let mut exe = paced_execution(0.01, 1.0);
    exe.add_slave(Box::new(MockSlave::new()), "slow", None);

    let running = exe.simulate_until_async(None);
    let stop = running.stop_handle();
    std::thread::sleep(WallDuration::from_millis(50));
    stop.stop();

    let (exe, result) = running.join();
    assert!(!result.unwrap(), "a stopped run must not report completion");
    assert!(exe.step_number() > 0);
}

#[test]
fn unpaced_run_completes_and_reports_true() {
    let mut exe = Execution::new(
        TimePoint::ZERO,
        FixedStepScheduler::new(to_duration(0.1), Some(0)),
    );
    exe.add_slave(Box::new(MockSlave::new()), "fast", None);
    let completed = exe.simulate_until(Some(to_time_point(2.0))).unwrap();
    assert!(completed);
    assert_eq!(exe.step_number(), 20);
}

#[test]
fn pacing_slows_the_loop_to_the_target_factor() {
    // 0.2 s of simulation at 4x real time should take at least ~50 ms of
    // wall time.
    let mut exe = paced_execution(0.01, 4.0);
    exe.add_slave(Box::new(MockSlave::new()), "paced", None);

    let start = Instant::now();
    exe.simulate_until(Some(to_time_point(0.2))).unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= WallDuration::from_millis(40),
        "paced run finished too quickly: {elapsed:?}"
    );

    let metrics = exe.real_time_metrics();
    let factor = metrics.total_average_real_time_factor();
    assert!(factor > 0.0);
    assert!(factor <= 8.0, "measured factor {factor} is implausibly high");
}
