//! Wall-clock pacing for the execution runner.
//!
//! The master offers no real-time guarantee, only a pacing loop: when
//! real-time mode is enabled, the runner sleeps between macro steps so that
//! simulation time advances at (at most) `real_time_factor_target` times
//! wall-clock time. Measured factors are published through
//! [`RealTimeMetrics`].
//!
//! Config and metrics are shared handles: client code keeps its clone and
//! may flip the mode or read the measurements while a simulation is running
//! on another thread.

use crate::time::TimePoint;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

/// Number of steps per measurement window by default.
const DEFAULT_STEPS_TO_MONITOR: usize = 5;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Shared pacing configuration.
pub struct RealTimeConfig {
    real_time_simulation: AtomicBool,
    real_time_factor_target: Mutex<f64>,
    steps_to_monitor: AtomicUsize,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            real_time_simulation: AtomicBool::new(false),
            real_time_factor_target: Mutex::new(1.0),
            steps_to_monitor: AtomicUsize::new(DEFAULT_STEPS_TO_MONITOR),
        }
    }
}

impl RealTimeConfig {
    /// Enable or disable pacing sleeps.
    pub fn set_real_time_simulation(&self, enabled: bool) {
        self.real_time_simulation.store(enabled, Ordering::Release);
    }

    pub fn real_time_simulation(&self) -> bool {
        self.real_time_simulation.load(Ordering::Acquire)
    }

    /// Target ratio of simulation time to wall-clock time. 1.0 is real time,
    /// 2.0 runs twice as fast as wall time.
    pub fn set_real_time_factor_target(&self, target: f64) {
        *self.real_time_factor_target.lock() = target;
    }

    pub fn real_time_factor_target(&self) -> f64 {
        *self.real_time_factor_target.lock()
    }

    /// Number of steps in each rolling measurement window.
    pub fn set_steps_to_monitor(&self, steps: usize) {
        self.steps_to_monitor.store(steps.max(1), Ordering::Release);
    }

    pub fn steps_to_monitor(&self) -> usize {
        self.steps_to_monitor.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Measured real-time factors.
#[derive(Default)]
pub struct RealTimeMetrics {
    rolling_average_real_time_factor: Mutex<f64>,
    total_average_real_time_factor: Mutex<f64>,
}

impl RealTimeMetrics {
    /// Factor measured over the most recent monitoring window.
    pub fn rolling_average_real_time_factor(&self) -> f64 {
        *self.rolling_average_real_time_factor.lock()
    }

    /// Factor measured since the simulation loop started.
    pub fn total_average_real_time_factor(&self) -> f64 {
        *self.total_average_real_time_factor.lock()
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

struct TimerState {
    run_start_wall: Instant,
    run_start_sim: TimePoint,
    window_start_wall: Instant,
    window_start_sim: TimePoint,
    steps_in_window: usize,
}

/// Per-execution pacing timer. Call [`RealTimeTimer::start`] when the loop
/// begins and [`RealTimeTimer::sleep`] after each step.
pub(crate) struct RealTimeTimer {
    config: Arc<RealTimeConfig>,
    metrics: Arc<RealTimeMetrics>,
    state: Option<TimerState>,
}

impl RealTimeTimer {
    pub(crate) fn new() -> Self {
        Self {
            config: Arc::new(RealTimeConfig::default()),
            metrics: Arc::new(RealTimeMetrics::default()),
            state: None,
        }
    }

    pub(crate) fn config(&self) -> Arc<RealTimeConfig> {
        Arc::clone(&self.config)
    }

    pub(crate) fn metrics(&self) -> Arc<RealTimeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Mark the start of a simulation loop at the given simulation time.
    pub(crate) fn start(&mut self, simulation_time: TimePoint) {
        let now = Instant::now();
        self.state = Some(TimerState {
            run_start_wall: now,
            run_start_sim: simulation_time,
            window_start_wall: now,
            window_start_sim: simulation_time,
            steps_in_window: 0,
        });
    }

    /// Sleep long enough to hold the configured target factor, and update
    /// the measured factors.
    pub(crate) fn sleep(&mut self, current_time: TimePoint) {
        let Some(state) = &mut self.state else {
            return;
        };
        state.steps_in_window += 1;

        if self.config.real_time_simulation() {
            let target = self.config.real_time_factor_target();
            let sim_elapsed_nanos = (current_time - state.run_start_sim).as_nanos();
            if target > 0.0 && sim_elapsed_nanos > 0 {
                let expected =
                    std::time::Duration::from_nanos((sim_elapsed_nanos as f64 / target) as u64);
                let actual = state.run_start_wall.elapsed();
                if expected > actual {
                    std::thread::sleep(expected - actual);
                }
            }
        }

        let total_wall = state.run_start_wall.elapsed().as_nanos() as f64;
        if total_wall > 0.0 {
            let total_sim = (current_time - state.run_start_sim).as_nanos() as f64;
            *self.metrics.total_average_real_time_factor.lock() = total_sim / total_wall;
        }

        if state.steps_in_window >= self.config.steps_to_monitor() {
            let window_wall = state.window_start_wall.elapsed().as_nanos() as f64;
            if window_wall > 0.0 {
                let window_sim = (current_time - state.window_start_sim).as_nanos() as f64;
                *self.metrics.rolling_average_real_time_factor.lock() = window_sim / window_wall;
            }
            state.window_start_wall = Instant::now();
            state.window_start_sim = current_time;
            state.steps_in_window = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::to_time_point;

    #[test]
    fn config_round_trips() {
        let config = RealTimeConfig::default();
        assert!(!config.real_time_simulation());
        config.set_real_time_simulation(true);
        assert!(config.real_time_simulation());

        config.set_real_time_factor_target(2.5);
        assert_eq!(config.real_time_factor_target(), 2.5);

        config.set_steps_to_monitor(0);
        assert_eq!(config.steps_to_monitor(), 1);
    }

    #[test]
    fn sleep_without_start_is_a_no_op() {
        let mut timer = RealTimeTimer::new();
        timer.sleep(to_time_point(1.0));
        assert_eq!(timer.metrics().total_average_real_time_factor(), 0.0);
    }

    #[test]
    fn paced_loop_does_not_outrun_the_target() {
        let mut timer = RealTimeTimer::new();
        let config = timer.config();
        config.set_real_time_simulation(true);
        config.set_real_time_factor_target(1000.0);

        // 10 ms of simulation time at a factor of 1000 should take at least
        // ~10 us of wall time.
        let wall_start = Instant::now();
        timer.start(TimePoint::ZERO);
        timer.sleep(to_time_point(0.010));
        assert!(wall_start.elapsed() >= std::time::Duration::from_micros(10));
    }

    #[test]
    fn metrics_update_after_a_window() {
        let mut timer = RealTimeTimer::new();
        timer.config().set_steps_to_monitor(1);
        timer.start(TimePoint::ZERO);
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.sleep(to_time_point(0.1));
        assert!(timer.metrics().total_average_real_time_factor() > 0.0);
        assert!(timer.metrics().rolling_average_real_time_factor() > 0.0);
    }
}
