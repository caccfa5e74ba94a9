//! The observer protocol.
//!
//! Observers are after-step hooks: the execution notifies them when
//! subsimulators are added or removed, when initialisation completes, and
//! after each macro step. They read values through the subsimulators' typed
//! getters and must not mutate the simulation. Concrete observers (file
//! loggers, ring buffers) live outside the core.
//!
//! Observers are shared: client code retains a handle, the execution holds
//! another, and the lifetime is that of the longest holder.

use crate::connection::{SimulatorIndex, StepNumber};
use crate::simulator::SlaveSimulator;
use crate::time::{Duration, TimePoint};
use parking_lot::Mutex;
use std::sync::Arc;

/// An after-step hook set. All methods default to no-ops, so implementations
/// override only what they need.
pub trait Observer: Send {
    /// A subsimulator was added to the execution.
    fn simulator_added(
        &mut self,
        _index: SimulatorIndex,
        _simulator: &SlaveSimulator,
        _time: TimePoint,
    ) {
    }

    /// A subsimulator was removed from the execution.
    fn simulator_removed(&mut self, _index: SimulatorIndex, _time: TimePoint) {}

    /// Initial-value propagation finished; stepping is about to begin.
    fn simulation_initialized(&mut self, _step: StepNumber, _time: TimePoint) {}

    /// One subsimulator finished its own (possibly decimated) step within
    /// the macro step that just completed.
    fn simulator_step_complete(
        &mut self,
        _index: SimulatorIndex,
        _step: StepNumber,
        _step_size: Duration,
        _time: TimePoint,
        _simulator: &SlaveSimulator,
    ) {
    }

    /// The macro step completed; all transfers for the tick are done.
    fn step_complete(
        &mut self,
        _step: StepNumber,
        _step_size: Duration,
        _time: TimePoint,
        _simulators: &[SlaveSimulator],
    ) {
    }
}

/// Shared observer handle as stored by the execution.
pub type SharedObserver = Arc<Mutex<dyn Observer>>;
