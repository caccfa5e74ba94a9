//! The opaque slave protocol.
//!
//! A slave is the underlying plug-in that a [`crate::simulator::SlaveSimulator`]
//! adapts: a self-contained solver that exposes bulk, type-sorted variable
//! access and a time-step primitive. The master treats it as an opaque step
//! function; no numerical integration happens on this side of the boundary.

use crate::model::{ModelDescription, StepResult, ValueReference};
use crate::serialize::StateNode;
use crate::time::{Duration, TimePoint};

/// Errors reported by a slave implementation.
#[derive(Debug, thiserror::Error)]
pub enum SlaveError {
    /// The model reported a fault.
    #[error("model error: {0}")]
    Model(String),
    /// A bulk get/set referenced a variable the slave does not have.
    #[error("bad value reference {reference}")]
    BadReference { reference: ValueReference },
    /// The slave does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// An opaque co-simulation slave.
///
/// Implementations must be `Send` so the scheduler can fan per-slave
/// operations out to its worker pool. All variable access is bulk and sorted
/// by type; `values` slices are exactly as long as `references` slices.
pub trait Slave: Send {
    /// The slave's model description (name, UUID, variables, capabilities).
    fn model_description(&self) -> ModelDescription;

    /// Instructs the slave to prepare for a simulation run.
    fn setup(
        &mut self,
        start_time: TimePoint,
        stop_time: Option<TimePoint>,
        relative_tolerance: Option<f64>,
    ) -> Result<(), SlaveError>;

    /// Informs the slave that initialisation is complete and stepping begins.
    fn start_simulation(&mut self) -> Result<(), SlaveError>;

    /// Informs the slave that the simulation run has ended.
    fn end_simulation(&mut self) -> Result<(), SlaveError>;

    /// Performs a single internal time step from `current_time` over
    /// `delta_t`.
    fn do_step(&mut self, current_time: TimePoint, delta_t: Duration)
    -> Result<StepResult, SlaveError>;

    fn get_real_variables(
        &self,
        references: &[ValueReference],
        values: &mut [f64],
    ) -> Result<(), SlaveError>;

    fn get_integer_variables(
        &self,
        references: &[ValueReference],
        values: &mut [i32],
    ) -> Result<(), SlaveError>;

    fn get_boolean_variables(
        &self,
        references: &[ValueReference],
        values: &mut [bool],
    ) -> Result<(), SlaveError>;

    fn get_string_variables(
        &self,
        references: &[ValueReference],
        values: &mut [String],
    ) -> Result<(), SlaveError>;

    fn set_real_variables(
        &mut self,
        references: &[ValueReference],
        values: &[f64],
    ) -> Result<(), SlaveError>;

    fn set_integer_variables(
        &mut self,
        references: &[ValueReference],
        values: &[i32],
    ) -> Result<(), SlaveError>;

    fn set_boolean_variables(
        &mut self,
        references: &[ValueReference],
        values: &[bool],
    ) -> Result<(), SlaveError>;

    fn set_string_variables(
        &mut self,
        references: &[ValueReference],
        values: &[String],
    ) -> Result<(), SlaveError>;

    /// Captures the slave's internal state for snapshotting.
    ///
    /// The default returns `Ok(None)`, meaning the slave has no state to
    /// save. Slaves that set `can_save_state` in their capabilities must
    /// override both this and [`Slave::restore_state`].
    fn save_state(&self) -> Result<Option<StateNode>, SlaveError> {
        Ok(None)
    }

    /// Restores state previously captured by [`Slave::save_state`].
    fn restore_state(&mut self, _state: &StateNode) -> Result<(), SlaveError> {
        Err(SlaveError::Unsupported("state restore".into()))
    }
}
