//! The adaptive, energy-controlled scheduler.
//!
//! For energy-coupled systems the macro step is controlled by a PI
//! controller on a power-residual error estimate. Each registered
//! [`PowerBond`] names an (effort, flow) variable pair on each side of a
//! conservative energy interface; after every macro step the residual
//! between the two sides' transmitted power is converted to a normalised
//! energy error, and the next step size is scaled by the controller gain.

use crate::connection::{SimulatorIndex, StepNumber, VariableId};
use crate::function::Function;
use crate::scheduler::{SchedulerCore, SchedulerError, calculate_decimation_factor};
use crate::simulator::SlaveSimulator;
use crate::time::{Duration, TimePoint, duration_to_secs, to_duration};
use std::collections::BTreeSet;
use tracing::debug;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Controller and step-size parameters for the adaptive scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EccoParameters {
    pub safety_factor: f64,
    /// Initial macro-step size.
    pub step_size: Duration,
    pub min_step_size: Duration,
    pub max_step_size: Duration,
    /// Lower clamp on the per-step gain.
    pub min_change_rate: f64,
    /// Upper clamp on the per-step gain.
    pub max_change_rate: f64,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    pub p_gain: f64,
    pub i_gain: f64,
}

/// Parameter validation failures.
#[derive(Debug, thiserror::Error)]
pub enum EccoParameterError {
    #[error("minimum step size must be positive")]
    NonPositiveMinStep,
    #[error("step size must lie within [min_step_size, max_step_size]")]
    StepSizeOutOfRange,
}

impl EccoParameters {
    pub fn validate(&self) -> Result<(), EccoParameterError> {
        if self.min_step_size <= Duration::ZERO {
            return Err(EccoParameterError::NonPositiveMinStep);
        }
        if self.step_size < self.min_step_size || self.step_size > self.max_step_size {
            return Err(EccoParameterError::StepSizeOutOfRange);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Power bonds
// ---------------------------------------------------------------------------

/// A conservative energy interface between two subsimulators.
///
/// Side A transmits `power_a = flow_a · effort_a`, side B transmits
/// `power_b = flow_b · effort_b`. All four variables must be reals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerBond {
    pub effort_a: VariableId,
    pub flow_a: VariableId,
    pub effort_b: VariableId,
    pub flow_b: VariableId,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Multi-rate scheduler with energy-controlled adaptive step size.
pub struct EccoScheduler {
    parameters: EccoParameters,
    step_size: Duration,
    bonds: Vec<PowerBond>,
    prev_error_estimate: f64,
    core: SchedulerCore,
}

impl EccoScheduler {
    /// Create an adaptive scheduler. See [`FixedStepScheduler::new`] for the
    /// worker-count convention.
    ///
    /// [`FixedStepScheduler::new`]: crate::fixed_step::FixedStepScheduler::new
    pub fn new(
        parameters: EccoParameters,
        worker_count: Option<usize>,
    ) -> Result<Self, EccoParameterError> {
        parameters.validate()?;
        let step_size = parameters
            .step_size
            .clamp(parameters.min_step_size, parameters.max_step_size);
        Ok(Self {
            parameters,
            step_size,
            bonds: Vec::new(),
            prev_error_estimate: 0.0,
            core: SchedulerCore::new(worker_count),
        })
    }

    /// The current macro-step size.
    pub fn step_size(&self) -> Duration {
        self.step_size
    }

    /// The number of completed ticks.
    pub fn step_counter(&self) -> StepNumber {
        self.core.step_counter()
    }

    /// Register a power bond for the step-size error estimate.
    ///
    /// The controller reads all four variables through the subsimulators'
    /// get caches, so each must be exposed for getting (connecting a
    /// variable as a source exposes it; others need an explicit
    /// `expose_for_getting`).
    pub fn add_power_bond(&mut self, bond: PowerBond) {
        self.bonds.push(bond);
    }

    pub(crate) fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    pub(crate) fn add_simulator(
        &mut self,
        index: SimulatorIndex,
        name: &str,
        step_size_hint: Duration,
    ) {
        let factor = calculate_decimation_factor(name, self.step_size, step_size_hint);
        self.core.add_simulator(index, factor);
    }

    pub(crate) fn initialize(
        &mut self,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(), SchedulerError> {
        self.core.initialize(simulators, functions)
    }

    pub(crate) fn do_step(
        &mut self,
        current_time: TimePoint,
        simulators: &mut [SlaveSimulator],
        functions: &mut [Box<dyn Function>],
    ) -> Result<(Duration, BTreeSet<SimulatorIndex>), SchedulerError> {
        let finished = self
            .core
            .dispatch_steps(current_time, self.step_size, simulators)?;

        // The step size for the next tick is recomputed after the join and
        // before the transfers.
        self.step_size = self.adjust_step_size(current_time, simulators)?;

        self.core
            .transfer_finished(&finished, simulators, functions)?;
        Ok((self.step_size, finished))
    }

    // -----------------------------------------------------------------------
    // Step-size control
    // -----------------------------------------------------------------------

    fn adjust_step_size(
        &mut self,
        current_time: TimePoint,
        simulators: &[SlaveSimulator],
    ) -> Result<Duration, SchedulerError> {
        let mut power_a = 0.0;
        let mut power_b = 0.0;
        for bond in &self.bonds {
            let effort_a = simulators[bond.effort_a.simulator].get_real(bond.effort_a.reference)?;
            let effort_b = simulators[bond.effort_b.simulator].get_real(bond.effort_b.reference)?;
            let flow_a = simulators[bond.flow_a.simulator].get_real(bond.flow_a.reference)?;
            let flow_b = simulators[bond.flow_b.simulator].get_real(bond.flow_b.reference)?;
            power_a += flow_a * effort_a;
            power_b += flow_b * effort_b;
        }

        let dt = duration_to_secs(self.step_size, current_time);
        let error = error_estimate(&self.parameters, power_a, power_b, dt);
        let (next, prev) = next_step_size(
            &self.parameters,
            self.step_size,
            current_time,
            error,
            self.prev_error_estimate,
        );
        debug!(
            power_a,
            power_b,
            error_estimate = error,
            step_size = %next,
            "step size control"
        );
        self.prev_error_estimate = prev;
        Ok(next)
    }
}

/// Normalised energy error over one macro step:
/// `sqrt((|ΔP·dt| / (tol_abs + tol_rel·|E_level|))² / num_bonds)`.
fn error_estimate(parameters: &EccoParameters, power_a: f64, power_b: f64, dt: f64) -> f64 {
    let power_residual = power_a - power_b;
    let energy_level = power_a.max(power_b) * dt;
    let energy_residual = power_residual * dt;
    let num_bonds = 1.0;
    let mean_square = (energy_residual.abs()
        / (parameters.abs_tolerance + parameters.rel_tolerance * energy_level.abs()))
    .powi(2)
        / num_bonds;
    mean_square.sqrt()
}

/// PI controller update. Returns the next step size and the stored error
/// estimate. A zero current or previous estimate carries the step size
/// forward unchanged.
fn next_step_size(
    parameters: &EccoParameters,
    step_size: Duration,
    current_time: TimePoint,
    error_estimate: f64,
    prev_error_estimate: f64,
) -> (Duration, f64) {
    if prev_error_estimate == 0.0 || error_estimate == 0.0 {
        return (step_size, error_estimate);
    }
    let gain_unclamped = parameters.safety_factor
        * error_estimate.powf(-parameters.i_gain - parameters.p_gain)
        * prev_error_estimate.powf(parameters.p_gain);
    let gain = gain_unclamped.clamp(parameters.min_change_rate, parameters.max_change_rate);
    let proposed = to_duration(gain * duration_to_secs(step_size, current_time));
    (
        proposed.clamp(parameters.min_step_size, parameters.max_step_size),
        error_estimate,
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::to_duration;

    fn parameters() -> EccoParameters {
        EccoParameters {
            safety_factor: 0.8,
            step_size: to_duration(1e-3),
            min_step_size: to_duration(1e-5),
            max_step_size: to_duration(1e-2),
            min_change_rate: 0.2,
            max_change_rate: 1.5,
            abs_tolerance: 1e-4,
            rel_tolerance: 1e-4,
            p_gain: 0.2,
            i_gain: 0.15,
        }
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let mut p = parameters();
        p.min_step_size = Duration::ZERO;
        assert!(matches!(
            p.validate(),
            Err(EccoParameterError::NonPositiveMinStep)
        ));

        let mut p = parameters();
        p.step_size = to_duration(1.0);
        assert!(matches!(
            p.validate(),
            Err(EccoParameterError::StepSizeOutOfRange)
        ));

        assert!(parameters().validate().is_ok());
    }

    #[test]
    fn unit_error_estimate_yields_safety_factor_gain() {
        // With the current and previous estimates both 1, the gain collapses
        // to the bare safety factor.
        let p = parameters();
        let (next, _) = next_step_size(&p, p.step_size, TimePoint::ZERO, 1.0, 1.0);
        let expected = to_duration(p.safety_factor * duration_to_secs(p.step_size, TimePoint::ZERO));
        assert_eq!(next, expected.clamp(p.min_step_size, p.max_step_size));
    }

    #[test]
    fn zero_error_estimate_passes_step_through() {
        let p = parameters();
        let (next, prev) = next_step_size(&p, p.step_size, TimePoint::ZERO, 0.0, 1.0);
        assert_eq!(next, p.step_size);
        assert_eq!(prev, 0.0);

        // First step of a run: previous estimate is still zero.
        let (next, prev) = next_step_size(&p, p.step_size, TimePoint::ZERO, 2.0, 0.0);
        assert_eq!(next, p.step_size);
        assert_eq!(prev, 2.0);
    }

    #[test]
    fn step_size_stays_within_bounds() {
        let p = parameters();
        for (error, prev) in [(1e-6, 1.0), (1e6, 1.0), (0.5, 2.0), (3.0, 0.1)] {
            let (next, _) = next_step_size(&p, p.step_size, TimePoint::ZERO, error, prev);
            assert!(next >= p.min_step_size, "error={error}, prev={prev}");
            assert!(next <= p.max_step_size, "error={error}, prev={prev}");
        }
    }

    #[test]
    fn gain_is_clamped_by_change_rates() {
        let p = parameters();
        // A huge error estimate drives the raw gain far below the minimum
        // change rate; the result must shrink by exactly min_change_rate.
        let (next, _) = next_step_size(&p, p.step_size, TimePoint::ZERO, 1e9, 1.0);
        let expected =
            to_duration(p.min_change_rate * duration_to_secs(p.step_size, TimePoint::ZERO));
        assert_eq!(next, expected.clamp(p.min_step_size, p.max_step_size));
    }

    #[test]
    fn balanced_powers_give_zero_error() {
        let p = parameters();
        assert_eq!(error_estimate(&p, 5.0, 5.0, 1e-3), 0.0);
        assert!(error_estimate(&p, 5.0, 4.0, 1e-3) > 0.0);
    }
}
