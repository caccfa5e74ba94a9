//! Simbus Core -- a co-simulation master.
//!
//! This crate orchestrates multiple black-box subsimulators (each a
//! self-contained solver exposing get/set ports and a time-step primitive)
//! along a common simulation time axis, routing variables between them
//! through typed connections and optional transfer functions.
//!
//! # Macro-Step Pipeline
//!
//! Each call to [`execution::Execution::step`] advances the simulation by
//! one macro step through the following phases:
//!
//! 1. **Hooks (before)** -- manipulator `step_commencing` callbacks run and
//!    may install or clear value modifiers.
//! 2. **Dispatch** -- every subsimulator whose decimation factor divides the
//!    step counter is stepped, in parallel, through the worker pool.
//! 3. **Join** -- step results are collected; failures are aggregated into a
//!    single error.
//! 4. **Control** -- (adaptive scheduler only) the next macro-step size is
//!    recomputed from the registered power bonds.
//! 5. **Transfer** -- outputs of finished subsimulators propagate along
//!    connections at common tick boundaries; due functions calculate and
//!    their outputs propagate too.
//! 6. **Hooks (after)** -- observer callbacks see the completed, consistent
//!    tick.
//!
//! # Key Types
//!
//! - [`execution::Execution`] -- owns the entities and drives the pipeline.
//! - [`scheduler::Scheduler`] -- fixed-step or adaptive (energy-controlled)
//!   scheduling, with multi-rate decimation factors.
//! - [`simulator::SlaveSimulator`] -- stateful wrapper and batching I/O
//!   boundary around an opaque [`slave::Slave`].
//! - [`cache::GetCache`] / [`cache::SetCache`] -- lazy per-type value caches
//!   with user-installable modifiers.
//! - [`function::Function`] -- pure transformations between subsimulator
//!   ports.
//! - [`manipulator::Manipulator`] / [`observer::Observer`] -- before- and
//!   after-step hook protocols.
//! - [`scenario::ScenarioManager`] -- timed variable-action playback.
//! - [`serialize::StateNode`] -- snapshot state trees.

pub mod cache;
pub mod connection;
pub mod ecco;
pub mod execution;
pub mod fixed_step;
pub mod function;
pub mod manipulator;
pub mod model;
pub mod observer;
pub mod pacing;
pub mod scenario;
pub mod scheduler;
pub mod serialize;
pub mod simulator;
pub mod slave;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
