//! Jittered commit loop, the per-cycle runner, and the operations exposed
//! to control surfaces.

pub mod commands;
pub mod controller;
pub mod runner;
pub mod state;

#[cfg(test)]
pub(crate) mod fakes;

pub use controller::{ControlError, SchedulerController, SchedulerSnapshot, SchedulerTiming};
pub use runner::{CommitCycleRunner, CycleResult, CycleStage, PushTarget, RunnerSettings};
pub use state::{SchedulerPhase, SchedulerState};
