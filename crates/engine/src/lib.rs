//! In-process pipeline execution runtime.
//!
//! Responsibilities:
//! - wire a validated pipeline into one task per step with bounded FIFO
//!   channels per hop;
//! - resolve the variable overlay into step templates at prepare time;
//! - run the splitter-injected relay shims against a shared registry;
//! - fold per-step counters into the run's [`rowmill_common::RunResult`];
//! - expose the engine-factory seam for named run-configuration profiles.
//!
//! Cancellation is cooperative: every step loop observes the run's stop
//! signal, so a stop request never forcibly terminates a task.

pub mod factory;
pub mod run;
pub mod steps;

pub use factory::{EngineFactory, LocalEngineFactory};
pub use run::{EngineSettings, LocalRun, StopHandle};
