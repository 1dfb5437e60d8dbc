//! Client facade for Rowmill pipeline execution.
//!
//! The [`Dispatcher`] is the single entry point: it receives a pipeline, an
//! execution configuration, and positional arguments, and produces one
//! [`rowmill_common::RunResult`] whether the run was local, remote, or
//! clustered. Engine profiles are resolved through the injected
//! [`EngineRegistry`].

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{exit_signals, Dispatcher};
pub use registry::EngineRegistry;

pub use rowmill_cluster::{ClusterRuntimeConfig, InProcessTransport, WorkerTransport};
pub use rowmill_common::{ExecMode, ExecutionConfig, LogLevel, RunResult, WorkerRef};
pub use rowmill_graph::{ClusterSchema, FieldDef, Pipeline, StepKind, StepMeta};
