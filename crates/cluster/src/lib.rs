//! Clustered pipeline execution.
//!
//! Responsibilities:
//! - partition a pipeline into per-worker sub-pipelines with relay shims at
//!   every partition boundary ([`split`]);
//! - push sub-pipelines to workers and obtain execution handles ([`launch`]);
//! - watch every handle independently until terminal ([`monitor`]);
//! - tear down remaining workers on any failure without masking the
//!   triggering error ([`cleanup`]);
//! - merge per-worker results into one logical result with the published
//!   summary block ([`aggregate`]);
//! - orchestrate the whole run ([`executor`]).
//!
//! Feature flags:
//! - `grpc`: tonic transport + worker-side service glue over
//!   `proto/rowmill_cluster.proto`.

pub mod aggregate;
pub mod cleanup;
pub mod executor;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod inprocess;
pub mod launch;
pub mod monitor;
pub mod split;
pub mod transport;

pub use cleanup::ClusterCleanup;
pub use executor::{launch_overlay, ClusteredExecutor};
pub use inprocess::InProcessTransport;
pub use launch::RemoteLauncher;
pub use monitor::{ClusterMonitor, ClusterRuntimeConfig, WorkerOutcome};
pub use split::{split_pipeline, SplitPlan, SubPipeline, MASTER_PARTITION};
pub use transport::{
    ExecState, FinalStatus, LaunchRequest, LaunchedWorker, PollStatus, WorkerTransport,
};
