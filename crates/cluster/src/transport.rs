//! Worker transport contract.
//!
//! The boundary to a worker server is four operations: handle allocation +
//! launch (combined), status poll, and stop. The wire format behind them is
//! an implementation concern of each transport.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rowmill_common::{ExecutionHandle, LogLevel, Result, RunResult, WorkerRef};
use serde::{Deserialize, Serialize};

/// Everything a worker needs to run one sub-pipeline: the serialized graph
/// plus the full variable overlay computed by the dispatcher. Workers of one
/// clustered run receive identical requests except for their partition
/// identity variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// JSON wire form of the (sub-)pipeline.
    pub pipeline_json: Vec<u8>,
    /// Resolved variable overlay, parameters already folded in.
    pub variables: BTreeMap<String, String>,
    /// Log verbosity for the worker-side run.
    pub log_level: LogLevel,
    /// Row-layout consistency checking.
    pub safe_mode: bool,
    /// Per-step metrics gathering.
    pub gathering_metrics: bool,
    /// Clear previous log text before the run.
    pub clearing_log: bool,
}

/// Remote execution states observed while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecState {
    Running,
    Finished,
    Failed,
    Stopped,
}

impl ExecState {
    /// Terminal-state view of this state, if terminal.
    pub fn as_final(self) -> Option<FinalStatus> {
        match self {
            ExecState::Running => None,
            ExecState::Finished => Some(FinalStatus::Finished),
            ExecState::Failed => Some(FinalStatus::Failed),
            ExecState::Stopped => Some(FinalStatus::Stopped),
        }
    }
}

/// Terminal state of one worker's sub-pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    Finished,
    Failed,
    Stopped,
}

/// One status-poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollStatus {
    /// Current execution state.
    pub state: ExecState,
    /// Worker-side run result, present once terminal.
    pub result: Option<RunResult>,
    /// Recent worker-side log lines.
    pub log_excerpt: String,
}

/// A launched sub-pipeline: the worker it runs on and its handle.
#[derive(Debug, Clone)]
pub struct LaunchedWorker {
    pub worker: WorkerRef,
    pub handle: ExecutionHandle,
}

/// Request/response contract to a worker server.
///
/// `launch` returns once the worker has accepted the sub-pipeline and
/// allocated a handle; execution proceeds asynchronously (queueing is a
/// worker-local concern). `stop` is one-directional: a worker may never
/// acknowledge, and callers bound their wait.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Push a sub-pipeline + configuration; obtain the worker-assigned
    /// handle and start execution.
    async fn launch(&self, worker: &WorkerRef, request: LaunchRequest) -> Result<ExecutionHandle>;

    /// Poll the current status of a launched execution.
    async fn poll(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<PollStatus>;

    /// Signal the worker to stop and release the execution.
    async fn stop(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<()>;
}
