//! In-process worker transport.
//!
//! Runs launched sub-pipelines on local tokio tasks through the engine,
//! sharing one relay registry so shim pairs of different sub-pipelines find
//! each other. This is the single-machine cluster backend and the transport
//! used by the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rowmill_common::{ExecutionHandle, Result, RowmillError, WorkerRef};
use rowmill_engine::{EngineSettings, LocalRun, StopHandle};
use rowmill_graph::Pipeline;
use rowmill_relay::RelayRegistry;
use tracing::{debug, info};

use crate::transport::{ExecState, LaunchRequest, PollStatus, WorkerTransport};

struct RunSlot {
    state: ExecState,
    result: Option<rowmill_common::RunResult>,
    log_excerpt: String,
    stop: StopHandle,
    stop_requested: bool,
}

/// Worker transport that executes everything locally.
pub struct InProcessTransport {
    relay: Arc<RelayRegistry>,
    next_handle: AtomicU64,
    runs: Arc<Mutex<HashMap<String, RunSlot>>>,
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::with_relay(Arc::new(RelayRegistry::new()))
    }

    /// Share an existing relay registry, e.g. with a local engine run.
    pub fn with_relay(relay: Arc<RelayRegistry>) -> Self {
        Self {
            relay,
            next_handle: AtomicU64::new(1),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The relay registry launched sub-pipelines bind their shims to.
    pub fn relay(&self) -> Arc<RelayRegistry> {
        Arc::clone(&self.relay)
    }
}

#[async_trait]
impl WorkerTransport for InProcessTransport {
    async fn launch(&self, worker: &WorkerRef, request: LaunchRequest) -> Result<ExecutionHandle> {
        let pipeline = Pipeline::from_json(&request.pipeline_json)?;
        let settings = EngineSettings {
            log_level: request.log_level,
            safe_mode: request.safe_mode,
            gathering_metrics: request.gathering_metrics,
            ..EngineSettings::default()
        };
        let mut run = LocalRun::prepare(
            pipeline,
            settings,
            request.variables,
            &[],
            Arc::clone(&self.relay),
        )?;
        run.start_threads()?;

        let handle = ExecutionHandle(format!(
            "h-{}",
            self.next_handle.fetch_add(1, Ordering::Relaxed)
        ));
        info!(
            worker_id = %worker.name,
            handle_id = %handle,
            "sub-pipeline started in-process"
        );
        self.runs.lock().expect("run table lock poisoned").insert(
            handle.0.clone(),
            RunSlot {
                state: ExecState::Running,
                result: None,
                log_excerpt: String::new(),
                stop: run.stop_handle(),
                stop_requested: false,
            },
        );

        let runs = Arc::clone(&self.runs);
        let key = handle.0.clone();
        tokio::spawn(async move {
            let result = run.wait_until_finished().await;
            let mut table = runs.lock().expect("run table lock poisoned");
            if let Some(slot) = table.get_mut(&key) {
                slot.state = if !result.success {
                    ExecState::Failed
                } else if slot.stop_requested {
                    ExecState::Stopped
                } else {
                    ExecState::Finished
                };
                slot.log_excerpt = result.log_text.clone();
                slot.result = Some(result);
            }
        });
        Ok(handle)
    }

    async fn poll(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<PollStatus> {
        let table = self.runs.lock().expect("run table lock poisoned");
        let slot = table.get(&handle.0).ok_or_else(|| {
            RowmillError::Execution(format!(
                "worker '{}' has no execution with handle {handle}",
                worker.name
            ))
        })?;
        Ok(PollStatus {
            state: slot.state,
            result: slot.result.clone(),
            log_excerpt: slot.log_excerpt.clone(),
        })
    }

    async fn stop(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<()> {
        let mut table = self.runs.lock().expect("run table lock poisoned");
        let slot = table.get_mut(&handle.0).ok_or_else(|| {
            RowmillError::Execution(format!(
                "worker '{}' has no execution with handle {handle}",
                worker.name
            ))
        })?;
        debug!(worker_id = %worker.name, handle_id = %handle, "stop signal received");
        slot.stop_requested = true;
        slot.stop.stop();
        Ok(())
    }
}
