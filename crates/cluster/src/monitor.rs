use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rowmill_common::{Result, RowmillError, RunResult};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::transport::{FinalStatus, LaunchedWorker, WorkerTransport};

/// Handles observed in a terminal state, shared with the cleanup path so a
/// finished worker is not sent a stop signal.
pub type TerminalSet = Arc<Mutex<HashSet<String>>>;

/// Runtime knobs for the cluster monitor/cleanup phases.
#[derive(Debug, Clone)]
pub struct ClusterRuntimeConfig {
    /// Delay between status polls per worker.
    pub poll_interval: Duration,
    /// Consecutive transport failures tolerated per worker before the poll
    /// loop gives up with a monitor error.
    pub transport_retry_budget: u32,
    /// Bound on waiting for a worker to acknowledge a stop signal before it
    /// is treated as abandoned.
    pub stop_timeout: Duration,
}

impl Default for ClusterRuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            transport_retry_budget: 5,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Terminal observation for one worker's sub-pipeline.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// The launched execution this outcome belongs to.
    pub launched: LaunchedWorker,
    /// Terminal status the worker reported.
    pub status: FinalStatus,
    /// Worker-side result, when the worker produced one.
    pub result: Option<RunResult>,
    /// Recent worker-side log lines.
    pub log_excerpt: String,
}

/// Polls every launched handle until it reaches a terminal state.
///
/// Each worker is watched by its own task; a slow or unresponsive worker
/// never delays detecting another worker's completion. The first observed
/// failure (a FAILED/STOPPED report, or an exhausted retry budget) fires the
/// abort signal handed to [`ClusterMonitor::await_all`] so teardown can
/// start while the remaining workers are still being watched.
pub struct ClusterMonitor {
    transport: Arc<dyn WorkerTransport>,
    config: ClusterRuntimeConfig,
    terminal: TerminalSet,
}

impl ClusterMonitor {
    pub fn new(transport: Arc<dyn WorkerTransport>, config: ClusterRuntimeConfig) -> Self {
        Self {
            transport,
            config,
            terminal: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Shared view of the handles already observed terminal.
    pub fn terminal_handles(&self) -> TerminalSet {
        Arc::clone(&self.terminal)
    }

    /// Wait until every launched worker is terminal.
    ///
    /// Returns one outcome per worker. A worker reporting a failed run is
    /// not an error here; it comes back as [`FinalStatus::Failed`]. Only an
    /// exhausted transport retry budget raises [`RowmillError::Monitor`].
    pub async fn await_all(
        &self,
        launched: &[LaunchedWorker],
        abort: &watch::Sender<bool>,
    ) -> Result<Vec<WorkerOutcome>> {
        let (tx, mut rx) = mpsc::channel(launched.len().max(1));
        for lw in launched {
            tokio::spawn(poll_worker(
                Arc::clone(&self.transport),
                lw.clone(),
                self.config.clone(),
                Arc::clone(&self.terminal),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(launched.len());
        let mut first_error: Option<RowmillError> = None;
        while let Some(observed) = rx.recv().await {
            match observed {
                Ok(outcome) => {
                    if outcome.status != FinalStatus::Finished {
                        let _ = abort.send(true);
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    let _ = abort.send(true);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }
}

async fn poll_worker(
    transport: Arc<dyn WorkerTransport>,
    launched: LaunchedWorker,
    config: ClusterRuntimeConfig,
    terminal: TerminalSet,
    tx: mpsc::Sender<Result<WorkerOutcome>>,
) {
    let worker = launched.worker.clone();
    let handle = launched.handle.clone();
    let mut consecutive_failures = 0_u32;
    loop {
        match transport.poll(&worker, &handle).await {
            Ok(status) => {
                consecutive_failures = 0;
                if let Some(final_status) = status.state.as_final() {
                    info!(
                        worker_id = %worker.name,
                        handle_id = %handle,
                        status = ?final_status,
                        "worker reached terminal state"
                    );
                    terminal
                        .lock()
                        .expect("terminal set lock poisoned")
                        .insert(handle.0.clone());
                    let _ = tx
                        .send(Ok(WorkerOutcome {
                            launched,
                            status: final_status,
                            result: status.result,
                            log_excerpt: status.log_excerpt,
                        }))
                        .await;
                    return;
                }
                debug!(
                    worker_id = %worker.name,
                    handle_id = %handle,
                    "worker still running"
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    worker_id = %worker.name,
                    handle_id = %handle,
                    consecutive_failures,
                    budget = config.transport_retry_budget,
                    error = %e,
                    "status poll failed"
                );
                if consecutive_failures >= config.transport_retry_budget {
                    error!(
                        worker_id = %worker.name,
                        handle_id = %handle,
                        "transport retry budget exhausted"
                    );
                    let _ = tx
                        .send(Err(RowmillError::Monitor(format!(
                            "worker '{}' handle {}: {} consecutive poll failures, last: {e}",
                            worker.name, handle, consecutive_failures
                        ))))
                        .await;
                    return;
                }
            }
        }
        sleep(config.poll_interval).await;
    }
}
