use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rowmill_common::WorkerRef;
use rowmill_common::ExecutionHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::transport::{LaunchedWorker, WorkerTransport};

/// Tears down the remaining workers of a failed clustered run so no
/// orphaned sub-pipelines keep running.
///
/// Stop signals are one-directional: a worker that never acknowledges within
/// the bounded timeout is treated as abandoned and logged, not retried.
/// Cleanup never raises; its failures are returned as descriptions for the
/// caller to append to the original cause.
pub struct ClusterCleanup {
    transport: Arc<dyn WorkerTransport>,
    stop_timeout: Duration,
}

impl ClusterCleanup {
    pub fn new(transport: Arc<dyn WorkerTransport>, stop_timeout: Duration) -> Self {
        Self {
            transport,
            stop_timeout,
        }
    }

    /// Signal every launched handle to stop. Returns one description per
    /// worker whose cleanup failed or went unacknowledged; empty when every
    /// stop landed.
    pub async fn cleanup_on_failure(
        &self,
        launched: &[LaunchedWorker],
        cause: &str,
    ) -> Vec<String> {
        if launched.is_empty() {
            return Vec::new();
        }
        warn!(
            workers = launched.len(),
            cause, "cluster failure: stopping launched workers"
        );
        let stops = launched.iter().map(|lw| self.stop_one(lw));
        join_all(stops).await.into_iter().flatten().collect()
    }

    async fn stop_one(&self, launched: &LaunchedWorker) -> Option<String> {
        let LaunchedWorker { worker, handle } = launched;
        match timeout(self.stop_timeout, self.transport.stop(worker, handle)).await {
            Ok(Ok(())) => {
                info!(worker_id = %worker.name, handle_id = %handle, "worker stop signaled");
                None
            }
            Ok(Err(e)) => {
                warn!(
                    worker_id = %worker.name,
                    handle_id = %handle,
                    error = %e,
                    "worker stop failed"
                );
                Some(describe_failure(worker, handle, &e.to_string()))
            }
            Err(_) => {
                warn!(
                    worker_id = %worker.name,
                    handle_id = %handle,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "worker did not acknowledge stop; abandoned"
                );
                Some(describe_failure(
                    worker,
                    handle,
                    &format!(
                        "no stop acknowledgment within {}ms, abandoned",
                        self.stop_timeout.as_millis()
                    ),
                ))
            }
        }
    }
}

fn describe_failure(worker: &WorkerRef, handle: &ExecutionHandle, detail: &str) -> String {
    format!("worker '{}' handle {}: {}", worker.name, handle, detail)
}
