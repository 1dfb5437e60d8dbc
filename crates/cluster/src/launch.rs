use std::sync::Arc;

use rowmill_common::{ExecutionHandle, Result, RowmillError, WorkerRef};
use tracing::{error, info};

use crate::transport::{LaunchRequest, WorkerTransport};

/// Pushes one sub-pipeline + configuration to a worker server and starts it.
///
/// The sub-pipeline begins executing asynchronously as soon as `launch`
/// returns; whether it runs immediately or queues is the worker's concern.
pub struct RemoteLauncher {
    transport: Arc<dyn WorkerTransport>,
}

impl RemoteLauncher {
    pub fn new(transport: Arc<dyn WorkerTransport>) -> Self {
        Self { transport }
    }

    /// Launch `request` on `worker`, returning the worker-assigned handle.
    /// Transport failures and worker rejections surface as
    /// [`RowmillError::Launch`].
    pub async fn launch(
        &self,
        worker: &WorkerRef,
        request: LaunchRequest,
    ) -> Result<ExecutionHandle> {
        info!(worker_id = %worker.name, "sending pipeline to worker");
        match self.transport.launch(worker, request).await {
            Ok(handle) => {
                info!(
                    worker_id = %worker.name,
                    handle_id = %handle,
                    "worker accepted pipeline"
                );
                Ok(handle)
            }
            Err(e) => {
                error!(worker_id = %worker.name, error = %e, "launch failed");
                Err(RowmillError::Launch(format!(
                    "worker '{}': {e}",
                    worker.name
                )))
            }
        }
    }
}
