//! gRPC transport and worker-side service glue.
//!
//! RPC schema source: `proto/rowmill_cluster.proto`.
//!
//! Client side: [`GrpcTransport`] implements [`WorkerTransport`] against a
//! remote worker's `WorkerService` endpoint, caching one channel per
//! endpoint.
//!
//! Server side: [`WorkerServices`] adapts any [`WorkerTransport`]
//! implementation (normally [`crate::inprocess::InProcessTransport`]) into
//! the generated service, so a worker process is the service mounted over
//! the in-process runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rowmill_common::{ExecutionHandle, LogLevel as CoreLogLevel, Result, RowmillError, RunResult, WorkerRef};
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use crate::transport::{
    ExecState as CoreExecState, LaunchRequest as CoreLaunchRequest, PollStatus, WorkerTransport,
};

#[allow(missing_docs)]
pub mod v1 {
    tonic::include_proto!("rowmill.cluster.v1");
}

pub use v1::worker_service_client::WorkerServiceClient;
pub use v1::worker_service_server::{WorkerService, WorkerServiceServer};

/// gRPC-backed worker transport.
pub struct GrpcTransport {
    clients: Mutex<HashMap<String, WorkerServiceClient<Channel>>>,
}

impl Default for GrpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, worker: &WorkerRef) -> Result<WorkerServiceClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&worker.endpoint) {
            return Ok(client.clone());
        }
        let client = WorkerServiceClient::connect(worker.endpoint.clone())
            .await
            .map_err(|e| {
                RowmillError::Execution(format!(
                    "connect to worker '{}' at {} failed: {e}",
                    worker.name, worker.endpoint
                ))
            })?;
        clients.insert(worker.endpoint.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl WorkerTransport for GrpcTransport {
    async fn launch(
        &self,
        worker: &WorkerRef,
        request: CoreLaunchRequest,
    ) -> Result<ExecutionHandle> {
        let mut client = self.client(worker).await?;
        let response = client
            .launch(Request::new(proto_launch_request(request)))
            .await
            .map_err(|s| from_status(worker, "launch", s))?;
        Ok(ExecutionHandle(response.into_inner().handle_id))
    }

    async fn poll(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<PollStatus> {
        let mut client = self.client(worker).await?;
        let response = client
            .poll(Request::new(v1::PollRequest {
                handle_id: handle.0.clone(),
            }))
            .await
            .map_err(|s| from_status(worker, "poll", s))?
            .into_inner();
        Ok(PollStatus {
            state: core_exec_state(response.state)?,
            result: response
                .has_result
                .then(|| response.result.map(core_counters))
                .flatten(),
            log_excerpt: response.log_excerpt,
        })
    }

    async fn stop(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<()> {
        let mut client = self.client(worker).await?;
        client
            .stop(Request::new(v1::StopRequest {
                handle_id: handle.0.clone(),
            }))
            .await
            .map_err(|s| from_status(worker, "stop", s))?;
        Ok(())
    }
}

/// Generated-service adapter over any worker-transport implementation.
pub struct WorkerServices<T> {
    identity: WorkerRef,
    inner: Arc<T>,
}

impl<T> WorkerServices<T> {
    /// Serve `inner` under the given worker identity.
    pub fn new(identity: WorkerRef, inner: Arc<T>) -> Self {
        Self { identity, inner }
    }
}

#[tonic::async_trait]
impl<T: WorkerTransport + 'static> WorkerService for WorkerServices<T> {
    async fn launch(
        &self,
        request: Request<v1::LaunchRequest>,
    ) -> std::result::Result<Response<v1::LaunchResponse>, Status> {
        let req = request.into_inner();
        let handle = self
            .inner
            .launch(&self.identity, core_launch_request(req)?)
            .await
            .map_err(to_status)?;
        Ok(Response::new(v1::LaunchResponse {
            handle_id: handle.0,
        }))
    }

    async fn poll(
        &self,
        request: Request<v1::PollRequest>,
    ) -> std::result::Result<Response<v1::PollResponse>, Status> {
        let req = request.into_inner();
        let status = self
            .inner
            .poll(&self.identity, &ExecutionHandle(req.handle_id))
            .await
            .map_err(to_status)?;
        Ok(Response::new(v1::PollResponse {
            state: proto_exec_state(status.state) as i32,
            has_result: status.result.is_some(),
            result: status.result.map(proto_counters),
            log_excerpt: status.log_excerpt,
        }))
    }

    async fn stop(
        &self,
        request: Request<v1::StopRequest>,
    ) -> std::result::Result<Response<v1::StopResponse>, Status> {
        let req = request.into_inner();
        self.inner
            .stop(&self.identity, &ExecutionHandle(req.handle_id))
            .await
            .map_err(to_status)?;
        Ok(Response::new(v1::StopResponse {}))
    }
}

fn proto_launch_request(request: CoreLaunchRequest) -> v1::LaunchRequest {
    v1::LaunchRequest {
        pipeline_json: request.pipeline_json,
        variables: request.variables.into_iter().collect(),
        log_level: proto_log_level(request.log_level) as i32,
        safe_mode: request.safe_mode,
        gathering_metrics: request.gathering_metrics,
        clearing_log: request.clearing_log,
    }
}

fn core_launch_request(request: v1::LaunchRequest) -> std::result::Result<CoreLaunchRequest, Status> {
    Ok(CoreLaunchRequest {
        pipeline_json: request.pipeline_json,
        variables: request.variables.into_iter().collect(),
        log_level: core_log_level(request.log_level)?,
        safe_mode: request.safe_mode,
        gathering_metrics: request.gathering_metrics,
        clearing_log: request.clearing_log,
    })
}

fn proto_exec_state(state: CoreExecState) -> v1::ExecState {
    match state {
        CoreExecState::Running => v1::ExecState::Running,
        CoreExecState::Finished => v1::ExecState::Finished,
        CoreExecState::Failed => v1::ExecState::Failed,
        CoreExecState::Stopped => v1::ExecState::Stopped,
    }
}

fn core_exec_state(state: i32) -> Result<CoreExecState> {
    let parsed = v1::ExecState::try_from(state).map_err(|_| {
        RowmillError::Execution(format!("invalid execution state value: {state}"))
    })?;
    match parsed {
        v1::ExecState::Running => Ok(CoreExecState::Running),
        v1::ExecState::Finished => Ok(CoreExecState::Finished),
        v1::ExecState::Failed => Ok(CoreExecState::Failed),
        v1::ExecState::Stopped => Ok(CoreExecState::Stopped),
        v1::ExecState::Unspecified => Err(RowmillError::Execution(
            "execution state unspecified".to_string(),
        )),
    }
}

fn proto_log_level(level: CoreLogLevel) -> v1::LogLevel {
    match level {
        CoreLogLevel::Nothing => v1::LogLevel::Nothing,
        CoreLogLevel::Error => v1::LogLevel::Error,
        CoreLogLevel::Minimal => v1::LogLevel::Minimal,
        CoreLogLevel::Basic => v1::LogLevel::Basic,
        CoreLogLevel::Detailed => v1::LogLevel::Detailed,
        CoreLogLevel::Debug => v1::LogLevel::Debug,
        CoreLogLevel::Rowlevel => v1::LogLevel::Rowlevel,
    }
}

fn core_log_level(level: i32) -> std::result::Result<CoreLogLevel, Status> {
    let parsed = v1::LogLevel::try_from(level)
        .map_err(|_| Status::invalid_argument(format!("invalid log level value: {level}")))?;
    Ok(match parsed {
        v1::LogLevel::Nothing => CoreLogLevel::Nothing,
        v1::LogLevel::Error => CoreLogLevel::Error,
        v1::LogLevel::Minimal => CoreLogLevel::Minimal,
        v1::LogLevel::Unspecified | v1::LogLevel::Basic => CoreLogLevel::Basic,
        v1::LogLevel::Detailed => CoreLogLevel::Detailed,
        v1::LogLevel::Debug => CoreLogLevel::Debug,
        v1::LogLevel::Rowlevel => CoreLogLevel::Rowlevel,
    })
}

fn proto_counters(result: RunResult) -> v1::RunCounters {
    v1::RunCounters {
        errors: result.errors,
        lines_input: result.lines_input,
        lines_output: result.lines_output,
        lines_read: result.lines_read,
        lines_written: result.lines_written,
        lines_updated: result.lines_updated,
        lines_rejected: result.lines_rejected,
        success: result.success,
        log_text: result.log_text,
    }
}

fn core_counters(counters: v1::RunCounters) -> RunResult {
    RunResult {
        errors: counters.errors,
        lines_input: counters.lines_input,
        lines_output: counters.lines_output,
        lines_read: counters.lines_read,
        lines_written: counters.lines_written,
        lines_updated: counters.lines_updated,
        lines_rejected: counters.lines_rejected,
        success: counters.success,
        log_text: counters.log_text,
    }
}

fn from_status(worker: &WorkerRef, op: &str, status: Status) -> RowmillError {
    RowmillError::Execution(format!(
        "worker '{}' {op} call failed: {}",
        worker.name,
        status.message()
    ))
}

fn to_status(err: RowmillError) -> Status {
    match err {
        RowmillError::Config(msg) => Status::invalid_argument(msg),
        RowmillError::Split(msg) => Status::failed_precondition(msg),
        RowmillError::Launch(msg) => Status::failed_precondition(msg),
        RowmillError::Monitor(msg) => Status::unavailable(msg),
        RowmillError::Execution(msg) => Status::internal(msg),
        RowmillError::Io(e) => Status::internal(e.to_string()),
        RowmillError::Cluster { message, .. } => Status::internal(message),
    }
}
