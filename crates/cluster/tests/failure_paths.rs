//! Failure-path coverage for the clustered execution protocol, driven
//! through scripted worker transports.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rowmill_cluster::{
    ClusterMonitor, ClusterRuntimeConfig, ClusteredExecutor, ExecState, FinalStatus,
    LaunchRequest, LaunchedWorker, PollStatus, WorkerTransport,
};
use rowmill_common::{
    ExecutionConfig, ExecutionHandle, Result, RowmillError, RunResult, WorkerRef,
};
use rowmill_graph::{ClusterSchema, FieldDef, Pipeline, StepKind, StepMeta};
use std::sync::Arc;
use tokio::sync::watch;

fn fast_config() -> ClusterRuntimeConfig {
    ClusterRuntimeConfig {
        poll_interval: Duration::from_millis(5),
        transport_retry_budget: 3,
        stop_timeout: Duration::from_millis(200),
    }
}

fn two_partition_pipeline() -> Pipeline {
    let mut p = Pipeline::new("failure drill");
    p.cluster = Some(
        ClusterSchema::new("drill cluster", WorkerRef::new("master-1", "mem://master"))
            .with_partition("p1", WorkerRef::new("wk-1", "mem://wk1"))
            .with_partition("p2", WorkerRef::new("wk-2", "mem://wk2")),
    );
    p.add_step(
        StepMeta::new(
            "gen",
            StepKind::Generator {
                rows: 2,
                fields: vec![FieldDef::new("v", "x")],
            },
        )
        .on_partition("p1"),
    );
    p.add_step(StepMeta::new("out", StepKind::Sink).on_partition("p2"));
    p.add_hop("gen", "out");
    p
}

/// Accepts the first launch, rejects the second, and fails every stop so
/// cleanup itself also fails.
struct SecondLaunchRejected {
    next_handle: AtomicU64,
    stops: Mutex<Vec<String>>,
}

impl SecondLaunchRejected {
    fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            stops: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WorkerTransport for SecondLaunchRejected {
    async fn launch(&self, worker: &WorkerRef, _request: LaunchRequest) -> Result<ExecutionHandle> {
        if worker.name == "wk-2" {
            return Err(RowmillError::Execution(
                "unknown step type in sub-pipeline".to_string(),
            ));
        }
        Ok(ExecutionHandle(format!(
            "h-{}",
            self.next_handle.fetch_add(1, Ordering::Relaxed)
        )))
    }

    async fn poll(&self, _worker: &WorkerRef, _handle: &ExecutionHandle) -> Result<PollStatus> {
        Ok(PollStatus {
            state: ExecState::Running,
            result: None,
            log_excerpt: String::new(),
        })
    }

    async fn stop(&self, worker: &WorkerRef, _handle: &ExecutionHandle) -> Result<()> {
        self.stops
            .lock()
            .expect("stops lock")
            .push(worker.name.clone());
        Err(RowmillError::Execution("stop rejected".to_string()))
    }
}

#[tokio::test]
async fn launch_failure_triggers_cleanup_and_keeps_cause_at_root() {
    let transport = Arc::new(SecondLaunchRejected::new());
    let executor = ClusteredExecutor::new(transport.clone(), fast_config());
    let err = executor
        .execute(&two_partition_pipeline(), &ExecutionConfig::clustered())
        .await
        .expect_err("launch failure must propagate");

    // The already-launched worker was told to stop even though its stop failed.
    assert_eq!(
        *transport.stops.lock().expect("stops lock"),
        vec!["wk-1".to_string()]
    );

    let RowmillError::Cluster { message, .. } = &err else {
        panic!("expected cluster error, got {err}");
    };
    assert!(message.contains("cleanup also failed"), "message: {message}");
    assert!(
        matches!(err.root_cause(), RowmillError::Launch(_)),
        "root cause must stay the launch error"
    );
}

/// wk-2 fails mid-run; wk-1 keeps running until it receives a stop signal.
struct FailsOneWorkerMidRun {
    stopped: Mutex<HashSet<String>>,
    stops: Mutex<Vec<String>>,
}

impl FailsOneWorkerMidRun {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(HashSet::new()),
            stops: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WorkerTransport for FailsOneWorkerMidRun {
    async fn launch(&self, worker: &WorkerRef, _request: LaunchRequest) -> Result<ExecutionHandle> {
        Ok(ExecutionHandle(format!("h-{}", worker.name)))
    }

    async fn poll(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<PollStatus> {
        if worker.name == "wk-2" {
            return Ok(PollStatus {
                state: ExecState::Failed,
                result: Some(RunResult {
                    errors: 3,
                    success: false,
                    ..RunResult::new()
                }),
                log_excerpt: "out: row layout changed".to_string(),
            });
        }
        let stopped = self
            .stopped
            .lock()
            .expect("stopped lock")
            .contains(&handle.0);
        Ok(PollStatus {
            state: if stopped {
                ExecState::Stopped
            } else {
                ExecState::Running
            },
            result: None,
            log_excerpt: String::new(),
        })
    }

    async fn stop(&self, worker: &WorkerRef, handle: &ExecutionHandle) -> Result<()> {
        self.stops
            .lock()
            .expect("stops lock")
            .push(worker.name.clone());
        self.stopped
            .lock()
            .expect("stopped lock")
            .insert(handle.0.clone());
        Ok(())
    }
}

#[tokio::test]
async fn worker_failure_mid_run_stops_the_surviving_workers() {
    let transport = Arc::new(FailsOneWorkerMidRun::new());
    let executor = ClusteredExecutor::new(transport.clone(), fast_config());
    let result = executor
        .execute(&two_partition_pipeline(), &ExecutionConfig::clustered())
        .await
        .expect("worker failure is a business failure, not an exception");

    assert!(!result.success);
    assert_eq!(result.errors, 3);

    // Only the non-terminal worker receives the stop signal.
    let stops = transport.stops.lock().expect("stops lock").clone();
    assert_eq!(stops, vec!["wk-1".to_string()]);
}

/// wk-1 polls always fail at the transport level; wk-2 finishes cleanly.
struct UnreachableWorker {
    stops: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkerTransport for UnreachableWorker {
    async fn launch(&self, worker: &WorkerRef, _request: LaunchRequest) -> Result<ExecutionHandle> {
        Ok(ExecutionHandle(format!("h-{}", worker.name)))
    }

    async fn poll(&self, worker: &WorkerRef, _handle: &ExecutionHandle) -> Result<PollStatus> {
        if worker.name == "wk-1" {
            return Err(RowmillError::Execution("connection refused".to_string()));
        }
        Ok(PollStatus {
            state: ExecState::Finished,
            result: Some(RunResult::new()),
            log_excerpt: String::new(),
        })
    }

    async fn stop(&self, worker: &WorkerRef, _handle: &ExecutionHandle) -> Result<()> {
        self.stops
            .lock()
            .expect("stops lock")
            .push(worker.name.clone());
        Ok(())
    }
}

#[tokio::test]
async fn exhausted_poll_retry_budget_is_a_monitor_error() {
    let transport = Arc::new(UnreachableWorker {
        stops: Mutex::new(Vec::new()),
    });
    let executor = ClusteredExecutor::new(transport.clone(), fast_config());
    let err = executor
        .execute(&two_partition_pipeline(), &ExecutionConfig::clustered())
        .await
        .expect_err("unreachable worker must fail the run");
    assert!(
        matches!(err.root_cause(), RowmillError::Monitor(_)),
        "got {err}"
    );
}

#[tokio::test]
async fn monitor_reports_worker_failure_as_status_not_error() {
    let transport: Arc<dyn WorkerTransport> = Arc::new(FailsOneWorkerMidRun::new());
    let monitor = ClusterMonitor::new(Arc::clone(&transport), fast_config());
    let launched = vec![LaunchedWorker {
        worker: WorkerRef::new("wk-2", "mem://wk2"),
        handle: ExecutionHandle("h-wk-2".to_string()),
    }];
    let (abort_tx, _abort_rx) = watch::channel(false);
    let outcomes = monitor
        .await_all(&launched, &abort_tx)
        .await
        .expect("a failed worker is not a monitor error");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes_status(&outcomes), vec![FinalStatus::Failed]);
}

fn outcomes_status(outcomes: &[rowmill_cluster::WorkerOutcome]) -> Vec<FinalStatus> {
    outcomes.iter().map(|o| o.status).collect()
}
