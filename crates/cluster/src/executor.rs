//! Orchestration of one clustered run: overlay, split, launch, monitor,
//! cleanup, aggregate.

use std::collections::BTreeMap;
use std::sync::Arc;

use rowmill_common::{ExecutionConfig, Result, RowmillError, RunResult};
use rowmill_graph::{Pipeline, INTERNAL_CLUSTER_VARIABLES};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::cleanup::ClusterCleanup;
use crate::launch::RemoteLauncher;
use crate::monitor::{ClusterMonitor, ClusterRuntimeConfig, WorkerOutcome};
use crate::split::{split_pipeline, SplitPlan, SubPipeline};
use crate::transport::{FinalStatus, LaunchRequest, LaunchedWorker, WorkerTransport};

/// Runs one pipeline across the workers of its cluster schema and folds the
/// per-worker results into one logical result.
pub struct ClusteredExecutor {
    transport: Arc<dyn WorkerTransport>,
    config: ClusterRuntimeConfig,
}

impl ClusteredExecutor {
    pub fn new(transport: Arc<dyn WorkerTransport>, config: ClusterRuntimeConfig) -> Self {
        Self { transport, config }
    }

    /// Execute `pipeline` clustered.
    ///
    /// Worker execution failures come back through the returned result
    /// (success = false, error counts summed); launch/monitor failures tear
    /// the cluster down and raise [`RowmillError::Cluster`] with the
    /// triggering error as the cause chain's root.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        exec: &ExecutionConfig,
    ) -> Result<RunResult> {
        if !(exec.cluster.posting && exec.cluster.preparing && exec.cluster.starting) {
            return Err(RowmillError::Config(
                "the worker launch operation is atomic: posting, preparing and starting must all be enabled".to_string(),
            ));
        }

        let variables = launch_overlay(pipeline, exec);
        let plan = split_pipeline(pipeline)?;
        info!(
            pipeline = %plan.original_name,
            workers = plan.cluster_size(),
            "pipeline split for clustered execution"
        );
        if exec.cluster.showing_pipelines {
            for sub in &plan.sub_pipelines {
                debug!(
                    partition = %sub.partition_id,
                    worker_id = %sub.worker.name,
                    pipeline = %String::from_utf8_lossy(&sub.pipeline.to_json()?),
                    "generated sub-pipeline"
                );
            }
        }

        let launched = self.launch_all(&plan, exec, &variables).await?;
        let outcomes = self.monitor_and_cleanup(&launched).await?;

        let merged = fold_outcomes(outcomes);
        aggregate::log_summary(&plan.original_name, &merged);
        Ok(merged)
    }

    /// Launch every sub-pipeline, master group first. The first failure
    /// stops the already-launched workers and propagates with the launch
    /// error as cause.
    async fn launch_all(
        &self,
        plan: &SplitPlan,
        exec: &ExecutionConfig,
        variables: &BTreeMap<String, String>,
    ) -> Result<Vec<LaunchedWorker>> {
        let launcher = RemoteLauncher::new(Arc::clone(&self.transport));
        let mut launched = Vec::with_capacity(plan.sub_pipelines.len());
        for sub in &plan.sub_pipelines {
            let request = LaunchRequest {
                pipeline_json: sub.pipeline.to_json()?,
                variables: identity_overlay(variables, plan, sub),
                log_level: exec.log_level,
                safe_mode: exec.safe_mode,
                gathering_metrics: exec.gathering_metrics,
                clearing_log: exec.clearing_log,
            };
            match launcher.launch(&sub.worker, request).await {
                Ok(handle) => launched.push(LaunchedWorker {
                    worker: sub.worker.clone(),
                    handle,
                }),
                Err(cause) => {
                    let cleanup =
                        ClusterCleanup::new(Arc::clone(&self.transport), self.config.stop_timeout);
                    let failures = cleanup
                        .cleanup_on_failure(&launched, &cause.to_string())
                        .await;
                    let mut message =
                        format!("launch failed on worker '{}'", sub.worker.name);
                    if !failures.is_empty() {
                        message.push_str("; cleanup also failed: ");
                        message.push_str(&failures.join("; "));
                    }
                    return Err(RowmillError::Cluster {
                        message,
                        cause: Box::new(cause),
                    });
                }
            }
        }
        Ok(launched)
    }

    /// Await all launched workers. The moment any worker fails, is stopped,
    /// or exhausts the poll retry budget, the remaining non-terminal workers
    /// are signaled to stop while monitoring continues.
    async fn monitor_and_cleanup(
        &self,
        launched: &[LaunchedWorker],
    ) -> Result<Vec<WorkerOutcome>> {
        let monitor = ClusterMonitor::new(Arc::clone(&self.transport), self.config.clone());
        let terminal = monitor.terminal_handles();
        let (abort_tx, mut abort_rx) = watch::channel(false);

        let cleanup_transport = Arc::clone(&self.transport);
        let stop_timeout = self.config.stop_timeout;
        let launched_for_cleanup = launched.to_vec();
        let cleanup_task = tokio::spawn(async move {
            if abort_rx.changed().await.is_err() || !*abort_rx.borrow() {
                return Vec::new();
            }
            let remaining: Vec<LaunchedWorker> = {
                let seen = terminal.lock().expect("terminal set lock poisoned");
                launched_for_cleanup
                    .into_iter()
                    .filter(|lw| !seen.contains(&lw.handle.0))
                    .collect()
            };
            let cleanup = ClusterCleanup::new(cleanup_transport, stop_timeout);
            cleanup
                .cleanup_on_failure(&remaining, "worker failure detected while monitoring")
                .await
        });

        let monitored = monitor.await_all(launched, &abort_tx).await;
        drop(abort_tx);
        let cleanup_failures = cleanup_task.await.unwrap_or_default();

        match monitored {
            Ok(outcomes) => {
                if !cleanup_failures.is_empty() {
                    warn!(
                        failures = cleanup_failures.len(),
                        detail = %cleanup_failures.join("; "),
                        "cluster cleanup reported failures"
                    );
                }
                Ok(outcomes)
            }
            Err(cause) => {
                let mut message = "monitoring failed".to_string();
                if !cleanup_failures.is_empty() {
                    message.push_str("; cleanup also failed: ");
                    message.push_str(&cleanup_failures.join("; "));
                }
                Err(RowmillError::Cluster {
                    message,
                    cause: Box::new(cause),
                })
            }
        }
    }
}

/// Build the base launch overlay: configuration variables, the original
/// pipeline's internal cluster variables, then graph parameters on top
/// (parameter value, else parameter default, else existing variable; first
/// non-empty wins), since parameters take precedence at launch time.
pub fn launch_overlay(
    pipeline: &Pipeline,
    exec: &ExecutionConfig,
) -> BTreeMap<String, String> {
    let mut variables = exec.variables.clone();
    for name in INTERNAL_CLUSTER_VARIABLES {
        if let Some(value) = pipeline.variable(name) {
            variables.insert((*name).to_string(), value.to_string());
        }
    }
    for param in pipeline.list_parameters() {
        let value = pipeline
            .parameter_value(param)
            .filter(|v| !v.is_empty())
            .or_else(|| pipeline.parameter_default(param).filter(|v| !v.is_empty()))
            .or_else(|| pipeline.variable(param).filter(|v| !v.is_empty()));
        if let Some(value) = value {
            variables.insert(param.to_string(), value.to_string());
        }
    }
    variables
}

/// Per-worker identity variables layered over the shared overlay; only these
/// differ between the launch requests of one run.
fn identity_overlay(
    base: &BTreeMap<String, String>,
    plan: &SplitPlan,
    sub: &SubPipeline,
) -> BTreeMap<String, String> {
    let mut variables = base.clone();
    variables.insert(
        "rowmill.cluster.size".to_string(),
        plan.cluster_size().to_string(),
    );
    variables.insert(
        "rowmill.cluster.master".to_string(),
        plan.master.name.clone(),
    );
    variables.insert("rowmill.worker.name".to_string(), sub.worker.name.clone());
    variables.insert(
        "rowmill.worker.number".to_string(),
        sub.worker_number.to_string(),
    );
    variables
}

/// Fold terminal worker outcomes into the merged run result. A worker that
/// did not finish cleanly contributes `success = false`; a failed worker
/// with no counters still counts one error so the caller's exit-code mapping
/// sees it.
fn fold_outcomes(outcomes: Vec<WorkerOutcome>) -> RunResult {
    let mut per_worker: BTreeMap<String, RunResult> = BTreeMap::new();
    for outcome in outcomes {
        let mut result = outcome.result.unwrap_or_else(RunResult::new);
        match outcome.status {
            FinalStatus::Finished => {}
            FinalStatus::Failed => {
                result.success = false;
                if result.errors == 0 {
                    result.errors = 1;
                }
            }
            FinalStatus::Stopped => result.success = false,
        }
        per_worker
            .entry(outcome.launched.worker.name.clone())
            .or_insert_with(RunResult::new)
            .absorb(&result);
    }
    aggregate::merge(&per_worker)
}
