use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use rowmill_cluster::{
    ClusterMonitor, ClusterRuntimeConfig, ClusteredExecutor, LaunchRequest, LaunchedWorker,
    RemoteLauncher, WorkerTransport,
};
use rowmill_common::{ExecMode, ExecutionConfig, Result, Row, RowmillError, RunResult};
use rowmill_engine::EngineSettings;
use rowmill_graph::{Pipeline, StepKind};
use rowmill_relay::RelayRegistry;
use tokio::sync::watch;
use tracing::{error, info};

use crate::registry::EngineRegistry;

/// Uniform entry point for pipeline execution.
///
/// One contract (prepare, parameterize, run, wait, collect result)
/// regardless of whether the pipeline executes locally, on a single remote
/// worker, or split across a cluster. The execution strategy is selected by
/// [`ExecutionConfig::mode`] and matched exhaustively.
pub struct Dispatcher {
    registry: EngineRegistry,
    transport: Arc<dyn WorkerTransport>,
    relay: Arc<RelayRegistry>,
    cluster_config: ClusterRuntimeConfig,
    sink_outputs: Mutex<HashMap<String, Vec<Row>>>,
}

impl Dispatcher {
    pub fn new(registry: EngineRegistry, transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            registry,
            transport,
            relay: Arc::new(RelayRegistry::new()),
            cluster_config: ClusterRuntimeConfig::default(),
            sink_outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Override the cluster runtime knobs (poll cadence, retry budget, stop
    /// timeout).
    pub fn with_cluster_config(mut self, config: ClusterRuntimeConfig) -> Self {
        self.cluster_config = config;
        self
    }

    /// Share a relay registry with other runtimes in this process.
    pub fn with_relay(mut self, relay: Arc<RelayRegistry>) -> Self {
        self.relay = relay;
        self
    }

    /// Execute `pipeline` under `config`.
    ///
    /// Fails with [`RowmillError::Config`] when the selected mode's
    /// preconditions are not met (no target worker for remote, no cluster
    /// schema for clustered). Business failures (step errors, failed
    /// workers) come back through the returned result, not as errors.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        config: &ExecutionConfig,
        arguments: &[String],
    ) -> Result<RunResult> {
        config.validate()?;

        let mut pipeline = pipeline.clone();
        for (name, value) in &config.params {
            pipeline.set_parameter_value(name, value.clone());
        }

        match config.mode {
            ExecMode::Local => self.execute_locally(pipeline, config, arguments).await,
            ExecMode::Remote => self.execute_remotely(&pipeline, config).await,
            ExecMode::Clustered => {
                if pipeline.cluster.is_none() {
                    return Err(RowmillError::Config(format!(
                        "pipeline '{}' has no cluster schema; clustered execution is not possible",
                        pipeline.name
                    )));
                }
                info!(pipeline = %pipeline.name, "executing clustered");
                ClusteredExecutor::new(Arc::clone(&self.transport), self.cluster_config.clone())
                    .execute(&pipeline, config)
                    .await
            }
        }
    }

    async fn execute_locally(
        &self,
        pipeline: Pipeline,
        config: &ExecutionConfig,
        arguments: &[String],
    ) -> Result<RunResult> {
        info!(pipeline = %pipeline.name, "executing locally");
        let factory = self.registry.resolve(config.run_configuration.as_deref());
        let variables = local_overlay(&pipeline, config);
        let settings = EngineSettings {
            log_level: config.log_level,
            safe_mode: config.safe_mode,
            gathering_metrics: config.gathering_metrics,
            ..EngineSettings::default()
        };

        let sink_steps: Vec<String> = pipeline
            .steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::Sink))
            .map(|s| s.name.clone())
            .collect();

        let mut run = factory.create(
            pipeline,
            settings,
            variables,
            arguments,
            Arc::clone(&self.relay),
        )?;
        run.start_threads()?;
        let result = run.wait_until_finished().await;

        let mut outputs = self.sink_outputs.lock().expect("sink outputs lock poisoned");
        for step in sink_steps {
            if let Some(rows) = run.take_step_output(&step) {
                outputs.insert(step, rows);
            }
        }
        Ok(result)
    }

    /// Remote single-worker execution.
    ///
    /// Returns a minimal result (success flag only): the worker owns the
    /// detailed counters and they are not pulled back synchronously. The
    /// monitoring task is joined before returning, so progress lines carry
    /// the worker name and handle id up to the terminal state.
    async fn execute_remotely(
        &self,
        pipeline: &Pipeline,
        config: &ExecutionConfig,
    ) -> Result<RunResult> {
        info!(pipeline = %pipeline.name, "executing remotely");
        let worker = config.target_worker.clone().ok_or_else(|| {
            RowmillError::Config("remote execution requires a target worker".to_string())
        })?;

        let request = LaunchRequest {
            pipeline_json: pipeline.to_json()?,
            variables: local_overlay(pipeline, config),
            log_level: config.log_level,
            safe_mode: config.safe_mode,
            gathering_metrics: config.gathering_metrics,
            clearing_log: config.clearing_log,
        };
        let launcher = RemoteLauncher::new(Arc::clone(&self.transport));
        let handle = launcher.launch(&worker, request).await?;

        let monitor = ClusterMonitor::new(Arc::clone(&self.transport), self.cluster_config.clone());
        let launched = vec![LaunchedWorker {
            worker: worker.clone(),
            handle,
        }];
        let (abort_tx, _abort_rx) = watch::channel(false);
        let monitor_task =
            tokio::spawn(async move { monitor.await_all(&launched, &abort_tx).await });
        let outcomes = monitor_task
            .await
            .map_err(|e| RowmillError::Monitor(format!("monitor task join failed: {e}")))??;
        for outcome in &outcomes {
            info!(
                worker_id = %outcome.launched.worker.name,
                handle_id = %outcome.launched.handle,
                status = ?outcome.status,
                "remote execution finished"
            );
        }

        Ok(RunResult::new())
    }

    /// Take the rows a sink step collected during the last local run
    /// (verification helper).
    pub fn take_step_output(&self, step: &str) -> Option<Vec<Row>> {
        self.sink_outputs
            .lock()
            .expect("sink outputs lock poisoned")
            .remove(step)
    }
}

/// Local/remote overlay: pipeline variables first, configuration variables
/// on top, then parameters last (value, else default, first non-empty) so a
/// parameter always overwrites a same-named variable regardless of insertion
/// order.
fn local_overlay(pipeline: &Pipeline, config: &ExecutionConfig) -> BTreeMap<String, String> {
    let mut variables = pipeline.variables.clone();
    for (name, value) in &config.variables {
        variables.insert(name.clone(), value.clone());
    }
    for param in &pipeline.parameters {
        let value = param
            .value
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| Some(param.default.as_str()).filter(|v| !v.is_empty()));
        if let Some(value) = value {
            variables.insert(param.name.clone(), value.to_string());
        }
    }
    variables
}

/// Map a finished run to the caller-facing error signal pair: the command
/// layer turns (success, errors) into process exit codes.
pub fn exit_signals(result: &RunResult) -> (bool, u64) {
    if !result.success && result.errors == 0 {
        error!("run reported failure without an error count");
        return (false, 1);
    }
    (result.success, result.errors)
}

#[cfg(test)]
mod tests {
    use rowmill_common::ExecutionConfig;
    use rowmill_graph::Pipeline;

    use super::local_overlay;

    #[test]
    fn parameters_override_variables_in_the_final_overlay() {
        let mut pipeline = Pipeline::new("overlay order");
        pipeline.add_parameter("p1", "", "");
        pipeline.set_parameter_value("p1", "42");

        // Same-named variable exists before the parameter is applied: the
        // parameter still wins.
        let mut config = ExecutionConfig::local();
        config.set_variable("p1", "7");

        let overlay = local_overlay(&pipeline, &config);
        assert_eq!(overlay.get("p1").map(String::as_str), Some("42"));
    }

    #[test]
    fn parameter_default_applies_when_no_value_is_set() {
        let mut pipeline = Pipeline::new("overlay default");
        pipeline.add_parameter("batch", "500", "rows per batch");
        let config = ExecutionConfig::local();
        let overlay = local_overlay(&pipeline, &config);
        assert_eq!(overlay.get("batch").map(String::as_str), Some("500"));
    }

    #[test]
    fn configuration_variables_shadow_pipeline_variables() {
        let mut pipeline = Pipeline::new("overlay shadow");
        pipeline.set_variable("dir", "/data");
        let mut config = ExecutionConfig::local();
        config.set_variable("dir", "/tmp");
        let overlay = local_overlay(&pipeline, &config);
        assert_eq!(overlay.get("dir").map(String::as_str), Some("/tmp"));
    }
}
