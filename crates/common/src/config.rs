use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RowmillError};
use crate::ids::WorkerRef;

/// Where a pipeline executes. Exactly one strategy is active per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    /// Run the pipeline in-process and block until it finishes.
    Local,
    /// Push the whole pipeline to a single worker server.
    Remote,
    /// Split the pipeline across the workers of its cluster schema.
    Clustered,
}

/// Log verbosity ladder applied to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Nothing,
    Error,
    Minimal,
    Basic,
    Detailed,
    Debug,
    Rowlevel,
}

/// Cluster-phase toggles: which phases of the clustered start protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFlags {
    /// Post sub-pipelines to the workers.
    pub posting: bool,
    /// Ask workers to prepare execution after posting.
    pub preparing: bool,
    /// Ask workers to start prepared executions.
    pub starting: bool,
    /// Surface the generated sub-pipelines to the caller for inspection.
    pub showing_pipelines: bool,
}

impl Default for ClusterFlags {
    fn default() -> Self {
        Self {
            posting: true,
            preparing: true,
            starting: true,
            showing_pipelines: false,
        }
    }
}

/// Immutable-after-build description of how one pipeline run executes.
///
/// Built once per run request; the variable map is written only during the
/// dispatcher's overlay phase and treated as read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Selected execution strategy.
    pub mode: ExecMode,
    /// Log verbosity for the run.
    pub log_level: LogLevel,
    /// Enables row-layout consistency checking during execution.
    pub safe_mode: bool,
    /// Enables step metrics gathering.
    pub gathering_metrics: bool,
    /// Clears previous log text before the run.
    pub clearing_log: bool,
    /// Ordered variable overlay applied to the run.
    pub variables: BTreeMap<String, String>,
    /// Named parameter values; parameters override same-named variables.
    pub params: BTreeMap<String, String>,
    /// Target worker, required for [`ExecMode::Remote`].
    pub target_worker: Option<WorkerRef>,
    /// Cluster start-protocol flags, meaningful for [`ExecMode::Clustered`].
    pub cluster: ClusterFlags,
    /// Named engine profile selecting an engine factory from the registry.
    pub run_configuration: Option<String>,
}

impl ExecutionConfig {
    /// Defaults for command-line execution: local, basic logging, log
    /// clearing on, safe mode and metrics off.
    pub fn local() -> Self {
        Self {
            mode: ExecMode::Local,
            log_level: LogLevel::Basic,
            safe_mode: false,
            gathering_metrics: false,
            clearing_log: true,
            variables: BTreeMap::new(),
            params: BTreeMap::new(),
            target_worker: None,
            cluster: ClusterFlags::default(),
            run_configuration: None,
        }
    }

    /// Remote single-worker execution against `worker`.
    pub fn remote(worker: WorkerRef) -> Self {
        Self {
            mode: ExecMode::Remote,
            target_worker: Some(worker),
            ..Self::local()
        }
    }

    /// Clustered execution with the full start protocol enabled.
    pub fn clustered() -> Self {
        Self {
            mode: ExecMode::Clustered,
            cluster: ClusterFlags::default(),
            ..Self::local()
        }
    }

    /// Set a variable, replacing any existing value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Set a parameter value, replacing any existing value.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Check mode preconditions that do not require the pipeline graph.
    pub fn validate(&self) -> Result<()> {
        if self.mode == ExecMode::Remote && self.target_worker.is_none() {
            return Err(RowmillError::Config(
                "remote execution requires a target worker".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecMode, ExecutionConfig};
    use crate::ids::WorkerRef;

    #[test]
    fn remote_without_target_worker_is_rejected() {
        let mut config = ExecutionConfig::local();
        config.mode = ExecMode::Remote;
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_constructor_carries_target_worker() {
        let config = ExecutionConfig::remote(WorkerRef::new("wk-1", "http://127.0.0.1:50051"));
        config.validate().expect("valid remote config");
        assert_eq!(config.target_worker.expect("worker").name, "wk-1");
    }

    #[test]
    fn clustered_defaults_enable_full_start_protocol() {
        let config = ExecutionConfig::clustered();
        assert!(config.cluster.posting);
        assert!(config.cluster.preparing);
        assert!(config.cluster.starting);
        assert!(!config.cluster.showing_pipelines);
    }
}
