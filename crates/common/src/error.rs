use thiserror::Error;

/// Canonical Rowmill error taxonomy used across crates.
///
/// Classification guidance:
/// - [`RowmillError::Config`]: execution-mode/precondition violations discovered before dispatch
/// - [`RowmillError::Split`]: a pipeline that cannot be partitioned for its cluster schema
/// - [`RowmillError::Launch`]: transport failure or worker rejection while pushing a sub-pipeline
/// - [`RowmillError::Monitor`]: status polling exhausted its transport retry budget
/// - [`RowmillError::Execution`]: step/runtime failures while rows are flowing
/// - [`RowmillError::Io`]: raw filesystem/network IO failures from std APIs
/// - [`RowmillError::Cluster`]: clustered-run wrapper; the triggering error stays
///   reachable as the source chain's root even when cleanup failed too
#[derive(Debug, Error)]
pub enum RowmillError {
    /// Invalid or inconsistent execution configuration.
    ///
    /// Examples:
    /// - no execution mode preconditions satisfied
    /// - remote mode without a target worker
    /// - clustered mode on a pipeline without a cluster schema
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Pipeline cannot be partitioned into per-worker sub-pipelines.
    ///
    /// Examples:
    /// - a step tagged with a partition id absent from the cluster schema
    /// - duplicate cross-partition hops colliding on one relay channel
    #[error("split error: {0}")]
    Split(String),

    /// Launch-phase transport failure or worker-side rejection.
    #[error("launch error: {0}")]
    Launch(String),

    /// Status polling exhausted the per-worker transport retry budget.
    ///
    /// A worker *reporting* a failed run is not a monitor error; that is
    /// surfaced through the run result instead.
    #[error("monitor error: {0}")]
    Monitor(String),

    /// Runtime step execution failures after dispatch succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A clustered run failed. `message` carries launch/cleanup context
    /// (cleanup failures are appended to it, never substituted for the
    /// cause); `cause` is the original triggering error.
    #[error("clustered run failed: {message}")]
    Cluster {
        /// Failure context, including any cleanup failures that followed.
        message: String,
        /// The original error that triggered cluster teardown.
        #[source]
        cause: Box<RowmillError>,
    },
}

impl RowmillError {
    /// Walk the source chain to its root error.
    pub fn root_cause(&self) -> &RowmillError {
        match self {
            RowmillError::Cluster { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Standard Rowmill result alias.
pub type Result<T> = std::result::Result<T, RowmillError>;
