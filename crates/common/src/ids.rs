//! Typed identifiers shared across dispatcher/cluster components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque worker-assigned identifier correlating a launched sub-pipeline to
/// its remote status. Allocated by the worker at launch time; the launcher
/// owns it until the monitor retires it or cleanup cancels it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle(
    /// Raw handle value.
    pub String,
);

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a worker server capable of accepting and running a
/// sub-pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerRef {
    /// Stable worker name used in scheduling and log attribution.
    pub name: String,
    /// Transport endpoint, e.g. `http://10.0.0.1:50051`.
    pub endpoint: String,
}

impl WorkerRef {
    /// Build a worker reference from name and endpoint.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
