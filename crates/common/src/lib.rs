//! Shared configuration, error types, ids, and result counters for Rowmill crates.
//!
//! Architecture role:
//! - defines the execution configuration passed from the CLI/API layer to the dispatcher
//! - provides common [`RowmillError`] / [`Result`] contracts
//! - hosts the [`RunResult`] counter model merged across clustered workers
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`result`]
//! - [`row`]

pub mod config;
pub mod error;
pub mod ids;
pub mod result;
pub mod row;

pub use config::{ClusterFlags, ExecMode, ExecutionConfig, LogLevel};
pub use error::{Result, RowmillError};
pub use ids::{ExecutionHandle, WorkerRef};
pub use result::RunResult;
pub use row::Row;
