//! Pipeline dataflow model consumed by the dispatcher, engine, and splitter.
//!
//! Architecture role:
//! - declares the graph structure (steps, hops) with a small step library
//! - carries the parameter table and variable namespace for one pipeline
//! - tags steps with cluster-schema partitions ahead of splitting
//! - provides the JSON wire form sent to worker servers
//!
//! Key modules:
//! - [`pipeline`]
//! - [`step`]
//! - [`cluster`]
//! - [`vars`]

pub mod cluster;
pub mod pipeline;
pub mod step;
pub mod vars;

pub use cluster::{ClusterSchema, Partition};
pub use pipeline::{Hop, ParameterDef, Pipeline};
pub use step::{FieldDef, StepKind, StepMeta};
pub use vars::{argument_variable, substitute, INTERNAL_CLUSTER_VARIABLES};
