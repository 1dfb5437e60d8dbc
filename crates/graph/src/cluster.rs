use rowmill_common::WorkerRef;
use serde::{Deserialize, Serialize};

/// One named partition bound to the worker that executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition id referenced by [`crate::StepMeta::partition`].
    pub id: String,
    /// Worker executing this partition's sub-pipeline.
    pub worker: WorkerRef,
}

/// Assignment of steps to worker nodes before splitting: a master plus the
/// named partitions. Unpartitioned steps run on the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSchema {
    /// Schema name, for logs.
    pub name: String,
    /// Worker hosting the master sub-pipeline.
    pub master: WorkerRef,
    /// Named partitions in declaration order.
    pub partitions: Vec<Partition>,
}

impl ClusterSchema {
    pub fn new(name: impl Into<String>, master: WorkerRef) -> Self {
        Self {
            name: name.into(),
            master,
            partitions: Vec::new(),
        }
    }

    /// Add a partition bound to `worker`.
    pub fn with_partition(mut self, id: impl Into<String>, worker: WorkerRef) -> Self {
        self.partitions.push(Partition {
            id: id.into(),
            worker,
        });
        self
    }

    /// Worker for a partition id, if the schema declares it.
    pub fn worker_for(&self, partition_id: &str) -> Option<&WorkerRef> {
        self.partitions
            .iter()
            .find(|p| p.id == partition_id)
            .map(|p| &p.worker)
    }

    /// Total node count: master plus partitions.
    pub fn size(&self) -> usize {
        self.partitions.len() + 1
    }
}
