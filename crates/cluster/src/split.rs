//! Partition splitting: one sub-pipeline per worker, relay shims at every
//! partition boundary.

use std::collections::BTreeMap;

use rowmill_common::{Result, RowmillError, WorkerRef};
use rowmill_graph::{ClusterSchema, Pipeline, StepKind, StepMeta};
use rowmill_relay::ChannelId;
use tracing::debug;

/// Group key for steps without a partition tag.
pub const MASTER_PARTITION: &str = "master";

/// The portion of a pipeline assigned to one worker.
#[derive(Debug, Clone)]
pub struct SubPipeline {
    /// Partition id this sub-pipeline covers ([`MASTER_PARTITION`] for the
    /// unpartitioned group).
    pub partition_id: String,
    /// Worker executing it.
    pub worker: WorkerRef,
    /// Position in the cluster: master is 0, partitions count up in schema
    /// declaration order.
    pub worker_number: usize,
    /// The sub-graph itself, shims included.
    pub pipeline: Pipeline,
}

/// Outcome of splitting one pipeline for one clustered run.
///
/// Every original step appears in exactly one sub-pipeline; every hop
/// crossing a partition boundary became exactly one sender/receiver shim
/// pair wired over one relay channel.
#[derive(Debug, Clone)]
pub struct SplitPlan {
    /// Name of the pipeline that was split.
    pub original_name: String,
    /// Master worker of the cluster schema.
    pub master: WorkerRef,
    /// Sub-pipelines, master group first, then schema declaration order.
    pub sub_pipelines: Vec<SubPipeline>,
}

impl SplitPlan {
    /// Number of workers participating in the run.
    pub fn cluster_size(&self) -> usize {
        self.sub_pipelines.len()
    }
}

fn group_key(step: &StepMeta) -> &str {
    step.partition.as_deref().unwrap_or(MASTER_PARTITION)
}

fn worker_for_group<'a>(schema: &'a ClusterSchema, group: &str) -> Result<&'a WorkerRef> {
    if group == MASTER_PARTITION {
        return Ok(&schema.master);
    }
    schema.worker_for(group).ok_or_else(|| {
        RowmillError::Split(format!(
            "partition '{group}' is not declared by cluster schema '{}'",
            schema.name
        ))
    })
}

/// Partition `pipeline` into per-worker sub-pipelines.
///
/// Channel ids derive from (source step, destination step, destination
/// partition), so splitting the same pipeline twice yields identical
/// wiring. A step fanning out to hops in several partitions gets one sender
/// shim per destination partition, keeping per-channel ordering
/// well-defined.
pub fn split_pipeline(pipeline: &Pipeline) -> Result<SplitPlan> {
    let schema = pipeline.cluster.as_ref().ok_or_else(|| {
        RowmillError::Split(format!(
            "pipeline '{}' has no cluster schema to split against",
            pipeline.name
        ))
    })?;
    pipeline.validate()?;

    // Group order is fixed: master first, then schema declaration order.
    let mut group_order = vec![MASTER_PARTITION.to_string()];
    group_order.extend(schema.partitions.iter().map(|p| p.id.clone()));

    let mut groups: BTreeMap<String, Pipeline> = BTreeMap::new();
    for step in &pipeline.steps {
        let key = group_key(step).to_string();
        let worker = worker_for_group(schema, &key)?;
        let sub = groups.entry(key.clone()).or_insert_with(|| {
            let mut sub = Pipeline::new(format!("{} ({key})", pipeline.name));
            sub.parameters = pipeline.parameters.clone();
            sub.variables = pipeline.variables.clone();
            sub
        });
        debug!(
            step = %step.name,
            partition = %key,
            worker = %worker,
            "assigned step to partition group"
        );
        sub.add_step(step.clone());
    }

    for hop in &pipeline.hops {
        let from_group = group_key(pipeline.step(&hop.from).expect("hop endpoints validated"));
        let to_group = group_key(pipeline.step(&hop.to).expect("hop endpoints validated"));
        if from_group == to_group {
            groups
                .get_mut(from_group)
                .expect("group created for every step")
                .add_hop(hop.from.clone(), hop.to.clone());
            continue;
        }

        let channel = ChannelId::derive(&hop.from, &hop.to, to_group);
        let sender_name = format!("{} (send to {})", hop.from, hop.to);
        let receiver_name = format!("{} (receive from {})", hop.to, hop.from);

        let source = groups
            .get_mut(from_group)
            .expect("group created for every step");
        if source.step(&sender_name).is_some() {
            return Err(RowmillError::Split(format!(
                "duplicate cross-partition hop '{}' -> '{}' collides on channel '{channel}'",
                hop.from, hop.to
            )));
        }
        source.add_step(StepMeta::new(
            sender_name.clone(),
            StepKind::RelaySend {
                channel: channel.to_string(),
            },
        ));
        source.add_hop(hop.from.clone(), sender_name);

        let destination = groups
            .get_mut(to_group)
            .expect("group created for every step");
        destination.add_step(StepMeta::new(
            receiver_name.clone(),
            StepKind::RelayReceive {
                channel: channel.to_string(),
            },
        ));
        destination.add_hop(receiver_name, hop.to.clone());
        debug!(channel = %channel, from = %from_group, to = %to_group, "injected relay shim pair");
    }

    let present: Vec<String> = group_order
        .into_iter()
        .filter(|k| groups.contains_key(k))
        .collect();
    let mut sub_pipelines = Vec::with_capacity(groups.len());
    for (number, key) in present.iter().enumerate() {
        let sub = groups.remove(key).expect("filtered on containment");
        sub_pipelines.push(SubPipeline {
            partition_id: key.clone(),
            worker: worker_for_group(schema, key)?.clone(),
            worker_number: number,
            pipeline: sub,
        });
    }

    Ok(SplitPlan {
        original_name: pipeline.name.clone(),
        master: schema.master.clone(),
        sub_pipelines,
    })
}
