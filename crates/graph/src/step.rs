use serde::{Deserialize, Serialize};

/// One generated/overwritten field: `value` may reference variables with
/// `${NAME}` syntax, resolved at prepare time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub value: String,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Step behavior. The relay pair is injected by the graph splitter at
/// partition boundaries and is not user-authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Emits `rows` copies of a row built from the templated field values.
    Generator { rows: u64, fields: Vec<FieldDef> },
    /// Sets or overwrites one field on every passing row.
    Calculator { field: FieldDef },
    /// Passes rows whose `field` equals `equals`; other rows are rejected.
    Filter { field: String, equals: String },
    /// Terminal collector; collected rows are retrievable from the engine.
    Sink,
    /// Fails the run after passing `after_rows` rows.
    Abort { after_rows: u64 },
    /// Flushes rows into the named relay channel (partition-boundary sender).
    RelaySend { channel: String },
    /// Blocks on the named relay channel (partition-boundary receiver).
    RelayReceive { channel: String },
}

impl StepKind {
    /// Short type tag used in logs and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Generator { .. } => "Generator",
            StepKind::Calculator { .. } => "Calculator",
            StepKind::Filter { .. } => "Filter",
            StepKind::Sink => "Sink",
            StepKind::Abort { .. } => "Abort",
            StepKind::RelaySend { .. } => "RelaySend",
            StepKind::RelayReceive { .. } => "RelayReceive",
        }
    }
}

/// One node of the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMeta {
    /// Unique step name within the pipeline.
    pub name: String,
    /// Step behavior.
    pub kind: StepKind,
    /// Cluster-schema partition this step is pinned to; `None` keeps the
    /// step on the master.
    pub partition: Option<String>,
}

impl StepMeta {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            partition: None,
        }
    }

    /// Pin the step to a cluster-schema partition.
    pub fn on_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}
