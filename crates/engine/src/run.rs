use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use rowmill_common::{LogLevel, Result, Row, RowmillError, RunResult};
use rowmill_graph::{argument_variable, Pipeline, StepKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use rowmill_relay::RelayRegistry;

use crate::steps::{run_step, SinkHandle, StepContext, StepCounters};

/// Engine behavior knobs copied from the execution configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Log verbosity for the run.
    pub log_level: LogLevel,
    /// Enables row-layout consistency checking.
    pub safe_mode: bool,
    /// Enables per-step metrics logging at completion.
    pub gathering_metrics: bool,
    /// Row buffer size per hop channel.
    pub hop_buffer_rows: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Basic,
            safe_mode: false,
            gathering_metrics: false,
            hop_buffer_rows: 1024,
        }
    }
}

struct PreparedStep {
    kind: StepKind,
    ctx: StepContext,
}

/// Cloneable handle that requests cooperative stop of a running pipeline.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Signal every step task to wind down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// One prepared/running local execution of a pipeline.
///
/// Lifecycle: [`LocalRun::prepare`] wires the step topology,
/// [`LocalRun::start_threads`] spawns one task per step,
/// [`LocalRun::wait_until_finished`] joins them and folds the counters into
/// the run's [`RunResult`]. [`LocalRun::stop`] requests cooperative stop at
/// any point after start.
pub struct LocalRun {
    pipeline_name: String,
    settings: EngineSettings,
    prepared: Vec<PreparedStep>,
    running: Vec<(String, JoinHandle<Result<StepCounters>>)>,
    stop_tx: Arc<watch::Sender<bool>>,
    sinks: HashMap<String, SinkHandle>,
}

impl LocalRun {
    /// Validate the pipeline and wire up the step topology: one bounded FIFO
    /// channel per hop, relay endpoints pre-taken from `relay`, positional
    /// arguments exposed as `rowmill.argument.N` variables.
    pub fn prepare(
        pipeline: Pipeline,
        settings: EngineSettings,
        mut variables: BTreeMap<String, String>,
        arguments: &[String],
        relay: Arc<RelayRegistry>,
    ) -> Result<Self> {
        pipeline.validate()?;

        for (i, arg) in arguments.iter().enumerate() {
            variables.insert(argument_variable(i + 1), arg.clone());
        }
        let variables = Arc::new(variables);
        let (stop_tx, _) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        // One channel per hop keeps per-hop FIFO ordering.
        let mut senders: HashMap<String, Vec<mpsc::Sender<Row>>> = HashMap::new();
        let mut receivers: HashMap<String, Vec<mpsc::Receiver<Row>>> = HashMap::new();
        for hop in &pipeline.hops {
            let (tx, rx) = mpsc::channel(settings.hop_buffer_rows.max(1));
            senders.entry(hop.from.clone()).or_default().push(tx);
            receivers.entry(hop.to.clone()).or_default().push(rx);
        }

        let mut sinks = HashMap::new();
        let mut prepared = Vec::with_capacity(pipeline.steps.len());
        for step in &pipeline.steps {
            let relay_sender = match &step.kind {
                StepKind::RelaySend { channel } => Some(relay.take_sender(channel)?),
                _ => None,
            };
            let relay_receiver = match &step.kind {
                StepKind::RelayReceive { channel } => Some(relay.take_receiver(channel)?),
                _ => None,
            };
            let sink = match &step.kind {
                StepKind::Sink => {
                    let handle: SinkHandle = Arc::new(Mutex::new(Vec::new()));
                    sinks.insert(step.name.clone(), Arc::clone(&handle));
                    Some(handle)
                }
                _ => None,
            };
            prepared.push(PreparedStep {
                kind: step.kind.clone(),
                ctx: StepContext {
                    step_name: step.name.clone(),
                    variables: Arc::clone(&variables),
                    inputs: receivers.remove(&step.name).unwrap_or_default(),
                    outputs: senders.remove(&step.name).unwrap_or_default(),
                    relay_sender,
                    relay_receiver,
                    sink,
                    stop: stop_tx.subscribe(),
                    safe_mode: settings.safe_mode,
                },
            });
        }

        Ok(Self {
            pipeline_name: pipeline.name,
            settings,
            prepared,
            running: Vec::new(),
            stop_tx,
            sinks,
        })
    }

    /// Spawn one task per step. Rows start flowing immediately.
    pub fn start_threads(&mut self) -> Result<()> {
        if self.prepared.is_empty() && self.running.is_empty() {
            return Err(RowmillError::Execution(format!(
                "pipeline '{}' has no steps to start",
                self.pipeline_name
            )));
        }
        info!(
            pipeline = %self.pipeline_name,
            steps = self.prepared.len(),
            "starting step tasks"
        );
        for step in self.prepared.drain(..) {
            let name = step.ctx.step_name.clone();
            let handle = tokio::spawn(run_step(step.kind, step.ctx));
            self.running.push((name, handle));
        }
        Ok(())
    }

    /// Request cooperative stop; steps observe the signal and wind down
    /// without draining further rows.
    pub fn stop(&self) {
        info!(pipeline = %self.pipeline_name, "stop requested");
        let _ = self.stop_tx.send(true);
    }

    /// Handle usable to request stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Join all step tasks and fold their counters into the run result.
    /// Step failures mark the result failed; they are never silently
    /// swallowed.
    pub async fn wait_until_finished(&mut self) -> RunResult {
        let mut result = RunResult::new();
        for (name, handle) in self.running.drain(..) {
            match handle.await {
                Ok(Ok(counters)) => {
                    if self.settings.gathering_metrics {
                        info!(
                            pipeline = %self.pipeline_name,
                            step = %name,
                            read = counters.read,
                            written = counters.written,
                            input = counters.input,
                            output = counters.output,
                            rejected = counters.rejected,
                            "step metrics"
                        );
                    }
                    result.lines_read += counters.read;
                    result.lines_written += counters.written;
                    result.lines_input += counters.input;
                    result.lines_output += counters.output;
                    result.lines_updated += counters.updated;
                    result.lines_rejected += counters.rejected;
                }
                Ok(Err(e)) => {
                    error!(pipeline = %self.pipeline_name, step = %name, error = %e, "step error");
                    result.record_error();
                    if !result.log_text.is_empty() {
                        result.log_text.push('\n');
                    }
                    result.log_text.push_str(&format!("{name}: {e}"));
                    // Wake the surviving steps so the run winds down.
                    let _ = self.stop_tx.send(true);
                }
                Err(join_err) => {
                    error!(
                        pipeline = %self.pipeline_name,
                        step = %name,
                        error = %join_err,
                        "step task panicked"
                    );
                    result.record_error();
                    let _ = self.stop_tx.send(true);
                }
            }
        }
        info!(
            pipeline = %self.pipeline_name,
            errors = result.errors,
            written = result.lines_written,
            success = result.success,
            "pipeline finished"
        );
        result
    }

    /// Take the rows a sink step collected (test/verification helper).
    pub fn take_step_output(&self, step: &str) -> Option<Vec<Row>> {
        self.sinks
            .get(step)
            .map(|h| std::mem::take(&mut *h.lock().expect("sink lock poisoned")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rowmill_graph::{FieldDef, Pipeline, StepKind, StepMeta};
    use rowmill_relay::RelayRegistry;

    use super::{EngineSettings, LocalRun};

    fn generator_to_sink(rows: u64, value: &str) -> Pipeline {
        let mut p = Pipeline::new("gen to sink");
        p.add_step(StepMeta::new(
            "gen",
            StepKind::Generator {
                rows,
                fields: vec![FieldDef::new("v", value)],
            },
        ));
        p.add_step(StepMeta::new("out", StepKind::Sink));
        p.add_hop("gen", "out");
        p
    }

    async fn run(pipeline: Pipeline, variables: BTreeMap<String, String>) -> (LocalRun, rowmill_common::RunResult) {
        let mut run = LocalRun::prepare(
            pipeline,
            EngineSettings::default(),
            variables,
            &[],
            Arc::new(RelayRegistry::new()),
        )
        .expect("prepare");
        run.start_threads().expect("start");
        let result = run.wait_until_finished().await;
        (run, result)
    }

    #[tokio::test]
    async fn generator_rows_reach_the_sink() {
        let (run, result) = run(generator_to_sink(5, "x"), BTreeMap::new()).await;
        assert!(result.success);
        assert_eq!(result.errors, 0);
        assert_eq!(result.lines_written, 5);
        assert_eq!(result.lines_read, 5);
        assert_eq!(result.lines_output, 5);
        assert_eq!(run.take_step_output("out").expect("rows").len(), 5);
    }

    #[tokio::test]
    async fn generator_resolves_variables_into_fields() {
        let mut variables = BTreeMap::new();
        variables.insert("p1".to_string(), "42".to_string());
        let (run, result) = run(generator_to_sink(1, "${p1}"), variables).await;
        assert_eq!(result.errors, 0);
        let rows = run.take_step_output("out").expect("rows");
        assert_eq!(rows[0].get("v"), Some("42"));
    }

    #[tokio::test]
    async fn filter_counts_rejected_rows() {
        let mut p = Pipeline::new("filtered");
        p.add_step(StepMeta::new(
            "gen",
            StepKind::Generator {
                rows: 4,
                fields: vec![FieldDef::new("v", "keep")],
            },
        ));
        p.add_step(StepMeta::new(
            "only other",
            StepKind::Filter {
                field: "v".to_string(),
                equals: "other".to_string(),
            },
        ));
        p.add_step(StepMeta::new("out", StepKind::Sink));
        p.add_hop("gen", "only other");
        p.add_hop("only other", "out");
        let (run, result) = run(p, BTreeMap::new()).await;
        assert_eq!(result.lines_rejected, 4);
        assert!(run.take_step_output("out").expect("rows").is_empty());
    }

    #[tokio::test]
    async fn abort_step_fails_the_run() {
        let mut p = Pipeline::new("aborting");
        p.add_step(StepMeta::new(
            "gen",
            StepKind::Generator {
                rows: 10,
                fields: vec![FieldDef::new("v", "x")],
            },
        ));
        p.add_step(StepMeta::new("guard", StepKind::Abort { after_rows: 2 }));
        p.add_step(StepMeta::new("out", StepKind::Sink));
        p.add_hop("gen", "guard");
        p.add_hop("guard", "out");
        let (_, result) = run(p, BTreeMap::new()).await;
        assert!(!result.success);
        assert_eq!(result.errors, 1);
        assert!(result.log_text.contains("aborting after 2 rows"));
    }

    #[tokio::test]
    async fn relay_pair_carries_rows_between_runs() {
        let relay = Arc::new(RelayRegistry::new());

        let mut upstream = Pipeline::new("upstream");
        upstream.add_step(StepMeta::new(
            "gen",
            StepKind::Generator {
                rows: 3,
                fields: vec![FieldDef::new("v", "x")],
            },
        ));
        upstream.add_step(StepMeta::new(
            "send",
            StepKind::RelaySend {
                channel: "gen -> out @ p1".to_string(),
            },
        ));
        upstream.add_hop("gen", "send");

        let mut downstream = Pipeline::new("downstream");
        downstream.add_step(StepMeta::new(
            "recv",
            StepKind::RelayReceive {
                channel: "gen -> out @ p1".to_string(),
            },
        ));
        downstream.add_step(StepMeta::new("out", StepKind::Sink));
        downstream.add_hop("recv", "out");

        let mut up = LocalRun::prepare(
            upstream,
            EngineSettings::default(),
            BTreeMap::new(),
            &[],
            Arc::clone(&relay),
        )
        .expect("prepare upstream");
        let mut down = LocalRun::prepare(
            downstream,
            EngineSettings::default(),
            BTreeMap::new(),
            &[],
            Arc::clone(&relay),
        )
        .expect("prepare downstream");

        up.start_threads().expect("start up");
        down.start_threads().expect("start down");
        let up_result = up.wait_until_finished().await;
        let down_result = down.wait_until_finished().await;

        assert!(up_result.success);
        assert!(down_result.success);
        assert_eq!(down.take_step_output("out").expect("rows").len(), 3);
    }
}
