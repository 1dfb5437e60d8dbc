//! Step task bodies.
//!
//! Counter semantics follow the original engine's ledger:
//! - `read`/`written`: rows exchanged with neighboring steps
//! - `input`/`output`: rows exchanged with the outside world
//! - `rejected`: rows dropped by filtering steps
//!
//! Every loop observes the run's stop signal, so cancellation is
//! cooperative: a stopped step drains nothing further and returns cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use rowmill_common::{Result, Row, RowmillError};
use rowmill_graph::{substitute, FieldDef, StepKind};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Per-step counter ledger folded into the run result.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepCounters {
    pub read: u64,
    pub written: u64,
    pub input: u64,
    pub output: u64,
    pub updated: u64,
    pub rejected: u64,
}

/// Everything one step task needs: its row endpoints, the resolved variable
/// overlay, pre-taken relay endpoints, and the stop signal.
pub struct StepContext {
    pub step_name: String,
    pub variables: Arc<BTreeMap<String, String>>,
    pub inputs: Vec<mpsc::Receiver<Row>>,
    pub outputs: Vec<mpsc::Sender<Row>>,
    pub relay_sender: Option<mpsc::Sender<Row>>,
    pub relay_receiver: Option<mpsc::Receiver<Row>>,
    pub sink: Option<SinkHandle>,
    pub stop: watch::Receiver<bool>,
    pub safe_mode: bool,
}

/// Shared collector the sink step appends to; retrievable per step name
/// after the run.
pub type SinkHandle = Arc<std::sync::Mutex<Vec<Row>>>;

/// Run one step to completion. Returns the step's counters, or the error
/// that failed the run.
pub async fn run_step(kind: StepKind, mut ctx: StepContext) -> Result<StepCounters> {
    let step = ctx.step_name.clone();
    debug!(step = %step, kind = kind.type_name(), "step started");
    let out = match kind {
        StepKind::Generator { rows, fields } => run_generator(rows, &fields, &mut ctx).await,
        StepKind::Calculator { field } => run_calculator(&field, &mut ctx).await,
        StepKind::Filter { field, equals } => run_filter(&field, &equals, &mut ctx).await,
        StepKind::Sink => run_sink(&mut ctx).await,
        StepKind::Abort { after_rows } => run_abort(after_rows, &mut ctx).await,
        StepKind::RelaySend { channel } => run_relay_send(&channel, &mut ctx).await,
        StepKind::RelayReceive { channel } => run_relay_receive(&channel, &mut ctx).await,
    };
    match &out {
        Ok(counters) => debug!(
            step = %step,
            read = counters.read,
            written = counters.written,
            rejected = counters.rejected,
            "step finished"
        ),
        Err(e) => error!(step = %step, error = %e, "step failed"),
    }
    out
}

/// Send a copy of `row` to every outgoing hop. Returns `false` when the run
/// was stopped or every downstream endpoint is gone.
async fn send_row(ctx: &mut StepContext, row: &Row) -> bool {
    if *ctx.stop.borrow() {
        return false;
    }
    let mut delivered = ctx.outputs.is_empty();
    for tx in &ctx.outputs {
        tokio::select! {
            res = tx.send(row.clone()) => {
                if res.is_ok() {
                    delivered = true;
                }
            }
            _ = ctx.stop.changed() => return false,
        }
    }
    delivered
}

/// Merge all incoming hops into one FIFO-per-hop stream and drain it row by
/// row, honoring the stop signal. `None` means end of input or stop.
struct InputDrain {
    stream: futures::stream::SelectAll<ReceiverStream<Row>>,
}

impl InputDrain {
    fn new(inputs: Vec<mpsc::Receiver<Row>>) -> Self {
        Self {
            stream: futures::stream::select_all(inputs.into_iter().map(ReceiverStream::new)),
        }
    }

    async fn next(&mut self, stop: &mut watch::Receiver<bool>) -> Option<Row> {
        if *stop.borrow() {
            return None;
        }
        tokio::select! {
            row = self.stream.next() => row,
            _ = stop.changed() => None,
        }
    }
}

/// Verify row layout stability when safe mode is on.
fn check_layout(step: &str, reference: &mut Option<Row>, row: &Row) -> Result<()> {
    match reference {
        Some(first) if !first.layout_matches(row) => Err(RowmillError::Execution(format!(
            "step '{step}': row layout changed mid-stream (safe mode), expected [{}] got [{}]",
            first.layout().join(", "),
            row.layout().join(", ")
        ))),
        Some(_) => Ok(()),
        None => {
            *reference = Some(row.clone());
            Ok(())
        }
    }
}

async fn run_generator(
    rows: u64,
    fields: &[FieldDef],
    ctx: &mut StepContext,
) -> Result<StepCounters> {
    let mut template = Row::new();
    for f in fields {
        template.set(f.name.clone(), substitute(&f.value, &ctx.variables));
    }
    let mut counters = StepCounters::default();
    for _ in 0..rows {
        if !send_row(ctx, &template).await {
            break;
        }
        counters.written += 1;
    }
    Ok(counters)
}

async fn run_calculator(field: &FieldDef, ctx: &mut StepContext) -> Result<StepCounters> {
    let value = substitute(&field.value, &ctx.variables);
    let mut counters = StepCounters::default();
    let mut reference = None;
    let mut drain = InputDrain::new(std::mem::take(&mut ctx.inputs));
    while let Some(mut row) = drain.next(&mut ctx.stop).await {
        if ctx.safe_mode {
            check_layout(&ctx.step_name, &mut reference, &row)?;
        }
        counters.read += 1;
        row.set(field.name.clone(), value.clone());
        if !send_row(ctx, &row).await {
            break;
        }
        counters.written += 1;
    }
    Ok(counters)
}

async fn run_filter(field: &str, equals: &str, ctx: &mut StepContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    let mut reference = None;
    let mut drain = InputDrain::new(std::mem::take(&mut ctx.inputs));
    while let Some(row) = drain.next(&mut ctx.stop).await {
        if ctx.safe_mode {
            check_layout(&ctx.step_name, &mut reference, &row)?;
        }
        counters.read += 1;
        if row.get(field) == Some(equals) {
            if !send_row(ctx, &row).await {
                break;
            }
            counters.written += 1;
        } else {
            counters.rejected += 1;
        }
    }
    Ok(counters)
}

async fn run_sink(ctx: &mut StepContext) -> Result<StepCounters> {
    let sink = ctx
        .sink
        .clone()
        .ok_or_else(|| RowmillError::Execution("sink step has no collector".to_string()))?;
    let mut counters = StepCounters::default();
    let mut reference = None;
    let mut drain = InputDrain::new(std::mem::take(&mut ctx.inputs));
    while let Some(row) = drain.next(&mut ctx.stop).await {
        if ctx.safe_mode {
            check_layout(&ctx.step_name, &mut reference, &row)?;
        }
        counters.read += 1;
        counters.output += 1;
        sink.lock().expect("sink lock poisoned").push(row);
    }
    Ok(counters)
}

async fn run_abort(after_rows: u64, ctx: &mut StepContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    let mut drain = InputDrain::new(std::mem::take(&mut ctx.inputs));
    while let Some(row) = drain.next(&mut ctx.stop).await {
        counters.read += 1;
        if counters.read > after_rows {
            return Err(RowmillError::Execution(format!(
                "step '{}': aborting after {after_rows} rows",
                ctx.step_name
            )));
        }
        if !send_row(ctx, &row).await {
            break;
        }
        counters.written += 1;
    }
    Ok(counters)
}

async fn run_relay_send(channel: &str, ctx: &mut StepContext) -> Result<StepCounters> {
    let tx = ctx.relay_sender.take().ok_or_else(|| {
        RowmillError::Execution(format!("relay channel '{channel}' sender endpoint missing"))
    })?;
    let mut counters = StepCounters::default();
    let mut drain = InputDrain::new(std::mem::take(&mut ctx.inputs));
    while let Some(row) = drain.next(&mut ctx.stop).await {
        counters.read += 1;
        tokio::select! {
            res = tx.send(row) => {
                if res.is_err() {
                    break;
                }
                counters.written += 1;
            }
            _ = ctx.stop.changed() => break,
        }
    }
    // Dropping the sender is the receiver's end-of-stream signal.
    drop(tx);
    Ok(counters)
}

async fn run_relay_receive(channel: &str, ctx: &mut StepContext) -> Result<StepCounters> {
    let mut rx = ctx.relay_receiver.take().ok_or_else(|| {
        RowmillError::Execution(format!(
            "relay channel '{channel}' receiver endpoint missing"
        ))
    })?;
    let mut counters = StepCounters::default();
    loop {
        let row = tokio::select! {
            row = rx.recv() => row,
            _ = ctx.stop.changed() => None,
        };
        let Some(row) = row else { break };
        counters.read += 1;
        if !send_row(ctx, &row).await {
            break;
        }
        counters.written += 1;
    }
    Ok(counters)
}
