//! Launch/poll/stop contract of the in-process worker transport.

use std::collections::BTreeMap;
use std::time::Duration;

use rowmill_cluster::{ExecState, InProcessTransport, LaunchRequest, WorkerTransport};
use rowmill_common::{ExecutionHandle, LogLevel, WorkerRef};
use rowmill_graph::{FieldDef, Pipeline, StepKind, StepMeta};
use tokio::time::sleep;

fn launch_request(pipeline: &Pipeline) -> LaunchRequest {
    LaunchRequest {
        pipeline_json: pipeline.to_json().expect("encode"),
        variables: BTreeMap::new(),
        log_level: LogLevel::Basic,
        safe_mode: false,
        gathering_metrics: false,
        clearing_log: true,
    }
}

async fn poll_until_terminal(
    transport: &InProcessTransport,
    worker: &WorkerRef,
    handle: &ExecutionHandle,
) -> rowmill_cluster::PollStatus {
    loop {
        let status = transport.poll(worker, handle).await.expect("poll");
        if status.state != ExecState::Running {
            return status;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn launched_pipeline_finishes_and_reports_counters() {
    let transport = InProcessTransport::new();
    let worker = WorkerRef::new("wk-local", "mem://local");

    let mut p = Pipeline::new("small run");
    p.add_step(StepMeta::new(
        "gen",
        StepKind::Generator {
            rows: 7,
            fields: vec![FieldDef::new("v", "x")],
        },
    ));
    p.add_step(StepMeta::new("out", StepKind::Sink));
    p.add_hop("gen", "out");

    let handle = transport
        .launch(&worker, launch_request(&p))
        .await
        .expect("launch");
    let status = poll_until_terminal(&transport, &worker, &handle).await;
    assert_eq!(status.state, ExecState::Finished);
    let result = status.result.expect("terminal result");
    assert!(result.success);
    assert_eq!(result.lines_written, 7);
    assert_eq!(result.lines_output, 7);
}

#[tokio::test]
async fn stop_signal_moves_a_blocked_run_to_stopped() {
    let transport = InProcessTransport::new();
    let worker = WorkerRef::new("wk-local", "mem://local");

    // A receiver whose channel never gets a sender blocks until stopped.
    let mut p = Pipeline::new("blocked run");
    p.add_step(StepMeta::new(
        "recv",
        StepKind::RelayReceive {
            channel: "nobody -> recv @ master".to_string(),
        },
    ));
    p.add_step(StepMeta::new("out", StepKind::Sink));
    p.add_hop("recv", "out");

    let handle = transport
        .launch(&worker, launch_request(&p))
        .await
        .expect("launch");
    let running = transport.poll(&worker, &handle).await.expect("poll");
    assert_eq!(running.state, ExecState::Running);

    transport.stop(&worker, &handle).await.expect("stop");
    let status = poll_until_terminal(&transport, &worker, &handle).await;
    assert_eq!(status.state, ExecState::Stopped);
}

#[tokio::test]
async fn rejected_pipeline_fails_at_launch() {
    let transport = InProcessTransport::new();
    let worker = WorkerRef::new("wk-local", "mem://local");
    let mut p = Pipeline::new("dangling hop");
    p.add_step(StepMeta::new("out", StepKind::Sink));
    p.add_hop("missing", "out");
    assert!(transport.launch(&worker, launch_request(&p)).await.is_err());
}
