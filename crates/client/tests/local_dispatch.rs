//! Local dispatch scenarios: parameter overlay, argument variables, mode
//! precondition checks.

use std::sync::Arc;

use rowmill_client::{
    Dispatcher, EngineRegistry, ExecMode, ExecutionConfig, InProcessTransport, Pipeline,
};
use rowmill_common::RowmillError;
use rowmill_graph::{FieldDef, StepKind, StepMeta};

fn dispatcher() -> Dispatcher {
    Dispatcher::new(
        EngineRegistry::with_default(),
        Arc::new(InProcessTransport::new()),
    )
}

fn single_step_pipeline(value_template: &str) -> Pipeline {
    let mut p = Pipeline::new("single step");
    p.add_parameter("p1", "", "output value");
    p.add_step(StepMeta::new(
        "gen",
        StepKind::Generator {
            rows: 1,
            fields: vec![FieldDef::new("v", value_template)],
        },
    ));
    p.add_step(StepMeta::new("out", StepKind::Sink));
    p.add_hop("gen", "out");
    p
}

#[tokio::test]
async fn local_run_applies_parameter_override() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("${p1}");
    let mut config = ExecutionConfig::local();
    config.set_param("p1", "42");

    let result = dispatcher
        .execute(&pipeline, &config, &[])
        .await
        .expect("local dispatch");
    assert!(result.success);
    assert_eq!(result.errors, 0);

    let rows = dispatcher.take_step_output("out").expect("sink rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("v"), Some("42"));
}

#[tokio::test]
async fn parameter_beats_same_named_variable() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("${p1}");
    let mut config = ExecutionConfig::local();
    config.set_variable("p1", "7");
    config.set_param("p1", "42");

    dispatcher
        .execute(&pipeline, &config, &[])
        .await
        .expect("local dispatch");
    let rows = dispatcher.take_step_output("out").expect("sink rows");
    assert_eq!(rows[0].get("v"), Some("42"));
}

#[tokio::test]
async fn positional_arguments_become_variables() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("${rowmill.argument.1}");
    let result = dispatcher
        .execute(
            &pipeline,
            &ExecutionConfig::local(),
            &["from-cli".to_string()],
        )
        .await
        .expect("local dispatch");
    assert_eq!(result.errors, 0);
    let rows = dispatcher.take_step_output("out").expect("sink rows");
    assert_eq!(rows[0].get("v"), Some("from-cli"));
}

#[tokio::test]
async fn unknown_run_configuration_falls_back_to_default_profile() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("x");
    let mut config = ExecutionConfig::local();
    config.run_configuration = Some("does-not-exist".to_string());
    let result = dispatcher
        .execute(&pipeline, &config, &[])
        .await
        .expect("fallback profile runs");
    assert!(result.success);
}

#[tokio::test]
async fn remote_mode_without_target_worker_is_a_config_error() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("x");
    let mut config = ExecutionConfig::local();
    config.mode = ExecMode::Remote;
    let err = dispatcher
        .execute(&pipeline, &config, &[])
        .await
        .expect_err("missing worker must fail");
    assert!(matches!(err, RowmillError::Config(_)));
}

#[tokio::test]
async fn clustered_mode_without_schema_is_a_config_error() {
    let dispatcher = dispatcher();
    let pipeline = single_step_pipeline("x");
    let err = dispatcher
        .execute(&pipeline, &ExecutionConfig::clustered(), &[])
        .await
        .expect_err("missing schema must fail");
    assert!(matches!(err, RowmillError::Config(_)));
}

#[tokio::test]
async fn safe_mode_flags_divergent_row_layouts() {
    let dispatcher = dispatcher();

    // Two generators with different layouts feeding one sink.
    let mut p = Pipeline::new("mixed layouts");
    p.add_step(StepMeta::new(
        "gen a",
        StepKind::Generator {
            rows: 5,
            fields: vec![FieldDef::new("id", "1")],
        },
    ));
    p.add_step(StepMeta::new(
        "gen b",
        StepKind::Generator {
            rows: 5,
            fields: vec![FieldDef::new("name", "x")],
        },
    ));
    p.add_step(StepMeta::new("out", StepKind::Sink));
    p.add_hop("gen a", "out");
    p.add_hop("gen b", "out");

    let mut config = ExecutionConfig::local();
    config.safe_mode = true;
    let result = dispatcher
        .execute(&p, &config, &[])
        .await
        .expect("dispatch returns a failed result, not an error");
    assert!(!result.success);
    assert!(result.errors >= 1);
    assert!(result.log_text.contains("row layout changed"));
}
