use std::collections::BTreeMap;
use std::sync::Arc;

use rowmill_common::Result;
use rowmill_graph::Pipeline;
use rowmill_relay::RelayRegistry;

use crate::run::{EngineSettings, LocalRun};

/// Builds a prepared run for one named run-configuration profile.
///
/// Profiles let deployments swap the execution runtime per run
/// configuration; the registry that resolves names to factories lives with
/// the dispatcher.
pub trait EngineFactory: Send + Sync {
    /// Profile name, for logs.
    fn name(&self) -> &str;

    /// Wire a pipeline into a prepared (not yet started) run.
    fn create(
        &self,
        pipeline: Pipeline,
        settings: EngineSettings,
        variables: BTreeMap<String, String>,
        arguments: &[String],
        relay: Arc<RelayRegistry>,
    ) -> Result<LocalRun>;
}

/// The default profile: in-process execution with [`LocalRun`].
#[derive(Debug, Default)]
pub struct LocalEngineFactory;

impl EngineFactory for LocalEngineFactory {
    fn name(&self) -> &str {
        "local"
    }

    fn create(
        &self,
        pipeline: Pipeline,
        settings: EngineSettings,
        variables: BTreeMap<String, String>,
        arguments: &[String],
        relay: Arc<RelayRegistry>,
    ) -> Result<LocalRun> {
        LocalRun::prepare(pipeline, settings, variables, arguments, relay)
    }
}
