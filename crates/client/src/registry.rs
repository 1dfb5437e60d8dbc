use std::collections::HashMap;
use std::sync::Arc;

use rowmill_engine::{EngineFactory, LocalEngineFactory};
use tracing::debug;

/// Maps run-configuration names to engine factories.
///
/// The registry is an explicit object handed to the dispatcher at
/// construction time; there is no process-wide factory state. Unknown or
/// absent names resolve to the default profile.
pub struct EngineRegistry {
    factories: HashMap<String, Arc<dyn EngineFactory>>,
    default_factory: Arc<dyn EngineFactory>,
}

impl EngineRegistry {
    /// Registry with the documented default entry: the in-process
    /// [`LocalEngineFactory`].
    pub fn with_default() -> Self {
        Self {
            factories: HashMap::new(),
            default_factory: Arc::new(LocalEngineFactory),
        }
    }

    /// Register a factory under a run-configuration name.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn EngineFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Resolve a run-configuration name; unknown names fall back to the
    /// default factory.
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn EngineFactory> {
        match name.and_then(|n| self.factories.get(n)) {
            Some(factory) => Arc::clone(factory),
            None => {
                if let Some(n) = name {
                    debug!(
                        run_configuration = %n,
                        "run configuration not registered; using default profile"
                    );
                }
                Arc::clone(&self.default_factory)
            }
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_default()
    }
}
