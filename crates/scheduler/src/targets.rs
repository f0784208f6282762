//! Worker name → dispatch target, loaded from `targets.toml`.
//!
//! ```toml
//! [workers.digest]
//! kind = "QUEUE"
//! send_params = { queue_url = "https://sqs.eu-west-1.amazonaws.com/123/digest" }
//!
//! [workers.reindex]
//! kind = "FUNCTION"
//! connection_config = { region = "us-east-1" }
//! invoke_params = { function_name = "reindex" }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use hourglass_core::ServiceDefinition;

use crate::error::WorkerError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetRegistry {
    #[serde(default)]
    workers: BTreeMap<String, ServiceDefinition>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, WorkerError> {
        toml::from_str(s).map_err(|e| WorkerError::Config(format!("invalid targets file: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("cannot read {}: {e}", path.display())))?;
        let registry = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), workers = registry.len(), "dispatch targets loaded");
        Ok(registry)
    }

    pub fn insert(&mut self, worker_name: impl Into<String>, target: ServiceDefinition) {
        self.workers.insert(worker_name.into(), target);
    }

    pub fn with(mut self, worker_name: impl Into<String>, target: ServiceDefinition) -> Self {
        self.insert(worker_name, target);
        self
    }

    pub fn get(&self, worker_name: &str) -> Option<&ServiceDefinition> {
        self.workers.get(worker_name)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServiceDefinition)> {
        self.workers.iter()
    }
}
