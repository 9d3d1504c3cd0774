//! Job registry: explicit name-to-definition map built at process start.
//!
//! The original resolved jobs through a runtime bean lookup keyed by string
//! name, which turned a typo into a runtime exception deep inside launch.
//! Here registration is explicit and lookup returns a typed
//! [`BatchError::UnknownJob`] the caller can branch on.

use super::definition::JobDefinition;
use crate::error::{BatchError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobDefinition>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: JobDefinition) {
        let name = definition.name().to_string();
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&name) {
            warn!(job_name = %name, "Job already registered, replacing definition");
        }
        jobs.insert(name.clone(), Arc::new(definition));
        info!(job_name = %name, "Registered job definition");
    }

    pub fn get(&self, name: &str) -> Result<Arc<JobDefinition>> {
        self.jobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BatchError::UnknownJob(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().contains_key(name)
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }
}
