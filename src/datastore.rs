//! Base model lookup for adapter models

use std::collections::HashMap;

/// Read-only view of the model catalogue.
#[cfg_attr(test, mockall::automock)]
pub trait Datastore: Send + Sync {
    /// Base model for `model_name`, or `None` when none is known.
    fn get_base_model(&self, model_name: &str) -> Option<String>;
}

/// Datastore backed by a fixed adapter-to-base table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDatastore {
    base_models: HashMap<String, String>,
}

impl StaticDatastore {
    pub fn new(base_models: HashMap<String, String>) -> Self {
        Self { base_models }
    }

    pub fn len(&self) -> usize {
        self.base_models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_models.is_empty()
    }
}

impl Datastore for StaticDatastore {
    fn get_base_model(&self, model_name: &str) -> Option<String> {
        self.base_models
            .get(model_name)
            .filter(|base| !base.is_empty())
            .cloned()
    }
}
