use std::collections::HashMap;
use std::sync::Arc;

use super::{Model, ModelError};

/// Explicit name -> model lookup handed to the runner.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: Arc<dyn Model>) {
        let name = model.name().to_string();
        if self.models.insert(name.clone(), model).is_some() {
            tracing::warn!(model = %name, "Replacing registered model");
        }
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.register(model);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Model>, ModelError> {
        self.get(name)
            .ok_or_else(|| ModelError::NotRegistered(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}
