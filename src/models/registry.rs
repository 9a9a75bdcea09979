//! Explicit model registry.
//!
//! Engines receive a registry at construction instead of looking models up in
//! global state, so independent engines can run with different model sets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::model::{OdeModel, validate_schema};
use crate::models::sir::{Sir, Sird, Sirf};

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn OdeModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding SIR, SIR-D and SIR-F.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [Arc<dyn OdeModel>; 3] = [Arc::new(Sir), Arc::new(Sird), Arc::new(Sirf)];
        for model in builtin {
            registry.models.insert(model.name().to_string(), model);
        }
        registry
    }

    /// Register a model after validating its schema.
    ///
    /// Names are unique; registering a name twice is rejected.
    pub fn register(&mut self, model: Arc<dyn OdeModel>) -> EngineResult<()> {
        validate_schema(model.as_ref())?;
        let name = model.name().to_string();
        if self.models.contains_key(&name) {
            return Err(EngineError::InvalidModel {
                model: name,
                reason: "a model with this name is already registered".to_string(),
            });
        }
        self.models.insert(name, model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn OdeModel>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownModel(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn OdeModel>> {
        self.models.values()
    }
}
