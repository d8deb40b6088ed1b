use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::tokenizer::{Tokenizer, UnicodeTokenizer};

/// Named, caller-owned collection of loaded models (tokenizers, NER models).
///
/// Built once by whoever wires the pipeline together and handed to the
/// components that need a model, so tests can register fakes under the
/// same names.
pub struct ModelRegistry<M: ?Sized> {
    models: HashMap<String, Arc<M>>,
}

impl<M: ?Sized> ModelRegistry<M> {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, model: Arc<M>) {
        self.models.insert(name.into(), model);
    }

    pub fn get(&self, name: &str) -> Result<Arc<M>> {
        match self.models.get(name) {
            Some(model) => Ok(Arc::clone(model)),
            None => anyhow::bail!("No model registered under '{}'", name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }
}

impl<M: ?Sized> Default for ModelRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry<dyn Tokenizer> {
    /// Registry pre-loaded with the built-in tokenizers.
    pub fn with_default_tokenizers() -> Self {
        let mut registry = Self::new();
        registry.register(UnicodeTokenizer::NAME, Arc::new(UnicodeTokenizer));
        registry
    }
}
