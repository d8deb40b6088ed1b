use crate::schema::NamedEntity;

/// A named-entity recognizer, e.g. a statistical NER pipeline loaded once
/// and shared through a [`ingest::ModelRegistry`].
pub trait NerModel: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<NamedEntity>;
}

pub type NerRegistry = ingest::ModelRegistry<dyn NerModel>;
