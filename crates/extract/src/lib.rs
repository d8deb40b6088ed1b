pub mod graph;
pub mod json;
pub mod llm;
pub mod ner;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod strategy;

pub use graph::{ExtractionGraph, GraphEdge, GraphNode, NodeKey};
pub use json::parse_llm_json;
pub use llm::{Conversation, LanguageModel, Message, OllamaClient, Role, ScriptedModel, single_turn};
pub use ner::{NerModel, NerRegistry};
pub use retry::{RetryPolicy, StatusError, is_transient};
pub use schema::{EntityRecord, NamedEntity, RelationRecord};
pub use strategy::{
    EntityExtractor, LlmEntityExtractor, LlmRelationExtractor, NerEntityExtractor,
    RelationExtractor, default_entity_types,
};

use anyhow::{Context, Result};
use tracing::debug;

/// Runs the configured extractors over one chunk and builds its graph.
pub struct GraphExtractor {
    entity_extractors: Vec<Box<dyn EntityExtractor>>,
    relation_extractors: Vec<Box<dyn RelationExtractor>>,
}

impl GraphExtractor {
    pub fn new(
        entity_extractors: Vec<Box<dyn EntityExtractor>>,
        relation_extractors: Vec<Box<dyn RelationExtractor>>,
    ) -> Self {
        Self {
            entity_extractors,
            relation_extractors,
        }
    }

    /// Extract entities and relations from a chunk of text
    pub async fn run(&self, text: &str) -> Result<ExtractionGraph> {
        let mut entities = Vec::new();
        for extractor in &self.entity_extractors {
            entities.extend(
                extractor
                    .extract(text)
                    .await
                    .context("Entity extraction failed")?,
            );
        }

        let mut relations = Vec::new();
        for extractor in &self.relation_extractors {
            relations.extend(
                extractor
                    .extract(text, &entities)
                    .await
                    .context("Relation extraction failed")?,
            );
        }

        debug!(
            entities = entities.len(),
            relations = relations.len(),
            "Chunk extracted"
        );

        let mut graph = ExtractionGraph::new();
        for entity in entities {
            graph.add_entity(entity);
        }
        for relation in relations {
            graph.add_relation(relation);
        }
        Ok(graph)
    }
}
