//! Entity and relation extraction strategies.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::json::parse_llm_json;
use crate::llm::{Conversation, LanguageModel, single_turn};
use crate::ner::NerModel;
use crate::prompt;
use crate::schema::{EntityRecord, NamedEntity, RelationRecord};

pub const DEFAULT_ENTITY_TYPES: [&str; 5] = ["PERSON", "ORGANIZATION", "PRODUCT", "LOCATION", "EVENT"];

pub fn default_entity_types() -> Vec<String> {
    DEFAULT_ENTITY_TYPES.iter().map(|t| t.to_string()).collect()
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<EntityRecord>>;
}

#[async_trait]
pub trait RelationExtractor: Send + Sync {
    async fn extract(&self, text: &str, entities: &[EntityRecord]) -> Result<Vec<RelationRecord>>;
}

/// Run an extraction prompt and keep asking for missed records.
///
/// After the first reply, each gleaning round sends a "continue" turn and
/// then asks whether more records remain; anything but `YES` stops.
async fn glean(
    llm: &dyn LanguageModel,
    extract_prompt: &str,
    target: &str,
    max_gleanings: usize,
) -> Result<Vec<String>> {
    let mut conversation = Conversation::new();
    let mut replies = vec![conversation.send(llm, extract_prompt).await?];

    for _ in 1..max_gleanings.max(1) {
        let reply = conversation
            .send(llm, &prompt::build_continue_prompt(target))
            .await?;
        replies.push(reply);

        let more = conversation
            .send(llm, &prompt::build_loop_prompt(target))
            .await?;
        if more.trim() != "YES" {
            break;
        }
    }

    Ok(replies)
}

/// Parse each reply as a JSON list; malformed replies contribute nothing.
fn parse_records<T: DeserializeOwned>(replies: &[String], target: &str) -> Vec<T> {
    let mut records = Vec::new();
    for reply in replies {
        match parse_llm_json::<Vec<T>>(reply) {
            Ok(parsed) => records.extend(parsed),
            Err(e) => warn!(kind = target, error = %e, "Dropping malformed extraction reply"),
        }
    }
    records
}

pub struct LlmEntityExtractor {
    llm: Arc<dyn LanguageModel>,
    entity_types: Vec<String>,
    max_gleanings: usize,
}

impl LlmEntityExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, entity_types: Vec<String>, max_gleanings: usize) -> Self {
        Self {
            llm,
            entity_types,
            max_gleanings,
        }
    }
}

#[async_trait]
impl EntityExtractor for LlmEntityExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<EntityRecord>> {
        let extract_prompt = prompt::build_entity_extraction_prompt(&self.entity_types, text);
        let replies = glean(self.llm.as_ref(), &extract_prompt, "entities", self.max_gleanings).await?;
        Ok(parse_records(&replies, "entities"))
    }
}

/// Finds entities with an NER model, then asks the language model to
/// describe them.
pub struct NerEntityExtractor {
    llm: Arc<dyn LanguageModel>,
    ner: Arc<dyn NerModel>,
    entity_types: Vec<String>,
}

impl NerEntityExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, ner: Arc<dyn NerModel>, entity_types: Vec<String>) -> Self {
        Self {
            llm,
            ner,
            entity_types,
        }
    }

    fn recognize(&self, text: &str) -> Vec<NamedEntity> {
        let mut found: Vec<NamedEntity> = Vec::new();
        for entity in self.ner.recognize(text) {
            if self.entity_types.contains(&entity.label) && !found.contains(&entity) {
                found.push(entity);
            }
        }
        found
    }
}

#[async_trait]
impl EntityExtractor for NerEntityExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<EntityRecord>> {
        let found = self.recognize(text);
        if found.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = found.len(), "NER entities found");

        let reply = single_turn(self.llm.as_ref(), &prompt::build_description_prompt(&found, text)).await?;
        Ok(parse_records(&[reply], "entities"))
    }
}

pub struct LlmRelationExtractor {
    llm: Arc<dyn LanguageModel>,
    max_gleanings: usize,
}

impl LlmRelationExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, max_gleanings: usize) -> Self {
        Self { llm, max_gleanings }
    }
}

#[async_trait]
impl RelationExtractor for LlmRelationExtractor {
    async fn extract(&self, text: &str, entities: &[EntityRecord]) -> Result<Vec<RelationRecord>> {
        let extract_prompt = prompt::build_relation_extraction_prompt(entities, text);
        let replies = glean(self.llm.as_ref(), &extract_prompt, "relations", self.max_gleanings).await?;
        Ok(parse_records(&replies, "relations"))
    }
}
