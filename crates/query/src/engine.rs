use anyhow::{Context, Result};
use extract::{Conversation, LanguageModel, parse_llm_json, prompt, single_turn};
use index::{BuildOutput, EmbeddingService, TableStore, TextUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::graph::{KnowledgeGraph, Subgraph};
use crate::retriever::{expand, retrieve_entities, retrieve_text_units};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub edge_threshold: f32,
    pub text_threshold: f32,
    /// Nearest entities taken per unmatched query name.
    pub entity_top_k: usize,
    pub ignore_case: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.5,
            text_threshold: 0.5,
            entity_top_k: 3,
            ignore_case: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    /// Knowledge graph context the answer was generated from.
    pub context: String,
    pub trace: QueryTrace,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryTrace {
    pub extracted_entities: Vec<String>,
    pub seed_ids: Vec<String>,
    pub subgraph_entities: usize,
    pub subgraph_relations: usize,
    /// Whether the graph alone was judged sufficient.
    pub graph_sufficient: bool,
    pub attributes_resolved: usize,
}

#[derive(Debug, Clone, Serialize)]
struct EntityContext {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    information: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct RelationContext {
    source: String,
    target: String,
    relation: String,
}

#[derive(Debug, Clone, Serialize)]
struct GraphContext {
    entities: Vec<EntityContext>,
    relations: Vec<RelationContext>,
}

impl GraphContext {
    fn from_subgraph(subgraph: &Subgraph) -> Self {
        let name = |id: &str| subgraph.name_of(id).unwrap_or(id).to_string();
        Self {
            entities: subgraph
                .entities
                .iter()
                .map(|e| EntityContext {
                    name: e.name.clone(),
                    information: Vec::new(),
                })
                .collect(),
            relations: subgraph
                .relations
                .iter()
                .map(|r| RelationContext {
                    source: name(&r.source),
                    target: name(&r.target),
                    relation: r.description.clone(),
                })
                .collect(),
        }
    }

    fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Answers questions over one persisted knowledge graph.
pub struct QueryEngine {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn EmbeddingService>,
    graph: KnowledgeGraph,
    text_units: HashMap<String, TextUnit>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingService>,
        data: BuildOutput,
        config: QueryConfig,
    ) -> Self {
        let text_units = data
            .text_units
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();
        Self {
            llm,
            embedder,
            graph: KnowledgeGraph::new(data.entities, data.relations),
            text_units,
            config,
        }
    }

    /// Load the tables written by an index build.
    pub async fn load(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingService>,
        data_dir: &Path,
        config: QueryConfig,
    ) -> Result<Self> {
        let data = TableStore::new(data_dir)
            .load()
            .await
            .context(format!("Failed to load knowledge graph from {:?}", data_dir))?;
        info!(
            entities = data.entities.len(),
            relations = data.relations.len(),
            text_units = data.text_units.len(),
            "Knowledge graph loaded"
        );
        Ok(Self::new(llm, embedder, data, config))
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub async fn answer(&self, question: &str) -> Result<QueryResult> {
        let mut trace = QueryTrace {
            extracted_entities: self.extract_query_entities(question).await?,
            ..QueryTrace::default()
        };
        info!(entities = ?trace.extracted_entities, "Extracted entities from query");

        trace.seed_ids = retrieve_entities(
            self.embedder.as_ref(),
            &self.graph,
            &trace.extracted_entities,
            self.config.entity_top_k,
            self.config.ignore_case,
        )
        .await?;

        let query_embedding = self
            .embedder
            .embed_one(question)
            .await
            .context("Failed to embed query")?;
        let subgraph = expand(
            &query_embedding,
            &self.graph,
            &trace.seed_ids,
            self.config.edge_threshold,
        );
        trace.subgraph_entities = subgraph.entities.len();
        trace.subgraph_relations = subgraph.relations.len();

        let mut context = GraphContext::from_subgraph(&subgraph);
        let mut conversation = Conversation::new();

        let judgement = conversation
            .send(
                self.llm.as_ref(),
                &prompt::build_kg_judge_prompt(&context.render(), question),
            )
            .await?;

        if judgement.trim() == "YES" {
            trace.graph_sufficient = true;
        } else {
            let needed = self
                .requested_attributes(&mut conversation, question, &context)
                .await?;
            for (slot, entity) in subgraph.entities.iter().enumerate() {
                let Some(attributes) = needed.get(&entity.name).filter(|a| !a.is_empty()) else {
                    continue;
                };
                let information = self
                    .extract_attributes(&mut conversation, &entity.name, &entity.text_unit_refs, attributes)
                    .await?;
                trace.attributes_resolved += information.len();
                context.entities[slot].information = information;
            }
        }

        let rendered = context.render();
        let answer = conversation
            .send(
                self.llm.as_ref(),
                &prompt::build_answer_prompt(&rendered, question),
            )
            .await?;
        debug!(transcript = %conversation.transcript(), "Query conversation");

        Ok(QueryResult {
            answer: answer.replace("\n\n", "\n"),
            context: rendered,
            trace,
        })
    }

    async fn extract_query_entities(&self, question: &str) -> Result<Vec<String>> {
        let reply = single_turn(self.llm.as_ref(), &prompt::build_query_entity_prompt(question)).await?;
        match parse_llm_json::<Vec<String>>(&reply) {
            Ok(names) => Ok(names),
            Err(e) => {
                warn!(error = %e, "Malformed query entity reply, no seeds extracted");
                Ok(Vec::new())
            }
        }
    }

    /// Attributes the model still needs, keyed by entity name.
    async fn requested_attributes(
        &self,
        conversation: &mut Conversation,
        question: &str,
        context: &GraphContext,
    ) -> Result<HashMap<String, Vec<String>>> {
        let reply = conversation
            .send(
                self.llm.as_ref(),
                &prompt::build_additional_info_prompt(question, &context.render()),
            )
            .await?;
        match parse_llm_json(&reply) {
            Ok(needed) => Ok(needed),
            Err(e) => {
                warn!(error = %e, "Malformed attribute request, treating as not found");
                Ok(HashMap::new())
            }
        }
    }

    async fn extract_attributes(
        &self,
        conversation: &mut Conversation,
        entity: &str,
        unit_ids: &[String],
        attributes: &[String],
    ) -> Result<Vec<String>> {
        let units: Vec<&TextUnit> = unit_ids
            .iter()
            .filter_map(|id| self.text_units.get(id))
            .collect();
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let queries: Vec<String> = attributes
            .iter()
            .map(|attribute| format!("{}: {}", entity, attribute))
            .collect();
        let contexts = retrieve_text_units(
            self.embedder.as_ref(),
            &queries,
            &units,
            self.config.text_threshold,
        )
        .await?;

        let mut information = Vec::with_capacity(attributes.len());
        for (attribute, found) in attributes.iter().zip(contexts) {
            let reply = conversation
                .send(
                    self.llm.as_ref(),
                    &prompt::build_attribute_prompt(entity, attribute, &found.join("\n")),
                )
                .await?;
            info!(entity, attribute = %attribute, value = %reply, "Attribute extracted");
            information.push(reply);
        }
        Ok(information)
    }
}
