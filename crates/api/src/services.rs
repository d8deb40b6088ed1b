//! Wires configured components into builders and query engines.

use anyhow::{Context, Result};
use extract::{
    EntityExtractor, GraphExtractor, LanguageModel, LlmEntityExtractor, LlmRelationExtractor,
    NerEntityExtractor, NerModel, NerRegistry, OllamaClient, RelationExtractor,
};
use index::{AlignmentPipeline, EmbeddingService, GraphBuilder, OllamaEmbedder, SentenceConnector};
use ingest::{ModelRegistry, TokenTextSplitter, Tokenizer};
use query::QueryEngine;
use std::path::Path;
use std::sync::Arc;

use crate::cache::CachedEmbedder;
use crate::config::{AppConfig, EntityExtractorConfig, RelationExtractorConfig};

/// Models shared by every build and query of one process.
pub struct Services {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub cache: Option<Arc<CachedEmbedder>>,
    pub tokenizers: ModelRegistry<dyn Tokenizer>,
    pub ner_models: NerRegistry,
}

impl Services {
    /// Ollama-backed services as configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let llm = OllamaClient::new(config.llm.base_url.clone(), config.llm.model.clone())
            .with_temperature(config.llm.temperature)
            .with_retry(config.retry.policy());
        let embedder = OllamaEmbedder::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
        )
        .with_retry(config.retry.policy());

        Self::new(Arc::new(llm), Arc::new(embedder), config)
    }

    /// Wrap the embedder in a cache when enabled.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingService>,
        config: &AppConfig,
    ) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(CachedEmbedder::new(embedder.clone(), config.cache.max_entries)));
        let embedder: Arc<dyn EmbeddingService> = match &cache {
            Some(cache) => cache.clone(),
            None => embedder,
        };

        Self {
            llm,
            embedder,
            cache,
            tokenizers: ModelRegistry::with_default_tokenizers(),
            ner_models: NerRegistry::new(),
        }
    }

    /// Make `model` available to `ner` entity extractors under `name`.
    pub fn with_ner_model(mut self, name: impl Into<String>, model: Arc<dyn NerModel>) -> Self {
        self.ner_models.register(name, model);
        self
    }

    pub fn graph_builder(&self, config: &AppConfig) -> Result<GraphBuilder> {
        let tokenizer = self
            .tokenizers
            .get(&config.splitter.tokenizer)
            .context("Unknown splitter tokenizer")?;
        let splitter = TokenTextSplitter::new(config.splitter.chunker())?;

        let mut entity_extractors: Vec<Box<dyn EntityExtractor>> = Vec::new();
        for extractor in &config.entity_extractors {
            entity_extractors.push(match extractor {
                EntityExtractorConfig::Llm { max_gleanings } => Box::new(LlmEntityExtractor::new(
                    self.llm.clone(),
                    config.entity_types.clone(),
                    *max_gleanings,
                )),
                EntityExtractorConfig::Ner { model } => Box::new(NerEntityExtractor::new(
                    self.llm.clone(),
                    self.ner_models.get(model).context("Unknown NER model")?,
                    config.entity_types.clone(),
                )),
            });
        }

        let relation_extractors: Vec<Box<dyn RelationExtractor>> = config
            .relation_extractors
            .iter()
            .map(|extractor| match extractor {
                RelationExtractorConfig::Llm { max_gleanings } => {
                    Box::new(LlmRelationExtractor::new(self.llm.clone(), *max_gleanings))
                        as Box<dyn RelationExtractor>
                }
            })
            .collect();

        let mut builder = GraphBuilder::new(
            self.llm.clone(),
            self.embedder.clone(),
            tokenizer,
            splitter,
            GraphExtractor::new(entity_extractors, relation_extractors),
        );

        if let Some(connector) = &config.connector {
            let tokenizer = self
                .tokenizers
                .get(&connector.tokenizer)
                .context("Unknown connector tokenizer")?;
            builder = builder.with_connector(SentenceConnector::new(
                self.llm.clone(),
                self.embedder.clone(),
                tokenizer,
                connector.clone(),
            ));
        }

        if !config.align.is_empty() {
            builder = builder.with_aligner(AlignmentPipeline::new(
                config.align.clone(),
                Some(self.llm.clone()),
            )?);
        }

        Ok(builder)
    }

    pub async fn query_engine(&self, config: &AppConfig, data_dir: &Path) -> Result<QueryEngine> {
        QueryEngine::load(
            self.llm.clone(),
            self.embedder.clone(),
            data_dir,
            config.query.clone(),
        )
        .await
    }
}
