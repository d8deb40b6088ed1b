use anyhow::{Context, Result};
use extract::{ExtractionGraph, GraphExtractor, LanguageModel, prompt, single_turn};
use ingest::{
    FileReader, TokenTextSplitter, Tokenizer, generate_doc_id, load_document, normalize_text,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::align::AlignmentPipeline;
use crate::connector::SentenceConnector;
use crate::embeddings::EmbeddingService;
use crate::model::{BuildOutput, Entity, Relation};
use crate::store::TableStore;

/// Characters per pronoun-replacement request.
const PRONOUN_BLOCK_CHARS: usize = 5000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub text_units: usize,
    pub alias_links: usize,
}

/// Turns one document into entity, relation, and text-unit tables.
pub struct GraphBuilder {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn EmbeddingService>,
    tokenizer: Arc<dyn Tokenizer>,
    splitter: TokenTextSplitter,
    extractor: GraphExtractor,
    connector: Option<SentenceConnector>,
    aligner: Option<AlignmentPipeline>,
}

impl GraphBuilder {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingService>,
        tokenizer: Arc<dyn Tokenizer>,
        splitter: TokenTextSplitter,
        extractor: GraphExtractor,
    ) -> Self {
        Self {
            llm,
            embedder,
            tokenizer,
            splitter,
            extractor,
            connector: None,
            aligner: None,
        }
    }

    pub fn with_connector(mut self, connector: SentenceConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_aligner(mut self, aligner: AlignmentPipeline) -> Self {
        self.aligner = Some(aligner);
        self
    }

    /// Build and persist the tables of `doc_or_path` under `output_dir`.
    pub async fn run(
        &self,
        doc_or_path: &str,
        output_dir: &Path,
        replace_pronouns: bool,
    ) -> Result<BuildStats> {
        let (output, stats) = self.build(doc_or_path, replace_pronouns).await?;
        TableStore::new(output_dir).save(&output).await?;
        Ok(stats)
    }

    /// Extract, connect, merge, summarize, embed, and align one document.
    pub async fn build(
        &self,
        doc_or_path: &str,
        replace_pronouns: bool,
    ) -> Result<(BuildOutput, BuildStats)> {
        let text = self.load_text(doc_or_path, replace_pronouns).await?;
        let doc_id = generate_doc_id(doc_or_path);
        let chunks = self.splitter.split_text(&doc_id, &text, self.tokenizer.as_ref());
        info!(doc_id = %doc_id, chunks = chunks.len(), "Building document graph");

        let mut graph = ExtractionGraph::new();
        let mut text_units = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let mut chunk_graph = self
                .extractor
                .run(&chunk.text)
                .await
                .context(format!("Failed to extract chunk {}", chunk.chunk_id))?;

            if let Some(connector) = &self.connector {
                text_units.extend(connector.connect(&mut chunk_graph, &chunk.text).await?);
            }

            graph.merge(chunk_graph);
            debug!(
                chunk = i + 1,
                total = chunks.len(),
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "Chunk merged"
            );
        }

        let (mut entities, relations) = self.finalize(&graph).await?;

        if let Some(aligner) = &self.aligner {
            aligner.run(&mut entities).await;
        }

        let stats = BuildStats {
            chunks: chunks.len(),
            entities: entities.len(),
            relations: relations.len(),
            text_units: text_units.len(),
            alias_links: entities.iter().map(|e| e.alias_refs.len()).sum(),
        };
        info!(
            chunks = stats.chunks,
            entities = stats.entities,
            relations = stats.relations,
            text_units = stats.text_units,
            alias_links = stats.alias_links,
            "Document graph built"
        );

        Ok((
            BuildOutput {
                entities,
                relations,
                text_units,
            },
            stats,
        ))
    }

    /// Flatten the document graph into records with sequential ids and one
    /// summarized, embedded description each.
    async fn finalize(&self, graph: &ExtractionGraph) -> Result<(Vec<Entity>, Vec<Relation>)> {
        let mut descriptions = Vec::with_capacity(graph.node_count());
        for (_, node) in graph.nodes() {
            descriptions.push(self.summarize(&node.name, None, &node.descriptions).await?);
        }
        let embeddings = self.embed_all(&descriptions, "entity descriptions").await?;

        // Nodes are never removed, so a node's index is its position
        let mut entities = Vec::with_capacity(graph.node_count());
        for (((idx, node), description), embedding) in
            graph.nodes().zip(descriptions).zip(embeddings)
        {
            entities.push(Entity {
                id: idx.index().to_string(),
                name: node.name.clone(),
                entity_type: (!node.entity_type.is_empty()).then(|| node.entity_type.clone()),
                description,
                embedding: Some(embedding),
                text_unit_refs: node.text_units.clone(),
                alias_refs: Default::default(),
            });
        }

        let mut descriptions = Vec::with_capacity(graph.edge_count());
        for (_, _, edge) in graph.edges() {
            descriptions.push(
                self.summarize(&edge.source, Some(&edge.target), &edge.descriptions)
                    .await?,
            );
        }
        let embeddings = self.embed_all(&descriptions, "relation descriptions").await?;

        let mut relations = Vec::with_capacity(graph.edge_count());
        for (((a, b, _), description), embedding) in
            graph.edges().zip(descriptions).zip(embeddings)
        {
            relations.push(Relation {
                id: relations.len().to_string(),
                source: a.index().to_string(),
                target: b.index().to_string(),
                description,
                embedding: Some(embedding),
            });
        }

        Ok((entities, relations))
    }

    /// One description per entity (`target == None`) or relation.
    async fn summarize(
        &self,
        source: &str,
        target: Option<&str>,
        descriptions: &[String],
    ) -> Result<String> {
        match descriptions {
            [] => Ok(String::new()),
            [only] => Ok(only.clone()),
            _ => {
                let request = match target {
                    None => prompt::build_entity_summary_prompt(source, descriptions),
                    Some(target) => {
                        prompt::build_relation_summary_prompt(source, target, descriptions)
                    }
                };
                single_turn(self.llm.as_ref(), &request)
                    .await
                    .context(format!("Failed to summarize descriptions of {}", source))
            }
        }
    }

    async fn embed_all(&self, texts: &[String], what: &str) -> Result<Vec<Vec<f32>>> {
        let embeddings = self
            .embedder
            .embed(texts)
            .await
            .context(format!("Failed to embed {}", what))?;
        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch for {}: {} texts, {} vectors",
                what,
                texts.len(),
                embeddings.len()
            );
        }
        Ok(embeddings)
    }

    /// Document text, optionally with pronouns resolved. A rewritten file is
    /// cached beside it as `<stem>_processed.txt`.
    async fn load_text(&self, doc_or_path: &str, replace_pronouns: bool) -> Result<String> {
        let path = Path::new(doc_or_path);

        let text = if !replace_pronouns {
            load_document(doc_or_path).await?
        } else if !path.is_file() {
            self.replace_pronouns(doc_or_path).await?
        } else {
            let processed = processed_path(path);
            if processed.is_file() {
                debug!(path = %processed.display(), "Reusing processed document");
                FileReader::read_file(&processed).await?
            } else {
                let raw = FileReader::read_file(path).await?;
                let text = self.replace_pronouns(&raw).await?;
                fs::write(&processed, &text)
                    .await
                    .context(format!("Failed to cache processed document: {:?}", processed))?;
                text
            }
        };

        Ok(normalize_text(&text))
    }

    async fn replace_pronouns(&self, text: &str) -> Result<String> {
        let mut rewritten = String::with_capacity(text.len());
        for block in char_blocks(text, PRONOUN_BLOCK_CHARS) {
            let reply = single_turn(self.llm.as_ref(), &prompt::build_pronoun_replacement_prompt(block))
                .await
                .context("Failed to replace pronouns")?;
            rewritten.push_str(&reply);
        }
        Ok(rewritten)
    }
}

fn processed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    path.with_file_name(format!("{}_processed.txt", stem))
}

/// Split `text` into pieces of at most `max_chars` characters.
fn char_blocks(text: &str, max_chars: usize) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % max_chars == 0 {
            blocks.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        blocks.push(&text[start..]);
    }
    blocks
}
