//! Links graph entities to the sentences that mention them.
//!
//! Each entity's mention sentences are packed into text units by
//! [`SpanPacker`]; identical packs are shared between entities, and all
//! units of one call are embedded in a single batch.

use anyhow::{Context, Result};
use extract::{ExtractionGraph, LanguageModel, parse_llm_json, prompt, single_turn};
use ingest::Tokenizer;
use petgraph::graph::NodeIndex;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embeddings::EmbeddingService;
use crate::model::TextUnit;
use crate::packer::{SpanGroup, SpanPacker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Token budget of one packed text unit.
    pub max_tokens: usize,
    pub ignore_case: bool,
    /// Sentences scored below this (0-10) are ignored. `None` skips scoring.
    pub score_threshold: Option<u8>,
    /// Pack contiguous mention sentences together; otherwise one unit per sentence.
    pub merge_sentences: bool,
    /// Give sentences without mentions to the entities of the nearest
    /// mention sentences on both sides.
    pub attach_orphan_sentences: bool,
    /// Registry name of the sentence splitter.
    pub tokenizer: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            ignore_case: true,
            score_threshold: None,
            merge_sentences: true,
            attach_orphan_sentences: true,
            tokenizer: ingest::UnicodeTokenizer::NAME.to_string(),
        }
    }
}

pub struct SentenceConnector {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn EmbeddingService>,
    tokenizer: Arc<dyn Tokenizer>,
    packer: SpanPacker,
    config: ConnectorConfig,
}

impl SentenceConnector {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingService>,
        tokenizer: Arc<dyn Tokenizer>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            tokenizer,
            packer: SpanPacker::new(config.max_tokens),
            config,
        }
    }

    /// Split `text` into sentences and connect the graph's entities to them.
    pub async fn connect(&self, graph: &mut ExtractionGraph, text: &str) -> Result<Vec<TextUnit>> {
        let sentences = self.tokenizer.split_sentences(text);
        self.connect_spans(graph, &sentences).await
    }

    /// Build text units over `sentences` and append their ids to the
    /// `text_units` of every entity they mention.
    pub async fn connect_spans(
        &self,
        graph: &mut ExtractionGraph,
        sentences: &[String],
    ) -> Result<Vec<TextUnit>> {
        if sentences.is_empty() || graph.is_empty() {
            return Ok(Vec::new());
        }

        let allowed = self.allowed_sentences(sentences).await;
        let mut mentions = self.find_mentions(graph, sentences, &allowed);

        if self.config.attach_orphan_sentences {
            attach_orphans(&mut mentions, sentences.len(), &allowed);
        }

        let token_counts: Vec<usize> = sentences
            .iter()
            .map(|s| self.tokenizer.count_tokens(s))
            .collect();

        let mut units: Vec<TextUnit> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for (node, spans) in mentions.iter_mut() {
            spans.sort_unstable();
            spans.dedup();

            let groups = if self.config.merge_sentences {
                self.packer.pack(spans, &token_counts)
            } else {
                spans.iter().map(|&i| SpanGroup { indices: vec![i] }).collect()
            };

            for group in groups {
                let slot = *by_key.entry(group.key()).or_insert_with(|| {
                    units.push(TextUnit {
                        id: uuid::Uuid::new_v4().to_string(),
                        content: group
                            .indices
                            .iter()
                            .map(|&i| sentences[i].as_str())
                            .collect::<Vec<_>>()
                            .join(" "),
                        embedding: None,
                    });
                    units.len() - 1
                });
                graph.node_mut(*node).text_units.push(units[slot].id.clone());
            }
        }

        let contents: Vec<String> = units.iter().map(|u| u.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&contents)
            .await
            .context("Failed to embed text units")?;
        if embeddings.len() != units.len() {
            anyhow::bail!(
                "Embedding count mismatch for text units: {} texts, {} vectors",
                units.len(),
                embeddings.len()
            );
        }
        for (unit, embedding) in units.iter_mut().zip(embeddings) {
            unit.embedding = Some(embedding);
        }

        debug!(
            sentences = sentences.len(),
            entities = mentions.len(),
            text_units = units.len(),
            "Chunk connected"
        );

        Ok(units)
    }

    /// Sentences that survive informativeness filtering.
    async fn allowed_sentences(&self, sentences: &[String]) -> Vec<bool> {
        let Some(threshold) = self.config.score_threshold else {
            return vec![true; sentences.len()];
        };

        match self.score_sentences(sentences).await {
            Some(scores) => scores.iter().map(|&s| s >= i64::from(threshold)).collect(),
            None => vec![true; sentences.len()],
        }
    }

    async fn score_sentences(&self, sentences: &[String]) -> Option<Vec<i64>> {
        let reply = match single_turn(
            self.llm.as_ref(),
            &prompt::build_sentence_evaluation_prompt(sentences),
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Sentence scoring failed, keeping all sentences");
                return None;
            }
        };

        match parse_llm_json::<Vec<i64>>(&reply) {
            Ok(scores) if scores.len() == sentences.len() => Some(scores),
            Ok(scores) => {
                warn!(
                    expected = sentences.len(),
                    received = scores.len(),
                    "Sentence score count mismatch, keeping all sentences"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Malformed sentence scores, keeping all sentences");
                None
            }
        }
    }

    /// Mention sentence indices per entity, in graph order.
    fn find_mentions(
        &self,
        graph: &ExtractionGraph,
        sentences: &[String],
        allowed: &[bool],
    ) -> Vec<(NodeIndex, Vec<usize>)> {
        graph
            .nodes()
            .map(|(idx, node)| {
                let spans = match mention_pattern(&node.name, self.config.ignore_case) {
                    Some(pattern) => sentences
                        .iter()
                        .enumerate()
                        .filter(|(i, sent)| allowed[*i] && pattern.is_match(sent))
                        .map(|(i, _)| i)
                        .collect(),
                    None => Vec::new(),
                };
                (idx, spans)
            })
            .collect()
    }
}

/// Whole-word pattern for an entity name, optionally followed by punctuation.
pub fn mention_pattern(name: &str, ignore_case: bool) -> Option<Regex> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    // `\b` only holds next to a word character
    let head = if name.starts_with(is_word) { r"\b" } else { "" };
    let tail = if name.ends_with(is_word) { r"\b" } else { "" };
    let pattern = format!("{head}{}{tail}[!.,?;:']*", regex::escape(name));

    match RegexBuilder::new(&pattern).case_insensitive(ignore_case).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(entity = name, error = %e, "Skipping entity with unusable name pattern");
            None
        }
    }
}

/// Give each run of mention-free sentences to the entities mentioned in the
/// nearest sentence before and after it. Filtered sentences are not attached.
fn attach_orphans(mentions: &mut [(NodeIndex, Vec<usize>)], sentence_count: usize, allowed: &[bool]) {
    let mut owners: Vec<Vec<usize>> = vec![Vec::new(); sentence_count];
    for (entity, (_, spans)) in mentions.iter().enumerate() {
        for &s in spans {
            owners[s].push(entity);
        }
    }

    let mut i = 0;
    while i < sentence_count {
        if !owners[i].is_empty() {
            i += 1;
            continue;
        }
        let start = i;
        while i < sentence_count && owners[i].is_empty() {
            i += 1;
        }

        let mut neighbours: Vec<usize> = Vec::new();
        if start > 0 {
            neighbours.extend(&owners[start - 1]);
        }
        if i < sentence_count {
            neighbours.extend(&owners[i]);
        }

        for k in (start..i).filter(|&k| allowed[k]) {
            for &entity in &neighbours {
                mentions[entity].1.push(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::FixedEmbedder;
    use extract::{EntityRecord, NodeKey, ScriptedModel};
    use ingest::UnicodeTokenizer;

    fn graph_of(names: &[&str]) -> ExtractionGraph {
        let mut graph = ExtractionGraph::new();
        for name in names {
            graph.add_entity(EntityRecord {
                name: name.to_string(),
                entity_type: Some("PERSON".to_string()),
                description: String::new(),
            });
        }
        graph
    }

    fn sentences(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    fn connector(
        llm: Arc<ScriptedModel>,
        embedder: Arc<FixedEmbedder>,
        config: ConnectorConfig,
    ) -> SentenceConnector {
        SentenceConnector::new(llm, embedder, Arc::new(UnicodeTokenizer), config)
    }

    fn refs(graph: &ExtractionGraph, name: &str) -> Vec<String> {
        let idx = graph.find(&NodeKey::new(name, "PERSON")).unwrap();
        graph.node(idx).text_units.clone()
    }

    fn plain() -> ConnectorConfig {
        ConnectorConfig {
            attach_orphan_sentences: false,
            ..ConnectorConfig::default()
        }
    }

    #[test]
    fn test_mention_pattern_whole_word() {
        let re = mention_pattern("Al", false).unwrap();
        assert!(re.is_match("Al went home."));
        assert!(re.is_match("I met Al!"));
        assert!(!re.is_match("Alice went home."));

        let re = mention_pattern("C++", true).unwrap();
        assert!(re.is_match("written in c++."));

        assert!(mention_pattern("  ", true).is_none());
    }

    #[tokio::test]
    async fn test_shared_span_runs_dedup() {
        let llm = Arc::new(ScriptedModel::default());
        let embedder = Arc::new(FixedEmbedder::new(4));
        let connector = connector(llm, embedder.clone(), plain());

        let mut graph = graph_of(&["Alice", "Bob", "Carol"]);
        let sents = sentences(&["Alice met Bob.", "Carol stayed home."]);

        let units = connector.connect_spans(&mut graph, &sents).await.unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(refs(&graph, "Alice"), refs(&graph, "Bob"));
        assert_eq!(refs(&graph, "Alice"), vec![units[0].id.clone()]);
        assert_eq!(refs(&graph, "Carol"), vec![units[1].id.clone()]);
        assert!(units.iter().all(|u| u.embedding.is_some()));
        // One embedding call for the whole chunk
        assert_eq!(embedder.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_contiguous_mentions_are_packed() {
        let llm = Arc::new(ScriptedModel::default());
        let embedder = Arc::new(FixedEmbedder::new(4));
        let connector = connector(llm, embedder, plain());

        let mut graph = graph_of(&["Alice", "Dave"]);
        let sents = sentences(&["Alice runs.", "Alice jumps.", "Nothing here.", "Alice sleeps."]);

        let units = connector.connect_spans(&mut graph, &sents).await.unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].content, "Alice runs. Alice jumps.");
        assert_eq!(units[1].content, "Alice sleeps.");
        assert!(refs(&graph, "Dave").is_empty());
    }

    #[tokio::test]
    async fn test_unmerged_sentences() {
        let llm = Arc::new(ScriptedModel::default());
        let embedder = Arc::new(FixedEmbedder::new(4));
        let config = ConnectorConfig {
            merge_sentences: false,
            ..plain()
        };
        let connector = connector(llm, embedder, config);

        let mut graph = graph_of(&["Alice"]);
        let sents = sentences(&["Alice runs.", "Alice jumps."]);

        let units = connector.connect_spans(&mut graph, &sents).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(refs(&graph, "Alice").len(), 2);
    }

    #[tokio::test]
    async fn test_case_sensitivity_is_configurable() {
        let sents = sentences(&["alice was here."]);

        let sensitive = ConnectorConfig {
            ignore_case: false,
            ..plain()
        };
        let c = connector(Arc::new(ScriptedModel::default()), Arc::new(FixedEmbedder::new(2)), sensitive);
        let mut graph = graph_of(&["Alice"]);
        assert!(c.connect_spans(&mut graph, &sents).await.unwrap().is_empty());

        let c = connector(Arc::new(ScriptedModel::default()), Arc::new(FixedEmbedder::new(2)), plain());
        let mut graph = graph_of(&["Alice"]);
        assert_eq!(c.connect_spans(&mut graph, &sents).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_score_filtering() {
        let llm = Arc::new(ScriptedModel::new(["[9, 1, 9]"]));
        let config = ConnectorConfig {
            score_threshold: Some(5),
            merge_sentences: false,
            ..plain()
        };
        let c = connector(llm.clone(), Arc::new(FixedEmbedder::new(2)), config);

        let mut graph = graph_of(&["Alice"]);
        let sents = sentences(&["Alice won.", "Alice yawned.", "Alice left."]);
        let units = c.connect_spans(&mut graph, &sents).await.unwrap();

        let contents: Vec<&str> = units.iter().map(|u| u.content.as_str()).collect();
        assert_eq!(contents, vec!["Alice won.", "Alice left."]);
        assert!(llm.prompts()[0].contains("1. Alice yawned."));
    }

    #[tokio::test]
    async fn test_mismatched_scores_disable_filtering() {
        let sents = sentences(&["Alice won.", "Alice yawned.", "Alice left."]);

        let config = ConnectorConfig {
            score_threshold: Some(5),
            ..plain()
        };
        let filtered = connector(
            Arc::new(ScriptedModel::new(["[9, 1]"])),
            Arc::new(FixedEmbedder::new(2)),
            config,
        );
        let mut graph = graph_of(&["Alice"]);
        let with_bad_scores = filtered.connect_spans(&mut graph, &sents).await.unwrap();

        let unfiltered = connector(
            Arc::new(ScriptedModel::default()),
            Arc::new(FixedEmbedder::new(2)),
            plain(),
        );
        let mut graph = graph_of(&["Alice"]);
        let without = unfiltered.connect_spans(&mut graph, &sents).await.unwrap();

        let a: Vec<&str> = with_bad_scores.iter().map(|u| u.content.as_str()).collect();
        let b: Vec<&str> = without.iter().map(|u| u.content.as_str()).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_orphan_sentences_attach_to_both_neighbours() {
        let config = ConnectorConfig {
            merge_sentences: false,
            ..ConnectorConfig::default()
        };
        let c = connector(Arc::new(ScriptedModel::default()), Arc::new(FixedEmbedder::new(2)), config);

        let mut graph = graph_of(&["Alice", "Bob"]);
        let sents = sentences(&["Alice arrived.", "It rained.", "Bob left."]);
        let units = c.connect_spans(&mut graph, &sents).await.unwrap();

        assert_eq!(units.len(), 3);
        let orphan = units.iter().find(|u| u.content == "It rained.").unwrap();
        assert!(refs(&graph, "Alice").contains(&orphan.id));
        assert!(refs(&graph, "Bob").contains(&orphan.id));
        assert_eq!(refs(&graph, "Alice").len(), 2);
    }

    /// Returns a single vector whatever the batch size.
    struct OneVectorEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingService for OneVectorEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]])
        }
    }

    #[tokio::test]
    async fn test_short_embedding_batch_is_an_error() {
        let connector = SentenceConnector::new(
            Arc::new(ScriptedModel::default()),
            Arc::new(OneVectorEmbedder),
            Arc::new(UnicodeTokenizer),
            ConnectorConfig {
                merge_sentences: false,
                ..plain()
            },
        );
        let mut graph = graph_of(&["Alice"]);
        let sents = sentences(&["Alice runs.", "Alice jumps."]);

        let err = connector.connect_spans(&mut graph, &sents).await.unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let c = connector(Arc::new(ScriptedModel::default()), Arc::new(FixedEmbedder::new(2)), plain());
        let mut graph = graph_of(&["Alice"]);
        assert!(c.connect(&mut graph, "").await.unwrap().is_empty());
    }
}
