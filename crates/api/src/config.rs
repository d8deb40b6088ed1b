use anyhow::{Context, Result};
use extract::RetryPolicy;
use index::{AlignStage, ConnectorConfig};
use ingest::{ChunkerConfig, UnicodeTokenizer};
use query::QueryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration. Every section may be omitted from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retry: RetryConfig,
    pub splitter: SplitterConfig,
    pub entity_types: Vec<String>,
    pub entity_extractors: Vec<EntityExtractorConfig>,
    pub relation_extractors: Vec<RelationExtractorConfig>,
    /// Text units are only built when this section is present.
    pub connector: Option<ConnectorConfig>,
    /// Alignment stages in order; empty disables alignment.
    pub align: Vec<AlignStage>,
    pub query: QueryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub tokenizer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "extractor", rename_all = "lowercase")]
pub enum EntityExtractorConfig {
    Llm {
        #[serde(default = "default_gleanings")]
        max_gleanings: usize,
    },
    Ner {
        model: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "extractor", rename_all = "lowercase")]
pub enum RelationExtractorConfig {
    Llm {
        #[serde(default = "default_gleanings")]
        max_gleanings: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

fn default_gleanings() -> usize {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            retry: RetryConfig::default(),
            splitter: SplitterConfig::default(),
            entity_types: extract::default_entity_types(),
            entity_extractors: vec![EntityExtractorConfig::Llm { max_gleanings: 1 }],
            relation_extractors: vec![RelationExtractorConfig::Llm { max_gleanings: 1 }],
            connector: None,
            align: Vec::new(),
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.1,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for SplitterConfig {
    fn default() -> Self {
        let chunker = ChunkerConfig::default();
        Self {
            chunk_size: chunker.chunk_size,
            overlap: chunker.overlap,
            tokenizer: UnicodeTokenizer::NAME.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

impl SplitterConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }
}

impl AppConfig {
    /// Read a TOML config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&raw).context(format!("Invalid config file: {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.splitter.chunk_size, 1200);
        assert_eq!(config.entity_types.len(), 5);
        assert!(config.connector.is_none());
        assert!(config.align.is_empty());
        assert_eq!(config.query.entity_top_k, 3);
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml(
            r#"
entity_types = ["PERSON", "LOCATION"]

[llm]
model = "qwen2"

[splitter]
chunk_size = 600
overlap = 50

[[entity_extractors]]
extractor = "llm"
max_gleanings = 2

[[entity_extractors]]
extractor = "ner"
model = "en_core_web_sm"

[[relation_extractors]]
extractor = "llm"

[connector]
max_tokens = 128
ignore_case = false
score_threshold = 4

[[align]]
method = "type"

[[align]]
method = "similarity"
threshold = 0.9

[[align]]
method = "decision"

[query]
edge_threshold = 0.3
"#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "qwen2");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.splitter.overlap, 50);
        assert_eq!(
            config.entity_extractors,
            vec![
                EntityExtractorConfig::Llm { max_gleanings: 2 },
                EntityExtractorConfig::Ner { model: "en_core_web_sm".to_string() },
            ]
        );
        assert_eq!(
            config.relation_extractors,
            vec![RelationExtractorConfig::Llm { max_gleanings: 1 }]
        );

        let connector = config.connector.unwrap();
        assert_eq!(connector.max_tokens, 128);
        assert_eq!(connector.score_threshold, Some(4));
        assert!(connector.merge_sentences);

        assert_eq!(config.align.len(), 3);
        assert_eq!(config.align[1], AlignStage::Similarity { threshold: 0.9 });
        assert_eq!(config.query.edge_threshold, 0.3);
        assert_eq!(config.query.text_threshold, 0.5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/graphrag.toml"))).is_err());
        assert!(AppConfig::load(None).is_ok());
    }
}
