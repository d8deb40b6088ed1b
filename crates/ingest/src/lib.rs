pub mod chunk;
pub mod chunker;
pub mod reader;
pub mod registry;
pub mod tokenizer;

pub use chunk::Chunk;
pub use chunker::{ChunkerConfig, TokenTextSplitter};
pub use reader::{FileReader, normalize_text};
pub use registry::ModelRegistry;
pub use tokenizer::{Tokenizer, UnicodeTokenizer};

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Generate a stable document ID from file path (or raw text)
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Source text of a document: the file contents when `doc_or_path` names an
/// existing file, otherwise the argument itself.
pub async fn load_document(doc_or_path: &str) -> Result<String> {
    let path = Path::new(doc_or_path);
    if path.is_file() {
        FileReader::read_file(path).await
    } else {
        Ok(doc_or_path.to_string())
    }
}
