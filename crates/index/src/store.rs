//! JSON Lines persistence for the three knowledge-graph tables.
//!
//! ```text
//! <output>/
//! ├── entities.jsonl
//! ├── relations.jsonl
//! └── text_units.jsonl
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::model::BuildOutput;

pub const ENTITIES_TABLE: &str = "entities.jsonl";
pub const RELATIONS_TABLE: &str = "relations.jsonl";
pub const TEXT_UNITS_TABLE: &str = "text_units.jsonl";

#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, output: &BuildOutput) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .context(format!("Failed to create output directory: {:?}", self.dir))?;

        write_table(&self.dir.join(ENTITIES_TABLE), &output.entities).await?;
        write_table(&self.dir.join(RELATIONS_TABLE), &output.relations).await?;
        write_table(&self.dir.join(TEXT_UNITS_TABLE), &output.text_units).await?;

        info!(
            dir = %self.dir.display(),
            entities = output.entities.len(),
            relations = output.relations.len(),
            text_units = output.text_units.len(),
            "Tables saved"
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<BuildOutput> {
        Ok(BuildOutput {
            entities: read_table(&self.dir.join(ENTITIES_TABLE)).await?,
            relations: read_table(&self.dir.join(RELATIONS_TABLE)).await?,
            text_units: read_table(&self.dir.join(TEXT_UNITS_TABLE)).await?,
        })
    }
}

async fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut body = String::new();
    for row in rows {
        body.push_str(&serde_json::to_string(row).context("Failed to serialize row")?);
        body.push('\n');
    }
    fs::write(path, body)
        .await
        .context(format!("Failed to write table: {:?}", path))
}

async fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)
        .await
        .context(format!("Failed to read table: {:?}", path))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).context(format!("Invalid row {} in {:?}", n + 1, path))
        })
        .collect()
}
