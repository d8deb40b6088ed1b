use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A finalized knowledge-graph entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub description: String,
    pub embedding: Option<Vec<f32>>,
    /// Text units mentioning this entity, in connection order.
    #[serde(default)]
    pub text_unit_refs: Vec<String>,
    /// Ids of entities judged to be the same real-world entity.
    #[serde(default)]
    pub alias_refs: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source: String,
    pub target: String,
    pub description: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

/// Everything one document build produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub text_units: Vec<TextUnit>,
}
