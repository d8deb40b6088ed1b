use serde::{Deserialize, Serialize};

/// An entity as reported by an extractor, before it joins any graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: String,
}

/// Span found by a named-entity recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedEntity {
    pub text: String,
    pub label: String,
}
