//! Entity alignment: staged clustering of entities that name the same thing.
//!
//! Each stage refines the groups left by the previous one. Members of a
//! final group list each other in `alias_refs`.

use anyhow::Result;
use extract::{LanguageModel, parse_llm_json, prompt, single_turn};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::Entity;
use crate::similarity::{similarity, to_matrix};

const NO_TYPE: &str = "None";

fn default_similarity_threshold() -> f32 {
    0.75
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AlignStage {
    /// Same declared type; untyped entities share one bucket.
    Type,
    /// Connected components of pairs whose embedding similarity exceeds
    /// `threshold`.
    Similarity {
        #[serde(default = "default_similarity_threshold")]
        threshold: f32,
    },
    /// Groups proposed by the language model from names and descriptions.
    Decision,
}

pub struct AlignmentPipeline {
    stages: Vec<AlignStage>,
    llm: Option<Arc<dyn LanguageModel>>,
}

impl AlignmentPipeline {
    pub fn new(stages: Vec<AlignStage>, llm: Option<Arc<dyn LanguageModel>>) -> Result<Self> {
        if llm.is_none() && stages.contains(&AlignStage::Decision) {
            anyhow::bail!("Decision alignment stage requires a language model");
        }
        Ok(Self { stages, llm })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Cluster `entities` and write symmetric `alias_refs`. Returns the number
    /// of final groups.
    pub async fn run(&self, entities: &mut [Entity]) -> usize {
        if self.stages.is_empty() {
            return 0;
        }

        let mut groups: Vec<Vec<usize>> = vec![(0..entities.len()).collect()];

        for stage in &self.stages {
            if groups.is_empty() {
                debug!("No groups left to align");
                break;
            }

            let mut next = Vec::new();
            for group in groups.iter().filter(|g| g.len() >= 2) {
                next.extend(self.cluster(stage, entities, group).await);
            }
            debug!(stage = ?stage, groups = next.len(), "Alignment stage finished");
            groups = next;
        }

        for group in &groups {
            let ids: Vec<String> = group.iter().map(|&i| entities[i].id.clone()).collect();
            for &member in group {
                let own = entities[member].id.clone();
                entities[member]
                    .alias_refs
                    .extend(ids.iter().filter(|id| **id != own).cloned());
            }
        }

        info!(groups = groups.len(), "Entity alignment complete");
        groups.len()
    }

    async fn cluster(&self, stage: &AlignStage, entities: &[Entity], group: &[usize]) -> Vec<Vec<usize>> {
        match stage {
            AlignStage::Type => type_clusters(entities, group),
            AlignStage::Similarity { threshold } => similarity_clusters(entities, group, *threshold),
            AlignStage::Decision => match &self.llm {
                Some(llm) => decision_clusters(llm.as_ref(), entities, group).await,
                None => Vec::new(),
            },
        }
    }
}

/// Buckets by type in first-seen order; singletons are dropped.
pub fn type_clusters(entities: &[Entity], group: &[usize]) -> Vec<Vec<usize>> {
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();

    for &i in group {
        let key = entities[i].entity_type.as_deref().unwrap_or(NO_TYPE);
        let slot = *position.entry(key).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(i);
    }

    buckets.retain(|b| b.len() > 1);
    buckets
}

/// Connected components (size >= 2) of the graph linking entities whose
/// cosine similarity is strictly above `threshold`. Entities without an
/// embedding never link.
pub fn similarity_clusters(entities: &[Entity], group: &[usize], threshold: f32) -> Vec<Vec<usize>> {
    let members: Vec<usize> = group
        .iter()
        .copied()
        .filter(|&i| entities[i].embedding.is_some())
        .collect();
    let vectors: Vec<Vec<f32>> = members
        .iter()
        .filter_map(|&i| entities[i].embedding.clone())
        .collect();

    let matrix = match to_matrix(&vectors) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Skipping similarity alignment for group");
            return Vec::new();
        }
    };
    let sims = similarity(matrix.view(), matrix.view());

    let mut components = UnionFind::<usize>::new(members.len());
    for a in 0..members.len() {
        for b in a + 1..members.len() {
            if sims[[a, b]] > threshold {
                components.union(a, b);
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut by_root: HashMap<usize, usize> = HashMap::new();
    for (local, &entity) in members.iter().enumerate() {
        let slot = *by_root.entry(components.find(local)).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[slot].push(entity);
    }

    clusters.retain(|c| c.len() > 1);
    clusters
}

/// Ask the model to group the entities. An unusable reply yields no groups.
pub async fn decision_clusters(
    llm: &dyn LanguageModel,
    entities: &[Entity],
    group: &[usize],
) -> Vec<Vec<usize>> {
    let listed: Vec<(String, String)> = group
        .iter()
        .map(|&i| (entities[i].name.clone(), entities[i].description.clone()))
        .collect();

    let reply = match single_turn(llm, &prompt::build_entity_alignment_prompt(&listed)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Alignment request failed, leaving group unaligned");
            return Vec::new();
        }
    };

    let sets: Vec<Vec<String>> = match parse_llm_json(&reply) {
        Ok(sets) => sets,
        Err(e) => {
            warn!(error = %e, "Malformed alignment reply, leaving group unaligned");
            return Vec::new();
        }
    };

    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for &i in group {
        by_name.entry(entities[i].name.as_str()).or_insert(i);
    }

    sets.iter()
        .filter_map(|names| {
            let mut cluster: Vec<usize> = Vec::new();
            for name in names {
                match by_name.get(name.as_str()) {
                    Some(&i) if !cluster.contains(&i) => cluster.push(i),
                    Some(_) => {}
                    None => debug!(entity = %name, "Alignment reply names unknown entity"),
                }
            }
            (cluster.len() > 1).then_some(cluster)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::ScriptedModel;

    fn entity(id: &str, name: &str, entity_type: Option<&str>, embedding: Option<Vec<f32>>) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: entity_type.map(str::to_string),
            description: format!("about {name}"),
            embedding,
            text_unit_refs: Vec::new(),
            alias_refs: Default::default(),
        }
    }

    fn aliases(e: &Entity) -> Vec<&str> {
        e.alias_refs.iter().map(String::as_str).collect()
    }

    fn assert_symmetric(entities: &[Entity]) {
        for e in entities {
            for alias in &e.alias_refs {
                let other = entities.iter().find(|f| &f.id == alias).unwrap();
                assert!(other.alias_refs.contains(&e.id));
            }
        }
    }

    #[test]
    fn test_type_clusters_drop_singletons() {
        let entities = vec![
            entity("0", "X", Some("PERSON"), None),
            entity("1", "Y", Some("PERSON"), None),
            entity("2", "Z", Some("ORG"), None),
        ];

        assert_eq!(type_clusters(&entities, &[0, 1, 2]), vec![vec![0, 1]]);
    }

    #[test]
    fn test_untyped_entities_share_bucket() {
        let entities = vec![
            entity("0", "X", None, None),
            entity("1", "Y", Some("PERSON"), None),
            entity("2", "Z", None, None),
        ];

        assert_eq!(type_clusters(&entities, &[0, 1, 2]), vec![vec![0, 2]]);
    }

    #[test]
    fn test_similarity_clusters_are_transitive() {
        let entities = vec![
            entity("0", "A", None, Some(vec![1.0, 0.0])),
            entity("1", "B", None, Some(vec![0.866, 0.5])),
            entity("2", "C", None, Some(vec![0.5, 0.866])),
            entity("3", "D", None, Some(vec![-1.0, 0.0])),
        ];

        // A~B and B~C pass 0.8, A~C (0.5) does not
        assert_eq!(similarity_clusters(&entities, &[0, 1, 2, 3], 0.8), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_similarity_threshold_is_strict() {
        let entities = vec![
            entity("0", "A", None, Some(vec![1.0, 0.0])),
            entity("1", "B", None, Some(vec![1.0, 0.0])),
            entity("2", "C", None, None),
        ];

        assert!(similarity_clusters(&entities, &[0, 1, 2], 1.0).is_empty());
        assert_eq!(similarity_clusters(&entities, &[0, 1, 2], 0.9), vec![vec![0, 1]]);
    }

    #[tokio::test]
    async fn test_pipeline_writes_symmetric_aliases() {
        let mut entities = vec![
            entity("0", "X", Some("PERSON"), None),
            entity("1", "Y", Some("PERSON"), None),
            entity("2", "Z", Some("ORG"), None),
            entity("3", "W", Some("PERSON"), None),
        ];
        let pipeline = AlignmentPipeline::new(vec![AlignStage::Type], None).unwrap();

        assert_eq!(pipeline.run(&mut entities).await, 1);
        assert_eq!(aliases(&entities[0]), vec!["1", "3"]);
        assert_eq!(aliases(&entities[3]), vec!["0", "1"]);
        assert!(entities[2].alias_refs.is_empty());
        assert_symmetric(&entities);
    }

    #[tokio::test]
    async fn test_stages_refine_groups() {
        let mut entities = vec![
            entity("0", "Acme", Some("ORG"), Some(vec![1.0, 0.0])),
            entity("1", "Acme Inc", Some("ORG"), Some(vec![0.99, 0.1])),
            entity("2", "Acme", Some("PERSON"), Some(vec![1.0, 0.0])),
            entity("3", "Globex", Some("ORG"), Some(vec![0.0, 1.0])),
        ];
        let pipeline = AlignmentPipeline::new(
            vec![AlignStage::Type, AlignStage::Similarity { threshold: 0.9 }],
            None,
        )
        .unwrap();

        pipeline.run(&mut entities).await;

        assert_eq!(aliases(&entities[0]), vec!["1"]);
        assert_eq!(aliases(&entities[1]), vec!["0"]);
        assert!(entities[2].alias_refs.is_empty());
        assert!(entities[3].alias_refs.is_empty());
    }

    #[tokio::test]
    async fn test_decision_stage() {
        let llm = Arc::new(ScriptedModel::new([
            r#"```json
[["NYC", "New York"], ["Paris"], ["Ghost", "NYC"]]
```"#,
        ]));
        let mut entities = vec![
            entity("0", "NYC", None, None),
            entity("1", "New York", None, None),
            entity("2", "Paris", None, None),
        ];
        let pipeline = AlignmentPipeline::new(vec![AlignStage::Decision], Some(llm.clone())).unwrap();

        pipeline.run(&mut entities).await;

        assert_eq!(aliases(&entities[0]), vec!["1"]);
        assert!(entities[2].alias_refs.is_empty());
        assert!(llm.prompts()[0].contains("- New York: about New York"));
        assert_symmetric(&entities);
    }

    #[tokio::test]
    async fn test_malformed_decision_leaves_entities_unaligned() {
        let llm = Arc::new(ScriptedModel::new(["I think they are all different."]));
        let mut entities = vec![
            entity("0", "NYC", None, None),
            entity("1", "New York", None, None),
        ];
        let pipeline = AlignmentPipeline::new(vec![AlignStage::Decision], Some(llm)).unwrap();

        assert_eq!(pipeline.run(&mut entities).await, 0);
        assert!(entities.iter().all(|e| e.alias_refs.is_empty()));
    }

    #[tokio::test]
    async fn test_empty_partition_stops_early() {
        let llm = Arc::new(ScriptedModel::new([r#"[["A", "B"]]"#]));
        let mut entities = vec![
            entity("0", "A", Some("PERSON"), None),
            entity("1", "B", Some("ORG"), None),
        ];
        let pipeline =
            AlignmentPipeline::new(vec![AlignStage::Type, AlignStage::Decision], Some(llm.clone()))
                .unwrap();

        pipeline.run(&mut entities).await;

        assert!(llm.prompts().is_empty());
        assert!(entities.iter().all(|e| e.alias_refs.is_empty()));
    }

    #[test]
    fn test_decision_without_model_is_rejected() {
        assert!(AlignmentPipeline::new(vec![AlignStage::Decision], None).is_err());
    }

    #[test]
    fn test_stage_config_parsing() {
        let stages: Vec<AlignStage> = serde_json::from_str(
            r#"[{"method": "type"}, {"method": "similarity"}, {"method": "decision"}]"#,
        )
        .unwrap();

        assert_eq!(
            stages,
            vec![
                AlignStage::Type,
                AlignStage::Similarity { threshold: 0.75 },
                AlignStage::Decision
            ]
        );
    }
}
