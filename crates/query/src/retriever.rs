//! Query-time lookup: seed entities, subgraph expansion, and supporting text.

use anyhow::{Context, Result};
use index::{EmbeddingService, SimilarityIndex, TextUnit, cosine_similarity, similarity};
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

use crate::graph::{KnowledgeGraph, Subgraph};

/// Grow `seeds` into the subgraph relevant to a query.
///
/// Breadth-first from the seeds: a neighbour joins when the query is more
/// similar than `edge_threshold` (strictly) to the connecting relation's
/// embedding; aliases always join. The result is the induced subgraph over
/// every visited entity. Unknown seed or alias ids are skipped.
pub fn expand(
    query_embedding: &[f32],
    graph: &KnowledgeGraph,
    seeds: &[String],
    edge_threshold: f32,
) -> Subgraph {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut order: Vec<NodeIndex> = Vec::new();
    let mut worklist: VecDeque<NodeIndex> = VecDeque::new();

    let mut visit = |idx: NodeIndex, worklist: &mut VecDeque<NodeIndex>| {
        if visited.insert(idx) {
            order.push(idx);
            worklist.push_back(idx);
        }
    };

    for seed in seeds {
        match graph.index_of(seed) {
            Some(idx) => visit(idx, &mut worklist),
            None => warn!(entity = %seed, "Skipping unknown seed entity"),
        }
    }

    while let Some(u) = worklist.pop_front() {
        for (v, relation) in graph.neighbors(u) {
            let Some(embedding) = relation.embedding.as_deref() else {
                continue;
            };
            if cosine_similarity(query_embedding, embedding) > edge_threshold {
                visit(v, &mut worklist);
            }
        }

        for alias in &graph.entity_at(u).alias_refs {
            match graph.index_of(alias) {
                Some(idx) => visit(idx, &mut worklist),
                None => debug!(alias = %alias, "Alias not in graph"),
            }
        }
    }

    debug!(seeds = seeds.len(), visited = order.len(), "Subgraph expanded");
    graph.induced(&order)
}

/// Entity ids for names mentioned in a query.
///
/// Names matching an entity exactly (case folded when `ignore_case`) map to
/// it directly; the rest are embedded in one call and contribute their
/// `top_k` most similar entities. Ids are unique, in first-seen order.
pub async fn retrieve_entities(
    embedder: &dyn EmbeddingService,
    graph: &KnowledgeGraph,
    names: &[String],
    top_k: usize,
    ignore_case: bool,
) -> Result<Vec<String>> {
    let fold = |s: &str| if ignore_case { s.to_lowercase() } else { s.to_string() };

    let mut by_name: HashMap<String, &str> = HashMap::new();
    for entity in graph.entities() {
        by_name.entry(fold(&entity.name)).or_insert(entity.id.as_str());
    }

    let mut ids: Vec<String> = Vec::new();
    let mut remains: Vec<String> = Vec::new();
    for name in names {
        match by_name.get(&fold(name)) {
            Some(id) => push_unique(&mut ids, id),
            None => remains.push(name.clone()),
        }
    }

    if remains.is_empty() || top_k == 0 {
        return Ok(ids);
    }

    let candidates: Vec<(&str, Vec<f32>)> = graph
        .entities()
        .filter_map(|e| e.embedding.clone().map(|v| (e.id.as_str(), v)))
        .collect();
    if candidates.is_empty() {
        return Ok(ids);
    }

    let vectors: Vec<Vec<f32>> = candidates.iter().map(|(_, v)| v.clone()).collect();
    let index = SimilarityIndex::new(&vectors).context("Failed to index entity embeddings")?;
    let queries = embedder
        .embed(&remains)
        .await
        .context("Failed to embed query entities")?;

    let found = index.search(&queries, Some(top_k), None)?;
    for row in found.indices {
        for i in row {
            push_unique(&mut ids, candidates[i].0);
        }
    }

    Ok(ids)
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// For each query, the contents of the units whose similarity is strictly
/// above `threshold`, in unit order. Units without an embedding never match.
pub async fn retrieve_text_units(
    embedder: &dyn EmbeddingService,
    queries: &[String],
    units: &[&TextUnit],
    threshold: f32,
) -> Result<Vec<Vec<String>>> {
    let embedded: Vec<(&TextUnit, Vec<f32>)> = units
        .iter()
        .filter_map(|u| u.embedding.clone().map(|v| (*u, v)))
        .collect();
    if queries.is_empty() || embedded.is_empty() {
        return Ok(vec![Vec::new(); queries.len()]);
    }

    let query_vectors = embedder
        .embed(queries)
        .await
        .context("Failed to embed attribute queries")?;

    let x = index::similarity::to_matrix(&query_vectors)?;
    let y = index::similarity::to_matrix(
        &embedded.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
    )?;
    if x.ncols() != y.ncols() {
        anyhow::bail!("Query and text unit embeddings differ in dimension");
    }
    let sims = similarity(x.view(), y.view());

    Ok(sims
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .zip(&embedded)
                .filter(|(score, _)| **score > threshold)
                .map(|(_, (unit, _))| unit.content.clone())
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::{Entity, FixedEmbedder, Relation};

    fn entity(id: &str, name: &str, aliases: &[&str]) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: None,
            description: String::new(),
            embedding: None,
            text_unit_refs: Vec::new(),
            alias_refs: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn relation(id: &str, source: &str, target: &str, embedding: Vec<f32>) -> Relation {
        Relation {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            description: String::new(),
            embedding: Some(embedding),
        }
    }

    /// Unit vector whose cosine with `[1, 0]` is `cos`.
    fn at(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn abc() -> KnowledgeGraph {
        KnowledgeGraph::new(
            vec![entity("A", "A", &[]), entity("B", "B", &[]), entity("C", "C", &[])],
            vec![
                relation("0", "A", "B", at(0.9)),
                relation("1", "B", "C", at(0.2)),
            ],
        )
    }

    fn ids(subgraph: &Subgraph) -> Vec<&str> {
        subgraph.entity_ids()
    }

    #[test]
    fn test_expand_filters_by_edge_similarity() {
        let subgraph = expand(&[1.0, 0.0], &abc(), &["A".to_string()], 0.5);

        assert_eq!(ids(&subgraph), vec!["A", "B"]);
        assert_eq!(subgraph.relations.len(), 1);
        assert_eq!(subgraph.relations[0].id, "0");
    }

    #[test]
    fn test_expand_threshold_is_strict() {
        let graph = KnowledgeGraph::new(
            vec![entity("A", "A", &[]), entity("B", "B", &[])],
            vec![relation("0", "A", "B", vec![1.0, 0.0])],
        );
        assert_eq!(ids(&expand(&[1.0, 0.0], &graph, &["A".to_string()], 1.0)), vec!["A"]);
    }

    #[test]
    fn test_expand_follows_aliases() {
        let graph = KnowledgeGraph::new(
            vec![
                entity("A", "A", &["C", "missing"]),
                entity("B", "B", &[]),
                entity("C", "C", &["A"]),
            ],
            vec![relation("0", "B", "C", at(0.95))],
        );

        let subgraph = expand(&[1.0, 0.0], &graph, &["A".to_string()], 0.9);
        assert_eq!(ids(&subgraph), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_expand_returns_induced_subgraph() {
        // A-B and A-C pass, B-C does not but both ends are visited
        let graph = KnowledgeGraph::new(
            vec![entity("A", "A", &[]), entity("B", "B", &[]), entity("C", "C", &[])],
            vec![
                relation("0", "A", "B", at(0.9)),
                relation("1", "A", "C", at(0.9)),
                relation("2", "B", "C", at(0.1)),
            ],
        );

        let subgraph = expand(&[1.0, 0.0], &graph, &["A".to_string()], 0.5);
        assert_eq!(subgraph.entities.len(), 3);
        assert_eq!(subgraph.relations.len(), 3);
    }

    #[test]
    fn test_expand_is_monotonic_in_threshold() {
        let graph = KnowledgeGraph::new(
            (0..6).map(|i| entity(&i.to_string(), "n", &[])).collect(),
            vec![
                relation("a", "0", "1", at(0.8)),
                relation("b", "1", "2", at(0.3)),
                relation("c", "0", "3", at(0.6)),
                relation("d", "3", "4", at(0.95)),
                relation("e", "4", "5", at(-0.5)),
                relation("f", "2", "5", at(0.7)),
            ],
        );
        let seeds = vec!["0".to_string()];

        let mut previous = usize::MAX;
        for step in -10..=10 {
            let threshold = step as f32 / 10.0;
            let size = expand(&[1.0, 0.0], &graph, &seeds, threshold).entities.len();
            assert!(size <= previous, "threshold {threshold} grew the subgraph");
            previous = size;
        }
    }

    #[test]
    fn test_expand_skips_unknown_seeds() {
        let subgraph = expand(&[1.0, 0.0], &abc(), &["Z".to_string()], 0.0);
        assert!(subgraph.entities.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_entities_exact_then_similar() {
        let mut a = entity("0", "Alice", &[]);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = entity("1", "Bob", &[]);
        b.embedding = Some(vec![0.0, 1.0]);
        let graph = KnowledgeGraph::new(vec![a, b], Vec::new());

        let embedder = FixedEmbedder::new(2).with("Robert", vec![0.1, 1.0]);
        let names = vec!["alice".to_string(), "Robert".to_string()];

        let found = retrieve_entities(&embedder, &graph, &names, 1, true).await.unwrap();
        assert_eq!(found, vec!["0", "1"]);

        // Case-sensitive lookup sends "alice" to similarity search too
        let found = retrieve_entities(&embedder, &graph, &names, 1, false).await.unwrap();
        assert_eq!(embedder.batches().last().unwrap().len(), 2);
        assert!(found.contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn test_retrieve_text_units_strictly_above_threshold() {
        let units = vec![
            TextUnit { id: "t0".into(), content: "match".into(), embedding: Some(vec![1.0, 0.0]) },
            TextUnit { id: "t1".into(), content: "below".into(), embedding: Some(at(0.4)) },
            TextUnit { id: "t2".into(), content: "none".into(), embedding: None },
        ];
        let refs: Vec<&TextUnit> = units.iter().collect();
        let embedder = FixedEmbedder::new(2).with("Alice: age", vec![1.0, 0.0]);

        let found = retrieve_text_units(&embedder, &["Alice: age".to_string()], &refs, 0.5)
            .await
            .unwrap();
        assert_eq!(found, vec![vec!["match".to_string()]]);
    }
}
