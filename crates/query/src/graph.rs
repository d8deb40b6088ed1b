use index::{Entity, Relation};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Read-only graph over persisted entities and relations.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: UnGraph<Entity, Relation>,
    ids: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    /// Relations naming an unknown entity are skipped; a repeated endpoint
    /// pair keeps the last relation.
    pub fn new(entities: Vec<Entity>, relations: Vec<Relation>) -> Self {
        let mut graph = UnGraph::with_capacity(entities.len(), relations.len());
        let mut ids = HashMap::with_capacity(entities.len());

        for entity in entities {
            let id = entity.id.clone();
            let idx = graph.add_node(entity);
            ids.entry(id).or_insert(idx);
        }

        for relation in relations {
            match (ids.get(&relation.source), ids.get(&relation.target)) {
                (Some(&a), Some(&b)) => {
                    graph.update_edge(a, b, relation);
                }
                _ => warn!(
                    relation = %relation.id,
                    source = %relation.source,
                    target = %relation.target,
                    "Skipping relation with unknown endpoint"
                ),
            }
        }

        Self { graph, ids }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.index_of(id).map(|idx| &self.graph[idx])
    }

    pub fn entity_at(&self, idx: NodeIndex) -> &Entity {
        &self.graph[idx]
    }

    /// Entities in load order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.graph.node_weights()
    }

    /// Neighbours of `idx` with the connecting relation, by ascending
    /// neighbour index.
    pub fn neighbors(&self, idx: NodeIndex) -> Vec<(NodeIndex, &Relation)> {
        let mut neighbors: Vec<(NodeIndex, &Relation)> = self
            .graph
            .edges(idx)
            .map(|edge| {
                let other = if edge.source() == idx { edge.target() } else { edge.source() };
                (other, edge.weight())
            })
            .collect();
        neighbors.sort_by_key(|(other, _)| *other);
        neighbors
    }

    /// Induced subgraph over `nodes`, keeping their order.
    pub fn induced(&self, nodes: &[NodeIndex]) -> Subgraph {
        let members: std::collections::HashSet<NodeIndex> = nodes.iter().copied().collect();
        let relations = self
            .graph
            .edge_references()
            .filter(|e| members.contains(&e.source()) && members.contains(&e.target()))
            .map(|e| e.weight().clone())
            .collect();

        Subgraph {
            entities: nodes.iter().map(|&idx| self.graph[idx].clone()).collect(),
            relations,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    /// In discovery order.
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Subgraph {
    pub fn contains(&self, id: &str) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    pub fn entity_ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }
}
