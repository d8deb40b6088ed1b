//! Entity/relation graph accumulated before finalization.
//!
//! Nodes are identified by `(name, type)`; edges by their unordered
//! endpoint pair. The same structure serves as the chunk-local extraction
//! graph and as the document graph that chunk graphs are merged into.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::debug;

use crate::schema::{EntityRecord, RelationRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub name: String,
    /// Empty for nodes inferred from a relation endpoint.
    pub entity_type: String,
}

impl NodeKey {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub name: String,
    pub entity_type: String,
    /// Descriptions in extraction order; summarized at finalization.
    pub descriptions: Vec<String>,
    /// Ids of text units mentioning this entity.
    pub text_units: Vec<String>,
}

impl GraphNode {
    fn new(key: NodeKey) -> Self {
        Self {
            name: key.name,
            entity_type: key.entity_type,
            descriptions: Vec::new(),
            text_units: Vec::new(),
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.name.clone(), self.entity_type.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    /// Endpoint names as first extracted, kept for description direction.
    pub source: String,
    pub target: String,
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionGraph {
    graph: UnGraph<GraphNode, GraphEdge>,
    keys: HashMap<NodeKey, NodeIndex>,
    /// First node inserted under each name; relation endpoints resolve here.
    by_name: HashMap<String, NodeIndex>,
}

impl ExtractionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn find(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.keys.get(key).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut GraphNode {
        &mut self.graph[idx]
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> + '_ {
        self.graph.node_indices().map(move |idx| (idx, &self.graph[idx]))
    }

    /// Edges in insertion order as `(endpoint, endpoint, edge)`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &GraphEdge)> + '_ {
        self.graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), edge.weight()))
    }

    pub fn edge_between(&self, a: NodeIndex, b: NodeIndex) -> Option<&GraphEdge> {
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }

    fn insert_node(&mut self, node: GraphNode) -> NodeIndex {
        let key = node.key();
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.keys.insert(key, idx);
        self.by_name.entry(name).or_insert(idx);
        idx
    }

    fn ensure_node(&mut self, key: NodeKey) -> NodeIndex {
        match self.keys.get(&key) {
            Some(&idx) => idx,
            None => self.insert_node(GraphNode::new(key)),
        }
    }

    /// Add an extracted entity; a repeated `(name, type)` only contributes
    /// its description.
    pub fn add_entity(&mut self, record: EntityRecord) -> NodeIndex {
        let key = NodeKey::new(record.name, record.entity_type.unwrap_or_default());
        let idx = self.ensure_node(key);
        if !record.description.is_empty() {
            self.graph[idx].descriptions.push(record.description);
        }
        idx
    }

    /// Add an extracted relation. Endpoints resolve by name to the first node
    /// carrying it; unknown names become inferred nodes with an empty type.
    pub fn add_relation(&mut self, record: RelationRecord) {
        let source = self.resolve_endpoint(&record.source);
        let target = self.resolve_endpoint(&record.target);

        let descriptions = if record.description.is_empty() {
            Vec::new()
        } else {
            vec![record.description]
        };
        self.upsert_edge(source, target, record.source, record.target, descriptions);
    }

    fn resolve_endpoint(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        debug!(entity = name, "Inferring node for relation endpoint");
        self.insert_node(GraphNode::new(NodeKey::new(name, "")))
    }

    fn upsert_edge(
        &mut self,
        a: NodeIndex,
        b: NodeIndex,
        source: String,
        target: String,
        descriptions: Vec<String>,
    ) {
        match self.graph.find_edge(a, b) {
            Some(edge) => self.graph[edge].descriptions.extend(descriptions),
            None => {
                self.graph.add_edge(
                    a,
                    b,
                    GraphEdge {
                        source,
                        target,
                        descriptions,
                    },
                );
            }
        }
    }

    /// Merge a chunk graph into this one.
    ///
    /// A chunk node joins an existing node iff name and type both match
    /// exactly; its descriptions and text unit ids are appended in order.
    /// Edges join by unordered endpoint pair and append their descriptions.
    /// The resulting node and edge sets do not depend on merge order.
    pub fn merge(&mut self, chunk: ExtractionGraph) {
        let (nodes, edges) = chunk.graph.into_nodes_edges();

        let mut mapping = Vec::with_capacity(nodes.len());
        for node in nodes {
            let node = node.weight;
            let idx = match self.keys.get(&node.key()) {
                Some(&idx) => {
                    let existing = &mut self.graph[idx];
                    existing.descriptions.extend(node.descriptions);
                    existing.text_units.extend(node.text_units);
                    idx
                }
                None => self.insert_node(node),
            };
            mapping.push(idx);
        }

        for edge in edges {
            let a = mapping[edge.source().index()];
            let b = mapping[edge.target().index()];
            let GraphEdge {
                source,
                target,
                descriptions,
            } = edge.weight;
            self.upsert_edge(a, b, source, target, descriptions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entity(name: &str, entity_type: &str, description: &str) -> EntityRecord {
        EntityRecord {
            name: name.to_string(),
            entity_type: Some(entity_type.to_string()),
            description: description.to_string(),
        }
    }

    fn relation(source: &str, target: &str, description: &str) -> RelationRecord {
        RelationRecord {
            source: source.to_string(),
            target: target.to_string(),
            description: description.to_string(),
        }
    }

    fn chunk_a() -> ExtractionGraph {
        let mut g = ExtractionGraph::new();
        g.add_entity(entity("Alice", "PERSON", "founder"));
        g.add_entity(entity("Acme", "ORGANIZATION", "a company"));
        g.add_relation(relation("Alice", "Acme", "Alice founded Acme"));
        g
    }

    fn chunk_b() -> ExtractionGraph {
        let mut g = ExtractionGraph::new();
        g.add_entity(entity("Acme", "ORGANIZATION", "makes anvils"));
        g.add_entity(entity("Alice", "ROBOT", "a robot"));
        g.add_relation(relation("Acme", "Alice", "Acme employs Alice"));
        g.add_relation(relation("Acme", "Bob", "Acme hired Bob"));
        g
    }

    type Shape = (BTreeSet<NodeKey>, BTreeSet<(NodeKey, NodeKey)>);

    fn shape(g: &ExtractionGraph) -> Shape {
        let nodes = g.nodes().map(|(_, n)| n.key()).collect();
        let edges = g
            .edges()
            .map(|(a, b, _)| {
                let (ka, kb) = (g.node(a).key(), g.node(b).key());
                if ka <= kb { (ka, kb) } else { (kb, ka) }
            })
            .collect();
        (nodes, edges)
    }

    #[test]
    fn test_same_name_and_type_is_one_node() {
        let mut g = ExtractionGraph::new();
        g.add_entity(entity("Acme", "ORGANIZATION", "first"));
        g.add_entity(entity("Acme", "ORGANIZATION", "second"));
        g.add_entity(entity("Acme", "PRODUCT", "third"));

        assert_eq!(g.node_count(), 2);
        let idx = g.find(&NodeKey::new("Acme", "ORGANIZATION")).unwrap();
        assert_eq!(g.node(idx).descriptions, vec!["first", "second"]);
    }

    #[test]
    fn test_relation_infers_missing_endpoint() {
        let mut g = ExtractionGraph::new();
        g.add_entity(entity("Acme", "ORGANIZATION", "a company"));
        g.add_relation(relation("Acme", "Bob", "hired"));

        let bob = g.find(&NodeKey::new("Bob", "")).unwrap();
        assert!(g.node(bob).descriptions.is_empty());
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_edges_are_unordered() {
        let mut g = chunk_a();
        g.add_relation(relation("Acme", "Alice", "Acme was founded by Alice"));

        assert_eq!(g.edge_count(), 1);
        let (a, b, edge) = g.edges().next().unwrap();
        assert_eq!(edge.descriptions.len(), 2);
        assert_eq!(edge.source, "Alice");
        assert!(g.edge_between(b, a).is_some());
    }

    #[test]
    fn test_merge_appends_descriptions() {
        let mut doc = ExtractionGraph::new();
        doc.merge(chunk_a());
        doc.merge(chunk_b());

        let acme = doc.find(&NodeKey::new("Acme", "ORGANIZATION")).unwrap();
        assert_eq!(doc.node(acme).descriptions, vec!["a company", "makes anvils"]);
        // Alice/ROBOT differs in type, so it is a separate node
        assert_eq!(doc.node_count(), 4);

        let alice = doc.find(&NodeKey::new("Alice", "PERSON")).unwrap();
        let edge = doc.edge_between(alice, acme).unwrap();
        assert_eq!(edge.descriptions, vec!["Alice founded Acme"]);
    }

    #[test]
    fn test_merge_appends_text_units() {
        let mut first = chunk_a();
        let alice = first.find(&NodeKey::new("Alice", "PERSON")).unwrap();
        first.node_mut(alice).text_units.push("tu-1".to_string());
        let mut second = chunk_a();
        second.node_mut(alice).text_units.push("tu-2".to_string());

        let mut doc = ExtractionGraph::new();
        doc.merge(first);
        doc.merge(second);

        let alice = doc.find(&NodeKey::new("Alice", "PERSON")).unwrap();
        assert_eq!(doc.node(alice).text_units, vec!["tu-1", "tu-2"]);
        assert_eq!(doc.edges().next().unwrap().2.descriptions.len(), 2);
    }

    #[test]
    fn test_merge_order_independent() {
        let mut ab = ExtractionGraph::new();
        ab.merge(chunk_a());
        ab.merge(chunk_b());

        let mut ba = ExtractionGraph::new();
        ba.merge(chunk_b());
        ba.merge(chunk_a());

        assert_eq!(shape(&ab), shape(&ba));
    }
}
