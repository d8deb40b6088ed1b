pub mod engine;
pub mod graph;
pub mod retriever;

pub use engine::{QueryConfig, QueryEngine, QueryResult, QueryTrace};
pub use graph::{KnowledgeGraph, Subgraph};
pub use retriever::{expand, retrieve_entities, retrieve_text_units};
