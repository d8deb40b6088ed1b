pub mod align;
pub mod builder;
pub mod connector;
pub mod embeddings;
pub mod model;
pub mod packer;
pub mod similarity;
pub mod store;

pub use align::{AlignStage, AlignmentPipeline};
pub use builder::{BuildStats, GraphBuilder};
pub use connector::{ConnectorConfig, SentenceConnector};
pub use embeddings::{EmbeddingService, FixedEmbedder, OllamaEmbedder};
pub use model::{BuildOutput, Entity, Relation, TextUnit};
pub use packer::{SpanGroup, SpanPacker};
pub use similarity::{Retrieval, SimilarityIndex, cosine_similarity, retrieve, similarity};
pub use store::TableStore;
