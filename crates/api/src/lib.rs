//! Configuration, wiring and HTTP surface of the GraphRAG binary.
//!
//! Programs embedding the pipeline build [`services::Services`] themselves,
//! e.g. to register NER models before serving.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod server;
pub mod services;
