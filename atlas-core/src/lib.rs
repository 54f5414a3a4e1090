//! Atlas core library: ingestion, graph store, queries, clustering and
//! context selection.
//!
//! [`ingest::IngestionPipeline`] turns a source tree into a new generation in
//! a [`store::GraphStore`]. [`query::QueryEngine`], [`cluster::ClusterEngine`]
//! and [`context::ContextSelector`] read one captured generation each.

pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod progress;
pub mod query;
pub mod store;
pub mod types;
