//! Core domain types for the lineage graph engine
//!
//! This crate defines the metadata record model produced by extractors
//! (node and edge records, extraction batches) and the committed node and
//! edge shapes stored in the graph.

pub mod batch;
pub mod edge;
pub mod error;
pub mod jsonl;
pub mod node;
pub mod record;

pub use batch::{BatchId, ExtractionBatch, Extractor, MergeLogEntry, Observation, Record};
pub use edge::{ColumnMapping, Confidence, Edge, EdgeId, Relationship};
pub use error::{CoreError, RecordShape, Result, ValidationError};
pub use jsonl::JsonLinesExtractor;
pub use node::{reserved, Node, NodeId, NodeKind};
pub use record::{EdgeRecord, NodeRecord};
