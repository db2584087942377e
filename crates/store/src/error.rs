//! Graph store error types

use lineage_core::{EdgeId, NodeId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Dangling reference: edge {edge} points at missing node {missing}")]
    DanglingReference { edge: EdgeId, missing: NodeId },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Store capacity exceeded: limit of {limit} nodes reached")]
    CapacityExceeded { limit: usize },

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("Schema initialization failed: {0}")]
    SchemaInit(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
