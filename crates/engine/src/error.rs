//! Engine error types

use lineage_core::{BatchId, NodeId, ValidationError};
use thiserror::Error;

/// Why a traversal stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    /// Visited more nodes than the configured budget
    Visits,
    /// The caller's deadline elapsed
    Deadline,
}

impl std::fmt::Display for LimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitReason::Visits => f.write_str("visit budget"),
            LimitReason::Deadline => f.write_str("deadline"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Batch rejected, record {index}: {source}")]
    Validation {
        index: usize,
        #[source]
        source: ValidationError,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Traversal limit exceeded ({reason}) after visiting {visited} nodes")]
    TraversalLimitExceeded { visited: usize, reason: LimitReason },

    #[error("Traversal cancelled after visiting {visited} nodes")]
    Cancelled { visited: usize },

    #[error("Unknown batch: {0}")]
    UnknownBatch(BatchId),

    #[error("Store error: {0}")]
    Store(#[from] lineage_store::StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
