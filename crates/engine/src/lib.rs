//! Lineage engine
//!
//! This crate contains the write and read sides over a shared graph:
//! - Merger: applies extraction batches and retracts them
//! - Calculator: upstream/downstream walks, impact, cycles, shortest paths
//! - API: status-bearing query responses for callers and caches

pub mod api;
pub mod calculator;
pub mod config;
pub mod error;
pub mod merger;

pub use api::{
    GraphStats, ImpactView, ImpactedNode, LineageEntry, NodeSummary, QueryApi, QueryPayload, QueryRequest,
    QueryResponse, QueryStatus,
};
pub use calculator::{
    CancellationToken, CycleFinding, ImpactEntry, ImpactReport, LineageCalculator, LineagePath, Traversal,
    TraversalBudget, TraversalStep,
};
pub use config::EngineConfig;
pub use error::{EngineError, LimitReason, Result};
pub use merger::{IngestionMerger, MergeReport, RetractionReport, SkipReason, SkippedEdge};
