//! Common test utilities

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use lineage_core::{EdgeRecord, ExtractionBatch, NodeId, NodeKind, NodeRecord, Relationship};
use lineage_engine::{EngineConfig, IngestionMerger, QueryApi};
use lineage_store::{MemoryGraphStore, SharedGraph};

pub type Merger = IngestionMerger<MemoryGraphStore>;
pub type Api = QueryApi<MemoryGraphStore>;

/// Merger and query API sharing one fresh in-memory graph
pub fn create_engine() -> (Merger, Api) {
    create_engine_with(EngineConfig::default())
}

pub fn create_engine_with(config: EngineConfig) -> (Merger, Api) {
    let graph = SharedGraph::new(MemoryGraphStore::new());
    let merger = IngestionMerger::new(graph.clone(), config.clone());
    (merger, QueryApi::new(graph, config))
}

pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
}

pub fn table(name: &str) -> NodeRecord {
    NodeRecord::new(NodeKind::Dataset, "mssql", name, name).unwrap()
}

pub fn id(name: &str) -> NodeId {
    table(name).node_id()
}

pub fn derives(from: &str, to: &str) -> EdgeRecord {
    EdgeRecord::new(id(from), id(to), Relationship::DerivesFrom, "test").unwrap()
}

pub fn batch(run: &str, at: DateTime<Utc>) -> ExtractionBatch {
    ExtractionBatch::new("test", run, at).unwrap()
}

/// Batch declaring every named table plus `from -> to` edges
pub fn graph_batch(run: &str, nodes: &[&str], edges: &[(&str, &str)]) -> ExtractionBatch {
    let mut batch = batch(run, day(1));
    for name in nodes {
        batch = batch.with_node(table(name));
    }
    for (from, to) in edges {
        batch = batch.with_edge(derives(from, to));
    }
    batch
}
