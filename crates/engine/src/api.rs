//! Query/Impact API - status-bearing responses over a shared graph
//!
//! Every call takes one read guard for its whole duration, so a response
//! always reflects a single committed graph version.

use crate::calculator::{CancellationToken, CycleFinding, LineageCalculator, LineagePath, TraversalBudget};
use crate::{EngineConfig, EngineError, Result};
use lineage_core::{reserved, EdgeId, Node, NodeId, NodeKind, Relationship};
use lineage_store::{GraphStore, SharedGraph, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One query, usable as a cache key together with the graph version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueryRequest {
    Upstream { node: NodeId, depth: Option<usize> },
    Downstream { node: NodeId, depth: Option<usize> },
    Impact { node: NodeId },
    Cycles,
    Path { from: NodeId, to: NodeId },
    Lookup { name: String },
    Stats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    NotFound,
    LimitExceeded,
    CycleFound,
    Cancelled,
}

/// Compact node view used in responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub source_system: String,
    pub path: String,
    /// Owning team or person, when the extractor recorded one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            source_system: node.source_system.clone(),
            path: node.path.clone(),
            owner: node.property_str(reserved::OWNER).map(str::to_string),
            stale: node.stale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineageEntry {
    pub node: NodeSummary,
    pub depth: usize,
    pub via_edge: EdgeId,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImpactedNode {
    pub node: NodeSummary,
    pub distance: usize,
    pub score: f64,
    pub shortest_paths: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImpactView {
    pub root: NodeSummary,
    pub affected: Vec<ImpactedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub version: u64,
    pub nodes: usize,
    pub edges: usize,
    pub datasets: usize,
    pub columns: usize,
    pub processes: usize,
    pub stale_nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum QueryPayload {
    Lineage(Vec<LineageEntry>),
    Impact(ImpactView),
    Cycles(Vec<CycleFinding>),
    Path(Option<LineagePath>),
    Nodes(Vec<NodeSummary>),
    Stats(GraphStats),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<QueryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QueryResponse {
    pub fn ok(payload: QueryPayload) -> Self {
        Self {
            status: QueryStatus::Ok,
            payload: Some(payload),
            message: None,
        }
    }

    fn failed(status: QueryStatus, message: String) -> Self {
        Self {
            status,
            payload: None,
            message: Some(message),
        }
    }

    /// Builder: attach a human-readable note
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == QueryStatus::Ok
    }
}

/// Translate query-time failures into statuses; anything else propagates
fn into_response(error: EngineError) -> Result<QueryResponse> {
    let status = match &error {
        EngineError::NodeNotFound(_) | EngineError::Store(StoreError::NodeNotFound(_)) => QueryStatus::NotFound,
        EngineError::TraversalLimitExceeded { .. } => QueryStatus::LimitExceeded,
        EngineError::Cancelled { .. } => QueryStatus::Cancelled,
        _ => return Err(error),
    };
    Ok(QueryResponse::failed(status, error.to_string()))
}

/// Read-side entry point over a shared graph
pub struct QueryApi<S> {
    graph: SharedGraph<S>,
    config: EngineConfig,
    cancel: Option<CancellationToken>,
}

impl<S> Clone for QueryApi<S> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: GraphStore> QueryApi<S> {
    pub fn new(graph: SharedGraph<S>, config: EngineConfig) -> Self {
        Self {
            graph,
            config,
            cancel: None,
        }
    }

    /// Builder: abort in-flight queries when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Key under which a response to `request` may be cached
    pub fn cache_key(&self, request: &QueryRequest) -> (u64, QueryRequest) {
        let _view = self.graph.read();
        (self.graph.version(), request.clone())
    }

    fn budget(&self) -> TraversalBudget {
        let mut budget = TraversalBudget::new(self.config.max_visited_nodes);
        if let Some(timeout) = self.config.query_deadline {
            budget = budget.with_timeout(timeout);
        }
        if let Some(token) = &self.cancel {
            budget = budget.with_cancel(token.clone());
        }
        budget
    }

    /// Run any request
    #[instrument(skip(self))]
    pub fn execute(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let response = match request {
            QueryRequest::Upstream { node, depth } => self.upstream(node, *depth),
            QueryRequest::Downstream { node, depth } => self.downstream(node, *depth),
            QueryRequest::Impact { node } => self.impact(node),
            QueryRequest::Cycles => self.cycles(),
            QueryRequest::Path { from, to } => self.path(from, to),
            QueryRequest::Lookup { name } => Ok(self.lookup(name)),
            QueryRequest::Stats => Ok(self.stats()),
        }?;
        debug!(status = ?response.status, "Query answered");
        Ok(response)
    }

    pub fn upstream(&self, node: &NodeId, depth: Option<usize>) -> Result<QueryResponse> {
        self.lineage(node, depth, true)
    }

    pub fn downstream(&self, node: &NodeId, depth: Option<usize>) -> Result<QueryResponse> {
        self.lineage(node, depth, false)
    }

    fn lineage(&self, node: &NodeId, depth: Option<usize>, upstream: bool) -> Result<QueryResponse> {
        let view = self.graph.read();
        let calc = LineageCalculator::new(&*view, &self.config).with_budget(self.budget());

        let walk = if upstream {
            calc.upstream(node, depth)
        } else {
            calc.downstream(node, depth)
        };
        let collected = walk.and_then(|steps| {
            steps
                .map(|step| {
                    step.map(|s| LineageEntry {
                        node: s.node.into(),
                        depth: s.depth,
                        via_edge: s.via_edge.id.clone(),
                        relationship: s.via_edge.relationship,
                    })
                })
                .collect::<Result<Vec<_>>>()
        });

        match collected {
            Ok(entries) => Ok(QueryResponse::ok(QueryPayload::Lineage(entries))),
            Err(error) => into_response(error),
        }
    }

    pub fn impact(&self, node: &NodeId) -> Result<QueryResponse> {
        let view = self.graph.read();
        let calc = LineageCalculator::new(&*view, &self.config).with_budget(self.budget());

        match calc.impact_of(node) {
            Ok(report) => Ok(QueryResponse::ok(QueryPayload::Impact(ImpactView {
                root: report.root.into(),
                affected: report
                    .entries
                    .into_iter()
                    .map(|entry| ImpactedNode {
                        node: entry.node.into(),
                        distance: entry.distance,
                        score: entry.score,
                        shortest_paths: entry.shortest_paths,
                    })
                    .collect(),
            }))),
            Err(error) => into_response(error),
        }
    }

    /// Reports `cycle_found` when the graph contains any cycle
    pub fn cycles(&self) -> Result<QueryResponse> {
        let view = self.graph.read();
        let calc = LineageCalculator::new(&*view, &self.config).with_budget(self.budget());

        match calc.detect_cycles() {
            Ok(cycles) if cycles.is_empty() => Ok(QueryResponse::ok(QueryPayload::Cycles(cycles))),
            Ok(cycles) => {
                let message = format!("{} cycle(s) found", cycles.len());
                Ok(QueryResponse {
                    status: QueryStatus::CycleFound,
                    payload: Some(QueryPayload::Cycles(cycles)),
                    message: Some(message),
                })
            }
            Err(error) => into_response(error),
        }
    }

    pub fn path(&self, from: &NodeId, to: &NodeId) -> Result<QueryResponse> {
        let view = self.graph.read();
        let calc = LineageCalculator::new(&*view, &self.config).with_budget(self.budget());

        match calc.shortest_path(from, to) {
            Ok(Some(path)) => Ok(QueryResponse::ok(QueryPayload::Path(Some(path)))),
            Ok(None) => Ok(QueryResponse::ok(QueryPayload::Path(None))
                .with_message(format!("no path from {} to {}", from, to))),
            Err(error) => into_response(error),
        }
    }

    /// Resolve a display name to the nodes carrying it
    pub fn lookup(&self, name: &str) -> QueryResponse {
        let view = self.graph.read();
        let nodes: Vec<NodeSummary> = view.find_by_name(name).into_iter().map(NodeSummary::from).collect();
        if nodes.is_empty() {
            QueryResponse::failed(QueryStatus::NotFound, format!("no node named `{}`", name))
        } else {
            QueryResponse::ok(QueryPayload::Nodes(nodes))
        }
    }

    pub fn stats(&self) -> QueryResponse {
        let view = self.graph.read();
        let mut stats = GraphStats {
            version: self.graph.version(),
            nodes: view.node_count(),
            edges: view.edge_count(),
            datasets: 0,
            columns: 0,
            processes: 0,
            stale_nodes: 0,
        };
        for node in view.nodes() {
            match node.kind {
                NodeKind::Dataset => stats.datasets += 1,
                NodeKind::Column => stats.columns += 1,
                NodeKind::Process => stats.processes += 1,
            }
            if node.stale {
                stats.stale_nodes += 1;
            }
        }
        QueryResponse::ok(QueryPayload::Stats(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestionMerger;
    use chrono::{TimeZone, Utc};
    use lineage_core::{EdgeRecord, ExtractionBatch, NodeRecord};
    use lineage_store::MemoryGraphStore;

    fn record(name: &str) -> NodeRecord {
        NodeRecord::new(NodeKind::Dataset, "mssql", name, name).unwrap()
    }

    fn setup(edges: &[(&str, &str)]) -> (IngestionMerger<MemoryGraphStore>, QueryApi<MemoryGraphStore>) {
        let graph = SharedGraph::new(MemoryGraphStore::new());
        let merger = IngestionMerger::new(graph.clone(), EngineConfig::default());
        let mut batch =
            ExtractionBatch::new("test", "1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).unwrap();
        for name in ["a", "b", "c"] {
            batch = batch.with_node(record(name));
        }
        for (from, to) in edges {
            batch = batch.with_edge(
                EdgeRecord::new(record(from).node_id(), record(to).node_id(), Relationship::DerivesFrom, "t")
                    .unwrap(),
            );
        }
        merger.merge(&batch).unwrap();
        (merger, QueryApi::new(graph, EngineConfig::default()))
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let (_, api) = setup(&[]);
        let response = api.upstream(&NodeId::new("dataset:mssql:nope"), None).unwrap();
        assert_eq!(response.status, QueryStatus::NotFound);
        assert!(response.payload.is_none());
        assert!(response.message.unwrap().contains("nope"));
    }

    #[test]
    fn test_cycles_status() {
        let (_, api) = setup(&[("a", "b")]);
        assert_eq!(api.cycles().unwrap().status, QueryStatus::Ok);

        let (_, api) = setup(&[("a", "b"), ("b", "a")]);
        let response = api.cycles().unwrap();
        assert_eq!(response.status, QueryStatus::CycleFound);
        match response.payload {
            Some(QueryPayload::Cycles(cycles)) => assert_eq!(cycles.len(), 1),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_query() {
        let (_, api) = setup(&[("a", "b")]);
        let token = CancellationToken::new();
        let api = api.with_cancellation(token.clone());
        token.cancel();

        let response = api.downstream(&record("a").node_id(), None).unwrap();
        assert_eq!(response.status, QueryStatus::Cancelled);
    }

    #[test]
    fn test_cache_key_tracks_version() {
        let (merger, api) = setup(&[]);
        let request = QueryRequest::Downstream {
            node: record("a").node_id(),
            depth: None,
        };
        let before = api.cache_key(&request);

        let next = ExtractionBatch::new("test", "2", Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
            .unwrap()
            .with_edge(
                EdgeRecord::new(record("a").node_id(), record("c").node_id(), Relationship::DerivesFrom, "t")
                    .unwrap(),
            );
        merger.merge(&next).unwrap();

        let after = api.cache_key(&request);
        assert_eq!(before.1, after.1);
        assert!(after.0 > before.0);
    }

    #[test]
    fn test_lookup_and_stats() {
        let (_, api) = setup(&[("a", "b")]);
        let found = api.execute(&QueryRequest::Lookup { name: "B".into() }).unwrap();
        assert!(found.is_ok());

        let missing = api.lookup("zzz");
        assert_eq!(missing.status, QueryStatus::NotFound);

        match api.stats().payload {
            Some(QueryPayload::Stats(stats)) => {
                assert_eq!((stats.nodes, stats.edges, stats.datasets), (3, 1, 3));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_summary_carries_owner() {
        let (merger, api) = setup(&[]);
        let owned = record("d").with_property(reserved::OWNER, "finance").unwrap();
        let batch = ExtractionBatch::new("test", "2", Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
            .unwrap()
            .with_node(owned);
        merger.merge(&batch).unwrap();

        match api.lookup("d").payload {
            Some(QueryPayload::Nodes(nodes)) => assert_eq!(nodes[0].owner.as_deref(), Some("finance")),
            other => panic!("unexpected payload: {:?}", other),
        }
        match api.lookup("a").payload {
            Some(QueryPayload::Nodes(nodes)) => assert!(nodes[0].owner.is_none()),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_response_serialization() {
        let (_, api) = setup(&[("a", "b")]);
        let response = api.path(&record("a").node_id(), &record("b").node_id()).unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["payload"]["kind"], "path");
        assert_eq!(json["payload"]["data"]["nodes"][1], "dataset:mssql:b");
    }
}
