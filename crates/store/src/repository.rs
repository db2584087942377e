//! Snapshot persistence for the in-memory graph
//!
//! The graph is served from memory; SurrealDB holds the durable copy
//! between process runs. A [`Snapshot`] is captured synchronously under a
//! read guard and then written without holding any lock.

use crate::{DbConnection, GraphStore, Result, StoreError};
use chrono::{DateTime, Utc};
use lineage_core::{
    BatchId, Confidence, Edge, EdgeId, MergeLogEntry, Node, NodeId, NodeKind, Relationship,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Point-in-time copy of a graph and its merge log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub merge_log: Vec<MergeLogEntry>,
}

impl Snapshot {
    /// Copy everything out of `store`, ordered by id
    pub fn capture<'a, S: GraphStore>(
        store: &S,
        merge_log: impl IntoIterator<Item = &'a MergeLogEntry>,
    ) -> Self {
        let mut nodes: Vec<Node> = store.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<Edge> = store.edges().cloned().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            nodes,
            edges,
            merge_log: merge_log.into_iter().cloned().collect(),
        }
    }

    /// Load the snapshot into `store` (nodes first) and hand back the log
    pub fn restore_into<S: GraphStore>(self, store: &mut S) -> Result<Vec<MergeLogEntry>> {
        for node in self.nodes {
            store.put_node(node)?;
        }
        for edge in self.edges {
            store.put_edge(edge)?;
        }
        Ok(self.merge_log)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.merge_log.is_empty()
    }
}

// ==========================================
// ROW SHAPES
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRow {
    node_id: String,
    kind: String,
    name: String,
    source_system: String,
    path: String,
    properties_json: String,
    first_seen: String,
    last_seen: String,
    batches: Vec<String>,
    stale: bool,
}

impl NodeRow {
    fn from_node(node: &Node) -> Result<Self> {
        Ok(Self {
            node_id: node.id.to_string(),
            kind: node.kind.as_str().to_string(),
            name: node.name.clone(),
            source_system: node.source_system.clone(),
            path: node.path.clone(),
            properties_json: serde_json::to_string(&node.properties)?,
            first_seen: node.first_seen.to_rfc3339(),
            last_seen: node.last_seen.to_rfc3339(),
            batches: node.batches.iter().map(|b| b.to_string()).collect(),
            stale: node.stale,
        })
    }

    fn into_node(self) -> Result<Node> {
        let kind = NodeKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("node {}: kind `{}`", self.node_id, self.kind)))?;
        Ok(Node {
            kind,
            name: self.name,
            source_system: self.source_system,
            path: self.path,
            properties: serde_json::from_str(&self.properties_json)?,
            first_seen: parse_timestamp(&self.node_id, &self.first_seen)?,
            last_seen: parse_timestamp(&self.node_id, &self.last_seen)?,
            batches: self.batches.into_iter().map(BatchId::new).collect(),
            stale: self.stale,
            id: NodeId::new(self.node_id),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRow {
    edge_id: String,
    source_id: String,
    target_id: String,
    relationship: String,
    confidence: String,
    provenance: String,
    batches: Vec<String>,
    column_mappings_json: String,
    first_seen: String,
    last_seen: String,
}

impl EdgeRow {
    fn from_edge(edge: &Edge) -> Result<Self> {
        Ok(Self {
            edge_id: edge.id.to_string(),
            source_id: edge.source_id.to_string(),
            target_id: edge.target_id.to_string(),
            relationship: edge.relationship.as_str().to_string(),
            confidence: edge.confidence.as_str().to_string(),
            provenance: edge.provenance.clone(),
            batches: edge.batches.iter().map(|b| b.to_string()).collect(),
            column_mappings_json: serde_json::to_string(&edge.column_mappings)?,
            first_seen: edge.first_seen.to_rfc3339(),
            last_seen: edge.last_seen.to_rfc3339(),
        })
    }

    fn into_edge(self) -> Result<Edge> {
        let relationship = Relationship::parse(&self.relationship).ok_or_else(|| {
            StoreError::Corrupt(format!("edge {}: relationship `{}`", self.edge_id, self.relationship))
        })?;
        let confidence = Confidence::parse(&self.confidence).ok_or_else(|| {
            StoreError::Corrupt(format!("edge {}: confidence `{}`", self.edge_id, self.confidence))
        })?;
        Ok(Edge {
            source_id: NodeId::new(self.source_id),
            target_id: NodeId::new(self.target_id),
            relationship,
            confidence,
            provenance: self.provenance,
            batches: self.batches.into_iter().map(BatchId::new).collect(),
            column_mappings: serde_json::from_str(&self.column_mappings_json)?,
            first_seen: parse_timestamp(&self.edge_id, &self.first_seen)?,
            last_seen: parse_timestamp(&self.edge_id, &self.last_seen)?,
            id: EdgeId::new(self.edge_id),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MergeLogRow {
    batch_id: String,
    extractor: String,
    run_id: String,
    merged_at: String,
    node_ids: Vec<String>,
    edge_ids: Vec<String>,
}

impl MergeLogRow {
    fn from_entry(entry: &MergeLogEntry) -> Self {
        Self {
            batch_id: entry.batch_id.to_string(),
            extractor: entry.extractor.clone(),
            run_id: entry.run_id.clone(),
            merged_at: entry.timestamp.to_rfc3339(),
            node_ids: entry.node_ids.iter().map(|id| id.to_string()).collect(),
            edge_ids: entry.edge_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn into_entry(self) -> Result<MergeLogEntry> {
        Ok(MergeLogEntry {
            timestamp: parse_timestamp(&self.batch_id, &self.merged_at)?,
            batch_id: BatchId::new(self.batch_id),
            extractor: self.extractor,
            run_id: self.run_id,
            node_ids: self.node_ids.into_iter().map(NodeId::new).collect(),
            edge_ids: self.edge_ids.into_iter().map(EdgeId::new).collect(),
        })
    }
}

fn parse_timestamp(owner: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{}: timestamp `{}`: {}", owner, raw, e)))
}

// ==========================================
// REPOSITORY
// ==========================================

/// Durable storage for graph snapshots
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
}

impl Repository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Replace the stored graph with `snapshot` in one transaction
    #[instrument(skip(self, snapshot), fields(nodes = snapshot.nodes.len(), edges = snapshot.edges.len()))]
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let nodes = snapshot
            .nodes
            .iter()
            .map(NodeRow::from_node)
            .collect::<Result<Vec<_>>>()?;
        let edges = snapshot
            .edges
            .iter()
            .map(EdgeRow::from_edge)
            .collect::<Result<Vec<_>>>()?;
        let log: Vec<MergeLogRow> = snapshot.merge_log.iter().map(MergeLogRow::from_entry).collect();

        let mut statements = vec![
            "BEGIN TRANSACTION;",
            "DELETE lineage_node;",
            "DELETE lineage_edge;",
            "DELETE merge_log;",
        ];
        // INSERT rejects an empty array
        if !nodes.is_empty() {
            statements.push("INSERT INTO lineage_node $nodes;");
        }
        if !edges.is_empty() {
            statements.push("INSERT INTO lineage_edge $edges;");
        }
        if !log.is_empty() {
            statements.push("INSERT INTO merge_log $log;");
        }
        statements.push("COMMIT TRANSACTION;");

        self.db
            .query(statements.join("\n"))
            .bind(("nodes", nodes))
            .bind(("edges", edges))
            .bind(("log", log))
            .await?
            .check()?;

        info!("Snapshot saved");
        Ok(())
    }

    /// Read the stored graph back, ordered by id
    #[instrument(skip(self))]
    pub async fn load_snapshot(&self) -> Result<Snapshot> {
        let node_rows: Vec<NodeRow> = self
            .db
            .query(
                "SELECT node_id, kind, name, source_system, path, properties_json, \
                 first_seen, last_seen, batches, stale FROM lineage_node ORDER BY node_id",
            )
            .await?
            .take(0)?;
        let edge_rows: Vec<EdgeRow> = self
            .db
            .query(
                "SELECT edge_id, source_id, target_id, relationship, confidence, provenance, \
                 batches, column_mappings_json, first_seen, last_seen FROM lineage_edge ORDER BY edge_id",
            )
            .await?
            .take(0)?;
        let log_rows: Vec<MergeLogRow> = self
            .db
            .query(
                "SELECT batch_id, extractor, run_id, merged_at, node_ids, edge_ids \
                 FROM merge_log ORDER BY batch_id",
            )
            .await?
            .take(0)?;

        debug!(
            nodes = node_rows.len(),
            edges = edge_rows.len(),
            batches = log_rows.len(),
            "Snapshot rows loaded"
        );

        Ok(Snapshot {
            nodes: node_rows.into_iter().map(NodeRow::into_node).collect::<Result<_>>()?,
            edges: edge_rows.into_iter().map(EdgeRow::into_edge).collect::<Result<_>>()?,
            merge_log: log_rows
                .into_iter()
                .map(MergeLogRow::into_entry)
                .collect::<Result<_>>()?,
        })
    }

    /// Drop everything stored
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        self.save_snapshot(&Snapshot::default()).await
    }
}
