//! Ingestion Merger - applies extraction batches to the graph
//!
//! The merger is the only writer. Each batch is validated in full, then
//! applied inside one [`SharedGraph::commit`]: nodes first, then edges.
//! Edge endpoints given as bare paths are resolved against the batch's own
//! node records, then against the graph. Edges whose endpoints still do not
//! exist are skipped and reported; any other store failure undoes the whole
//! batch.

use crate::{EngineConfig, EngineError, Result};
use chrono::{DateTime, Utc};
use lineage_core::node::canonicalize;
use lineage_core::{
    BatchId, Edge, EdgeId, EdgeRecord, ExtractionBatch, MergeLogEntry, Node, NodeId,
};
use lineage_store::{GraphStore, SharedGraph, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, trace, warn};

/// Outcome of merging one batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub batch_id: BatchId,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub edges_skipped: Vec<SkippedEdge>,
}

impl MergeReport {
    fn empty(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            nodes_created: 0,
            nodes_updated: 0,
            edges_created: 0,
            edges_updated: 0,
            edges_skipped: Vec::new(),
        }
    }
}

/// An edge record that could not be committed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEdge {
    pub edge: EdgeId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SkipReason {
    /// An endpoint was neither in the batch nor already in the graph
    #[serde(rename_all = "camelCase")]
    DanglingReference { missing: NodeId },
}

/// Outcome of retracting one batch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetractionReport {
    pub batch_id: Option<BatchId>,
    pub edges_removed: Vec<EdgeId>,
    pub edges_retained: Vec<EdgeId>,
    pub nodes_marked_stale: Vec<NodeId>,
}

/// Prior state of everything a write section touched, replayed in reverse
/// to undo it
#[derive(Default)]
struct Journal {
    entries: Vec<Undo>,
}

enum Undo {
    Node { id: NodeId, previous: Option<Node> },
    Edge { id: EdgeId, previous: Option<Edge> },
}

impl Journal {
    fn node<S: GraphStore>(&mut self, store: &S, id: &NodeId) -> bool {
        let previous = store.get_node(id).cloned();
        let existed = previous.is_some();
        self.entries.push(Undo::Node {
            id: id.clone(),
            previous,
        });
        existed
    }

    fn edge<S: GraphStore>(&mut self, store: &S, id: &EdgeId) -> bool {
        let previous = store.get_edge(id).cloned();
        let existed = previous.is_some();
        self.entries.push(Undo::Edge {
            id: id.clone(),
            previous,
        });
        existed
    }

    fn rollback<S: GraphStore>(self, store: &mut S) {
        warn!(changes = self.entries.len(), "Rolling back batch");
        for undo in self.entries.into_iter().rev() {
            let outcome = match undo {
                Undo::Edge { id, previous: Some(edge) } => store.put_edge(edge).map_err(|e| (id.to_string(), e)),
                Undo::Edge { id, previous: None } => match store.delete_edge(&id) {
                    Ok(_) | Err(StoreError::EdgeNotFound(_)) => Ok(()),
                    Err(e) => Err((id.to_string(), e)),
                },
                Undo::Node { id, previous: Some(node) } => store.put_node(node).map_err(|e| (id.to_string(), e)),
                Undo::Node { id, previous: None } => match store.delete_node(&id) {
                    Ok(_) | Err(StoreError::NodeNotFound(_)) => Ok(()),
                    Err(e) => Err((id.to_string(), e)),
                },
            };
            if let Err((id, error)) = outcome {
                warn!(%id, %error, "Rollback step failed");
            }
        }
    }
}

/// Maps edge endpoints written as bare paths onto node ids. A path that
/// matches more than one node is left as written.
struct EndpointResolver {
    by_path: BTreeMap<String, BTreeSet<NodeId>>,
}

impl EndpointResolver {
    fn for_batch(batch: &ExtractionBatch) -> Self {
        let mut by_path: BTreeMap<String, BTreeSet<NodeId>> = BTreeMap::new();
        for record in batch.node_records() {
            by_path
                .entry(canonicalize(&record.id))
                .or_default()
                .insert(record.node_id());
        }
        Self { by_path }
    }

    fn resolve<S: GraphStore>(&self, store: &S, id: &NodeId) -> Option<NodeId> {
        if store.contains_node(id) {
            return None;
        }
        let candidates: Vec<NodeId> = match self.by_path.get(&canonicalize(id.as_str())) {
            Some(ids) => ids.iter().cloned().collect(),
            None => store
                .find_by_path(id.as_str())
                .into_iter()
                .map(|node| node.id.clone())
                .collect(),
        };
        match candidates.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    fn apply<'r, S: GraphStore>(&self, store: &S, record: &'r EdgeRecord) -> Cow<'r, EdgeRecord> {
        let source = self.resolve(store, &record.source_id);
        let target = self.resolve(store, &record.target_id);
        if source.is_none() && target.is_none() {
            return Cow::Borrowed(record);
        }
        let mut resolved = record.clone();
        if let Some(id) = source {
            resolved.source_id = id;
        }
        if let Some(id) = target {
            resolved.target_id = id;
        }
        trace!(from = %record.edge_id(), to = %resolved.edge_id(), "Resolved edge endpoints");
        Cow::Owned(resolved)
    }
}

/// Sole writer of a shared graph
pub struct IngestionMerger<S> {
    graph: SharedGraph<S>,
    config: EngineConfig,
    log: Mutex<BTreeMap<BatchId, MergeLogEntry>>,
}

impl<S: GraphStore> IngestionMerger<S> {
    pub fn new(graph: SharedGraph<S>, config: EngineConfig) -> Self {
        Self::with_log(graph, config, Vec::new())
    }

    /// Resume with a merge log restored from a snapshot
    pub fn with_log(
        graph: SharedGraph<S>,
        config: EngineConfig,
        entries: impl IntoIterator<Item = MergeLogEntry>,
    ) -> Self {
        let log = entries
            .into_iter()
            .map(|entry| (entry.batch_id.clone(), entry))
            .collect();
        Self {
            graph,
            config,
            log: Mutex::new(log),
        }
    }

    pub fn graph(&self) -> &SharedGraph<S> {
        &self.graph
    }

    /// Entries for every merged batch, ordered by batch id
    pub fn merge_log(&self) -> Vec<MergeLogEntry> {
        self.log.lock().values().cloned().collect()
    }

    /// Apply `batch` as one transaction
    #[instrument(skip(self, batch), fields(batch = %batch.id, records = batch.len()))]
    pub fn merge(&self, batch: &ExtractionBatch) -> Result<MergeReport> {
        let mut log = self.log.lock();

        for (index, record) in batch.records.iter().enumerate() {
            record
                .validate()
                .map_err(|source| EngineError::Validation { index, source })?;
        }

        let observation = batch.observation();
        let mut report = MergeReport::empty(batch.id.clone());
        let mut entry = MergeLogEntry::for_batch(batch);

        self.graph.commit(|store| -> Result<()> {
            let mut journal = Journal::default();

            for record in batch.node_records() {
                let existed = journal.node(store, &record.node_id());
                match store.upsert_node(record, &observation) {
                    Ok(id) => {
                        if existed {
                            report.nodes_updated += 1;
                        } else {
                            report.nodes_created += 1;
                        }
                        entry.node_ids.insert(id);
                    }
                    Err(error) => {
                        journal.rollback(store);
                        return Err(error.into());
                    }
                }
            }

            let resolver = EndpointResolver::for_batch(batch);
            for record in batch.edge_records() {
                let record = resolver.apply(&*store, record);
                let existed = journal.edge(store, &record.edge_id());
                match store.upsert_edge(&record, &observation) {
                    Ok(id) => {
                        if existed {
                            report.edges_updated += 1;
                        } else {
                            report.edges_created += 1;
                        }
                        entry.edge_ids.insert(id);
                    }
                    Err(StoreError::DanglingReference { edge, missing }) => {
                        debug!(%edge, %missing, "Skipping dangling edge");
                        report.edges_skipped.push(SkippedEdge {
                            edge,
                            reason: SkipReason::DanglingReference { missing },
                        });
                    }
                    Err(error) => {
                        journal.rollback(store);
                        return Err(error.into());
                    }
                }
            }
            Ok(())
        })?;

        match log.get_mut(&entry.batch_id) {
            Some(existing) => {
                existing.node_ids.extend(entry.node_ids);
                existing.edge_ids.extend(entry.edge_ids);
            }
            None => {
                log.insert(entry.batch_id.clone(), entry);
            }
        }

        info!(
            nodes_created = report.nodes_created,
            nodes_updated = report.nodes_updated,
            edges_created = report.edges_created,
            edges_updated = report.edges_updated,
            edges_skipped = report.edges_skipped.len(),
            "Batch merged"
        );
        Ok(report)
    }

    /// Withdraw what `batch_id` contributed.
    ///
    /// Edges no other live batch observed are removed; shared edges forget
    /// the batch and take `last_seen` from the newest batch still observing
    /// them.
    /// Nodes stay, and are marked stale once unrefreshed past the window.
    #[instrument(skip(self), fields(batch = %batch_id))]
    pub fn retract(&self, batch_id: &BatchId, now: DateTime<Utc>) -> Result<RetractionReport> {
        let mut log = self.log.lock();
        let entry = log
            .get(batch_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownBatch(batch_id.clone()))?;
        let window = self.config.staleness_window_chrono();

        let mut report = RetractionReport {
            batch_id: Some(batch_id.clone()),
            ..RetractionReport::default()
        };

        self.graph.commit(|store| -> Result<()> {
            let mut journal = Journal::default();
            let outcome = (|| -> Result<()> {
                for edge_id in &entry.edge_ids {
                    let Some(mut edge) = store.get_edge(edge_id).cloned() else {
                        continue;
                    };
                    journal.edge(store, edge_id);
                    edge.batches.remove(batch_id);
                    if edge.batches.is_empty() {
                        store.delete_edge(edge_id)?;
                        report.edges_removed.push(edge_id.clone());
                    } else {
                        let latest = edge
                            .batches
                            .iter()
                            .filter_map(|id| log.get(id))
                            .map(|other| other.timestamp)
                            .max();
                        if let Some(latest) = latest {
                            edge.last_seen = latest;
                        }
                        store.put_edge(edge)?;
                        report.edges_retained.push(edge_id.clone());
                    }
                }

                for node_id in &entry.node_ids {
                    let Some(mut node) = store.get_node(node_id).cloned() else {
                        continue;
                    };
                    journal.node(store, node_id);
                    node.batches.remove(batch_id);
                    if !node.stale && node.is_past_window(now, window) {
                        node.stale = true;
                        report.nodes_marked_stale.push(node_id.clone());
                    }
                    store.put_node(node)?;
                }
                Ok(())
            })();

            if outcome.is_err() {
                journal.rollback(store);
            }
            outcome
        })?;

        log.remove(batch_id);
        info!(
            edges_removed = report.edges_removed.len(),
            edges_retained = report.edges_retained.len(),
            nodes_marked_stale = report.nodes_marked_stale.len(),
            "Batch retracted"
        );
        Ok(report)
    }

    /// Mark every node unrefreshed past the staleness window as stale
    #[instrument(skip(self))]
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Result<Vec<NodeId>> {
        let _log = self.log.lock();
        let window = self.config.staleness_window_chrono();

        let marked = self.graph.commit(|store| -> Result<Vec<NodeId>> {
            let expired: Vec<Node> = store
                .nodes()
                .filter(|node| !node.stale && node.is_past_window(now, window))
                .cloned()
                .collect();

            let mut marked = Vec::with_capacity(expired.len());
            for mut node in expired {
                node.stale = true;
                marked.push(node.id.clone());
                store.put_node(node)?;
            }
            marked.sort();
            Ok(marked)
        })?;

        info!(marked = marked.len(), "Stale sweep complete");
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lineage_core::{EdgeRecord, NodeKind, NodeRecord, Relationship};
    use lineage_store::MemoryGraphStore;

    fn dataset(path: &str) -> NodeRecord {
        NodeRecord::new(NodeKind::Dataset, "mssql", path, path).unwrap()
    }

    fn derives(from: &NodeRecord, to: &NodeRecord) -> EdgeRecord {
        EdgeRecord::new(from.node_id(), to.node_id(), Relationship::DerivesFrom, "test").unwrap()
    }

    fn batch(run: &str, day: u32) -> ExtractionBatch {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        ExtractionBatch::new("test", run, ts).unwrap()
    }

    fn merger() -> IngestionMerger<MemoryGraphStore> {
        IngestionMerger::new(SharedGraph::new(MemoryGraphStore::new()), EngineConfig::default())
    }

    #[test]
    fn test_merge_counts_created_then_updated() {
        let merger = merger();
        let (a, b) = (dataset("a"), dataset("b"));
        let batch = batch("1", 1)
            .with_node(a.clone())
            .with_node(b.clone())
            .with_edge(derives(&a, &b));

        let first = merger.merge(&batch).unwrap();
        assert_eq!((first.nodes_created, first.edges_created), (2, 1));

        let second = merger.merge(&batch).unwrap();
        assert_eq!((second.nodes_created, second.edges_created), (0, 0));
        assert_eq!((second.nodes_updated, second.edges_updated), (2, 1));
        assert_eq!(merger.merge_log().len(), 1);
    }

    #[test]
    fn test_invalid_record_rejects_whole_batch() {
        let merger = merger();
        let mut bad = dataset("b");
        bad.name = "  ".into();
        let batch = batch("1", 1).with_node(dataset("a")).with_node(bad);

        let err = merger.merge(&batch).unwrap_err();
        assert!(matches!(err, EngineError::Validation { index: 1, .. }));
        assert_eq!(merger.graph().read().node_count(), 0);
        assert_eq!(merger.graph().version(), 0);
    }

    #[test]
    fn test_edges_applied_after_nodes_regardless_of_order() {
        let merger = merger();
        let (a, b) = (dataset("a"), dataset("b"));
        let batch = batch("1", 1)
            .with_edge(derives(&a, &b))
            .with_node(a)
            .with_node(b);

        let report = merger.merge(&batch).unwrap();
        assert_eq!(report.edges_created, 1);
        assert!(report.edges_skipped.is_empty());
    }

    #[test]
    fn test_dangling_edge_is_skipped() {
        let merger = merger();
        let (a, c) = (dataset("a"), dataset("c"));
        let report = merger
            .merge(&batch("1", 1).with_node(a.clone()).with_edge(derives(&a, &c)))
            .unwrap();

        assert_eq!(report.nodes_created, 1);
        assert_eq!(
            report.edges_skipped,
            vec![SkippedEdge {
                edge: derives(&a, &c).edge_id(),
                reason: SkipReason::DanglingReference { missing: c.node_id() },
            }]
        );
        assert_eq!(merger.graph().read().edge_count(), 0);
    }

    fn by_path(from: &str, to: &str) -> EdgeRecord {
        EdgeRecord::new(NodeId::new(from), NodeId::new(to), Relationship::DerivesFrom, "test").unwrap()
    }

    #[test]
    fn test_path_endpoints_resolve_within_batch() {
        let merger = merger();
        let (a, b) = (dataset("A"), dataset("B"));
        let report = merger
            .merge(&batch("1", 1).with_node(a.clone()).with_node(b.clone()).with_edge(by_path("A", "b")))
            .unwrap();

        assert_eq!(report.edges_created, 1);
        assert!(report.edges_skipped.is_empty());
        let graph = merger.graph().read();
        assert!(graph.get_edge(&derives(&a, &b).edge_id()).is_some());
    }

    #[test]
    fn test_path_endpoints_resolve_against_graph() {
        let merger = merger();
        let (a, b) = (dataset("dw.Orders"), dataset("dw.Sales"));
        merger.merge(&batch("1", 1).with_node(a.clone()).with_node(b.clone())).unwrap();

        let report = merger
            .merge(&batch("2", 2).with_edge(by_path("dw.orders", "DW.SALES")))
            .unwrap();
        assert_eq!(report.edges_created, 1);
        assert!(merger.graph().read().get_edge(&derives(&a, &b).edge_id()).is_some());
    }

    #[test]
    fn test_ambiguous_path_stays_dangling() {
        let merger = merger();
        let table = dataset("orders");
        let job = NodeRecord::new(NodeKind::Process, "ssis", "orders", "orders").unwrap();
        let sink = dataset("sink");
        let report = merger
            .merge(
                &batch("1", 1)
                    .with_node(table)
                    .with_node(job)
                    .with_node(sink)
                    .with_edge(by_path("orders", "sink")),
            )
            .unwrap();

        assert_eq!(report.edges_created, 0);
        assert_eq!(
            report.edges_skipped[0].reason,
            SkipReason::DanglingReference { missing: NodeId::new("orders") }
        );
    }

    #[test]
    fn test_separator_in_source_system_keeps_nodes_apart() {
        let merger = merger();
        let first = NodeRecord::new(NodeKind::Dataset, "hive:prod", "sales", "sales").unwrap();
        let second = NodeRecord::new(NodeKind::Dataset, "hive", "prod:sales", "sales").unwrap();
        let report = merger
            .merge(&batch("1", 1).with_node(first).with_node(second))
            .unwrap();

        assert_eq!((report.nodes_created, report.nodes_updated), (2, 0));
        assert_eq!(merger.graph().read().node_count(), 2);
    }

    #[test]
    fn test_capacity_failure_rolls_back() {
        let store = MemoryGraphStore::new().with_capacity_limit(2);
        let merger = IngestionMerger::new(SharedGraph::new(store), EngineConfig::default());
        let (a, b, c) = (dataset("a"), dataset("b"), dataset("c"));
        merger.merge(&batch("1", 1).with_node(a.clone())).unwrap();

        let err = merger
            .merge(
                &batch("2", 2)
                    .with_node(a.clone().with_property("owner", "etl").unwrap())
                    .with_node(b)
                    .with_node(c),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::CapacityExceeded { limit: 2 })));

        let graph = merger.graph().read();
        assert_eq!(graph.node_count(), 1);
        let node = graph.get_node(&a.node_id()).unwrap();
        assert!(node.properties.is_empty());
        assert_eq!(node.batches.len(), 1);
        drop(graph);
        assert_eq!(merger.merge_log().len(), 1);
    }

    #[test]
    fn test_retract_removes_sole_edges_and_keeps_shared() {
        let config = EngineConfig::default().with_staleness_window(std::time::Duration::from_secs(86_400));
        let merger = IngestionMerger::new(SharedGraph::new(MemoryGraphStore::new()), config);
        let (a, b, c) = (dataset("a"), dataset("b"), dataset("c"));

        let first = batch("1", 1)
            .with_node(a.clone())
            .with_node(b.clone())
            .with_node(c.clone())
            .with_edge(derives(&a, &b))
            .with_edge(derives(&b, &c));
        let second = batch("2", 1).with_edge(derives(&b, &c));
        merger.merge(&first).unwrap();
        merger.merge(&second).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let report = merger.retract(&first.id, now).unwrap();

        assert_eq!(report.edges_removed, vec![derives(&a, &b).edge_id()]);
        assert_eq!(report.edges_retained, vec![derives(&b, &c).edge_id()]);
        assert_eq!(report.nodes_marked_stale.len(), 3);

        let graph = merger.graph().read();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.get_node(&a.node_id()).unwrap().stale);
    }

    #[test]
    fn test_edge_refreshed_by_retracted_batch_is_removed_later() {
        let merger = merger();
        let (a, b) = (dataset("a"), dataset("b"));
        let first = batch("1", 1)
            .with_node(a.clone())
            .with_node(b.clone())
            .with_edge(derives(&a, &b));
        let refresh = batch("2", 3).with_edge(derives(&a, &b));
        merger.merge(&first).unwrap();
        merger.merge(&refresh).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();

        let report = merger.retract(&refresh.id, now).unwrap();
        assert_eq!(report.edges_retained, vec![derives(&a, &b).edge_id()]);
        {
            let graph = merger.graph().read();
            let edge = graph.get_edge(&derives(&a, &b).edge_id()).unwrap();
            assert_eq!(edge.last_seen, first.timestamp);
        }

        let report = merger.retract(&first.id, now).unwrap();
        assert_eq!(report.edges_removed, vec![derives(&a, &b).edge_id()]);
        assert_eq!(merger.graph().read().edge_count(), 0);
    }

    #[test]
    fn test_retract_unknown_batch() {
        let merger = merger();
        let err = merger.retract(&BatchId::new("nope:1"), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownBatch(_)));
    }

    #[test]
    fn test_sweep_marks_old_nodes() {
        let config = EngineConfig::default().with_staleness_window(std::time::Duration::from_secs(3_600));
        let merger = IngestionMerger::new(SharedGraph::new(MemoryGraphStore::new()), config);
        merger.merge(&batch("1", 1).with_node(dataset("old"))).unwrap();
        merger.merge(&batch("2", 5).with_node(dataset("fresh"))).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 30, 0).unwrap();
        let marked = merger.sweep_stale(now).unwrap();
        assert_eq!(marked, vec![dataset("old").node_id()]);

        let again = merger.sweep_stale(now).unwrap();
        assert!(again.is_empty());
    }
}
