//! Extraction batches - the unit of ingestion

use crate::edge::EdgeId;
use crate::error::{RecordShape, Result, ValidationError};
use crate::node::NodeId;
use crate::record::{EdgeRecord, NodeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of one extractor run, `"{extractor}:{run_id}"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn derive(extractor: &str, run_id: &str) -> Self {
        Self(format!("{}:{}", extractor.trim(), run_id.trim()))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who observed a fact, and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub batch_id: BatchId,
    pub observed_at: DateTime<Utc>,
}

/// One record inside a batch, in extractor order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

impl Record {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            Record::Node(node) => node.validate(),
            Record::Edge(edge) => edge.validate(),
        }
    }
}

/// A named extractor run and the records it produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionBatch {
    pub id: BatchId,
    /// Extractor type (`ssis`, `sql`, `spark`, `python`, ...)
    pub extractor: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl ExtractionBatch {
    /// Create an empty batch for an extractor run
    pub fn new(
        extractor: impl Into<String>,
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> std::result::Result<Self, ValidationError> {
        let extractor = extractor.into();
        let run_id = run_id.into();
        if extractor.trim().is_empty() {
            return Err(ValidationError::missing(RecordShape::Batch, "extractor"));
        }
        if run_id.trim().is_empty() {
            return Err(ValidationError::missing(RecordShape::Batch, "run_id"));
        }
        Ok(Self {
            id: BatchId::derive(&extractor, &run_id),
            extractor: extractor.trim().to_string(),
            run_id: run_id.trim().to_string(),
            timestamp,
            records: Vec::new(),
        })
    }

    /// Builder: append a node record
    pub fn with_node(mut self, record: NodeRecord) -> Self {
        self.records.push(Record::Node(record));
        self
    }

    /// Builder: append an edge record
    pub fn with_edge(mut self, record: EdgeRecord) -> Self {
        self.records.push(Record::Edge(record));
        self
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// The observation every record of this batch is stamped with
    pub fn observation(&self) -> Observation {
        Observation {
            batch_id: self.id.clone(),
            observed_at: self.timestamp,
        }
    }

    pub fn node_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Node(node) => Some(node),
            Record::Edge(_) => None,
        })
    }

    pub fn edge_records(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Edge(edge) => Some(edge),
            Record::Node(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// What one merged batch touched, retained after the batch itself is gone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergeLogEntry {
    pub batch_id: BatchId,
    pub extractor: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub node_ids: BTreeSet<NodeId>,
    #[serde(default)]
    pub edge_ids: BTreeSet<EdgeId>,
}

impl MergeLogEntry {
    /// Empty entry for a batch about to be merged
    pub fn for_batch(batch: &ExtractionBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            extractor: batch.extractor.clone(),
            run_id: batch.run_id.clone(),
            timestamp: batch.timestamp,
            node_ids: BTreeSet::new(),
            edge_ids: BTreeSet::new(),
        }
    }
}

/// Anything that can produce an extraction batch (SSIS packages, SQL
/// scripts, Spark jobs, ...). Format-specific parsing lives behind this trait.
pub trait Extractor {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn extract(&self) -> Result<ExtractionBatch>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Relationship;
    use crate::node::NodeKind;

    #[test]
    fn test_batch_id_derivation() {
        let batch = ExtractionBatch::new(" ssis ", "run-1", Utc::now()).unwrap();
        assert_eq!(batch.id.as_str(), "ssis:run-1");
        assert_eq!(batch.extractor, "ssis");
    }

    #[test]
    fn test_batch_requires_run_id() {
        let err = ExtractionBatch::new("ssis", "", Utc::now()).unwrap_err();
        assert_eq!(err.field, "run_id");
    }

    #[test]
    fn test_partition_preserves_order() {
        let a = NodeRecord::new(NodeKind::Dataset, "mssql", "a", "A").unwrap();
        let b = NodeRecord::new(NodeKind::Dataset, "mssql", "b", "B").unwrap();
        let edge = EdgeRecord::new(a.node_id(), b.node_id(), Relationship::DerivesFrom, "test").unwrap();
        let batch = ExtractionBatch::new("test", "1", Utc::now())
            .unwrap()
            .with_edge(edge)
            .with_node(a.clone())
            .with_node(b.clone());

        let nodes: Vec<NodeId> = batch.node_records().map(|n| n.node_id()).collect();
        assert_eq!(nodes, vec![a.node_id(), b.node_id()]);
        assert_eq!(batch.edge_records().count(), 1);
        assert_eq!(batch.len(), 3);
    }
}
