//! Edge types - data-flow relationships between nodes
//!
//! Every edge points along the direction of data flow: the source is
//! upstream of the target.

use crate::batch::{BatchId, Observation};
use crate::node::NodeId;
use crate::record::EdgeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Types of data-flow relationships
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    /// A process writes the target dataset
    Produces,
    /// A dataset is read by the target process
    Consumes,
    /// The target is derived from the source (transformation-level lineage)
    DerivesFrom,
}

impl Relationship {
    pub const ALL: [Relationship; 3] = [
        Relationship::Produces,
        Relationship::Consumes,
        Relationship::DerivesFrom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Produces => "produces",
            Relationship::Consumes => "consumes",
            Relationship::DerivesFrom => "derives-from",
        }
    }

    /// Parse the wire spelling, tolerating `_` and upper case
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "produces" => Some(Relationship::Produces),
            "consumes" | "feeds-into" => Some(Relationship::Consumes),
            "derives-from" | "derived-from" => Some(Relationship::DerivesFrom),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the extractor learned about an edge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Stated explicitly by the source (e.g. a data-flow component)
    #[default]
    Declared,
    /// Reconstructed heuristically (e.g. parsed out of SQL text)
    Inferred,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Declared => "declared",
            Confidence::Inferred => "inferred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "declared" => Some(Confidence::Declared),
            "inferred" => Some(Confidence::Inferred),
            _ => None,
        }
    }
}

/// Edge identifier; one edge per (source, target, relationship)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    pub fn derive(source: &NodeId, target: &NodeId, relationship: Relationship) -> Self {
        Self(format!("{}-[{}]->{}", source, relationship, target))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column-level sub-mapping carried on an edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_column: String,
    /// Transformation expression, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ColumnMapping {
    pub fn new(source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
            expression: None,
        }
    }
}

/// A committed edge in the lineage graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relationship: Relationship,
    pub confidence: Confidence,
    /// Extractor/run that produced the most recent observation
    pub provenance: String,
    /// Batches that observed this edge
    #[serde(default)]
    pub batches: BTreeSet<BatchId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_mappings: Vec<ColumnMapping>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Edge {
    /// Build an edge from its first observation
    pub fn from_record(record: &EdgeRecord, observation: &Observation) -> Self {
        let mut batches = BTreeSet::new();
        batches.insert(observation.batch_id.clone());
        Self {
            id: record.edge_id(),
            source_id: record.source_id.clone(),
            target_id: record.target_id.clone(),
            relationship: record.relationship,
            confidence: record.confidence,
            provenance: record.provenance.clone(),
            batches,
            column_mappings: record.column_mappings.clone(),
            first_seen: observation.observed_at,
            last_seen: observation.observed_at,
        }
    }

    /// Fold a repeated observation into this edge
    pub fn absorb(&mut self, record: &EdgeRecord, observation: &Observation) {
        if observation.observed_at >= self.last_seen {
            self.provenance = record.provenance.clone();
            self.confidence = record.confidence;
            if !record.column_mappings.is_empty() {
                self.column_mappings = record.column_mappings.clone();
            }
        }
        self.first_seen = self.first_seen.min(observation.observed_at);
        self.last_seen = self.last_seen.max(observation.observed_at);
        self.batches.insert(observation.batch_id.clone());
    }
}
