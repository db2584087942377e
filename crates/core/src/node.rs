//! Node types - datasets, columns and processes in the lineage graph

use crate::batch::{BatchId, Observation};
use crate::record::NodeRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Property keys with a documented meaning. Values under these keys must be strings.
pub mod reserved {
    /// Database schema the dataset lives in
    pub const SCHEMA: &str = "schema";
    /// Database (catalog) name
    pub const DATABASE: &str = "database";
    /// Owning team or person
    pub const OWNER: &str = "owner";
    /// Transformation text (SQL statement, script excerpt); truncated on ingestion
    pub const LOGIC: &str = "logic";
    /// Comma-separated column list
    pub const COLUMNS: &str = "columns";
    /// Extractor-specific transformation flavour (`ssis_dataflow`, `sql_task`, ...)
    pub const TRANSFORMATION_TYPE: &str = "transformation_type";

    pub const ALL: [&str; 6] = [SCHEMA, DATABASE, OWNER, LOGIC, COLUMNS, TRANSFORMATION_TYPE];

    /// Maximum stored length (in characters) of the `logic` property
    pub const MAX_LOGIC_CHARS: usize = 500;

    pub fn is_reserved(key: &str) -> bool {
        ALL.contains(&key)
    }
}

/// What a node represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A table, view, file or other stored dataset
    Dataset,
    /// A single column of a dataset
    Column,
    /// A transformation job or step
    Process,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Dataset => "dataset",
            NodeKind::Column => "column",
            NodeKind::Process => "process",
        }
    }

    /// Parse the wire spelling of a kind
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dataset" | "table" | "view" => Some(NodeKind::Dataset),
            "column" => Some(NodeKind::Column),
            "process" | "job" | "transformation" => Some(NodeKind::Process),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable node identifier, derived from (source system, path, kind)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Derive the identifier for an entity. Repeated extraction of the same
    /// entity always yields the same id.
    pub fn derive(source_system: &str, path: &str, kind: NodeKind) -> Self {
        Self(format!(
            "{}:{}:{}",
            kind.as_str(),
            escape(&canonicalize(source_system)),
            escape(&canonicalize(path))
        ))
    }

    /// Wrap an already-derived identifier (e.g. one supplied on the command line)
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Interpret a hand-written reference.
    ///
    /// Text shaped like `kind:source:path` is re-derived, so case, spacing and
    /// unescaped `:` in the path no longer matter. Anything else is kept
    /// (trimmed) as a bare path reference for the merger to resolve.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        let mut parts = raw.splitn(3, ':');
        if let (Some(kind), Some(source), Some(path)) = (parts.next(), parts.next(), parts.next()) {
            let filled = !source.trim().is_empty() && !path.trim().is_empty();
            if let (Some(kind), true) = (NodeKind::parse(kind), filled) {
                return Self::derive(&unescape(source), &unescape(path), kind);
            }
        }
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Canonicalize an identifier component for deduplication
pub fn canonicalize(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// `%` first, so escaped output never contains a bare `%`
fn escape(value: &str) -> String {
    value.replace('%', "%25").replace(':', "%3a")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let code = tail.get(..3).map(str::to_ascii_lowercase);
        match code.as_deref() {
            Some("%3a") => out.push(':'),
            Some("%25") => out.push('%'),
            _ => {
                out.push('%');
                rest = &tail[1..];
                continue;
            }
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    out
}

/// A committed node in the lineage graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Display name
    pub name: String,
    /// Source system tag (e.g. `mssql`, `spark`)
    pub source_system: String,
    /// Fully-qualified path within the source system, as last observed
    pub path: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Batches that observed this node
    #[serde(default)]
    pub batches: BTreeSet<BatchId>,
    /// Set when no batch refreshed the node within the staleness window
    #[serde(default)]
    pub stale: bool,
}

impl Node {
    /// Build a node from its first observation
    pub fn from_record(record: &NodeRecord, observation: &Observation) -> Self {
        let mut batches = BTreeSet::new();
        batches.insert(observation.batch_id.clone());
        Self {
            id: record.node_id(),
            kind: record.kind,
            name: record.name.clone(),
            source_system: record.source_system.clone(),
            path: record.id.clone(),
            properties: record.properties.clone(),
            first_seen: observation.observed_at,
            last_seen: observation.observed_at,
            batches,
            stale: false,
        }
    }

    /// Fold a repeated observation into this node.
    ///
    /// The newer observation wins for name and property values; an older
    /// (out-of-order) observation only fills in properties that are absent.
    pub fn absorb(&mut self, record: &NodeRecord, observation: &Observation) {
        let newer = observation.observed_at >= self.last_seen;
        if newer {
            self.name = record.name.clone();
            self.path = record.id.clone();
            for (key, value) in &record.properties {
                self.properties.insert(key.clone(), value.clone());
            }
        } else {
            for (key, value) in &record.properties {
                self.properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        self.first_seen = self.first_seen.min(observation.observed_at);
        self.last_seen = self.last_seen.max(observation.observed_at);
        self.batches.insert(observation.batch_id.clone());
        self.stale = false;
    }

    /// Whether the node has gone unrefreshed for longer than `window` as of `now`
    pub fn is_past_window(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_seen
            .checked_add_signed(window)
            .is_some_and(|limit| limit < now)
    }

    /// Read a reserved string property
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}
