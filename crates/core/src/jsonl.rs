//! JSON-lines batch format
//!
//! ```text
//! {"type":"batch","extractor":"ssis","runId":"r1","timestamp":"2024-01-01T00:00:00Z"}
//! {"type":"node","id":"dw.dbo.DimCustomer","kind":"dataset","name":"DimCustomer","sourceSystem":"mssql"}
//! {"type":"edge","sourceId":"...","targetId":"...","relationship":"derives-from","provenance":"ssis:r1"}
//! ```
//!
//! The header must come first. Blank lines are ignored. Edge endpoints may be
//! derived node ids in any casing, or the `id` (path) of a node record.

use crate::batch::{ExtractionBatch, Extractor, Record};
use crate::error::{CoreError, Result};
use crate::record::{EdgeRecord, NodeRecord, RawEdgeRecord, RawNodeRecord};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawLine {
    Batch(Header),
    Node(RawNodeRecord),
    Edge(RawEdgeRecord),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    #[serde(default)]
    extractor: String,
    #[serde(default, alias = "run_id")]
    run_id: String,
    timestamp: DateTime<Utc>,
}

/// Parse a whole batch from JSON-lines text
pub fn parse_batch(input: &str) -> Result<ExtractionBatch> {
    let mut batch: Option<ExtractionBatch> = None;

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawLine = serde_json::from_str(line).map_err(|e| CoreError::Parse {
            line: line_no,
            message: e.to_string(),
        })?;

        match raw {
            RawLine::Batch(header) => {
                if batch.is_some() {
                    return Err(CoreError::Parse {
                        line: line_no,
                        message: "duplicate batch header".into(),
                    });
                }
                let created = ExtractionBatch::new(header.extractor, header.run_id, header.timestamp)
                    .map_err(|e| CoreError::InvalidRecord { line: line_no, source: e })?;
                batch = Some(created);
            }
            RawLine::Node(raw) => {
                let current = batch.as_mut().ok_or_else(|| before_header(line_no))?;
                let record = NodeRecord::try_from(raw)
                    .map_err(|e| CoreError::InvalidRecord { line: line_no, source: e })?;
                current.push(Record::Node(record));
            }
            RawLine::Edge(raw) => {
                let current = batch.as_mut().ok_or_else(|| before_header(line_no))?;
                let record = EdgeRecord::try_from(raw)
                    .map_err(|e| CoreError::InvalidRecord { line: line_no, source: e })?;
                current.push(Record::Edge(record));
            }
        }
    }

    batch.ok_or(CoreError::Parse {
        line: 0,
        message: "missing batch header".into(),
    })
}

fn before_header(line: usize) -> CoreError {
    CoreError::Parse {
        line,
        message: "record before batch header".into(),
    }
}

/// Render a batch as JSON lines (header first, records in order)
pub fn to_json_lines(batch: &ExtractionBatch) -> Result<String> {
    let header = serde_json::json!({
        "type": "batch",
        "extractor": batch.extractor,
        "runId": batch.run_id,
        "timestamp": batch.timestamp,
    });
    let mut out = serde_json::to_string(&header)?;
    out.push('\n');
    for record in &batch.records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

enum Input {
    File(PathBuf),
    Inline(String),
}

/// Extractor boundary that reads an already-extracted batch from JSON lines
pub struct JsonLinesExtractor {
    input: Input,
}

impl JsonLinesExtractor {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            input: Input::File(path.into()),
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            input: Input::Inline(text.into()),
        }
    }
}

impl Extractor for JsonLinesExtractor {
    fn name(&self) -> &str {
        "jsonl"
    }

    #[instrument(skip(self))]
    fn extract(&self) -> Result<ExtractionBatch> {
        let batch = match &self.input {
            Input::File(path) => {
                debug!("Reading batch from {}", path.display());
                parse_batch(&std::fs::read_to_string(path)?)?
            }
            Input::Inline(text) => parse_batch(text)?,
        };
        debug!("Parsed batch {} with {} records", batch.id, batch.len());
        Ok(batch)
    }
}
