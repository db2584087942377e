//! Extractor records - the canonical shape of one extracted fact
//!
//! Records are validated when they are constructed, whether through
//! [`NodeRecord::new`]/[`EdgeRecord::new`] or through deserialization, so
//! components downstream of the model can rely on well-formed input.

use crate::edge::{ColumnMapping, Confidence, EdgeId, Relationship};
use crate::error::{RecordShape, ValidationError};
use crate::node::{reserved, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type Validated<T> = std::result::Result<T, ValidationError>;

fn required(shape: RecordShape, field: &str, value: Option<String>) -> Validated<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ValidationError::missing(shape, field)),
    }
}

/// One extracted dataset, column or process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "RawNodeRecord")]
pub struct NodeRecord {
    /// Fully-qualified path of the entity within its source system
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub source_system: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    /// Create a validated node record
    pub fn new(
        kind: NodeKind,
        source_system: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
    ) -> Validated<Self> {
        let record = Self {
            id: required(RecordShape::Node, "id", Some(path.into()))?,
            kind,
            name: required(RecordShape::Node, "name", Some(name.into()))?,
            source_system: required(RecordShape::Node, "source_system", Some(source_system.into()))?,
            properties: BTreeMap::new(),
        };
        Ok(record)
    }

    /// Builder: add a property, validating reserved keys
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Validated<Self> {
        let key = key.into();
        let value = normalize_property(&key, value.into())?;
        self.properties.insert(key, value);
        Ok(self)
    }

    /// The graph identifier this record maps onto
    pub fn node_id(&self) -> NodeId {
        NodeId::derive(&self.source_system, &self.id, self.kind)
    }

    /// Re-check a record that may have been assembled field by field
    pub fn validate(&self) -> Validated<()> {
        for (field, value) in [
            ("id", &self.id),
            ("name", &self.name),
            ("source_system", &self.source_system),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::missing(RecordShape::Node, field));
            }
        }
        for (key, value) in &self.properties {
            check_reserved(key, value)?;
        }
        Ok(())
    }
}

fn check_reserved(key: &str, value: &serde_json::Value) -> Validated<()> {
    if reserved::is_reserved(key) && !value.is_string() {
        return Err(ValidationError::invalid(
            RecordShape::Node,
            format!("properties.{key}"),
            "must be a string",
        ));
    }
    Ok(())
}

fn normalize_property(key: &str, value: serde_json::Value) -> Validated<serde_json::Value> {
    check_reserved(key, &value)?;
    if key == reserved::LOGIC {
        if let Some(text) = value.as_str() {
            if text.chars().count() > reserved::MAX_LOGIC_CHARS {
                let truncated: String = text.chars().take(reserved::MAX_LOGIC_CHARS).collect();
                return Ok(serde_json::Value::String(truncated));
            }
        }
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawNodeRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "source_system")]
    source_system: Option<String>,
    #[serde(default)]
    properties: Option<BTreeMap<String, serde_json::Value>>,
}

impl TryFrom<RawNodeRecord> for NodeRecord {
    type Error = ValidationError;

    fn try_from(raw: RawNodeRecord) -> Validated<Self> {
        let kind_text = required(RecordShape::Node, "kind", raw.kind)?;
        let kind = NodeKind::parse(&kind_text).ok_or_else(|| {
            ValidationError::invalid(
                RecordShape::Node,
                "kind",
                format!("has unknown value `{kind_text}`"),
            )
        })?;

        let mut record = NodeRecord::new(
            kind,
            raw.source_system.unwrap_or_default(),
            raw.id.unwrap_or_default(),
            raw.name.unwrap_or_default(),
        )?;
        for (key, value) in raw.properties.unwrap_or_default() {
            record = record.with_property(key, value)?;
        }
        Ok(record)
    }
}

/// One extracted data-flow relationship
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "RawEdgeRecord")]
pub struct EdgeRecord {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relationship: Relationship,
    #[serde(default)]
    pub confidence: Confidence,
    /// Which extractor/run produced the edge
    pub provenance: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_mappings: Vec<ColumnMapping>,
}

impl EdgeRecord {
    /// Create a validated edge record with `Declared` confidence
    pub fn new(
        source_id: NodeId,
        target_id: NodeId,
        relationship: Relationship,
        provenance: impl Into<String>,
    ) -> Validated<Self> {
        let record = Self {
            source_id,
            target_id,
            relationship,
            confidence: Confidence::Declared,
            provenance: provenance.into().trim().to_string(),
            column_mappings: Vec::new(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Builder: set confidence
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    /// Builder: attach a column-level mapping
    pub fn with_column_mapping(mut self, mapping: ColumnMapping) -> Validated<Self> {
        check_mapping(self.column_mappings.len(), &mapping)?;
        self.column_mappings.push(mapping);
        Ok(self)
    }

    pub fn edge_id(&self) -> EdgeId {
        EdgeId::derive(&self.source_id, &self.target_id, self.relationship)
    }

    pub fn validate(&self) -> Validated<()> {
        if self.source_id.as_str().trim().is_empty() {
            return Err(ValidationError::missing(RecordShape::Edge, "source_id"));
        }
        if self.target_id.as_str().trim().is_empty() {
            return Err(ValidationError::missing(RecordShape::Edge, "target_id"));
        }
        if self.provenance.trim().is_empty() {
            return Err(ValidationError::missing(RecordShape::Edge, "provenance"));
        }
        for (index, mapping) in self.column_mappings.iter().enumerate() {
            check_mapping(index, mapping)?;
        }
        Ok(())
    }
}

fn check_mapping(index: usize, mapping: &ColumnMapping) -> Validated<()> {
    if mapping.source_column.trim().is_empty() {
        return Err(ValidationError::missing(
            RecordShape::Edge,
            format!("column_mappings[{index}].source_column"),
        ));
    }
    if mapping.target_column.trim().is_empty() {
        return Err(ValidationError::missing(
            RecordShape::Edge,
            format!("column_mappings[{index}].target_column"),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawEdgeRecord {
    #[serde(default, alias = "source_id")]
    source_id: Option<String>,
    #[serde(default, alias = "target_id")]
    target_id: Option<String>,
    #[serde(default)]
    relationship: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    provenance: Option<String>,
    #[serde(default, alias = "column_mappings")]
    column_mappings: Option<Vec<ColumnMapping>>,
}

impl TryFrom<RawEdgeRecord> for EdgeRecord {
    type Error = ValidationError;

    fn try_from(raw: RawEdgeRecord) -> Validated<Self> {
        let source_id = required(RecordShape::Edge, "source_id", raw.source_id)?;
        let target_id = required(RecordShape::Edge, "target_id", raw.target_id)?;
        let relationship_text = required(RecordShape::Edge, "relationship", raw.relationship)?;
        let relationship = Relationship::parse(&relationship_text).ok_or_else(|| {
            ValidationError::invalid(
                RecordShape::Edge,
                "relationship",
                format!("has unknown value `{relationship_text}`"),
            )
        })?;
        let confidence = match raw.confidence {
            None => Confidence::Declared,
            Some(text) => Confidence::parse(&text).ok_or_else(|| {
                ValidationError::invalid(
                    RecordShape::Edge,
                    "confidence",
                    format!("has unknown value `{text}`"),
                )
            })?,
        };

        let mut record = EdgeRecord::new(
            NodeId::normalize(&source_id),
            NodeId::normalize(&target_id),
            relationship,
            raw.provenance.unwrap_or_default(),
        )?
        .with_confidence(confidence);
        for mapping in raw.column_mappings.unwrap_or_default() {
            record = record.with_column_mapping(mapping)?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_record_requires_source_system() {
        let err = NodeRecord::new(NodeKind::Dataset, "  ", "dbo.orders", "Orders").unwrap_err();
        assert_eq!(err.field, "source_system");
        assert_eq!(err.shape, RecordShape::Node);
    }

    #[test]
    fn test_node_record_from_json() {
        let json = r#"{
            "id": "dw.dbo.DimCustomer",
            "kind": "dataset",
            "name": "DimCustomer",
            "sourceSystem": "mssql",
            "properties": {"schema": "dbo", "rowCount": 42}
        }"#;
        let record: NodeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, NodeKind::Dataset);
        assert_eq!(record.node_id().as_str(), "dataset:mssql:dw.dbo.dimcustomer");
        assert_eq!(record.properties["rowCount"], serde_json::json!(42));
    }

    #[test]
    fn test_node_record_json_missing_kind_names_field() {
        let json = r#"{"id": "x", "name": "x", "sourceSystem": "s"}"#;
        let err = serde_json::from_str::<NodeRecord>(json).unwrap_err();
        assert!(err.to_string().contains("`kind`"), "{err}");
    }

    #[test]
    fn test_reserved_property_must_be_string() {
        let err = NodeRecord::new(NodeKind::Dataset, "mssql", "dbo.orders", "Orders")
            .unwrap()
            .with_property(reserved::OWNER, 7)
            .unwrap_err();
        assert_eq!(err.field, "properties.owner");
    }

    #[test]
    fn test_logic_is_truncated() {
        let sql = "SELECT 1 ".repeat(100);
        let record = NodeRecord::new(NodeKind::Process, "mssql", "pkg.task", "Load")
            .unwrap()
            .with_property(reserved::LOGIC, sql)
            .unwrap();
        let stored = record.properties[reserved::LOGIC].as_str().unwrap();
        assert_eq!(stored.chars().count(), reserved::MAX_LOGIC_CHARS);
    }

    #[test]
    fn test_edge_record_requires_provenance() {
        let err = EdgeRecord::new(
            NodeId::new("dataset:a:x"),
            NodeId::new("dataset:a:y"),
            Relationship::DerivesFrom,
            "",
        )
        .unwrap_err();
        assert_eq!(err.field, "provenance");
    }

    #[test]
    fn test_edge_record_from_json() {
        let json = r#"{
            "sourceId": "dataset:mssql:staging.customer",
            "targetId": "dataset:mssql:dw.dimcustomer",
            "relationship": "derives-from",
            "confidence": "inferred",
            "provenance": "ssis:run-7",
            "columnMappings": [{"sourceColumn": "cust_id", "targetColumn": "customer_key"}]
        }"#;
        let record: EdgeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.relationship, Relationship::DerivesFrom);
        assert_eq!(record.confidence, Confidence::Inferred);
        assert_eq!(record.column_mappings.len(), 1);
    }

    #[test]
    fn test_edge_record_json_endpoints_normalized() {
        let json = r#"{
            "sourceId": "dataset:MSSQL:dw.dbo.DimCustomer",
            "targetId": " B ",
            "relationship": "derives-from",
            "provenance": "ssis:run-7"
        }"#;
        let record: EdgeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.source_id,
            NodeId::derive("mssql", "dw.dbo.DimCustomer", NodeKind::Dataset)
        );
        assert_eq!(record.target_id.as_str(), "B");
    }

    #[test]
    fn test_edge_record_blank_column_rejected() {
        let json = r#"{
            "sourceId": "a", "targetId": "b", "relationship": "produces",
            "provenance": "p",
            "columnMappings": [{"sourceColumn": "", "targetColumn": "k"}]
        }"#;
        let err = serde_json::from_str::<EdgeRecord>(json).unwrap_err();
        assert!(err.to_string().contains("column_mappings[0].source_column"), "{err}");
    }
}
