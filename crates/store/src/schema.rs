//! SurrealDB schema definitions for graph snapshots

use crate::{DbConnection, Result, StoreError};
use tracing::info;

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    db.query(SCHEMA_DEFINITION)
        .await?
        .check()
        .map_err(|e| StoreError::SchemaInit(e.to_string()))?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- ============================================
-- GRAPH TABLES
-- ============================================

-- Nodes (datasets, columns, processes)
DEFINE TABLE IF NOT EXISTS lineage_node SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS node_id ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS kind ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS name ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS source_system ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS path ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS properties_json ON lineage_node TYPE string DEFAULT '{}';
DEFINE FIELD IF NOT EXISTS first_seen ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS last_seen ON lineage_node TYPE string;
DEFINE FIELD IF NOT EXISTS batches ON lineage_node TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS stale ON lineage_node TYPE bool DEFAULT false;

-- Data-flow edges
DEFINE TABLE IF NOT EXISTS lineage_edge SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS edge_id ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS source_id ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS target_id ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS relationship ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS confidence ON lineage_edge TYPE string DEFAULT 'declared';
DEFINE FIELD IF NOT EXISTS provenance ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS batches ON lineage_edge TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS column_mappings_json ON lineage_edge TYPE string DEFAULT '[]';
DEFINE FIELD IF NOT EXISTS first_seen ON lineage_edge TYPE string;
DEFINE FIELD IF NOT EXISTS last_seen ON lineage_edge TYPE string;

-- ============================================
-- MERGE LOG
-- ============================================

DEFINE TABLE IF NOT EXISTS merge_log SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS batch_id ON merge_log TYPE string;
DEFINE FIELD IF NOT EXISTS extractor ON merge_log TYPE string;
DEFINE FIELD IF NOT EXISTS run_id ON merge_log TYPE string;
DEFINE FIELD IF NOT EXISTS merged_at ON merge_log TYPE string;
DEFINE FIELD IF NOT EXISTS node_ids ON merge_log TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS edge_ids ON merge_log TYPE array<string> DEFAULT [];

-- ============================================
-- INDEXES
-- ============================================

DEFINE INDEX IF NOT EXISTS idx_node_id ON lineage_node FIELDS node_id UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_node_name ON lineage_node FIELDS name;
DEFINE INDEX IF NOT EXISTS idx_edge_id ON lineage_edge FIELDS edge_id UNIQUE;
DEFINE INDEX IF NOT EXISTS idx_edge_source ON lineage_edge FIELDS source_id;
DEFINE INDEX IF NOT EXISTS idx_edge_target ON lineage_edge FIELDS target_id;
DEFINE INDEX IF NOT EXISTS idx_merge_log_batch ON merge_log FIELDS batch_id UNIQUE;
"#;
