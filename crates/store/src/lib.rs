//! Graph storage for the lineage engine
//!
//! [`GraphStore`] is the seam between the engine and a concrete graph
//! representation. [`MemoryGraphStore`] serves queries; SurrealDB keeps
//! snapshots of it between runs.

pub mod adapter;
pub mod error;
pub mod memory;
pub mod repository;
pub mod schema;
pub mod shared;

pub use adapter::{Direction, GraphStore, Neighbor, Neighbors, RelationshipFilter};
pub use error::{Result, StoreError};
pub use memory::MemoryGraphStore;
pub use repository::{Repository, Snapshot};
pub use shared::SharedGraph;

#[cfg(feature = "rocksdb")]
use std::path::Path;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;

/// Database connection type
pub type DbConnection = Surreal<Db>;

/// Initialize database with RocksDB (persistent)
#[cfg(feature = "rocksdb")]
pub async fn init_persistent(path: impl AsRef<Path>) -> Result<DbConnection> {
    use surrealdb::engine::local::RocksDb;

    let db = Surreal::new::<RocksDb>(path.as_ref()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Initialize database in-memory (for testing)
pub async fn init_memory() -> Result<DbConnection> {
    let db = Surreal::new::<Mem>(()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Setup database namespace, database, and schema
async fn setup_database(db: &DbConnection) -> Result<()> {
    db.use_ns("lineage").use_db("graph").await?;
    schema::initialize_schema(db).await?;
    Ok(())
}
