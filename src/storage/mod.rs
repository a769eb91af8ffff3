//! moldb Storage
//!
//! Persistence for databases and their versioned indexes:
//!
//! - **entry**: `Entry` / `IndexEntry` and the typed property bag
//! - **xml**: on-disk documents for index snapshots, views and snapshots
//! - **store**: append-only, version-numbered index snapshots
//! - **stats**: database and view statistics
//! - **export**: CSV export of entries with their properties
//! - **lock**: per-database update lock
//! - **database**: one collection, orchestrating indexer and store on update
//! - **manager**: registry of databases
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Update path:
//!   lock → Indexer (diff + parallel compute) → index_<v+1>.xml → stats.json → unlock
//!
//! Read path:
//!   stats.json (version) → index_<version>.xml → entries
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use moldb::{Catalog, Config};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::open(&Config::load_default())?;
//!     let db = catalog.databases().create_database("Ligands", None, None)?;
//!
//!     let result = db.update_from_folder(Path::new("./structures"))?;
//!     println!("added {}, errors {}", result.counts.num_added, result.counts.num_error);
//!
//!     for entry in db.current_snapshot()? {
//!         println!("{} {} atoms", entry.filename(), entry.atom_count());
//!     }
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod entry;
pub mod error;
pub mod export;
pub mod fs;
pub mod lock;
pub mod manager;
pub mod registry;
pub mod stats;
pub mod store;
pub mod xml;

// Re-export commonly used types
pub use database::{Database, DatabaseContext, DatabaseInfo, UpdateResult, DEFAULT_VIEW_DESCRIPTION};
pub use entry::{
    average_atom_count, keys, normalize_id, system_time_to_ticks, Entry, IndexEntry, PropertyBag,
    PropertyValue, VALUE_SEPARATOR,
};
pub use error::{StorageError, StorageResult};
pub use export::write_entries_csv;
pub use lock::{LockRegistry, LockState, UpdateGuard};
pub use manager::DatabaseManager;
pub use registry::EntityRecord;
pub use stats::{DatabaseStatistics, ViewStatistics};
pub use store::{SnapshotStore, XmlSnapshotStore};
