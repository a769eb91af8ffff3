//! # moldb
//!
//! Molecule database: versioned indexing of structure-file folders, filtered
//! views and reproducible cross-database snapshots.
//!
//! ## Features
//!
//! - **Incremental updates**: size, timestamp and content checks decide which files to recompute
//! - **Parallel indexing**: worker pool with a bounded result queue
//! - **History**: one immutable index file per version, never rewritten
//! - **Cached views**: filtered projections recomputed only when their database moves on
//! - **Snapshots**: static unions of views, valid while their databases exist
//!
//! ## Modules
//!
//! - [`storage`]: Databases, versioned index store, statistics and locks
//! - [`index`]: Change detection and the parallel indexer
//! - [`query`]: Declarative entry filters and the string filter language
//! - [`view`]: Views, view registry and snapshots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moldb::query::{EntryFilter, FilterComparisonType};
//! use moldb::{Catalog, Config};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::open(&Config::load_default())?;
//!
//!     // Register and fill a database
//!     let db = catalog.databases().create_database("PDB subset", None, None)?;
//!     let result = db.update_from_folder(Path::new("./pdb"))?;
//!     println!("version {} with {} molecules", result.version, result.molecule_count);
//!
//!     // Define a view over it
//!     let large = catalog.views().create_view(
//!         db.id(),
//!         "Large",
//!         None,
//!         vec![EntryFilter::int("AtomCount", FilterComparisonType::NumberGreater, 5000)],
//!     )?;
//!     println!("{} large structures", large.snapshot()?.len());
//!
//!     // Freeze it for later
//!     catalog.snapshots().create_from_views("large-2024", &[large])?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod index;
pub mod logging;
pub mod query;
pub mod storage;
pub mod view;

// Re-export top-level types for convenience
pub use catalog::Catalog;

pub use config::{generate_default_config, Config, ConfigError, IndexerConfig, LoggingConfig};

pub use storage::{
    Database, DatabaseManager, DatabaseStatistics, Entry, IndexEntry, StorageError, StorageResult,
    UpdateResult,
};

pub use index::{BasicStructureReader, IndexAction, StructureReader, StructureType};

pub use query::{EntryFilter, FilterComparisonType, FilterPropertyType, QueryError};

pub use view::{DatabaseSnapshot, DatabaseView, SnapshotManager, ViewManager, ViewUpdate};
