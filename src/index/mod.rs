//! moldb Indexer
//!
//! Turns a folder of structure files into index entries:
//!
//! - **metadata**: `StructureReader` collaborator and a basic line reader
//! - **change**: New / Modified / AlreadyPresent classification
//! - **indexer**: worker pool feeding a bounded queue and a single consumer
//! - **staging**: copies awaiting promotion into a database's `data/`
//! - **audit**: per-update run log and CSV audit
//!
//! # Architecture
//!
//! ```text
//! source folder ──► diff against previous entries ──► jobs
//!        jobs ──► workers (copy to staging, compute metadata) ──► bounded queue
//!        queue ──► consumer (counters, entries, audit CSV, run log)
//! ```

pub mod audit;
pub mod change;
pub mod indexer;
pub mod metadata;
pub mod staging;

pub use audit::{AuditLog, RunLog, UpdateLogs};
pub use change::{detect_change, files_equal, ChangeKind, SourceInfo};
pub use indexer::{IndexAction, IndexCounts, IndexRecord, Indexer, IndexerOutput};
pub use metadata::{BasicStructureReader, ParseError, StructureMetadata, StructureReader, StructureType};
pub use staging::StagingArea;
