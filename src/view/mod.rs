//! Views and snapshots
//!
//! - **database_view**: named, cached, filtered projection of one database
//! - **manager**: registry of custom views
//! - **snapshot**: static union of view contents across databases
//!
//! A view is recomputed lazily: reading it compares its cached version with
//! the database's and only re-filters the full index when they differ.

pub mod database_view;
pub mod manager;
pub mod snapshot;

pub use database_view::{sort_filters, DatabaseView, ViewInfo};
pub use manager::{ViewManager, ViewUpdate};
pub use snapshot::{DatabaseSnapshot, SnapshotDatabaseInfo, SnapshotInfo, SnapshotManager, SnapshotViewInfo};
