//! Catalog: the root object tying databases, views and snapshots together
//!
//! ```text
//! <root>/databases/index.json, <id>/...
//! <root>/views/index.json, <id>/...
//! <root>/snapshots/index.json, <id>/...
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::index::{BasicStructureReader, StructureReader};
use crate::storage::{DatabaseContext, DatabaseManager, StorageResult};
use crate::view::{SnapshotManager, ViewManager};

pub struct Catalog {
    root: PathBuf,
    databases: DatabaseManager,
    views: ViewManager,
    snapshots: SnapshotManager,
}

impl Catalog {
    /// Open the catalog at `config.storage.root_dir` with the basic structure reader
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_with_reader(config, Arc::new(BasicStructureReader))
    }

    pub fn open_with_reader(config: &Config, reader: Arc<dyn StructureReader>) -> StorageResult<Self> {
        let root = config.storage.root_dir.clone();
        let ctx = Arc::new(DatabaseContext::new(reader, config.indexer.clone()));

        let databases = DatabaseManager::new(root.join("databases"), ctx)?;
        let views = ViewManager::new(root.join("views"), databases.clone())?;
        let snapshots = SnapshotManager::new(root.join("snapshots"), databases.clone())?;

        let removed = views.ensure_consistent()?;
        if removed > 0 {
            tracing::warn!(removed, "Removed views of deleted databases");
        }
        tracing::debug!(root = %root.display(), "Opened catalog");

        Ok(Self {
            root,
            databases,
            views,
            snapshots,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn databases(&self) -> &DatabaseManager {
        &self.databases
    }

    pub fn views(&self) -> &ViewManager {
        &self.views
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Delete a database and every view defined over it
    ///
    /// Snapshots are kept; they report themselves invalid from now on.
    pub fn delete_database(&self, id: &str) -> StorageResult<()> {
        self.databases.delete(id)?;
        self.views.ensure_consistent()?;
        Ok(())
    }
}
