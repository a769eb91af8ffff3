//! Registry of databases under `<root>/databases`

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::database::{Database, DatabaseContext, DatabaseInfo, LOCK_FILE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::registry::{resolve_id, EntityRecord, EntityRegistry, REGISTRY_FILE};

#[derive(Clone)]
pub struct DatabaseManager {
    root: PathBuf,
    ctx: Arc<DatabaseContext>,
    registry: Arc<Mutex<EntityRegistry>>,
}

impl DatabaseManager {
    pub fn new(root: impl Into<PathBuf>, ctx: Arc<DatabaseContext>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let registry = EntityRegistry::load(&root.join(REGISTRY_FILE))?;
        tracing::debug!(databases = registry.all().len(), "Loaded database registry");
        Ok(Self {
            root,
            ctx,
            registry: Arc::new(Mutex::new(registry)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> &Arc<DatabaseContext> {
        &self.ctx
    }

    fn registry(&self) -> MutexGuard<'_, EntityRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register and lay out a new, empty database
    pub fn create_database(
        &self,
        name: &str,
        custom_id: Option<&str>,
        description: Option<&str>,
    ) -> StorageResult<Database> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidArgument("database name is empty".to_string()));
        }
        let id = resolve_id(custom_id)?;

        let mut registry = self.registry();
        if registry.find_by_name(name, false).is_some() {
            return Err(StorageError::DatabaseExists(name.to_string()));
        }
        if registry.contains_id(&id) || self.root.join(&id).exists() {
            return Err(StorageError::InvalidArgument(format!(
                "the identifier '{}' is already in use",
                id
            )));
        }

        let info = DatabaseInfo::new(&id, name, description.unwrap_or_default());
        let db = Database::create(self.root.join(&id), info, Arc::clone(&self.ctx))?;

        registry.insert(id, name);
        registry.save(&self.root.join(REGISTRY_FILE))?;
        Ok(db)
    }

    /// Whether a database with exactly this name exists
    pub fn exists(&self, name: &str) -> bool {
        self.registry().find_by_name(name, false).is_some()
    }

    pub fn exists_id(&self, id: &str) -> bool {
        self.registry().contains_id(id)
    }

    pub fn get(&self, id: &str) -> StorageResult<Database> {
        if !self.exists_id(id) {
            return Err(StorageError::DatabaseNotFound(id.to_string()));
        }
        Database::open(self.root.join(id), Arc::clone(&self.ctx))
    }

    pub fn get_by_name(&self, name: &str) -> StorageResult<Database> {
        let id = self
            .registry()
            .find_by_name(name, false)
            .map(|r| r.id.clone())
            .ok_or_else(|| StorageError::DatabaseNotFound(name.to_string()))?;
        self.get(&id)
    }

    /// Resolve an id, falling back to a name
    pub fn find(&self, id_or_name: &str) -> StorageResult<Database> {
        if self.exists_id(id_or_name) {
            self.get(id_or_name)
        } else {
            self.get_by_name(id_or_name)
        }
    }

    pub fn records(&self) -> Vec<EntityRecord> {
        self.registry().all().to_vec()
    }

    /// All registered databases, sorted by name
    pub fn list(&self) -> StorageResult<Vec<Database>> {
        let mut databases = self
            .records()
            .iter()
            .map(|r| Database::open(self.root.join(&r.id), Arc::clone(&self.ctx)))
            .collect::<StorageResult<Vec<_>>>()?;
        databases.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(databases)
    }

    /// Remove a database with its history; refused while an update runs
    ///
    /// The update lock is held for the whole removal, so no update can
    /// start writing into a half-deleted directory.
    pub fn delete(&self, id: &str) -> StorageResult<()> {
        let mut registry = self.registry();
        if !registry.contains_id(id) {
            return Err(StorageError::DatabaseNotFound(id.to_string()));
        }

        let dir = self.root.join(id);
        let _guard = if dir.is_dir() {
            Some(self.ctx.locks.try_acquire(id, dir.join(LOCK_FILE))?)
        } else {
            None
        };

        registry.remove(id);
        registry.save(&self.root.join(REGISTRY_FILE))?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        tracing::info!(database = %id, "Deleted database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::indexer::tests::StubReader;
    use crate::storage::database::tests::{test_context, GatedReader};
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn manager(root: &Path) -> DatabaseManager {
        DatabaseManager::new(root.join("databases"), test_context(Arc::new(StubReader))).unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let root = tempdir().unwrap();
        let databases = manager(root.path());

        let db = databases.create_database("Ligands", Some("lig"), Some("small molecules")).unwrap();
        assert_eq!(db.id(), "lig");
        assert_eq!(db.info().description, "small molecules");

        assert!(databases.exists("Ligands"));
        assert!(!databases.exists("ligands"));
        assert!(databases.exists_id("lig"));
        assert_eq!(databases.get_by_name("Ligands").unwrap().id(), "lig");
        assert_eq!(databases.find("Ligands").unwrap().id(), "lig");

        let generated = databases.create_database("Proteins", None, None).unwrap();
        assert_eq!(generated.id().len(), 36);

        // registry survives a reload
        let reloaded = manager(root.path());
        let names: Vec<String> = reloaded.list().unwrap().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["Ligands", "Proteins"]);
    }

    #[test]
    fn test_duplicate_name_and_bad_id() {
        let root = tempdir().unwrap();
        let databases = manager(root.path());
        databases.create_database("Ligands", None, None).unwrap();

        assert!(matches!(
            databases.create_database("Ligands", None, None),
            Err(StorageError::DatabaseExists(_))
        ));
        assert!(matches!(
            databases.create_database("Other", Some("../x"), None),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete() {
        let root = tempdir().unwrap();
        let databases = manager(root.path());
        let db = databases.create_database("Ligands", Some("lig"), None).unwrap();

        databases.delete("lig").unwrap();
        assert!(!db.exists());
        assert!(!databases.exists_id("lig"));
        assert!(matches!(databases.get("lig"), Err(StorageError::DatabaseNotFound(_))));
        assert!(matches!(databases.delete("lig"), Err(StorageError::DatabaseNotFound(_))));
    }

    #[test]
    fn test_delete_waits_for_running_update() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.pdb"), "x").unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let reader = GatedReader {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let databases = DatabaseManager::new(root.path().join("databases"), test_context(Arc::new(reader))).unwrap();
        let db = databases.create_database("Gated", Some("gated"), None).unwrap();

        std::thread::scope(|scope| {
            let update = scope.spawn(|| db.update_from_folder(&src));
            entered_rx.recv().unwrap();
            assert!(matches!(databases.delete("gated"), Err(StorageError::Locked(_))));
            assert!(databases.exists_id("gated"));
            release_tx.send(()).unwrap();
            update.join().unwrap().unwrap();
        });

        databases.delete("gated").unwrap();
        assert!(!db.dir().exists());

        // a stale handle cannot resurrect the directory
        assert!(matches!(db.update_from_folder(&src), Err(StorageError::DatabaseNotFound(_))));
        assert!(!db.dir().exists());
        databases.create_database("Gated", Some("gated"), None).unwrap();
    }
}
