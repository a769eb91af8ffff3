//! Registry of custom views under `<root>/views`

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::query::{compile_filters, EntryFilter};
use crate::storage::fs::read_json;
use crate::storage::registry::{new_id, EntityRecord, EntityRegistry, REGISTRY_FILE};
use crate::storage::{DatabaseManager, StorageError, StorageResult};
use crate::view::database_view::{sort_filters, DatabaseView, ViewInfo};

/// Changes applied by [`ViewManager::update`]
#[derive(Debug, Clone, Default)]
pub struct ViewUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub filters: Option<Vec<EntryFilter>>,
}

#[derive(Clone)]
pub struct ViewManager {
    root: PathBuf,
    databases: DatabaseManager,
    registry: Arc<Mutex<EntityRegistry>>,
}

impl ViewManager {
    pub fn new(root: impl Into<PathBuf>, databases: DatabaseManager) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let registry = EntityRegistry::load(&root.join(REGISTRY_FILE))?;
        Ok(Self {
            root,
            databases,
            registry: Arc::new(Mutex::new(registry)),
        })
    }

    fn registry(&self) -> MutexGuard<'_, EntityRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save_registry(&self, registry: &EntityRegistry) -> StorageResult<()> {
        registry.save(&self.root.join(REGISTRY_FILE))
    }

    fn check_name(&self, registry: &EntityRegistry, name: &str, database_name: &str) -> StorageResult<()> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument("view name is empty".to_string()));
        }
        if registry.find_by_name(name, true).is_some() || name.eq_ignore_ascii_case(database_name) {
            return Err(StorageError::ViewExists(name.to_string()));
        }
        Ok(())
    }

    /// Define a new view over `database_id`
    pub fn create_view(
        &self,
        database_id: &str,
        name: &str,
        description: Option<&str>,
        mut filters: Vec<EntryFilter>,
    ) -> StorageResult<DatabaseView> {
        let database = self.databases.get(database_id)?;
        let name = name.trim();
        compile_filters(&filters)?;
        sort_filters(&mut filters);

        let mut registry = self.registry();
        self.check_name(&registry, name, database.name())?;

        let id = new_id();
        let info = ViewInfo::new(&id, database_id, name, description.unwrap_or_default(), filters);
        let view = DatabaseView::create(self.root.join(&id), info, database)?;

        registry.insert(id, name);
        self.save_registry(&registry)?;
        tracing::info!(view = %view.id(), name = %name, database = %database_id, "Created view");
        Ok(view)
    }

    /// Whether a view with this name exists (case-insensitive)
    pub fn exists(&self, name: &str) -> bool {
        self.registry().find_by_name(name, true).is_some()
    }

    fn read_info(&self, id: &str) -> StorageResult<ViewInfo> {
        read_json(&self.root.join(id).join("view.json"))
    }

    pub fn get(&self, id: &str) -> StorageResult<DatabaseView> {
        if !self.registry().contains_id(id) {
            return Err(StorageError::ViewNotFound(id.to_string()));
        }
        let info = self.read_info(id)?;
        let database = self.databases.get(&info.database_id).map_err(|e| match e {
            StorageError::DatabaseNotFound(_) => StorageError::InvalidView(format!(
                "the database '{}' of view '{}' no longer exists",
                info.database_id, info.name
            )),
            other => other,
        })?;
        DatabaseView::open(self.root.join(id), database)
    }

    pub fn get_by_name(&self, name: &str) -> StorageResult<DatabaseView> {
        let id = self
            .registry()
            .find_by_name(name, true)
            .map(|r| r.id.clone())
            .ok_or_else(|| StorageError::ViewNotFound(name.to_string()))?;
        self.get(&id)
    }

    /// Resolve an id, falling back to a name
    pub fn find(&self, id_or_name: &str) -> StorageResult<DatabaseView> {
        if self.registry().contains_id(id_or_name) {
            self.get(id_or_name)
        } else {
            self.get_by_name(id_or_name)
        }
    }

    pub fn records(&self) -> Vec<EntityRecord> {
        self.registry().all().to_vec()
    }

    /// All views with a live database, sorted by name
    pub fn list(&self) -> StorageResult<Vec<DatabaseView>> {
        let mut views = Vec::new();
        for record in self.records() {
            match self.get(&record.id) {
                Ok(view) => views.push(view),
                Err(StorageError::InvalidView(msg)) => {
                    tracing::warn!(view = %record.id, "Skipping invalid view: {}", msg)
                }
                Err(e) => return Err(e),
            }
        }
        views.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(views)
    }

    /// Rename, redescribe or refilter a view
    pub fn update(&self, id: &str, update: ViewUpdate) -> StorageResult<DatabaseView> {
        let mut view = self.get(id)?;
        let mut registry = self.registry();

        let name = match update.name {
            Some(name) => {
                let name = name.trim().to_string();
                if !name.eq_ignore_ascii_case(view.name()) {
                    self.check_name(&registry, &name, view.database().name())?;
                }
                Some(name)
            }
            None => None,
        };

        view.apply(name.clone(), update.description, update.filters)?;
        if let Some(name) = name {
            registry.rename(id, name);
            self.save_registry(&registry)?;
        }
        Ok(view)
    }

    pub fn delete(&self, id: &str) -> StorageResult<()> {
        let mut registry = self.registry();
        if registry.remove(id).is_none() {
            return Err(StorageError::ViewNotFound(id.to_string()));
        }
        self.save_registry(&registry)?;
        remove_dir_if_present(&self.root.join(id))?;
        tracing::info!(view = %id, "Deleted view");
        Ok(())
    }

    /// Delete views whose database no longer exists; returns how many were removed
    pub fn ensure_consistent(&self) -> StorageResult<usize> {
        let mut registry = self.registry();
        let mut orphaned = Vec::new();
        for record in registry.all() {
            let database_id = match self.read_info(&record.id) {
                Ok(info) => Some(info.database_id),
                Err(StorageError::Io(_)) => None,
                Err(e) => return Err(e),
            };
            let alive = database_id
                .map(|id| self.databases.exists_id(&id))
                .unwrap_or(false);
            if !alive {
                orphaned.push(record.id.clone());
            }
        }

        for id in &orphaned {
            registry.remove(id);
            remove_dir_if_present(&self.root.join(id))?;
            tracing::warn!(view = %id, "Removed view of a deleted database");
        }
        if !orphaned.is_empty() {
            self.save_registry(&registry)?;
        }
        Ok(orphaned.len())
    }
}

fn remove_dir_if_present(dir: &Path) -> StorageResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::indexer::tests::StubReader;
    use crate::query::{EntryFilter, FilterComparisonType, FilterPropertyType};
    use crate::storage::database::tests::test_context;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, DatabaseManager, ViewManager) {
        let root = tempdir().unwrap();
        let databases =
            DatabaseManager::new(root.path().join("databases"), test_context(Arc::new(StubReader))).unwrap();
        let views = ViewManager::new(root.path().join("views"), databases.clone()).unwrap();
        (root, databases, views)
    }

    #[test]
    fn test_create_view_rules() {
        let (_root, databases, views) = setup();
        let db = databases.create_database("Ligands", Some("lig"), None).unwrap();

        let filters = vec![
            EntryFilter::int("SizeInBytes", FilterComparisonType::NumberLess, 1000),
            EntryFilter::int("AtomCount", FilterComparisonType::NumberGreater, 3),
        ];
        let view = views.create_view(db.id(), "Small", Some("tiny ones"), filters).unwrap();
        assert_eq!(view.info().filters[0].property_name, "AtomCount");
        assert!(views.exists("SMALL"));

        assert!(matches!(
            views.create_view(db.id(), "small", None, Vec::new()),
            Err(StorageError::ViewExists(_))
        ));
        assert!(matches!(
            views.create_view(db.id(), "ligands", None, Vec::new()),
            Err(StorageError::ViewExists(_))
        ));
        assert!(matches!(
            views.create_view("missing", "Other", None, Vec::new()),
            Err(StorageError::DatabaseNotFound(_))
        ));

        let bad = EntryFilter::new(
            "AtomCount",
            FilterPropertyType::Int,
            FilterComparisonType::StringEqual,
            "5",
        );
        assert!(matches!(
            views.create_view(db.id(), "Bad", None, vec![bad]),
            Err(StorageError::Filter(_))
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let (_root, databases, views) = setup();
        let db = databases.create_database("Ligands", None, None).unwrap();
        let view = views.create_view(db.id(), "Small", None, Vec::new()).unwrap();
        let id = view.id().to_string();

        let updated = views
            .update(
                &id,
                ViewUpdate {
                    name: Some("Tiny".to_string()),
                    description: Some("below ten atoms".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name(), "Tiny");
        assert_eq!(views.get_by_name("tiny").unwrap().info().description, "below ten atoms");

        views.delete(&id).unwrap();
        assert!(matches!(views.get(&id), Err(StorageError::ViewNotFound(_))));
    }

    #[test]
    fn test_ensure_consistent_removes_orphans() {
        let (_root, databases, views) = setup();
        let a = databases.create_database("A", None, None).unwrap();
        let b = databases.create_database("B", None, None).unwrap();
        let va = views.create_view(a.id(), "over a", None, Vec::new()).unwrap();
        views.create_view(b.id(), "over b", None, Vec::new()).unwrap();

        databases.delete(a.id()).unwrap();
        assert!(matches!(views.get(va.id()), Err(StorageError::InvalidView(_))));
        assert_eq!(views.list().unwrap().len(), 1);

        assert_eq!(views.ensure_consistent().unwrap(), 1);
        assert!(!va.dir().exists());
        assert!(!views.exists("over a"));
        assert!(views.exists("over b"));
    }
}
