//! Static, named unions of entries across databases
//!
//! A snapshot is written once and never recomputed. It stays readable only
//! while every database it references still exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::fs::{read_json, write_atomic, write_json};
use crate::storage::registry::{new_id, EntityRecord, EntityRegistry, REGISTRY_FILE};
use crate::storage::xml::{decode_grouped, encode_grouped};
use crate::storage::{
    normalize_id, write_entries_csv, Database, DatabaseManager, Entry, IndexEntry, StorageError, StorageResult,
};
use crate::view::DatabaseView;

const INFO_FILE: &str = "snapshot.json";
const ENTRIES_FILE: &str = "snapshot.xml";
const ENTRIES_ROOT: &str = "Snapshot";

/// Provenance of one source view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotViewInfo {
    pub id: String,
    pub database_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub molecule_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotDatabaseInfo {
    pub id: String,
    pub name: String,
    pub molecule_count: usize,
}

/// Contents of `snapshot.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub views: Vec<SnapshotViewInfo>,
    pub databases: Vec<SnapshotDatabaseInfo>,
    pub total_molecule_count: usize,
    pub date_created: DateTime<Utc>,
}

/// Entries grouped by database, each group deduplicated by filename id
#[derive(Default)]
struct Union {
    groups: BTreeMap<String, (String, Vec<Entry>, HashSet<String>)>,
}

impl Union {
    /// Add entries of one database; returns how many were offered
    fn add(&mut self, database: &Database, entries: Vec<Entry>) -> usize {
        let offered = entries.len();
        let (_, kept, seen) = self
            .groups
            .entry(database.id().to_string())
            .or_insert_with(|| (database.name().to_string(), Vec::new(), HashSet::new()));
        for entry in entries {
            if seen.insert(normalize_id(&entry.filename_id)) {
                kept.push(entry);
            }
        }
        offered
    }

    fn into_parts(self) -> (Vec<SnapshotDatabaseInfo>, Vec<(String, Vec<Entry>)>) {
        let mut summaries = Vec::new();
        let mut groups = Vec::new();
        for (id, (name, mut entries, _)) in self.groups {
            entries.sort_by(|a, b| a.filename_id.cmp(&b.filename_id));
            summaries.push(SnapshotDatabaseInfo {
                id: id.clone(),
                name,
                molecule_count: entries.len(),
            });
            groups.push((id, entries));
        }
        (summaries, groups)
    }
}

pub struct DatabaseSnapshot {
    info: SnapshotInfo,
    dir: PathBuf,
    databases: DatabaseManager,
}

impl DatabaseSnapshot {
    /// Capture the current materialization of `views`
    pub fn create_from_views(
        dir: impl Into<PathBuf>,
        id: impl Into<String>,
        name: impl Into<String>,
        views: &[DatabaseView],
        databases: DatabaseManager,
    ) -> StorageResult<Self> {
        let mut union = Union::default();
        let mut view_infos = Vec::with_capacity(views.len());
        for view in views {
            let entries = view.snapshot()?;
            let count = union.add(view.database(), entries);
            view_infos.push(SnapshotViewInfo {
                id: view.id().to_string(),
                database_id: view.database_id().to_string(),
                name: view.name().to_string(),
                description: view.info().description.clone(),
                molecule_count: count,
            });
        }
        Self::write(dir.into(), id.into(), name.into(), view_infos, union, databases)
    }

    /// Capture an explicit entry list of one database
    pub fn create_from_entries(
        dir: impl Into<PathBuf>,
        id: impl Into<String>,
        name: impl Into<String>,
        database: &Database,
        entries: Vec<Entry>,
        databases: DatabaseManager,
    ) -> StorageResult<Self> {
        let mut union = Union::default();
        union.add(database, entries);
        Self::write(dir.into(), id.into(), name.into(), Vec::new(), union, databases)
    }

    fn write(
        dir: PathBuf,
        id: String,
        name: String,
        views: Vec<SnapshotViewInfo>,
        union: Union,
        databases: DatabaseManager,
    ) -> StorageResult<Self> {
        let (database_infos, groups) = union.into_parts();
        let info = SnapshotInfo {
            id,
            name,
            views,
            total_molecule_count: database_infos.iter().map(|d| d.molecule_count).sum(),
            databases: database_infos,
            date_created: Utc::now(),
        };

        fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(ENTRIES_FILE), &encode_grouped(ENTRIES_ROOT, &groups)?)?;
        write_json(&dir.join(INFO_FILE), &info)?;
        tracing::info!(
            snapshot = %info.id,
            databases = info.databases.len(),
            molecules = info.total_molecule_count,
            "Created snapshot"
        );
        Ok(Self { info, dir, databases })
    }

    pub fn open(dir: impl Into<PathBuf>, databases: DatabaseManager) -> StorageResult<Self> {
        let dir = dir.into();
        let info = read_json(&dir.join(INFO_FILE))?;
        Ok(Self { info, dir, databases })
    }

    pub fn info(&self) -> &SnapshotInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn missing_databases(&self) -> Vec<&str> {
        self.info
            .databases
            .iter()
            .filter(|d| !self.databases.exists_id(&d.id))
            .map(|d| d.id.as_str())
            .collect()
    }

    /// True only while every referenced database exists
    pub fn is_valid(&self) -> bool {
        self.missing_databases().is_empty()
    }

    /// Captured entries, grouped by database id
    pub fn snapshot(&self) -> StorageResult<Vec<(String, Vec<Entry>)>> {
        let missing = self.missing_databases();
        if !missing.is_empty() {
            return Err(StorageError::InvalidSnapshot(format!(
                "snapshot '{}' references deleted databases: {}",
                self.info.name,
                missing.join(", ")
            )));
        }
        let content = fs::read_to_string(self.dir.join(ENTRIES_FILE))?;
        decode_grouped(&content)
    }

    /// Write one CSV row per captured entry with its computed properties
    ///
    /// Properties come from the index version each entry was captured at.
    pub fn export_csv<W: Write>(&self, writer: W) -> StorageResult<usize> {
        let groups = self.snapshot()?;

        let mut resolved: Vec<(String, IndexEntry)> = Vec::new();
        for (database_id, entries) in &groups {
            let database = self.databases.get(database_id)?;
            let versions: BTreeSet<u32> = entries.iter().map(|e| e.version).collect();
            let mut by_version: HashMap<u32, HashMap<String, IndexEntry>> = HashMap::new();
            for version in versions {
                let index = database
                    .snapshot_at(version)?
                    .into_iter()
                    .filter(|e| e.version == version)
                    .map(|e| (e.filename_id.clone(), e))
                    .collect();
                by_version.insert(version, index);
            }

            for entry in entries {
                let found = by_version
                    .get_mut(&entry.version)
                    .and_then(|index| index.remove(&entry.filename_id))
                    .ok_or_else(|| {
                        StorageError::InvalidSnapshot(format!(
                            "entry '{}' version {} is missing from database '{}'",
                            entry.filename_id, entry.version, database_id
                        ))
                    })?;
                resolved.push((database_id.clone(), found));
            }
        }

        let rows: Vec<(&str, &IndexEntry)> = resolved.iter().map(|(id, e)| (id.as_str(), e)).collect();
        write_entries_csv(writer, &rows, true)
    }
}

/// Registry of snapshots under `<root>/snapshots`
#[derive(Clone)]
pub struct SnapshotManager {
    root: PathBuf,
    databases: DatabaseManager,
    registry: Arc<Mutex<EntityRegistry>>,
}

impl SnapshotManager {
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

    fn reserve(&self, registry: &EntityRegistry, name: &str) -> StorageResult<String> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument("snapshot name is empty".to_string()));
        }
        if registry.find_by_name(name, true).is_some() {
            return Err(StorageError::SnapshotExists(name.to_string()));
        }
        Ok(new_id())
    }

    fn register(&self, registry: &mut EntityRegistry, snapshot: &DatabaseSnapshot) -> StorageResult<()> {
        registry.insert(snapshot.id(), snapshot.name());
        registry.save(&self.root.join(REGISTRY_FILE))
    }

    pub fn create_from_views(&self, name: &str, views: &[DatabaseView]) -> StorageResult<DatabaseSnapshot> {
        if views.is_empty() {
            return Err(StorageError::InvalidArgument("a snapshot needs at least one view".to_string()));
        }
        let name = name.trim();
        let mut registry = self.registry();
        let id = self.reserve(&registry, name)?;
        let snapshot =
            DatabaseSnapshot::create_from_views(self.root.join(&id), &id, name, views, self.databases.clone())?;
        self.register(&mut registry, &snapshot)?;
        Ok(snapshot)
    }

    pub fn create_from_entries(
        &self,
        name: &str,
        database: &Database,
        entries: Vec<Entry>,
    ) -> StorageResult<DatabaseSnapshot> {
        let name = name.trim();
        let mut registry = self.registry();
        let id = self.reserve(&registry, name)?;
        let snapshot = DatabaseSnapshot::create_from_entries(
            self.root.join(&id),
            &id,
            name,
            database,
            entries,
            self.databases.clone(),
        )?;
        self.register(&mut registry, &snapshot)?;
        Ok(snapshot)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.registry().find_by_name(name, true).is_some()
    }

    pub fn get(&self, id: &str) -> StorageResult<DatabaseSnapshot> {
        if !self.registry().contains_id(id) {
            return Err(StorageError::SnapshotNotFound(id.to_string()));
        }
        DatabaseSnapshot::open(self.root.join(id), self.databases.clone())
    }

    /// Resolve an id, falling back to a name
    pub fn find(&self, id_or_name: &str) -> StorageResult<DatabaseSnapshot> {
        let id = {
            let registry = self.registry();
            registry
                .get(id_or_name)
                .or_else(|| registry.find_by_name(id_or_name, true))
                .map(|r| r.id.clone())
        };
        match id {
            Some(id) => self.get(&id),
            None => Err(StorageError::SnapshotNotFound(id_or_name.to_string())),
        }
    }

    pub fn records(&self) -> Vec<EntityRecord> {
        self.registry().all().to_vec()
    }

    pub fn list(&self) -> StorageResult<Vec<DatabaseSnapshot>> {
        let mut snapshots = self
            .records()
            .iter()
            .map(|r| self.get(&r.id))
            .collect::<StorageResult<Vec<_>>>()?;
        snapshots.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(snapshots)
    }

    pub fn delete(&self, id: &str) -> StorageResult<()> {
        let mut registry = self.registry();
        if registry.remove(id).is_none() {
            return Err(StorageError::SnapshotNotFound(id.to_string()));
        }
        registry.save(&self.root.join(REGISTRY_FILE))?;
        let dir = self.root.join(id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}
