//! Database: one structure collection with its versioned index
//!
//! # Layout
//!
//! ```text
//! <db>/database.json        Id, Name, Description, DateCreated
//! <db>/stats.json           DatabaseStatistics
//! <db>/lock.json            {"IsLocked": bool}
//! <db>/data/                stored copies, <filename_id><ext>
//! <db>/index/index_<v>.xml  one immutable snapshot per version
//! <db>/index/log_<n>.txt    run log of update attempt n
//! <db>/index/updateindex_<n>.csv
//! <db>/view/                default view over the whole database
//! ```
//!
//! # Update sequence
//!
//! ```text
//! lock → read stats + previous snapshot → index into staging/
//!      → [modified] write index_<v+1>.xml → write stats.json → promote staging/ into data/
//!      → [unchanged] write stats.json (update count only)
//!      → release lock
//! ```
//!
//! The snapshot is written before the statistics, so a reader never sees a
//! version whose file is missing. Any failure before the stats write leaves
//! the previous version authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::IndexerConfig;
use crate::index::staging::remove_retired;
use crate::index::{IndexCounts, Indexer, StagingArea, StructureReader, UpdateLogs};
use crate::query::{compile_filters, matches_all, EntryFilter};
use crate::storage::entry::IndexEntry;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fs::{read_json, write_json};
use crate::storage::lock::{LockRegistry, LockState, UpdateGuard};
use crate::storage::stats::DatabaseStatistics;
use crate::storage::store::{sort_entries, SnapshotStore, XmlSnapshotStore};
use crate::view::{DatabaseView, ViewInfo};

const INFO_FILE: &str = "database.json";
const STATS_FILE: &str = "stats.json";
pub(crate) const LOCK_FILE: &str = "lock.json";
const DATA_DIR: &str = "data";
const INDEX_DIR: &str = "index";
const STAGING_DIR: &str = "staging";
const DEFAULT_VIEW_DIR: &str = "view";

/// Description of the default view
pub const DEFAULT_VIEW_DESCRIPTION: &str = "Entire database.";

/// Shared collaborators of every database in a catalog
#[derive(Clone)]
pub struct DatabaseContext {
    pub locks: Arc<LockRegistry>,
    pub reader: Arc<dyn StructureReader>,
    pub indexer: IndexerConfig,
}

impl DatabaseContext {
    pub fn new(reader: Arc<dyn StructureReader>, indexer: IndexerConfig) -> Self {
        Self {
            locks: LockRegistry::new(),
            reader,
            indexer,
        }
    }
}

/// Persisted database metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub date_created: DateTime<Utc>,
}

impl DatabaseInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            date_created: Utc::now(),
        }
    }
}

/// Outcome of one update attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateResult {
    pub is_modified: bool,
    #[serde(flatten)]
    pub counts: IndexCounts,
    /// Database version after the update
    pub version: u32,
    pub molecule_count: usize,
}

enum UpdateSource<'a> {
    Folder(&'a Path),
    Existing,
}

/// Handle to one database directory
#[derive(Clone)]
pub struct Database {
    info: DatabaseInfo,
    dir: PathBuf,
    store: XmlSnapshotStore,
    ctx: Arc<DatabaseContext>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("info", &self.info)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Database {
    /// Create the directory layout, empty statistics and the default view
    pub fn create(dir: impl Into<PathBuf>, info: DatabaseInfo, ctx: Arc<DatabaseContext>) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join(DATA_DIR))?;
        std::fs::create_dir_all(dir.join(INDEX_DIR))?;

        let db = Self {
            store: XmlSnapshotStore::new(dir.join(INDEX_DIR)),
            info,
            dir,
            ctx,
        };
        DatabaseStatistics::default().save(&db.stats_path())?;
        LockState::default().save(&db.lock_path())?;

        let view_info = ViewInfo::new(
            db.info.id.clone(),
            db.info.id.clone(),
            db.info.name.clone(),
            DEFAULT_VIEW_DESCRIPTION,
            Vec::new(),
        );
        DatabaseView::create(db.dir.join(DEFAULT_VIEW_DIR), view_info, db.clone())?;

        // written last: its presence marks a complete database
        write_json(&db.dir.join(INFO_FILE), &db.info)?;
        info!(database = %db.info.id, name = %db.info.name, "Created database");
        Ok(db)
    }

    /// Open an existing database directory
    pub fn open(dir: impl Into<PathBuf>, ctx: Arc<DatabaseContext>) -> StorageResult<Self> {
        let dir = dir.into();
        let info_path = dir.join(INFO_FILE);
        if !info_path.exists() {
            return Err(StorageError::DatabaseNotFound(dir.display().to_string()));
        }
        let info: DatabaseInfo = read_json(&info_path)?;
        Ok(Self {
            store: XmlSnapshotStore::new(dir.join(INDEX_DIR)),
            info,
            dir,
            ctx,
        })
    }

    pub fn info(&self) -> &DatabaseInfo {
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

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.dir.join(INDEX_DIR)
    }

    fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Take the update lock; fails if another update holds it or the database is gone
    pub(crate) fn lock(&self) -> StorageResult<UpdateGuard> {
        if !self.exists() {
            return Err(StorageError::DatabaseNotFound(self.info.id.clone()));
        }
        let guard = self
            .ctx
            .locks
            .try_acquire(&self.info.id, self.lock_path())
            .map_err(|e| match e {
                StorageError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                    StorageError::DatabaseNotFound(self.info.id.clone())
                }
                other => other,
            })?;
        // a delete may have completed between the check and the acquisition
        if !self.exists() {
            return Err(StorageError::DatabaseNotFound(self.info.id.clone()));
        }
        Ok(guard)
    }

    /// Whether the database still exists on disk
    pub fn exists(&self) -> bool {
        self.dir.join(INFO_FILE).exists()
    }

    pub fn is_locked(&self) -> bool {
        self.ctx.locks.is_locked(&self.info.id)
    }

    pub fn statistics(&self) -> StorageResult<DatabaseStatistics> {
        DatabaseStatistics::load(&self.stats_path())
    }

    /// Entries of the current version
    pub fn current_snapshot(&self) -> StorageResult<Vec<IndexEntry>> {
        let stats = self.statistics()?;
        self.store.read(stats.version)
    }

    /// Entries as of `version`
    pub fn snapshot_at(&self, version: u32) -> StorageResult<Vec<IndexEntry>> {
        self.store.read(version)
    }

    /// Versions with a snapshot on disk, ascending
    pub fn history(&self) -> StorageResult<Vec<u32>> {
        self.store.versions()
    }

    /// Current entries passing every filter
    pub fn filter(&self, filters: &[EntryFilter]) -> StorageResult<Vec<IndexEntry>> {
        let compiled = compile_filters(filters)?;
        Ok(self
            .current_snapshot()?
            .into_iter()
            .filter(|e| matches_all(&compiled, e))
            .collect())
    }

    /// The view over the whole database
    pub fn default_view(&self) -> StorageResult<DatabaseView> {
        DatabaseView::open(self.dir.join(DEFAULT_VIEW_DIR), self.clone())
    }

    /// Ingest the structure files of `folder`
    pub fn update_from_folder(&self, folder: &Path) -> StorageResult<UpdateResult> {
        self.run_update(UpdateSource::Folder(folder), None)
    }

    /// Like [`Database::update_from_folder`], reporting each visited file
    pub fn update_from_folder_with_progress(
        &self,
        folder: &Path,
        progress: &dyn Fn(&str),
    ) -> StorageResult<UpdateResult> {
        self.run_update(UpdateSource::Folder(folder), Some(progress))
    }

    /// Recompute every entry from the stored copies
    pub fn reindex(&self) -> StorageResult<UpdateResult> {
        self.run_update(UpdateSource::Existing, None)
    }

    fn run_update(&self, source: UpdateSource<'_>, progress: Option<&dyn Fn(&str)>) -> StorageResult<UpdateResult> {
        if let UpdateSource::Folder(folder) = source {
            if !folder.is_dir() {
                return Err(StorageError::InvalidArgument(format!(
                    "'{}' is not a directory",
                    folder.display()
                )));
            }
        }

        let _guard = self.lock()?;

        let mut stats = self.statistics()?;
        let previous = self.store.read(stats.version)?;
        let previous_files: Vec<String> = previous.iter().map(IndexEntry::filename).collect();
        let update_number = stats.update_count + 1;
        debug!(
            database = %self.info.id,
            version = stats.version,
            entries = previous.len(),
            update = update_number,
            "Starting update"
        );

        let mut logs = UpdateLogs::create(
            &self.index_dir(),
            update_number,
            self.ctx.indexer.max_reported_errors,
        )?;
        // counted before indexing so a failed attempt keeps its own log files
        stats.update_count = update_number;
        stats.save(&self.stats_path())?;

        let staging = StagingArea::create(self.dir.join(STAGING_DIR))?;
        let data_dir = self.data_dir();
        let indexer = Indexer::new(
            self.ctx.reader.as_ref(),
            &self.ctx.indexer,
            &data_dir,
            staging.path(),
            stats.version + 1,
            previous,
        );

        let from_folder = matches!(source, UpdateSource::Folder(_));
        let output = match source {
            UpdateSource::Folder(folder) => indexer.index_folder(folder, &mut logs, progress)?,
            UpdateSource::Existing => indexer.reindex(&mut logs, progress)?,
        };

        if output.is_modified {
            let version = stats.version + 1;
            let mut entries = output.entries;
            sort_entries(&mut entries);

            self.store.save(version, &entries)?;
            stats.refresh_from(&entries);
            stats.version = version;
            stats.save(&self.stats_path())?;
            staging.promote(&output.staged, &data_dir)?;

            // a re-index has no source copy to restore a dropped file from
            if from_folder {
                let current: HashSet<String> = entries.iter().map(IndexEntry::filename).collect();
                let retired: Vec<String> = previous_files
                    .into_iter()
                    .filter(|f| !current.contains(f))
                    .collect();
                remove_retired(&data_dir, &retired)?;
            }
        }
        logs.finish()?;

        info!(
            database = %self.info.id,
            modified = output.is_modified,
            added = output.counts.num_added,
            changed = output.counts.num_modified,
            removed = output.counts.num_removed,
            updated = output.counts.num_updated,
            errors = output.counts.num_error,
            version = stats.version,
            "Update finished in {:.1}s",
            output.elapsed.as_secs_f64()
        );

        Ok(UpdateResult {
            is_modified: output.is_modified,
            counts: output.counts,
            version: stats.version,
            molecule_count: stats.molecule_count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::metadata::{ParseError, StructureMetadata, StructureType};
    use crate::index::indexer::tests::StubReader;
    use std::fs;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    pub(crate) fn test_context(reader: Arc<dyn StructureReader>) -> Arc<DatabaseContext> {
        let config = IndexerConfig {
            workers: 4,
            queue_capacity: 4,
            ..IndexerConfig::default()
        };
        Arc::new(DatabaseContext::new(reader, config))
    }

    fn setup() -> (TempDir, Database) {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        let db = Database::create(
            root.path().join("db"),
            DatabaseInfo::new("db1", "Ligands", ""),
            test_context(Arc::new(StubReader)),
        )
        .unwrap();
        (root, db)
    }

    fn write_source(root: &TempDir, name: &str, atoms: usize) {
        fs::write(root.path().join("src").join(name), format!("atoms={}", atoms)).unwrap();
    }

    #[test]
    fn test_create_layout() {
        let (_root, db) = setup();
        assert!(db.exists());
        assert!(db.data_dir().is_dir());
        assert!(db.index_dir().is_dir());
        assert!(!LockState::load(&db.lock_path()).unwrap().is_locked);
        assert_eq!(db.statistics().unwrap(), DatabaseStatistics::default());
        assert!(db.current_snapshot().unwrap().is_empty());

        let view = db.default_view().unwrap();
        assert_eq!(view.name(), "Ligands");
        assert_eq!(view.info().description, DEFAULT_VIEW_DESCRIPTION);
    }

    #[test]
    fn test_update_is_idempotent() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 10);
        write_source(&root, "b.pdb", 21);

        let first = db.update_from_folder(&root.path().join("src")).unwrap();
        assert!(first.is_modified);
        assert_eq!(first.counts.num_added, 2);
        assert_eq!(first.version, 1);

        let stats = db.statistics().unwrap();
        assert_eq!(stats.molecule_count, 2);
        assert_eq!(stats.average_atom_count, 16);
        assert!(db.data_dir().join("a.pdb").exists());
        assert!(!db.dir().join("staging").exists());

        let second = db.update_from_folder(&root.path().join("src")).unwrap();
        assert!(!second.is_modified);
        assert_eq!(second.counts.num_unchanged, 2);
        assert_eq!(second.version, 1);

        let stats = db.statistics().unwrap();
        assert_eq!(stats.version, 1);
        assert_eq!(stats.update_count, 2);
        assert!(db.index_dir().join("log_2.txt").exists());
        assert!(db.index_dir().join("updateindex_2.csv").exists());
        assert_eq!(db.history().unwrap(), vec![1]);
    }

    #[test]
    fn test_snapshot_content_is_deterministic() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for i in 0..40 {
            fs::write(src.join(format!("s{:02}.pdb", i)), format!("atoms={}", i + 1)).unwrap();
        }

        let mut contents = Vec::new();
        for name in ["one", "two"] {
            let db = Database::create(
                root.path().join(name),
                DatabaseInfo::new(name, name, ""),
                test_context(Arc::new(StubReader)),
            )
            .unwrap();
            db.update_from_folder(&src).unwrap();
            contents.push(fs::read(db.index_dir().join("index_1.xml")).unwrap());
        }
        assert_eq!(contents[0], contents[1]);
    }

    #[test]
    fn test_partial_failure() {
        let (root, db) = setup();
        for i in 0..10 {
            write_source(&root, &format!("m{}.pdb", i), 5);
        }
        fs::write(root.path().join("src/notes.txt"), "x").unwrap();
        fs::write(root.path().join("src/image.png"), "x").unwrap();

        let result = db.update_from_folder(&root.path().join("src")).unwrap();
        assert_eq!(result.counts.num_error, 2);
        assert_eq!(result.counts.num_added, 10);
        assert_eq!(result.molecule_count, 10);
        assert_eq!(db.current_snapshot().unwrap().len(), 10);
    }

    #[test]
    fn test_modified_and_removed() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 1);
        write_source(&root, "b.pdb", 2);
        db.update_from_folder(&root.path().join("src")).unwrap();

        write_source(&root, "a.pdb", 1000);
        fs::remove_file(root.path().join("src/b.pdb")).unwrap();

        let result = db.update_from_folder(&root.path().join("src")).unwrap();
        assert_eq!(result.counts.num_modified, 1);
        assert_eq!(result.counts.num_removed, 1);
        assert_eq!(result.version, 2);

        let entries = db.current_snapshot().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, 2);
        assert_eq!(entries[0].atom_count(), 1000);
        assert_eq!(fs::read_to_string(db.data_dir().join("a.pdb")).unwrap(), "atoms=1000");
        assert!(!db.data_dir().join("b.pdb").exists());

        // history is retained unchanged
        assert_eq!(db.snapshot_at(1).unwrap().len(), 2);
        assert_eq!(db.history().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_extension_change_replaces_data_file() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 4);
        db.update_from_folder(&root.path().join("src")).unwrap();

        fs::rename(root.path().join("src/a.pdb"), root.path().join("src/a.cif")).unwrap();
        let result = db.update_from_folder(&root.path().join("src")).unwrap();
        assert_eq!(result.counts.num_modified, 1);

        assert!(db.data_dir().join("a.cif").exists());
        assert!(!db.data_dir().join("a.pdb").exists());
        assert_eq!(db.current_snapshot().unwrap()[0].extension, ".cif");
    }

    #[test]
    fn test_history_retention() {
        let (root, db) = setup();
        let mut saved = Vec::new();
        for n in 1..=4 {
            write_source(&root, &format!("f{}.pdb", n), n);
            db.update_from_folder(&root.path().join("src")).unwrap();
            saved.push(fs::read(db.index_dir().join(format!("index_{}.xml", n))).unwrap());
        }

        assert_eq!(db.history().unwrap(), vec![1, 2, 3, 4]);
        for (i, bytes) in saved.iter().enumerate() {
            let path = db.index_dir().join(format!("index_{}.xml", i + 1));
            assert_eq!(&fs::read(path).unwrap(), bytes);
        }
    }

    #[test]
    fn test_reindex() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 3);
        db.update_from_folder(&root.path().join("src")).unwrap();

        let result = db.reindex().unwrap();
        assert!(result.is_modified);
        assert_eq!(result.counts.num_updated, 1);
        assert_eq!(result.version, 2);
        assert_eq!(db.current_snapshot().unwrap()[0].version, 2);
    }

    #[test]
    fn test_failed_commit_leaves_database_unchanged() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 10);
        db.update_from_folder(&root.path().join("src")).unwrap();
        let before = db.statistics().unwrap();
        let stored = fs::read(db.data_dir().join("a.pdb")).unwrap();

        // the next snapshot cannot be written over a directory
        write_source(&root, "a.pdb", 12345);
        fs::create_dir(db.index_dir().join("index_2.xml")).unwrap();
        assert!(db.update_from_folder(&root.path().join("src")).is_err());

        let after = db.statistics().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.molecule_count, before.molecule_count);
        assert_eq!(after.update_count, 2);
        assert_eq!(fs::read(db.data_dir().join("a.pdb")).unwrap(), stored);
        assert_eq!(db.current_snapshot().unwrap()[0].atom_count(), 10);
        assert!(!db.is_locked());
        assert!(!LockState::load(&db.lock_path()).unwrap().is_locked);
        assert!(!db.dir().join("staging").exists());

        // the failed attempt's logs survive the retry
        fs::remove_dir(db.index_dir().join("index_2.xml")).unwrap();
        let retry = db.update_from_folder(&root.path().join("src")).unwrap();
        assert_eq!(retry.counts.num_modified, 1);
        assert_eq!(db.statistics().unwrap().update_count, 3);
        assert!(db.index_dir().join("updateindex_2.csv").exists());
        assert!(db.index_dir().join("updateindex_3.csv").exists());
        assert_eq!(fs::read_to_string(db.data_dir().join("a.pdb")).unwrap(), "atoms=12345");
    }

    #[test]
    fn test_missing_snapshot_is_fatal() {
        let (root, db) = setup();
        write_source(&root, "a.pdb", 3);
        db.update_from_folder(&root.path().join("src")).unwrap();
        fs::remove_file(db.index_dir().join("index_1.xml")).unwrap();

        assert!(matches!(
            db.current_snapshot(),
            Err(StorageError::MissingSnapshot { version: 1 })
        ));
        assert!(matches!(
            db.update_from_folder(&root.path().join("src")),
            Err(StorageError::MissingSnapshot { version: 1 })
        ));
        assert!(!db.is_locked());
    }

    #[test]
    fn test_not_a_directory() {
        let (root, db) = setup();
        let result = db.update_from_folder(&root.path().join("missing"));
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    /// Blocks in `compute_metadata` until released
    pub(crate) struct GatedReader {
        pub(crate) entered: Mutex<mpsc::Sender<()>>,
        pub(crate) release: Mutex<mpsc::Receiver<()>>,
    }

    impl StructureReader for GatedReader {
        fn compute_metadata(&self, _path: &Path) -> Result<StructureMetadata, ParseError> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(StructureMetadata {
                atom_count: 1,
                ..Default::default()
            })
        }

        fn structure_type(&self, _filename: &str) -> Option<StructureType> {
            Some(StructureType::Pdb)
        }
    }

    #[test]
    fn test_concurrent_update_fails_fast() {
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
        let db = Database::create(
            root.path().join("db"),
            DatabaseInfo::new("db1", "Gated", ""),
            test_context(Arc::new(reader)),
        )
        .unwrap();

        std::thread::scope(|scope| {
            let first = scope.spawn(|| db.update_from_folder(&src));

            entered_rx.recv().unwrap();
            assert!(db.is_locked());
            assert!(LockState::load(&db.lock_path()).unwrap().is_locked);
            assert!(matches!(db.update_from_folder(&src), Err(StorageError::Locked(_))));
            assert!(matches!(db.reindex(), Err(StorageError::Locked(_))));

            release_tx.send(()).unwrap();
            let result = first.join().unwrap().unwrap();
            assert_eq!(result.counts.num_added, 1);
        });

        assert!(!db.is_locked());
        assert!(!LockState::load(&db.lock_path()).unwrap().is_locked);
    }

    #[test]
    fn test_filter() {
        let (root, db) = setup();
        write_source(&root, "small.pdb", 3);
        write_source(&root, "large.pdb", 300);
        db.update_from_folder(&root.path().join("src")).unwrap();

        let filters = vec![EntryFilter::int(
            "AtomCount",
            crate::query::FilterComparisonType::NumberGreater,
            100,
        )];
        let found = db.filter(&filters).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename_id, "large");
    }
}
