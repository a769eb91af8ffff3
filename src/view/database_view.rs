//! Materialized filtered projection of one database
//!
//! A view directory holds:
//!
//! ```text
//! view.json   Id, DatabaseId, Name, Description, Filters, DateCreated
//! view.xml    materialized entry list, statistics on the root element
//! stats.json  Version, MoleculeCount, AverageAtomCount
//! ```
//!
//! `view.xml` is authoritative: its entries and the version they were
//! computed from live in one atomically replaced document, so concurrent
//! refreshes cannot pair entries of one version with statistics of another.
//! `stats.json` mirrors the root attributes for external readers.
//!
//! The materialization is valid while its `Version` equals the database's
//! current version. Reading a stale view recomputes it from the database's
//! full index; reading a fresh one touches only the view's own files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::query::{compile_filters, matches_all, CompiledFilter, EntryFilter};
use crate::storage::fs::{read_json, write_atomic, write_json};
use crate::storage::xml::{decode_entry_list, decode_root_attributes, encode_entry_list};
use crate::storage::{
    average_atom_count, Database, Entry, IndexEntry, StorageError, StorageResult, ViewStatistics,
};

const INFO_FILE: &str = "view.json";
const ENTRIES_FILE: &str = "view.xml";
const STATS_FILE: &str = "stats.json";
const ENTRIES_ROOT: &str = "View";

/// Persisted view definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewInfo {
    pub id: String,
    pub database_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub filters: Vec<EntryFilter>,
    pub date_created: DateTime<Utc>,
}

impl ViewInfo {
    pub fn new(
        id: impl Into<String>,
        database_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        filters: Vec<EntryFilter>,
    ) -> Self {
        Self {
            id: id.into(),
            database_id: database_id.into(),
            name: name.into(),
            description: description.into(),
            filters,
            date_created: Utc::now(),
        }
    }
}

/// Sort filters into their persisted order
pub fn sort_filters(filters: &mut [EntryFilter]) {
    filters.sort_by(|a, b| a.property_name.cmp(&b.property_name));
}

pub struct DatabaseView {
    info: ViewInfo,
    dir: PathBuf,
    database: Database,
    filters: Vec<CompiledFilter>,
}

impl std::fmt::Debug for DatabaseView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseView")
            .field("info", &self.info)
            .field("dir", &self.dir)
            .finish()
    }
}

impl DatabaseView {
    /// Create the view directory with an empty, stale materialization
    pub fn create(dir: impl Into<PathBuf>, info: ViewInfo, database: Database) -> StorageResult<Self> {
        let dir = dir.into();
        let filters = compile_filters(&info.filters)?;
        fs::create_dir_all(&dir)?;

        let view = Self {
            info,
            dir,
            database,
            filters,
        };
        view.save_info()?;
        ViewStatistics::default().save(&view.stats_path())?;
        Ok(view)
    }

    /// Open a view directory over `database`
    pub fn open(dir: impl Into<PathBuf>, database: Database) -> StorageResult<Self> {
        let dir = dir.into();
        let info: ViewInfo = read_json(&dir.join(INFO_FILE))?;
        if info.database_id != database.id() {
            return Err(StorageError::InvalidView(format!(
                "view '{}' belongs to database '{}', not '{}'",
                info.name,
                info.database_id,
                database.id()
            )));
        }
        let filters = compile_filters(&info.filters)?;
        Ok(Self {
            info,
            dir,
            database,
            filters,
        })
    }

    pub fn info(&self) -> &ViewInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn database_id(&self) -> &str {
        &self.info.database_id
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    fn entries_path(&self) -> PathBuf {
        self.dir.join(ENTRIES_FILE)
    }

    /// False once the backing database has been deleted
    pub fn is_valid(&self) -> bool {
        self.database.exists()
    }

    fn ensure_valid(&self) -> StorageResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StorageError::InvalidView(format!(
                "the database '{}' of view '{}' no longer exists",
                self.info.database_id, self.info.name
            )))
        }
    }

    /// Materialized entries, recomputed first if the database moved on
    pub fn snapshot(&self) -> StorageResult<Vec<Entry>> {
        self.ensure_valid()?;
        let current = self.database.statistics()?.version;

        if let Some(content) = self.read_materialized()? {
            if materialized_stats(&content)?.map(|s| s.version) == Some(current) {
                return decode_entry_list(&content);
            }
        }

        Ok(self.refresh(current)?.0)
    }

    /// Statistics of the materialization, recomputed first if stale
    pub fn statistics(&self) -> StorageResult<ViewStatistics> {
        self.ensure_valid()?;
        let current = self.database.statistics()?.version;

        if let Some(content) = self.read_materialized()? {
            if let Some(stats) = materialized_stats(&content)?.filter(|s| s.version == current) {
                return Ok(stats);
            }
        }
        Ok(self.refresh(current)?.1)
    }

    fn read_materialized(&self) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.entries_path()) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn refresh(&self, version: u32) -> StorageResult<(Vec<Entry>, ViewStatistics)> {
        let matching: Vec<IndexEntry> = self
            .database
            .snapshot_at(version)?
            .into_iter()
            .filter(|e| matches_all(&self.filters, e))
            .collect();

        let stats = ViewStatistics {
            version,
            molecule_count: matching.len(),
            average_atom_count: average_atom_count(&matching),
        };
        let entries: Vec<Entry> = matching.iter().map(IndexEntry::entry).collect();

        let attrs = [
            ("Version", stats.version.to_string()),
            ("MoleculeCount", stats.molecule_count.to_string()),
            ("AverageAtomCount", stats.average_atom_count.to_string()),
        ];
        write_atomic(&self.entries_path(), &encode_entry_list(ENTRIES_ROOT, &attrs, &entries)?)?;
        stats.save(&self.stats_path())?;
        tracing::debug!(
            view = %self.info.id,
            version,
            entries = entries.len(),
            "Recomputed view"
        );
        Ok((entries, stats))
    }

    /// Current database entries passing the view's filters and `extra`
    ///
    /// Reads the live index and leaves the materialization untouched.
    pub fn filter(&self, extra: &[EntryFilter]) -> StorageResult<Vec<IndexEntry>> {
        self.ensure_valid()?;
        let extra = compile_filters(extra)?;
        Ok(self
            .database
            .current_snapshot()?
            .into_iter()
            .filter(|e| matches_all(&self.filters, e) && matches_all(&extra, e))
            .collect())
    }

    /// Replace name, description or filters; a filter change invalidates the materialization
    pub(crate) fn apply(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        filters: Option<Vec<EntryFilter>>,
    ) -> StorageResult<()> {
        if let Some(mut filters) = filters {
            sort_filters(&mut filters);
            self.filters = compile_filters(&filters)?;
            self.info.filters = filters;
            ViewStatistics::default().save(&self.stats_path())?;
            if let Err(e) = fs::remove_file(self.entries_path()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        if let Some(name) = name {
            self.info.name = name;
        }
        if let Some(description) = description {
            self.info.description = description;
        }
        self.save_info()
    }

    fn save_info(&self) -> StorageResult<()> {
        write_json(&self.dir.join(INFO_FILE), &self.info)
    }
}

/// Statistics carried on the root of `view.xml`; `None` without a version
fn materialized_stats(content: &str) -> StorageResult<Option<ViewStatistics>> {
    let mut stats = ViewStatistics::default();
    let mut has_version = false;
    for (key, value) in decode_root_attributes(content)? {
        match key.as_str() {
            "Version" => {
                stats.version = match value.parse() {
                    Ok(v) => v,
                    Err(_) => return Ok(None),
                };
                has_version = true;
            }
            "MoleculeCount" => stats.molecule_count = value.parse().unwrap_or_default(),
            "AverageAtomCount" => stats.average_atom_count = value.parse().unwrap_or_default(),
            _ => {}
        }
    }
    Ok(has_version.then_some(stats))
}
