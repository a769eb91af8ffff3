//! Persisted statistics for databases and views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::storage::entry::{average_atom_count, IndexEntry};
use crate::storage::error::StorageResult;
use crate::storage::fs::{read_json_or_default, write_json};

/// Counters of one database, stored as `stats.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseStatistics {
    /// Highest index version on disk; bumped only by modifying updates
    pub version: u32,
    /// Number of update attempts, used to name the per-update logs
    pub update_count: u32,
    pub molecule_count: usize,
    pub size_in_bytes: u64,
    /// Ceiling of the mean atom count
    pub average_atom_count: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DatabaseStatistics {
    /// Load from JSON file; a missing file means a fresh database
    pub fn load(path: &Path) -> StorageResult<Self> {
        read_json_or_default(path)
    }

    /// Save to JSON file
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_json(path, self)
    }

    /// Recompute the content counters from a full entry set
    pub fn refresh_from(&mut self, entries: &[IndexEntry]) {
        self.molecule_count = entries.len();
        self.size_in_bytes = entries.iter().map(IndexEntry::size_in_bytes).sum();
        self.average_atom_count = average_atom_count(entries);
        self.last_updated = Some(Utc::now());
    }
}

impl fmt::Display for DatabaseStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version {}, {} molecules, {} bytes, avg {} atoms, {} updates",
            self.version,
            self.molecule_count,
            self.size_in_bytes,
            self.average_atom_count,
            self.update_count
        )
    }
}

/// Cached state of a view, stored as the view's `stats.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewStatistics {
    /// Database version the materialized entries were computed from
    pub version: u32,
    pub molecule_count: usize,
    pub average_atom_count: u32,
}

impl ViewStatistics {
    pub fn load(path: &Path) -> StorageResult<Self> {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{keys, Entry, PropertyBag};
    use tempfile::tempdir;

    #[test]
    fn test_statistics_json_is_pascal_case() {
        let stats = DatabaseStatistics {
            version: 2,
            update_count: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"Version\":2"));
        assert!(json.contains("\"UpdateCount\":3"));
        assert!(json.contains("\"AverageAtomCount\":0"));
    }

    #[test]
    fn test_load_missing_is_default() {
        let dir = tempdir().unwrap();
        let stats = DatabaseStatistics::load(&dir.path().join("stats.json")).unwrap();
        assert_eq!(stats, DatabaseStatistics::default());
    }

    #[test]
    fn test_refresh_from_entries() {
        let make = |id: &str, atoms: usize, size: usize| {
            let mut bag = PropertyBag::new();
            bag.insert(keys::ATOM_COUNT, atoms);
            bag.insert(keys::SIZE_IN_BYTES, size);
            IndexEntry::new(Entry::new(id, ".pdb", 1), None, bag)
        };
        let mut stats = DatabaseStatistics::default();
        stats.refresh_from(&[make("a", 10, 100), make("b", 11, 50)]);

        assert_eq!(stats.molecule_count, 2);
        assert_eq!(stats.size_in_bytes, 150);
        assert_eq!(stats.average_atom_count, 11);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = ViewStatistics {
            version: 4,
            molecule_count: 12,
            average_atom_count: 30,
        };
        stats.save(&path).unwrap();
        assert_eq!(ViewStatistics::load(&path).unwrap(), stats);
    }
}
