//! Versioned snapshot store
//!
//! One immutable document per index version. Callers see the
//! [`SnapshotStore`] trait; [`XmlSnapshotStore`] keeps the files as
//! `index_<version>.xml` next to the per-update logs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::entry::IndexEntry;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fs::write_atomic;
use crate::storage::xml::{decode_index, encode_index};

/// Persistence of versioned entry snapshots
pub trait SnapshotStore: Send + Sync {
    /// Persist `entries` as the snapshot for `version`
    fn save(&self, version: u32, entries: &[IndexEntry]) -> StorageResult<()>;

    /// Load the snapshot for `version`
    ///
    /// Version 0 without a file is an empty, never-updated database; any
    /// other missing version is a consistency error.
    fn read(&self, version: u32) -> StorageResult<Vec<IndexEntry>>;

    fn exists(&self, version: u32) -> bool;

    /// All versions present, ascending
    fn versions(&self) -> StorageResult<Vec<u32>>;
}

/// Sort entries into their persisted order (version, then filename id)
pub fn sort_entries(entries: &mut [IndexEntry]) {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// XML-file snapshot store rooted at a database's index directory
#[derive(Debug, Clone)]
pub struct XmlSnapshotStore {
    dir: PathBuf,
}

impl XmlSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for `version`
    pub fn path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("index_{}.xml", version))
    }

    /// Serialized form of a snapshot, identical for identical input sets
    pub fn encode(version: u32, entries: &[IndexEntry]) -> StorageResult<Vec<u8>> {
        let mut sorted = entries.to_vec();
        sort_entries(&mut sorted);
        encode_index(version, &sorted)
    }
}

impl SnapshotStore for XmlSnapshotStore {
    fn save(&self, version: u32, entries: &[IndexEntry]) -> StorageResult<()> {
        let path = self.path(version);
        if path.exists() {
            tracing::warn!(
                version,
                path = %path.display(),
                "Replacing orphaned index file left by an unfinished update"
            );
        }
        let bytes = Self::encode(version, entries)?;
        write_atomic(&path, &bytes)?;
        tracing::debug!(version, entries = entries.len(), "Saved index snapshot");
        Ok(())
    }

    fn read(&self, version: u32) -> StorageResult<Vec<IndexEntry>> {
        let path = self.path(version);
        if !path.exists() {
            if version == 0 {
                return Ok(Vec::new());
            }
            return Err(StorageError::MissingSnapshot { version });
        }
        let content = fs::read_to_string(&path)?;
        decode_index(&content)
    }

    fn exists(&self, version: u32) -> bool {
        self.path(version).exists()
    }

    fn versions(&self) -> StorageResult<Vec<u32>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for item in fs::read_dir(&self.dir)? {
            let name = item?.file_name();
            let name = name.to_string_lossy();
            if let Some(v) = name
                .strip_prefix("index_")
                .and_then(|rest| rest.strip_suffix(".xml"))
                .and_then(|v| v.parse::<u32>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{keys, Entry, PropertyBag};
    use tempfile::tempdir;

    fn entry(id: &str, version: u32) -> IndexEntry {
        let mut bag = PropertyBag::new();
        bag.insert(keys::ATOM_COUNT, 10usize);
        IndexEntry::new(Entry::new(id, ".pdb", version), None, bag)
    }

    #[test]
    fn test_read_version_zero_is_empty() {
        let dir = tempdir().unwrap();
        let store = XmlSnapshotStore::new(dir.path());
        assert!(store.read(0).unwrap().is_empty());
    }

    #[test]
    fn test_missing_version_is_consistency_error() {
        let dir = tempdir().unwrap();
        let store = XmlSnapshotStore::new(dir.path());
        assert!(matches!(
            store.read(2),
            Err(StorageError::MissingSnapshot { version: 2 })
        ));
    }

    #[test]
    fn test_save_sorts_by_version_then_id() {
        let dir = tempdir().unwrap();
        let store = XmlSnapshotStore::new(dir.path());
        store
            .save(2, &[entry("zeta", 1), entry("beta", 2), entry("alpha", 2)])
            .unwrap();

        let ids: Vec<String> = store
            .read(2)
            .unwrap()
            .into_iter()
            .map(|e| e.filename_id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "beta"]);
    }

    #[test]
    fn test_encoding_independent_of_input_order() {
        let a = XmlSnapshotStore::encode(1, &[entry("a", 1), entry("b", 1)]).unwrap();
        let b = XmlSnapshotStore::encode(1, &[entry("b", 1), entry("a", 1)]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_versions_listing() {
        let dir = tempdir().unwrap();
        let store = XmlSnapshotStore::new(dir.path());
        store.save(1, &[entry("a", 1)]).unwrap();
        store.save(2, &[entry("a", 1), entry("b", 2)]).unwrap();
        std::fs::write(dir.path().join("log_1.txt"), "x").unwrap();

        assert_eq!(store.versions().unwrap(), vec![1, 2]);
        assert!(store.exists(1));
        assert!(!store.exists(3));
    }
}
