//! Staging area for copied source files
//!
//! Workers copy new and modified files here instead of into `data/`. The
//! files are promoted only after the new index version is committed, so a
//! failed update leaves the data directory untouched. Dropping the area
//! removes whatever was not promoted.

use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::StorageResult;

pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create an empty staging directory, clearing leftovers of an aborted run
    pub fn create(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        if dir.exists() {
            tracing::warn!(path = %dir.display(), "Removing leftover staging directory");
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Move staged files into `data_dir`, replacing older copies
    pub fn promote(&self, filenames: &[String], data_dir: &Path) -> StorageResult<()> {
        fs::create_dir_all(data_dir)?;
        for name in filenames {
            let from = self.dir.join(name);
            let to = data_dir.join(name);
            if fs::rename(&from, &to).is_err() {
                fs::copy(&from, &to)?;
                fs::remove_file(&from)?;
            }
        }
        tracing::debug!(files = filenames.len(), "Promoted staged files");
        Ok(())
    }
}

/// Delete data files that no committed entry references any more
///
/// Covers removed entries and copies left under an entry's old extension.
pub fn remove_retired(data_dir: &Path, retired: &[String]) -> StorageResult<()> {
    for name in retired {
        match fs::remove_file(data_dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if !retired.is_empty() {
        tracing::debug!(files = retired.len(), "Removed retired data files");
    }
    Ok(())
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.dir.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_promote_and_cleanup() {
        let root = tempdir().unwrap();
        let data = root.path().join("data");
        let staging_dir = root.path().join("staging");

        {
            let staging = StagingArea::create(&staging_dir).unwrap();
            fs::write(staging.path().join("a.pdb"), "new").unwrap();
            fs::write(staging.path().join("b.pdb"), "failed").unwrap();
            fs::create_dir_all(&data).unwrap();
            fs::write(data.join("a.pdb"), "old").unwrap();

            staging.promote(&["a.pdb".to_string()], &data).unwrap();
        }

        assert_eq!(fs::read_to_string(data.join("a.pdb")).unwrap(), "new");
        assert!(!data.join("b.pdb").exists());
        assert!(!staging_dir.exists());
    }

    #[test]
    fn test_create_clears_leftovers() {
        let root = tempdir().unwrap();
        let staging_dir = root.path().join("staging");
        fs::create_dir_all(&staging_dir).unwrap();
        fs::write(staging_dir.join("stale.pdb"), "x").unwrap();

        let staging = StagingArea::create(&staging_dir).unwrap();
        assert!(!staging.path().join("stale.pdb").exists());
    }
}
