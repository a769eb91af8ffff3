//! Change detection for candidate source files
//!
//! Checks run from cheapest to most expensive:
//!
//! ```text
//! not previously indexed            → New
//! stored copy missing / size differs → Modified
//! source timestamp recorded          → equal ticks ? AlreadyPresent : Modified
//! no timestamp                       → chunked byte comparison
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::storage::IndexEntry;

/// Classification of a candidate against the previous index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
    AlreadyPresent,
}

/// Candidate file as seen on disk
#[derive(Debug, Clone, Copy)]
pub struct SourceInfo<'a> {
    pub path: &'a Path,
    pub len: u64,
    /// Last-write time in ticks, if the platform reports one
    pub ticks: Option<i64>,
}

/// Decide whether `source` differs from the stored copy of `previous`
pub fn detect_change(
    previous: Option<&IndexEntry>,
    source: SourceInfo<'_>,
    stored: &Path,
    buffer_size: usize,
) -> io::Result<ChangeKind> {
    let Some(previous) = previous else {
        return Ok(ChangeKind::New);
    };

    let stored_len = match stored.metadata() {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChangeKind::Modified),
        Err(e) => return Err(e),
    };
    if stored_len != source.len {
        return Ok(ChangeKind::Modified);
    }

    if let Some(recorded) = previous.source_timestamp {
        return Ok(if source.ticks == Some(recorded) {
            ChangeKind::AlreadyPresent
        } else {
            ChangeKind::Modified
        });
    }

    if files_equal(source.path, stored, buffer_size)? {
        Ok(ChangeKind::AlreadyPresent)
    } else {
        Ok(ChangeKind::Modified)
    }
}

/// Read until `buf` is full or the reader is exhausted
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Compare the full content of two files in `buffer_size` chunks
pub fn files_equal(a: &Path, b: &Path, buffer_size: usize) -> io::Result<bool> {
    let buffer_size = buffer_size.max(1);
    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    let mut ba = vec![0u8; buffer_size];
    let mut bb = vec![0u8; buffer_size];

    loop {
        let na = fill(&mut fa, &mut ba)?;
        let nb = fill(&mut fb, &mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Entry, PropertyBag};
    use std::fs;
    use tempfile::tempdir;

    fn previous(ticks: Option<i64>) -> IndexEntry {
        IndexEntry::new(Entry::new("a", ".pdb", 1), ticks, PropertyBag::new())
    }

    fn source(path: &Path, ticks: Option<i64>) -> SourceInfo<'_> {
        SourceInfo {
            path,
            len: fs::metadata(path).unwrap().len(),
            ticks,
        }
    }

    #[test]
    fn test_absent_is_new() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.pdb");
        fs::write(&src, "x").unwrap();
        let kind = detect_change(None, source(&src, None), &dir.path().join("none"), 8).unwrap();
        assert_eq!(kind, ChangeKind::New);
    }

    #[test]
    fn test_size_difference_is_modified() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.pdb");
        let stored = dir.path().join("stored.pdb");
        fs::write(&src, "abcd").unwrap();
        fs::write(&stored, "abc").unwrap();

        let prev = previous(Some(10));
        let kind = detect_change(Some(&prev), source(&src, Some(10)), &stored, 8).unwrap();
        assert_eq!(kind, ChangeKind::Modified);
    }

    #[test]
    fn test_missing_stored_copy_is_modified() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.pdb");
        fs::write(&src, "abcd").unwrap();
        let prev = previous(None);
        let kind =
            detect_change(Some(&prev), source(&src, None), &dir.path().join("gone.pdb"), 8).unwrap();
        assert_eq!(kind, ChangeKind::Modified);
    }

    #[test]
    fn test_timestamp_decides_when_recorded() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.pdb");
        let stored = dir.path().join("stored.pdb");
        fs::write(&src, "same").unwrap();
        fs::write(&stored, "same").unwrap();

        let prev = previous(Some(42));
        assert_eq!(
            detect_change(Some(&prev), source(&src, Some(42)), &stored, 8).unwrap(),
            ChangeKind::AlreadyPresent
        );
        assert_eq!(
            detect_change(Some(&prev), source(&src, Some(43)), &stored, 8).unwrap(),
            ChangeKind::Modified
        );
    }

    #[test]
    fn test_byte_compare_without_timestamp() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.pdb");
        let stored = dir.path().join("stored.pdb");
        let prev = previous(None);

        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &content).unwrap();
        fs::write(&stored, &content).unwrap();
        assert_eq!(
            detect_change(Some(&prev), source(&src, None), &stored, 4096).unwrap(),
            ChangeKind::AlreadyPresent
        );

        // same size, differs only in the first chunk
        let mut changed = content.clone();
        changed[10] ^= 0xff;
        fs::write(&stored, &changed).unwrap();
        assert_eq!(
            detect_change(Some(&prev), source(&src, None), &stored, 4096).unwrap(),
            ChangeKind::Modified
        );

        // and only in the last partial chunk
        let mut changed = content;
        let last = changed.len() - 1;
        changed[last] ^= 0xff;
        fs::write(&stored, &changed).unwrap();
        assert_eq!(
            detect_change(Some(&prev), source(&src, None), &stored, 4096).unwrap(),
            ChangeKind::Modified
        );
    }

    #[test]
    fn test_files_equal_empty() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();
        assert!(files_equal(&a, &b, 16).unwrap());
    }
}
