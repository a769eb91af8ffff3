//! Database Indexer
//!
//! Diffs a source file set against the previous index and computes entries
//! for new and changed files in parallel.
//!
//! # Pipeline
//!
//! ```text
//!                 ┌─ worker 1 ─┐
//! jobs channel ──►├─ worker 2 ─┤──► bounded results (capacity N) ──► consumer
//!                 └─ worker k ─┘                                     (calling thread)
//! ```
//!
//! Workers only push immutable [`IndexRecord`]s. The consumer owns the
//! counters, the accumulating entry list and the logs. A full results
//! channel blocks the workers until the consumer catches up.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::IndexerConfig;
use crate::index::audit::UpdateLogs;
use crate::index::change::{detect_change, ChangeKind, SourceInfo};
use crate::index::metadata::{ParseError, StructureReader};
use crate::storage::{
    keys, normalize_id, system_time_to_ticks, Entry, IndexEntry, PropertyBag, StorageResult,
};

/// Outcome of visiting one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    New,
    Modified,
    AlreadyPresent,
    Removed,
    Updated,
    Error,
}

impl IndexAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Modified => "Modified",
            Self::AlreadyPresent => "AlreadyPresent",
            Self::Removed => "Removed",
            Self::Updated => "Updated",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for IndexAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result record pushed by a worker
#[derive(Debug)]
pub struct IndexRecord {
    pub filename: String,
    pub action: IndexAction,
    pub message: String,
    pub timing: Duration,
    pub entry: Option<IndexEntry>,
    /// The entry's file sits in the staging area awaiting promotion
    pub staged: bool,
}

impl IndexRecord {
    fn error(filename: impl Into<String>, message: impl Into<String>, timing: Duration) -> Self {
        Self {
            filename: filename.into(),
            action: IndexAction::Error,
            message: message.into(),
            timing,
            entry: None,
            staged: false,
        }
    }

    fn with_entry(filename: String, action: IndexAction, entry: IndexEntry, timing: Duration) -> Self {
        Self {
            filename,
            action,
            message: String::new(),
            timing,
            entry: Some(entry),
            staged: matches!(action, IndexAction::New | IndexAction::Modified),
        }
    }
}

/// Per-action counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexCounts {
    pub num_added: usize,
    pub num_modified: usize,
    pub num_removed: usize,
    pub num_updated: usize,
    pub num_error: usize,
    pub num_unchanged: usize,
}

impl IndexCounts {
    /// Number of records that change the index content
    pub fn changes(&self) -> usize {
        self.num_added + self.num_modified + self.num_removed + self.num_updated
    }
}

/// Everything an indexing run produced
#[derive(Debug)]
pub struct IndexerOutput {
    /// Resulting entry list, in completion order
    pub entries: Vec<IndexEntry>,
    pub total_size: u64,
    pub counts: IndexCounts,
    pub is_modified: bool,
    /// Files in the staging area to promote on commit
    pub staged: Vec<String>,
    pub elapsed: Duration,
}

/// Single consumer of the results channel
struct Consumer<'a> {
    logs: &'a mut UpdateLogs,
    progress: Option<&'a dyn Fn(&str)>,
    counts: IndexCounts,
    entries: Vec<IndexEntry>,
    total_size: u64,
    staged: Vec<String>,
}

impl<'a> Consumer<'a> {
    fn new(logs: &'a mut UpdateLogs, progress: Option<&'a dyn Fn(&str)>) -> Self {
        Self {
            logs,
            progress,
            counts: IndexCounts::default(),
            entries: Vec::new(),
            total_size: 0,
            staged: Vec::new(),
        }
    }

    fn consume(&mut self, record: IndexRecord) {
        match record.action {
            IndexAction::New => self.counts.num_added += 1,
            IndexAction::Modified => self.counts.num_modified += 1,
            IndexAction::Removed => self.counts.num_removed += 1,
            IndexAction::Updated => self.counts.num_updated += 1,
            IndexAction::AlreadyPresent => self.counts.num_unchanged += 1,
            IndexAction::Error => self.counts.num_error += 1,
        }

        if record.action == IndexAction::Error {
            if let Err(e) = self.logs.run.error(&record.filename, &record.message) {
                tracing::warn!(error = %e, "Failed to write run log");
            }
        }

        if let Err(e) = self.logs.audit.record(
            &record.filename,
            record.action.as_str(),
            &record.message,
            record.timing.as_millis(),
        ) {
            tracing::warn!(error = %e, "Failed to write audit log");
        }

        if record.action != IndexAction::Removed {
            if let Some(entry) = record.entry {
                self.total_size += entry.size_in_bytes();
                if record.staged {
                    self.staged.push(entry.filename());
                }
                self.entries.push(entry);
            }
        }

        if let Some(progress) = self.progress {
            progress(record.filename.as_str());
        }
    }
}

/// Split a path into its lower-case filename id and extension (".pdb")
pub fn split_filename(path: &Path) -> (String, String) {
    let id = path
        .file_stem()
        .map(|s| normalize_id(&s.to_string_lossy()))
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    (id, ext)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One indexing run against a database
pub struct Indexer<'a> {
    reader: &'a dyn StructureReader,
    config: &'a IndexerConfig,
    data_dir: &'a Path,
    staging_dir: &'a Path,
    version: u32,
    previous: HashMap<String, IndexEntry>,
}

impl<'a> Indexer<'a> {
    /// `version` is the index generation assigned to recomputed entries
    pub fn new(
        reader: &'a dyn StructureReader,
        config: &'a IndexerConfig,
        data_dir: &'a Path,
        staging_dir: &'a Path,
        version: u32,
        previous: Vec<IndexEntry>,
    ) -> Self {
        let previous = previous
            .into_iter()
            .map(|e| (e.filename_id.clone(), e))
            .collect();
        Self {
            reader,
            config,
            data_dir,
            staging_dir,
            version,
            previous,
        }
    }

    /// Diff `source` against the previous index and compute changed entries
    pub fn index_folder(
        &self,
        source: &Path,
        logs: &mut UpdateLogs,
        progress: Option<&dyn Fn(&str)>,
    ) -> StorageResult<IndexerOutput> {
        let start = Instant::now();

        let mut files: Vec<PathBuf> = Vec::new();
        for item in fs::read_dir(source)? {
            let item = item?;
            if item.file_type()?.is_file() {
                files.push(item.path());
            }
        }
        files.sort();

        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = Vec::new();
        let mut jobs = Vec::with_capacity(files.len());
        for path in files {
            if self.reader.structure_type(&file_name(&path)).is_some() {
                let (id, _) = split_filename(&path);
                if !seen.insert(id) {
                    duplicates.push(path);
                    continue;
                }
            }
            jobs.push(path);
        }

        let mut removed: Vec<&IndexEntry> = self
            .previous
            .values()
            .filter(|e| !seen.contains(&e.filename_id))
            .collect();
        removed.sort_by(|a, b| a.filename_id.cmp(&b.filename_id));

        tracing::debug!(
            candidates = jobs.len(),
            removed = removed.len(),
            duplicates = duplicates.len(),
            "Indexing folder {}",
            source.display()
        );

        let mut consumer = Consumer::new(logs, progress);
        for entry in removed {
            consumer.consume(IndexRecord {
                filename: entry.filename(),
                action: IndexAction::Removed,
                message: String::new(),
                timing: Duration::ZERO,
                entry: None,
                staged: false,
            });
        }
        for path in duplicates {
            consumer.consume(IndexRecord::error(
                file_name(&path),
                "Duplicate structure identifier",
                Duration::ZERO,
            ));
        }

        self.run_pipeline(jobs, |path: PathBuf| self.visit_file(&path), &mut consumer);

        let output = self.finish(consumer, start);
        let summary = format!(
            "Added {}, modified {}, removed {}, error {}, time {:.1}s.",
            output.counts.num_added,
            output.counts.num_modified,
            output.counts.num_removed,
            output.counts.num_error,
            output.elapsed.as_secs_f64()
        );
        logs.run.line(&summary)?;
        Ok(output)
    }

    /// Recompute every previously indexed entry from the stored data copies
    pub fn reindex(
        &self,
        logs: &mut UpdateLogs,
        progress: Option<&dyn Fn(&str)>,
    ) -> StorageResult<IndexerOutput> {
        let start = Instant::now();
        let mut jobs: Vec<&IndexEntry> = self.previous.values().collect();
        jobs.sort_by(|a, b| a.filename_id.cmp(&b.filename_id));

        let mut consumer = Consumer::new(logs, progress);
        self.run_pipeline(jobs, |entry: &IndexEntry| self.visit_existing(entry), &mut consumer);

        let output = self.finish(consumer, start);
        let summary = format!(
            "Updated {}, error {}, time {:.1}s.",
            output.counts.num_updated,
            output.counts.num_error,
            output.elapsed.as_secs_f64()
        );
        logs.run.line(&summary)?;
        Ok(output)
    }

    /// Fan jobs out to the worker pool and drain results on this thread
    fn run_pipeline<J, F>(&self, jobs: Vec<J>, visit: F, consumer: &mut Consumer<'_>)
    where
        J: Send,
        F: Fn(J) -> IndexRecord + Sync,
    {
        if jobs.is_empty() {
            return;
        }

        let workers = self.config.workers.max(1).min(jobs.len());
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<J>();
        for job in jobs {
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (tx, rx) = crossbeam_channel::bounded::<IndexRecord>(self.config.queue_capacity.max(1));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let tx = tx.clone();
                let visit = &visit;
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        if tx.send(visit(job)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for record in rx.iter() {
                consumer.consume(record);
            }
        });
    }

    fn finish(&self, consumer: Consumer<'_>, start: Instant) -> IndexerOutput {
        let kept: HashSet<&str> = consumer
            .entries
            .iter()
            .map(|e| e.filename_id.as_str())
            .collect();
        let dropped = self
            .previous
            .keys()
            .filter(|id| !kept.contains(id.as_str()))
            .count();

        IndexerOutput {
            is_modified: consumer.counts.changes() > 0 || dropped > 0,
            counts: consumer.counts,
            entries: consumer.entries,
            total_size: consumer.total_size,
            staged: consumer.staged,
            elapsed: start.elapsed(),
        }
    }

    fn visit_file(&self, path: &Path) -> IndexRecord {
        let timer = Instant::now();
        let filename = file_name(path);

        if self.reader.structure_type(&filename).is_none() {
            return IndexRecord::error(filename, "Not supported", timer.elapsed());
        }

        let (id, ext) = split_filename(path);
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                return IndexRecord::error(
                    filename,
                    format!("Failed to read the source file: {}", e),
                    timer.elapsed(),
                )
            }
        };
        let source = SourceInfo {
            path,
            len: meta.len(),
            ticks: meta.modified().ok().map(system_time_to_ticks),
        };

        let previous = self.previous.get(&id);
        let kind = match previous {
            Some(prev) if prev.extension == ext => {
                let stored = self.data_dir.join(prev.filename());
                match detect_change(Some(prev), source, &stored, self.config.compare_buffer_size) {
                    Ok(kind) => kind,
                    Err(e) => {
                        return IndexRecord::error(
                            filename,
                            format!("Failed to compare with the stored copy: {}", e),
                            timer.elapsed(),
                        )
                    }
                }
            }
            Some(_) => ChangeKind::Modified,
            None => ChangeKind::New,
        };

        if let (ChangeKind::AlreadyPresent, Some(prev)) = (kind, previous) {
            return IndexRecord::with_entry(
                filename,
                IndexAction::AlreadyPresent,
                prev.clone(),
                timer.elapsed(),
            );
        }

        let staged = self.staging_dir.join(format!("{}{}", id, ext));
        if fs::copy(path, &staged).is_err() {
            return IndexRecord::error(
                filename,
                "Failed to copy the file to the local repository",
                timer.elapsed(),
            );
        }

        let action = if kind == ChangeKind::Modified {
            IndexAction::Modified
        } else {
            IndexAction::New
        };
        match self.compute_entry(&staged, &id, &ext, source.ticks) {
            Ok(entry) => IndexRecord::with_entry(filename, action, entry, timer.elapsed()),
            Err(e) => IndexRecord::error(filename, e.to_string(), timer.elapsed()),
        }
    }

    fn visit_existing(&self, previous: &IndexEntry) -> IndexRecord {
        let timer = Instant::now();
        let filename = previous.filename();
        let path = self.data_dir.join(&filename);

        match self.compute_entry(
            &path,
            &previous.filename_id,
            &previous.extension,
            previous.source_timestamp,
        ) {
            Ok(entry) => IndexRecord::with_entry(filename, IndexAction::Updated, entry, timer.elapsed()),
            Err(e) => IndexRecord::error(filename, e.to_string(), timer.elapsed()),
        }
    }

    fn compute_entry(
        &self,
        path: &Path,
        id: &str,
        ext: &str,
        source_timestamp: Option<i64>,
    ) -> Result<IndexEntry, ParseError> {
        let metadata = self.reader.compute_metadata(path)?;
        let size = fs::metadata(path)?.len();

        let mut properties = PropertyBag::new();
        properties.insert(keys::ATOM_COUNT, metadata.atom_count);
        properties.insert(keys::SIZE_IN_BYTES, size as i64);
        properties.insert(keys::ATOM_TYPES, metadata.atom_types);
        if metadata.residue_count > 0 {
            properties.insert(keys::RESIDUE_COUNT, metadata.residue_count);
        }
        properties.insert(keys::RESIDUE_TYPES, metadata.residue_types);

        Ok(IndexEntry::new(
            Entry::new(id, ext, self.version),
            source_timestamp,
            properties,
        ))
    }
}
