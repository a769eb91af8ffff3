//! Per-update logs
//!
//! Every update attempt writes two files into the database's index
//! directory, numbered by the attempt:
//!
//! - `log_<n>.txt`: human-readable run log with a capped error listing
//! - `updateindex_<n>.csv`: one line per visited file (`Filename,Action,Message,TimingMs`)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::storage::StorageResult;

/// Path of the run log for update number `n`
pub fn run_log_path(index_dir: &Path, n: u32) -> PathBuf {
    index_dir.join(format!("log_{}.txt", n))
}

/// Path of the audit CSV for update number `n`
pub fn audit_path(index_dir: &Path, n: u32) -> PathBuf {
    index_dir.join(format!("updateindex_{}.csv", n))
}

/// Machine-readable record of every file an update visited
pub struct AuditLog {
    writer: csv::Writer<File>,
}

impl AuditLog {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["Filename", "Action", "Message", "TimingMs"])?;
        Ok(Self { writer })
    }

    pub fn record(&mut self, filename: &str, action: &str, message: &str, timing_ms: u128) -> StorageResult<()> {
        self.writer
            .write_record([filename, action, message, timing_ms.to_string().as_str()])?;
        Ok(())
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Human-readable run log with capped error reporting
pub struct RunLog {
    writer: BufWriter<File>,
    max_reported_errors: usize,
    errors: usize,
}

impl RunLog {
    pub fn create(path: &Path, max_reported_errors: usize) -> StorageResult<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            max_reported_errors,
            errors: 0,
        })
    }

    pub fn line(&mut self, text: &str) -> StorageResult<()> {
        writeln!(self.writer, "{}", text)?;
        Ok(())
    }

    /// Record a per-file error; only the first `max_reported_errors` are written out
    pub fn error(&mut self, filename: &str, message: &str) -> StorageResult<()> {
        self.errors += 1;
        if self.errors <= self.max_reported_errors {
            tracing::warn!(file = %filename, "{}", message);
            writeln!(self.writer, "Error: {}: {}", filename, message)?;
        }
        Ok(())
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Write the `...and N more errors` trailer and flush
    pub fn finish(mut self) -> StorageResult<()> {
        if self.errors > self.max_reported_errors {
            let hidden = self.errors - self.max_reported_errors;
            tracing::warn!("...and {} more errors", hidden);
            writeln!(self.writer, "...and {} more errors", hidden)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// The pair of logs written by one update attempt
pub struct UpdateLogs {
    pub run: RunLog,
    pub audit: AuditLog,
}

impl UpdateLogs {
    /// Create `log_<n>.txt` and `updateindex_<n>.csv` in `index_dir`
    pub fn create(index_dir: &Path, n: u32, max_reported_errors: usize) -> StorageResult<Self> {
        std::fs::create_dir_all(index_dir)?;
        Ok(Self {
            run: RunLog::create(&run_log_path(index_dir, n), max_reported_errors)?,
            audit: AuditLog::create(&audit_path(index_dir, n))?,
        })
    }

    pub fn finish(mut self) -> StorageResult<()> {
        self.audit.flush()?;
        self.run.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_audit_log_quotes_messages() {
        let dir = tempdir().unwrap();
        let path = audit_path(dir.path(), 1);
        let mut log = AuditLog::create(&path).unwrap();
        log.record("1tqn.pdb", "New", "", 12).unwrap();
        log.record("bad.pdb", "Error", "unexpected \"token\", line 3", 1).unwrap();
        log.flush().unwrap();
        drop(log);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["Filename", "Action", "Message", "TimingMs"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "unexpected \"token\", line 3");
    }

    #[test]
    fn test_run_log_caps_errors() {
        let dir = tempdir().unwrap();
        let path = run_log_path(dir.path(), 7);
        let mut log = RunLog::create(&path, 2).unwrap();
        for i in 0..5 {
            log.error(&format!("f{}.pdb", i), "Not supported").unwrap();
        }
        assert_eq!(log.error_count(), 5);
        log.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Error:").count(), 2);
        assert!(text.contains("...and 3 more errors"));
    }
}
