//! Diagnostic file log sink.
//!
//! An append-only, ANSI-stripped, line-buffered writer the relay uses
//! for agent log frames and lifecycle lines. Advisory only: the relay
//! never depends on it for correctness, and sink failures are reported
//! but do not affect protocol state.
//!
//! The file is truncated when the sink is created, so each relay run
//! starts with a clean log.

// ============================================================================
// Imports
// ============================================================================

use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use regex::Regex;

use crate::error::Result;

// ============================================================================
// FileLogSink
// ============================================================================

/// Append-only line sink with ANSI escape stripping.
pub struct FileLogSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    ansi: Regex,
}

impl FileLogSink {
    /// Creates the sink, truncating any existing file at `path`.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be
    /// created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            // CSI sequences; covers the color codes terminals emit.
            ansi: Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI pattern"),
        })
    }

    /// Returns the sink's file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line, stripped of ANSI escapes and newline-terminated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) on write failure.
    pub fn log(&self, line: &str) -> Result<()> {
        let clean = self.ansi.replace_all(line, "");
        let mut writer = self.writer.lock();
        writer.write_all(clean.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn test_lines_are_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.log");

        let sink = FileLogSink::create(&path).expect("create");
        sink.log("first").expect("log");
        sink.log("second").expect("log");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn test_ansi_is_stripped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.log");

        let sink = FileLogSink::create(&path).expect("create");
        sink.log("\x1b[31mred\x1b[0m plain").expect("log");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "red plain\n");
    }

    #[test]
    fn test_truncates_on_create() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.log");
        fs::write(&path, "stale contents\n").expect("seed");

        let sink = FileLogSink::create(&path).expect("create");
        sink.log("fresh").expect("log");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "fresh\n");
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/relay.log");

        let sink = FileLogSink::create(&path).expect("create");
        sink.log("ok").expect("log");
        assert_eq!(sink.path(), path.as_path());
        assert!(path.exists());
    }
}
