//! Durable log of the remote worker's output

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::runtime::{Handle, RuntimeFlavor};

use robolaunch_core::prelude::*;

/// Default location of the worker log, relative to the working directory
pub const DEFAULT_LOG_PATH: &str = "robolaunch.log";

/// Append-only file receiving every line the worker prints.
///
/// Opened with truncation once per device handle. Each line is written and
/// flushed before `append` returns. After [`close`](Self::close) all further
/// writes are rejected with [`Error::LogSinkClosed`].
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogSink {
    /// Create or truncate the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        debug!("Opened worker log at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line (a newline is added) and flush it to disk.
    ///
    /// The write is synchronous so the line is on disk before the caller reads
    /// the next one. On a multi-threaded runtime it runs under
    /// [`tokio::task::block_in_place`] so other tasks move off this worker.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        blocking_write(|| -> Result<()> {
            let mut guard = self.lock();
            let file = guard.as_mut().ok_or_else(|| Error::LogSinkClosed {
                path: self.path.clone(),
            })?;
            file.write_all(record.as_bytes())?;
            file.flush()?;
            Ok(())
        })
    }

    /// Flush and close the file. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let mut guard = self.lock();
        match guard.take() {
            Some(mut file) => {
                if let Err(e) = file.flush() {
                    warn!("Failed to flush worker log {}: {}", self.path.display(), e);
                }
                debug!("Closed worker log {}", self.path.display());
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<File>> {
        // A writer panicking mid-line leaves the file usable
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn blocking_write<T>(write: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(write)
        }
        // block_in_place panics on a current-thread runtime
        _ => write(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        let sink = LogSink::open(&path).unwrap();

        sink.append("first").unwrap();
        sink.append("second").unwrap();

        // Visible without closing: every append is flushed
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_open_truncates_previous_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "stale output\n").unwrap();

        let sink = LogSink::open(&path).unwrap();
        sink.append("fresh").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_close_exactly_once() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path().join("worker.log")).unwrap();

        assert!(!sink.is_closed());
        assert!(sink.close());
        assert!(!sink.close());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_append_after_close_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        let sink = LogSink::open(&path).unwrap();
        sink.append("kept").unwrap();
        sink.close();

        let err = sink.append("dropped").unwrap_err();
        assert!(matches!(err, Error::LogSinkClosed { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("nao").join("worker.log");
        let sink = LogSink::open(&path).unwrap();
        assert_eq!(sink.path(), path.as_path());
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_append_inside_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let sink = std::sync::Arc::new(LogSink::open(dir.path().join("worker.log")).unwrap());

        let writer = sink.clone();
        tokio::spawn(async move {
            for i in 0..3 {
                writer.append(&format!("line {i}")).unwrap();
            }
        })
        .await
        .unwrap();
        sink.append("from test body").unwrap();

        assert_eq!(
            std::fs::read_to_string(sink.path()).unwrap(),
            "line 0\nline 1\nline 2\nfrom test body\n"
        );
    }

    #[tokio::test]
    async fn test_append_inside_current_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path().join("worker.log")).unwrap();

        sink.append("single threaded").unwrap();
        sink.close();
        assert!(matches!(
            sink.append("late"),
            Err(Error::LogSinkClosed { .. })
        ));
        assert_eq!(
            std::fs::read_to_string(sink.path()).unwrap(),
            "single threaded\n"
        );
    }
}
