//! Durable record of payloads that did not complete.
//!
//! A single writer thread owns the file. Workers hand it records through a
//! channel, so appends from concurrent timeouts are serialized without any
//! file locking. Each record is written with one `write_all` of a full line.

use crossbeam_channel::{Sender, unbounded};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Default skip log file, relative to the working directory.
pub const DEFAULT_SKIP_LOG: &str = "apks_not_processed.txt";

/// Owner of the skip log writer thread.
pub struct SkipLog {
    path: PathBuf,
    tx: Option<Sender<String>>,
    thread: Option<JoinHandle<usize>>,
}

/// Cheap cloneable handle for submitting records.
#[derive(Clone)]
pub struct SkipLogHandle {
    tx: Sender<String>,
}

impl SkipLog {
    /// Start the writer. The file is created on the first record, so a run
    /// with no skips leaves no file behind.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let (tx, rx) = unbounded::<String>();
        let writer_path = path.clone();

        let thread = std::thread::Builder::new()
            .name("skip-log".to_string())
            .spawn(move || {
                let mut file: Option<File> = None;
                let mut written = 0usize;
                for line in rx {
                    match append(&mut file, &writer_path, &line) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            warn!(path = %writer_path.display(), error = %e, "Failed to append to skip log");
                            file = None;
                        }
                    }
                }
                written
            })?;

        Ok(Self {
            path,
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> SkipLogHandle {
        SkipLogHandle {
            tx: self
                .tx
                .clone()
                .expect("skip log handle requested after close"),
        }
    }

    /// Flush outstanding records and stop the writer.
    ///
    /// Returns how many records were written. Blocks until every
    /// [`SkipLogHandle`] has been dropped.
    pub fn close(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        self.tx.take();
        let written = self
            .thread
            .take()
            .map(|t| t.join().unwrap_or(0))
            .unwrap_or(0);
        if written > 0 {
            debug!(path = %self.path.display(), written, "Skip log closed");
        }
        written
    }
}

impl Drop for SkipLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SkipLogHandle {
    /// Queue one payload. Never blocks.
    pub fn record(&self, payload: impl std::fmt::Display) {
        let _ = self.tx.send(to_record_line(&payload.to_string()));
    }
}

/// One record per line: embedded line breaks are escaped.
fn to_record_line(payload: &str) -> String {
    let mut line = String::with_capacity(payload.len() + 1);
    for c in payload.chars() {
        match c {
            '\n' => line.push_str("\\n"),
            '\r' => line.push_str("\\r"),
            c => line.push(c),
        }
    }
    line.push('\n');
    line
}

fn append(file: &mut Option<File>, path: &Path, line: &str) -> io::Result<()> {
    if file.is_none() {
        *file = Some(OpenOptions::new().create(true).append(true).open(path)?);
    }
    let f = file.as_mut().expect("skip log file opened above");
    f.write_all(line.as_bytes())?;
    f.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_no_records_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skipped.txt");
        let log = SkipLog::open(&path).unwrap();
        assert_eq!(log.close(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skipped.txt");
        std::fs::write(&path, "earlier.apk\n").unwrap();

        let log = SkipLog::open(&path).unwrap();
        log.handle().record("/data/a.apk");
        log.handle().record("/data/b.apk");
        assert_eq!(log.close(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "earlier.apk\n/data/a.apk\n/data/b.apk\n");
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skipped.txt");
        let log = SkipLog::open(&path).unwrap();

        std::thread::scope(|s| {
            for t in 0..8 {
                let handle = log.handle();
                s.spawn(move || {
                    for i in 0..50 {
                        handle.record(format!("{}-{}-{}", t, i, "x".repeat(500)));
                    }
                });
            }
        });
        assert_eq!(log.close(), 400);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            let parts: Vec<&str> = line.splitn(3, '-').collect();
            assert_eq!(parts.len(), 3);
            assert_eq!(parts[2], "x".repeat(500));
        }
    }

    #[test]
    fn test_record_line_escapes_breaks() {
        assert_eq!(to_record_line("a\nb\r"), "a\\nb\\r\n");
        assert_eq!(to_record_line("plain.apk"), "plain.apk\n");
    }
}
