//! Daily transcript files of the terminal output.
//!
//! Each UTC day gets two append-only files: `<date>-raw.log` with the output
//! bytes as received and `<date>-plain.log` with control sequences removed.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use clawterm_core::ansi::strip_ansi;

/// Transcript errors.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("Failed to open transcript {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write transcript: {0}")]
    Write(#[from] std::io::Error),
}

struct DailyFiles {
    date: NaiveDate,
    raw: File,
    plain: File,
}

/// Writer for the daily transcript pair.
pub struct TranscriptLog {
    dir: PathBuf,
    current: Option<DailyFiles>,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    pub fn raw_name(date: NaiveDate) -> String {
        format!("{date}-raw.log")
    }

    pub fn plain_name(date: NaiveDate) -> String {
        format!("{date}-plain.log")
    }

    /// Append a chunk to today's files.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), TranscriptError> {
        self.append_on(Utc::now().date_naive(), chunk).await
    }

    /// Append a chunk to the files of `date`, rolling over if needed.
    pub async fn append_on(&mut self, date: NaiveDate, chunk: &[u8]) -> Result<(), TranscriptError> {
        if self.current.as_ref().is_none_or(|files| files.date != date) {
            // Close the previous day before opening the next.
            self.current = None;
            self.current = Some(self.open(date).await?);
        }
        let Some(files) = self.current.as_mut() else {
            return Ok(());
        };

        files.raw.write_all(chunk).await?;
        files.raw.flush().await?;
        let plain = strip_ansi(chunk);
        if !plain.is_empty() {
            files.plain.write_all(plain.as_bytes()).await?;
            files.plain.flush().await?;
        }
        Ok(())
    }

    /// Record the bridge's output feed until it closes.
    pub async fn run(mut self, mut output: broadcast::Receiver<Bytes>) {
        let mut failing = false;
        loop {
            match output.recv().await {
                Ok(chunk) => match self.append(&chunk).await {
                    Ok(()) if failing => {
                        info!("Transcript writes recovered");
                        failing = false;
                    }
                    Ok(()) => {}
                    Err(e) if !failing => {
                        warn!(error = %e, "Transcript write failed");
                        failing = true;
                    }
                    Err(_) => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transcript fell behind output, chunks missing");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Output feed closed, transcript stopped");
    }

    async fn open(&self, date: NaiveDate) -> Result<DailyFiles, TranscriptError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| TranscriptError::Open {
                path: self.dir.clone(),
                source,
            })?;
        let raw = open_append(&self.dir.join(Self::raw_name(date))).await?;
        let plain = open_append(&self.dir.join(Self::plain_name(date))).await?;
        debug!(dir = %self.dir.display(), %date, "Opened transcript files");
        Ok(DailyFiles { date, raw, plain })
    }
}

async fn open_append(path: &Path) -> Result<File, TranscriptError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| TranscriptError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn writes_raw_and_plain_copies() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TranscriptLog::new(dir.path());
        log.append_on(day(1), b"\x1b[32mok\x1b[0m\r\n").await.unwrap();
        log.append_on(day(1), b"next\r\n").await.unwrap();

        let raw = std::fs::read(dir.path().join("2026-03-01-raw.log")).unwrap();
        assert_eq!(raw, b"\x1b[32mok\x1b[0m\r\nnext\r\n");
        let plain = std::fs::read_to_string(dir.path().join("2026-03-01-plain.log")).unwrap();
        assert_eq!(plain, "ok\nnext\n");
    }

    #[tokio::test]
    async fn rolls_over_on_date_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TranscriptLog::new(dir.path().join("logs"));
        log.append_on(day(1), b"first").await.unwrap();
        log.append_on(day(2), b"second").await.unwrap();

        let read = |name: &str| std::fs::read_to_string(dir.path().join("logs").join(name)).unwrap();
        assert_eq!(read("2026-03-01-plain.log"), "first");
        assert_eq!(read("2026-03-02-plain.log"), "second");
    }

    #[tokio::test]
    async fn appends_to_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2026-03-05-raw.log"), "earlier ").unwrap();

        let mut log = TranscriptLog::new(dir.path());
        log.append_on(day(5), b"later").await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join("2026-03-05-raw.log")).unwrap();
        assert_eq!(raw, "earlier later");
    }
}
