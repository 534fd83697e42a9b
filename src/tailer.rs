//! Incremental log file tailing
//!
//! Each monitored file has a [`FileCursor`]. `start` parks every cursor at
//! the current end of file so history is never replayed; each `poll`
//! returns only complete lines appended since the last one. A file that
//! shrinks below its cursor was truncated or rotated and is read again
//! from the beginning.

use crate::error::{Result, SentinelError};
use crate::rules::LogClassifier;
use crate::types::LogEvent;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read position within one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCursor {
    pub path: PathBuf,
    /// Bytes consumed so far
    pub offset: u64,
}

/// A complete line read from a monitored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedLine {
    pub source: String,
    pub line: String,
}

/// Follows a set of append-only log files
#[derive(Debug)]
pub struct LogTailer {
    cursors: Vec<FileCursor>,
}

impl LogTailer {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            cursors: paths
                .into_iter()
                .map(|path| FileCursor { path, offset: 0 })
                .collect(),
        }
    }

    /// Move every cursor to the current end of its file
    pub async fn start(&mut self) {
        for cursor in &mut self.cursors {
            match tokio::fs::metadata(&cursor.path).await {
                Ok(meta) => {
                    cursor.offset = meta.len();
                    tracing::info!(
                        path = %cursor.path.display(),
                        offset = cursor.offset,
                        "Monitoring log file"
                    );
                }
                Err(e) => {
                    cursor.offset = 0;
                    tracing::warn!(
                        path = %cursor.path.display(),
                        error = %e,
                        "Log file not found, will read it from the start once it appears"
                    );
                }
            }
        }
    }

    pub fn cursors(&self) -> &[FileCursor] {
        &self.cursors
    }

    /// New complete lines across all files, in file order
    pub async fn poll(&mut self) -> Vec<TailedLine> {
        let mut lines = Vec::new();
        for cursor in &mut self.cursors {
            match read_new_lines(cursor).await {
                Ok(new) => lines.extend(new),
                Err(SentinelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %cursor.path.display(),
                        error = %e,
                        "Failed to read log file"
                    );
                }
            }
        }
        lines
    }

    /// Poll and keep only lines that classify and carry a valid IPv4 address
    pub async fn poll_events(
        &mut self,
        classifier: &LogClassifier,
        now: u64,
    ) -> (usize, Vec<LogEvent>) {
        let lines = self.poll().await;
        let total = lines.len();
        let events = lines
            .into_iter()
            .filter_map(|tailed| parse_line(classifier, tailed, now))
            .collect();
        (total, events)
    }
}

/// Classify a line and attribute it to an IP; `None` when either is missing
pub fn parse_line(classifier: &LogClassifier, tailed: TailedLine, now: u64) -> Option<LogEvent> {
    let kind = classifier.classify(&tailed.line)?;
    let ip = classifier.extract_ipv4(&tailed.line)?;
    Some(LogEvent {
        timestamp: now,
        kind,
        ip,
        source: tailed.source,
        line: tailed.line,
    })
}

async fn read_new_lines(cursor: &mut FileCursor) -> Result<Vec<TailedLine>> {
    let mut file = tokio::fs::File::open(&cursor.path).await?;
    let len = file.metadata().await?.len();

    if len < cursor.offset {
        tracing::info!(
            path = %cursor.path.display(),
            old_offset = cursor.offset,
            new_len = len,
            "Log file truncated or rotated, rewinding"
        );
        cursor.offset = 0;
    }
    if len == cursor.offset {
        return Ok(Vec::new());
    }

    file.seek(SeekFrom::Start(cursor.offset)).await?;
    let mut buf = Vec::with_capacity((len - cursor.offset) as usize);
    file.take(len - cursor.offset).read_to_end(&mut buf).await?;

    // Leave a trailing partial line for the next poll
    let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok(Vec::new());
    };
    let complete = &buf[..=last_newline];
    cursor.offset += complete.len() as u64;

    let source = source_name(&cursor.path);
    Ok(complete
        .split(|b| *b == b'\n')
        .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\r').to_string())
        .filter(|line| !line.trim().is_empty())
        .map(|line| TailedLine {
            source: source.clone(),
            line,
        })
        .collect())
}

fn source_name(path: &Path) -> String {
    path.display().to_string()
}
