//! Tick feed ingestion.
//!
//! A feed is JSONL: every non-blank line is one tick, a JSON array of
//! observations. Lines starting with `#` are comments.

use rose_core::Observation;
use std::fs::File;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::warn;

use crate::error::{DaemonError, Result};

/// Parse one feed line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<Vec<Observation>>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| DaemonError::Feed {
            line: line_no,
            source,
        })
}

/// Every tick in `reader`, numbered by 1-based line. Unparseable lines are
/// logged and skipped so one bad row never stops a session.
pub fn read_ticks<R: BufRead>(reader: R) -> Result<Vec<(usize, Vec<Observation>)>> {
    let mut ticks = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(i + 1, &line) {
            Ok(Some(observations)) => ticks.push((i + 1, observations)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed feed line"),
        }
    }
    Ok(ticks)
}

/// Follows a growing feed file, handing out complete lines only.
#[derive(Debug)]
pub struct FeedTail {
    path: PathBuf,
    offset: u64,
    line_no: usize,
    pending: String,
}

impl FeedTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            line_no: 0,
            pending: String::new(),
        }
    }

    /// Lines appended since the last poll, with their line numbers. A
    /// missing file yields nothing; a truncated one is re-read from the start.
    pub fn poll(&mut self) -> Result<Vec<(usize, String)>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(path = %self.path.display(), "Feed truncated, restarting from the top");
            self.offset = 0;
            self.line_no = 0;
            self.pending.clear();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = String::new();
        let read = file.read_to_string(&mut buf)?;
        self.offset += read as u64;
        self.pending.push_str(&buf);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            self.line_no += 1;
            lines.push((self.line_no, line.trim_end().to_string()));
        }
        Ok(lines)
    }
}
