//! Incremental tailing of the newest game log file.
//!
//! Reads are synchronous `std::fs` calls. Async callers run [`LogTailer::poll`]
//! on the blocking pool, and each poll reads at most
//! [`MAX_READ_PER_POLL`] bytes so a burst of output is consumed over several
//! ticks.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use tracing::{info, warn};

/// Carry-over bytes kept without a line terminator before they are dropped.
pub const MAX_CARRY_LEN: usize = 1_048_576;

/// Default cap on bytes read by one poll.
pub const MAX_READ_PER_POLL: u64 = 4_194_304;

/// Position within the file being tailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    /// File being tailed.
    pub path: PathBuf,
    /// Byte offset of the next unread byte.
    pub offset: u64,
    /// Trailing bytes of an incomplete line.
    pub carry: Vec<u8>,
}

/// Follows the most recently modified log file in a directory.
#[derive(Debug)]
pub struct LogTailer {
    dir: PathBuf,
    extensions: Vec<String>,
    cursor: Option<LogCursor>,
    read_limit: u64,
}

impl LogTailer {
    /// Tail files in `dir` whose extension is one of `extensions`.
    pub fn new(dir: PathBuf, extensions: Vec<String>) -> Self {
        Self {
            dir,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            cursor: None,
            read_limit: MAX_READ_PER_POLL,
        }
    }

    /// Read at most `limit` bytes per poll.
    #[must_use]
    pub fn with_read_limit(mut self, limit: u64) -> Self {
        self.read_limit = limit.max(1);
        self
    }

    /// Current cursor, if a file has been selected.
    pub fn cursor(&self) -> Option<&LogCursor> {
        self.cursor.as_ref()
    }

    /// Read complete lines appended since the last poll.
    ///
    /// A newly selected file starts at its end and yields nothing on that
    /// poll. A file smaller than the stored offset is read again from the
    /// start. Anything beyond the read limit is left for the next poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be read.
    pub fn poll(&mut self) -> anyhow::Result<Vec<String>> {
        let Some(latest) = find_latest_log(&self.dir, &self.extensions)? else {
            return Ok(Vec::new());
        };

        let cursor = match &mut self.cursor {
            Some(cursor) if cursor.path == latest => cursor,
            _ => {
                let offset = fs::metadata(&latest)
                    .with_context(|| format!("failed to stat {}", latest.display()))?
                    .len();
                info!(path = %latest.display(), offset, "tailing log file");
                self.cursor = Some(LogCursor {
                    path: latest,
                    offset,
                    carry: Vec::new(),
                });
                return Ok(Vec::new());
            }
        };

        let mut file = fs::File::open(&cursor.path)
            .with_context(|| format!("failed to open log file {}", cursor.path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to read metadata for {}", cursor.path.display()))?
            .len();

        if len < cursor.offset {
            warn!(
                path = %cursor.path.display(),
                offset = cursor.offset,
                len,
                "log file shrank, reading from start"
            );
            cursor.offset = 0;
            cursor.carry.clear();
        }
        if len == cursor.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(cursor.offset))
            .with_context(|| format!("failed to seek in log file {}", cursor.path.display()))?;
        let mut fresh = Vec::new();
        let wanted = len.saturating_sub(cursor.offset).min(self.read_limit);
        file.take(wanted)
            .read_to_end(&mut fresh)
            .with_context(|| format!("failed to read log file {}", cursor.path.display()))?;
        let read = u64::try_from(fresh.len()).context("read length exceeds u64")?;
        cursor.offset = cursor.offset.saturating_add(read);
        cursor.carry.extend_from_slice(&fresh);

        Ok(drain_lines(&mut cursor.carry))
    }
}

/// Split complete lines off the front of `carry`, leaving any partial tail.
fn drain_lines(carry: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = carry.iter().rposition(|&b| b == b'\n') else {
        if carry.len() > MAX_CARRY_LEN {
            warn!(len = carry.len(), "dropping oversized partial log line");
            carry.clear();
        }
        return Vec::new();
    };

    let complete: Vec<u8> = carry.drain(..=last_newline).collect();
    complete
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_owned())
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Most recently modified file in `dir` with a recognised extension.
fn find_latest_log(dir: &Path, extensions: &[String]) -> anyhow::Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read log directory {}", dir.display()))?;

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.context("failed to read directory entry")?;
        let path = entry.path();
        let recognised = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if !recognised {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = match &best {
            None => true,
            Some((time, best_path)) => (modified, &path) > (*time, best_path),
        };
        if newer {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}
