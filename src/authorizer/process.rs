//! Process start-time lookup from `/proc/<pid>/stat`
//!
//! A pid alone does not identify a process: once it exits, the kernel may hand
//! the same number to an unrelated process. The pair (pid, start time) does.
//! The start time is field 22 of the stat record, in clock ticks since boot.
//!
//! # Record Layout
//!
//! ```text
//! 4242 (my daemon) S 1 4242 4242 0 -1 4194560 ... 0 0 20 0 1 0 123456 ...
//! ──┬─ ─────┬───── ┬                                            ──┬───
//!   │       │      └─ field 3: first field after the comm         │
//!   │       └─ field 2: comm, may contain spaces and ')'          │
//!   └─ field 1: pid                                  field 22: starttime
//! ```
//!
//! The record describes a process we do not control, so the parser checks
//! framing, field count and the numeric value separately and never guesses.

use std::io;
use std::num::ParseIntError;
use std::str::Utf8Error;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Index of `starttime` among the fields following the closing `)`.
/// Field 22 overall, minus pid and comm, minus one for zero-based indexing.
const START_TIME_INDEX: usize = 19;

/// Why a stat record could not be parsed
#[derive(Debug, Error)]
pub enum StatParseError {
    #[error("missing parentheses around the process name")]
    MissingCommDelimiter,

    #[error("no fields after the process name")]
    TruncatedAfterComm,

    #[error("fields after the process name are not valid UTF-8: {0}")]
    InvalidFields(#[source] Utf8Error),

    #[error("start time field is not present")]
    MissingStartTime,

    #[error("start time field is not an integer: {0}")]
    InvalidStartTime(#[source] ParseIntError),
}

/// Failure to derive a process record for a pid
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process {pid} not found")]
    NotFound { pid: i32 },

    #[error("could not read stat record of process {pid}: {source}")]
    Io {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("malformed stat record for process {pid}: {source}")]
    Malformed {
        pid: i32,
        #[source]
        source: StatParseError,
    },
}

/// One process instance: a pid bound to its kernel start time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i32,
    /// Clock ticks since boot at which the process started
    pub start_time: u64,
}

impl ProcessRecord {
    /// Read the current record of `pid` under `root` (normally `/`).
    ///
    /// Always hits the filesystem. Callers must not keep the result across
    /// authorization checks, the pid may be recycled in between.
    pub async fn load(root: &Path, pid: i32) -> Result<Self, ProcessError> {
        // No stat record can exist for these, and "-1" would still build a path.
        if pid <= 0 {
            return Err(ProcessError::NotFound { pid });
        }

        // Bytes: the comm is whatever the process set with PR_SET_NAME
        let contents = match tokio::fs::read(stat_path(root, pid)).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProcessError::NotFound { pid })
            }
            Err(source) => return Err(ProcessError::Io { pid, source }),
        };

        let start_time =
            parse_start_time(&contents).map_err(|source| ProcessError::Malformed { pid, source })?;

        Ok(Self { pid, start_time })
    }
}

/// Path of the stat record of `pid` under `root`
pub fn stat_path(root: &Path, pid: i32) -> PathBuf {
    root.join("proc").join(pid.to_string()).join("stat")
}

/// Extract the start time from the raw contents of a stat record
///
/// Only the fields after the comm need to be text; the comm itself may hold
/// any bytes.
pub fn parse_start_time(contents: &[u8]) -> Result<u64, StatParseError> {
    // The comm is framed by the first '(' and the last ')': the name itself
    // may contain both characters.
    let open = contents
        .iter()
        .position(|&b| b == b'(')
        .ok_or(StatParseError::MissingCommDelimiter)?;
    let close = contents
        .iter()
        .rposition(|&b| b == b')')
        .ok_or(StatParseError::MissingCommDelimiter)?;
    if close < open {
        return Err(StatParseError::MissingCommDelimiter);
    }

    let rest = std::str::from_utf8(&contents[close + 1..])
        .map_err(StatParseError::InvalidFields)?
        .trim();
    if rest.is_empty() {
        return Err(StatParseError::TruncatedAfterComm);
    }

    let field = rest
        .split_ascii_whitespace()
        .nth(START_TIME_INDEX)
        .ok_or(StatParseError::MissingStartTime)?;

    field.parse().map_err(StatParseError::InvalidStartTime)
}
