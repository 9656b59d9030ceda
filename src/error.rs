//! Errors that propagate past a packet boundary.
//!
//! Per spec.md §7, parse/decrypt failures are recorded as data on the
//! `Frame` and never reach here. Only I/O and key-material configuration
//! failures use `Result`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZbError {
    #[error("failed to read capture file {path}: {source}")]
    Capture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported pcap/pcapng data in {path}: {source}")]
    CaptureFormat {
        path: PathBuf,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error("line {line} in {path}: expected 2 tab-separated values, found {found}")]
    KeyFileShape {
        path: PathBuf,
        line: usize,
        found: usize,
    },

    #[error("line {line} in {path}: expected {expected} hex digits, found {found}")]
    KeyFileHexLength {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line} in {path}: key name must be non-empty and must not start with '_'")]
    KeyFileName { path: PathBuf, line: usize },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ZbError>;
