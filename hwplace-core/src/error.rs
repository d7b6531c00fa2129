//! Error type shared by the library modules.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the placement and overhead engine.
#[derive(Debug, Error)]
pub enum Error {
    /// No backend can read the processing unit and NUMA ids on this platform.
    #[error("no hardware identity backend available: {0}")]
    UnsupportedIdentity(&'static str),

    /// Reading the system topology failed.
    #[error("failed to read topology from {path}")]
    Topology {
        /// File that could not be read or parsed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The group segment exists but does not look like one we created.
    #[error("invalid group segment at {path}: {reason}")]
    InvalidGroup {
        /// Segment path.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// A broadcast payload does not fit into the group segment.
    #[error("broadcast payload of {len} words exceeds capacity of {capacity}")]
    PayloadTooLarge {
        /// Requested payload length in words.
        len: usize,
        /// Capacity of the segment in words.
        capacity: usize,
    },

    /// A broadcast run configuration could not be decoded.
    #[error("malformed run configuration: {0}")]
    MalformedConfig(String),

    /// A thread of the measurement team panicked.
    #[error("team thread {0} panicked")]
    TeamPanicked(usize),

    /// Generic I/O failure (segment files, report output).
    #[error(transparent)]
    Io(#[from] io::Error),
}
