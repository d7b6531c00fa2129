//! hwplace core - parallel overhead and thread placement benchmarks
//!
//! This library provides the measurement engine behind the `prime_overhead`
//! and `loop_overhead` binaries.

/// Hardware identity, topology and thread placement
pub mod arch;

/// Work units and the weak-scaling timing protocol
pub mod bench;

/// Command-line arguments shared by the binaries
pub mod cli;

/// Run configuration shared by every rank
pub mod config;

/// Per-rank job driver
pub mod driver;

/// Library error type
pub mod error;

/// Process group collectives and rank launching
pub mod group;

/// Diagnostic logging
pub mod logging;

/// Report formatting
pub mod report;

pub use error::{Error, Result};
