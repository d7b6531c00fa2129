//! Overhead measurement
//!
//! This module is responsible for:
//! - The synthetic work units
//! - The weak-scaling serial versus parallel timing protocol
//! - Capturing the placement of every team thread

pub mod protocol;
pub mod work;

pub use protocol::{static_chunk, AffinitySnapshot, TeamRun, TimingSample, WeakScaling};
pub use work::{FloatLoop, NthPrime, WorkUnit};
