//! Hardware identity, topology and thread placement
//!
//! This module is responsible for:
//! - Reading the processing unit and NUMA node of the running thread
//! - Modelling the CPU topology and resolving physical ids to core numbers
//! - Building and optionally pinning measurement threads

pub mod identity;
pub mod thread_builder;
pub mod topology;

pub use identity::{decode_aux, encode_aux, HardwareIdentity, Identity};
pub use thread_builder::{PinningResult, ThreadBuilder};
pub use topology::{CoreRecord, PuEntry, PuRecord, Topology, NOT_FOUND};

use crate::error::Result;

/// Get the topology of the current system
pub fn detect_cpu_topology() -> Topology {
    Topology::detect()
}

/// Select the hardware identity backend for the current system
pub fn detect_identity() -> Result<Box<dyn HardwareIdentity>> {
    identity::detect()
}
