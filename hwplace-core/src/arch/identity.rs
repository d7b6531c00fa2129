//! Hardware identity reader
//!
//! Reads the processing unit (PU) and NUMA node the calling thread is running
//! on, at the instant of the call.
//!
//! Linux programs `IA32_TSC_AUX` of every CPU with `(node << 12) | cpu`, so a
//! single `rdtscp` returns the time-stamp counter together with both ids. The
//! `getcpu` backend packs its answer into the same layout so that every
//! backend goes through [`decode_aux`].

use std::fmt;

use crate::error::{Error, Result};

/// Mask selecting one 12-bit field of the auxiliary register.
pub const FIELD_MASK: u32 = 0xFFF;

/// Bit offset of the NUMA node id in the auxiliary register.
pub const NUMA_SHIFT: u32 = 12;

/// Identity of the execution context at the time of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Counter value returned alongside the ids. Never compared.
    pub timestamp: u64,
    /// Physical (OS) processing unit id.
    pub pu: u32,
    /// NUMA node (socket) id.
    pub numa: u32,
}

/// Split an auxiliary register value into `(pu, numa)`.
///
/// Bits 0-11 hold the PU id and bits 12-23 the NUMA node id. Higher bits are
/// ignored.
pub const fn decode_aux(aux: u32) -> (u32, u32) {
    (aux & FIELD_MASK, (aux >> NUMA_SHIFT) & FIELD_MASK)
}

/// Pack `(pu, numa)` into the auxiliary register layout.
pub const fn encode_aux(pu: u32, numa: u32) -> u32 {
    ((numa & FIELD_MASK) << NUMA_SHIFT) | (pu & FIELD_MASK)
}

/// A way of asking the hardware where the current thread runs.
///
/// Backends are chosen once by [`detect`]; a constructed backend never fails.
pub trait HardwareIdentity: Send + Sync + fmt::Debug {
    /// Read the identity of the calling thread.
    fn read(&self) -> Identity;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// `rdtscp` based reader.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy)]
pub struct Rdtscp {
    _supported: (),
}

#[cfg(target_arch = "x86_64")]
impl Rdtscp {
    /// Returns the reader if the CPU implements `rdtscp`.
    pub fn detect() -> Option<Self> {
        rdtscp_supported().then_some(Self { _supported: () })
    }
}

#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn rdtscp_supported() -> bool {
    use std::arch::x86_64::{__cpuid, __get_cpuid_max};

    // SAFETY: cpuid exists on every x86_64 processor.
    let (max_extended, _) = unsafe { __get_cpuid_max(0x8000_0000) };
    if max_extended < 0x8000_0001 {
        return false;
    }

    // SAFETY: leaf 0x8000_0001 is within the supported range checked above.
    let leaf = unsafe { __cpuid(0x8000_0001) };
    leaf.edx & (1 << 27) != 0
}

#[cfg(target_arch = "x86_64")]
impl HardwareIdentity for Rdtscp {
    #[inline]
    fn read(&self) -> Identity {
        let mut aux = 0u32;
        // SAFETY: a `Rdtscp` only exists if CPUID reported the instruction.
        let timestamp = unsafe { std::arch::x86_64::__rdtscp(&mut aux) };
        let (pu, numa) = decode_aux(aux);

        Identity {
            timestamp,
            pu,
            numa,
        }
    }

    fn name(&self) -> &'static str {
        "rdtscp"
    }
}

/// `getcpu(2)` based reader for Linux targets without `rdtscp`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub struct GetCpu {
    _supported: (),
}

#[cfg(target_os = "linux")]
impl GetCpu {
    /// Returns the reader if the kernel answers `getcpu`.
    pub fn detect() -> Option<Self> {
        getcpu().map(|_| Self { _supported: () })
    }
}

#[cfg(target_os = "linux")]
fn getcpu() -> Option<u32> {
    let mut cpu: libc::c_uint = 0;
    let mut node: libc::c_uint = 0;

    // SAFETY: both out pointers are valid for the duration of the call and
    // the cache argument is unused by the kernel.
    let res = unsafe {
        libc::syscall(
            libc::SYS_getcpu,
            &mut cpu as *mut libc::c_uint,
            &mut node as *mut libc::c_uint,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    (res == 0).then(|| encode_aux(cpu, node))
}

#[cfg(target_os = "linux")]
fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid timespec and CLOCK_MONOTONIC always exists.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };

    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}

#[cfg(target_os = "linux")]
impl HardwareIdentity for GetCpu {
    fn read(&self) -> Identity {
        // Detection proved the call works; it has no failure mode after that.
        let aux = getcpu().unwrap_or_default();
        let (pu, numa) = decode_aux(aux);

        Identity {
            timestamp: monotonic_nanos(),
            pu,
            numa,
        }
    }

    fn name(&self) -> &'static str {
        "getcpu"
    }
}

/// Pick the best identity backend for this machine.
///
/// `rdtscp` is preferred; `getcpu` covers Linux machines without it.
#[allow(unreachable_code)]
pub fn detect() -> Result<Box<dyn HardwareIdentity>> {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(reader) = Rdtscp::detect() {
            tracing::debug!("Using rdtscp for hardware identity");
            return Ok(Box::new(reader));
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(reader) = GetCpu::detect() {
            tracing::debug!("Using getcpu for hardware identity");
            return Ok(Box::new(reader));
        }
    }

    Err(Error::UnsupportedIdentity(
        "this target has neither rdtscp nor getcpu",
    ))
}

/// Reader returning a fixed auxiliary value, for tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedIdentity {
    pub(crate) aux: u32,
}

#[cfg(test)]
impl HardwareIdentity for FixedIdentity {
    fn read(&self) -> Identity {
        let (pu, numa) = decode_aux(self.aux);
        Identity {
            timestamp: 0,
            pu,
            numa,
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_aux_all_24_bit_values() {
        for c in 0..(1u32 << 24) {
            let (pu, numa) = decode_aux(c);
            assert_eq!(pu, c & 0xFFF);
            assert_eq!(numa, (c >> 12) & 0xFFF);
        }
    }

    #[test]
    fn test_decode_aux_ignores_high_bits() {
        assert_eq!(decode_aux(0xFF00_1005), (0x005, 0x001));
        assert_eq!(decode_aux(u32::MAX), (0xFFF, 0xFFF));
    }

    #[test]
    fn test_encode_aux_matches_linux_layout() {
        // node 1, cpu 37 as written by the kernel
        let aux = (1 << 12) | 37;
        assert_eq!(encode_aux(37, 1), aux);
        assert_eq!(decode_aux(encode_aux(37, 1)), (37, 1));
    }

    #[test]
    fn test_fixed_identity() {
        let reader = FixedIdentity {
            aux: encode_aux(5, 2),
        };
        let id = reader.read();
        assert_eq!(id.pu, 5);
        assert_eq!(id.numa, 2);
    }

    #[cfg(any(target_arch = "x86_64", target_os = "linux"))]
    #[test]
    fn test_detect_reads_plausible_ids() {
        let reader = detect().unwrap();
        println!("Identity backend: {}", reader.name());

        let id = reader.read();
        assert!(id.pu <= FIELD_MASK);
        assert!(id.numa <= FIELD_MASK);
    }
}
