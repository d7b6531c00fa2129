//! Hardware topology model and resolver
//!
//! This module holds the processing unit (PU) and core tree of the machine and
//! translates a physical PU id, as read from hardware, into the logical PU
//! index and the physical and logical index of the owning core.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Sentinel returned by the resolver queries when a PU id is unknown.
pub const NOT_FOUND: i32 = -1;

/// A NUMA node and the PUs it owns, as listed by the operating system
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, PartialEq, Eq)]
struct NumaNode {
    id: u32,
    cpus: Vec<u32>,
}

/// Raw description of one PU, as discovered from the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuEntry {
    /// OS-assigned PU index.
    pub os_index: u32,
    /// OS-assigned core id. Only unique within its die.
    pub core_id: u32,
    /// Die id within the package, 0 on single-die packages.
    pub die_id: u32,
    /// Physical package (socket) id.
    pub package_id: u32,
    /// NUMA node owning this PU, if known.
    pub numa_node: Option<u32>,
}

/// A physical core in the topology tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreRecord {
    /// OS-assigned core id.
    pub os_index: u32,
    /// Index of the core in tree order.
    pub logical_index: u32,
    /// Package (socket) the core belongs to.
    pub package_id: u32,
    /// Die the core belongs to.
    pub die_id: u32,
}

/// A processing unit (hardware thread) in the topology tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuRecord {
    /// OS-assigned PU index.
    pub os_index: u32,
    /// Index of the PU in tree order.
    pub logical_index: u32,
    /// NUMA node owning this PU, if known.
    pub numa_node: Option<u32>,
    parent: usize,
}

/// Immutable snapshot of the machine topology.
///
/// Built once per process and shared read-only by every thread.
#[derive(Clone)]
pub struct Topology {
    cores: Vec<CoreRecord>,
    pus: Vec<PuRecord>,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let with_numa = self.pus.iter().filter(|pu| pu.numa_node.is_some()).count();
        f.debug_struct("Topology")
            .field("pus", &self.pus.len())
            .field("cores", &self.cores.len())
            .field("pus_with_numa_node", &with_numa)
            .finish()
    }
}

impl Topology {
    /// Build the tree from raw PU entries.
    ///
    /// Logical indices follow tree order: package, die, core id, then PU id.
    /// Duplicate PU ids keep their first entry.
    pub fn from_entries(entries: impl IntoIterator<Item = PuEntry>) -> Self {
        let mut entries: Vec<PuEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| (e.package_id, e.die_id, e.core_id, e.os_index));

        let mut seen = Vec::with_capacity(entries.len());
        let mut cores: Vec<CoreRecord> = Vec::new();
        let mut pus = Vec::with_capacity(entries.len());

        for entry in entries {
            if seen.contains(&entry.os_index) {
                continue;
            }
            seen.push(entry.os_index);

            let same_core = cores.last().is_some_and(|c| {
                c.package_id == entry.package_id
                    && c.die_id == entry.die_id
                    && c.os_index == entry.core_id
            });
            if !same_core {
                cores.push(CoreRecord {
                    os_index: entry.core_id,
                    logical_index: cores.len() as u32,
                    package_id: entry.package_id,
                    die_id: entry.die_id,
                });
            }

            pus.push(PuRecord {
                os_index: entry.os_index,
                logical_index: pus.len() as u32,
                numa_node: entry.numa_node,
                parent: cores.len() - 1,
            });
        }

        Self { cores, pus }
    }

    /// Detect the topology of the current system.
    ///
    /// Reads sysfs on Linux. Anywhere else, or if sysfs is unusable, every
    /// PU reported by `num_cpus` becomes its own core in package 0.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            match Self::detect_linux() {
                Ok(topology) if !topology.pus.is_empty() => return topology,
                Ok(_) => tracing::warn!("sysfs reported no online CPUs, using flat topology"),
                Err(err) => {
                    tracing::warn!("Topology detection failed, using flat topology: {err}")
                }
            }
        }

        Self::flat(num_cpus::get())
    }

    /// One PU per core, one package, no NUMA information.
    pub fn flat(pu_count: usize) -> Self {
        Self::from_entries((0..pu_count as u32).map(|pu| PuEntry {
            os_index: pu,
            core_id: pu,
            die_id: 0,
            package_id: 0,
            numa_node: None,
        }))
    }

    #[cfg(target_os = "linux")]
    fn detect_linux() -> Result<Self> {
        let cpu_root = Path::new("/sys/devices/system/cpu");
        let online = read_sysfs(&cpu_root.join("online"))?;
        let cpus = parse_cpu_list(&online);
        let numa_nodes = detect_numa_linux()?;

        let entries = cpus.into_iter().map(|cpu| {
            let base = cpu_root.join(format!("cpu{cpu}/topology"));
            let core_id = read_sysfs_u32(&base.join("core_id")).unwrap_or(cpu);
            // Older kernels have no die level.
            let die_id = read_sysfs_u32(&base.join("die_id")).unwrap_or(0);
            let package_id = read_sysfs_u32(&base.join("physical_package_id")).unwrap_or(0);
            let numa_node = numa_nodes
                .iter()
                .find(|node| node.cpus.contains(&cpu))
                .map(|node| node.id);

            PuEntry {
                os_index: cpu,
                core_id,
                die_id,
                package_id,
                numa_node,
            }
        });

        Ok(Self::from_entries(entries))
    }

    /// All PUs in tree order.
    pub fn pus(&self) -> &[PuRecord] {
        &self.pus
    }

    /// All cores in tree order.
    pub fn cores(&self) -> &[CoreRecord] {
        &self.cores
    }

    /// The core owning `pu`.
    pub fn parent(&self, pu: &PuRecord) -> &CoreRecord {
        &self.cores[pu.parent]
    }

    /// Find the PU whose physical index is `pu_id`. Linear scan.
    pub fn find_pu(&self, pu_id: u32) -> Option<&PuRecord> {
        self.pus.iter().find(|pu| pu.os_index == pu_id)
    }

    /// Logical index of the PU with physical index `pu_id`, or [`NOT_FOUND`].
    pub fn logical_pu_of(&self, pu_id: u32) -> i32 {
        self.find_pu(pu_id)
            .map_or(NOT_FOUND, |pu| to_index(pu.logical_index))
    }

    /// Physical index of the core owning PU `pu_id`, or [`NOT_FOUND`].
    pub fn physical_core_of(&self, pu_id: u32) -> i32 {
        self.find_pu(pu_id)
            .map_or(NOT_FOUND, |pu| to_index(self.parent(pu).os_index))
    }

    /// Logical index of the core owning PU `pu_id`, or [`NOT_FOUND`].
    pub fn logical_core_of(&self, pu_id: u32) -> i32 {
        self.find_pu(pu_id)
            .map_or(NOT_FOUND, |pu| to_index(self.parent(pu).logical_index))
    }

    /// NUMA node the operating system lists for PU `pu_id`.
    pub fn numa_node_of(&self, pu_id: u32) -> Option<u32> {
        self.find_pu(pu_id).and_then(|pu| pu.numa_node)
    }

    /// Create a regular topology for testing.
    ///
    /// PUs are numbered the way Linux numbers SMT siblings: all first hardware
    /// threads of every core come before any second hardware thread. Each
    /// package is its own NUMA node.
    pub fn mock(packages: u32, cores_per_package: u32, pus_per_core: u32) -> Self {
        let total_cores = packages * cores_per_package;
        let mut entries = Vec::new();

        for smt in 0..pus_per_core {
            for package in 0..packages {
                for core in 0..cores_per_package {
                    entries.push(PuEntry {
                        os_index: smt * total_cores + package * cores_per_package + core,
                        core_id: core,
                        die_id: 0,
                        package_id: package,
                        numa_node: Some(package),
                    });
                }
            }
        }

        Self::from_entries(entries)
    }
}

fn to_index(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(NOT_FOUND)
}

fn read_sysfs(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Topology {
        path: path.to_path_buf(),
        source,
    })
}

fn read_sysfs_u32(path: &Path) -> Result<u32> {
    let text = read_sysfs(path)?;
    text.trim().parse().map_err(|err| Error::Topology {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, err),
    })
}

// Linux-specific NUMA detection
#[cfg(target_os = "linux")]
fn detect_numa_linux() -> Result<Vec<NumaNode>> {
    let numa_path = PathBuf::from("/sys/devices/system/node");
    if !numa_path.exists() {
        return Ok(vec![]);
    }

    let io_err = |source| Error::Topology {
        path: numa_path.clone(),
        source,
    };

    let mut numa_nodes = Vec::new();

    // Read node directories (node0, node1, etc.)
    for entry in std::fs::read_dir(&numa_path).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();

        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(id) = file_name
            .strip_prefix("node")
            .and_then(|id| id.parse::<u32>().ok())
        else {
            continue;
        };

        let cpulist_path = path.join("cpulist");
        if !cpulist_path.exists() {
            continue;
        }

        let cpulist = read_sysfs(&cpulist_path)?;
        numa_nodes.push(NumaNode {
            id,
            cpus: parse_cpu_list(&cpulist),
        });
    }

    numa_nodes.sort_by_key(|n| n.id);
    Ok(numa_nodes)
}

/// Parse a CPU list string like "0-2,4,6-8" into a vector of PU IDs
pub fn parse_cpu_list(cpulist: &str) -> Vec<u32> {
    let mut cpus = Vec::new();

    for part in cpulist.trim().split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let range = (start.trim().parse::<u32>(), end.trim().parse::<u32>());
                if let (Ok(start), Ok(end)) = range {
                    cpus.extend(start..=end);
                }
            }
            None => {
                if let Ok(cpu) = part.trim().parse::<u32>() {
                    cpus.push(cpu);
                }
            }
        }
    }

    cpus
}
