//! Process group over a shared memory segment.
//!
//! Rank 0 creates the segment and every other rank opens it. All collectives
//! operate on the [`GroupHeader`] at the start of the mapping.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::group::header::{GroupHeader, PAYLOAD_WORDS};
use crate::group::Collective;

/// Directory preferred for group segments.
pub const SHM_DIR: &str = "/dev/shm";

/// One rank's handle on a shared memory group segment.
pub struct ShmGroup {
    /// Memory-mapped segment; keeps `header` valid.
    _mmap: MmapMut,

    /// Header at offset 0 of the mapping.
    header: *const GroupHeader,

    /// Path to the segment file.
    path: PathBuf,

    /// Rank of this handle.
    rank: usize,

    /// Whether this handle created the segment and removes it on drop.
    owner: bool,
}

// Safety: the header is only accessed through atomics and the mapping lives
// as long as the handle.
unsafe impl Send for ShmGroup {}
unsafe impl Sync for ShmGroup {}

impl std::fmt::Debug for ShmGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmGroup")
            .field("path", &self.path)
            .field("rank", &self.rank)
            .field("ranks", &self.size())
            .field("owner", &self.owner)
            .finish()
    }
}

impl ShmGroup {
    /// Fresh segment path for a new job.
    pub fn default_path(job: Uuid) -> PathBuf {
        let dir = Path::new(SHM_DIR);
        let dir = if dir.is_dir() {
            dir.to_path_buf()
        } else {
            std::env::temp_dir()
        };
        dir.join(format!("hwplace-{}", job.as_simple()))
    }

    /// Creates the segment as rank 0 of a group of `ranks` ranks.
    ///
    /// Fails if the path already exists.
    pub fn create(path: impl Into<PathBuf>, ranks: usize) -> Result<Self> {
        let path = path.into();
        if ranks == 0 {
            return Err(Error::InvalidGroup {
                path,
                reason: "a group needs at least one rank".to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.set_len(std::mem::size_of::<GroupHeader>() as u64)?;

        // Safety: the file was just created by us and is not truncated while mapped.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let header_ptr = mmap.as_mut_ptr() as *mut GroupHeader;
        // Safety: the mapping is page aligned and exactly one header long.
        unsafe {
            std::ptr::write(header_ptr, GroupHeader::new(ranks));
            (*header_ptr).attach();
        }

        tracing::debug!("Created group segment {} for {} ranks", path.display(), ranks);

        Ok(Self {
            _mmap: mmap,
            header: header_ptr,
            path,
            rank: 0,
            owner: true,
        })
    }

    /// Opens an existing segment as `rank`.
    pub fn open(path: impl Into<PathBuf>, rank: usize) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len < std::mem::size_of::<GroupHeader>() as u64 {
            return Err(Error::InvalidGroup {
                path,
                reason: format!("segment is only {len} bytes"),
            });
        }

        // Safety: the segment is owned by rank 0, which never truncates it.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let header_ptr = mmap.as_ptr() as *const GroupHeader;
        // Safety: the length check above covers a whole header.
        let header = unsafe { &*header_ptr };

        if !header.validate() {
            return Err(Error::InvalidGroup {
                path,
                reason: "bad magic or version".to_string(),
            });
        }
        if rank == 0 || rank >= header.ranks() {
            return Err(Error::InvalidGroup {
                path,
                reason: format!("rank {rank} is not a joining rank of {}", header.ranks()),
            });
        }

        let attached = header.attach();
        tracing::debug!(
            "Rank {} joined group segment {} ({}/{} attached)",
            rank,
            path.display(),
            attached,
            header.ranks()
        );

        Ok(Self {
            _mmap: mmap,
            header: header_ptr,
            path,
            rank,
            owner: false,
        })
    }

    fn header(&self) -> &GroupHeader {
        // Safety: the pointer targets the start of `_mmap`, which outlives `self`.
        unsafe { &*self.header }
    }

    /// Returns the path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of ranks that opened the segment so far.
    pub fn attached(&self) -> usize {
        self.header().attached()
    }
}

impl Collective for ShmGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.header().ranks()
    }

    fn barrier(&self) {
        self.header().barrier();
    }

    fn broadcast(&self, words: &mut [u64]) -> Result<()> {
        if words.len() > PAYLOAD_WORDS {
            return Err(Error::PayloadTooLarge {
                len: words.len(),
                capacity: PAYLOAD_WORDS,
            });
        }

        let header = self.header();
        if self.rank == 0 {
            header.publish(words);
        }
        header.barrier();
        if self.rank != 0 {
            header.read_payload(words);
        }
        // Keeps the payload stable until every rank has read it.
        header.barrier();

        Ok(())
    }
}

impl Drop for ShmGroup {
    fn drop(&mut self) {
        if self.owner {
            // Unlinking is safe while other ranks still have it mapped.
            let _ = fs::remove_file(&self.path);
        }
    }
}
