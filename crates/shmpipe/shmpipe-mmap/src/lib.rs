//! File-backed shared memory regions.
//!
//! A region is a file (normally under `/dev/shm`) mapped `MAP_SHARED` into
//! every process that opens it. One process creates the file and owns it;
//! the owner removes the file again when the region is dropped.
//!
//! All access goes through bounds-checked copies (`read_at` / `write_at`).
//! No Rust reference to the mapped bytes is ever handed out, because the
//! peer process may be writing other parts of the region at the same time.
//! Which byte ranges are safe to touch at any instant is decided by the
//! caller's own protocol (the chunk semaphores in `shmpipe-core`).

use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
};
use tracing::{debug, warn};

pub struct SharedRegion {
    path: PathBuf,
    owner: bool,
    _file: File,
    /// Keeps the mapping alive; all access goes through `base`.
    _mmap: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping lives as long as `SharedRegion` and is only accessed
// through raw-pointer copies. Data races on the mapped bytes are excluded by
// the caller's cross-process protocol, the same way they must be excluded
// for the peer process.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or truncate) the file at `path`, size it to `size_bytes` and
    /// map it read-write. The returned region owns the file.
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: usize) -> io::Result<Self> {
        if size_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared region must not be empty",
            ));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size_bytes as u64)?;

        let region = Self::map(path, file, true)?;
        debug!(path = %region.path.display(), len = region.len, "created shared region");
        Ok(region)
    }

    /// Open an existing region created by another process and map it
    /// read-write. Fails with `NotFound` if the owner has not created it yet
    /// and with `InvalidData` if its size differs from `expected_len`.
    pub fn open<P: AsRef<Path>>(path: P, expected_len: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let actual = file.metadata()?.len();
        if actual != expected_len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "region '{}' is {actual} bytes, expected {expected_len}",
                    path.display()
                ),
            ));
        }

        let region = Self::map(path, file, false)?;
        debug!(path = %region.path.display(), len = region.len, "opened shared region");
        Ok(region)
    }

    fn map(path: PathBuf, file: File, owner: bool) -> io::Result<Self> {
        // SAFETY: the file stays open for the lifetime of the mapping, and
        // every access is a bounds-checked raw copy (see module docs).
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let len = mmap.len();
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| io::Error::other("mmap returned a null base address"))?;

        Ok(Self {
            path,
            owner,
            _file: file,
            _mmap: mmap,
            base,
            len,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for the process that created the region.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region.
    #[inline]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked above; `buf` is a distinct Rust allocation.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`.
    #[inline]
    pub fn write_at(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: range checked above; `data` is a distinct Rust allocation.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    #[inline]
    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "access of {len} bytes at offset {offset} is outside region of {} bytes",
                    self.len
                ),
            )),
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed shared region"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove shared region"),
        }
    }
}
