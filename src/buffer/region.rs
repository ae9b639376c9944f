/*
 * SHM RELAY - SHARED MEMORY REGION
 * =================================================================
 * Component Name: src/buffer/region.rs
 * Core Responsibility: Map the 4096-byte buffer and expose its lock byte, length field and payload.
 * Design Pattern: RAII over Mapped File
 * =================================================================
 */

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::AtomicU8;

use memmap2::MmapMut;
use tracing::{debug, info, warn};

use super::{validate_name, BUF_SIZE, DATA_OFFSET, LEN_OFFSET, LEN_SIZE, LOCK_OFFSET, MAX_DATA_SIZE};
use crate::error::{RelayError, RelayResult};

const SHM_DIR: &str = "/dev/shm";

/// Who is responsible for the name on disk.
#[derive(Debug)]
enum Backing {
    /// Process-private mapping, nothing to unlink.
    Anonymous,
    /// We created the file and unlink it on drop.
    Created(PathBuf),
    /// Someone else created it; we only unmap.
    Opened(PathBuf),
}

/// The raw shared region. Every accessor below is unsynchronized; callers
/// go through [`super::ShmLock`] before touching the length or payload.
pub struct SharedBuffer {
    name: String,
    base: *mut u8,
    backing: Backing,
    _mmap: MmapMut,
}

// The mapping lives as long as the struct and all mutation of the length
// and payload happens under the lock byte.
unsafe impl Send for SharedBuffer {}
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Create a new named region, zero-filled, lock byte free.
    /// Fails if a region with the same name already exists.
    pub fn create(name: &str) -> RelayResult<Self> {
        validate_name(name)?;
        let path = region_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| RelayError::Bootstrap(format!("SHM create {}: {}", path.display(), e)))?;

        // A fresh file of the right length reads back as zeros.
        file.set_len(BUF_SIZE as u64)
            .map_err(|e| RelayError::Bootstrap(format!("SHM truncate error: {}", e)))?;

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RelayError::Bootstrap(format!("Mmap error: {}", e)))?
        };

        info!("SHM: created region '{}' at {}", name, path.display());
        Ok(Self::from_mmap(name, mmap, Backing::Created(path)))
    }

    /// Map a region created by another local process.
    pub fn open(name: &str) -> RelayResult<Self> {
        validate_name(name)?;
        let path = region_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| RelayError::Bootstrap(format!("SHM open {}: {}", path.display(), e)))?;

        let len = file
            .metadata()
            .map_err(|e| RelayError::Bootstrap(format!("SHM stat error: {}", e)))?
            .len();
        if len != BUF_SIZE as u64 {
            return Err(RelayError::Bootstrap(format!(
                "SHM size mismatch for '{}': {} != {} bytes",
                name, len, BUF_SIZE
            )));
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RelayError::Bootstrap(format!("Mmap error: {}", e)))?
        };

        info!("SHM: opened region '{}' at {}", name, path.display());
        Ok(Self::from_mmap(name, mmap, Backing::Opened(path)))
    }

    /// In-process region with the same layout, not visible to other processes.
    pub fn anonymous(name: &str) -> RelayResult<Self> {
        validate_name(name)?;
        let mmap = MmapMut::map_anon(BUF_SIZE)
            .map_err(|e| RelayError::Bootstrap(format!("Anonymous mmap error: {}", e)))?;
        debug!("SHM: anonymous region '{}'", name);
        Ok(Self::from_mmap(name, mmap, Backing::Anonymous))
    }

    fn from_mmap(name: &str, mut mmap: MmapMut, backing: Backing) -> Self {
        let base = mmap.as_mut_ptr();
        Self {
            name: name.to_string(),
            base,
            backing,
            _mmap: mmap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file, `None` for anonymous regions.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Anonymous => None,
            Backing::Created(p) | Backing::Opened(p) => Some(p),
        }
    }

    // =================================================================
    // Field accessors (lock discipline is the caller's job)
    // =================================================================

    pub(crate) fn lock_cell(&self) -> &AtomicU8 {
        // AtomicU8 has the same size and alignment as u8.
        unsafe { &*(self.base.add(LOCK_OFFSET) as *const AtomicU8) }
    }

    pub(crate) fn read_len(&self) -> u32 {
        let mut raw = [0u8; LEN_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(LEN_OFFSET), raw.as_mut_ptr(), LEN_SIZE);
        }
        u32::from_le_bytes(raw)
    }

    pub(crate) fn write_len(&self, len: u32) {
        let raw = len.to_le_bytes();
        unsafe {
            ptr::copy_nonoverlapping(raw.as_ptr(), self.base.add(LEN_OFFSET), LEN_SIZE);
        }
    }

    /// Copy of the whole payload region (4091 bytes).
    pub(crate) fn payload(&self) -> Vec<u8> {
        let mut out = vec![0u8; MAX_DATA_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(DATA_OFFSET), out.as_mut_ptr(), MAX_DATA_SIZE);
        }
        out
    }

    /// Write `data` at the payload offset and zero the remainder.
    pub(crate) fn write_payload(&self, data: &[u8]) {
        debug_assert!(data.len() <= MAX_DATA_SIZE);
        let n = data.len().min(MAX_DATA_SIZE);
        unsafe {
            let dst = self.base.add(DATA_OFFSET);
            ptr::copy_nonoverlapping(data.as_ptr(), dst, n);
            ptr::write_bytes(dst.add(n), 0, MAX_DATA_SIZE - n);
        }
    }

    // =================================================================
    // Raw access, bypassing the lock (diagnostics and fault injection)
    // =================================================================

    /// Read `len` bytes starting at `offset` without taking the lock.
    pub fn read_raw(&self, offset: usize, len: usize) -> RelayResult<Vec<u8>> {
        check_bounds(offset, len)?;
        let mut out = vec![0u8; len];
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Overwrite bytes starting at `offset` without taking the lock.
    pub fn write_raw(&self, offset: usize, bytes: &[u8]) -> RelayResult<()> {
        check_bounds(offset, bytes.len())?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset), bytes.len());
        }
        Ok(())
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if let Backing::Created(path) = &self.backing {
            match std::fs::remove_file(path) {
                Ok(()) => info!("SHM: unlinked region '{}'", self.name),
                Err(e) => warn!("SHM: failed to unlink {}: {}", path.display(), e),
            }
        }
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("name", &self.name)
            .field("backing", &self.backing)
            .finish()
    }
}

fn check_bounds(offset: usize, len: usize) -> RelayResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= BUF_SIZE => Ok(()),
        _ => Err(RelayError::ProtocolViolation(format!(
            "raw access {}..{} outside {}-byte region",
            offset,
            offset.saturating_add(len),
            BUF_SIZE
        ))),
    }
}

/// `/dev/shm/<name>` where available, the temp dir otherwise.
pub fn region_path(name: &str) -> PathBuf {
    let dir = Path::new(SHM_DIR);
    if dir.is_dir() {
        dir.join(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_region_starts_zeroed() {
        let region = SharedBuffer::anonymous("psm_anon").unwrap();
        assert_eq!(region.read_len(), 0);
        assert!(region.payload().iter().all(|b| *b == 0));
        assert!(region.path().is_none());
    }

    #[test]
    fn payload_write_zero_fills_the_tail() {
        let region = SharedBuffer::anonymous("psm_tail").unwrap();
        region.write_payload(&[0xAA; 100]);
        region.write_payload(b"abc");
        let payload = region.payload();
        assert_eq!(&payload[..3], b"abc");
        assert!(payload[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn raw_access_is_bounds_checked() {
        let region = SharedBuffer::anonymous("psm_bounds").unwrap();
        assert!(region.write_raw(BUF_SIZE - 1, &[1]).is_ok());
        assert!(region.write_raw(BUF_SIZE - 1, &[1, 2]).is_err());
        assert!(region.read_raw(usize::MAX, 2).is_err());
    }

    #[test]
    fn created_region_is_unlinked_on_drop() {
        let name = crate::buffer::generate_name();
        let path = {
            let region = SharedBuffer::create(&name).unwrap();
            let path = region.path().unwrap().to_path_buf();
            assert!(path.exists());
            assert!(SharedBuffer::create(&name).is_err(), "duplicate create must fail");
            path
        };
        assert!(!path.exists());
    }
}
