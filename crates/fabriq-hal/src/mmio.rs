//! Memory-mapped I/O windows
//!
//! Maps a physical window of the fabric (through `/dev/mem`, or any file
//! standing in for it during tests) and exposes volatile 32-bit register
//! access plus byte-level copies for buffer windows. Mapping and unmapping
//! go through `rustix`; the only unsafe code is the mmap itself and the
//! volatile accesses, both bounds-checked.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;

use crate::error::{HalError, Result};

/// One mapped window of the fabric address space.
pub struct MappedRegion {
    /// Start of the requested window (page-alignment delta already applied).
    ptr: *mut u8,
    /// Usable window size in bytes.
    len: usize,
    /// Pointer actually returned by mmap, needed for munmap.
    map_ptr: *mut u8,
    /// Total mapped length including the alignment delta.
    map_len: usize,
    /// Base address the window was mapped at, for diagnostics.
    base: u64,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns its mapping exclusively; mmap'd memory is
// process-wide, so moving the handle between threads does not invalidate it.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - all accesses are bounds-checked volatile reads/writes of
// device registers; interleaving from several threads cannot corrupt the
// mapping itself, and register-level ordering is the caller's concern.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `file` starting at `base`.
    ///
    /// `base` does not have to be page-aligned; the mapping is widened to
    /// the containing page boundary internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the mmap fails.
    pub fn map(file: &File, base: u64, len: usize) -> Result<Self> {
        let page = rustix::param::page_size() as u64;
        let delta = (base % page) as usize;
        let map_base = base - delta as u64;
        let map_len = len + delta;

        // SAFETY: mapping a file-backed window; addr is a hint (null), the
        // fd is open for the duration of the call and the kernel validates
        // the offset/length. On success ptr is valid for map_len bytes until
        // the munmap in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                map_base,
            )
            .map_err(|e| {
                HalError::register_io(base, format!("cannot map {len} byte window: {e}"))
            })?
        };

        tracing::debug!(base = format_args!("{base:#x}"), len, "mapped fabric window");

        let map_ptr = ptr.cast::<u8>();
        Ok(Self {
            // SAFETY: delta < page size <= map_len, so the offset pointer
            // stays inside the mapping.
            ptr: unsafe { map_ptr.add(delta) },
            len,
            map_ptr,
            map_len,
            base,
        })
    }

    /// Base address this window was mapped at.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Usable window size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when `count` bytes at `offset` fit inside the window.
    #[must_use]
    pub fn contains(&self, offset: u64, count: usize) -> bool {
        (offset as usize)
            .checked_add(count)
            .is_some_and(|end| end <= self.len)
    }

    /// Read a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the window size.
    #[must_use]
    pub fn read32(&self, offset: u64) -> u32 {
        assert!(self.contains(offset, 4), "register offset out of bounds");
        // SAFETY: ptr is valid for len bytes, the bounds were just checked
        // and registers are naturally u32-aligned by the hardware layout.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset as usize).cast::<u32>()) }
    }

    /// Write a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the window size.
    pub fn write32(&self, offset: u64, value: u32) {
        assert!(self.contains(offset, 4), "register offset out of bounds");
        // SAFETY: ptr is valid for len bytes, the bounds were just checked
        // and registers are naturally u32-aligned by the hardware layout.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset as usize).cast::<u32>(), value);
        }
    }

    /// Copy bytes out of the window.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window size.
    pub fn read_bytes(&self, offset: u64, out: &mut [u8]) {
        assert!(self.contains(offset, out.len()), "range out of bounds");
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: bounds checked above; volatile because the device may
            // change the window contents at any time.
            *byte = unsafe { std::ptr::read_volatile(self.ptr.add(offset as usize + i)) };
        }
    }

    /// Copy bytes into the window.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window size.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) {
        assert!(self.contains(offset, data.len()), "range out of bounds");
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: bounds checked above; volatile so the compiler keeps
            // every store, stores to device memory have side effects.
            unsafe {
                std::ptr::write_volatile(self.ptr.add(offset as usize + i), *byte);
            }
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: map_ptr/map_len are exactly what mmap returned; Drop runs
        // at most once and no references into the window outlive self.
        unsafe {
            let _ = munmap(self.map_ptr.cast(), self.map_len);
        }
        tracing::debug!(base = format_args!("{:#x}", self.base), "unmapped fabric window");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(len: u64) -> (std::path::PathBuf, File) {
        let path = std::env::temp_dir().join(format!(
            "fabriq-mmio-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(len).unwrap();
        file.flush().unwrap();
        (path, file)
    }

    #[test]
    fn test_register_roundtrip_through_mapping() {
        let (path, file) = scratch_file(0x1000);
        let region = MappedRegion::map(&file, 0, 0x1000).unwrap();

        region.write32(0x10, 0xdead_beef);
        assert_eq!(region.read32(0x10), 0xdead_beef);

        let mut bytes = [0u8; 4];
        region.read_bytes(0x10, &mut bytes);
        assert_eq!(u32::from_le_bytes(bytes), 0xdead_beef);

        drop(region);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_bounds_are_enforced() {
        let (path, file) = scratch_file(0x100);
        let region = MappedRegion::map(&file, 0, 0x100).unwrap();

        assert!(region.contains(0xfc, 4));
        assert!(!region.contains(0xfd, 4));

        drop(region);
        let _ = std::fs::remove_file(path);
    }
}
