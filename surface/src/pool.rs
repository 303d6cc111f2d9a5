//! Aligned, optionally page-locked frame buffer allocation.

use std::fmt;

use crate::format::BufferFormat;
use crate::sys;

/// Alignment the native engine requires for every plane base address.
pub const PLANE_ALIGNMENT: usize = 32;

/// Why a frame buffer could not be allocated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// `pitch × lines` overflows the address space.
    #[error("plane {plane} size overflows ({pitch} x {lines})")]
    SizeOverflow {
        /// Index of the offending plane.
        plane: usize,
        /// Requested pitch in bytes.
        pitch: u32,
        /// Requested line count.
        lines: u32,
    },
}

/// One contiguous memory region of a frame buffer, aligned for the engine.
///
/// The region is over-allocated by the alignment and the exposed view is
/// offset so its base address is a multiple of [`PLANE_ALIGNMENT`], without
/// assuming anything about the allocator's own alignment guarantees. Raw
/// addresses escape only at the two foreign-function boundaries: handing the
/// plane to the engine for filling, and to the render callback for display.
pub struct PlaneBuffer {
    raw: Vec<u8>,
    offset: usize,
    len: usize,
    pinned: bool,
}

impl PlaneBuffer {
    /// Allocate `len` bytes aligned to `align`, optionally page-locked.
    fn allocate(len: usize, align: usize, pin: bool) -> Self {
        let raw = vec![0u8; len + align];
        let addr = raw.as_ptr() as usize;
        // Padding that moves the view onto the next aligned address.
        let offset = (align - (addr % align)) % align;

        let mut plane = Self {
            raw,
            offset,
            len,
            pinned: false,
        };
        if pin {
            match sys::lock_region(plane.as_ptr(), plane.len) {
                Ok(()) => plane.pinned = true,
                // Non-fatal: degrade to unpinned memory.
                Err(err) => log::warn!("failed to pin {len}-byte plane: {err}"),
            }
        }
        plane
    }

    /// Base address of the aligned region.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.raw[self.offset..].as_ptr()
    }

    /// Mutable base address of the aligned region, for the engine to fill.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.raw[self.offset..].as_mut_ptr()
    }

    /// The aligned region as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.raw[self.offset..self.offset + self.len]
    }

    /// The aligned region as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[self.offset..self.offset + self.len]
    }

    /// Usable size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is zero-sized (never true for validated formats).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the region is currently locked against paging.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.pinned
    }
}

impl Drop for PlaneBuffer {
    fn drop(&mut self) {
        if self.pinned {
            // Unlock before the backing memory is released.
            if let Err(err) = sys::unlock_region(self.as_ptr(), self.len) {
                log::warn!("failed to unpin {}-byte plane: {err}", self.len);
            }
        }
    }
}

impl fmt::Debug for PlaneBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneBuffer")
            .field("len", &self.len)
            .field("pinned", &self.pinned)
            .finish_non_exhaustive()
    }
}

/// A complete frame buffer: one aligned region per plane, plus its layout.
///
/// Owned exclusively by the [`FrameBufferPool`]; the engine and the render
/// callback only ever see raw plane addresses, never ownership.
#[derive(Debug)]
pub struct FrameBuffer {
    planes: Vec<PlaneBuffer>,
    format: BufferFormat,
}

impl FrameBuffer {
    /// The layout this buffer was allocated for.
    #[must_use]
    pub const fn format(&self) -> &BufferFormat {
        &self.format
    }

    /// The planes of this buffer.
    #[must_use]
    pub fn planes(&self) -> &[PlaneBuffer] {
        &self.planes
    }

    /// Mutable access to the planes.
    pub fn planes_mut(&mut self) -> &mut [PlaneBuffer] {
        &mut self.planes
    }

    /// Writable base addresses of every plane, for the engine to fill.
    pub fn plane_ptrs(&mut self) -> Vec<*mut u8> {
        self.planes.iter_mut().map(PlaneBuffer::as_mut_ptr).collect()
    }

    /// Read-only base addresses of every plane, for the render callback.
    #[must_use]
    pub fn plane_ptrs_const(&self) -> Vec<*const u8> {
        self.planes.iter().map(PlaneBuffer::as_ptr).collect()
    }
}

/// Allocates frame buffers and controls when old ones may be released.
///
/// On a format change the previous buffer is *retired*, not freed: the native
/// engine may still briefly reference the old layout mid-transition, so
/// retired buffers survive until the engine's cleanup hook triggers
/// [`release_retired`](Self::release_retired) or [`free`](Self::free).
pub struct FrameBufferPool {
    pin_memory: bool,
    current: Option<FrameBuffer>,
    retired: Vec<FrameBuffer>,
}

impl FrameBufferPool {
    /// Create a pool; `pin_memory` requests page-locking of every plane.
    #[must_use]
    pub const fn new(pin_memory: bool) -> Self {
        Self {
            pin_memory,
            current: None,
            retired: Vec::new(),
        }
    }

    /// Allocate a buffer for `format`, retiring any current buffer.
    ///
    /// # Errors
    /// Returns [`AllocError`] if a plane size overflows; allocation failure
    /// is fatal to the ongoing format negotiation.
    pub fn allocate(&mut self, format: &BufferFormat) -> Result<(), AllocError> {
        let mut planes = Vec::with_capacity(format.plane_count());
        for (i, (&pitch, &lines)) in format.pitches().iter().zip(format.lines()).enumerate() {
            let len = format.plane_size(i).ok_or(AllocError::SizeOverflow {
                plane: i,
                pitch,
                lines,
            })?;
            planes.push(PlaneBuffer::allocate(len, PLANE_ALIGNMENT, self.pin_memory));
        }

        if let Some(old) = self.current.take() {
            log::debug!(
                "retiring {} buffer pending engine cleanup",
                old.format().chroma()
            );
            self.retired.push(old);
        }
        self.current = Some(FrameBuffer {
            planes,
            format: format.clone(),
        });
        Ok(())
    }

    /// The buffer for the active format, if one is allocated.
    pub fn current_mut(&mut self) -> Option<&mut FrameBuffer> {
        self.current.as_mut()
    }

    /// Read-only view of the active buffer.
    #[must_use]
    pub const fn current(&self) -> Option<&FrameBuffer> {
        self.current.as_ref()
    }

    /// Release buffers retired by earlier format changes.
    ///
    /// Only called once the engine has signalled cleanup for the old format.
    pub fn release_retired(&mut self) {
        self.retired.clear();
    }

    /// Release everything: the active buffer and all retired ones.
    ///
    /// Freeing when nothing is allocated is a programming error: it panics in
    /// debug builds and is logged in release builds.
    pub fn free(&mut self) {
        let had_current = self.current.take().is_some();
        let had_retired = !self.retired.is_empty();
        self.retired.clear();
        if !had_current && !had_retired {
            debug_assert!(false, "frame buffer pool freed twice");
            log::error!("frame buffer pool freed twice");
        }
    }

    /// Whether an active buffer exists.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    /// Number of buffers awaiting engine cleanup.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

impl fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("pin_memory", &self.pin_memory)
            .field("allocated", &self.is_allocated())
            .field("retired", &self.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FourCc;

    fn format(pitch: u32, lines: u32) -> BufferFormat {
        BufferFormat::new(FourCc::RV32, pitch / 4, lines, vec![pitch], vec![lines]).unwrap()
    }

    #[test]
    fn planes_are_aligned_across_capacities() {
        for len in [1usize, 7, 31, 32, 33, 4096, 2560 * 480] {
            let plane = PlaneBuffer::allocate(len, PLANE_ALIGNMENT, false);
            assert_eq!(
                plane.as_ptr() as usize % PLANE_ALIGNMENT,
                0,
                "len={len} not aligned"
            );
            assert!(plane.as_slice().len() >= len);
        }
    }

    #[test]
    fn aligned_view_is_writable_over_its_full_length() {
        let mut plane = PlaneBuffer::allocate(100, PLANE_ALIGNMENT, false);
        plane.as_mut_slice().fill(0xAB);
        assert!(plane.as_slice().iter().all(|&b| b == 0xAB));
        assert_eq!(plane.len(), 100);
    }

    #[test]
    fn allocate_builds_one_plane_per_format_entry() {
        let format = BufferFormat::new(
            FourCc::I420,
            640,
            480,
            vec![640, 320, 320],
            vec![480, 240, 240],
        )
        .unwrap();
        let mut pool = FrameBufferPool::new(false);
        pool.allocate(&format).unwrap();

        let buffer = pool.current().unwrap();
        assert_eq!(buffer.planes().len(), 3);
        assert_eq!(buffer.planes()[0].len(), 640 * 480);
        assert_eq!(buffer.planes()[1].len(), 320 * 240);
        assert_eq!(buffer.plane_ptrs_const().len(), 3);
    }

    #[test]
    fn reallocation_retires_until_released() {
        let mut pool = FrameBufferPool::new(false);
        pool.allocate(&format(2560, 480)).unwrap();
        pool.allocate(&format(5120, 960)).unwrap();

        // The old buffer must survive the format change.
        assert_eq!(pool.retired_count(), 1);
        assert_eq!(pool.current().unwrap().format().height(), 960);

        pool.release_retired();
        assert_eq!(pool.retired_count(), 0);
        assert!(pool.is_allocated());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freed twice")]
    fn double_free_fails_loudly_in_debug() {
        let mut pool = FrameBufferPool::new(false);
        pool.allocate(&format(64, 16)).unwrap();
        pool.free();
        pool.free();
    }

    #[test]
    fn pinning_failure_degrades_gracefully() {
        // Whether pinning succeeds depends on RLIMIT_MEMLOCK; either way the
        // allocation must come back usable.
        let mut pool = FrameBufferPool::new(true);
        pool.allocate(&format(2560, 480)).unwrap();
        let buffer = pool.current_mut().unwrap();
        buffer.planes_mut()[0].as_mut_slice()[0] = 1;
        assert_eq!(buffer.planes()[0].as_slice()[0], 1);
    }
}
