//! Platform-specific page locking.
//!
//! Pinning keeps frame buffer planes out of swap so the native decoder never
//! stalls on a page fault mid-frame. It is a latency hint, not a correctness
//! requirement: every failure here is reported as non-fatal.

use std::io;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Lock a virtual memory range against paging.
        ///
        /// # Errors
        /// Returns the OS error if the range cannot be locked (commonly
        /// `RLIMIT_MEMLOCK` exhaustion).
        pub fn lock_region(ptr: *const u8, len: usize) -> io::Result<()> {
            // SAFETY: the caller owns [ptr, ptr+len); mlock does not move it.
            let rc = unsafe { libc::mlock(ptr.cast(), len) };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }

        /// Unlock a range previously locked with [`lock_region`].
        ///
        /// # Errors
        /// Returns the OS error on failure.
        pub fn unlock_region(ptr: *const u8, len: usize) -> io::Result<()> {
            let rc = unsafe { libc::munlock(ptr.cast(), len) };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    } else if #[cfg(target_os = "windows")] {
        use windows::Win32::System::Memory::{VirtualLock, VirtualUnlock};

        /// Lock a virtual memory range against paging.
        ///
        /// # Errors
        /// Returns the OS error if the range cannot be locked (commonly the
        /// process working-set quota).
        pub fn lock_region(ptr: *const u8, len: usize) -> io::Result<()> {
            unsafe { VirtualLock(ptr.cast_mut().cast(), len) }
                .map_err(|e| io::Error::from_raw_os_error(e.code().0))
        }

        /// Unlock a range previously locked with [`lock_region`].
        ///
        /// # Errors
        /// Returns the OS error on failure.
        pub fn unlock_region(ptr: *const u8, len: usize) -> io::Result<()> {
            unsafe { VirtualUnlock(ptr.cast_mut().cast(), len) }
                .map_err(|e| io::Error::from_raw_os_error(e.code().0))
        }
    } else {
        /// Page locking is unavailable on this target; always fails.
        ///
        /// # Errors
        /// Always returns [`io::ErrorKind::Unsupported`].
        pub fn lock_region(_ptr: *const u8, _len: usize) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        /// Page locking is unavailable on this target; always fails.
        ///
        /// # Errors
        /// Always returns [`io::ErrorKind::Unsupported`].
        pub fn unlock_region(_ptr: *const u8, _len: usize) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }
}
