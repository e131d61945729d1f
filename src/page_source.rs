//! Page sources: the external collaborator that hands the allocator fresh,
//! writable memory on request.
//!
//! The distilled spec picks a back-end at build time via `cfg`; this crate
//! instead takes the back-end as a value (a `PageSource` implementor) at
//! `BuddyAllocator` construction (see `REDESIGN FLAGS` in `SPEC_FULL.md`).

use core::ptr::NonNull;

use crate::error::PageSourceError;

/// A single operation: give me `len` contiguous, writable bytes aligned to
/// at least `align`.
pub trait PageSource {
    /// Requests a fresh region of at least `len` bytes, aligned to at least
    /// `align`. `align` is always a power of two no smaller than
    /// `min_block * 2^levels`, so that the buddy XOR identity holds for
    /// every chunk carved from the returned region.
    fn acquire(&mut self, len: usize, align: usize) -> Result<NonNull<u8>, PageSourceError>;
}

#[inline]
fn align_up(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(-1)
}

/// The anonymous page mapper back-end. Each call is an independent `mmap`,
/// over-allocated and aligned up to satisfy the buddy invariant. Mappings
/// are never released by the allocator — heap growth is monotonic.
#[derive(Debug, Default)]
pub struct MappedPageSource {
    _private: (),
}

impl MappedPageSource {
    pub fn new() -> Self {
        MappedPageSource { _private: () }
    }
}

impl PageSource for MappedPageSource {
    fn acquire(&mut self, len: usize, align: usize) -> Result<NonNull<u8>, PageSourceError> {
        let overalloc = len + align;
        unsafe {
            let raw = libc::mmap(
                core::ptr::null_mut(),
                overalloc,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if raw == libc::MAP_FAILED {
                return Err(PageSourceError::MapFailed {
                    requested: overalloc,
                    errno: last_errno(),
                });
            }
            let aligned = align_up(raw as usize, align);
            Ok(NonNull::new_unchecked(aligned as *mut u8))
        }
    }
}

/// The contiguous-extension back-end: grows the process break (`sbrk`-style)
/// on every call. All memory handed out lives in one ever-growing span, but
/// the allocator does not rely on that contiguity — each carved piece is
/// tracked as its own region regardless of back-end.
#[derive(Debug, Default)]
pub struct ContiguousPageSource {
    _private: (),
}

impl ContiguousPageSource {
    pub fn new() -> Self {
        ContiguousPageSource { _private: () }
    }
}

impl PageSource for ContiguousPageSource {
    fn acquire(&mut self, len: usize, align: usize) -> Result<NonNull<u8>, PageSourceError> {
        unsafe {
            #[allow(deprecated)]
            let current = libc::sbrk(0);
            if current == (-1isize) as *mut libc::c_void {
                return Err(PageSourceError::SbrkFailed {
                    requested: len,
                    errno: last_errno(),
                });
            }
            let aligned_start = align_up(current as usize, align);
            let total = (aligned_start - current as usize) + len;

            #[allow(deprecated)]
            let prev = libc::sbrk(total as libc::intptr_t);
            if prev == (-1isize) as *mut libc::c_void {
                return Err(PageSourceError::SbrkFailed {
                    requested: total,
                    errno: last_errno(),
                });
            }
            Ok(NonNull::new_unchecked(aligned_start as *mut u8))
        }
    }
}

/// Test-only back-ends, kept deterministic and free of real syscalls so the
/// engine's invariants can be checked under a test harness without
/// depending on sandbox-specific `mmap`/`sbrk` behavior. Mirrors the
/// teacher crate's dedicated mock-frame-allocator crate.
pub mod testing {
    use super::*;
    use std::alloc::{self, Layout};

    /// Hands out independent, heap-backed (via the global allocator)
    /// regions, each over-allocated and aligned up like a real mapping
    /// back-end would be. Regions are leaked for the allocator's lifetime
    /// (same monotonic-growth contract as the real back-ends) and freed
    /// when the `ArenaPageSource` is dropped.
    #[derive(Debug, Default)]
    pub struct ArenaPageSource {
        regions: Vec<(NonNull<u8>, Layout)>,
    }

    impl ArenaPageSource {
        pub fn new() -> Self {
            ArenaPageSource {
                regions: Vec::new(),
            }
        }
    }

    impl PageSource for ArenaPageSource {
        fn acquire(&mut self, len: usize, align: usize) -> Result<NonNull<u8>, PageSourceError> {
            let layout = Layout::from_size_align(len, align)
                .map_err(|_| PageSourceError::ArenaExhausted { capacity: len })?;
            let raw = unsafe { alloc::alloc_zeroed(layout) };
            let ptr = NonNull::new(raw)
                .ok_or(PageSourceError::ArenaExhausted { capacity: len })?;
            self.regions.push((ptr, layout));
            Ok(ptr)
        }
    }

    impl Drop for ArenaPageSource {
        fn drop(&mut self) {
            for (ptr, layout) in self.regions.drain(..) {
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn arena_source_returns_aligned_regions() {
        let mut source = testing::ArenaPageSource::new();
        let region = source.acquire(4096, 8192).unwrap();
        assert_eq!(region.as_ptr() as usize % 8192, 0);
    }
}
