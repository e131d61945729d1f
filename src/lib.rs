//! A power-of-two buddy-block memory allocator.
//!
//! `BuddyAllocator` services two operations — [`BuddyAllocator::allocate`]
//! and [`BuddyAllocator::release`] — over a pool of pages obtained from a
//! pluggable [`PageSource`]. Every chunk, free or allocated, carries an
//! in-band [`ChunkHeader`](chunk::ChunkHeader); a block's address encodes
//! which buddy half it is, so splitting and coalescing are pure address
//! arithmetic (`addr XOR size_from_order(order)`).
//!
//! This allocator is a plain owned value, not a global singleton: construct
//! one with a [`Config`] and a [`PageSource`], then drive it with
//! `&mut self`. It is not thread-safe and does not try to be — see
//! `SPEC_FULL.md` for the full non-goal list.

mod chunk;
mod error;
mod free_list;
mod order;
pub mod page_source;

use core::cmp::min;
use core::ptr::{self, NonNull};

pub use error::{ConfigError, PageSourceError};
pub use page_source::{ContiguousPageSource, MappedPageSource, PageSource};

use chunk::{ChunkHeader, State};
use free_list::FreeList;
use order::{order_from_size, size_from_order};

/// Construction-time parameters, validated once at [`Config::new`] rather
/// than trusted deep inside `allocate` (see `REDESIGN FLAGS` in
/// `SPEC_FULL.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    min_block: usize,
    levels: usize,
    default_heap_bytes: usize,
}

impl Config {
    /// Validates and constructs a `Config`.
    ///
    /// - `min_block` must be a power of two at least as large as the chunk
    ///   header.
    /// - `levels` must be at least 1, and `min_block << (levels - 1)` must
    ///   not overflow `usize`.
    /// - `default_heap_bytes` must be at least one order-0 footprint.
    pub fn new(
        min_block: usize,
        levels: usize,
        default_heap_bytes: usize,
    ) -> Result<Self, ConfigError> {
        if !min_block.is_power_of_two() {
            return Err(ConfigError::MinBlockNotPowerOfTwo(min_block));
        }
        if min_block < ChunkHeader::SIZE {
            return Err(ConfigError::MinBlockTooSmall {
                min_block,
                header_size: ChunkHeader::SIZE,
            });
        }
        if levels == 0 {
            return Err(ConfigError::LevelsZero(levels));
        }
        if min_block.checked_shl((levels - 1) as u32).is_none() {
            return Err(ConfigError::LevelsOverflow { min_block, levels });
        }
        if default_heap_bytes < min_block {
            return Err(ConfigError::DefaultHeapTooSmall {
                default_heap_bytes,
                min_footprint: min_block,
            });
        }
        Ok(Config {
            min_block,
            levels,
            default_heap_bytes,
        })
    }

    /// Required base alignment for every region a `PageSource` returns:
    /// `min_block * 2^levels`, the alignment that makes the buddy XOR
    /// identity valid everywhere within a region.
    fn region_align(&self) -> usize {
        self.min_block << self.levels
    }
}

impl Default for Config {
    /// `min_block = 32`, `levels = 8`, `default_heap_bytes = 4096` — the
    /// typical values from the spec's boundary scenarios.
    fn default() -> Self {
        Config::new(32, 8, 4096).expect("default configuration is always valid")
    }
}

/// One region ever handed back by the page source, tracked only so that a
/// computed buddy address can be checked to fall within memory the
/// allocator actually owns before it is dereferenced.
struct Region {
    base: NonNull<u8>,
    len: usize,
}

/// The buddy allocator itself.
///
/// `P` is the page source used to grow the heap; see [`page_source`] for
/// the shipped back-ends.
pub struct BuddyAllocator<P> {
    config: Config,
    free_lists: Vec<FreeList>,
    regions: Vec<Region>,
    heap_bytes: usize,
    page_source: P,
}

impl<P: PageSource> BuddyAllocator<P> {
    /// Constructs an allocator with no pages yet acquired; the first
    /// `allocate` call triggers the initial heap grow.
    pub fn new(config: Config, page_source: P) -> Self {
        let mut free_lists = Vec::with_capacity(config.levels);
        free_lists.resize_with(config.levels, FreeList::empty);
        BuddyAllocator {
            config,
            free_lists,
            regions: Vec::new(),
            heap_bytes: 0,
            page_source,
        }
    }

    /// Allocates at least `n` bytes, returning a null pointer if `n` is
    /// zero, exceeds the allocator's maximum order, or the page source is
    /// exhausted.
    pub fn allocate(&mut self, n: usize) -> *mut u8 {
        if n == 0 {
            return ptr::null_mut();
        }
        let Some(order) =
            order_from_size(self.config.min_block, self.config.levels, ChunkHeader::SIZE, n)
        else {
            log::debug!("allocate({n}): request exceeds the largest order this allocator manages");
            return ptr::null_mut();
        };
        unsafe { self.allocate_order(order, true) }
    }

    /// Releases a payload pointer previously returned by `allocate`. A null
    /// pointer is a no-op.
    ///
    /// # Safety-adjacent contract
    /// `ptr` must either be null or have been returned by a prior call to
    /// `allocate` on this same allocator and not yet released. Passing any
    /// other pointer is a programmer error (§7): debug builds assert, and
    /// release builds log a warning and refuse to touch the heap further.
    pub fn release(&mut self, payload_ptr: *mut u8) {
        let Some(payload) = NonNull::new(payload_ptr) else {
            return;
        };
        unsafe {
            let mut chunk = ChunkHeader::header_of(payload);
            if chunk.as_ref().state != State::InUse {
                debug_assert!(
                    false,
                    "release() called on a chunk that is not allocated (double-free or foreign pointer)"
                );
                log::warn!("release({payload_ptr:p}): double-free or foreign pointer, ignoring");
                return;
            }

            loop {
                let order = chunk.as_ref().order as usize;
                let Some(buddy) = self.buddy_of(chunk) else {
                    break;
                };
                if !self.owns(buddy) {
                    break;
                }
                let buddy_ref = buddy.as_ref();
                if buddy_ref.state != State::Free || buddy_ref.order as usize != order {
                    break;
                }
                let unlinked = self.free_lists[order].find_and_unlink(buddy);
                debug_assert!(unlinked, "buddy reported free but was not on its free list");
                log::trace!("release: merging {chunk:p} with buddy {buddy:p} at order {order}");

                let survivor_addr = min(chunk.as_ptr() as usize, buddy.as_ptr() as usize);
                let mut survivor = NonNull::new_unchecked(survivor_addr as *mut ChunkHeader);
                survivor.as_mut().order = (order + 1) as u8;
                chunk = survivor;
            }

            chunk.as_mut().state = State::Free;
            let order = chunk.as_ref().order as usize;
            self.free_lists[order].push_back(chunk);
        }
    }

    /// Tries to satisfy `order` from the free lists, splitting a larger
    /// block if needed; if nothing is available, grows the heap once and
    /// retries (never recurses past a single grow).
    unsafe fn allocate_order(&mut self, order: usize, allow_grow: bool) -> *mut u8 {
        for j in order..self.config.levels {
            if let Some(mut chunk) = self.free_lists[j].pop_front() {
                if j > order {
                    chunk = self.cascade_split(chunk, order);
                }
                chunk.as_mut().state = State::InUse;
                return ChunkHeader::payload_of(chunk).as_ptr();
            }
        }

        if !allow_grow {
            log::warn!("allocate: out of memory after growing the heap (order {order})");
            return ptr::null_mut();
        }

        let footprint = size_from_order(self.config.min_block, order);
        if self.grow(footprint).is_err() {
            return ptr::null_mut();
        }
        self.allocate_order(order, false)
    }

    /// Halves `chunk` repeatedly until it reaches `target_order`, pushing
    /// each right-hand sibling onto its order's free list.
    ///
    /// # Safety
    /// `chunk` must not be linked into any free list, and
    /// `chunk.order >= target_order`.
    unsafe fn cascade_split(
        &mut self,
        mut chunk: NonNull<ChunkHeader>,
        target_order: usize,
    ) -> NonNull<ChunkHeader> {
        while (chunk.as_ref().order as usize) > target_order {
            let region_order = chunk.as_ref().region_order;
            let new_order = chunk.as_ref().order - 1;
            chunk.as_mut().order = new_order;

            let half = size_from_order(self.config.min_block, new_order as usize);
            let sibling_addr = chunk.cast::<u8>().as_ptr().add(half);
            let sibling = ChunkHeader::write(
                NonNull::new_unchecked(sibling_addr),
                State::Free,
                new_order,
                region_order,
            );
            log::trace!(
                "split: {chunk:p} order {} -> sibling {sibling:p} order {new_order}",
                new_order + 1
            );
            self.free_lists[new_order as usize].push_back(sibling);
        }
        chunk
    }

    /// The buddy of `chunk`, or `None` if `chunk` is the root of its region
    /// (order == region_order) and so has no sibling.
    unsafe fn buddy_of(&self, chunk: NonNull<ChunkHeader>) -> Option<NonNull<ChunkHeader>> {
        let header = chunk.as_ref();
        if header.order >= header.region_order {
            return None;
        }
        let size = size_from_order(self.config.min_block, header.order as usize);
        let addr = chunk.as_ptr() as usize ^ size;
        Some(NonNull::new_unchecked(addr as *mut ChunkHeader))
    }

    fn owns(&self, chunk: NonNull<ChunkHeader>) -> bool {
        let addr = chunk.as_ptr() as usize;
        self.regions.iter().any(|r| {
            let base = r.base.as_ptr() as usize;
            addr >= base && addr < base + r.len
        })
    }

    /// Acquires fresh memory from the page source and carves it into free
    /// chunks (§4.7), returning the first (largest) chunk installed.
    unsafe fn grow(&mut self, req_bytes: usize) -> Result<NonNull<ChunkHeader>, PageSourceError> {
        let target_total = if self.heap_bytes == 0 {
            self.config.default_heap_bytes.max(req_bytes)
        } else {
            let doubled = self.heap_bytes.saturating_mul(2);
            req_bytes.max(doubled)
        };

        let align = self.config.region_align();
        let base = self.page_source.acquire(target_total, align)?;
        log::debug!("grow: acquired {target_total} bytes at {base:p}");
        self.regions.push(Region {
            base,
            len: target_total,
        });

        let max_order = self.config.levels - 1;
        let mut offset = 0usize;
        let mut largest = None;
        while target_total - offset >= self.config.min_block {
            let remaining = target_total - offset;
            let mut order = max_order;
            while order > 0 && size_from_order(self.config.min_block, order) > remaining {
                order -= 1;
            }
            let footprint = size_from_order(self.config.min_block, order);
            if footprint > remaining {
                break;
            }

            let chunk_addr = NonNull::new_unchecked(base.as_ptr().add(offset));
            let chunk = ChunkHeader::write(chunk_addr, State::Free, order as u8, order as u8);
            self.free_lists[order].push_back(chunk);
            largest.get_or_insert(chunk);

            offset += footprint;
        }
        self.heap_bytes += target_total;

        largest.ok_or(PageSourceError::ArenaExhausted {
            capacity: target_total,
        })
    }
}
