//! Bitmap-based physical frame allocator.
//!
//! Each bit represents one 4 KiB frame; 1 = allocated/reserved, 0 = free.
//! Word-level scanning with `trailing_zeros()` keeps allocation close to
//! O(1) amortized via a search hint that tracks the lowest word known to
//! contain a free bit.

use talon_core::addr::PhysAddr;
use talon_core::sync::SpinLock;

use crate::error::{MmError, Result};

const FRAME_SIZE: u64 = 4096;
const BITS_PER_WORD: usize = 64;

/// A contiguous span of physical memory discovered at boot.
#[derive(Debug, Clone, Copy)]
pub struct PhysMemoryRegion {
    /// Start address of the region.
    pub start: PhysAddr,
    /// Size of the region in bytes.
    pub size: u64,
    /// Whether the firmware/bootloader reports this region as usable RAM.
    pub usable: bool,
}

/// A single physical frame index (`addr / PAGE_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(u64);

impl Frame {
    /// Returns the frame containing the given physical address.
    pub const fn containing_address(addr: PhysAddr) -> Self {
        Self(addr.as_u64() / FRAME_SIZE)
    }

    /// Returns this frame's start address.
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr::new(self.0 * FRAME_SIZE)
    }

    /// Returns the raw frame index.
    pub const fn index(self) -> u64 {
        self.0
    }
}

struct Inner {
    bitmap: alloc::vec::Vec<u64>,
    total_frames: usize,
    free_count: usize,
    search_hint: usize,
}

/// A bitmap-based physical frame allocator.
///
/// Interior mutability via [`SpinLock`] so all public methods take `&self`,
/// matching the other global-singleton subsystems (dcache, run queues).
pub struct BitmapAllocator {
    inner: SpinLock<Inner>,
}

impl BitmapAllocator {
    /// Builds an allocator tracking every frame up to the end of the
    /// highest usable region, marking non-usable regions permanently
    /// reserved.
    pub fn new(regions: &[PhysMemoryRegion]) -> Result<Self> {
        let max_phys = regions
            .iter()
            .filter(|r| r.usable)
            .map(|r| r.start.as_u64() + r.size)
            .max()
            .unwrap_or(0);
        if max_phys == 0 {
            return Err(MmError::OutOfMemory);
        }

        let total_frames = (max_phys / FRAME_SIZE) as usize;
        let bitmap_words = total_frames.div_ceil(BITS_PER_WORD);
        let mut bitmap = alloc::vec![u64::MAX; bitmap_words];

        let mut free_count = 0usize;
        for region in regions.iter().filter(|r| r.usable) {
            let region_start_frame = (region.start.as_u64() / FRAME_SIZE) as usize;
            let region_frame_count = (region.size / FRAME_SIZE) as usize;
            for i in 0..region_frame_count {
                let frame_idx = region_start_frame + i;
                if frame_idx < total_frames {
                    let word_idx = frame_idx / BITS_PER_WORD;
                    let bit_idx = frame_idx % BITS_PER_WORD;
                    if bitmap[word_idx] & (1u64 << bit_idx) != 0 {
                        bitmap[word_idx] &= !(1u64 << bit_idx);
                        free_count += 1;
                    }
                }
            }
        }

        Ok(Self {
            inner: SpinLock::named(
                "pmm",
                Inner {
                    bitmap,
                    total_frames,
                    free_count,
                    search_hint: 0,
                },
            ),
        })
    }

    /// Reserves `count` frames starting at `start` (e.g. the kernel image
    /// or a bootloader-reported reclaim-later region) as already in use.
    pub fn reserve(&self, start: Frame, count: usize) {
        let mut inner = self.inner.lock();
        for i in 0..count {
            let fi = (start.index() as usize) + i;
            if fi >= inner.total_frames {
                break;
            }
            let word_idx = fi / BITS_PER_WORD;
            let bit_idx = fi % BITS_PER_WORD;
            if inner.bitmap[word_idx] & (1u64 << bit_idx) == 0 {
                inner.bitmap[word_idx] |= 1u64 << bit_idx;
                inner.free_count -= 1;
            }
        }
    }

    /// Allocates a single 4 KiB physical frame.
    pub fn allocate_frame(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        if inner.free_count == 0 {
            return None;
        }

        let words = inner.bitmap.len();
        let start = inner.search_hint;
        for offset in 0..words {
            let word_idx = (start + offset) % words;
            let word = inner.bitmap[word_idx];
            if word == u64::MAX {
                continue;
            }
            let bit_idx = (!word).trailing_zeros() as usize;
            let frame_idx = word_idx * BITS_PER_WORD + bit_idx;
            if frame_idx >= inner.total_frames {
                continue;
            }
            inner.bitmap[word_idx] |= 1u64 << bit_idx;
            inner.free_count -= 1;
            inner.search_hint = word_idx;
            return Some(Frame(frame_idx as u64));
        }
        None
    }

    /// Deallocates a previously allocated frame.
    pub fn deallocate_frame(&self, frame: Frame) -> Result<()> {
        let mut inner = self.inner.lock();
        let frame_idx = frame.index() as usize;
        if frame_idx >= inner.total_frames {
            return Err(MmError::InvalidFrame);
        }
        let word_idx = frame_idx / BITS_PER_WORD;
        let bit_idx = frame_idx % BITS_PER_WORD;
        debug_assert!(
            inner.bitmap[word_idx] & (1u64 << bit_idx) != 0,
            "double free of frame {frame_idx}"
        );
        inner.bitmap[word_idx] &= !(1u64 << bit_idx);
        inner.free_count += 1;
        if word_idx < inner.search_hint {
            inner.search_hint = word_idx;
        }
        Ok(())
    }

    /// Returns the number of free frames.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Returns the total number of tracked frames.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }
}

/// Global physical memory manager, initialized once at boot.
pub static PMM: SpinLock<Option<BitmapAllocator>> = SpinLock::named("PMM", None);

/// Initializes the global PMM from a boot-reported memory map.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(regions: &[PhysMemoryRegion]) {
    let allocator = BitmapAllocator::new(regions).expect("failed to initialize PMM");
    let mut pmm = PMM.lock();
    assert!(pmm.is_none(), "PMM already initialized");
    *pmm = Some(allocator);
}

/// Runs `f` with a reference to the global PMM.
///
/// # Panics
///
/// Panics if the PMM has not been initialized.
pub fn with_pmm<R>(f: impl FnOnce(&BitmapAllocator) -> R) -> R {
    let pmm = PMM.lock();
    f(pmm.as_ref().expect("PMM not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> alloc::vec::Vec<PhysMemoryRegion> {
        alloc::vec![PhysMemoryRegion {
            start: PhysAddr::new(0),
            size: 16 * FRAME_SIZE,
            usable: true,
        }]
    }

    #[test]
    fn allocates_and_frees() {
        let pmm = BitmapAllocator::new(&regions()).unwrap();
        assert_eq!(pmm.free_frames(), 16);
        let f0 = pmm.allocate_frame().unwrap();
        assert_eq!(f0.index(), 0);
        assert_eq!(pmm.free_frames(), 15);
        pmm.deallocate_frame(f0).unwrap();
        assert_eq!(pmm.free_frames(), 16);
    }

    #[test]
    fn exhausts_then_refuses() {
        let pmm = BitmapAllocator::new(&regions()).unwrap();
        let mut frames = alloc::vec::Vec::new();
        for _ in 0..16 {
            frames.push(pmm.allocate_frame().unwrap());
        }
        assert!(pmm.allocate_frame().is_none());
        pmm.deallocate_frame(frames.pop().unwrap()).unwrap();
        assert!(pmm.allocate_frame().is_some());
    }

    #[test]
    fn reserve_marks_frames_unavailable() {
        let pmm = BitmapAllocator::new(&regions()).unwrap();
        pmm.reserve(Frame(0), 4);
        assert_eq!(pmm.free_frames(), 12);
    }

    #[test]
    fn non_usable_region_is_never_allocated() {
        let regions = alloc::vec![
            PhysMemoryRegion {
                start: PhysAddr::new(0),
                size: 4 * FRAME_SIZE,
                usable: false,
            },
            PhysMemoryRegion {
                start: PhysAddr::new(4 * FRAME_SIZE),
                size: 4 * FRAME_SIZE,
                usable: true,
            },
        ];
        let pmm = BitmapAllocator::new(&regions).unwrap();
        assert_eq!(pmm.free_frames(), 4);
        let f = pmm.allocate_frame().unwrap();
        assert!(f.index() >= 4);
    }
}
