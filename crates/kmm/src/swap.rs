//! Demand-swap device.
//!
//! A swap device is a fixed-slot slab of 4 KiB pages with a companion
//! bitmap, mirroring [`crate::pmm::BitmapAllocator`]'s allocation
//! strategy but over slots instead of physical frames.

use talon_core::addr::PAGE_SIZE;
use talon_core::sync::SpinLock;

use crate::error::{MmError, Result};
use crate::paging::{PageTableEntry, PteFlags};
use crate::pmm::{BitmapAllocator, Frame};

/// Identifies one swap device among several (spec: 8-bit device id in
/// the PTE swap encoding).
pub type DeviceId = u8;

struct Inner {
    slots: alloc::vec::Vec<[u8; PAGE_SIZE as usize]>,
    used: alloc::vec::Vec<bool>,
    free_count: usize,
}

/// A fixed-size backing store for evicted pages.
pub struct SwapDevice {
    id: DeviceId,
    inner: SpinLock<Inner>,
}

impl SwapDevice {
    /// Creates a swap device with `slot_count` 4 KiB slots, all free.
    pub fn new(id: DeviceId, slot_count: usize) -> Self {
        Self {
            id,
            inner: SpinLock::named(
                "swap",
                Inner {
                    slots: alloc::vec![[0u8; PAGE_SIZE as usize]; slot_count],
                    used: alloc::vec![false; slot_count],
                    free_count: slot_count,
                },
            ),
        }
    }

    /// This device's id, as encoded in swap PTEs.
    pub const fn id(&self) -> DeviceId {
        self.id
    }

    /// Number of free slots remaining.
    pub fn free_slots(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Copies `page` into the first free slot, returning the encoded PTE
    /// the caller should install in place of the evicted page's mapping.
    pub fn swap_out(&self, page: &[u8; PAGE_SIZE as usize]) -> Result<PageTableEntry> {
        let mut inner = self.inner.lock();
        let slot = inner
            .used
            .iter()
            .position(|&u| !u)
            .ok_or(MmError::SwapFull)?;
        inner.used[slot] = true;
        inner.free_count -= 1;
        inner.slots[slot] = *page;
        Ok(PageTableEntry::new_swapped(self.id, slot as u64))
    }

    /// Copies the slot named by `entry` into `out` and frees the slot.
    pub fn swap_in(&self, entry: PageTableEntry, out: &mut [u8; PAGE_SIZE as usize]) -> Result<()> {
        let (device, slot) = entry.swap_entry();
        if device != self.id {
            return Err(MmError::NotSwapped);
        }
        let slot = slot as usize;
        let mut inner = self.inner.lock();
        if slot >= inner.used.len() || !inner.used[slot] {
            return Err(MmError::NotSwapped);
        }
        *out = inner.slots[slot];
        inner.used[slot] = false;
        inner.free_count += 1;
        Ok(())
    }
}

/// The singleton swap device, installed once at boot.
pub static SWAP: SpinLock<Option<SwapDevice>> = SpinLock::named("swap-singleton", None);

/// Initializes the global swap device with `slot_count` slots.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(id: DeviceId, slot_count: usize) {
    let mut swap = SWAP.lock();
    assert!(swap.is_none(), "swap device already initialized");
    *swap = Some(SwapDevice::new(id, slot_count));
}

/// Resolves a page fault on a swapped-out page: reads the slot named by
/// `pte`, copies it into a freshly allocated frame, frees the slot, and
/// returns a fresh `Present|Writable|User` entry for the caller to
/// install in the faulting address space.
pub fn handle_swap_fault(pte: PageTableEntry, pmm: &BitmapAllocator, hhdm_offset: u64) -> Result<(Frame, PageTableEntry)> {
    debug_assert!(pte.is_swapped(), "handle_swap_fault on a non-swap PTE");
    let swap = SWAP.lock();
    let swap = swap.as_ref().expect("swap device not initialized");

    let frame = pmm.allocate_frame().ok_or(MmError::OutOfMemory)?;
    // SAFETY: `frame` was just allocated and is exclusively owned here;
    // `hhdm_offset` is the caller's valid HHDM mapping.
    let dst = unsafe {
        let ptr = (hhdm_offset + frame.start_address().as_u64()) as *mut [u8; PAGE_SIZE as usize];
        &mut *ptr
    };
    swap.swap_in(pte, dst)?;

    let new_pte = PageTableEntry::new_present(
        frame.start_address(),
        PteFlags::WRITABLE | PteFlags::USER,
    );
    Ok((frame, new_pte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_out_then_in_round_trips_content() {
        let dev = SwapDevice::new(3, 4);
        let mut page = [0u8; PAGE_SIZE as usize];
        page[0] = 0xAB;
        page[4095] = 0xCD;

        let entry = dev.swap_out(&page).unwrap();
        assert!(entry.is_swapped());
        assert_eq!(dev.free_slots(), 3);

        let mut out = [0u8; PAGE_SIZE as usize];
        dev.swap_in(entry, &mut out).unwrap();
        assert_eq!(out, page);
        assert_eq!(dev.free_slots(), 4);
    }

    #[test]
    fn swap_out_fails_when_full() {
        let dev = SwapDevice::new(0, 1);
        let page = [0u8; PAGE_SIZE as usize];
        dev.swap_out(&page).unwrap();
        assert_eq!(dev.swap_out(&page), Err(MmError::SwapFull));
    }

    #[test]
    fn swap_in_wrong_device_is_rejected() {
        let dev_a = SwapDevice::new(1, 2);
        let dev_b = SwapDevice::new(2, 2);
        let page = [0u8; PAGE_SIZE as usize];
        let entry = dev_a.swap_out(&page).unwrap();
        let mut out = [0u8; PAGE_SIZE as usize];
        assert_eq!(dev_b.swap_in(entry, &mut out), Err(MmError::NotSwapped));
    }
}
