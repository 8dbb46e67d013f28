//! Four-level x86-64 page tables and page table entry encoding.
//!
//! A [`PageTableEntry`] is either zero, `Present` (bits 12..51 hold a
//! physical frame), or `Swapped` (a kernel-private encoding of a swap
//! device id and slot, installed by [`crate::swap`]). At most one of
//! `Present`/`Swapped` is ever set.

use bitflags::bitflags;
use talon_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};

use crate::error::{MmError, Result};
use crate::pmm::BitmapAllocator;

bitflags! {
    /// Page table entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// The mapping is valid and backed by a physical frame.
        const PRESENT = 1 << 0;
        /// The page may be written.
        const WRITABLE = 1 << 1;
        /// The page is accessible from user mode.
        const USER = 1 << 2;
        /// Disables caching (used for MMIO mappings).
        const CACHE_DISABLE = 1 << 4;
        /// Kernel-private: the entry encodes a swap (device, slot) pair
        /// rather than a physical frame. Never set together with `PRESENT`.
        const SWAPPED = 1 << 9;
        /// Kernel-private: excluded from swap victim selection.
        const PINNED = 1 << 10;
        /// The page may not be executed.
        const NO_EXECUTE = 1 << 63;
    }
}

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// A single 64-bit page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// The zero (unmapped) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns whether this entry is entirely zero.
    pub const fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// Returns whether `PRESENT` is set.
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// Returns whether `SWAPPED` is set.
    pub const fn is_swapped(self) -> bool {
        self.0 & PteFlags::SWAPPED.bits() != 0
    }

    /// Builds a present entry mapping to `addr` with the given flags.
    ///
    /// `PRESENT` is implicitly set; `SWAPPED` is implicitly cleared.
    pub fn new_present(addr: PhysAddr, flags: PteFlags) -> Self {
        let bits = (addr.as_u64() & ADDR_MASK)
            | (flags | PteFlags::PRESENT).bits() & !PteFlags::SWAPPED.bits();
        Self(bits)
    }

    /// Builds a swap entry encoding `device` (8 bits) and `slot` (bits
    /// 12..64), with `PRESENT` clear and `SWAPPED` set.
    pub fn new_swapped(device: u8, slot: u64) -> Self {
        let bits = ((slot & 0x000f_ffff_ffff_ffff) << 12)
            | ((device as u64) << 1)
            | PteFlags::SWAPPED.bits();
        Self(bits)
    }

    /// Returns the mapped physical address.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not `PRESENT`.
    pub fn addr(self) -> PhysAddr {
        assert!(self.is_present(), "addr() on a non-present PTE");
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    /// Returns `(device, slot)` for a swapped entry.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not `SWAPPED`.
    pub fn swap_entry(self) -> (u8, u64) {
        assert!(self.is_swapped(), "swap_entry() on a non-swapped PTE");
        let device = ((self.0 >> 1) & 0xff) as u8;
        let slot = self.0 >> 12;
        (device, slot)
    }

    /// Returns this entry's flag bits.
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }
}

/// A 512-entry page table, one level of the 4-level hierarchy.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; 512],
}

impl PageTable {
    /// Returns an all-zero (fully unmapped) page table.
    pub const fn empty() -> Self {
        Self {
            entries: [PageTableEntry::empty(); 512],
        }
    }

    /// Returns the entry at `index`.
    pub fn entry(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    /// Sets the entry at `index`.
    pub fn set_entry(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }
}

/// Translates a physical address of a page table into a mutable
/// reference, via the identity/HHDM offset the kernel is mapped with.
///
/// # Safety
///
/// `phys` must point to a live, exclusively-owned [`PageTable`], and
/// `hhdm_offset` must make `hhdm_offset + phys` a valid mapping of it.
pub unsafe fn table_at_mut<'a>(phys: PhysAddr, hhdm_offset: u64) -> &'a mut PageTable {
    let ptr = (hhdm_offset + phys.as_u64()) as *mut PageTable;
    // SAFETY: forwarded to the caller.
    unsafe { &mut *ptr }
}

/// Walks (and lazily allocates) the four page table levels down to the
/// leaf PTE for `virt`, returning a mutable reference to it.
///
/// Intermediate tables are allocated with `Present|Writable|User` so
/// permission narrowing happens only at the leaf, matching how the
/// architecture actually enforces access (the most permissive
/// intermediate flag wins).
pub fn walk_alloc<'a>(
    root: PhysAddr,
    hhdm_offset: u64,
    virt: VirtAddr,
    pmm: &BitmapAllocator,
) -> Result<&'a mut PageTableEntry> {
    let mut table_phys = root;
    for level in (1..=3u8).rev() {
        // SAFETY: `table_phys` is a live page table owned by this address
        // space; `hhdm_offset` is the caller's valid HHDM mapping.
        let table = unsafe { table_at_mut(table_phys, hhdm_offset) };
        let idx = virt.page_table_index(level);
        let entry = table.entry(idx);
        if entry.is_present() {
            table_phys = entry.addr();
        } else {
            let frame = pmm.allocate_frame().ok_or(MmError::OutOfMemory)?;
            let child_phys = frame.start_address();
            // SAFETY: freshly allocated frame, zeroed before use as a table.
            unsafe {
                let child = table_at_mut(child_phys, hhdm_offset);
                *child = PageTable::empty();
            }
            table.set_entry(
                idx,
                PageTableEntry::new_present(
                    child_phys,
                    PteFlags::WRITABLE | PteFlags::USER,
                ),
            );
            table_phys = child_phys;
        }
    }

    // SAFETY: `table_phys` now names the leaf-level (PT) table.
    let pt = unsafe { table_at_mut(table_phys, hhdm_offset) };
    let idx = virt.page_table_index(0);
    Ok(&mut pt.entries[idx])
}

/// Walks the four page table levels without allocating, returning `None`
/// if any intermediate level is absent.
pub fn walk<'a>(root: PhysAddr, hhdm_offset: u64, virt: VirtAddr) -> Option<&'a PageTableEntry> {
    let mut table_phys = root;
    for level in (1..=3u8).rev() {
        // SAFETY: `table_phys` is a live page table reachable from `root`.
        let table = unsafe { table_at_mut(table_phys, hhdm_offset) };
        let idx = virt.page_table_index(level);
        let entry = table.entry(idx);
        if !entry.is_present() {
            return None;
        }
        table_phys = entry.addr();
    }
    // SAFETY: `table_phys` now names the leaf-level (PT) table.
    let pt = unsafe { table_at_mut(table_phys, hhdm_offset) };
    let idx = virt.page_table_index(0);
    Some(&pt.entries[idx])
}

/// Rounds `size` up to the next multiple of [`PAGE_SIZE`].
pub const fn round_up_pages(size: u64) -> u64 {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Visits every `Present|User` leaf entry reachable from `root`,
/// covering only the lower (user) half of the address space (PML4
/// indices 0..256), stopping at the first entry for which `f` returns
/// `Some`.
///
/// Used by swap eviction to find a victim page without the caller
/// needing to track its own list of mapped ranges.
pub fn find_user_leaf<'a, R>(
    root: PhysAddr,
    hhdm_offset: u64,
    mut f: impl FnMut(VirtAddr, &'a mut PageTableEntry) -> Option<R>,
) -> Option<R> {
    // SAFETY: `root` is a live PML4 owned by this address space.
    let pml4 = unsafe { table_at_mut(root, hhdm_offset) };
    for i4 in 0..256usize {
        let e4 = pml4.entry(i4);
        if !e4.is_present() {
            continue;
        }
        // SAFETY: `e4` is a present entry pointing at a live PDPT.
        let pdpt = unsafe { table_at_mut(e4.addr(), hhdm_offset) };
        for i3 in 0..512usize {
            let e3 = pdpt.entry(i3);
            if !e3.is_present() {
                continue;
            }
            // SAFETY: `e3` is a present entry pointing at a live PD.
            let pd = unsafe { table_at_mut(e3.addr(), hhdm_offset) };
            for i2 in 0..512usize {
                let e2 = pd.entry(i2);
                if !e2.is_present() {
                    continue;
                }
                // SAFETY: `e2` is a present entry pointing at a live PT.
                let pt = unsafe { table_at_mut(e2.addr(), hhdm_offset) };
                for i1 in 0..512usize {
                    let entry = pt.entry(i1);
                    if !entry.is_present() || !entry.flags().contains(PteFlags::USER) {
                        continue;
                    }
                    let virt = VirtAddr::from_page_table_indices(i4, i3, i2, i1);
                    if let Some(r) = f(virt, &mut pt.entries[i1]) {
                        return Some(r);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_entry_round_trips_address_and_flags() {
        let pte = PageTableEntry::new_present(
            PhysAddr::new(0x1234_000),
            PteFlags::WRITABLE | PteFlags::USER,
        );
        assert!(pte.is_present());
        assert!(!pte.is_swapped());
        assert_eq!(pte.addr(), PhysAddr::new(0x1234_000));
        assert!(pte.flags().contains(PteFlags::WRITABLE));
        assert!(pte.flags().contains(PteFlags::USER));
    }

    #[test]
    fn swap_entry_round_trips_device_and_slot() {
        let pte = PageTableEntry::new_swapped(7, 0xABCDEF);
        assert!(pte.is_swapped());
        assert!(!pte.is_present());
        let (device, slot) = pte.swap_entry();
        assert_eq!(device, 7);
        assert_eq!(slot, 0xABCDEF);
    }

    #[test]
    fn present_and_swapped_are_mutually_exclusive() {
        let present = PageTableEntry::new_present(PhysAddr::new(0x1000), PteFlags::WRITABLE);
        assert!(!present.is_swapped());
        let swapped = PageTableEntry::new_swapped(1, 1);
        assert!(!swapped.is_present());
    }

    #[test]
    fn walk_alloc_then_walk_finds_same_entry() {
        let regions = alloc::vec![crate::pmm::PhysMemoryRegion {
            start: PhysAddr::new(0),
            size: 64 * PAGE_SIZE,
            usable: true,
        }];
        let pmm = BitmapAllocator::new(&regions).unwrap();
        let root_frame = pmm.allocate_frame().unwrap();
        let hhdm = identity_hhdm();
        // SAFETY: freshly allocated frame used only as a page table below.
        unsafe {
            let root = table_at_mut(root_frame.start_address(), hhdm);
            *root = PageTable::empty();
        }

        let virt = VirtAddr::new(0x1000);
        let leaf_phys = pmm.allocate_frame().unwrap().start_address();
        {
            let entry =
                walk_alloc(root_frame.start_address(), hhdm, virt, &pmm).expect("walk_alloc");
            *entry = PageTableEntry::new_present(leaf_phys, PteFlags::WRITABLE);
        }

        let found = walk(root_frame.start_address(), hhdm, virt).expect("walk");
        assert_eq!(found.addr(), leaf_phys);
    }

    /// In host tests there is no real HHDM; we fake one by leaking a
    /// page-aligned heap buffer and pretending physical address 0 is its
    /// base, so `hhdm_offset + phys == buffer_base`.
    fn identity_hhdm() -> u64 {
        use core::alloc::Layout;
        let layout = Layout::from_size_align(16 * PAGE_SIZE as usize, PAGE_SIZE as usize).unwrap();
        // SAFETY: layout has non-zero size; leaked for the test's lifetime.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        ptr as u64
    }
}
