//! Virtual memory manager: map/unmap, physical lookup, and the MMIO
//! `ioremap` window.

use talon_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};
use talon_core::sync::SpinLock;

use crate::error::{MmError, Result};
use crate::paging::{self, PteFlags};
use crate::pmm::BitmapAllocator;

/// Base of the kernel-managed MMIO window that [`Vmm::ioremap`] carves
/// virtual ranges out of.
pub const IOREMAP_BASE: u64 = 0xffff_ff00_0000_0000;
/// Size of the MMIO window.
pub const IOREMAP_SIZE: u64 = 0x0000_0100_0000_0000;

/// Owns one address space's page table root and the bump cursor used to
/// hand out fresh `ioremap` ranges.
pub struct Vmm {
    root: PhysAddr,
    hhdm_offset: u64,
    ioremap_cursor: SpinLock<u64>,
}

impl Vmm {
    /// Wraps an existing page table root (e.g. the one the bootloader
    /// left active, or one freshly allocated for a new process).
    pub fn new(root: PhysAddr, hhdm_offset: u64) -> Self {
        Self {
            root,
            hhdm_offset,
            ioremap_cursor: SpinLock::new(IOREMAP_BASE),
        }
    }

    /// This address space's page table root, for loading into CR3.
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    /// Installs a leaf PTE mapping `virt` to `phys` with `flags`,
    /// allocating any missing intermediate page tables.
    pub fn map_page(
        &self,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PteFlags,
        pmm: &BitmapAllocator,
    ) -> Result<()> {
        if virt.page_offset() != 0 || phys.page_offset() != 0 {
            return Err(MmError::Unaligned);
        }
        let entry = paging::walk_alloc(self.root, self.hhdm_offset, virt, pmm)?;
        if entry.is_present() {
            return Err(MmError::AlreadyMapped);
        }
        *entry = paging::PageTableEntry::new_present(phys, flags);
        Ok(())
    }

    /// Clears the leaf PTE for `virt`, if mapped.
    pub fn unmap_page(&self, virt: VirtAddr, pmm: &BitmapAllocator) -> Result<()> {
        if paging::walk(self.root, self.hhdm_offset, virt).is_none() {
            return Err(MmError::NotMapped);
        }
        // Every intermediate level already exists (the walk above found
        // the leaf), so this cannot allocate.
        let entry = paging::walk_alloc(self.root, self.hhdm_offset, virt, pmm)?;
        *entry = paging::PageTableEntry::empty();
        Ok(())
    }

    /// Walks without allocating; returns the mapped physical address, or
    /// `PhysAddr::zero()` if `virt` is unmapped or swapped out.
    pub fn get_phys(&self, virt: VirtAddr) -> PhysAddr {
        match paging::walk(self.root, self.hhdm_offset, virt) {
            Some(entry) if entry.is_present() => entry.addr(),
            _ => PhysAddr::zero(),
        }
    }

    /// Reserves `size` bytes (rounded up to whole pages) of the MMIO
    /// window, maps each page `Present|Writable|CacheDisable` onto the
    /// corresponding physical page of `phys`, and returns the virtual
    /// base of the mapping.
    pub fn ioremap(&self, phys: PhysAddr, size: u64, pmm: &BitmapAllocator) -> Result<VirtAddr> {
        let pages = paging::round_up_pages(size) / PAGE_SIZE;
        let base = {
            let mut cursor = self.ioremap_cursor.lock();
            let base = *cursor;
            let span = pages * PAGE_SIZE;
            if base + span > IOREMAP_BASE + IOREMAP_SIZE {
                return Err(MmError::OutOfMemory);
            }
            *cursor += span;
            base
        };

        for i in 0..pages {
            let virt = VirtAddr::new(base + i * PAGE_SIZE);
            let frame_phys = phys.align_down() + i * PAGE_SIZE;
            self.map_page(
                virt,
                frame_phys,
                PteFlags::WRITABLE | PteFlags::CACHE_DISABLE,
                pmm,
            )?;
        }

        Ok(VirtAddr::new(base + phys.page_offset()))
    }

    /// Reverses an [`ioremap`](Self::ioremap) mapping of `size` bytes
    /// starting at `virt`.
    pub fn iounmap(&self, virt: VirtAddr, size: u64, pmm: &BitmapAllocator) -> Result<()> {
        let pages = paging::round_up_pages(size) / PAGE_SIZE;
        let base = virt.align_down();
        for i in 0..pages {
            self.unmap_page(VirtAddr::new(base.as_u64() + i * PAGE_SIZE), pmm)?;
        }
        Ok(())
    }

    /// Picks any `Present|User` page not marked `Pinned`, evicts it to
    /// `swap`, and replaces its PTE with the returned swap encoding.
    ///
    /// Returns the evicted page's virtual address, or `MmError::SwapFull`
    /// if no eviction candidate exists (every user page is pinned, or
    /// none are mapped).
    pub fn swap_out_victim(
        &self,
        swap: &crate::swap::SwapDevice,
        pmm: &BitmapAllocator,
    ) -> Result<VirtAddr> {
        let found = paging::find_user_leaf(self.root, self.hhdm_offset, |virt, entry| {
            if entry.flags().contains(PteFlags::PINNED) {
                None
            } else {
                Some((virt, entry))
            }
        });
        let (virt, entry) = found.ok_or(MmError::SwapFull)?;

        let phys = entry.addr();
        // SAFETY: `phys` is the frame backing a `Present` leaf entry found
        // by `find_user_leaf` in this address space; `hhdm_offset` is the
        // caller's valid HHDM mapping.
        let page = unsafe {
            let ptr = (self.hhdm_offset + phys.as_u64()) as *const [u8; PAGE_SIZE as usize];
            &*ptr
        };
        let swapped = swap.swap_out(page)?;
        *entry = swapped;
        pmm.deallocate_frame(crate::pmm::Frame::containing_address(phys))?;
        Ok(virt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmm::PhysMemoryRegion;

    fn fixture() -> (Vmm, BitmapAllocator) {
        let regions = alloc::vec![PhysMemoryRegion {
            start: PhysAddr::new(0),
            size: 64 * PAGE_SIZE,
            usable: true,
        }];
        let pmm = BitmapAllocator::new(&regions).unwrap();
        let root_frame = pmm.allocate_frame().unwrap();
        let hhdm = identity_hhdm();
        // SAFETY: freshly allocated frame used only as a page table below.
        unsafe {
            let root = paging::table_at_mut(root_frame.start_address(), hhdm);
            *root = paging::PageTable::empty();
        }
        (Vmm::new(root_frame.start_address(), hhdm), pmm)
    }

    fn identity_hhdm() -> u64 {
        use core::alloc::Layout;
        let layout =
            Layout::from_size_align(256 * PAGE_SIZE as usize, PAGE_SIZE as usize).unwrap();
        // SAFETY: non-zero size; leaked for the test's lifetime.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        ptr as u64
    }

    #[test]
    fn map_then_get_phys_then_unmap() {
        let (vmm, pmm) = fixture();
        let leaf = pmm.allocate_frame().unwrap().start_address();
        let virt = VirtAddr::new(0x2000);

        vmm.map_page(virt, leaf, PteFlags::WRITABLE, &pmm).unwrap();
        assert_eq!(vmm.get_phys(virt), leaf);

        vmm.unmap_page(virt, &pmm).unwrap();
        assert_eq!(vmm.get_phys(virt), PhysAddr::zero());
    }

    #[test]
    fn double_map_is_rejected() {
        let (vmm, pmm) = fixture();
        let leaf = pmm.allocate_frame().unwrap().start_address();
        let virt = VirtAddr::new(0x3000);
        vmm.map_page(virt, leaf, PteFlags::WRITABLE, &pmm).unwrap();
        assert_eq!(
            vmm.map_page(virt, leaf, PteFlags::WRITABLE, &pmm),
            Err(MmError::AlreadyMapped)
        );
    }

    #[test]
    fn ioremap_then_iounmap() {
        let (vmm, pmm) = fixture();
        let phys = PhysAddr::new(0x1000);
        let virt = vmm.ioremap(phys, PAGE_SIZE, &pmm).unwrap();
        assert_eq!(vmm.get_phys(virt), phys);
        vmm.iounmap(virt, PAGE_SIZE, &pmm).unwrap();
        assert_eq!(vmm.get_phys(virt), PhysAddr::zero());
    }

    #[test]
    fn swap_out_victim_picks_unpinned_user_page() {
        let (vmm, pmm) = fixture();
        let swap = crate::swap::SwapDevice::new(0, 4);
        let leaf = pmm.allocate_frame().unwrap().start_address();
        let virt = VirtAddr::new(0x4000);
        vmm.map_page(virt, leaf, PteFlags::WRITABLE | PteFlags::USER, &pmm)
            .unwrap();

        let evicted = vmm.swap_out_victim(&swap, &pmm).unwrap();
        assert_eq!(evicted, virt);
        assert_eq!(swap.free_slots(), 3);

        let entry = paging::walk(vmm.root(), vmm.hhdm_offset, virt).unwrap();
        assert!(entry.is_swapped());
        assert!(!entry.is_present());
    }

    #[test]
    fn swap_out_victim_skips_pinned_pages() {
        let (vmm, pmm) = fixture();
        let swap = crate::swap::SwapDevice::new(0, 4);
        let leaf = pmm.allocate_frame().unwrap().start_address();
        let virt = VirtAddr::new(0x5000);
        vmm.map_page(
            virt,
            leaf,
            PteFlags::WRITABLE | PteFlags::USER | PteFlags::PINNED,
            &pmm,
        )
        .unwrap();

        assert_eq!(vmm.swap_out_victim(&swap, &pmm), Err(MmError::SwapFull));
    }
}
