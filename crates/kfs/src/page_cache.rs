//! Per-mapping page cache (spec §4.G), indexed by the radix tree of
//! spec §4.K.

use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use talon_core::addr::PAGE_SIZE;
use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::radix::RadixTree;

/// A single cached page: `PAGE_SIZE` bytes of payload plus its index
/// within the owning mapping.
pub struct Page {
    index: u64,
    data: SpinLock<alloc::vec::Vec<u8>>,
    refcount: AtomicUsize,
    dirty: core::sync::atomic::AtomicBool,
}

impl Page {
    fn new(index: u64) -> Arc<Self> {
        Arc::new(Self {
            index,
            data: SpinLock::new(vec![0u8; PAGE_SIZE as usize]),
            refcount: AtomicUsize::new(0),
            dirty: core::sync::atomic::AtomicBool::new(false),
        })
    }

    /// This page's index within its mapping.
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Runs `f` with read access to the page's bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    /// Runs `f` with mutable access to the page's bytes and marks it dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.dirty.store(true, Ordering::Relaxed);
        f(&mut self.data.lock())
    }

    /// Whether the page has been written to since it was cached.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn get(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    fn put(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

/// Backend hook invoked when a page is faulted in but not yet cached.
pub trait ReadPage: Send + Sync {
    /// Fills `page` with the backend's contents for `index`.
    fn readpage(&self, index: u64, page: &Page) -> Result<()>;
}

/// Per-inode page cache: a [`RadixTree`] of [`Page`]s plus the
/// `readpage` hook used to fault missing pages, and the file's current
/// size (`i_size`).
pub struct Mapping {
    pages: SpinLock<RadixTree<Page>>,
    readpage: Arc<dyn ReadPage>,
    i_size: AtomicU64,
}

impl Mapping {
    /// Creates an empty mapping backed by `readpage` for fault-ins.
    pub fn new(readpage: Arc<dyn ReadPage>, initial_size: u64) -> Arc<Self> {
        Arc::new(Self {
            pages: SpinLock::new(RadixTree::new()),
            readpage,
            i_size: AtomicU64::new(initial_size),
        })
    }

    /// Current file size as tracked by this mapping.
    pub fn size(&self) -> u64 {
        self.i_size.load(Ordering::Acquire)
    }

    fn extend_to(&self, size: u64) {
        self.i_size.fetch_max(size, Ordering::AcqRel);
    }

    /// Returns the cached page at `index`, incrementing its refcount.
    pub fn find_get_page(&self, index: u64) -> Option<Arc<Page>> {
        let page = self.pages.lock().lookup(index)?;
        page.get();
        Some(page)
    }

    /// Installs a fresh page at `index`.
    ///
    /// Fails with [`KError::Exists`] if the slot is already occupied.
    pub fn add_to_page_cache(&self, index: u64) -> Result<Arc<Page>> {
        let mut pages = self.pages.lock();
        if pages.lookup(index).is_some() {
            return Err(KError::Exists);
        }
        let page = Page::new(index);
        pages.insert(index, page.clone());
        Ok(page)
    }

    /// Removes the page at `index` and drops a reference to it.
    pub fn delete_from_page_cache(&self, index: u64) -> Option<Arc<Page>> {
        let page = self.pages.lock().delete(index)?;
        page.put();
        Some(page)
    }

    /// Returns the page at `index`, faulting it in via `readpage` if
    /// absent from the cache.
    fn get_or_fault(&self, index: u64) -> Result<Arc<Page>> {
        if let Some(page) = self.find_get_page(index) {
            return Ok(page);
        }
        let page = self.add_to_page_cache(index)?;
        self.readpage.readpage(index, &page)?;
        Ok(page)
    }

    /// Reads `buf.len()` bytes starting at `offset`, faulting pages in
    /// as needed. Returns the number of bytes actually read (short at
    /// end of file).
    pub fn generic_file_read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if offset >= size {
            return Ok(0);
        }
        let mut done = 0usize;
        let to_read = core::cmp::min(buf.len() as u64, size - offset) as usize;
        while done < to_read {
            let pos = offset + done as u64;
            let index = pos / PAGE_SIZE;
            let page_off = (pos % PAGE_SIZE) as usize;
            let chunk = core::cmp::min(to_read - done, PAGE_SIZE as usize - page_off);
            let page = self.get_or_fault(index)?;
            page.with_data(|data| {
                buf[done..done + chunk].copy_from_slice(&data[page_off..page_off + chunk]);
            });
            done += chunk;
        }
        Ok(done)
    }

    /// Writes `buf` starting at `offset`, faulting pages in as needed,
    /// marking each touched page dirty, and extending `i_size`.
    pub fn generic_file_write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let index = pos / PAGE_SIZE;
            let page_off = (pos % PAGE_SIZE) as usize;
            let chunk = core::cmp::min(buf.len() - done, PAGE_SIZE as usize - page_off);
            let page = self.get_or_fault(index)?;
            page.with_data_mut(|data| {
                data[page_off..page_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            });
            done += chunk;
        }
        self.extend_to(offset + buf.len() as u64);
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroBacked;
    impl ReadPage for ZeroBacked {
        fn readpage(&self, _index: u64, _page: &Page) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mapping = Mapping::new(Arc::new(ZeroBacked), 0);
        mapping.generic_file_write(0, b"hello world").unwrap();
        assert_eq!(mapping.size(), 11);

        let mut buf = [0u8; 11];
        let n = mapping.generic_file_read(0, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let mapping = Mapping::new(Arc::new(ZeroBacked), 4);
        let mut buf = [0u8; 8];
        assert_eq!(mapping.generic_file_read(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn add_to_page_cache_twice_fails() {
        let mapping = Mapping::new(Arc::new(ZeroBacked), 0);
        mapping.add_to_page_cache(0).unwrap();
        assert_eq!(mapping.add_to_page_cache(0).unwrap_err(), KError::Exists);
    }

    #[test]
    fn write_spans_multiple_pages() {
        let mapping = Mapping::new(Arc::new(ZeroBacked), 0);
        let data = vec![7u8; PAGE_SIZE as usize + 100];
        mapping.generic_file_write(0, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        mapping.generic_file_read(0, &mut out).unwrap();
        assert_eq!(out, data);
    }
}
