//! Pages backing kernel thread stacks.
use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Size of a page.
pub const PAGE_SIZE: usize = 0x1000;

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE]);

/// An owned, page-aligned frame of [`PAGE_SIZE`] bytes.
///
/// Pages are handed out by [`Machine::alloc_page`] and must be returned
/// through [`Machine::free_page`].
///
/// [`Machine::alloc_page`]: crate::Machine::alloc_page
/// [`Machine::free_page`]: crate::Machine::free_page
pub struct Page {
    frame: Box<Frame>,
}

impl Page {
    /// Allocates a zero-filled page from the heap.
    pub fn new() -> Self {
        Self {
            frame: Box::new(Frame([0; PAGE_SIZE])),
        }
    }

    /// Kernel virtual address of the first byte of the page.
    pub fn kva(&self) -> usize {
        self.frame.0.as_ptr() as usize
    }

    /// Read-only view of the page contents.
    pub fn inner(&self) -> &[u8; PAGE_SIZE] {
        &self.frame.0
    }

    /// Mutable view of the page contents.
    pub fn inner_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.frame.0
    }

    /// Reads the machine word at byte `offset`.
    pub fn read_word(&self, offset: usize) -> usize {
        const W: usize = core::mem::size_of::<usize>();
        let mut bytes = [0; W];
        bytes.copy_from_slice(&self.frame.0[offset..offset + W]);
        usize::from_ne_bytes(bytes)
    }

    /// Writes `value` as the machine word at byte `offset`.
    pub fn write_word(&mut self, offset: usize, value: usize) {
        const W: usize = core::mem::size_of::<usize>();
        self.frame.0[offset..offset + W].copy_from_slice(&value.to_ne_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Page({:#x})", self.kva())
    }
}

/// A page allocator that hands out at most `capacity` pages at a time.
pub struct PagePool {
    capacity: usize,
    in_use: AtomicUsize,
}

impl PagePool {
    /// A pool that never runs out of pages.
    pub const fn unbounded() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// A pool of `capacity` pages.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Allocates a page, or returns `None` if every page is in use.
    pub fn alloc(&self) -> Option<Page> {
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .ok()
            .map(|_| Page::new())
    }

    /// Returns `page` to the pool.
    pub fn free(&self, page: Page) {
        drop(page);
        let prev = self.in_use.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Freeing a page to an empty pool.");
    }

    /// Number of pages currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_runs_out_and_recovers() {
        let pool = PagePool::with_capacity(2);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none(), "Third page must not be available.");
        assert_eq!(pool.in_use(), 2);

        pool.free(a);
        assert_eq!(pool.in_use(), 1);
        let c = pool.alloc().unwrap();
        pool.free(b);
        pool.free(c);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn page_words() {
        let mut page = Page::new();
        assert_eq!(page.kva() % PAGE_SIZE, 0);
        assert!(page.inner().iter().all(|b| *b == 0));
        page.write_word(0, 0xcd6a_bf4b);
        page.write_word(PAGE_SIZE - 8, usize::MAX);
        assert_eq!(page.read_word(0), 0xcd6a_bf4b);
        assert_eq!(page.read_word(PAGE_SIZE - 8), usize::MAX);
        assert_eq!(page.inner_mut()[8], 0);
    }
}
