use crate::utils::align_up;
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// A host pool shared by every device that should draw from the same memory.
pub type SharedPool = Arc<Mutex<HostPool>>;

/// Host-resident allocator handing out page-aligned regions.
///
/// Regions released through [`HostPool::release_to_cache`] are kept per
/// size class and handed back by [`HostPool::allocate_with_cache`], so hot
/// allocate/release loops don't go back to the system allocator.
#[derive(Debug)]
pub struct HostPool {
    page_size: usize,
    capacity: Option<usize>,

    // Handed-out regions: Start Address -> Length
    live: BTreeMap<usize, usize>,
    // Released-but-retained regions: Length -> Start Addresses
    cache: BTreeMap<usize, Vec<NonNull<u8>>>,
    cached_bytes: usize,
}

// The pool owns every region it tracks.
unsafe impl Send for HostPool {}

impl HostPool {
    /// Creates a pool. `capacity` caps live plus cached bytes.
    #[must_use]
    pub fn new(page_size: usize, capacity: Option<usize>) -> Self {
        debug_assert!(page_size.is_power_of_two());
        Self {
            page_size,
            capacity,
            live: BTreeMap::new(),
            cache: BTreeMap::new(),
            cached_bytes: 0,
        }
    }

    #[must_use]
    pub fn shared(page_size: usize, capacity: Option<usize>) -> SharedPool {
        Arc::new(Mutex::new(Self::new(page_size, capacity)))
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size class a request of `size` bytes lands in, `None` if it cannot be represented.
    #[must_use]
    pub const fn size_class(&self, size: usize) -> Option<usize> {
        let size = if size == 0 { 1 } else { size };
        align_up(size, self.page_size)
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live.values().sum()
    }

    #[must_use]
    pub const fn cached_bytes(&self) -> usize {
        self.cached_bytes
    }

    #[must_use]
    pub fn cached_regions(&self) -> usize {
        self.cache.values().map(Vec::len).sum()
    }

    /// Allocate a fresh region of at least `size` bytes.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let len = self.size_class(size)?;
        if !self.reserve(len) {
            return None;
        }

        let layout = Layout::from_size_align(len, self.page_size).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.live.insert(ptr.as_ptr() as usize, len);
        Some(ptr)
    }

    /// Reuse a cached region of the same size class, or allocate a fresh one.
    pub fn allocate_with_cache(&mut self, size: usize) -> Option<NonNull<u8>> {
        let len = self.size_class(size)?;
        if let Some(ptr) = self.cache.get_mut(&len).and_then(Vec::pop) {
            self.cached_bytes -= len;
            self.live.insert(ptr.as_ptr() as usize, len);
            log::trace!("Pool cache hit: {len} bytes at {ptr:p}");
            return Some(ptr);
        }
        self.allocate(size)
    }

    /// Return a region to the system allocator.
    ///
    /// Returns `false` if the address was not handed out by this pool.
    pub fn release(&mut self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let Some(len) = self.live.remove(&addr) else {
            log::error!("Pool: tried to release 0x{addr:x} which was not tracked");
            return false;
        };
        self.dealloc(ptr, len);
        true
    }

    /// Keep a region in its size-class cache for a later `allocate_with_cache`.
    ///
    /// Returns `false` if the address was not handed out by this pool.
    pub fn release_to_cache(&mut self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let Some(len) = self.live.remove(&addr) else {
            log::error!("Pool: tried to cache 0x{addr:x} which was not tracked");
            return false;
        };
        self.cache.entry(len).or_default().push(ptr);
        self.cached_bytes += len;
        true
    }

    /// Drop every cached region.
    pub fn trim(&mut self) {
        let cache = std::mem::take(&mut self.cache);
        for (len, ptrs) in cache {
            for ptr in ptrs {
                self.dealloc(ptr, len);
            }
        }
        self.cached_bytes = 0;
    }

    /// Make room for `len` more bytes, trimming the cache if that is what it takes.
    fn reserve(&mut self, len: usize) -> bool {
        let Some(capacity) = self.capacity else {
            return true;
        };
        let fits = |used: usize| used.checked_add(len).is_some_and(|total| total <= capacity);
        if fits(self.live_bytes() + self.cached_bytes) {
            return true;
        }
        if self.cached_bytes > 0 {
            log::debug!(
                "Pool over capacity, trimming {} cached bytes",
                self.cached_bytes
            );
            self.trim();
        }
        fits(self.live_bytes())
    }

    fn dealloc(&self, ptr: NonNull<u8>, len: usize) {
        // Every tracked length was validated against the same alignment when allocated.
        if let Ok(layout) = Layout::from_size_align(len, self.page_size) {
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl Drop for HostPool {
    fn drop(&mut self) {
        self.trim();
        let live = std::mem::take(&mut self.live);
        for (addr, len) in live {
            if let Some(ptr) = NonNull::new(addr as *mut u8) {
                self.dealloc(ptr, len);
            }
        }
    }
}
