pub mod manager;
pub mod pool;
pub mod table;

use std::ptr;

/// Stable reference to a tracked memory region.
///
/// Only valid against the device that issued it, and only until that
/// device's table is cleared (`epoch` changes on every clear).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAllocation {
    pub(crate) device_id: u64,
    pub(crate) alloc_id: u32,
    pub(crate) epoch: u32,
}

impl DeviceAllocation {
    /// Index of this allocation in its device's table.
    #[must_use]
    pub const fn alloc_id(&self) -> u32 {
        self.alloc_id
    }

    #[must_use]
    pub const fn device_id(&self) -> u64 {
        self.device_id
    }

    /// A pointer `offset` bytes into this allocation.
    #[must_use]
    pub const fn ptr(self, offset: usize) -> DevicePtr {
        DevicePtr {
            alloc: self,
            offset,
        }
    }
}

/// An allocation plus a byte offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr {
    pub alloc: DeviceAllocation,
    pub offset: usize,
}

impl From<DeviceAllocation> for DevicePtr {
    fn from(alloc: DeviceAllocation) -> Self {
        alloc.ptr(0)
    }
}

/// Which path released memory must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// From the device context's allocator; freed through it.
    OwnedNative,
    /// From the shared host pool; released to it.
    OwnedPooled,
    /// Caller-owned memory. Never freed here.
    Imported,
    /// Runtime-managed memory from the pool's size-class cache; returned to the cache.
    PreallocatedCached,
}

/// Parameters of a user allocation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocParams {
    pub size: usize,
    pub host_read: bool,
    pub host_write: bool,
}

impl AllocParams {
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            host_read: false,
            host_write: false,
        }
    }

    #[must_use]
    pub const fn host_read(mut self) -> Self {
        self.host_read = true;
        self
    }

    #[must_use]
    pub const fn host_write(mut self) -> Self {
        self.host_write = true;
        self
    }

    /// The host intends to touch this memory directly.
    #[must_use]
    pub const fn managed(&self) -> bool {
        self.host_read || self.host_write
    }
}

/// Table entry for one allocation.
#[derive(Debug)]
pub(crate) struct AllocRecord {
    /// Null once deallocated.
    pub ptr: *mut u8,
    pub size: usize,
    pub kind: AllocKind,
    /// Host shadow buffer, present between `map` and `unmap`.
    pub mapped: Option<Box<[u8]>>,
}

// Records are only touched under the owning device's lock.
unsafe impl Send for AllocRecord {}

impl AllocRecord {
    pub(crate) const fn new(ptr: *mut u8, size: usize, kind: AllocKind) -> Self {
        Self {
            ptr,
            size,
            kind,
            mapped: None,
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.ptr.is_null()
    }

    pub(crate) fn mark_released(&mut self) {
        self.ptr = ptr::null_mut();
        self.mapped = None;
    }
}

/// Snapshot of an allocation's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocInfo {
    pub ptr: *mut u8,
    pub size: usize,
    pub kind: AllocKind,
    pub mapped: bool,
}

impl From<&AllocRecord> for AllocInfo {
    fn from(record: &AllocRecord) -> Self {
        Self {
            ptr: record.ptr,
            size: record.size,
            kind: record.kind,
            mapped: record.mapped.is_some(),
        }
    }
}

pub use manager::MemoryManager;
pub use pool::{HostPool, SharedPool};
pub use table::AllocationTable;
