use crate::error::{AccelError, AccelResult};
use crate::rhi::DeviceContext;
use crate::runtime::memory::pool::SharedPool;
use crate::runtime::memory::table::AllocationTable;
use crate::runtime::memory::{
    AllocInfo, AllocKind, AllocParams, AllocRecord, DeviceAllocation, DevicePtr,
};
use crate::utils::align_up;
use std::ptr::{self, NonNull};

/// The device context slot: `None` until the backend has been brought up.
pub type ContextSlot = Option<Box<dyn DeviceContext>>;

/// Chooses an allocator per request and tracks the result in the allocation table.
///
/// Every operation receives the device context slot explicitly; the manager
/// never owns device state, only the bookkeeping for it.
#[derive(Debug)]
pub struct MemoryManager {
    device_id: u64,
    page_size: usize,
    table: AllocationTable,
    pool: SharedPool,
}

impl MemoryManager {
    #[must_use]
    pub fn new(device_id: u64, page_size: usize, pool: SharedPool) -> Self {
        Self {
            device_id,
            page_size,
            table: AllocationTable::new(),
            pool,
        }
    }

    #[must_use]
    pub const fn table(&self) -> &AllocationTable {
        &self.table
    }

    #[must_use]
    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// User allocation: native first, shared pool as fallback, always zero-filled.
    ///
    /// # Errors
    /// `OutOfMemory` if neither allocator could serve the request. Errors
    /// raised by the context itself are propagated, not masked by the fallback.
    pub fn allocate(
        &mut self,
        ctx: &mut ContextSlot,
        params: AllocParams,
    ) -> AccelResult<DeviceAllocation> {
        let managed = params.managed();
        self.table.next_index()?;

        let mut native = None;
        if let Some(ctx) = ctx.as_mut() {
            native = ctx.allocate(params.size, managed)?;
            if native.is_none() {
                log::debug!(
                    "Native allocation of {} bytes failed on '{}', falling back to pool",
                    params.size,
                    ctx.chip()
                );
            }
        }

        let (ptr, kind) = match native {
            Some(ptr) => (ptr, AllocKind::OwnedNative),
            None => {
                let ptr = self.pool.lock().allocate(params.size).ok_or(
                    AccelError::OutOfMemory {
                        requested: params.size,
                    },
                )?;
                (ptr, AllocKind::OwnedPooled)
            }
        };

        if let Err(e) = Self::fill_zero(ctx, ptr.as_ptr(), params.size) {
            self.release_raw(ctx, ptr, kind);
            return Err(e);
        }

        let alloc = self.register(AllocRecord::new(ptr.as_ptr(), params.size, kind))?;
        log::trace!(
            "Allocated {} bytes ({kind:?}) as #{}",
            params.size,
            alloc.alloc_id
        );
        Ok(alloc)
    }

    /// Runtime-managed allocation served from the pool's size-class cache.
    ///
    /// # Errors
    /// `NotImplemented` for host-visible requests, `OutOfMemory` if the pool is exhausted.
    pub fn allocate_runtime(
        &mut self,
        ctx: &mut ContextSlot,
        params: AllocParams,
    ) -> AccelResult<DeviceAllocation> {
        if params.managed() {
            return Err(AccelError::NotImplemented(
                "host-visible runtime-managed allocation".to_string(),
            ));
        }
        self.table.next_index()?;

        let size = align_up(params.size, self.page_size).ok_or(AccelError::OutOfMemory {
            requested: params.size,
        })?;
        let ptr = self
            .pool
            .lock()
            .allocate_with_cache(size)
            .ok_or(AccelError::OutOfMemory { requested: size })?;

        // Cached regions come back dirty.
        if let Err(e) = Self::fill_zero(ctx, ptr.as_ptr(), size) {
            self.pool.lock().release_to_cache(ptr);
            return Err(e);
        }

        self.register(AllocRecord::new(
            ptr.as_ptr(),
            size,
            AllocKind::PreallocatedCached,
        ))
    }

    /// Track caller-owned memory. Contents are left untouched.
    ///
    /// # Errors
    /// `InvalidHandle` if the table cannot issue another handle.
    pub fn import(&mut self, ptr: *mut u8, size: usize) -> AccelResult<DeviceAllocation> {
        self.register(AllocRecord::new(ptr, size, AllocKind::Imported))
    }

    /// Release an allocation through the path its kind requires.
    ///
    /// Handles issued before the last `clear` are ignored.
    ///
    /// # Errors
    /// `InvalidHandle` on double free, on imported memory, or on a handle from another device.
    pub fn deallocate(&mut self, ctx: &mut ContextSlot, alloc: DeviceAllocation) -> AccelResult<()> {
        self.check_owner(alloc)?;
        if self.table.is_empty() || alloc.epoch != self.table.epoch() {
            log::debug!("Ignoring release of #{} after table reset", alloc.alloc_id);
            return Ok(());
        }

        let record = self.table.lookup(alloc.alloc_id, alloc.epoch)?;
        if record.is_released() {
            return Err(AccelError::InvalidHandle(format!(
                "allocation #{} is already deallocated",
                alloc.alloc_id
            )));
        }
        if record.mapped.is_some() {
            log::warn!("Allocation #{} released while mapped", alloc.alloc_id);
        }

        let kind = record.kind;
        let Some(ptr) = NonNull::new(record.ptr) else {
            return Ok(());
        };

        match kind {
            AllocKind::OwnedPooled => {
                self.pool.lock().release(ptr);
            }
            AllocKind::PreallocatedCached => {
                self.pool.lock().release_to_cache(ptr);
            }
            AllocKind::OwnedNative => {
                let ctx = ctx.as_mut().ok_or_else(|| {
                    AccelError::NotInitialized(format!(
                        "cannot free native allocation #{}",
                        alloc.alloc_id
                    ))
                })?;
                ctx.free(ptr)?;
            }
            AllocKind::Imported => {
                return Err(AccelError::InvalidHandle(format!(
                    "allocation #{} wraps imported memory owned by the caller",
                    alloc.alloc_id
                )));
            }
        }

        self.table
            .lookup_mut(alloc.alloc_id, alloc.epoch)?
            .mark_released();
        Ok(())
    }

    /// Snapshot the allocation into a fresh host shadow buffer and return it.
    ///
    /// # Errors
    /// `Mapping` if already mapped, `InvalidHandle` for released or unknown handles,
    /// `UnsupportedConfiguration` for runtime-managed memory, which is device-only.
    pub fn map(&mut self, ctx: &mut ContextSlot, alloc: DeviceAllocation) -> AccelResult<*mut u8> {
        let record = self.live_record(alloc)?;
        if record.kind == AllocKind::PreallocatedCached {
            return Err(AccelError::UnsupportedConfiguration(format!(
                "runtime-managed allocation #{} is not host-mappable",
                alloc.alloc_id
            )));
        }
        if record.mapped.is_some() {
            return Err(AccelError::Mapping(format!(
                "allocation #{} is already mapped",
                alloc.alloc_id
            )));
        }

        let (src, size) = (record.ptr, record.size);
        let mut shadow = vec![0u8; size].into_boxed_slice();
        Self::copy_to_host(ctx, shadow.as_mut_ptr(), src, size)?;

        let host_ptr = shadow.as_mut_ptr();
        self.live_record_mut(alloc)?.mapped = Some(shadow);
        Ok(host_ptr)
    }

    /// Write the shadow buffer back and drop it.
    ///
    /// # Errors
    /// `Mapping` if the allocation is not mapped.
    pub fn unmap(&mut self, ctx: &mut ContextSlot, alloc: DeviceAllocation) -> AccelResult<()> {
        let record = self.live_record_mut(alloc)?;
        let Some(shadow) = record.mapped.take() else {
            return Err(AccelError::Mapping(format!(
                "allocation #{} is not mapped",
                alloc.alloc_id
            )));
        };
        let dst = record.ptr;
        if let Err(e) = Self::copy_from_host(ctx, dst, shadow.as_ptr(), shadow.len()) {
            // Keep the mapping so the host data survives and unmap can be retried.
            record.mapped = Some(shadow);
            return Err(e);
        }
        Ok(())
    }

    /// Device-to-device copy between two tracked regions.
    ///
    /// # Errors
    /// `NotInitialized` without a device context: the copy would otherwise silently not happen.
    pub fn copy(
        &self,
        ctx: &mut ContextSlot,
        dst: DevicePtr,
        src: DevicePtr,
        size: usize,
    ) -> AccelResult<()> {
        let dst_ptr = self.resolve(dst, size)?;
        let src_ptr = self.resolve(src, size)?;
        let ctx = ctx.as_mut().ok_or_else(|| {
            AccelError::NotInitialized("device-to-device copy".to_string())
        })?;
        unsafe { ctx.copy_d2d(dst_ptr, src_ptr, size) }
    }

    /// Copy host bytes into a tracked region.
    ///
    /// # Errors
    /// `InvalidHandle` if the write would run past the allocation.
    pub fn upload(&self, ctx: &mut ContextSlot, dst: DevicePtr, data: &[u8]) -> AccelResult<()> {
        let dst_ptr = self.resolve(dst, data.len())?;
        Self::copy_from_host(ctx, dst_ptr, data.as_ptr(), data.len())
    }

    /// Copy a tracked region into host bytes.
    ///
    /// # Errors
    /// `InvalidHandle` if the read would run past the allocation.
    pub fn readback(&self, ctx: &mut ContextSlot, src: DevicePtr, out: &mut [u8]) -> AccelResult<()> {
        let src_ptr = self.resolve(src, out.len())?;
        Self::copy_to_host(ctx, out.as_mut_ptr(), src_ptr, out.len())
    }

    /// Raw address of `ptr`, for building kernel argument lists.
    ///
    /// # Errors
    /// `InvalidHandle` for released, stale or foreign handles, or an offset past the end.
    pub fn memory_addr(&self, ptr: DevicePtr) -> AccelResult<*mut u8> {
        self.resolve(ptr, 0)
    }

    /// # Errors
    /// `InvalidHandle` for stale or foreign handles.
    pub fn alloc_info(&self, alloc: DeviceAllocation) -> AccelResult<AllocInfo> {
        self.check_owner(alloc)?;
        self.table
            .lookup(alloc.alloc_id, alloc.epoch)
            .map(AllocInfo::from)
    }

    /// Number of records that still hold memory.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.table.records().filter(|r| !r.is_released()).count()
    }

    /// Release every owned allocation, then empty the table.
    ///
    /// Imported memory is left alone. Failures are logged: this runs on teardown.
    pub fn clear(&mut self, ctx: &mut ContextSlot) {
        let mut released = 0usize;
        for record in self.table.records_mut() {
            let Some(ptr) = NonNull::new(record.ptr) else {
                continue;
            };
            match record.kind {
                AllocKind::Imported => {}
                AllocKind::OwnedPooled => {
                    self.pool.lock().release(ptr);
                }
                AllocKind::PreallocatedCached => {
                    self.pool.lock().release_to_cache(ptr);
                }
                AllocKind::OwnedNative => match ctx.as_mut() {
                    Some(ctx) => {
                        if let Err(e) = ctx.free(ptr) {
                            log::error!("Failed to free native allocation {ptr:p}: {e}");
                        }
                    }
                    None => log::error!("Native allocation {ptr:p} outlived its context"),
                },
            }
            record.mark_released();
            released += 1;
        }
        self.table.clear();
        log::debug!("Allocation table cleared ({released} regions released)");
    }

    fn register(&mut self, record: AllocRecord) -> AccelResult<DeviceAllocation> {
        let alloc_id = self.table.register(record)?;
        Ok(DeviceAllocation {
            device_id: self.device_id,
            alloc_id,
            epoch: self.table.epoch(),
        })
    }

    fn check_owner(&self, alloc: DeviceAllocation) -> AccelResult<()> {
        if alloc.device_id == self.device_id {
            Ok(())
        } else {
            Err(AccelError::InvalidHandle(format!(
                "allocation #{} belongs to device {}, not {}",
                alloc.alloc_id, alloc.device_id, self.device_id
            )))
        }
    }

    fn live_record(&self, alloc: DeviceAllocation) -> AccelResult<&AllocRecord> {
        self.check_owner(alloc)?;
        let record = self.table.lookup(alloc.alloc_id, alloc.epoch)?;
        if record.is_released() {
            return Err(AccelError::InvalidHandle(format!(
                "allocation #{} is deallocated",
                alloc.alloc_id
            )));
        }
        Ok(record)
    }

    fn live_record_mut(&mut self, alloc: DeviceAllocation) -> AccelResult<&mut AllocRecord> {
        self.live_record(alloc)?;
        self.table.lookup_mut(alloc.alloc_id, alloc.epoch)
    }

    /// Base address plus offset, checked so that `size` bytes fit.
    fn resolve(&self, ptr: DevicePtr, size: usize) -> AccelResult<*mut u8> {
        let record = self.live_record(ptr.alloc)?;
        let end = ptr.offset.checked_add(size);
        if end.is_none_or(|end| end > record.size) {
            return Err(AccelError::InvalidHandle(format!(
                "range {}+{size} exceeds allocation #{} of {} bytes",
                ptr.offset, ptr.alloc.alloc_id, record.size
            )));
        }
        Ok(record.ptr.wrapping_add(ptr.offset))
    }

    fn fill_zero(ctx: &mut ContextSlot, ptr: *mut u8, size: usize) -> AccelResult<()> {
        match ctx.as_mut() {
            Some(ctx) => unsafe { ctx.memset(ptr, 0, size) },
            None => {
                unsafe { ptr::write_bytes(ptr, 0, size) };
                Ok(())
            }
        }
    }

    // Without a context every tracked region is host memory (pool or import),
    // so plain memcpy is the correct transfer.
    fn copy_to_host(ctx: &mut ContextSlot, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        match ctx.as_mut() {
            Some(ctx) => unsafe { ctx.copy_d2h(dst, src, size) },
            None => {
                unsafe { ptr::copy(src, dst, size) };
                Ok(())
            }
        }
    }

    fn copy_from_host(ctx: &mut ContextSlot, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        match ctx.as_mut() {
            Some(ctx) => unsafe { ctx.copy_h2d(dst, src, size) },
            None => {
                unsafe { ptr::copy(src, dst, size) };
                Ok(())
            }
        }
    }

    fn release_raw(&self, ctx: &mut ContextSlot, ptr: NonNull<u8>, kind: AllocKind) {
        let result = match (kind, ctx.as_mut()) {
            (AllocKind::OwnedNative, Some(ctx)) => ctx.free(ptr),
            _ => {
                self.pool.lock().release(ptr);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::error!("Failed to roll back allocation {ptr:p}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::GenericDevice;
    use crate::runtime::memory::HostPool;

    const PAGE: usize = 4096;

    fn manager() -> MemoryManager {
        MemoryManager::new(7, PAGE, HostPool::shared(PAGE, None))
    }

    fn generic_slot() -> ContextSlot {
        let mut dev = GenericDevice::new(1 << 20);
        dev.initialize().unwrap();
        Some(Box::new(dev))
    }

    #[test]
    fn uninitialized_allocation_comes_from_pool() {
        let mut mm = manager();
        let mut ctx = None;
        let alloc = mm.allocate(&mut ctx, AllocParams::new(100)).unwrap();
        let info = mm.alloc_info(alloc).unwrap();
        assert_eq!(info.kind, AllocKind::OwnedPooled);
        assert_eq!(info.size, 100);
        assert_eq!(alloc.alloc_id(), 0);
    }

    #[test]
    fn initialized_allocation_is_native() {
        let mut mm = manager();
        let mut ctx = generic_slot();
        let alloc = mm.allocate(&mut ctx, AllocParams::new(100)).unwrap();
        assert_eq!(mm.alloc_info(alloc).unwrap().kind, AllocKind::OwnedNative);
        mm.deallocate(&mut ctx, alloc).unwrap();
        assert_eq!(mm.live_allocations(), 0);
    }

    #[test]
    fn native_exhaustion_falls_back_to_pool() {
        let mut mm = manager();
        let mut ctx = generic_slot();
        let alloc = mm.allocate(&mut ctx, AllocParams::new(2 << 20)).unwrap();
        assert_eq!(mm.alloc_info(alloc).unwrap().kind, AllocKind::OwnedPooled);
    }

    #[test]
    fn upload_and_readback_are_bounds_checked() {
        let mut mm = manager();
        let mut ctx = None;
        let alloc = mm.allocate(&mut ctx, AllocParams::new(8)).unwrap();
        mm.upload(&mut ctx, alloc.ptr(4), &[1, 2, 3, 4]).unwrap();

        let mut out = [0xffu8; 8];
        mm.readback(&mut ctx, alloc.into(), &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);

        assert!(matches!(
            mm.upload(&mut ctx, alloc.ptr(5), &[0; 4]),
            Err(AccelError::InvalidHandle(_))
        ));
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let mut mm = manager();
        let mut ctx = None;
        let alloc = mm.allocate(&mut ctx, AllocParams::new(8)).unwrap();
        let foreign = DeviceAllocation {
            device_id: 99,
            ..alloc
        };
        assert!(matches!(
            mm.alloc_info(foreign),
            Err(AccelError::InvalidHandle(_))
        ));
    }

    #[test]
    fn double_map_is_rejected() {
        let mut mm = manager();
        let mut ctx = generic_slot();
        let alloc = mm.allocate(&mut ctx, AllocParams::new(16)).unwrap();
        mm.map(&mut ctx, alloc).unwrap();
        assert!(matches!(
            mm.map(&mut ctx, alloc),
            Err(AccelError::Mapping(_))
        ));
        mm.unmap(&mut ctx, alloc).unwrap();
        assert!(matches!(
            mm.unmap(&mut ctx, alloc),
            Err(AccelError::Mapping(_))
        ));
    }

    #[test]
    fn runtime_memory_is_not_mappable() {
        let mut mm = manager();
        let mut ctx = None;
        let alloc = mm.allocate_runtime(&mut ctx, AllocParams::new(10)).unwrap();
        assert_eq!(mm.alloc_info(alloc).unwrap().size, PAGE);
        assert!(matches!(
            mm.map(&mut ctx, alloc),
            Err(AccelError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn failed_write_back_keeps_mapping() {
        let mut mm = manager();
        let mut ctx = None;
        let alloc = mm.allocate(&mut ctx, AllocParams::new(4)).unwrap();
        let host = mm.map(&mut ctx, alloc).unwrap();
        unsafe { host.write(9) };

        // A context that was never brought up refuses every copy.
        let mut down: ContextSlot = Some(Box::new(GenericDevice::new(1 << 20)));
        assert!(matches!(
            mm.unmap(&mut down, alloc),
            Err(AccelError::NotInitialized(_))
        ));
        assert!(mm.alloc_info(alloc).unwrap().mapped);

        mm.unmap(&mut ctx, alloc).unwrap();
        let mut out = [0u8; 4];
        mm.readback(&mut ctx, alloc.into(), &mut out).unwrap();
        assert_eq!(out, [9, 0, 0, 0]);
    }

    #[test]
    fn clear_leaves_imported_memory_alone() {
        let mut mm = manager();
        let mut ctx = generic_slot();
        let mut host = vec![5u8; 32];
        mm.import(host.as_mut_ptr(), host.len()).unwrap();
        mm.allocate(&mut ctx, AllocParams::new(32)).unwrap();
        mm.clear(&mut ctx);
        assert!(mm.table().is_empty());
        assert_eq!(host, vec![5u8; 32]);
    }
}
