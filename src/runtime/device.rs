use crate::config::RuntimeConfig;
use crate::error::{AccelError, AccelResult};
use crate::rhi::{DeviceContext, open_backend};
use crate::runtime::memory::manager::ContextSlot;
use crate::runtime::memory::{
    AllocInfo, AllocParams, DeviceAllocation, DevicePtr, HostPool, MemoryManager, SharedPool,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct DeviceState {
    chip: String,
    ctx: ContextSlot,
    memory: MemoryManager,
}

/// An accelerator as seen by the runtime: a lazily brought-up context plus
/// the allocation bookkeeping for it.
///
/// Until [`Device::initialize`] succeeds, memory comes from the host pool and
/// kernel launches fail. All methods take `&self`; table and pool mutation is
/// serialized by an internal lock.
#[derive(Debug)]
pub struct Device {
    id: u64,
    config: RuntimeConfig,
    state: Mutex<DeviceState>,
}

impl Device {
    /// Creates an uninitialized device with its own host pool.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let pool = HostPool::shared(config.page_size, config.pool_capacity);
        Self::with_pool(config, pool)
    }

    /// Creates an uninitialized device drawing pooled memory from `pool`.
    #[must_use]
    pub fn with_pool(config: &RuntimeConfig, pool: SharedPool) -> Self {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("Device {id} created, target chip: {}", config.chip);
        Self {
            id,
            config: config.clone(),
            state: Mutex::new(DeviceState {
                chip: config.chip.clone(),
                ctx: None,
                memory: MemoryManager::new(id, config.page_size, pool),
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn target_chip(&self) -> String {
        self.state.lock().chip.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().ctx.is_some()
    }

    /// Brings up the backend for `chip`.
    ///
    /// Repeating the call with the same chip is a no-op.
    ///
    /// # Errors
    /// `Config` if a different chip is already up; any bring-up failure of the backend.
    pub fn initialize(&self, chip: &str) -> AccelResult<()> {
        if self.check_reinit(chip)? {
            return Ok(());
        }
        let config = RuntimeConfig {
            chip: chip.to_string(),
            ..self.config.clone()
        };
        self.install(open_backend(&config))
    }

    /// Brings up a caller-supplied context, e.g. one with host kernels registered.
    ///
    /// # Errors
    /// Same as [`Device::initialize`].
    pub fn initialize_with(&self, ctx: Box<dyn DeviceContext>) -> AccelResult<()> {
        if self.check_reinit(ctx.chip())? {
            return Ok(());
        }
        self.install(ctx)
    }

    fn check_reinit(&self, chip: &str) -> AccelResult<bool> {
        let state = self.state.lock();
        match &state.ctx {
            Some(ctx) if ctx.chip() == chip => Ok(true),
            Some(ctx) => Err(AccelError::Config(format!(
                "device already initialized for '{}', cannot switch to '{chip}'",
                ctx.chip()
            ))),
            None => Ok(false),
        }
    }

    fn install(&self, mut ctx: Box<dyn DeviceContext>) -> AccelResult<()> {
        let chip = ctx.chip().to_string();
        ctx.initialize()?;

        let mut state = self.state.lock();
        if state.ctx.is_some() {
            // Lost a race against another initializer.
            return self.check_reinit_locked(&state, &chip);
        }
        log::info!("Device {} initialized with chip: {chip}", self.id);
        state.chip = chip;
        state.ctx = Some(ctx);
        Ok(())
    }

    fn check_reinit_locked(&self, state: &DeviceState, chip: &str) -> AccelResult<()> {
        if state.chip == chip {
            Ok(())
        } else {
            Err(AccelError::Config(format!(
                "device {} already initialized for '{}'",
                self.id, state.chip
            )))
        }
    }

    /// # Errors
    /// See [`MemoryManager::allocate`].
    pub fn allocate_memory(&self, params: AllocParams) -> AccelResult<DeviceAllocation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.allocate(&mut state.ctx, params)
    }

    /// # Errors
    /// See [`MemoryManager::allocate_runtime`].
    pub fn allocate_memory_runtime(&self, params: AllocParams) -> AccelResult<DeviceAllocation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.allocate_runtime(&mut state.ctx, params)
    }

    /// # Errors
    /// See [`MemoryManager::deallocate`].
    pub fn dealloc_memory(&self, alloc: DeviceAllocation) -> AccelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.deallocate(&mut state.ctx, alloc)
    }

    /// Tracks caller-owned memory without taking ownership of it.
    ///
    /// # Errors
    /// See [`MemoryManager::import`].
    ///
    /// # Safety
    /// `ptr` must stay valid for reads and writes of `size` bytes for as long
    /// as the returned handle is used.
    pub unsafe fn import_memory(&self, ptr: *mut u8, size: usize) -> AccelResult<DeviceAllocation> {
        self.state.lock().memory.import(ptr, size)
    }

    /// Returns a host pointer to a shadow copy of the allocation.
    ///
    /// The pointer stays valid until [`Device::unmap`]; writes become visible
    /// on the device only after that call.
    ///
    /// # Errors
    /// See [`MemoryManager::map`].
    pub fn map(&self, alloc: DeviceAllocation) -> AccelResult<*mut u8> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.map(&mut state.ctx, alloc)
    }

    /// # Errors
    /// See [`MemoryManager::unmap`].
    pub fn unmap(&self, alloc: DeviceAllocation) -> AccelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.unmap(&mut state.ctx, alloc)
    }

    /// # Errors
    /// See [`MemoryManager::copy`].
    pub fn memcpy_internal(&self, dst: DevicePtr, src: DevicePtr, size: usize) -> AccelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.copy(&mut state.ctx, dst, src, size)
    }

    /// # Errors
    /// See [`MemoryManager::upload`].
    pub fn upload_data(&self, dst: DevicePtr, data: &[u8]) -> AccelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.upload(&mut state.ctx, dst, data)
    }

    /// # Errors
    /// See [`MemoryManager::readback`].
    pub fn readback_data(&self, src: DevicePtr, out: &mut [u8]) -> AccelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.readback(&mut state.ctx, src, out)
    }

    /// # Errors
    /// See [`MemoryManager::memory_addr`].
    pub fn memory_addr(&self, ptr: DevicePtr) -> AccelResult<*mut u8> {
        self.state.lock().memory.memory_addr(ptr)
    }

    /// # Errors
    /// See [`MemoryManager::alloc_info`].
    pub fn alloc_info(&self, alloc: DeviceAllocation) -> AccelResult<AllocInfo> {
        self.state.lock().memory.alloc_info(alloc)
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.live_allocations()
    }

    /// Device memory in bytes, or 0 while uninitialized.
    ///
    /// # Errors
    /// Propagates the backend's failure to report.
    pub fn total_memory(&self) -> AccelResult<usize> {
        match self.state.lock().ctx.as_ref() {
            Some(ctx) => ctx.total_memory(),
            None => Ok(0),
        }
    }

    /// Blocks until all issued device work has completed. Hangs if the device does.
    ///
    /// # Errors
    /// Propagates backend synchronization failures.
    pub fn wait_idle(&self) -> AccelResult<()> {
        match self.state.lock().ctx.as_mut() {
            Some(ctx) => ctx.synchronize(),
            None => Ok(()),
        }
    }

    /// Launches one compiled entry point.
    ///
    /// # Errors
    /// `NotInitialized` without a context; there is no host fallback for kernels.
    pub fn launch_kernel(
        &self,
        name: &str,
        args: &[*mut u8],
        grid_dim: u32,
        block_dim: u32,
    ) -> AccelResult<()> {
        let mut state = self.state.lock();
        let ctx = state.ctx.as_mut().ok_or_else(|| {
            AccelError::NotInitialized(format!("cannot launch kernel '{name}'"))
        })?;
        ctx.launch(name, args, grid_dim, block_dim)
    }

    /// Releases every owned allocation, empties the table and tears the context down.
    ///
    /// Handles issued before this call are stale afterwards.
    pub fn clear(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.memory.clear(&mut state.ctx);
        if state.ctx.take().is_some() {
            log::info!("Device {} context torn down", self.id);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::GenericDevice;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            generic_memory_bytes: 1 << 20,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn initialize_is_idempotent_for_same_chip() {
        let dev = Device::new(&config());
        assert!(!dev.is_initialized());
        dev.initialize("generic").unwrap();
        dev.initialize("generic").unwrap();
        assert!(dev.is_initialized());
        assert_eq!(dev.total_memory().unwrap(), 1 << 20);
    }

    #[test]
    fn switching_chip_after_bring_up_is_rejected() {
        let dev = Device::new(&config());
        dev.initialize_with(Box::new(GenericDevice::new(1 << 20)))
            .unwrap();
        assert!(matches!(
            dev.initialize("mlu370"),
            Err(AccelError::Config(_))
        ));
    }

    #[test]
    fn failed_bring_up_leaves_device_uninitialized() {
        let dev = Device::new(&config());
        assert!(matches!(
            dev.initialize("ascend310"),
            Err(AccelError::NotImplemented(_))
        ));
        assert!(!dev.is_initialized());
        assert_eq!(dev.total_memory().unwrap(), 0);
        assert!(dev.wait_idle().is_ok());
    }

    #[test]
    fn launch_without_context_is_fatal() {
        let dev = Device::new(&config());
        assert!(matches!(
            dev.launch_kernel("k", &[], 1, 1),
            Err(AccelError::NotInitialized(_))
        ));
    }

    #[test]
    fn clear_tears_down_context_and_table() {
        let dev = Device::new(&config());
        dev.initialize("generic").unwrap();
        let alloc = dev.allocate_memory(AllocParams::new(64)).unwrap();
        dev.clear();
        assert!(!dev.is_initialized());
        assert_eq!(dev.live_allocations(), 0);
        assert!(matches!(
            dev.alloc_info(alloc),
            Err(AccelError::InvalidHandle(_))
        ));
        // Releasing a pre-clear handle is a no-op.
        assert!(dev.dealloc_memory(alloc).is_ok());
    }
}
