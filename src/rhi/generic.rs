#![allow(clippy::cast_possible_truncation)]

use crate::error::{AccelError, AccelResult};
use crate::rhi::context::DeviceContext;
use crate::utils::align_up;
use std::collections::HashMap;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

const GENERIC_PAGE_SIZE: usize = 4096;

/// One thread's view of a launch on the software device.
#[derive(Debug, Clone, Copy)]
pub struct KernelInvocation<'a> {
    pub args: &'a [*mut u8],
    pub grid_dim: u32,
    pub block_dim: u32,
    pub block_idx: u32,
    pub thread_idx: u32,
}

impl KernelInvocation<'_> {
    /// Linear thread index across the whole grid.
    #[must_use]
    pub const fn global_id(&self) -> u64 {
        self.block_idx as u64 * self.block_dim as u64 + self.thread_idx as u64
    }

    /// Number of threads in the whole grid.
    #[must_use]
    pub const fn global_size(&self) -> u64 {
        self.grid_dim as u64 * self.block_dim as u64
    }
}

/// Host closure standing in for a compiled entry point.
pub type HostKernel = Arc<dyn Fn(&KernelInvocation<'_>) + Send + Sync>;

/// Software accelerator for the `generic` chip.
///
/// Device memory is anonymous mmap'd pages, so every device address is also
/// a valid host address. Launches run synchronously on the calling thread,
/// one closure call per (block, thread) pair.
pub struct GenericDevice {
    initialized: bool,
    capacity: usize,
    used: usize,
    // Base address -> mapped length
    mappings: HashMap<usize, usize>,
    kernels: HashMap<String, HostKernel>,
    launches: u64,
}

// Addresses in `mappings` are owned exclusively by this device.
unsafe impl Send for GenericDevice {}

impl fmt::Debug for GenericDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericDevice")
            .field("initialized", &self.initialized)
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .field("live_allocations", &self.mappings.len())
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl GenericDevice {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            initialized: false,
            capacity,
            used: 0,
            mappings: HashMap::new(),
            kernels: HashMap::new(),
            launches: 0,
        }
    }

    /// Registers the host implementation of entry point `name`, replacing any previous one.
    pub fn register_kernel<S, F>(&mut self, name: S, kernel: F)
    where
        S: Into<String>,
        F: Fn(&KernelInvocation<'_>) + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
    }

    /// Builder-style variant of [`GenericDevice::register_kernel`].
    #[must_use]
    pub fn with_kernel<S, F>(mut self, name: S, kernel: F) -> Self
    where
        S: Into<String>,
        F: Fn(&KernelInvocation<'_>) + Send + Sync + 'static,
    {
        self.register_kernel(name, kernel);
        self
    }

    #[must_use]
    pub const fn used_bytes(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn launch_count(&self) -> u64 {
        self.launches
    }

    fn ensure_initialized(&self, op: &str) -> AccelResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(AccelError::NotInitialized(format!("generic device: {op}")))
        }
    }
}

impl Drop for GenericDevice {
    fn drop(&mut self) {
        for (&addr, &len) in &self.mappings {
            unsafe {
                libc::munmap(addr as *mut libc::c_void, len);
            }
        }
    }
}

impl DeviceContext for GenericDevice {
    fn chip(&self) -> &str {
        "generic"
    }

    fn initialize(&mut self) -> AccelResult<()> {
        if !self.initialized {
            log::info!(
                "Generic device up: {} MB, {} host kernels",
                self.capacity / 1024 / 1024,
                self.kernels.len()
            );
            self.initialized = true;
        }
        Ok(())
    }

    fn allocate(&mut self, size: usize, _managed: bool) -> AccelResult<Option<NonNull<u8>>> {
        self.ensure_initialized("allocate")?;

        let Some(len) = align_up(size.max(1), GENERIC_PAGE_SIZE) else {
            log::debug!("Generic device cannot represent a {size} byte allocation");
            return Ok(None);
        };
        if self
            .used
            .checked_add(len)
            .is_none_or(|total| total > self.capacity)
        {
            log::debug!(
                "Generic device exhausted: {} + {len} > {} bytes",
                self.used,
                self.capacity
            );
            return Ok(None);
        }

        let ret = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ret == libc::MAP_FAILED {
            log::debug!(
                "Generic device mmap of {len} bytes failed: {}",
                std::io::Error::last_os_error()
            );
            return Ok(None);
        }

        self.mappings.insert(ret as usize, len);
        self.used += len;
        Ok(NonNull::new(ret.cast::<u8>()))
    }

    fn free(&mut self, ptr: NonNull<u8>) -> AccelResult<()> {
        let addr = ptr.as_ptr() as usize;
        let Some(len) = self.mappings.remove(&addr) else {
            return Err(AccelError::Device(format!(
                "free of untracked address 0x{addr:x}"
            )));
        };

        let ret = unsafe { libc::munmap(addr as *mut libc::c_void, len) };
        self.used -= len;
        if ret != 0 {
            return Err(AccelError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    unsafe fn copy_h2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        self.ensure_initialized("copy_h2d")?;
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn copy_d2h(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        self.ensure_initialized("copy_d2h")?;
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn copy_d2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()> {
        self.ensure_initialized("copy_d2d")?;
        unsafe { ptr::copy(src, dst, size) };
        Ok(())
    }

    unsafe fn memset(&mut self, ptr: *mut u8, value: u8, size: usize) -> AccelResult<()> {
        self.ensure_initialized("memset")?;
        unsafe { ptr::write_bytes(ptr, value, size) };
        Ok(())
    }

    fn synchronize(&mut self) -> AccelResult<()> {
        // Launches complete before `launch` returns.
        self.ensure_initialized("synchronize")
    }

    fn total_memory(&self) -> AccelResult<usize> {
        Ok(self.capacity)
    }

    fn launch(
        &mut self,
        name: &str,
        args: &[*mut u8],
        grid_dim: u32,
        block_dim: u32,
    ) -> AccelResult<()> {
        self.ensure_initialized("launch")?;
        let kernel = self
            .kernels
            .get(name)
            .cloned()
            .ok_or_else(|| AccelError::Device(format!("no kernel named '{name}'")))?;

        for block_idx in 0..grid_dim {
            for thread_idx in 0..block_dim {
                kernel(&KernelInvocation {
                    args,
                    grid_dim,
                    block_dim,
                    block_idx,
                    thread_idx,
                });
            }
        }
        self.launches += 1;
        Ok(())
    }
}
