use crate::config::RuntimeConfig;
use crate::error::{AccelError, AccelResult};
use crate::runtime::device::Device;
use crate::runtime::dispatch::CompiledKernel;

/// Issues a compiled kernel's tasks to a device in program order.
///
/// Tasks often depend on each other only through that order (list generation
/// feeding the loop that walks the list), so nothing here reorders or
/// overlaps them. Cross-kernel ordering assumes a single FIFO device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLauncher {
    sync_after_launch: bool,
}

impl KernelLauncher {
    #[must_use]
    pub const fn new(sync_after_launch: bool) -> Self {
        Self { sync_after_launch }
    }

    #[must_use]
    pub const fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.sync_after_launch)
    }

    #[must_use]
    pub const fn sync_after_launch(&self) -> bool {
        self.sync_after_launch
    }

    /// Launches every task of `kernel`, then waits for the device if configured to.
    ///
    /// All descriptors are checked before the first launch, so a malformed
    /// kernel never runs partially.
    ///
    /// # Errors
    /// `NotInitialized` without a device context, `InvalidDispatch` for a
    /// degenerate descriptor, or the first backend launch failure.
    pub fn launch(&self, device: &Device, kernel: &CompiledKernel) -> AccelResult<()> {
        if !device.is_initialized() {
            return Err(AccelError::NotInitialized(format!(
                "cannot launch kernel '{}'",
                kernel.name
            )));
        }
        for task in &kernel.tasks {
            task.validate()?;
        }

        let args = kernel.arg_pointers();
        for task in &kernel.tasks {
            log::trace!(
                "Launching {}::{} grid={} block={} ({} args)",
                kernel.name,
                task.name,
                task.grid_dim,
                task.block_dim,
                args.len()
            );
            device.launch_kernel(&task.name, &args, task.grid_dim, task.block_dim)?;
        }

        if self.sync_after_launch {
            device.wait_idle()?;
        }
        Ok(())
    }
}
