use crate::config::RuntimeConfig;
use crate::error::AccelResult;
use crate::rhi::DeviceContext;
use crate::runtime::device::Device;
use crate::runtime::dispatch::{CompiledKernel, DispatchConfigurator, KernelArg, OffloadedTask};
use crate::runtime::launcher::KernelLauncher;

/// Owns one device and everything needed to compile and launch kernels on it.
///
/// The backend is brought up explicitly through [`Program::materialize_runtime`];
/// until then memory is served from the host pool and launches fail.
#[derive(Debug)]
pub struct Program {
    config: RuntimeConfig,
    device: Device,
    configurator: DispatchConfigurator,
    launcher: KernelLauncher,
}

impl Program {
    /// # Errors
    /// Returns `AccelError::Config` if `config` does not validate.
    pub fn new(config: RuntimeConfig) -> AccelResult<Self> {
        config.validate()?;
        Ok(Self {
            device: Device::new(&config),
            configurator: DispatchConfigurator::new(&config),
            launcher: KernelLauncher::from_config(&config),
            config,
        })
    }

    /// A program targeting the chip named by `ACCEL_CHIP`, with default settings.
    ///
    /// # Errors
    /// See [`Program::new`].
    pub fn from_env() -> AccelResult<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub const fn configurator(&self) -> &DispatchConfigurator {
        &self.configurator
    }

    /// Brings up the configured backend. Calling it again is a no-op.
    ///
    /// # Errors
    /// Whatever the backend reports during bring-up.
    pub fn materialize_runtime(&self) -> AccelResult<()> {
        self.device.initialize(&self.config.chip)
    }

    /// Brings up a caller-built context instead of the configured one.
    ///
    /// # Errors
    /// See [`Device::initialize_with`].
    pub fn materialize_with(&self, ctx: Box<dyn DeviceContext>) -> AccelResult<()> {
        self.device.initialize_with(ctx)
    }

    /// Fixes the launch geometry of `tasks` and bundles them with their arguments.
    ///
    /// # Errors
    /// `InvalidDispatch` if any task resolves to a degenerate geometry.
    pub fn compile<S: Into<String>>(
        &self,
        name: S,
        tasks: &[OffloadedTask],
        args: Vec<KernelArg>,
    ) -> AccelResult<CompiledKernel> {
        let name = name.into();
        let descriptors = self.configurator.configure_all(tasks)?;
        log::debug!(
            "Compiled kernel '{name}': {} tasks -> {} launches",
            tasks.len(),
            descriptors.len()
        );
        Ok(CompiledKernel::new(name, descriptors, args))
    }

    /// # Errors
    /// See [`KernelLauncher::launch`].
    pub fn launch(&self, kernel: &CompiledKernel) -> AccelResult<()> {
        self.launcher.launch(&self.device, kernel)
    }

    /// # Errors
    /// See [`Device::wait_idle`].
    pub fn synchronize(&self) -> AccelResult<()> {
        self.device.wait_idle()
    }

    /// Drains outstanding work and releases every device resource.
    ///
    /// The program may be materialized again afterwards.
    ///
    /// # Errors
    /// A failed drain is reported after the device has been cleared anyway.
    pub fn finalize(&self) -> AccelResult<()> {
        let drained = self.device.wait_idle();
        self.device.clear();
        log::info!("Program finalized (device {})", self.device.id());
        drained
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.device.is_initialized()
    }

    #[must_use]
    pub fn target_chip(&self) -> String {
        self.device.target_chip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccelError;

    fn program() -> Program {
        Program::new(
            RuntimeConfig::builder()
                .chip("generic")
                .generic_memory_bytes(1 << 20)
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RuntimeConfig {
            gc_block_dim: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(Program::new(config), Err(AccelError::Config(_))));
    }

    #[test]
    fn materialize_is_idempotent_and_finalize_resets() {
        let prog = program();
        assert!(!prog.is_initialized());
        prog.materialize_runtime().unwrap();
        prog.materialize_runtime().unwrap();
        assert!(prog.is_initialized());
        assert_eq!(prog.target_chip(), "generic");

        prog.finalize().unwrap();
        assert!(!prog.is_initialized());
        prog.materialize_runtime().unwrap();
        assert!(prog.is_initialized());
    }

    #[test]
    fn compile_expands_gc_between_other_tasks() {
        let prog = program();
        let kernel = prog
            .compile(
                "step",
                &[
                    OffloadedTask::listgen("lg"),
                    OffloadedTask::gc("gc"),
                    OffloadedTask::range_for("body", 0, 1000),
                ],
                Vec::new(),
            )
            .unwrap();
        let names: Vec<_> = kernel.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "lg",
                "gc_gather_list",
                "gc_reinit_lists",
                "gc_zero_fill",
                "body"
            ]
        );
        assert_eq!(kernel.tasks[4].grid_dim, 8);
    }
}
