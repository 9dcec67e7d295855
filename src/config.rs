use crate::error::{AccelError, AccelResult};
use crate::rhi::chip;

/// Environment variable consulted when no chip is configured explicitly.
pub const CHIP_ENV_VAR: &str = "ACCEL_CHIP";

/// Chip identifier used when neither the config nor the environment names one.
pub const DEFAULT_CHIP: &str = "generic";

/// Runtime-wide settings shared by the allocator, the dispatch configurator and the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Target chip identifier (see [`chip::SUPPORTED_CHIPS`]).
    pub chip: String,
    /// Threads per block for parallel tasks that don't carry their own hint.
    pub default_block_dim: u32,
    /// Grid size for runtime-bound loops, and the ceiling for bounded ones.
    pub default_grid_dim: u32,
    /// Grid size that keeps every compute unit busy (used by garbage collection).
    pub saturating_grid_dim: u32,
    /// Number of compute units on the target.
    pub compute_unit_count: u32,
    /// List generation runs `compute_unit_count * listgen_grid_multiplier` blocks.
    pub listgen_grid_multiplier: u32,
    /// Block size of the wide garbage collection phases.
    pub gc_block_dim: u32,
    /// Wait for the device after every kernel launch.
    pub sync_after_launch: bool,
    /// Granularity of runtime-managed allocations. Must be a power of two.
    pub page_size: usize,
    /// Optional cap on the bytes the shared host pool may hand out.
    pub pool_capacity: Option<usize>,
    /// Memory exposed by the software (`generic`) device.
    pub generic_memory_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chip: DEFAULT_CHIP.to_string(),
            default_block_dim: 128,
            default_grid_dim: 1024,
            saturating_grid_dim: 1024,
            compute_unit_count: 64,
            listgen_grid_multiplier: 4,
            gc_block_dim: 64,
            sync_after_launch: false,
            page_size: 4096,
            pool_capacity: None,
            generic_memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Default settings with the chip taken from `ACCEL_CHIP` when it is set.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            chip: resolve_chip(None),
            ..Self::default()
        }
    }

    /// Checks the numeric settings. Unknown chips are only warned about.
    ///
    /// # Errors
    /// Returns `AccelError::Config` if a dimension is zero or the page size is not a power of two.
    pub fn validate(&self) -> AccelResult<()> {
        let dims = [
            ("default_block_dim", self.default_block_dim),
            ("default_grid_dim", self.default_grid_dim),
            ("saturating_grid_dim", self.saturating_grid_dim),
            ("compute_unit_count", self.compute_unit_count),
            ("listgen_grid_multiplier", self.listgen_grid_multiplier),
            ("gc_block_dim", self.gc_block_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(AccelError::Config(format!("{name} must be > 0")));
            }
        }

        if !self.page_size.is_power_of_two() {
            return Err(AccelError::Config(format!(
                "page_size must be a power of two, got {}",
                self.page_size
            )));
        }

        if self.chip.is_empty() {
            return Err(AccelError::Config("chip must not be empty".to_string()));
        }

        if !chip::is_chip_supported(&self.chip) {
            log::warn!("Chip '{}' may not be fully supported", self.chip);
        }

        Ok(())
    }
}

/// Picks the chip: explicit value, then `ACCEL_CHIP`, then `"generic"`.
#[must_use]
pub fn resolve_chip(explicit: Option<&str>) -> String {
    if let Some(chip) = explicit.filter(|c| !c.is_empty()) {
        return chip.to_string();
    }
    match std::env::var(CHIP_ENV_VAR) {
        Ok(chip) if !chip.is_empty() => chip,
        _ => DEFAULT_CHIP.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
    chip_set: bool,
}

impl RuntimeConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn chip<S: Into<String>>(mut self, chip: S) -> Self {
        self.config.chip = chip.into();
        self.chip_set = true;
        self
    }

    #[must_use]
    pub const fn default_block_dim(mut self, dim: u32) -> Self {
        self.config.default_block_dim = dim;
        self
    }

    #[must_use]
    pub const fn default_grid_dim(mut self, dim: u32) -> Self {
        self.config.default_grid_dim = dim;
        self
    }

    #[must_use]
    pub const fn saturating_grid_dim(mut self, dim: u32) -> Self {
        self.config.saturating_grid_dim = dim;
        self
    }

    #[must_use]
    pub const fn compute_unit_count(mut self, count: u32) -> Self {
        self.config.compute_unit_count = count;
        self
    }

    #[must_use]
    pub const fn listgen_grid_multiplier(mut self, multiplier: u32) -> Self {
        self.config.listgen_grid_multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn gc_block_dim(mut self, dim: u32) -> Self {
        self.config.gc_block_dim = dim;
        self
    }

    #[must_use]
    pub const fn sync_after_launch(mut self, sync: bool) -> Self {
        self.config.sync_after_launch = sync;
        self
    }

    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    #[must_use]
    pub const fn pool_capacity(mut self, bytes: usize) -> Self {
        self.config.pool_capacity = Some(bytes);
        self
    }

    #[must_use]
    pub const fn generic_memory_bytes(mut self, bytes: usize) -> Self {
        self.config.generic_memory_bytes = bytes;
        self
    }

    /// Finalizes the config. Without an explicit chip, `ACCEL_CHIP` is consulted.
    ///
    /// # Errors
    /// Propagates [`RuntimeConfig::validate`] failures.
    pub fn build(mut self) -> AccelResult<RuntimeConfig> {
        if !self.chip_set {
            self.config.chip = resolve_chip(None);
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_chip_wins_over_environment() {
        assert_eq!(resolve_chip(Some("mlu370")), "mlu370");
    }

    #[test]
    fn zero_block_dim_is_rejected() {
        let err = RuntimeConfig::builder()
            .chip("generic")
            .default_block_dim(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, AccelError::Config(_)));
    }

    #[test]
    fn page_size_must_be_power_of_two() {
        let err = RuntimeConfig::builder()
            .chip("generic")
            .page_size(3000)
            .build()
            .unwrap_err();
        assert!(matches!(err, AccelError::Config(_)));
    }

    #[test]
    fn unknown_chip_is_accepted() {
        let config = RuntimeConfig::builder().chip("npu9000").build().unwrap();
        assert_eq!(config.chip, "npu9000");
    }
}
