use crate::config::RuntimeConfig;
use crate::rhi::context::DeviceContext;
use crate::rhi::generic::GenericDevice;
use crate::rhi::native::NativeDevice;

/// Chip identifiers recognized by this runtime.
pub const SUPPORTED_CHIPS: [&str; 7] = [
    "mlu370",
    "mlu590",
    "ascend910",
    "ascend310",
    "dcu",
    "gcu",
    "generic",
];

/// Backend family a chip identifier resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chip {
    /// Software device executing host kernels.
    Generic,
    /// A chip driven by its vendor SDK. Holds the identifier as given.
    Native(String),
}

impl Chip {
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if id == "generic" {
            Self::Generic
        } else {
            Self::Native(id.to_string())
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Generic => "generic",
            Self::Native(id) => id,
        }
    }
}

#[must_use]
pub fn is_chip_supported(chip: &str) -> bool {
    SUPPORTED_CHIPS.contains(&chip)
}

#[must_use]
pub fn supported_chips() -> Vec<String> {
    SUPPORTED_CHIPS.iter().map(|c| (*c).to_string()).collect()
}

/// Builds the (uninitialized) context for the configured chip.
#[must_use]
pub fn open_backend(config: &RuntimeConfig) -> Box<dyn DeviceContext> {
    match Chip::from_id(&config.chip) {
        Chip::Generic => Box::new(GenericDevice::new(config.generic_memory_bytes)),
        Chip::Native(id) => {
            if !is_chip_supported(&id) {
                log::warn!("Chip '{id}' is not in the recognized set, trying its native runtime");
            }
            Box::new(NativeDevice::new(id))
        }
    }
}
