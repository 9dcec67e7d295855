//! Device-facing layer: the capability interface every chip backend implements,
//! and the backends themselves.

pub mod chip;
pub mod context;
pub mod generic;
pub mod native;

pub use chip::{Chip, SUPPORTED_CHIPS, is_chip_supported, open_backend, supported_chips};
pub use context::DeviceContext;
pub use generic::{GenericDevice, HostKernel, KernelInvocation};
pub use native::NativeDevice;
