pub mod device;
pub mod dispatch;
pub mod launcher;
pub mod memory;
pub mod program;

pub use device::Device;
pub use dispatch::{
    CompiledKernel, DispatchConfigurator, KernelArg, OffloadedTask, RangeBound, TaskDescriptor,
    TaskType,
};
pub use launcher::KernelLauncher;
pub use memory::{AllocInfo, AllocKind, AllocParams, DeviceAllocation, DevicePtr};
pub use program::Program;
