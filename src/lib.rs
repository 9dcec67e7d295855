//! Device-side execution runtime for heterogeneous accelerators.
//!
//! `rhi` wraps the per-chip backends behind [`rhi::DeviceContext`];
//! `runtime` tracks allocations, derives launch geometry and issues kernels.

pub mod config;
pub mod error;
pub mod rhi;
pub mod runtime;
pub mod utils;

pub use config::RuntimeConfig;
pub use error::{AccelError, AccelResult};
pub use runtime::{Device, Program};
