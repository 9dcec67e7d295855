use crate::error::AccelResult;
use std::fmt::Debug;
use std::ptr::NonNull;

/// Capability set of a chip's native runtime.
///
/// One implementation exists per backend; the runtime only ever talks to a
/// `Box<dyn DeviceContext>` that has been successfully initialized.
pub trait DeviceContext: Send + Debug {
    /// The chip identifier this context drives.
    fn chip(&self) -> &str;

    /// Brings up the native runtime. Called exactly once before any other method.
    fn initialize(&mut self) -> AccelResult<()>;

    /// Allocate `size` bytes of device memory. `managed` requests host-mappable memory.
    ///
    /// `Ok(None)` means the device is out of memory and the caller may fall back
    /// to another allocator. `Err` is reserved for failures that must not be masked.
    fn allocate(&mut self, size: usize, managed: bool) -> AccelResult<Option<NonNull<u8>>>;

    /// Free memory previously returned by [`DeviceContext::allocate`].
    fn free(&mut self, ptr: NonNull<u8>) -> AccelResult<()>;

    /// Copy `size` bytes from host memory to device memory.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `size` bytes.
    unsafe fn copy_h2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()>;

    /// Copy `size` bytes from device memory to host memory.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `size` bytes.
    unsafe fn copy_d2h(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()>;

    /// Copy `size` bytes between two device addresses.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `size` bytes.
    unsafe fn copy_d2d(&mut self, dst: *mut u8, src: *const u8, size: usize) -> AccelResult<()>;

    /// Fill `size` bytes at `ptr` with `value`.
    ///
    /// # Safety
    /// `ptr` must be writable for `size` bytes.
    unsafe fn memset(&mut self, ptr: *mut u8, value: u8, size: usize) -> AccelResult<()>;

    /// Block until all previously issued work has completed.
    fn synchronize(&mut self) -> AccelResult<()>;

    /// Total device memory in bytes.
    fn total_memory(&self) -> AccelResult<usize>;

    /// Launch the compiled entry point `name` with the shared argument array.
    fn launch(
        &mut self,
        name: &str,
        args: &[*mut u8],
        grid_dim: u32,
        block_dim: u32,
    ) -> AccelResult<()>;
}
