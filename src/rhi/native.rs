use crate::error::{AccelError, AccelResult};
use crate::rhi::context::DeviceContext;
use std::ptr::NonNull;

/// Backend for a vendor chip reached through its native SDK.
///
/// No SDK is linked into this crate, so bring-up fails with `NotImplemented`
/// and a program targeting such a chip never runs against a missing driver.
#[derive(Debug, Clone)]
pub struct NativeDevice {
    chip: String,
}

impl NativeDevice {
    #[must_use]
    pub fn new<S: Into<String>>(chip: S) -> Self {
        Self { chip: chip.into() }
    }

    fn unwired(&self, op: &str) -> AccelError {
        AccelError::NotImplemented(format!(
            "{op} is not wired to a native runtime for chip '{}'",
            self.chip
        ))
    }
}

impl DeviceContext for NativeDevice {
    fn chip(&self) -> &str {
        &self.chip
    }

    fn initialize(&mut self) -> AccelResult<()> {
        Err(self.unwired("initialize"))
    }

    fn allocate(&mut self, _size: usize, _managed: bool) -> AccelResult<Option<NonNull<u8>>> {
        Err(self.unwired("allocate"))
    }

    fn free(&mut self, _ptr: NonNull<u8>) -> AccelResult<()> {
        Err(self.unwired("free"))
    }

    unsafe fn copy_h2d(&mut self, _dst: *mut u8, _src: *const u8, _size: usize) -> AccelResult<()> {
        Err(self.unwired("copy_h2d"))
    }

    unsafe fn copy_d2h(&mut self, _dst: *mut u8, _src: *const u8, _size: usize) -> AccelResult<()> {
        Err(self.unwired("copy_d2h"))
    }

    unsafe fn copy_d2d(&mut self, _dst: *mut u8, _src: *const u8, _size: usize) -> AccelResult<()> {
        Err(self.unwired("copy_d2d"))
    }

    unsafe fn memset(&mut self, _ptr: *mut u8, _value: u8, _size: usize) -> AccelResult<()> {
        Err(self.unwired("memset"))
    }

    fn synchronize(&mut self) -> AccelResult<()> {
        Err(self.unwired("synchronize"))
    }

    fn total_memory(&self) -> AccelResult<usize> {
        Err(self.unwired("total_memory"))
    }

    fn launch(
        &mut self,
        _name: &str,
        _args: &[*mut u8],
        _grid_dim: u32,
        _block_dim: u32,
    ) -> AccelResult<()> {
        Err(self.unwired("launch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bring_up_is_not_implemented() {
        let mut dev = NativeDevice::new("ascend910");
        let err = dev.initialize().unwrap_err();
        assert!(matches!(err, AccelError::NotImplemented(msg) if msg.contains("ascend910")));
    }
}
