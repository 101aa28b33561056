//! Device Memory
//!
//! Interface to the GPU memory service: device contexts, wrapping attached
//! memory into device-visible mappings, and the frame buffer.

pub mod shm;
pub mod software;

use std::ptr::NonNull;

use crate::error::DeviceFault;
use crate::types::PrivateHandle;

/// Device id as enumerated by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Opaque device context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Primary display surface as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub max_flip_chains: u32,
}

/// A device-visible memory mapping.
///
/// Not `Clone`: a mapping has exactly one owner and is handed back to
/// [`DeviceMemory::free`] by value.
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryMapping {
    pub linear_address: NonNull<u8>,
    pub hw_address: u32,
    pub private: PrivateHandle,
    pub size: usize,
}

/// The GPU memory service.
pub trait DeviceMemory {
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>, DeviceFault>;

    fn create_context(&self, device: DeviceId) -> Result<ContextHandle, DeviceFault>;

    fn destroy_context(&self, context: ContextHandle);

    fn display_info(&self, context: ContextHandle) -> Result<DisplayInfo, DeviceFault>;

    /// Import `size` bytes at `base` into the device address space.
    /// `contiguous` is set when the region lies within a single page.
    fn wrap(
        &self,
        context: ContextHandle,
        base: NonNull<u8>,
        contiguous: bool,
        size: usize,
    ) -> Result<MemoryMapping, DeviceFault>;

    /// Wait for outstanding blits on `mapping`, then unwrap it.
    fn free(&self, context: ContextHandle, mapping: MemoryMapping);

    /// Mapping of the frame buffer at `index`. Owned by the device; callers
    /// never pass it to [`free`](Self::free).
    fn frame_buffer(&self, context: ContextHandle, index: u32) -> Result<MemoryMapping, DeviceFault>;
}
