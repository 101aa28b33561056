//! Software Device
//!
//! A CPU-backed [`DeviceMemory`] for hosts without an accelerator and for the
//! probe binary. Wrapped memory is used in place; device addresses are handed
//! out from a private counter and the frame buffer lives on the heap.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr::NonNull;

use tracing::{debug, trace};

use super::{ContextHandle, DeviceId, DeviceMemory, DisplayInfo, MemoryMapping};
use crate::config::SoftwareDeviceConfig;
use crate::error::DeviceFault;
use crate::types::PrivateHandle;

const BYTES_PER_PIXEL: u32 = 4;
/// Base of the fake device address space.
const HW_BASE: u32 = 0x1000_0000;

pub struct SoftwareDevice {
    width: u32,
    height: u32,
    contexts: RefCell<HashSet<u64>>,
    next_context: Cell<u64>,
    next_hw_address: Cell<u32>,
    frame_buffer: RefCell<Option<Box<[u8]>>>,
}

impl SoftwareDevice {
    pub fn new(config: &SoftwareDeviceConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            contexts: RefCell::new(HashSet::new()),
            next_context: Cell::new(1),
            next_hw_address: Cell::new(HW_BASE),
            frame_buffer: RefCell::new(None),
        }
    }

    fn check_context(&self, context: ContextHandle) -> Result<(), DeviceFault> {
        if self.contexts.borrow().contains(&context.0) {
            Ok(())
        } else {
            Err(DeviceFault::Context(format!("unknown context {}", context.0)))
        }
    }

    fn allocate_hw_address(&self, size: usize) -> u32 {
        let address = self.next_hw_address.get();
        let pages = size.div_ceil(4096) as u32;
        self.next_hw_address
            .set(address.wrapping_add(pages.max(1) * 4096));
        address
    }
}

impl DeviceMemory for SoftwareDevice {
    fn enumerate_devices(&self) -> Result<Vec<DeviceId>, DeviceFault> {
        Ok(vec![DeviceId(0)])
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextHandle, DeviceFault> {
        if device != DeviceId(0) {
            return Err(DeviceFault::NoDevice);
        }
        let id = self.next_context.get();
        self.next_context.set(id + 1);
        self.contexts.borrow_mut().insert(id);
        debug!("Software device context {} created", id);
        Ok(ContextHandle(id))
    }

    fn destroy_context(&self, context: ContextHandle) {
        if self.contexts.borrow_mut().remove(&context.0) {
            debug!("Software device context {} destroyed", context.0);
        }
        if self.contexts.borrow().is_empty() {
            self.frame_buffer.borrow_mut().take();
        }
    }

    fn display_info(&self, context: ContextHandle) -> Result<DisplayInfo, DeviceFault> {
        self.check_context(context)?;
        Ok(DisplayInfo {
            width: self.width,
            height: self.height,
            stride: self.width * BYTES_PER_PIXEL,
            max_flip_chains: 0,
        })
    }

    fn wrap(
        &self,
        context: ContextHandle,
        base: NonNull<u8>,
        contiguous: bool,
        size: usize,
    ) -> Result<MemoryMapping, DeviceFault> {
        self.check_context(context)?;
        if size == 0 {
            return Err(DeviceFault::Memory("cannot wrap an empty region".into()));
        }

        let hw_address = self.allocate_hw_address(size);
        trace!(
            "Wrapped {} bytes at {:p} (contiguous: {}) -> {:#x}",
            size,
            base.as_ptr(),
            contiguous,
            hw_address
        );

        Ok(MemoryMapping {
            linear_address: base,
            hw_address,
            private: PrivateHandle(u64::from(hw_address)),
            size,
        })
    }

    fn free(&self, _context: ContextHandle, mapping: MemoryMapping) {
        // Blits run synchronously on the CPU, nothing to wait for.
        trace!("Unwrapped mapping {:#x}", mapping.hw_address);
    }

    fn frame_buffer(&self, context: ContextHandle, index: u32) -> Result<MemoryMapping, DeviceFault> {
        self.check_context(context)?;
        if index != 0 {
            return Err(DeviceFault::Memory(format!("no frame buffer {index}")));
        }

        let size = (self.width * self.height * BYTES_PER_PIXEL) as usize;
        let mut frame_buffer = self.frame_buffer.borrow_mut();
        let memory = frame_buffer.get_or_insert_with(|| vec![0u8; size].into_boxed_slice());
        let linear_address = NonNull::new(memory.as_mut_ptr())
            .ok_or_else(|| DeviceFault::Memory("empty frame buffer".into()))?;

        Ok(MemoryMapping {
            linear_address,
            hw_address: HW_BASE - size as u32,
            private: PrivateHandle(0),
            size,
        })
    }
}
