//! Device-memory blocks (`spec.md` §3 "Device-memory block").

use crate::driver::{DeviceMemoryHandle, GpuDriver};
use std::sync::Arc;

/// A contiguous region of GPU memory allocated from one memory-type
/// index. Owns its driver handle and frees it on drop.
pub struct DeviceMemoryBlock {
    driver: Arc<dyn GpuDriver>,
    handle: DeviceMemoryHandle,
    size: u64,
    memory_type_index: u32,
    host_visible: bool,
}

impl DeviceMemoryBlock {
    pub(crate) fn new(
        driver: Arc<dyn GpuDriver>,
        handle: DeviceMemoryHandle,
        size: u64,
        memory_type_index: u32,
        host_visible: bool,
    ) -> Self {
        Self {
            driver,
            handle,
            size,
            memory_type_index,
            host_visible,
        }
    }

    /// The driver handle backing this block.
    #[must_use]
    pub const fn handle(&self) -> DeviceMemoryHandle {
        self.handle
    }

    /// Size of the block in bytes, fixed at allocation.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The physical-device memory-type index this block was allocated
    /// from.
    #[must_use]
    pub const fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Whether this block is host-visible (and, conceptually, mapped).
    #[must_use]
    pub const fn is_host_visible(&self) -> bool {
        self.host_visible
    }
}

impl Drop for DeviceMemoryBlock {
    fn drop(&mut self) {
        self.driver.free_memory(self.handle);
    }
}
