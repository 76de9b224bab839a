//! The GPU driver boundary.
//!
//! `spec.md` §1 explicitly scopes the Vulkan driver itself out of this
//! crate: "all driver calls are modeled as an opaque GPU runtime." This
//! module is that opaque runtime. Every other module in the crate talks
//! to the GPU only through the [`GpuDriver`] trait and the handle types
//! below, never through a concrete Vulkan binding directly. A real
//! implementation (backed by `ash`) is left to a host application; the
//! [`fake`] submodule supplies a deterministic double used by this
//! crate's own tests.
//!
//! The handle/enum *vocabulary* is still `ash::vk` - there is no reason
//! to invent parallel types for `ImageLayout` or `PipelineStageFlags`
//! when the ecosystem's own are the realistic, idiomatic choice.

use ash::vk;
use thiserror::Error;

/// Opaque handle to a device-memory allocation made by the driver.
pub type DeviceMemoryHandle = vk::DeviceMemory;
/// Opaque handle to a driver-side buffer object.
pub type BufferHandle = vk::Buffer;
/// Opaque handle to a driver-side image object.
pub type ImageHandle = vk::Image;
/// Opaque handle to a command pool.
pub type CommandPoolHandle = vk::CommandPool;
/// Opaque handle to a command buffer.
pub type CommandBufferHandle = vk::CommandBuffer;
/// Opaque handle to a fence.
pub type FenceHandle = vk::Fence;
/// Opaque handle to a semaphore.
pub type SemaphoreHandle = vk::Semaphore;
/// Opaque handle to a queue.
pub type QueueHandle = vk::Queue;

/// Errors the opaque driver can surface. Mirrors `spec.md` §7's
/// "driver-failure" and "out-of-memory" kinds; everything else in that
/// table is a core-side policy, not a driver error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The driver rejected a resource-creation or submission request.
    #[error("driver rejected the request")]
    Rejected,
    /// The driver could not satisfy a memory allocation.
    #[error("driver is out of device memory")]
    OutOfDeviceMemory,
}

/// A request to allocate a block of device memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBlockRequest {
    /// Size in bytes of the block to allocate.
    pub size: u64,
    /// Index into the physical device's memory-type table.
    pub memory_type_index: u32,
    /// Whether the memory type is host-visible and should be mapped.
    pub host_visible: bool,
}

/// The minimal set of operations the core subsystems need from a GPU
/// driver. Every method here corresponds to an operation `spec.md`
/// treats as an external collaborator call: memory allocation, object
/// creation/destruction, and queue submission.
pub trait GpuDriver: Send + Sync {
    /// Allocate a block of device memory. Returns the handle and, for
    /// host-visible memory, a mapped pointer represented as a stable
    /// opaque token (this crate never dereferences it; a real backend
    /// would return a genuine pointer here).
    fn allocate_memory(
        &self,
        request: MemoryBlockRequest,
    ) -> Result<DeviceMemoryHandle, DriverError>;

    /// Free a block of device memory previously returned by
    /// `allocate_memory`.
    fn free_memory(&self, memory: DeviceMemoryHandle);

    /// Copy `data` into host-visible memory previously returned by
    /// `allocate_memory`, at `offset`. The workspace forbids `unsafe`
    /// code, so this crate never maps memory itself; a real backend
    /// maps once and writes through the mapped pointer underneath this
    /// call.
    fn write_mapped(&self, memory: DeviceMemoryHandle, offset: u64, data: &[u8]);

    /// Create a fence, optionally pre-signaled.
    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, DriverError>;
    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);
    /// Report whether a fence is currently signaled.
    fn is_fence_signaled(&self, fence: FenceHandle) -> bool;
    /// Reset a fence to the unsignaled state.
    fn reset_fence(&self, fence: FenceHandle);
    /// Block the calling thread until `fence` signals or `timeout_ns`
    /// elapses. Returns `true` if the fence signaled.
    fn wait_fence(&self, fence: FenceHandle, timeout_ns: u64) -> bool;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<SemaphoreHandle, DriverError>;
    /// Destroy a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Create a command pool for the given queue family.
    fn create_command_pool(&self, queue_family: u32) -> Result<CommandPoolHandle, DriverError>;
    /// Reset a command pool, invalidating all command buffers allocated
    /// from it.
    fn reset_command_pool(&self, pool: CommandPoolHandle);
    /// Destroy a command pool.
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    /// Allocate one primary command buffer from a pool.
    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, DriverError>;

    /// Submit a record of command buffers to a queue, signaling the
    /// given fence (if any) on completion. The submission itself is
    /// fire-and-forget from the driver's point of view; ordering and
    /// synchronization are the submitter's responsibility, per
    /// `spec.md` §3's submission-record invariant.
    fn submit(
        &self,
        queue: QueueHandle,
        command_buffers: &[CommandBufferHandle],
        wait: &[SemaphoreHandle],
        signal: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) -> Result<(), DriverError>;
}

/// A deterministic, in-memory [`GpuDriver`] used by this crate's tests.
/// No real allocation happens; handles are distinct opaque integers and
/// fences are signaled explicitly by the test via
/// [`fake::FakeDriver::signal`] rather than by actual GPU completion.
pub mod fake {
    use super::{
        BufferHandle, CommandBufferHandle, CommandPoolHandle, DeviceMemoryHandle, DriverError,
        FenceHandle, GpuDriver, MemoryBlockRequest, QueueHandle, SemaphoreHandle,
    };
    use ash::vk::{self, Handle};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A fake driver that hands out monotonically increasing handles and
    /// tracks fence signal state in-process.
    #[derive(Default)]
    pub struct FakeDriver {
        next_handle: AtomicU64,
        signaled: Mutex<std::collections::HashSet<u64>>,
        fail_next_allocation: std::sync::atomic::AtomicBool,
        /// Simulated memory contents, keyed by `(handle, offset)`. Lets
        /// tests assert that `write_mapped` actually happened.
        memory_contents: Mutex<std::collections::HashMap<u64, Vec<u8>>>,
    }

    impl FakeDriver {
        /// Create a new fake driver.
        pub fn new() -> Self {
            Self::default()
        }

        fn next(&self) -> u64 {
            self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
        }

        /// Mark a fence as signaled, as if the GPU had completed the
        /// work guarding it.
        pub fn signal(&self, fence: FenceHandle) {
            self.signaled.lock().unwrap().insert(fence.as_raw());
        }

        /// Force the next `allocate_memory` call to fail with
        /// `OutOfDeviceMemory`, to exercise the allocator's failure path.
        pub fn fail_next_allocation(&self) {
            self.fail_next_allocation.store(true, Ordering::SeqCst);
        }

        /// Read back what `write_mapped` has stored for `memory`, for
        /// test assertions.
        pub fn read_memory(&self, memory: DeviceMemoryHandle) -> Vec<u8> {
            self.memory_contents
                .lock()
                .unwrap()
                .get(&memory.as_raw())
                .cloned()
                .unwrap_or_default()
        }
    }

    impl GpuDriver for FakeDriver {
        fn allocate_memory(
            &self,
            _request: MemoryBlockRequest,
        ) -> Result<DeviceMemoryHandle, DriverError> {
            if self
                .fail_next_allocation
                .swap(false, Ordering::SeqCst)
            {
                return Err(DriverError::OutOfDeviceMemory);
            }
            Ok(vk::DeviceMemory::from_raw(self.next()))
        }

        fn free_memory(&self, memory: DeviceMemoryHandle) {
            self.memory_contents.lock().unwrap().remove(&memory.as_raw());
        }

        fn write_mapped(&self, memory: DeviceMemoryHandle, offset: u64, data: &[u8]) {
            let mut contents = self.memory_contents.lock().unwrap();
            let buffer = contents.entry(memory.as_raw()).or_default();
            let end = offset as usize + data.len();
            if buffer.len() < end {
                buffer.resize(end, 0);
            }
            buffer[offset as usize..end].copy_from_slice(data);
        }

        fn create_fence(&self, signaled: bool) -> Result<FenceHandle, DriverError> {
            let fence = vk::Fence::from_raw(self.next());
            if signaled {
                self.signal(fence);
            }
            Ok(fence)
        }

        fn destroy_fence(&self, fence: FenceHandle) {
            self.signaled.lock().unwrap().remove(&fence.as_raw());
        }

        fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
            self.signaled.lock().unwrap().contains(&fence.as_raw())
        }

        fn reset_fence(&self, fence: FenceHandle) {
            self.signaled.lock().unwrap().remove(&fence.as_raw());
        }

        fn wait_fence(&self, fence: FenceHandle, _timeout_ns: u64) -> bool {
            self.is_fence_signaled(fence)
        }

        fn create_semaphore(&self) -> Result<SemaphoreHandle, DriverError> {
            Ok(vk::Semaphore::from_raw(self.next()))
        }

        fn destroy_semaphore(&self, _semaphore: SemaphoreHandle) {}

        fn create_command_pool(&self, _queue_family: u32) -> Result<CommandPoolHandle, DriverError> {
            Ok(vk::CommandPool::from_raw(self.next()))
        }

        fn reset_command_pool(&self, _pool: CommandPoolHandle) {}

        fn destroy_command_pool(&self, _pool: CommandPoolHandle) {}

        fn allocate_command_buffer(
            &self,
            _pool: CommandPoolHandle,
        ) -> Result<CommandBufferHandle, DriverError> {
            Ok(vk::CommandBuffer::from_raw(self.next()))
        }

        fn submit(
            &self,
            _queue: QueueHandle,
            _command_buffers: &[CommandBufferHandle],
            _wait: &[SemaphoreHandle],
            _signal: &[SemaphoreHandle],
            fence: Option<FenceHandle>,
        ) -> Result<(), DriverError> {
            if let Some(fence) = fence {
                self.signal(fence);
            }
            Ok(())
        }
    }

    /// A fake buffer/image handle allocator, used only so tests can
    /// manufacture distinct `BufferHandle`/`ImageHandle` values without
    /// going through a real driver.
    pub fn next_buffer_handle(counter: &AtomicU64) -> BufferHandle {
        vk::Buffer::from_raw(counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn write_mapped_is_observable_via_read_memory() {
            let driver = FakeDriver::new();
            let memory = driver
                .allocate_memory(MemoryBlockRequest {
                    size: 64,
                    memory_type_index: 0,
                    host_visible: true,
                })
                .unwrap();
            driver.write_mapped(memory, 4, &[1, 2, 3]);
            assert_eq!(driver.read_memory(memory)[4..7], [1, 2, 3]);
        }
    }
}
