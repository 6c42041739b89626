//! Interface to the external device-memory sub-allocator.
//!
//! The backend never calls `vkAllocateMemory` directly for resources: it asks
//! an implementation of [`DeviceMemoryAllocator`] for blocks. The default
//! [`PassthroughAllocator`] maps every request to a dedicated allocation,
//! which is enough for tests and small scenes; production embeds a pooling
//! allocator behind the same trait.
use crate::error::{BackendError, Result};
use ash::vk;
use std::sync::Mutex;

/// A host pointer that may be shared with the GPU mapping. The planner thread
/// is the only writer while a frame is being encoded.
#[derive(Copy, Clone, Debug)]
pub struct MappedPtr(pub *mut u8);

unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

#[derive(Copy, Clone, Debug)]
pub struct AllocationCreateInfo {
    pub size: u64,
    pub alignment: u64,
    /// Memory type mask from `vkGet*MemoryRequirements`.
    pub memory_type_bits: u32,
    pub required_flags: vk::MemoryPropertyFlags,
    pub preferred_flags: vk::MemoryPropertyFlags,
}

/// A block of device memory handed out by the allocator.
#[derive(Copy, Clone, Debug)]
pub struct MemoryBlock {
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
    /// Persistent mapping for host-visible blocks.
    pub mapped: Option<MappedPtr>,
    /// True when the backing memory requires explicit flushes.
    pub non_coherent: bool,
}

/// Pool-based device memory provider. Implementations are internally
/// synchronized: blocks are allocated from the planner thread and released
/// from the completion thread.
pub trait DeviceMemoryAllocator: Send + Sync {
    fn allocate(&self, device: &ash::Device, info: &AllocationCreateInfo) -> Result<MemoryBlock>;
    fn free(&self, device: &ash::Device, block: MemoryBlock);
}

//--------------------------------------------------------------------------------------------------

/// One `vkAllocateMemory` per request. Host-visible blocks are persistently
/// mapped on allocation.
pub struct PassthroughAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    allocated: Mutex<u64>,
}

impl PassthroughAllocator {
    pub fn new(memory_properties: vk::PhysicalDeviceMemoryProperties) -> PassthroughAllocator {
        PassthroughAllocator {
            memory_properties,
            allocated: Mutex::new(0),
        }
    }

    pub fn bytes_allocated(&self) -> u64 {
        *self.allocated.lock().unwrap()
    }

    fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<(u32, vk::MemoryPropertyFlags)> {
        for i in 0..self.memory_properties.memory_type_count {
            let t = self.memory_properties.memory_types[i as usize];
            if type_bits & (1 << i) != 0 && t.property_flags.contains(flags) {
                return Some((i, t.property_flags));
            }
        }
        None
    }
}

impl DeviceMemoryAllocator for PassthroughAllocator {
    fn allocate(&self, device: &ash::Device, info: &AllocationCreateInfo) -> Result<MemoryBlock> {
        // try preferred flags first, fall back to the required set
        let (index, flags) = self
            .find_memory_type(
                info.memory_type_bits,
                info.required_flags | info.preferred_flags,
            )
            .or_else(|| self.find_memory_type(info.memory_type_bits, info.required_flags))
            .ok_or(BackendError::OutOfMemory)?;

        let alloc_info = vk::MemoryAllocateInfo {
            allocation_size: info.size,
            memory_type_index: index,
            ..Default::default()
        };
        let memory = unsafe { device.allocate_memory(&alloc_info, None)? };

        let host_visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let mapped = if host_visible {
            let p = unsafe {
                device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
            };
            Some(MappedPtr(p as *mut u8))
        } else {
            None
        };

        *self.allocated.lock().unwrap() += info.size;
        trace!(
            "allocated {} bytes from memory type {} (host visible: {})",
            info.size,
            index,
            host_visible
        );

        Ok(MemoryBlock {
            memory,
            offset: 0,
            size: info.size,
            mapped,
            non_coherent: host_visible
                && !flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
        })
    }

    fn free(&self, device: &ash::Device, block: MemoryBlock) {
        unsafe {
            // dedicated allocations: unmapping happens implicitly on free
            device.free_memory(block.memory, None);
        }
        *self.allocated.lock().unwrap() -= block.size;
    }
}
