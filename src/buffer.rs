//! Backing buffers.
use crate::error::Result;
use crate::memory::{AllocationCreateInfo, DeviceMemoryAllocator, MappedPtr, MemoryBlock};
use crate::resource::{BufferDescriptor, StorageMode};
use ash::vk;

/// Pool-compatibility descriptor for buffers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferAllocDesc {
    pub flags: vk::BufferCreateFlags,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub storage: StorageMode,
}

impl BufferAllocDesc {
    pub fn from_descriptor(
        desc: &BufferDescriptor,
        usage: vk::BufferUsageFlags,
        sharing_mode: vk::SharingMode,
    ) -> BufferAllocDesc {
        BufferAllocDesc {
            flags: vk::BufferCreateFlags::empty(),
            size: desc.length,
            usage,
            sharing_mode,
            storage: desc.storage_mode,
        }
    }

    /// Whether a deposited buffer described by `self` can serve `requested`.
    pub fn satisfies(&self, requested: &BufferAllocDesc) -> bool {
        self.flags == requested.flags
            && self.size >= requested.size
            && self.usage.contains(requested.usage)
            && self.sharing_mode == requested.sharing_mode
            && self.storage == requested.storage
    }
}

pub struct BackingBuffer {
    pub raw: vk::Buffer,
    pub memory: Option<MemoryBlock>,
    pub alloc_desc: BufferAllocDesc,
    /// Set when the host wrote through `buffer_contents` and the data still
    /// needs flushing or copying at first GPU use.
    pub host_written: bool,
    pub wait_semaphore: Option<vk::Semaphore>,
    pub initialized: bool,
}

impl BackingBuffer {
    pub fn create(
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        desc: &BufferAllocDesc,
    ) -> Result<BackingBuffer> {
        let create_info = vk::BufferCreateInfo {
            flags: desc.flags,
            size: desc.size,
            usage: desc.usage,
            sharing_mode: desc.sharing_mode,
            ..Default::default()
        };
        let raw = unsafe { device.create_buffer(&create_info, None)? };
        let reqs = unsafe { device.get_buffer_memory_requirements(raw) };
        let block = allocator.allocate(
            device,
            &AllocationCreateInfo {
                size: reqs.size,
                alignment: reqs.alignment,
                memory_type_bits: reqs.memory_type_bits,
                required_flags: desc.storage.memory_properties(),
                preferred_flags: vk::MemoryPropertyFlags::empty(),
            },
        )?;
        unsafe {
            device.bind_buffer_memory(raw, block.memory, block.offset)?;
        }
        debug!("created buffer {:?} ({} bytes)", raw, desc.size);

        Ok(BackingBuffer {
            raw,
            memory: Some(block),
            alloc_desc: *desc,
            host_written: false,
            wait_semaphore: None,
            initialized: false,
        })
    }

    /// Host pointer for host-visible buffers.
    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.memory.as_ref().and_then(|m| m.mapped)
    }

    /// Flushes a host-written range on non-coherent memory.
    pub fn flush_range(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        if let Some(m) = &self.memory {
            if m.non_coherent {
                let range = vk::MappedMemoryRange {
                    memory: m.memory,
                    offset: m.offset + offset,
                    size,
                    ..Default::default()
                };
                unsafe {
                    device.flush_mapped_memory_ranges(&[range])?;
                }
            }
        }
        Ok(())
    }

    pub fn destroy(mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        assert!(
            self.wait_semaphore.is_none(),
            "destroying a buffer with an outstanding wait semaphore"
        );
        unsafe {
            device.destroy_buffer(self.raw, None);
        }
        if let Some(block) = self.memory.take() {
            allocator.free(device, block);
        }
    }

    pub fn take_wait_semaphore(&mut self) -> Option<vk::Semaphore> {
        self.wait_semaphore.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BufferAllocDesc {
        BufferAllocDesc {
            flags: vk::BufferCreateFlags::empty(),
            size: 1024,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            storage: StorageMode::HostUncached,
        }
    }

    #[test]
    fn larger_buffers_satisfy_smaller_requests() {
        let requested = base();
        let mut deposited = base();
        deposited.size = 4096;
        deposited.usage |= vk::BufferUsageFlags::TRANSFER_DST;
        assert!(deposited.satisfies(&requested));
        assert!(!requested.satisfies(&deposited));
    }

    #[test]
    fn storage_domain_must_match() {
        let requested = base();
        let mut deposited = base();
        deposited.storage = StorageMode::DeviceLocal;
        assert!(!deposited.satisfies(&requested));
    }
}
