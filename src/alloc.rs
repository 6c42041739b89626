//! Transient resource recycling.
//!
//! Images and buffers returned at frame cycle are kept in per-domain pools
//! and handed back out to later frames when a request's descriptor fits.
//! Deposited objects age once per frame cycle and are destroyed when they
//! outlive the pool's configured age.
use crate::buffer::{BackingBuffer, BufferAllocDesc};
use crate::error::Result;
use crate::image::{BackingImage, ImageAllocDesc};
use crate::memory::DeviceMemoryAllocator;
use crate::resource::StorageMode;
use ash::vk;

//--------------------------------------------------------------------------------------------------

pub struct PoolAllocator {
    max_age: u32,
    images: Vec<(BackingImage, u32)>,
    buffers: Vec<(BackingBuffer, u32)>,
}

impl PoolAllocator {
    pub fn new(max_age: u32) -> PoolAllocator {
        PoolAllocator {
            max_age,
            images: Vec::new(),
            buffers: Vec::new(),
        }
    }

    fn find_image(&self, desc: &ImageAllocDesc) -> Option<usize> {
        self.images
            .iter()
            .position(|(img, _)| img.alloc_desc.satisfies(desc))
    }

    fn find_buffer(&self, desc: &BufferAllocDesc) -> Option<usize> {
        self.buffers
            .iter()
            .position(|(buf, _)| buf.alloc_desc.satisfies(desc))
    }

    /// Takes a compatible deposited image, or creates a new one.
    pub fn collect_image(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        desc: &ImageAllocDesc,
    ) -> Result<BackingImage> {
        if let Some(pos) = self.find_image(desc) {
            let (img, _) = self.images.swap_remove(pos);
            trace!("recycled image {:?}", img.raw);
            return Ok(img);
        }
        BackingImage::create(device, allocator, desc)
    }

    pub fn collect_buffer(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        desc: &BufferAllocDesc,
    ) -> Result<BackingBuffer> {
        if let Some(pos) = self.find_buffer(desc) {
            let (buf, _) = self.buffers.swap_remove(pos);
            trace!("recycled buffer {:?}", buf.raw);
            return Ok(buf);
        }
        BackingBuffer::create(device, allocator, desc)
    }

    /// Returns an object to the pool; its age restarts.
    pub fn deposit_image(&mut self, image: BackingImage) {
        self.images.push((image, 0));
    }

    pub fn deposit_buffer(&mut self, buffer: BackingBuffer) {
        self.buffers.push((buffer, 0));
    }

    /// Ages every deposited object and destroys the ones past `max_age`.
    pub fn cycle(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        let max_age = self.max_age;
        let mut expired_images = Vec::new();
        let mut i = 0;
        while i < self.images.len() {
            self.images[i].1 += 1;
            if self.images[i].1 > max_age {
                expired_images.push(self.images.swap_remove(i).0);
            } else {
                i += 1;
            }
        }
        let mut expired_buffers = Vec::new();
        let mut i = 0;
        while i < self.buffers.len() {
            self.buffers[i].1 += 1;
            if self.buffers[i].1 > max_age {
                expired_buffers.push(self.buffers.swap_remove(i).0);
            } else {
                i += 1;
            }
        }
        if !expired_images.is_empty() || !expired_buffers.is_empty() {
            debug!(
                "pool cycle: destroying {} images, {} buffers",
                expired_images.len(),
                expired_buffers.len()
            );
        }
        for img in expired_images {
            img.destroy(device, allocator);
        }
        for buf in expired_buffers {
            buf.destroy(device, allocator);
        }
    }

    pub fn deposited_count(&self) -> usize {
        self.images.len() + self.buffers.len()
    }

    pub fn destroy_all(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        for (img, _) in self.images.drain(..) {
            img.destroy(device, allocator);
        }
        for (buf, _) in self.buffers.drain(..) {
            buf.destroy(device, allocator);
        }
    }
}

/// The registry's pools, one per memory domain. Host pools keep objects
/// alive for the whole in-flight window; device pools recycle aggressively.
pub struct HeapPools {
    pub upload: PoolAllocator,
    pub readback: PoolAllocator,
    pub private: PoolAllocator,
}

impl HeapPools {
    pub fn new(inflight_frames: u32) -> HeapPools {
        HeapPools {
            upload: PoolAllocator::new(inflight_frames),
            readback: PoolAllocator::new(inflight_frames),
            private: PoolAllocator::new(1),
        }
    }

    pub fn pool_for(&mut self, storage: StorageMode) -> &mut PoolAllocator {
        match storage {
            StorageMode::HostUncached => &mut self.upload,
            StorageMode::HostCached => &mut self.readback,
            StorageMode::DeviceLocal => &mut self.private,
        }
    }

    pub fn cycle(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        self.upload.cycle(device, allocator);
        self.readback.cycle(device, allocator);
        self.private.cycle(device, allocator);
    }

    pub fn destroy_all(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        self.upload.destroy_all(device, allocator);
        self.readback.destroy_all(device, allocator);
        self.private.destroy_all(device, allocator);
    }
}

//--------------------------------------------------------------------------------------------------
// Temporary upload staging

fn align_up(v: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (v + align - 1) & !(align - 1)
}

struct StagingBlock {
    buffer: BackingBuffer,
    cursor: u64,
}

/// A slice of host-visible staging memory, valid for the current frame.
#[derive(Copy, Clone, Debug)]
pub struct StagingSlice {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub ptr: *mut u8,
}

/// Short-lived upload staging carved sub-linearly from a few large
/// host-visible blocks. Offsets reset at frame cycle; block memory is reused.
pub struct TemporaryAllocator {
    block_size: u64,
    blocks: Vec<StagingBlock>,
}

impl TemporaryAllocator {
    pub fn new(block_size: u64) -> TemporaryAllocator {
        TemporaryAllocator {
            block_size,
            blocks: Vec::new(),
        }
    }

    pub fn allocate(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        size: u64,
        align: u64,
    ) -> Result<StagingSlice> {
        assert!(size <= self.block_size, "staging request exceeds block size");
        let pos = self.blocks.iter().position(|b| {
            align_up(b.cursor, align) + size <= b.buffer.alloc_desc.size
        });
        let pos = match pos {
            Some(p) => p,
            None => {
                let desc = BufferAllocDesc {
                    flags: vk::BufferCreateFlags::empty(),
                    size: self.block_size,
                    usage: vk::BufferUsageFlags::TRANSFER_SRC,
                    sharing_mode: vk::SharingMode::EXCLUSIVE,
                    storage: StorageMode::HostUncached,
                };
                let buffer = BackingBuffer::create(device, allocator, &desc)?;
                debug!("new staging block ({} bytes)", self.block_size);
                self.blocks.push(StagingBlock { buffer, cursor: 0 });
                self.blocks.len() - 1
            }
        };
        let block = &mut self.blocks[pos];
        let offset = align_up(block.cursor, align);
        block.cursor = offset + size;
        let base = block
            .buffer
            .mapped_ptr()
            .expect("staging block is not host visible");
        Ok(StagingSlice {
            buffer: block.buffer.raw,
            offset,
            ptr: unsafe { base.0.add(offset as usize) },
        })
    }

    /// Rewinds all blocks. Contents become garbage; callers must not hold
    /// slices across a cycle.
    pub fn cycle(&mut self) {
        for b in &mut self.blocks {
            b.cursor = 0;
        }
    }

    pub fn destroy_all(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        for b in self.blocks.drain(..) {
            b.buffer.destroy(device, allocator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_behaves() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 4), 260);
    }

    #[test]
    fn pool_scan_prefers_fitting_entry() {
        use crate::format::PixelFormat;
        use crate::resource::{Persistence, TextureDescriptor, TextureUsage};

        let td = TextureDescriptor {
            format: PixelFormat::Rgba8Unorm,
            width: 64,
            height: 64,
            depth: 1,
            mip_count: 1,
            array_length: 1,
            sample_count: 1,
            storage_mode: StorageMode::DeviceLocal,
            usage: TextureUsage::SAMPLED,
            persistence: Persistence::PerFrame,
        };
        let desc = ImageAllocDesc::from_descriptor(
            &td,
            td.usage.to_vk(),
            vk::SharingMode::EXCLUSIVE,
            vk::ImageLayout::UNDEFINED,
        );
        let mut other = desc;
        other.extent.width = 32;

        let mut pool = PoolAllocator::new(2);
        pool.deposit_image(BackingImage::dummy(other));
        assert!(pool.find_image(&desc).is_none());
        pool.deposit_image(BackingImage::dummy(desc));
        assert_eq!(pool.find_image(&desc), Some(1));
        assert_eq!(pool.deposited_count(), 2);
    }
}
