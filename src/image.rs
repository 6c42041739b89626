//! Backing images: Vulkan image + memory + layout tracking + view cache.
use crate::error::Result;
use crate::memory::{AllocationCreateInfo, DeviceMemoryAllocator, MemoryBlock};
use crate::resource::{StorageMode, TextureDescriptor};
use crate::swapchain::SwapchainContext;
use ash::vk;
use fxhash::FxHashMap;
use std::sync::Arc;

/// Everything that determines whether a pooled image can be recycled for a
/// new request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageAllocDesc {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub initial_layout: vk::ImageLayout,
    pub storage: StorageMode,
}

impl ImageAllocDesc {
    pub fn from_descriptor(
        desc: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
        sharing_mode: vk::SharingMode,
        initial_layout: vk::ImageLayout,
    ) -> ImageAllocDesc {
        ImageAllocDesc {
            flags: vk::ImageCreateFlags::empty(),
            image_type: if desc.depth > 1 {
                vk::ImageType::TYPE_3D
            } else if desc.height > 1 {
                vk::ImageType::TYPE_2D
            } else {
                vk::ImageType::TYPE_1D
            },
            format: desc.format.to_vk(),
            extent: desc.extent(),
            mip_levels: desc.mip_count,
            array_layers: desc.array_length,
            samples: vk::SampleCountFlags::from_raw(desc.sample_count),
            tiling: if desc.storage_mode.is_host_visible() {
                vk::ImageTiling::LINEAR
            } else {
                vk::ImageTiling::OPTIMAL
            },
            usage,
            sharing_mode,
            initial_layout,
            storage: desc.storage_mode,
        }
    }

    /// Whether a deposited image described by `self` can stand in for a
    /// `requested` image: same shape, at least the requested usage.
    pub fn satisfies(&self, requested: &ImageAllocDesc) -> bool {
        self.flags == requested.flags
            && self.image_type == requested.image_type
            && self.format == requested.format
            && self.extent == requested.extent
            && self.mip_levels == requested.mip_levels
            && self.array_layers == requested.array_layers
            && self.samples == requested.samples
            && self.tiling == requested.tiling
            && self.usage.contains(requested.usage)
            && self.sharing_mode == requested.sharing_mode
            && self.storage == requested.storage
    }
}

/// Key into a backing image's view cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageViewKey {
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub format: vk::Format,
}

pub struct BackingImage {
    pub raw: vk::Image,
    pub memory: Option<MemoryBlock>,
    pub alloc_desc: ImageAllocDesc,
    /// The layout the GPU observes on next use. Updated together with every
    /// layout-changing emission.
    pub layout: vk::ImageLayout,
    /// Set for window textures; such images are returned to the swapchain,
    /// never to the allocator.
    pub swapchain: Option<Arc<SwapchainContext>>,
    pub swapchain_index: u32,
    /// At most one pending-wait token, taken exclusively by the next
    /// submission using this image.
    pub wait_semaphore: Option<vk::Semaphore>,
    pub initialized: bool,
    views: FxHashMap<ImageViewKey, vk::ImageView>,
}

impl BackingImage {
    /// Creates and binds a fresh image through the memory allocator.
    pub fn create(
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        desc: &ImageAllocDesc,
    ) -> Result<BackingImage> {
        let create_info = vk::ImageCreateInfo {
            flags: desc.flags,
            image_type: desc.image_type,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            samples: desc.samples,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: desc.sharing_mode,
            initial_layout: desc.initial_layout,
            ..Default::default()
        };
        let raw = unsafe { device.create_image(&create_info, None)? };
        let reqs = unsafe { device.get_image_memory_requirements(raw) };
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
            device.bind_image_memory(raw, block.memory, block.offset)?;
        }
        debug!("created image {:?} ({:?})", raw, desc.format);

        Ok(BackingImage {
            raw,
            memory: Some(block),
            alloc_desc: *desc,
            layout: desc.initial_layout,
            swapchain: None,
            swapchain_index: 0,
            wait_semaphore: None,
            initialized: false,
            views: FxHashMap::default(),
        })
    }

    /// Wraps a swapchain image. The swapchain retains ownership.
    pub fn from_swapchain(
        swapchain: Arc<SwapchainContext>,
        index: u32,
        raw: vk::Image,
        desc: ImageAllocDesc,
        acquire_semaphore: Option<vk::Semaphore>,
    ) -> BackingImage {
        BackingImage {
            raw,
            memory: None,
            alloc_desc: desc,
            layout: vk::ImageLayout::UNDEFINED,
            swapchain: Some(swapchain),
            swapchain_index: index,
            wait_semaphore: acquire_semaphore,
            initialized: false,
            views: FxHashMap::default(),
        }
    }

    pub fn is_window_texture(&self) -> bool {
        self.swapchain.is_some()
    }

    /// Fetches (or lazily creates) an image view.
    pub fn view(&mut self, device: &ash::Device, key: ImageViewKey) -> Result<vk::ImageView> {
        if let Some(&view) = self.views.get(&key) {
            return Ok(view);
        }
        let info = vk::ImageViewCreateInfo {
            image: self.raw,
            view_type: match self.alloc_desc.image_type {
                vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
                vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
                _ if key.layer_count > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
                _ => vk::ImageViewType::TYPE_2D,
            },
            format: key.format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: key.aspect,
                base_mip_level: key.base_mip,
                level_count: key.mip_count,
                base_array_layer: key.base_layer,
                layer_count: key.layer_count,
            },
            ..Default::default()
        };
        let view = unsafe { device.create_image_view(&info, None)? };
        self.views.insert(key, view);
        Ok(view)
    }

    /// Destroys the image, its views and its memory. Window textures only
    /// drop their views; the image itself goes back to the swapchain.
    pub fn destroy(mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        assert!(
            self.wait_semaphore.is_none(),
            "destroying an image with an outstanding wait semaphore"
        );
        unsafe {
            for (_, view) in self.views.drain() {
                device.destroy_image_view(view, None);
            }
            if self.swapchain.is_none() {
                device.destroy_image(self.raw, None);
                if let Some(block) = self.memory.take() {
                    allocator.free(device, block);
                }
            }
        }
    }

    /// Takes the pending wait semaphore, if any; the caller must add it to
    /// the next submission's wait list.
    pub fn take_wait_semaphore(&mut self) -> Option<vk::Semaphore> {
        self.wait_semaphore.take()
    }

    /// A handle-less image for pool bookkeeping tests.
    #[cfg(test)]
    pub(crate) fn dummy(alloc_desc: ImageAllocDesc) -> BackingImage {
        BackingImage {
            raw: vk::Image::null(),
            memory: None,
            alloc_desc,
            layout: vk::ImageLayout::UNDEFINED,
            swapchain: None,
            swapchain_index: 0,
            wait_semaphore: None,
            initialized: false,
            views: FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;
    use crate::resource::{Persistence, TextureUsage};

    fn desc() -> ImageAllocDesc {
        let td = TextureDescriptor {
            format: PixelFormat::Rgba8Unorm,
            width: 256,
            height: 256,
            depth: 1,
            mip_count: 1,
            array_length: 1,
            sample_count: 1,
            storage_mode: StorageMode::DeviceLocal,
            usage: TextureUsage::SAMPLED | TextureUsage::COLOR_ATTACHMENT,
            persistence: Persistence::PerFrame,
        };
        ImageAllocDesc::from_descriptor(
            &td,
            td.usage.to_vk(),
            vk::SharingMode::EXCLUSIVE,
            vk::ImageLayout::UNDEFINED,
        )
    }

    #[test]
    fn fit_check_requires_usage_superset() {
        let requested = desc();
        let mut deposited = requested;
        deposited.usage |= vk::ImageUsageFlags::TRANSFER_DST;
        assert!(deposited.satisfies(&requested));
        assert!(!requested.satisfies(&deposited));
    }

    #[test]
    fn fit_check_rejects_shape_mismatch() {
        let requested = desc();
        let mut other = requested;
        other.extent.width = 128;
        assert!(!other.satisfies(&requested));
        let mut other = requested;
        other.format = vk::Format::B8G8R8A8_UNORM;
        assert!(!other.satisfies(&requested));
    }
}
