//! The resource registry: abstract handles to backing Vulkan objects.
//!
//! All mutating operations run on the planner thread; the backend wraps the
//! registry in a mutex only for the post-submission `backing_resource`
//! accessor. The registry owns every backing object except swapchain images,
//! which belong to their swapchain and are merely borrowed for the frame.
use crate::alloc::{HeapPools, TemporaryAllocator};
use crate::buffer::{BackingBuffer, BufferAllocDesc};
use crate::error::{BackendError, Result};
use crate::format::PixelFormat;
use crate::image::{BackingImage, ImageAllocDesc};
use crate::memory::DeviceMemoryAllocator;
use crate::reflection::PipelineReflection;
use crate::render_target::AttachmentState;
use crate::resource::*;
use crate::sampler::SamplerCache;
use ash::vk;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::ops::Range;
use std::sync::Arc;

/// A host-side staging region for a buffer that has no backing object yet.
struct StagingRegion {
    data: Box<[u8]>,
    /// Byte range the host wrote and that must reach the GPU object.
    dirty: Option<Range<u64>>,
}

/// A pending region upload scheduled by `replace_texture_region`.
pub struct PendingTextureUpload {
    pub staging_buffer: vk::Buffer,
    pub staging_offset: u64,
    pub bytes_per_row: u32,
    pub mip_level: u32,
    pub slice: u32,
    pub region_offset: vk::Offset3D,
    pub region_extent: vk::Extent3D,
}

/// A deferred host→device copy to run right before a buffer's first use.
pub struct BufferUploadOp {
    pub src: vk::Buffer,
    pub src_offset: u64,
    pub dst: vk::Buffer,
    pub dst_offset: u64,
    pub size: u64,
}

struct ArgumentBufferState {
    descriptor: ArgumentBufferDescriptor,
    set: Option<vk::DescriptorSet>,
}

#[derive(Copy, Clone, Debug)]
pub enum BackingResource {
    Image(vk::Image),
    Buffer(vk::Buffer),
}

pub struct Registry {
    images: FxHashMap<TextureHandle, BackingImage>,
    buffers: FxHashMap<BufferHandle, BackingBuffer>,
    texture_info: FxHashMap<TextureHandle, TextureDescriptor>,
    buffer_info: FxHashMap<BufferHandle, BufferDescriptor>,
    staging: FxHashMap<BufferHandle, StagingRegion>,
    pending_texture_uploads: FxHashMap<TextureHandle, Vec<PendingTextureUpload>>,
    argument_buffers: FxHashMap<ArgumentBufferHandle, ArgumentBufferState>,
    window_swapchains: FxHashMap<TextureHandle, Arc<crate::swapchain::SwapchainContext>>,
    pub pools: HeapPools,
    pub temporary: TemporaryAllocator,
    pub samplers: SamplerCache,
    /// Pools feeding argument-buffer descriptor sets; reset at frame cycle.
    argument_pools: Vec<vk::DescriptorPool>,
    argument_pool_size: u32,
}

impl Registry {
    pub fn new(inflight_frames: u32, staging_block_size: u64, descriptor_pool_size: u32) -> Registry {
        Registry {
            images: FxHashMap::default(),
            buffers: FxHashMap::default(),
            texture_info: FxHashMap::default(),
            buffer_info: FxHashMap::default(),
            staging: FxHashMap::default(),
            pending_texture_uploads: FxHashMap::default(),
            argument_buffers: FxHashMap::default(),
            window_swapchains: FxHashMap::default(),
            pools: HeapPools::new(inflight_frames),
            temporary: TemporaryAllocator::new(staging_block_size),
            samplers: SamplerCache::new(),
            argument_pools: Vec::new(),
            argument_pool_size: descriptor_pool_size,
        }
    }

    //----------------------------------------------------------------------------------------------
    // Window textures

    pub fn register_window_texture(
        &mut self,
        texture: TextureHandle,
        swapchain: Arc<crate::swapchain::SwapchainContext>,
    ) {
        self.window_swapchains.insert(texture, swapchain);
    }

    //----------------------------------------------------------------------------------------------
    // Declarations

    /// Records the planner-provided descriptor a later materialization will
    /// use. Re-declaring is allowed and overwrites.
    pub fn declare_texture(&mut self, handle: TextureHandle, descriptor: TextureDescriptor) {
        self.texture_info.insert(handle, descriptor);
    }

    pub fn declare_buffer(&mut self, handle: BufferHandle, descriptor: BufferDescriptor) {
        self.buffer_info.insert(handle, descriptor);
    }

    //----------------------------------------------------------------------------------------------
    // Materialization

    /// Materializes from the declared descriptor; idempotent.
    pub fn materialize_texture(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: TextureHandle,
        usage: vk::ImageUsageFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<&mut BackingImage> {
        let descriptor = *self.texture_info.get(&handle).unwrap_or_else(|| {
            panic!("texture {:?} was never declared", handle)
        });
        self.allocate_texture_if_needed(
            device,
            allocator,
            handle,
            &descriptor,
            usage,
            sharing_mode,
            vk::ImageLayout::UNDEFINED,
        )
    }

    /// Materializes from the declared descriptor; idempotent.
    pub fn materialize_buffer(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: BufferHandle,
        usage: vk::BufferUsageFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<&mut BackingBuffer> {
        let descriptor = *self.buffer_info.get(&handle).unwrap_or_else(|| {
            panic!("buffer {:?} was never declared", handle)
        });
        self.allocate_buffer_if_needed(device, allocator, handle, &descriptor, usage, sharing_mode)
    }

    pub fn allocate_texture(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: TextureHandle,
        descriptor: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
        sharing_mode: vk::SharingMode,
        initial_layout: vk::ImageLayout,
    ) -> Result<&mut BackingImage> {
        assert!(
            !self.images.contains_key(&handle),
            "texture {:?} is already materialized",
            handle
        );
        let backing = if descriptor.persistence == Persistence::Window {
            let swapchain = self
                .window_swapchains
                .get(&handle)
                .cloned()
                .ok_or_else(|| {
                    BackendError::ResourceCreation(format!(
                        "window texture {:?} has no registered swapchain",
                        handle
                    ))
                })?;
            let acquired = swapchain.take_next().ok_or_else(|| {
                BackendError::ResourceCreation("no acquired swapchain image available".into())
            })?;
            let raw = swapchain.images[acquired.index as usize];
            let desc = ImageAllocDesc {
                flags: vk::ImageCreateFlags::empty(),
                image_type: vk::ImageType::TYPE_2D,
                format: swapchain.format,
                extent: vk::Extent3D {
                    width: swapchain.extent.width,
                    height: swapchain.extent.height,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: swapchain.usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                storage: StorageMode::DeviceLocal,
            };
            BackingImage::from_swapchain(
                swapchain.clone(),
                acquired.index,
                raw,
                desc,
                Some(acquired.semaphore),
            )
        } else {
            let desc =
                ImageAllocDesc::from_descriptor(descriptor, usage, sharing_mode, initial_layout);
            let pool = self.pools.pool_for(descriptor.storage_mode);
            pool.collect_image(device, allocator, &desc)?
        };
        self.texture_info.insert(handle, *descriptor);
        self.images.insert(handle, backing);
        Ok(self.images.get_mut(&handle).unwrap())
    }

    /// Idempotent materialization; asserts descriptor compatibility when the
    /// backing already exists.
    pub fn allocate_texture_if_needed(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: TextureHandle,
        descriptor: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
        sharing_mode: vk::SharingMode,
        initial_layout: vk::ImageLayout,
    ) -> Result<&mut BackingImage> {
        if self.images.contains_key(&handle) {
            let existing = self.images.get_mut(&handle).unwrap();
            assert!(
                existing.alloc_desc.usage.contains(usage),
                "existing backing for {:?} lacks usage {:?}",
                handle,
                usage
            );
            return Ok(existing);
        }
        self.allocate_texture(
            device,
            allocator,
            handle,
            descriptor,
            usage,
            sharing_mode,
            initial_layout,
        )
    }

    pub fn allocate_buffer(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: BufferHandle,
        descriptor: &BufferDescriptor,
        usage: vk::BufferUsageFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<&mut BackingBuffer> {
        assert!(
            !self.buffers.contains_key(&handle),
            "buffer {:?} is already materialized",
            handle
        );
        let desc = BufferAllocDesc::from_descriptor(descriptor, usage, sharing_mode);
        let pool = self.pools.pool_for(descriptor.storage_mode);
        let backing = pool.collect_buffer(device, allocator, &desc)?;
        self.buffer_info.insert(handle, *descriptor);
        self.buffers.insert(handle, backing);
        Ok(self.buffers.get_mut(&handle).unwrap())
    }

    pub fn allocate_buffer_if_needed(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: BufferHandle,
        descriptor: &BufferDescriptor,
        usage: vk::BufferUsageFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<&mut BackingBuffer> {
        if self.buffers.contains_key(&handle) {
            let existing = self.buffers.get_mut(&handle).unwrap();
            assert!(
                existing.alloc_desc.size >= descriptor.length,
                "existing backing for {:?} is smaller than requested",
                handle
            );
            return Ok(existing);
        }
        self.allocate_buffer(device, allocator, handle, descriptor, usage, sharing_mode)
    }

    //----------------------------------------------------------------------------------------------
    // Lookup

    pub fn image(&self, handle: TextureHandle) -> Option<&BackingImage> {
        self.images.get(&handle)
    }

    pub fn image_mut(&mut self, handle: TextureHandle) -> Option<&mut BackingImage> {
        self.images.get_mut(&handle)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&BackingBuffer> {
        self.buffers.get(&handle)
    }

    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut BackingBuffer> {
        self.buffers.get_mut(&handle)
    }

    pub fn texture_descriptor(&self, handle: TextureHandle) -> Option<&TextureDescriptor> {
        self.texture_info.get(&handle)
    }

    pub fn buffer_descriptor(&self, handle: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffer_info.get(&handle)
    }

    pub fn backing_resource(&self, handle: ResourceHandle) -> Option<BackingResource> {
        match handle {
            ResourceHandle::Texture(t) => self.images.get(&t).map(|i| BackingResource::Image(i.raw)),
            ResourceHandle::Buffer(b) => {
                self.buffers.get(&b).map(|x| BackingResource::Buffer(x.raw))
            }
        }
    }

    /// What the render-target derivation needs to know about a texture.
    pub fn attachment_state(&self, handle: TextureHandle) -> AttachmentState {
        let format = self
            .texture_info
            .get(&handle)
            .map(|d| d.format)
            .unwrap_or(PixelFormat::Rgba8Unorm);
        match self.images.get(&handle) {
            Some(img) => AttachmentState {
                format,
                current_layout: img.layout,
                initialized: img.initialized,
                is_swapchain: img.is_window_texture(),
            },
            None => AttachmentState {
                format,
                current_layout: vk::ImageLayout::UNDEFINED,
                initialized: false,
                is_swapchain: self.window_swapchains.contains_key(&handle),
            },
        }
    }

    //----------------------------------------------------------------------------------------------
    // Host access

    /// A writable pointer covering `range` of the buffer. Buffers without a
    /// backing get a per-frame CPU staging region keyed by the handle.
    pub fn buffer_contents(&mut self, handle: BufferHandle, range: Range<u64>) -> *mut u8 {
        if let Some(backing) = self.buffers.get(&handle) {
            if let Some(ptr) = backing.mapped_ptr() {
                return unsafe { ptr.0.add(range.start as usize) };
            }
        }
        let needed = range.end as usize;
        let region = self.staging.entry(handle).or_insert_with(|| StagingRegion {
            data: vec![0u8; needed].into_boxed_slice(),
            dirty: None,
        });
        if region.data.len() < needed {
            let mut grown = vec![0u8; needed].into_boxed_slice();
            grown[..region.data.len()].copy_from_slice(&region.data);
            region.data = grown;
        }
        unsafe { region.data.as_mut_ptr().add(range.start as usize) }
    }

    /// Completes a host write started by `buffer_contents`.
    pub fn buffer_did_modify_range(
        &mut self,
        device: &ash::Device,
        handle: BufferHandle,
        range: Range<u64>,
    ) -> Result<()> {
        if let Some(backing) = self.buffers.get_mut(&handle) {
            if backing.mapped_ptr().is_some() {
                backing.host_written = true;
                backing.flush_range(device, range.start, range.end - range.start)?;
                return Ok(());
            }
        }
        let region = self
            .staging
            .get_mut(&handle)
            .expect("buffer_did_modify_range without buffer_contents");
        region.dirty = Some(match region.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range,
        });
        Ok(())
    }

    /// If the host wrote to this buffer through a staging region, moves the
    /// bytes towards the GPU: directly for host-visible backings, through a
    /// temporary staging slice (returning the copy to record) otherwise.
    pub fn take_deferred_upload(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: BufferHandle,
    ) -> Result<Option<BufferUploadOp>> {
        let region = match self.staging.get_mut(&handle) {
            Some(r) => r,
            None => return Ok(None),
        };
        let dirty = match region.dirty.take() {
            Some(d) => d,
            None => return Ok(None),
        };
        let backing = self
            .buffers
            .get_mut(&handle)
            .expect("deferred upload for a buffer that was never materialized");
        let size = dirty.end - dirty.start;
        if let Some(ptr) = backing.mapped_ptr() {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    region.data.as_ptr().add(dirty.start as usize),
                    ptr.0.add(dirty.start as usize),
                    size as usize,
                );
            }
            backing.flush_range(device, dirty.start, size)?;
            backing.host_written = true;
            Ok(None)
        } else {
            let slice = self.temporary.allocate(device, allocator, size, 4)?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    region.data.as_ptr().add(dirty.start as usize),
                    slice.ptr,
                    size as usize,
                );
            }
            Ok(Some(BufferUploadOp {
                src: slice.buffer,
                src_offset: slice.offset,
                dst: backing.raw,
                dst_offset: dirty.start,
                size,
            }))
        }
    }

    /// Schedules a texture region upload; the transfer itself is issued when
    /// the texture is next materialized for a command.
    pub fn replace_texture_region(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        handle: TextureHandle,
        region_offset: vk::Offset3D,
        region_extent: vk::Extent3D,
        mip_level: u32,
        slice: u32,
        bytes: &[u8],
        bytes_per_row: u32,
    ) -> Result<()> {
        let staging = self
            .temporary
            .allocate(device, allocator, bytes.len() as u64, 4)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), staging.ptr, bytes.len());
        }
        self.pending_texture_uploads
            .entry(handle)
            .or_default()
            .push(PendingTextureUpload {
                staging_buffer: staging.buffer,
                staging_offset: staging.offset,
                bytes_per_row,
                mip_level,
                slice,
                region_offset,
                region_extent,
            });
        Ok(())
    }

    pub fn take_texture_uploads(&mut self, handle: TextureHandle) -> Vec<PendingTextureUpload> {
        self.pending_texture_uploads
            .remove(&handle)
            .unwrap_or_default()
    }

    //----------------------------------------------------------------------------------------------
    // Argument buffers

    pub fn declare_argument_buffer(
        &mut self,
        handle: ArgumentBufferHandle,
        descriptor: ArgumentBufferDescriptor,
    ) {
        self.argument_buffers
            .entry(handle)
            .or_insert(ArgumentBufferState {
                descriptor,
                set: None,
            });
    }

    pub fn argument_buffer_set(&self, handle: ArgumentBufferHandle) -> Option<vk::DescriptorSet> {
        self.argument_buffers.get(&handle).and_then(|s| s.set)
    }

    /// Allocates and populates the argument buffer's descriptor set on first
    /// bind. Descriptor types and ranges come from the pipeline reflection at
    /// the argument buffer's set index.
    pub fn materialize_argument_buffer(
        &mut self,
        device: &ash::Device,
        handle: ArgumentBufferHandle,
        set_index: u32,
        layout: vk::DescriptorSetLayout,
        reflection: &PipelineReflection,
    ) -> Result<vk::DescriptorSet> {
        if let Some(set) = self.argument_buffers.get(&handle).and_then(|s| s.set) {
            return Ok(set);
        }
        let set = self.allocate_argument_set(device, layout)?;

        // collected infos must outlive the update call
        let state = self
            .argument_buffers
            .get(&handle)
            .expect("argument buffer was never declared");
        let mut buffer_infos: SmallVec<[vk::DescriptorBufferInfo; 16]> = SmallVec::new();
        let mut image_infos: SmallVec<[vk::DescriptorImageInfo; 16]> = SmallVec::new();
        struct PendingWrite {
            binding: u32,
            ty: vk::DescriptorType,
            buffer_index: Option<usize>,
            image_index: Option<usize>,
        }
        let mut writes: Vec<PendingWrite> = Vec::new();

        for (binding, resource) in &state.descriptor.bindings {
            let path = crate::path::BindingPath::pack(set_index as u16, *binding as u16, 0);
            let arg = match reflection.argument_reflection(path) {
                Some(a) => a,
                None => {
                    warn!(
                        "argument buffer {:?}: binding {} is not part of the pipeline, skipped",
                        handle, binding
                    );
                    continue;
                }
            };
            let ty = match crate::reflection::descriptor_type(arg.resource_type, false) {
                Some(t) => t,
                None => continue,
            };
            match resource {
                ArgumentBinding::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    let backing = self.buffers.get(buffer).expect("unmaterialized buffer bound");
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: backing.raw,
                        offset: *offset,
                        range: *range,
                    });
                    writes.push(PendingWrite {
                        binding: *binding,
                        ty,
                        buffer_index: Some(buffer_infos.len() - 1),
                        image_index: None,
                    });
                }
                ArgumentBinding::Texture { texture } => {
                    let info = self.texture_info.get(texture).copied();
                    let backing = self.images.get_mut(texture).expect("unmaterialized texture bound");
                    let format = info
                        .map(|d| d.format.to_vk())
                        .unwrap_or(backing.alloc_desc.format);
                    let aspect = info
                        .map(|d| d.format.aspect_mask())
                        .unwrap_or(vk::ImageAspectFlags::COLOR);
                    let view = backing.view(
                        device,
                        crate::image::ImageViewKey {
                            aspect,
                            base_mip: 0,
                            mip_count: backing.alloc_desc.mip_levels,
                            base_layer: 0,
                            layer_count: backing.alloc_desc.array_layers,
                            format,
                        },
                    )?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: if ty == vk::DescriptorType::STORAGE_IMAGE {
                            vk::ImageLayout::GENERAL
                        } else {
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                        },
                    });
                    writes.push(PendingWrite {
                        binding: *binding,
                        ty,
                        buffer_index: None,
                        image_index: Some(image_infos.len() - 1),
                    });
                }
                ArgumentBinding::Sampler(desc) => {
                    let sampler = self.samplers.get_or_create(device, desc)?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    writes.push(PendingWrite {
                        binding: *binding,
                        ty,
                        buffer_index: None,
                        image_index: Some(image_infos.len() - 1),
                    });
                }
            }
        }

        let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|w| vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: w.binding,
                dst_array_element: 0,
                descriptor_count: 1,
                descriptor_type: w.ty,
                p_buffer_info: w
                    .buffer_index
                    .map_or(std::ptr::null(), |i| &buffer_infos[i] as *const _),
                p_image_info: w
                    .image_index
                    .map_or(std::ptr::null(), |i| &image_infos[i] as *const _),
                ..Default::default()
            })
            .collect();
        unsafe {
            device.update_descriptor_sets(&descriptor_writes, &[]);
        }

        self.argument_buffers.get_mut(&handle).unwrap().set = Some(set);
        debug!(
            "materialized argument buffer {:?} ({} writes)",
            handle,
            descriptor_writes.len()
        );
        Ok(set)
    }

    fn allocate_argument_set(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        for &pool in self.argument_pools.iter().rev() {
            let info = vk::DescriptorSetAllocateInfo {
                descriptor_pool: pool,
                descriptor_set_count: 1,
                p_set_layouts: layouts.as_ptr(),
                ..Default::default()
            };
            match unsafe { device.allocate_descriptor_sets(&info) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        // no pool had room: grow by one pool of the configured size
        let sizes = descriptor_pool_sizes(self.argument_pool_size);
        let info = vk::DescriptorPoolCreateInfo {
            max_sets: self.argument_pool_size,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&info, None)? };
        self.argument_pools.push(pool);
        let info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        Ok(unsafe { device.allocate_descriptor_sets(&info)?[0] })
    }

    //----------------------------------------------------------------------------------------------
    // Disposal

    /// Returns the backing to its pool. Window textures go back to their
    /// swapchain (a no-op here).
    pub fn dispose_texture(&mut self, handle: TextureHandle) {
        if let Some(backing) = self.images.remove(&handle) {
            if !backing.is_window_texture() {
                assert!(
                    backing.wait_semaphore.is_none(),
                    "disposing texture {:?} with an outstanding wait semaphore",
                    handle
                );
                let storage = backing.alloc_desc.storage;
                self.pools.pool_for(storage).deposit_image(backing);
            }
        }
        self.texture_info.remove(&handle);
    }

    pub fn dispose_buffer(&mut self, handle: BufferHandle) {
        if let Some(backing) = self.buffers.remove(&handle) {
            assert!(
                backing.wait_semaphore.is_none(),
                "disposing buffer {:?} with an outstanding wait semaphore",
                handle
            );
            let storage = backing.alloc_desc.storage;
            self.pools.pool_for(storage).deposit_buffer(backing);
        }
        self.buffer_info.remove(&handle);
        self.staging.remove(&handle);
    }

    pub fn dispose_argument_buffer(&mut self, handle: ArgumentBufferHandle) {
        self.argument_buffers.remove(&handle);
    }

    //----------------------------------------------------------------------------------------------
    // Frame cycle

    /// Ends the frame: transient backings go back to their pools, staging
    /// resets, non-persistent argument buffers drop, swapchain registrations
    /// clear.
    pub fn cycle_frame(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        // per-frame backings return to the pools exactly once
        let transient_textures: Vec<TextureHandle> = self
            .texture_info
            .iter()
            .filter(|(_, d)| d.persistence != Persistence::Persistent)
            .map(|(h, _)| *h)
            .collect();
        for handle in transient_textures {
            self.dispose_texture(handle);
        }
        let transient_buffers: Vec<BufferHandle> = self
            .buffer_info
            .iter()
            .filter(|(_, d)| d.persistence != Persistence::Persistent)
            .map(|(h, _)| *h)
            .collect();
        for handle in transient_buffers {
            self.dispose_buffer(handle);
        }

        self.staging.clear();
        self.pending_texture_uploads.clear();
        self.argument_buffers.retain(|_, s| s.descriptor.persistent);
        // pools can only be reset wholesale; keep them untouched while any
        // persistent argument set is still alive in them
        if self.argument_buffers.values().all(|s| s.set.is_none()) {
            for &pool in &self.argument_pools {
                unsafe {
                    let _ = device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty());
                }
            }
        }
        self.pools.cycle(device, allocator);
        self.temporary.cycle();
        self.window_swapchains.clear();

        trace!(
            "registry cycle: {} persistent images, {} persistent buffers remain",
            self.images.len(),
            self.buffers.len()
        );
    }

    pub fn destroy_all(&mut self, device: &ash::Device, allocator: &dyn DeviceMemoryAllocator) {
        for (_, img) in self.images.drain() {
            let mut img = img;
            img.wait_semaphore = None;
            img.destroy(device, allocator);
        }
        for (_, buf) in self.buffers.drain() {
            let mut buf = buf;
            buf.wait_semaphore = None;
            buf.destroy(device, allocator);
        }
        self.pools.destroy_all(device, allocator);
        self.temporary.destroy_all(device, allocator);
        self.samplers.destroy(device);
        for pool in self.argument_pools.drain(..) {
            unsafe {
                device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}

/// Pool sizes: one block of `count` descriptors per descriptor type we hand
/// out.
pub fn descriptor_pool_sizes(count: u32) -> Vec<vk::DescriptorPoolSize> {
    [
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::INPUT_ATTACHMENT,
        vk::DescriptorType::SAMPLER,
    ]
    .iter()
    .map(|&ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: count,
    })
    .collect()
}
