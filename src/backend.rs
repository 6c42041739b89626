//! The backend facade: everything the planner calls.
//!
//! Subsystems live behind their own mutexes. The planner drives encoding
//! from a single thread, so the locks are uncontended there; they exist for
//! the post-submission accessors documented to be thread-safe.
use crate::binding::{BindingManager, DescriptorPoolSet};
use crate::commands::{Command, PassRecord, ResourceUsageTable};
use crate::desc::{ComputePipelineDescriptor, RenderPipelineDescriptor};
use crate::device::Device;
use crate::encoder::EncodeCtx;
use crate::error::Result;
use crate::executor::FrameExecutor;
use crate::instance::Instance;
use crate::memory::{DeviceMemoryAllocator, PassthroughAllocator};
use crate::path::BindingPath;
use crate::pipeline::PipelineCache;
use crate::reflection::ArgumentReflection;
use crate::registry::{BackingResource, Registry};
use crate::resource::*;
use crate::shader::{FunctionKey, ShaderLibrary};
use crate::swapchain::SwapchainContext;
use crate::sync::{EventPool, SemaphorePool};
use ash::vk;
use config::Config;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A queryable snapshot of a pipeline's merged reflection.
#[derive(Clone, Debug)]
pub struct ReflectionSnapshot {
    arguments: Vec<ArgumentReflection>,
}

impl ReflectionSnapshot {
    pub fn arguments(&self) -> &[ArgumentReflection] {
        &self.arguments
    }

    pub fn binding_path(
        &self,
        name: &str,
        array_index: u32,
        argument_buffer: Option<BindingPath>,
    ) -> Option<BindingPath> {
        let arg = self.arguments.iter().find(|a| a.name == name)?;
        let path = arg.path.with_array_index(array_index);
        Some(match argument_buffer {
            Some(parent) => path.with_set(parent.set()),
            None => path,
        })
    }

    pub fn argument_reflection(&self, path: BindingPath) -> Option<&ArgumentReflection> {
        let key = path.with_array_index(0);
        self.arguments.iter().find(|a| a.path == key)
    }

    pub fn binding_is_active(&self, path: BindingPath) -> bool {
        self.argument_reflection(path).is_some()
    }
}

pub struct Backend {
    instance: Instance,
    device: Device,
    allocator: Arc<dyn DeviceMemoryAllocator>,
    registry: Mutex<Registry>,
    library: Mutex<ShaderLibrary>,
    pipelines: Mutex<PipelineCache>,
    descriptor_pools: Mutex<DescriptorPoolSet>,
    bindings: Mutex<BindingManager>,
    semaphores: Mutex<SemaphorePool>,
    events: Mutex<EventPool>,
    executor: Mutex<FrameExecutor>,
    max_inflight: u32,
}

impl Backend {
    /// Builds the whole stack: instance, device, allocator, registry, shader
    /// library. Construction failure is the only fatal initialization path.
    pub fn new(cfg: &Config, shader_directory: &Path) -> Result<Backend> {
        let enable_validation = cfg
            .get::<bool>("gfx.enable_validation")
            .unwrap_or(cfg!(debug_assertions));
        let max_inflight = cfg.get::<u32>("gfx.max_frames_in_flight").unwrap_or(2);
        let upload_block_size = cfg
            .get::<u64>("gfx.default_upload_buffer_size")
            .unwrap_or(4 * 1024 * 1024);
        let descriptor_pool_size = cfg.get::<u32>("gfx.descriptor_pool_size").unwrap_or(64);

        let instance = Instance::new(enable_validation)?;
        let device = Device::new(&instance)?;
        let allocator: Arc<dyn DeviceMemoryAllocator> =
            Arc::new(PassthroughAllocator::new(device.memory_properties));
        let library = ShaderLibrary::load(&device.raw, shader_directory)?;
        let registry = Registry::new(max_inflight, upload_block_size, descriptor_pool_size);
        let executor = FrameExecutor::new(device.raw.clone(), max_inflight);

        Ok(Backend {
            instance,
            device,
            allocator,
            registry: Mutex::new(registry),
            library: Mutex::new(library),
            pipelines: Mutex::new(PipelineCache::new()),
            descriptor_pools: Mutex::new(DescriptorPoolSet::new(descriptor_pool_size)),
            bindings: Mutex::new(BindingManager::new()),
            semaphores: Mutex::new(SemaphorePool::new()),
            events: Mutex::new(EventPool::new()),
            executor: Mutex::new(executor),
            max_inflight,
        })
    }

    //----------------------------------------------------------------------------------------------
    // Device queries

    pub fn render_device(&self) -> &Device {
        &self.device
    }

    pub fn is_depth24_stencil8_supported(&self) -> bool {
        self.device.is_depth24_stencil8_supported()
    }

    pub fn thread_execution_width(&self) -> u32 {
        self.device.thread_execution_width()
    }

    pub fn max_inflight_frames(&self) -> u32 {
        self.max_inflight
    }

    //----------------------------------------------------------------------------------------------
    // Resource declarations & persistent materialization

    pub fn declare_texture(&self, handle: TextureHandle, descriptor: TextureDescriptor) {
        self.registry.lock().unwrap().declare_texture(handle, descriptor);
    }

    pub fn declare_buffer(&self, handle: BufferHandle, descriptor: BufferDescriptor) {
        self.registry.lock().unwrap().declare_buffer(handle, descriptor);
    }

    pub fn declare_argument_buffer(
        &self,
        handle: ArgumentBufferHandle,
        descriptor: ArgumentBufferDescriptor,
    ) {
        self.registry
            .lock()
            .unwrap()
            .declare_argument_buffer(handle, descriptor);
    }

    pub fn register_window_texture(
        &self,
        texture: TextureHandle,
        swapchain: Arc<SwapchainContext>,
    ) {
        self.registry
            .lock()
            .unwrap()
            .register_window_texture(texture, swapchain);
    }

    pub fn materialize_persistent_texture(&self, handle: TextureHandle) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let descriptor = *registry
            .texture_descriptor(handle)
            .expect("persistent texture was never declared");
        assert_eq!(descriptor.persistence, Persistence::Persistent);
        registry.allocate_texture_if_needed(
            &self.device.raw,
            &*self.allocator,
            handle,
            &descriptor,
            descriptor.usage.to_vk(),
            vk::SharingMode::EXCLUSIVE,
            vk::ImageLayout::UNDEFINED,
        )?;
        Ok(())
    }

    pub fn materialize_persistent_buffer(&self, handle: BufferHandle) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let descriptor = *registry
            .buffer_descriptor(handle)
            .expect("persistent buffer was never declared");
        assert_eq!(descriptor.persistence, Persistence::Persistent);
        registry.allocate_buffer_if_needed(
            &self.device.raw,
            &*self.allocator,
            handle,
            &descriptor,
            descriptor.usage.to_vk() | vk::BufferUsageFlags::TRANSFER_DST,
            vk::SharingMode::EXCLUSIVE,
        )?;
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Host access

    pub fn buffer_contents(&self, handle: BufferHandle, range: Range<u64>) -> *mut u8 {
        self.registry.lock().unwrap().buffer_contents(handle, range)
    }

    pub fn buffer_did_modify_range(&self, handle: BufferHandle, range: Range<u64>) -> Result<()> {
        self.registry
            .lock()
            .unwrap()
            .buffer_did_modify_range(&self.device.raw, handle, range)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn replace_texture_region(
        &self,
        handle: TextureHandle,
        region_offset: vk::Offset3D,
        region_extent: vk::Extent3D,
        mip_level: u32,
        slice: u32,
        bytes: &[u8],
        bytes_per_row: u32,
    ) -> Result<()> {
        self.registry.lock().unwrap().replace_texture_region(
            &self.device.raw,
            &*self.allocator,
            handle,
            region_offset,
            region_extent,
            mip_level,
            slice,
            bytes,
            bytes_per_row,
        )
    }

    //----------------------------------------------------------------------------------------------
    // Disposal

    pub fn dispose_texture(&self, handle: TextureHandle) {
        self.registry.lock().unwrap().dispose_texture(handle);
    }

    pub fn dispose_buffer(&self, handle: BufferHandle) {
        self.registry.lock().unwrap().dispose_buffer(handle);
    }

    pub fn dispose_argument_buffer(&self, handle: ArgumentBufferHandle) {
        self.registry.lock().unwrap().dispose_argument_buffer(handle);
    }

    /// An argument buffer array is a contiguous run of argument buffers; the
    /// planner disposes them as one.
    pub fn dispose_argument_buffer_array(&self, handles: &[ArgumentBufferHandle]) {
        let mut registry = self.registry.lock().unwrap();
        for &handle in handles {
            registry.dispose_argument_buffer(handle);
        }
    }

    /// Readable from any thread after submission.
    pub fn backing_resource(&self, handle: ResourceHandle) -> Option<BackingResource> {
        self.registry.lock().unwrap().backing_resource(handle)
    }

    //----------------------------------------------------------------------------------------------
    // Reflection queries

    pub fn render_pipeline_reflection(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<ReflectionSnapshot> {
        let key = FunctionKey::Graphics {
            vertex: descriptor.vertex_function.clone(),
            fragment: descriptor.fragment_function.clone(),
        };
        let mut library = self.library.lock().unwrap();
        let reflection = library.reflection_for(&key)?;
        Ok(ReflectionSnapshot {
            arguments: reflection.arguments().to_vec(),
        })
    }

    pub fn compute_pipeline_reflection(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<ReflectionSnapshot> {
        let key = FunctionKey::Compute {
            function: descriptor.function.clone(),
        };
        let mut library = self.library.lock().unwrap();
        let reflection = library.reflection_for(&key)?;
        Ok(ReflectionSnapshot {
            arguments: reflection.arguments().to_vec(),
        })
    }

    /// Rebases a path from one argument buffer onto another's set.
    pub fn binding_path_in_argument_buffer(
        &self,
        path: BindingPath,
        new_argument_buffer: BindingPath,
    ) -> BindingPath {
        path.with_set(new_argument_buffer.set())
    }

    //----------------------------------------------------------------------------------------------
    // Frame execution

    /// Recycles completed frames; blocks if the in-flight window is full.
    pub fn begin_frame_resource_access(&self) {
        let mut executor = self.executor.lock().unwrap();
        let mut semaphores = self.semaphores.lock().unwrap();
        let mut events = self.events.lock().unwrap();
        executor.begin_frame(&self.device.raw, &mut semaphores, &mut events);
    }

    /// Encodes, submits, and schedules the completion callback.
    pub fn execute_frame_graph(
        &self,
        passes: &[PassRecord],
        usages: &ResourceUsageTable,
        commands: &[Command],
        completion: Box<dyn FnOnce() + Send>,
    ) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let mut library = self.library.lock().unwrap();
        let mut pipelines = self.pipelines.lock().unwrap();
        let mut descriptor_pools = self.descriptor_pools.lock().unwrap();
        let mut bindings = self.bindings.lock().unwrap();
        let mut semaphores = self.semaphores.lock().unwrap();
        let mut events = self.events.lock().unwrap();
        let mut executor = self.executor.lock().unwrap();

        let ctx = EncodeCtx {
            device: &self.device,
            allocator: &*self.allocator,
            registry: &mut registry,
            library: &mut library,
            pipelines: &mut pipelines,
            descriptor_pools: &mut descriptor_pools,
            bindings: &mut bindings,
            semaphores: &mut semaphores,
            events: &mut events,
            usages,
            passes,
            commands,
        };
        executor.execute_frame(ctx, completion)
    }

    /// The frame cycle: transient state resets, pools age.
    pub fn cycle_frames(&self) {
        let mut registry = self.registry.lock().unwrap();
        registry.cycle_frame(&self.device.raw, &*self.allocator);
        self.descriptor_pools
            .lock()
            .unwrap()
            .reset_all(&self.device.raw);
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        // drain the GPU before tearing anything down
        {
            let mut executor = self.executor.lock().unwrap();
            let mut semaphores = self.semaphores.lock().unwrap();
            let mut events = self.events.lock().unwrap();
            executor.shutdown(&self.device.raw, &mut semaphores, &mut events);
        }
        self.device.wait_idle();
        let device = &self.device.raw;
        self.registry
            .lock()
            .unwrap()
            .destroy_all(device, &*self.allocator);
        self.library.lock().unwrap().destroy(device);
        self.pipelines.lock().unwrap().destroy_all(device);
        self.descriptor_pools.lock().unwrap().destroy_all(device);
        self.semaphores.lock().unwrap().destroy_all(device);
        self.events.lock().unwrap().destroy_all(device);
        self.device.destroy();
        self.instance.destroy();
    }
}
