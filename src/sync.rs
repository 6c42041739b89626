//! Synchronization object pools and per-command-buffer resource records.
use crate::commands::QueueClass;
use crate::error::Result;
use ash::vk;
use fxhash::FxHashMap;

//--------------------------------------------------------------------------------------------------
// Semaphores

/// Reusable binary semaphores, addressable by planner-chosen ids to connect
/// a producer in one submission with a consumer in another.
pub struct SemaphorePool {
    free: Vec<vk::Semaphore>,
    by_id: FxHashMap<u64, vk::Semaphore>,
}

impl SemaphorePool {
    pub fn new() -> SemaphorePool {
        SemaphorePool {
            free: Vec::new(),
            by_id: FxHashMap::default(),
        }
    }

    pub fn allocate(&mut self, device: &ash::Device) -> Result<vk::Semaphore> {
        if let Some(s) = self.free.pop() {
            return Ok(s);
        }
        let s = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        Ok(s)
    }

    /// The semaphore for a planner id, creating it on first reference
    /// (signal and wait sides race-free: encoding is serialized).
    pub fn for_id(&mut self, device: &ash::Device, id: u64) -> Result<vk::Semaphore> {
        if let Some(&s) = self.by_id.get(&id) {
            return Ok(s);
        }
        let s = self.allocate(device)?;
        self.by_id.insert(id, s);
        Ok(s)
    }

    /// Consumes the id binding; the semaphore itself is recycled later by the
    /// completion handler.
    pub fn take_id(&mut self, id: u64) -> Option<vk::Semaphore> {
        self.by_id.remove(&id)
    }

    pub fn recycle(&mut self, semaphore: vk::Semaphore) {
        self.free.push(semaphore);
    }

    pub fn destroy_all(&mut self, device: &ash::Device) {
        for (_, s) in self.by_id.drain() {
            unsafe { device.destroy_semaphore(s, None) };
        }
        for s in self.free.drain(..) {
            unsafe { device.destroy_semaphore(s, None) };
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Events

/// Per-queue-family event pool keyed by planner ids; events connect encoders
/// within one queue.
pub struct EventPool {
    free: FxHashMap<u32, Vec<vk::Event>>,
    by_id: FxHashMap<(u32, u64), vk::Event>,
}

impl EventPool {
    pub fn new() -> EventPool {
        EventPool {
            free: FxHashMap::default(),
            by_id: FxHashMap::default(),
        }
    }

    pub fn for_id(&mut self, device: &ash::Device, family: u32, id: u64) -> Result<vk::Event> {
        if let Some(&e) = self.by_id.get(&(family, id)) {
            return Ok(e);
        }
        let e = match self.free.entry(family).or_default().pop() {
            Some(e) => {
                unsafe { device.reset_event(e)? };
                e
            }
            None => unsafe { device.create_event(&vk::EventCreateInfo::default(), None)? },
        };
        self.by_id.insert((family, id), e);
        Ok(e)
    }

    pub fn take_id(&mut self, family: u32, id: u64) -> Option<vk::Event> {
        self.by_id.remove(&(family, id))
    }

    pub fn recycle(&mut self, family: u32, event: vk::Event) {
        self.free.entry(family).or_default().push(event);
    }

    pub fn destroy_all(&mut self, device: &ash::Device) {
        for (_, e) in self.by_id.drain() {
            unsafe { device.destroy_event(e, None) };
        }
        for (_, list) in self.free.drain() {
            for e in list {
                unsafe { device.destroy_event(e, None) };
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Fences

pub struct FencePool {
    free: Vec<vk::Fence>,
}

impl FencePool {
    pub fn new() -> FencePool {
        FencePool { free: Vec::new() }
    }

    pub fn allocate(&mut self, device: &ash::Device) -> Result<vk::Fence> {
        if let Some(f) = self.free.pop() {
            unsafe { device.reset_fences(&[f])? };
            return Ok(f);
        }
        let f = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        Ok(f)
    }

    pub fn recycle(&mut self, fence: vk::Fence) {
        self.free.push(fence);
    }

    pub fn destroy_all(&mut self, device: &ash::Device) {
        for f in self.free.drain(..) {
            unsafe { device.destroy_fence(f, None) };
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Command buffer resources

/// Everything one recorded command buffer needs to keep alive until the GPU
/// is done with it, plus its wait/signal lists.
pub struct CommandBufferResources {
    pub queue: QueueClass,
    pub queue_family: u32,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    /// Semaphores to put back into the pool once the submission retires.
    pub recycle_semaphores: Vec<vk::Semaphore>,
    /// Events (with their family) to put back once the submission retires.
    pub recycle_events: Vec<(u32, vk::Event)>,
    pub render_passes: Vec<vk::RenderPass>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub descriptor_pools: Vec<vk::DescriptorPool>,
}

impl CommandBufferResources {
    pub fn new(device: &ash::Device, queue: QueueClass, queue_family: u32) -> Result<CommandBufferResources> {
        let pool_info = vk::CommandPoolCreateInfo {
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: queue_family,
            ..Default::default()
        };
        let command_pool = unsafe { device.create_command_pool(&pool_info, None)? };
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info)?[0] };
        Ok(CommandBufferResources {
            queue,
            queue_family,
            command_pool,
            command_buffer,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            recycle_semaphores: Vec::new(),
            recycle_events: Vec::new(),
            render_passes: Vec::new(),
            framebuffers: Vec::new(),
            descriptor_pools: Vec::new(),
        })
    }

    pub fn add_wait_semaphore(&mut self, semaphore: vk::Semaphore, stages: vk::PipelineStageFlags) {
        self.wait_semaphores.push((semaphore, stages));
    }

    pub fn add_signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.signal_semaphores.push(semaphore);
    }

    /// Drops the per-submission state after GPU completion, recycling pooled
    /// objects. The record itself (pool + buffer) is reused.
    pub fn retire(
        &mut self,
        device: &ash::Device,
        semaphores: &mut SemaphorePool,
        events: &mut EventPool,
    ) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            for rp in self.render_passes.drain(..) {
                device.destroy_render_pass(rp, None);
            }
            for dp in self.descriptor_pools.drain(..) {
                device.destroy_descriptor_pool(dp, None);
            }
            let _ = device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty());
        }
        for s in self.recycle_semaphores.drain(..) {
            semaphores.recycle(s);
        }
        for (family, e) in self.recycle_events.drain(..) {
            events.recycle(family, e);
        }
        self.wait_semaphores.clear();
        self.signal_semaphores.clear();
    }

    pub fn destroy(mut self, device: &ash::Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            for rp in self.render_passes.drain(..) {
                device.destroy_render_pass(rp, None);
            }
            for dp in self.descriptor_pools.drain(..) {
                device.destroy_descriptor_pool(dp, None);
            }
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
