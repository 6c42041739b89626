//! Resource binding manager.
//!
//! Binding mutations accumulate per descriptor set and are flushed right
//! before each draw or dispatch: a transient descriptor set is allocated,
//! written, and bound, dynamic buffer offsets are passed at bind time, and
//! push constants go out as one slab. Whether a buffer binding is *dynamic*
//! is a property of the binding pattern within the pass (same buffer rebound
//! at the same slot with different offsets), not of any annotation.
use crate::error::Result;
use crate::image::ImageViewKey;
use crate::memory::DeviceMemoryAllocator;
use crate::path::BindingPath;
use crate::reflection::{descriptor_type, PipelineReflection, ResourceCategory};
use crate::registry::{descriptor_pool_sizes, Registry};
use crate::resource::{BufferHandle, SamplerDescriptor, TextureHandle};
use ash::vk;
use fxhash::FxHashMap;
use smallvec::SmallVec;

//--------------------------------------------------------------------------------------------------
// Transient descriptor pools

/// Fixed-size descriptor pools, grown on demand and reset at frame cycle.
pub struct DescriptorPoolSet {
    pools: Vec<vk::DescriptorPool>,
    pool_size: u32,
}

impl DescriptorPoolSet {
    pub fn new(pool_size: u32) -> DescriptorPoolSet {
        DescriptorPoolSet {
            pools: Vec::new(),
            pool_size,
        }
    }

    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        for &pool in self.pools.iter().rev() {
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
        let sizes = descriptor_pool_sizes(self.pool_size);
        let info = vk::DescriptorPoolCreateInfo {
            max_sets: self.pool_size,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&info, None)? };
        debug!("grew transient descriptor pool set to {} pools", self.pools.len() + 1);
        self.pools.push(pool);
        let info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        Ok(unsafe { device.allocate_descriptor_sets(&info)?[0] })
    }

    pub fn reset_all(&mut self, device: &ash::Device) {
        for &pool in &self.pools {
            unsafe {
                let _ = device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty());
            }
        }
    }

    pub fn destroy_all(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe {
                device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Pending bindings

#[derive(Clone, Debug)]
enum Pending {
    Buffer { buffer: BufferHandle, offset: u64 },
    Texture { texture: TextureHandle },
    Sampler(SamplerDescriptor),
    Bytes(Vec<u8>),
}

#[derive(Default)]
struct SetState {
    pending: FxHashMap<u32, Pending>,
    dirty: bool,
}

/// Offset-rebinding history for one (set, binding) slot.
struct DynamicTrack {
    buffer: BufferHandle,
    last_offset: u64,
    dynamic: bool,
}

pub struct BindingManager {
    sets: Vec<SetState>,
    dynamic: FxHashMap<(u16, u16), DynamicTrack>,
    push_constants: Vec<u8>,
    push_stages: vk::ShaderStageFlags,
    push_dirty: bool,
}

impl BindingManager {
    pub fn new() -> BindingManager {
        BindingManager {
            sets: Vec::new(),
            dynamic: FxHashMap::default(),
            push_constants: Vec::new(),
            push_stages: vk::ShaderStageFlags::empty(),
            push_dirty: false,
        }
    }

    fn set_state(&mut self, set: u16) -> &mut SetState {
        let set = set as usize;
        if self.sets.len() <= set {
            self.sets.resize_with(set + 1, SetState::default);
        }
        &mut self.sets[set]
    }

    /// Clears per-pass state; dynamic-buffer detection restarts.
    pub fn begin_pass(&mut self) {
        for s in &mut self.sets {
            s.pending.clear();
            s.dirty = false;
        }
        self.dynamic.clear();
        self.push_constants.clear();
        self.push_stages = vk::ShaderStageFlags::empty();
        self.push_dirty = false;
    }

    //----------------------------------------------------------------------------------------------
    // Mutations

    pub fn set_buffer(&mut self, path: BindingPath, buffer: BufferHandle, offset: u64) {
        let slot = (path.set(), path.binding());
        match self.dynamic.get_mut(&slot) {
            Some(track) if track.buffer == buffer => {
                if track.last_offset != offset {
                    track.dynamic = true;
                }
                track.last_offset = offset;
            }
            _ => {
                self.dynamic.insert(
                    slot,
                    DynamicTrack {
                        buffer,
                        last_offset: offset,
                        dynamic: false,
                    },
                );
            }
        }
        let state = self.set_state(path.set());
        state.pending.insert(
            path.binding() as u32,
            Pending::Buffer { buffer, offset },
        );
        state.dirty = true;
    }

    /// An offset-only rebind: the strongest dynamic-buffer signal.
    pub fn set_buffer_offset(&mut self, path: BindingPath, offset: u64) {
        let slot = (path.set(), path.binding());
        let buffer = match self.dynamic.get_mut(&slot) {
            Some(track) => {
                if track.last_offset != offset {
                    track.dynamic = true;
                }
                track.last_offset = offset;
                track.buffer
            }
            None => panic!("set_buffer_offset without a bound buffer at {:?}", path),
        };
        let state = self.set_state(path.set());
        state.pending.insert(
            path.binding() as u32,
            Pending::Buffer { buffer, offset },
        );
        state.dirty = true;
    }

    pub fn set_texture(&mut self, path: BindingPath, texture: TextureHandle) {
        let state = self.set_state(path.set());
        state
            .pending
            .insert(path.binding() as u32, Pending::Texture { texture });
        state.dirty = true;
    }

    pub fn set_sampler(&mut self, path: BindingPath, descriptor: SamplerDescriptor) {
        let state = self.set_state(path.set());
        state
            .pending
            .insert(path.binding() as u32, Pending::Sampler(descriptor));
        state.dirty = true;
    }

    /// Raw bytes: push constants for the reserved set, otherwise a transient
    /// uniform slice carved at flush time.
    pub fn set_bytes(&mut self, path: BindingPath, bytes: &[u8], reflection: &PipelineReflection) {
        if path.is_push_constant() {
            if let Some(arg) = reflection.argument_reflection(path) {
                let end = (arg.byte_offset + arg.byte_size).max(arg.byte_offset + bytes.len() as u32);
                if self.push_constants.len() < end as usize {
                    self.push_constants.resize(end as usize, 0);
                }
                let start = arg.byte_offset as usize;
                self.push_constants[start..start + bytes.len()].copy_from_slice(bytes);
                self.push_stages |= arg.stages;
                self.push_dirty = true;
            } else {
                warn!("set_bytes to unknown push constant {:?}", path);
            }
            return;
        }
        let state = self.set_state(path.set());
        state
            .pending
            .insert(path.binding() as u32, Pending::Bytes(bytes.to_vec()));
        state.dirty = true;
    }

    /// Per-set dynamic-buffer bitmasks, as reported to the layout cache.
    pub fn dynamic_masks(&self) -> SmallVec<[u64; 8]> {
        let mut masks: SmallVec<[u64; 8]> = SmallVec::new();
        for ((set, binding), track) in &self.dynamic {
            if track.dynamic && *binding < 64 && !BindingPath::pack(*set, *binding, 0).is_push_constant() {
                let set = *set as usize;
                while masks.len() <= set {
                    masks.push(0);
                }
                masks[set] |= 1 << binding;
            }
        }
        masks
    }

    //----------------------------------------------------------------------------------------------
    // Flush

    /// Writes and binds a transient descriptor set for every dirty set, then
    /// pushes constants. Called by the encoders before each draw/dispatch.
    #[allow(clippy::too_many_arguments)]
    pub fn flush(
        &mut self,
        device: &ash::Device,
        allocator: &dyn DeviceMemoryAllocator,
        registry: &mut Registry,
        reflection: &mut PipelineReflection,
        pools: &mut DescriptorPoolSet,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) -> Result<()> {
        let masks = self.dynamic_masks();
        for set_index in 0..self.sets.len() {
            if !self.sets[set_index].dirty {
                continue;
            }
            self.sets[set_index].dirty = false;
            let mask = masks.get(set_index).copied().unwrap_or(0);
            let set_layout = reflection.set_layout(device, set_index as u32, mask)?;
            let set = pools.allocate(device, set_layout)?;

            let mut buffer_infos: SmallVec<[vk::DescriptorBufferInfo; 16]> = SmallVec::new();
            let mut image_infos: SmallVec<[vk::DescriptorImageInfo; 16]> = SmallVec::new();
            struct PlannedWrite {
                binding: u32,
                ty: vk::DescriptorType,
                buffer_index: Option<usize>,
                image_index: Option<usize>,
            }
            let mut planned: Vec<PlannedWrite> = Vec::new();
            let mut dynamic_offsets: SmallVec<[(u32, u32); 8]> = SmallVec::new();

            let pending = std::mem::take(&mut self.sets[set_index].pending);
            let mut ordered: Vec<(&u32, &Pending)> = pending.iter().collect();
            ordered.sort_by_key(|(b, _)| **b);

            for (&binding, entry) in ordered {
                let path = BindingPath::pack(set_index as u16, binding as u16, 0);
                let arg = match reflection.argument_reflection(path) {
                    Some(a) => a,
                    None => {
                        trace!("binding {:?} is inactive in the current pipeline", path);
                        continue;
                    }
                };
                let dynamic = binding < 64 && (mask >> binding) & 1 == 1;
                let ty = match descriptor_type(arg.resource_type, dynamic) {
                    Some(t) => t,
                    None => continue,
                };
                match entry {
                    Pending::Buffer { buffer, offset } => {
                        let backing = registry
                            .buffer(*buffer)
                            .expect("draw-time binding of an unmaterialized buffer");
                        if dynamic {
                            buffer_infos.push(vk::DescriptorBufferInfo {
                                buffer: backing.raw,
                                offset: 0,
                                range: vk::WHOLE_SIZE,
                            });
                            dynamic_offsets.push((binding, *offset as u32));
                        } else {
                            buffer_infos.push(vk::DescriptorBufferInfo {
                                buffer: backing.raw,
                                offset: *offset,
                                range: vk::WHOLE_SIZE,
                            });
                        }
                        planned.push(PlannedWrite {
                            binding,
                            ty,
                            buffer_index: Some(buffer_infos.len() - 1),
                            image_index: None,
                        });
                    }
                    Pending::Bytes(bytes) => {
                        let slice =
                            registry
                                .temporary
                                .allocate(device, allocator, bytes.len() as u64, 256)?;
                        unsafe {
                            std::ptr::copy_nonoverlapping(bytes.as_ptr(), slice.ptr, bytes.len());
                        }
                        buffer_infos.push(vk::DescriptorBufferInfo {
                            buffer: slice.buffer,
                            offset: slice.offset,
                            range: bytes.len() as u64,
                        });
                        planned.push(PlannedWrite {
                            binding,
                            ty,
                            buffer_index: Some(buffer_infos.len() - 1),
                            image_index: None,
                        });
                    }
                    Pending::Texture { texture } => {
                        let format = registry
                            .texture_descriptor(*texture)
                            .map(|d| (d.format.to_vk(), d.format.aspect_mask()));
                        let backing = registry
                            .image_mut(*texture)
                            .expect("draw-time binding of an unmaterialized texture");
                        let (format, aspect) = format.unwrap_or((
                            backing.alloc_desc.format,
                            vk::ImageAspectFlags::COLOR,
                        ));
                        let view = backing.view(
                            device,
                            ImageViewKey {
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
                            image_layout: match arg.category {
                                ResourceCategory::Texture
                                    if ty == vk::DescriptorType::STORAGE_IMAGE =>
                                {
                                    vk::ImageLayout::GENERAL
                                }
                                _ if ty == vk::DescriptorType::INPUT_ATTACHMENT => {
                                    vk::ImageLayout::GENERAL
                                }
                                _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            },
                        });
                        planned.push(PlannedWrite {
                            binding,
                            ty,
                            buffer_index: None,
                            image_index: Some(image_infos.len() - 1),
                        });
                    }
                    Pending::Sampler(desc) => {
                        let sampler = registry.samplers.get_or_create(device, desc)?;
                        image_infos.push(vk::DescriptorImageInfo {
                            sampler,
                            image_view: vk::ImageView::null(),
                            image_layout: vk::ImageLayout::UNDEFINED,
                        });
                        planned.push(PlannedWrite {
                            binding,
                            ty,
                            buffer_index: None,
                            image_index: Some(image_infos.len() - 1),
                        });
                    }
                }
            }

            let writes: Vec<vk::WriteDescriptorSet> = planned
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
            if writes.is_empty() {
                continue;
            }
            unsafe {
                device.update_descriptor_sets(&writes, &[]);
            }

            // dynamic offsets go in binding order
            dynamic_offsets.sort_by_key(|&(b, _)| b);
            let offsets: SmallVec<[u32; 8]> = dynamic_offsets.iter().map(|&(_, o)| o).collect();
            unsafe {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    bind_point,
                    layout,
                    set_index as u32,
                    &[set],
                    &offsets,
                );
            }
        }

        if self.push_dirty {
            self.push_dirty = false;
            unsafe {
                device.cmd_push_constants(
                    command_buffer,
                    layout,
                    self.push_stages,
                    0,
                    &self.push_constants,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_with_new_offset_marks_dynamic() {
        let mut m = BindingManager::new();
        let path = BindingPath::pack(0, 2, 0);
        m.set_buffer(path, BufferHandle(1), 0);
        assert!(m.dynamic_masks().is_empty() || m.dynamic_masks()[0] == 0);
        m.set_buffer(path, BufferHandle(1), 256);
        assert_eq!(m.dynamic_masks()[0], 1 << 2);
    }

    #[test]
    fn rebinding_same_offset_stays_static() {
        let mut m = BindingManager::new();
        let path = BindingPath::pack(1, 0, 0);
        m.set_buffer(path, BufferHandle(1), 64);
        m.set_buffer(path, BufferHandle(1), 64);
        let masks = m.dynamic_masks();
        assert!(masks.iter().all(|&m| m == 0));
    }

    #[test]
    fn different_buffer_resets_history() {
        let mut m = BindingManager::new();
        let path = BindingPath::pack(0, 0, 0);
        m.set_buffer(path, BufferHandle(1), 0);
        // a different buffer at a different offset is not a dynamic pattern
        m.set_buffer(path, BufferHandle(2), 128);
        let masks = m.dynamic_masks();
        assert!(masks.iter().all(|&m| m == 0));
        // the new buffer moving afterwards is
        m.set_buffer(path, BufferHandle(2), 256);
        assert_eq!(m.dynamic_masks()[0], 1);
    }

    #[test]
    fn begin_pass_clears_history() {
        let mut m = BindingManager::new();
        let path = BindingPath::pack(0, 1, 0);
        m.set_buffer(path, BufferHandle(1), 0);
        m.set_buffer(path, BufferHandle(1), 512);
        assert_eq!(m.dynamic_masks()[0], 1 << 1);
        m.begin_pass();
        assert!(m.dynamic_masks().is_empty());
    }
}
