//! Command encoders and the resource-command emitter.
//!
//! One encoder is live at a time; it owns the translation of abstract
//! commands into one Vulkan command buffer. Resource ops scheduled around
//! each command index are executed here too, against the same command
//! buffer.
mod blit;
mod compute;
mod render;

pub use self::blit::BlitEncoder;
pub use self::compute::ComputeEncoder;
pub use self::render::RenderEncoder;

use crate::binding::{BindingManager, DescriptorPoolSet};
use crate::commands::{Command, PassRecord, ResourceUsageTable};
use crate::device::Device;
use crate::error::Result;
use crate::memory::DeviceMemoryAllocator;
use crate::pipeline::PipelineCache;
use crate::registry::Registry;
use crate::resource_commands::{Barrier, ResourceOp, TextureBarrier};
use crate::shader::ShaderLibrary;
use crate::sync::{CommandBufferResources, EventPool, SemaphorePool};
use ash::vk;

/// Everything the encoders borrow from the backend for the duration of one
/// frame's encoding. All of it lives on the planner thread.
pub struct EncodeCtx<'a> {
    pub device: &'a Device,
    pub allocator: &'a dyn DeviceMemoryAllocator,
    pub registry: &'a mut Registry,
    pub library: &'a mut ShaderLibrary,
    pub pipelines: &'a mut PipelineCache,
    pub descriptor_pools: &'a mut DescriptorPoolSet,
    pub bindings: &'a mut BindingManager,
    pub semaphores: &'a mut SemaphorePool,
    pub events: &'a mut EventPool,
    pub usages: &'a ResourceUsageTable,
    pub passes: &'a [PassRecord],
    pub commands: &'a [Command],
}

//--------------------------------------------------------------------------------------------------
// Resource command emission

/// Executes one scheduled resource op against the active command buffer.
pub fn execute_resource_op(
    ctx: &mut EncodeCtx,
    record: &mut CommandBufferResources,
    op: ResourceOp,
) -> Result<()> {
    let device = &ctx.device.raw;
    match op {
        ResourceOp::MaterializeBuffer {
            buffer,
            usage,
            sharing_mode,
        } => {
            let backing = ctx.registry.materialize_buffer(
                device,
                ctx.allocator,
                buffer,
                usage,
                sharing_mode,
            )?;
            if let Some(sem) = backing.take_wait_semaphore() {
                record.add_wait_semaphore(sem, vk::PipelineStageFlags::TOP_OF_PIPE);
                record.recycle_semaphores.push(sem);
            }
            // flush host writes that were staged before materialization
            if let Some(copy) = ctx
                .registry
                .take_deferred_upload(device, ctx.allocator, buffer)?
            {
                let region = vk::BufferCopy {
                    src_offset: copy.src_offset,
                    dst_offset: copy.dst_offset,
                    size: copy.size,
                };
                unsafe {
                    device.cmd_copy_buffer(record.command_buffer, copy.src, copy.dst, &[region]);
                    let barrier = vk::BufferMemoryBarrier {
                        src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                        dst_access_mask: vk::AccessFlags::MEMORY_READ,
                        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        buffer: copy.dst,
                        offset: copy.dst_offset,
                        size: copy.size,
                        ..Default::default()
                    };
                    device.cmd_pipeline_barrier(
                        record.command_buffer,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
            }
        }
        ResourceOp::MaterializeTexture {
            texture,
            usage,
            sharing_mode,
            dst_stage_mask,
            barrier,
        } => {
            materialize_texture(
                ctx,
                record,
                texture,
                usage,
                sharing_mode,
                dst_stage_mask,
                barrier,
            )?;
        }
        ResourceOp::DisposeBuffer { buffer } => {
            ctx.registry.dispose_buffer(buffer);
        }
        ResourceOp::DisposeTexture { texture } => {
            ctx.registry.dispose_texture(texture);
        }
        ResourceOp::SignalEvent { id, stages } => {
            let event = ctx
                .events
                .for_id(device, record.queue_family, id)?;
            unsafe {
                device.cmd_set_event(record.command_buffer, event, stages);
            }
        }
        ResourceOp::WaitForEvent {
            id,
            src_stages,
            dst_stages,
            barrier,
        } => {
            let event = ctx
                .events
                .for_id(device, record.queue_family, id)?;
            let mut image_barriers = Vec::new();
            let mut buffer_barriers = Vec::new();
            if let Some(b) = barrier {
                build_barrier(ctx, b, &mut image_barriers, &mut buffer_barriers);
            }
            unsafe {
                device.cmd_wait_events(
                    record.command_buffer,
                    &[event],
                    src_stages,
                    dst_stages,
                    &[],
                    &buffer_barriers,
                    &image_barriers,
                );
            }
            if let Some(b) = barrier {
                commit_barrier_layout(ctx, b);
            }
            // the pairing id is consumed; the event itself returns to the
            // pool once this submission retires
            if let Some(event) = ctx.events.take_id(record.queue_family, id) {
                record.recycle_events.push((record.queue_family, event));
            }
        }
        ResourceOp::SignalSemaphore { id } => {
            let sem = ctx.semaphores.for_id(device, id)?;
            record.add_signal_semaphore(sem);
        }
        ResourceOp::WaitForSemaphore { id, stages } => {
            let sem = ctx.semaphores.for_id(device, id)?;
            record.add_wait_semaphore(sem, stages);
            if ctx.semaphores.take_id(id).is_some() {
                record.recycle_semaphores.push(sem);
            }
        }
        ResourceOp::PipelineBarrier {
            src_stages,
            dst_stages,
            barrier,
        } => {
            let mut image_barriers = Vec::new();
            let mut buffer_barriers = Vec::new();
            build_barrier(ctx, barrier, &mut image_barriers, &mut buffer_barriers);
            unsafe {
                device.cmd_pipeline_barrier(
                    record.command_buffer,
                    src_stages,
                    dst_stages,
                    vk::DependencyFlags::empty(),
                    &[],
                    &buffer_barriers,
                    &image_barriers,
                );
            }
            commit_barrier_layout(ctx, barrier);
        }
        ResourceOp::StoreResource {
            resource,
            final_layout,
            stages: _,
        } => {
            let sem = ctx.semaphores.allocate(device)?;
            record.add_signal_semaphore(sem);
            match resource {
                crate::resource::ResourceHandle::Texture(t) => {
                    let img = ctx
                        .registry
                        .image_mut(t)
                        .expect("storing an unmaterialized texture");
                    img.initialized = true;
                    img.wait_semaphore = Some(sem);
                    if let Some(layout) = final_layout {
                        img.layout = layout;
                    }
                }
                crate::resource::ResourceHandle::Buffer(b) => {
                    let buf = ctx
                        .registry
                        .buffer_mut(b)
                        .expect("storing an unmaterialized buffer");
                    buf.initialized = true;
                    buf.wait_semaphore = Some(sem);
                }
            }
        }
    }
    Ok(())
}

fn materialize_texture(
    ctx: &mut EncodeCtx,
    record: &mut CommandBufferResources,
    texture: crate::resource::TextureHandle,
    usage: vk::ImageUsageFlags,
    sharing_mode: vk::SharingMode,
    dst_stage_mask: vk::PipelineStageFlags,
    barrier: Option<TextureBarrier>,
) -> Result<()> {
    let device = &ctx.device.raw;
    let uploads = ctx.registry.take_texture_uploads(texture);
    let backing =
        ctx.registry
            .materialize_texture(device, ctx.allocator, texture, usage, sharing_mode)?;
    if let Some(sem) = backing.take_wait_semaphore() {
        record.add_wait_semaphore(sem, dst_stage_mask | vk::PipelineStageFlags::TOP_OF_PIPE);
        record.recycle_semaphores.push(sem);
    }

    // scheduled region uploads run before the command's own transition
    if !uploads.is_empty() {
        let aspect = vk::ImageAspectFlags::COLOR;
        let old_layout = backing.layout;
        let to_transfer = vk::ImageMemoryBarrier {
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: backing.raw,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
            ..Default::default()
        };
        unsafe {
            device.cmd_pipeline_barrier(
                record.command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            for up in &uploads {
                let region = vk::BufferImageCopy {
                    buffer_offset: up.staging_offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: up.mip_level,
                        base_array_layer: up.slice,
                        layer_count: 1,
                    },
                    image_offset: up.region_offset,
                    image_extent: up.region_extent,
                };
                device.cmd_copy_buffer_to_image(
                    record.command_buffer,
                    up.staging_buffer,
                    backing.raw,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }
        backing.layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        backing.initialized = true;
    }

    let barrier = match barrier {
        Some(b) => b,
        None => return Ok(()),
    };
    if barrier.new_layout == vk::ImageLayout::UNDEFINED
        || barrier.new_layout == vk::ImageLayout::PREINITIALIZED
        || backing.layout == barrier.new_layout
    {
        return Ok(());
    }
    // a pre-initialized source keeps its layout name; everything else
    // transitions from whatever the registry last recorded
    let old_layout = backing.layout;
    let image_barrier = vk::ImageMemoryBarrier {
        src_access_mask: barrier.src_access,
        dst_access_mask: barrier.dst_access,
        old_layout,
        new_layout: barrier.new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: backing.raw,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: if backing.alloc_desc.usage
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            },
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        },
        ..Default::default()
    };
    unsafe {
        device.cmd_pipeline_barrier(
            record.command_buffer,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[image_barrier],
        );
    }
    backing.layout = barrier.new_layout;
    Ok(())
}

fn build_barrier(
    ctx: &mut EncodeCtx,
    barrier: Barrier,
    image_barriers: &mut Vec<vk::ImageMemoryBarrier>,
    buffer_barriers: &mut Vec<vk::BufferMemoryBarrier>,
) {
    match barrier {
        Barrier::Image {
            texture,
            old_layout,
            new_layout,
            src_access,
            dst_access,
        } => {
            let backing = ctx
                .registry
                .image(texture)
                .expect("barrier on an unmaterialized texture");
            // the registry's view of the layout wins over the planned one
            let old_layout = if backing.layout != vk::ImageLayout::UNDEFINED {
                backing.layout
            } else {
                old_layout
            };
            image_barriers.push(vk::ImageMemoryBarrier {
                src_access_mask: src_access,
                dst_access_mask: dst_access,
                old_layout,
                new_layout,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image: backing.raw,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: if backing
                        .alloc_desc
                        .usage
                        .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                    {
                        vk::ImageAspectFlags::DEPTH
                    } else {
                        vk::ImageAspectFlags::COLOR
                    },
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                },
                ..Default::default()
            });
        }
        Barrier::Buffer {
            buffer,
            src_access,
            dst_access,
            offset,
            size,
        } => {
            let backing = ctx
                .registry
                .buffer(buffer)
                .expect("barrier on an unmaterialized buffer");
            buffer_barriers.push(vk::BufferMemoryBarrier {
                src_access_mask: src_access,
                dst_access_mask: dst_access,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                buffer: backing.raw,
                offset,
                size,
                ..Default::default()
            });
        }
    }
}

fn commit_barrier_layout(ctx: &mut EncodeCtx, barrier: Barrier) {
    if let Barrier::Image {
        texture,
        new_layout,
        ..
    } = barrier
    {
        if let Some(backing) = ctx.registry.image_mut(texture) {
            backing.layout = new_layout;
        }
    }
}
