//! The render encoder: draw passes inside one render-target group.
use super::EncodeCtx;
use crate::commands::{ClearValue, Command};
use crate::desc::*;
use crate::error::Result;
use crate::image::ImageViewKey;
use crate::path::BindingPath;
use crate::pipeline::GraphicsPipelineKey;
use crate::render_target::RenderTargetDescriptor;
use crate::resource::BufferHandle;
use crate::shader::FunctionKey;
use crate::sync::CommandBufferResources;
use ash::vk;
use fxhash::FxHashMap;

pub struct RenderEncoder {
    descriptor: RenderTargetDescriptor,
    group_len: usize,
    passes_encoded: usize,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    subpass: u32,

    // pipeline state machine: any setter flips `changed`
    pipeline_desc: Option<RenderPipelineDescriptor>,
    depth_stencil: DepthStencilDescriptor,
    topology: PrimitiveTopology,
    cull_mode: CullMode,
    depth_clip_mode: DepthClipMode,
    winding: Winding,
    changed: bool,
    current_layout: vk::PipelineLayout,

    vertex_buffers: FxHashMap<u32, (BufferHandle, u64)>,
    vertex_dirty: bool,
}

impl RenderEncoder {
    /// Opens the render-target group: materializes the attachments, builds
    /// the render pass and framebuffer, begins the pass and sets default
    /// dynamic state.
    pub fn begin(
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        descriptor: RenderTargetDescriptor,
        group_len: usize,
    ) -> Result<RenderEncoder> {
        let device = &ctx.device.raw;

        // attachments must be backed before the framebuffer exists
        let mut views = Vec::with_capacity(descriptor.attachments.len());
        for att in &descriptor.attachments {
            let declared_usage = ctx
                .registry
                .texture_descriptor(att.binding.texture)
                .map(|d| d.usage.to_vk())
                .unwrap_or_default();
            let usage = declared_usage
                | if att.is_depth_stencil {
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                };
            let backing = ctx.registry.materialize_texture(
                device,
                ctx.allocator,
                att.binding.texture,
                usage,
                vk::SharingMode::EXCLUSIVE,
            )?;
            if let Some(sem) = backing.take_wait_semaphore() {
                record.add_wait_semaphore(
                    sem,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                );
                record.recycle_semaphores.push(sem);
            }
            let view = backing.view(
                device,
                ImageViewKey {
                    aspect: att.format.aspect_mask(),
                    base_mip: att.binding.mip_level,
                    mip_count: 1,
                    base_layer: att.binding.slice,
                    layer_count: 1,
                    format: att.format.to_vk(),
                },
            )?;
            views.push(view);
        }

        let render_pass = crate::render_pass::build_render_pass(device, &descriptor)?;
        let framebuffer =
            crate::render_pass::build_framebuffer(device, render_pass, &descriptor, &views)?;
        record.render_passes.push(render_pass);
        record.framebuffers.push(framebuffer);

        // clear values follow attachment order: depth/stencil first
        let clear_values: Vec<vk::ClearValue> = descriptor
            .attachments
            .iter()
            .map(|a| {
                a.clear_value
                    .unwrap_or(ClearValue::Color([0.0; 4]))
                    .to_vk()
            })
            .collect();

        let begin_info = vk::RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: descriptor.extent.0,
                    height: descriptor.extent.1,
                },
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            device.cmd_begin_render_pass(
                record.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        let mut encoder = RenderEncoder {
            descriptor,
            group_len,
            passes_encoded: 0,
            render_pass,
            framebuffer,
            subpass: 0,
            pipeline_desc: None,
            depth_stencil: DepthStencilDescriptor::default(),
            topology: PrimitiveTopology::Triangle,
            cull_mode: CullMode::None,
            depth_clip_mode: DepthClipMode::Clip,
            winding: Winding::CounterClockwise,
            changed: true,
            current_layout: vk::PipelineLayout::null(),
            vertex_buffers: FxHashMap::default(),
            vertex_dirty: false,
        };
        encoder.set_default_dynamic_state(ctx, record);
        ctx.bindings.begin_pass();
        Ok(encoder)
    }

    fn set_default_dynamic_state(&self, ctx: &EncodeCtx, record: &CommandBufferResources) {
        let device = &ctx.device.raw;
        let (w, h) = self.descriptor.extent;
        unsafe {
            // flipped viewport: maintenance1 semantics, y points up
            device.cmd_set_viewport(
                record.command_buffer,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: h as f32,
                    width: w as f32,
                    height: -(h as f32),
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                record.command_buffer,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: w,
                        height: h,
                    },
                }],
            );
            device.cmd_set_stencil_reference(
                record.command_buffer,
                vk::StencilFaceFlags::FRONT_AND_BACK,
                0,
            );
            device.cmd_set_depth_bias(record.command_buffer, 0.0, 0.0, 0.0);
            device.cmd_set_blend_constants(record.command_buffer, &[0.0; 4]);
        }
    }

    fn function_key(&self) -> FunctionKey {
        let desc = self
            .pipeline_desc
            .as_ref()
            .expect("draw without a render pipeline descriptor");
        FunctionKey::Graphics {
            vertex: desc.vertex_function.clone(),
            fragment: desc.fragment_function.clone(),
        }
    }

    /// Rebuilds and binds the pipeline if any keyed state changed, then
    /// flushes bindings and vertex buffers.
    fn prepare_draw(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
    ) -> Result<()> {
        let device = &ctx.device.raw;
        let key_fn = self.function_key();
        let masks = ctx.bindings.dynamic_masks();
        let layout = ctx
            .library
            .pipeline_layout_for(device, &key_fn, &masks)?;

        if self.changed || layout != self.current_layout {
            let desc = self.pipeline_desc.clone().unwrap();
            let key = GraphicsPipelineKey {
                descriptor: desc,
                depth_stencil: self.depth_stencil,
                topology: self.topology,
                cull_mode: self.cull_mode,
                depth_clip_mode: self.depth_clip_mode,
                winding: self.winding,
                layout,
                render_targets: self.descriptor.signature(),
                subpass: self.subpass,
            };
            let pipeline = ctx.pipelines.graphics_pipeline(
                device,
                ctx.device.pipeline_cache,
                ctx.library,
                &key,
                self.render_pass,
            )?;
            unsafe {
                device.cmd_bind_pipeline(
                    record.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline,
                );
            }
            self.changed = false;
            self.current_layout = layout;
        }

        let reflection = ctx.library.reflection_for(&key_fn)?;
        ctx.bindings.flush(
            device,
            ctx.allocator,
            ctx.registry,
            reflection,
            ctx.descriptor_pools,
            record.command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            self.current_layout,
        )?;

        if self.vertex_dirty {
            self.vertex_dirty = false;
            let mut slots: Vec<(&u32, &(BufferHandle, u64))> = self.vertex_buffers.iter().collect();
            slots.sort_by_key(|(i, _)| **i);
            for (&slot, &(buffer, offset)) in slots {
                let backing = ctx
                    .registry
                    .buffer(buffer)
                    .expect("drawing with an unmaterialized vertex buffer");
                unsafe {
                    device.cmd_bind_vertex_buffers(
                        record.command_buffer,
                        slot,
                        &[backing.raw],
                        &[offset],
                    );
                }
            }
        }
        Ok(())
    }

    pub fn execute_command(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        command: &Command,
    ) -> Result<()> {
        match command {
            Command::SetRenderPipelineDescriptor(desc) => {
                if self.pipeline_desc.as_ref() != Some(desc) {
                    self.pipeline_desc = Some(desc.clone());
                    self.changed = true;
                }
            }
            Command::SetDepthStencilDescriptor(desc) => {
                if self.depth_stencil != *desc {
                    self.depth_stencil = *desc;
                    self.changed = true;
                }
            }
            Command::SetCullMode(mode) => {
                if self.cull_mode != *mode {
                    self.cull_mode = *mode;
                    self.changed = true;
                }
            }
            Command::SetFrontFacing(winding) => {
                if self.winding != *winding {
                    self.winding = *winding;
                    self.changed = true;
                }
            }
            Command::SetDepthClipMode(mode) => {
                if self.depth_clip_mode != *mode {
                    self.depth_clip_mode = *mode;
                    self.changed = true;
                }
            }
            Command::SetViewport(v) => unsafe {
                ctx.device.raw.cmd_set_viewport(
                    record.command_buffer,
                    0,
                    &[vk::Viewport {
                        x: v.x,
                        y: v.y + v.height,
                        width: v.width,
                        height: -v.height,
                        min_depth: v.min_depth,
                        max_depth: v.max_depth,
                    }],
                );
            },
            Command::SetScissor(rect) => unsafe {
                ctx.device.raw.cmd_set_scissor(record.command_buffer, 0, &[rect.to_vk()]);
            },
            Command::SetDepthBias {
                bias,
                clamp,
                slope_scale,
            } => unsafe {
                ctx.device.raw.cmd_set_depth_bias(record.command_buffer, *bias, *clamp, *slope_scale);
            },
            Command::SetStencilReference { front, back } => unsafe {
                let device = &ctx.device.raw;
                if front == back {
                    device.cmd_set_stencil_reference(
                        record.command_buffer,
                        vk::StencilFaceFlags::FRONT_AND_BACK,
                        *front,
                    );
                } else {
                    device.cmd_set_stencil_reference(
                        record.command_buffer,
                        vk::StencilFaceFlags::FRONT,
                        *front,
                    );
                    device.cmd_set_stencil_reference(
                        record.command_buffer,
                        vk::StencilFaceFlags::BACK,
                        *back,
                    );
                }
            },

            Command::SetVertexBuffer {
                index,
                buffer,
                offset,
            } => {
                match buffer {
                    Some(b) => {
                        self.vertex_buffers.insert(*index, (*b, *offset));
                    }
                    None => {
                        self.vertex_buffers.remove(index);
                    }
                }
                self.vertex_dirty = true;
            }
            Command::SetVertexBufferOffset { index, offset } => {
                let entry = self
                    .vertex_buffers
                    .get_mut(index)
                    .expect("vertex buffer offset without a bound buffer");
                entry.1 = *offset;
                self.vertex_dirty = true;
            }

            Command::SetBuffer {
                path,
                buffer,
                offset,
            } => ctx.bindings.set_buffer(*path, *buffer, *offset),
            Command::SetBufferOffset { path, offset } => {
                ctx.bindings.set_buffer_offset(*path, *offset)
            }
            Command::SetTexture { path, texture } => ctx.bindings.set_texture(*path, *texture),
            Command::SetSamplerState { path, descriptor } => {
                ctx.bindings.set_sampler(*path, *descriptor)
            }
            Command::SetBytes { path, bytes } => {
                let key_fn = self.function_key();
                let reflection = ctx.library.reflection_for(&key_fn)?;
                // split the borrow: bytes go through the manager
                let reflection = &*reflection;
                ctx.bindings.set_bytes(*path, bytes, reflection);
            }
            Command::SetArgumentBuffer {
                path,
                argument_buffer,
            } => {
                self.bind_argument_buffer(ctx, record, *path, *argument_buffer)?;
            }

            Command::DrawPrimitives {
                topology,
                vertex_start,
                vertex_count,
                instance_count,
                base_instance,
            } => {
                if self.topology != *topology {
                    self.topology = *topology;
                    self.changed = true;
                }
                self.prepare_draw(ctx, record)?;
                unsafe {
                    ctx.device.raw.cmd_draw(
                        record.command_buffer,
                        *vertex_count,
                        *instance_count,
                        *vertex_start,
                        *base_instance,
                    );
                }
            }
            Command::DrawIndexedPrimitives {
                topology,
                index_buffer,
                index_offset,
                index_type,
                index_count,
                instance_count,
                base_vertex,
                base_instance,
            } => {
                if self.topology != *topology {
                    self.topology = *topology;
                    self.changed = true;
                }
                self.prepare_draw(ctx, record)?;
                let device = &ctx.device.raw;
                let backing = ctx
                    .registry
                    .buffer(*index_buffer)
                    .expect("drawing with an unmaterialized index buffer");
                unsafe {
                    device.cmd_bind_index_buffer(
                        record.command_buffer,
                        backing.raw,
                        *index_offset,
                        index_type.to_vk(),
                    );
                    device.cmd_draw_indexed(
                        record.command_buffer,
                        *index_count,
                        *instance_count,
                        0,
                        *base_vertex,
                        *base_instance,
                    );
                }
            }

            Command::ClearRenderTargets => {
                // clears were folded into the attachment load ops
            }
            Command::PushDebugGroup { label } | Command::InsertDebugSignpost { label } => {
                trace!("debug marker: {}", label);
            }
            Command::PopDebugGroup => {}
            Command::SetLabel { label } => {
                trace!("label: {}", label);
            }

            other => panic!("command not valid in a draw pass: {:?}", other),
        }
        Ok(())
    }

    fn bind_argument_buffer(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        path: BindingPath,
        handle: crate::resource::ArgumentBufferHandle,
    ) -> Result<()> {
        let device = &ctx.device.raw;
        let key_fn = self.function_key();
        let set_index = path.set() as u32;
        let masks = ctx.bindings.dynamic_masks();
        let layout = ctx.library.pipeline_layout_for(device, &key_fn, &masks)?;
        let set_layout = ctx
            .library
            .reflection_for(&key_fn)?
            .set_layout(device, set_index, 0)?;
        let reflection = &*ctx.library.reflection_for(&key_fn)?;
        let set = ctx.registry.materialize_argument_buffer(
            device,
            handle,
            set_index,
            set_layout,
            reflection,
        )?;
        unsafe {
            device.cmd_bind_descriptor_sets(
                record.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    /// Closes the current subpass. Returns whether the encoder stays valid
    /// (true between subpasses, false once the group ended).
    pub fn end_pass(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
    ) -> Result<bool> {
        let device = &ctx.device.raw;
        self.passes_encoded += 1;
        if self.passes_encoded < self.group_len {
            unsafe {
                device.cmd_next_subpass(record.command_buffer, vk::SubpassContents::INLINE);
            }
            self.subpass += 1;
            self.changed = true;
            ctx.bindings.begin_pass();
            return Ok(true);
        }

        unsafe {
            device.cmd_end_render_pass(record.command_buffer);
        }
        // the render pass transitioned the attachments; commit the declared
        // final layouts to the registry
        for att in &self.descriptor.attachments {
            if let Some(backing) = ctx.registry.image_mut(att.binding.texture) {
                backing.layout = att.final_layout;
                if att.store_op == vk::AttachmentStoreOp::STORE {
                    backing.initialized = true;
                }
            }
        }
        Ok(false)
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}
