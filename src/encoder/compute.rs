//! The compute encoder.
use super::EncodeCtx;
use crate::commands::Command;
use crate::desc::{ComputePipelineDescriptor, Size};
use crate::error::Result;
use crate::path::BindingPath;
use crate::pipeline::ComputePipelineKey;
use crate::shader::FunctionKey;
use crate::sync::CommandBufferResources;
use ash::vk;

pub struct ComputeEncoder {
    pipeline_desc: Option<ComputePipelineDescriptor>,
    threads_per_threadgroup: Size,
    changed: bool,
    current_layout: vk::PipelineLayout,
}

impl ComputeEncoder {
    pub fn begin(ctx: &mut EncodeCtx) -> ComputeEncoder {
        ctx.bindings.begin_pass();
        ComputeEncoder {
            pipeline_desc: None,
            threads_per_threadgroup: Size::new(1, 1, 1),
            changed: true,
            current_layout: vk::PipelineLayout::null(),
        }
    }

    fn function_key(&self) -> FunctionKey {
        let desc = self
            .pipeline_desc
            .as_ref()
            .expect("dispatch without a compute pipeline descriptor");
        FunctionKey::Compute {
            function: desc.function.clone(),
        }
    }

    fn prepare_dispatch(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        threads_per_threadgroup: Size,
    ) -> Result<()> {
        let device = &ctx.device.raw;
        if self.threads_per_threadgroup != threads_per_threadgroup {
            self.threads_per_threadgroup = threads_per_threadgroup;
            self.changed = true;
        }
        let key_fn = self.function_key();
        let masks = ctx.bindings.dynamic_masks();
        let layout = ctx.library.pipeline_layout_for(device, &key_fn, &masks)?;

        if self.changed || layout != self.current_layout {
            let key = ComputePipelineKey {
                descriptor: self.pipeline_desc.clone().unwrap(),
                layout,
                threads_per_threadgroup: self.threads_per_threadgroup,
            };
            let pipeline = ctx.pipelines.compute_pipeline(
                device,
                ctx.device.pipeline_cache,
                ctx.library,
                &key,
            )?;
            unsafe {
                device.cmd_bind_pipeline(
                    record.command_buffer,
                    vk::PipelineBindPoint::COMPUTE,
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
            vk::PipelineBindPoint::COMPUTE,
            self.current_layout,
        )?;
        Ok(())
    }

    pub fn execute_command(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        command: &Command,
    ) -> Result<()> {
        match command {
            Command::SetComputePipelineDescriptor(desc) => {
                if self.pipeline_desc.as_ref() != Some(desc) {
                    self.pipeline_desc = Some(desc.clone());
                    self.changed = true;
                }
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
                let reflection = &*ctx.library.reflection_for(&key_fn)?;
                ctx.bindings.set_bytes(*path, bytes, reflection);
            }
            Command::SetArgumentBuffer {
                path,
                argument_buffer,
            } => {
                self.bind_argument_buffer(ctx, record, *path, *argument_buffer)?;
            }

            Command::DispatchThreads {
                threads,
                threads_per_threadgroup,
            } => {
                self.prepare_dispatch(ctx, record, *threads_per_threadgroup)?;
                // ceiling-divided threadgroup counts
                let gx = (threads.width + threads_per_threadgroup.width - 1)
                    / threads_per_threadgroup.width;
                let gy = (threads.height + threads_per_threadgroup.height - 1)
                    / threads_per_threadgroup.height;
                let gz = (threads.depth + threads_per_threadgroup.depth - 1)
                    / threads_per_threadgroup.depth;
                unsafe {
                    ctx.device.raw.cmd_dispatch(record.command_buffer, gx, gy, gz);
                }
            }
            Command::DispatchThreadgroups {
                threadgroups,
                threads_per_threadgroup,
            } => {
                self.prepare_dispatch(ctx, record, *threads_per_threadgroup)?;
                unsafe {
                    ctx.device.raw.cmd_dispatch(
                        record.command_buffer,
                        threadgroups.width,
                        threadgroups.height,
                        threadgroups.depth,
                    );
                }
            }
            Command::DispatchThreadgroupsIndirect {
                buffer,
                offset,
                threads_per_threadgroup,
            } => {
                self.prepare_dispatch(ctx, record, *threads_per_threadgroup)?;
                let backing = ctx
                    .registry
                    .buffer(*buffer)
                    .expect("indirect dispatch with an unmaterialized buffer");
                unsafe {
                    ctx.device.raw.cmd_dispatch_indirect(record.command_buffer, backing.raw, *offset);
                }
            }

            Command::PushDebugGroup { label } | Command::InsertDebugSignpost { label } => {
                trace!("debug marker: {}", label);
            }
            Command::PopDebugGroup => {}
            Command::SetLabel { label } => {
                trace!("label: {}", label);
            }

            other => panic!("command not valid in a compute pass: {:?}", other),
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
                vk::PipelineBindPoint::COMPUTE,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }
}
