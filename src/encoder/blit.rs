//! The blit encoder: copies and fills on a transfer command buffer.
use super::EncodeCtx;
use crate::commands::Command;
use crate::error::Result;
use crate::sync::CommandBufferResources;
use ash::vk;

pub struct BlitEncoder;

impl BlitEncoder {
    pub fn begin() -> BlitEncoder {
        BlitEncoder
    }

    pub fn execute_command(
        &mut self,
        ctx: &mut EncodeCtx,
        record: &mut CommandBufferResources,
        command: &Command,
    ) -> Result<()> {
        let device = &ctx.device.raw;
        match command {
            Command::CopyBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => {
                let src = ctx
                    .registry
                    .buffer(*source)
                    .expect("copy from an unmaterialized buffer")
                    .raw;
                let dst = ctx
                    .registry
                    .buffer(*destination)
                    .expect("copy to an unmaterialized buffer")
                    .raw;
                let region = vk::BufferCopy {
                    src_offset: *source_offset,
                    dst_offset: *destination_offset,
                    size: *size,
                };
                unsafe {
                    device.cmd_copy_buffer(record.command_buffer, src, dst, &[region]);
                }
            }
            Command::CopyBufferToTexture {
                source,
                source_offset,
                bytes_per_row,
                destination,
                mip_level,
                slice,
            } => {
                let src = ctx
                    .registry
                    .buffer(*source)
                    .expect("copy from an unmaterialized buffer")
                    .raw;
                let dst = ctx
                    .registry
                    .image(*destination)
                    .expect("copy to an unmaterialized texture");
                assert_eq!(
                    dst.layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    "blit destination is not in transfer layout"
                );
                let extent = dst.alloc_desc.extent;
                let row_length = if *bytes_per_row == 0 {
                    0
                } else {
                    bytes_per_row / crate::format::bytes_per_texel(dst.alloc_desc.format)
                };
                let region = vk::BufferImageCopy {
                    buffer_offset: *source_offset,
                    buffer_row_length: row_length,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: *mip_level,
                        base_array_layer: *slice,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width: (extent.width >> mip_level).max(1),
                        height: (extent.height >> mip_level).max(1),
                        depth: 1,
                    },
                };
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        record.command_buffer,
                        src,
                        dst.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            Command::CopyTexture {
                source,
                source_mip,
                source_slice,
                destination,
                destination_mip,
                destination_slice,
            } => {
                let src = ctx
                    .registry
                    .image(*source)
                    .expect("copy from an unmaterialized texture");
                let dst = ctx
                    .registry
                    .image(*destination)
                    .expect("copy to an unmaterialized texture");
                let extent = vk::Extent3D {
                    width: (src.alloc_desc.extent.width >> source_mip).max(1),
                    height: (src.alloc_desc.extent.height >> source_mip).max(1),
                    depth: 1,
                };
                let region = vk::ImageCopy {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: *source_mip,
                        base_array_layer: *source_slice,
                        layer_count: 1,
                    },
                    src_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: *destination_mip,
                        base_array_layer: *destination_slice,
                        layer_count: 1,
                    },
                    dst_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    extent,
                };
                unsafe {
                    device.cmd_copy_image(
                        record.command_buffer,
                        src.raw,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            Command::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => {
                let raw = ctx
                    .registry
                    .buffer(*buffer)
                    .expect("fill of an unmaterialized buffer")
                    .raw;
                let word = u32::from_ne_bytes([*value; 4]);
                unsafe {
                    device.cmd_fill_buffer(record.command_buffer, raw, *offset, *size, word);
                }
            }

            Command::PushDebugGroup { label } | Command::InsertDebugSignpost { label } => {
                trace!("debug marker: {}", label);
            }
            Command::PopDebugGroup => {}
            Command::SetLabel { label } => {
                trace!("label: {}", label);
            }

            other => panic!("command not valid in a blit pass: {:?}", other),
        }
        Ok(())
    }
}
