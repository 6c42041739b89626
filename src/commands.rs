//! The planner → backend contract: pass records, the flat command stream,
//! and the per-resource usage table.
use crate::desc::*;
use crate::path::BindingPath;
use crate::resource::*;
use ash::vk;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::ops::Range;

//--------------------------------------------------------------------------------------------------
// Passes

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueClass {
    Graphics,
    Compute,
    Transfer,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(c) => vk::ClearValue {
                color: vk::ClearColorValue { float32: c },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// One attachment slot of a draw pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AttachmentBinding {
    pub texture: TextureHandle,
    pub mip_level: u32,
    pub slice: u32,
    /// A clear requested by the pass. Whether it becomes a load op depends on
    /// the attachment's state at group entry.
    pub clear: Option<ClearValue>,
}

/// The render-target configuration of a draw pass.
#[derive(Clone, Debug, Default)]
pub struct RenderTargets {
    pub label: Option<String>,
    pub color: SmallVec<[Option<AttachmentBinding>; 8]>,
    pub depth_stencil: Option<AttachmentBinding>,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

impl RenderTargets {
    /// Two passes can share a render pass when every slot binds the same
    /// texture sub-resource at the same resolution and sample count.
    pub fn compatible_with(&self, other: &RenderTargets) -> bool {
        if self.width != other.width
            || self.height != other.height
            || self.sample_count != other.sample_count
            || self.color.len() != other.color.len()
        {
            return false;
        }
        let same_slot = |a: &Option<AttachmentBinding>, b: &Option<AttachmentBinding>| match (a, b)
        {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a.texture == b.texture && a.mip_level == b.mip_level && a.slice == b.slice
            }
            _ => false,
        };
        self.color
            .iter()
            .zip(other.color.iter())
            .all(|(a, b)| same_slot(a, b))
            && same_slot(&self.depth_stencil, &other.depth_stencil)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &AttachmentBinding> {
        self.depth_stencil
            .iter()
            .chain(self.color.iter().flatten())
    }
}

#[derive(Clone, Debug)]
pub enum PassType {
    Draw(RenderTargets),
    Compute { label: Option<String> },
    Blit { label: Option<String> },
    External,
}

impl PassType {
    pub fn queue_class(&self) -> QueueClass {
        match self {
            PassType::Draw(_) | PassType::Compute { .. } | PassType::External => {
                QueueClass::Graphics
            }
            PassType::Blit { .. } => QueueClass::Transfer,
        }
    }
}

/// One entry of the per-frame pass list.
#[derive(Clone, Debug)]
pub struct PassRecord {
    pub pass_index: u32,
    pub kind: PassType,
    /// `[first, last)` slice into the frame's command stream.
    pub commands: Range<usize>,
}

//--------------------------------------------------------------------------------------------------
// Commands

#[derive(Clone, Debug)]
pub enum Command {
    // debug
    PushDebugGroup { label: String },
    PopDebugGroup,
    InsertDebugSignpost { label: String },
    SetLabel { label: String },

    // render targets
    ClearRenderTargets,

    // bindings
    SetVertexBuffer {
        index: u32,
        buffer: Option<BufferHandle>,
        offset: u64,
    },
    SetVertexBufferOffset {
        index: u32,
        offset: u64,
    },
    SetArgumentBuffer {
        path: BindingPath,
        argument_buffer: ArgumentBufferHandle,
    },
    SetBytes {
        path: BindingPath,
        bytes: Vec<u8>,
    },
    SetBuffer {
        path: BindingPath,
        buffer: BufferHandle,
        offset: u64,
    },
    SetBufferOffset {
        path: BindingPath,
        offset: u64,
    },
    SetTexture {
        path: BindingPath,
        texture: TextureHandle,
    },
    SetSamplerState {
        path: BindingPath,
        descriptor: SamplerDescriptor,
    },

    // draws
    DrawPrimitives {
        topology: PrimitiveTopology,
        vertex_start: u32,
        vertex_count: u32,
        instance_count: u32,
        base_instance: u32,
    },
    DrawIndexedPrimitives {
        topology: PrimitiveTopology,
        index_buffer: BufferHandle,
        index_offset: u64,
        index_type: IndexType,
        index_count: u32,
        instance_count: u32,
        base_vertex: i32,
        base_instance: u32,
    },

    // dispatches
    DispatchThreads {
        threads: Size,
        threads_per_threadgroup: Size,
    },
    DispatchThreadgroups {
        threadgroups: Size,
        threads_per_threadgroup: Size,
    },
    DispatchThreadgroupsIndirect {
        buffer: BufferHandle,
        offset: u64,
        threads_per_threadgroup: Size,
    },

    // dynamic state
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetFrontFacing(Winding),
    SetCullMode(CullMode),
    SetDepthBias {
        bias: f32,
        clamp: f32,
        slope_scale: f32,
    },
    SetDepthClipMode(DepthClipMode),
    SetDepthStencilDescriptor(DepthStencilDescriptor),
    SetStencilReference {
        front: u32,
        back: u32,
    },

    // pipelines
    SetRenderPipelineDescriptor(RenderPipelineDescriptor),
    SetComputePipelineDescriptor(ComputePipelineDescriptor),

    // blits
    CopyBuffer {
        source: BufferHandle,
        source_offset: u64,
        destination: BufferHandle,
        destination_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        source: BufferHandle,
        source_offset: u64,
        bytes_per_row: u32,
        destination: TextureHandle,
        mip_level: u32,
        slice: u32,
    },
    CopyTexture {
        source: TextureHandle,
        source_mip: u32,
        source_slice: u32,
        destination: TextureHandle,
        destination_mip: u32,
        destination_slice: u32,
    },
    FillBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        value: u8,
    },
}

//--------------------------------------------------------------------------------------------------
// Resource usage table

/// How a pass touches a resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UsageKind {
    ConstantBuffer,
    Read,
    ReadWrite,
    Write,
    InputAttachment,
    ColorAttachment,
    DepthStencilAttachment,
    VertexBuffer,
    IndexBuffer,
    IndirectBuffer,
    BlitSource,
    BlitDestination,
    Present,
}

impl UsageKind {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            UsageKind::Write
                | UsageKind::ReadWrite
                | UsageKind::ColorAttachment
                | UsageKind::DepthStencilAttachment
                | UsageKind::BlitDestination
        )
    }

    pub fn access_mask(self) -> vk::AccessFlags {
        match self {
            UsageKind::ConstantBuffer => vk::AccessFlags::UNIFORM_READ,
            UsageKind::Read => vk::AccessFlags::SHADER_READ,
            UsageKind::ReadWrite => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            UsageKind::Write => vk::AccessFlags::SHADER_WRITE,
            UsageKind::InputAttachment => vk::AccessFlags::INPUT_ATTACHMENT_READ,
            UsageKind::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            UsageKind::DepthStencilAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            UsageKind::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            UsageKind::IndexBuffer => vk::AccessFlags::INDEX_READ,
            UsageKind::IndirectBuffer => vk::AccessFlags::INDIRECT_COMMAND_READ,
            UsageKind::BlitSource => vk::AccessFlags::TRANSFER_READ,
            UsageKind::BlitDestination => vk::AccessFlags::TRANSFER_WRITE,
            UsageKind::Present => vk::AccessFlags::empty(),
        }
    }

    /// The layout a texture must be in to serve this usage.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            UsageKind::Read | UsageKind::ConstantBuffer => {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
            UsageKind::ReadWrite | UsageKind::Write => vk::ImageLayout::GENERAL,
            UsageKind::InputAttachment => vk::ImageLayout::GENERAL,
            UsageKind::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            UsageKind::DepthStencilAttachment => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            UsageKind::BlitSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            UsageKind::BlitDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            UsageKind::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            UsageKind::VertexBuffer | UsageKind::IndexBuffer | UsageKind::IndirectBuffer => {
                vk::ImageLayout::UNDEFINED
            }
        }
    }
}

/// One recorded access to a resource.
#[derive(Copy, Clone, Debug)]
pub struct ResourceUsage {
    pub pass_index: u32,
    pub command_index: usize,
    pub kind: UsageKind,
    pub stages: vk::PipelineStageFlags,
    pub queue: QueueClass,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }
}

/// Per-resource ordered access lists, as declared by the planner.
#[derive(Default)]
pub struct ResourceUsageTable {
    usages: FxHashMap<ResourceHandle, Vec<ResourceUsage>>,
}

impl ResourceUsageTable {
    pub fn new() -> ResourceUsageTable {
        Default::default()
    }

    /// Accesses must be recorded in frame order per resource.
    pub fn record(&mut self, handle: impl Into<ResourceHandle>, usage: ResourceUsage) {
        self.usages.entry(handle.into()).or_default().push(usage);
    }

    pub fn usages(&self, handle: impl Into<ResourceHandle>) -> &[ResourceUsage] {
        self.usages
            .get(&handle.into())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn resources(&self) -> impl Iterator<Item = (&ResourceHandle, &[ResourceUsage])> {
        self.usages.iter().map(|(h, v)| (h, v.as_slice()))
    }

    /// First access of a resource in any pass after `pass_index`.
    pub fn next_use_after(
        &self,
        handle: impl Into<ResourceHandle>,
        pass_index: u32,
    ) -> Option<&ResourceUsage> {
        self.usages(handle)
            .iter()
            .find(|u| u.pass_index > pass_index)
    }

    /// Whether anything reads or writes the resource after the given pass.
    pub fn is_used_after(&self, handle: impl Into<ResourceHandle>, pass_index: u32) -> bool {
        self.next_use_after(handle, pass_index).is_some()
    }

    /// First access of the resource in the frame.
    pub fn first_use(&self, handle: impl Into<ResourceHandle>) -> Option<&ResourceUsage> {
        self.usages(handle).first()
    }

    /// Last write access, paired with the reads following it (the
    /// last-writer / last-readers schedule material).
    pub fn last_writer(&self, handle: impl Into<ResourceHandle>) -> Option<&ResourceUsage> {
        self.usages(handle).iter().rev().find(|u| u.is_write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(tex: u64) -> RenderTargets {
        let mut t = RenderTargets::default();
        t.color.push(Some(AttachmentBinding {
            texture: TextureHandle(tex),
            mip_level: 0,
            slice: 0,
            clear: None,
        }));
        t.width = 128;
        t.height = 128;
        t.sample_count = 1;
        t
    }

    #[test]
    fn target_compatibility() {
        let a = targets(1);
        let b = targets(1);
        let c = targets(2);
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));

        let mut d = targets(1);
        d.width = 64;
        assert!(!a.compatible_with(&d));

        let mut e = targets(1);
        e.depth_stencil = Some(AttachmentBinding {
            texture: TextureHandle(9),
            mip_level: 0,
            slice: 0,
            clear: None,
        });
        assert!(!a.compatible_with(&e));
    }

    #[test]
    fn usage_table_queries() {
        let mut table = ResourceUsageTable::new();
        let h = BufferHandle(1);
        let mk = |pass, kind| ResourceUsage {
            pass_index: pass,
            command_index: pass as usize,
            kind,
            stages: vk::PipelineStageFlags::COMPUTE_SHADER,
            queue: QueueClass::Graphics,
        };
        table.record(h, mk(0, UsageKind::Write));
        table.record(h, mk(2, UsageKind::Read));

        assert!(table.is_used_after(h, 0));
        assert!(!table.is_used_after(h, 2));
        assert_eq!(table.next_use_after(h, 0).unwrap().pass_index, 2);
        assert_eq!(table.last_writer(h).unwrap().pass_index, 0);
        assert!(UsageKind::ColorAttachment.is_write());
        assert!(!UsageKind::ConstantBuffer.is_write());
    }
}
