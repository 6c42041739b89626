//! Pipeline state descriptors.
//!
//! Everything in here is hashable so it can serve as pipeline cache key
//! material. Floats that would poison hashing (depth bias, blend constants,
//! stencil reference) are dynamic state and deliberately absent.
use crate::format::PixelFormat;
use ash::vk;
use smallvec::SmallVec;

//--------------------------------------------------------------------------------------------------
// Fixed-function enums

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::Point => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::Line => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Winding {
    Clockwise,
    CounterClockwise,
}

impl Winding {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            Winding::Clockwise => vk::FrontFace::CLOCKWISE,
            Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// What happens to fragments outside the depth range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DepthClipMode {
    Clip,
    Clamp,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Depth/stencil

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOperation {
    pub fn to_vk(self) -> vk::StencilOp {
        match self {
            StencilOperation::Keep => vk::StencilOp::KEEP,
            StencilOperation::Zero => vk::StencilOp::ZERO,
            StencilOperation::Replace => vk::StencilOp::REPLACE,
            StencilOperation::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOperation::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOperation::Invert => vk::StencilOp::INVERT,
            StencilOperation::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOperation::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StencilDescriptor {
    pub compare: crate::resource::CompareFunction,
    pub stencil_failure_op: StencilOperation,
    pub depth_failure_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilDescriptor {
    fn default() -> StencilDescriptor {
        StencilDescriptor {
            compare: crate::resource::CompareFunction::Always,
            stencil_failure_op: StencilOperation::Keep,
            depth_failure_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            read_mask: !0,
            write_mask: !0,
        }
    }
}

impl StencilDescriptor {
    /// The reference value is dynamic state.
    pub fn to_vk(&self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: self.stencil_failure_op.to_vk(),
            pass_op: self.pass_op.to_vk(),
            depth_fail_op: self.depth_failure_op.to_vk(),
            compare_op: self.compare.to_vk(),
            compare_mask: self.read_mask,
            write_mask: self.write_mask,
            reference: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthStencilDescriptor {
    pub depth_compare: crate::resource::CompareFunction,
    pub depth_write_enabled: bool,
    pub front_stencil: Option<StencilDescriptor>,
    pub back_stencil: Option<StencilDescriptor>,
}

impl Default for DepthStencilDescriptor {
    fn default() -> DepthStencilDescriptor {
        DepthStencilDescriptor {
            depth_compare: crate::resource::CompareFunction::Always,
            depth_write_enabled: false,
            front_stencil: None,
            back_stencil: None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Blending

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
    SourceAlphaSaturated,
    BlendColor,
    OneMinusBlendColor,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SourceColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSourceColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::SourceAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSourceAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DestinationColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDestinationColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::DestinationAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDestinationAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::SourceAlphaSaturated => vk::BlendFactor::SRC_ALPHA_SATURATE,
            BlendFactor::BlendColor => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::OneMinusBlendColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOperation {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOperation::Add => vk::BlendOp::ADD,
            BlendOperation::Subtract => vk::BlendOp::SUBTRACT,
            BlendOperation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOperation::Min => vk::BlendOp::MIN,
            BlendOperation::Max => vk::BlendOp::MAX,
        }
    }
}

bitflags::bitflags! {
    pub struct ColorWriteMask: u32 {
        const RED   = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE  = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL   = Self::RED.bits | Self::GREEN.bits | Self::BLUE.bits | Self::ALPHA.bits;
    }
}

impl ColorWriteMask {
    pub fn to_vk(self) -> vk::ColorComponentFlags {
        let mut f = vk::ColorComponentFlags::empty();
        if self.contains(ColorWriteMask::RED) {
            f |= vk::ColorComponentFlags::R;
        }
        if self.contains(ColorWriteMask::GREEN) {
            f |= vk::ColorComponentFlags::G;
        }
        if self.contains(ColorWriteMask::BLUE) {
            f |= vk::ColorComponentFlags::B;
        }
        if self.contains(ColorWriteMask::ALPHA) {
            f |= vk::ColorComponentFlags::A;
        }
        f
    }
}

/// Per-attachment blend state; blend constants are dynamic.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorAttachmentBlend {
    pub blending_enabled: bool,
    pub source_rgb_factor: BlendFactor,
    pub destination_rgb_factor: BlendFactor,
    pub rgb_operation: BlendOperation,
    pub source_alpha_factor: BlendFactor,
    pub destination_alpha_factor: BlendFactor,
    pub alpha_operation: BlendOperation,
    pub write_mask: ColorWriteMask,
}

impl Default for ColorAttachmentBlend {
    fn default() -> ColorAttachmentBlend {
        ColorAttachmentBlend {
            blending_enabled: false,
            source_rgb_factor: BlendFactor::One,
            destination_rgb_factor: BlendFactor::Zero,
            rgb_operation: BlendOperation::Add,
            source_alpha_factor: BlendFactor::One,
            destination_alpha_factor: BlendFactor::Zero,
            alpha_operation: BlendOperation::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }
}

impl ColorAttachmentBlend {
    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blending_enabled as u32,
            src_color_blend_factor: self.source_rgb_factor.to_vk(),
            dst_color_blend_factor: self.destination_rgb_factor.to_vk(),
            color_blend_op: self.rgb_operation.to_vk(),
            src_alpha_blend_factor: self.source_alpha_factor.to_vk(),
            dst_alpha_blend_factor: self.destination_alpha_factor.to_vk(),
            alpha_blend_op: self.alpha_operation.to_vk(),
            color_write_mask: self.write_mask.to_vk(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Vertex input

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Half2,
    Half4,
    UChar4Normalized,
    Char4Normalized,
    UInt,
    UInt2,
    UInt4,
    Int,
    Int2,
    Int4,
    UShort2,
    UShort4,
}

impl VertexFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float => vk::Format::R32_SFLOAT,
            VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Half2 => vk::Format::R16G16_SFLOAT,
            VertexFormat::Half4 => vk::Format::R16G16B16A16_SFLOAT,
            VertexFormat::UChar4Normalized => vk::Format::R8G8B8A8_UNORM,
            VertexFormat::Char4Normalized => vk::Format::R8G8B8A8_SNORM,
            VertexFormat::UInt => vk::Format::R32_UINT,
            VertexFormat::UInt2 => vk::Format::R32G32_UINT,
            VertexFormat::UInt4 => vk::Format::R32G32B32A32_UINT,
            VertexFormat::Int => vk::Format::R32_SINT,
            VertexFormat::Int2 => vk::Format::R32G32_SINT,
            VertexFormat::Int4 => vk::Format::R32G32B32A32_SINT,
            VertexFormat::UShort2 => vk::Format::R16G16_UINT,
            VertexFormat::UShort4 => vk::Format::R16G16B16A16_UINT,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VertexStepFunction {
    PerVertex,
    PerInstance,
}

impl VertexStepFunction {
    pub fn to_vk(self) -> vk::VertexInputRate {
        match self {
            VertexStepFunction::PerVertex => vk::VertexInputRate::VERTEX,
            VertexStepFunction::PerInstance => vk::VertexInputRate::INSTANCE,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexAttributeDescriptor {
    pub location: u32,
    pub buffer_index: u32,
    pub offset: u32,
    pub format: VertexFormat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexBufferLayoutDescriptor {
    pub buffer_index: u32,
    pub stride: u32,
    pub step_function: VertexStepFunction,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VertexDescriptor {
    pub attributes: SmallVec<[VertexAttributeDescriptor; 8]>,
    pub layouts: SmallVec<[VertexBufferLayoutDescriptor; 4]>,
}

//--------------------------------------------------------------------------------------------------
// Pipeline descriptors

/// Describes a graphics pipeline up to (but not including) the render pass it
/// will execute in; attachment formats come from the render-target group.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_function: String,
    pub fragment_function: Option<String>,
    pub vertex_descriptor: Option<VertexDescriptor>,
    /// One entry per color attachment slot in use.
    pub blend: SmallVec<[ColorAttachmentBlend; 8]>,
    pub alpha_to_coverage_enabled: bool,
    pub alpha_to_one_enabled: bool,
    pub rasterization_enabled: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub function: String,
}

//--------------------------------------------------------------------------------------------------
// Dynamic state values

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn to_vk(self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: self.x,
                y: self.y,
            },
            extent: vk::Extent2D {
                width: self.width,
                height: self.height,
            },
        }
    }
}

/// Threadgroup geometry for compute dispatches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Size {
    pub fn new(width: u32, height: u32, depth: u32) -> Size {
        Size {
            width,
            height,
            depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_keys() {
        use std::collections::HashMap;
        let d = RenderPipelineDescriptor {
            label: None,
            vertex_function: "vs".into(),
            fragment_function: Some("fs".into()),
            vertex_descriptor: None,
            blend: SmallVec::new(),
            alpha_to_coverage_enabled: false,
            alpha_to_one_enabled: false,
            rasterization_enabled: true,
        };
        let mut m = HashMap::new();
        m.insert(d.clone(), 1);
        assert_eq!(m.get(&d), Some(&1));
    }

    #[test]
    fn write_mask_translation() {
        assert_eq!(
            ColorWriteMask::ALL.to_vk(),
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A
        );
    }
}
