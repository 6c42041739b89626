//! Abstract resource handles and descriptors, as produced by the planner.
use crate::format::PixelFormat;
use ash::vk;
use ordered_float::NotNan;

//--------------------------------------------------------------------------------------------------
// Handles

/// Planner-owned texture identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TextureHandle(pub u64);

/// Planner-owned buffer identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferHandle(pub u64);

/// Planner-owned argument buffer identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ArgumentBufferHandle(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ResourceHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

impl From<TextureHandle> for ResourceHandle {
    fn from(h: TextureHandle) -> ResourceHandle {
        ResourceHandle::Texture(h)
    }
}

impl From<BufferHandle> for ResourceHandle {
    fn from(h: BufferHandle) -> ResourceHandle {
        ResourceHandle::Buffer(h)
    }
}

//--------------------------------------------------------------------------------------------------
// Storage & lifetime

/// Memory domain hint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StorageMode {
    /// Device-local, not host visible.
    DeviceLocal,
    /// Host-visible, cached on the CPU side (readback friendly).
    HostCached,
    /// Host-visible, write-combined (upload friendly).
    HostUncached,
}

impl StorageMode {
    pub fn is_host_visible(self) -> bool {
        self != StorageMode::DeviceLocal
    }

    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            StorageMode::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            StorageMode::HostCached => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            }
            StorageMode::HostUncached => vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Persistence {
    /// Survives frame cycles until disposed explicitly.
    Persistent,
    /// Returned to the transient pool at the end of the frame.
    PerFrame,
    /// Backed by a swapchain image; owned by the swapchain.
    Window,
}

//--------------------------------------------------------------------------------------------------
// Usage hints

bitflags::bitflags! {
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC  = 1 << 0;
        const TRANSFER_DST  = 1 << 1;
        const UNIFORM       = 1 << 2;
        const STORAGE       = 1 << 3;
        const INDEX         = 1 << 4;
        const VERTEX        = 1 << 5;
        const INDIRECT      = 1 << 6;
        const UNIFORM_TEXEL = 1 << 7;
        const STORAGE_TEXEL = 1 << 8;
    }
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        let mut f = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::TRANSFER_SRC) {
            f |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            f |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(BufferUsage::UNIFORM) {
            f |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            f |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            f |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::VERTEX) {
            f |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDIRECT) {
            f |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM_TEXEL) {
            f |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE_TEXEL) {
            f |= vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        }
        f
    }
}

bitflags::bitflags! {
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC          = 1 << 0;
        const TRANSFER_DST          = 1 << 1;
        const SAMPLED               = 1 << 2;
        const STORAGE               = 1 << 3;
        const COLOR_ATTACHMENT      = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        const INPUT_ATTACHMENT      = 1 << 6;
    }
}

impl TextureUsage {
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        let mut f = vk::ImageUsageFlags::empty();
        if self.contains(TextureUsage::TRANSFER_SRC) {
            f |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(TextureUsage::TRANSFER_DST) {
            f |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(TextureUsage::SAMPLED) {
            f |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::STORAGE) {
            f |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(TextureUsage::COLOR_ATTACHMENT) {
            f |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
            f |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureUsage::INPUT_ATTACHMENT) {
            f |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
        }
        f
    }
}

//--------------------------------------------------------------------------------------------------
// Descriptors

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferDescriptor {
    pub length: u64,
    pub storage_mode: StorageMode,
    pub usage: BufferUsage,
    pub persistence: Persistence,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TextureDescriptor {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub array_length: u32,
    pub sample_count: u32,
    pub storage_mode: StorageMode,
    pub usage: TextureUsage,
    pub persistence: Persistence,
}

impl TextureDescriptor {
    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Samplers

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

impl Filter {
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MipFilter {
    NotMipmapped,
    Nearest,
    Linear,
}

impl MipFilter {
    pub fn to_vk(self) -> vk::SamplerMipmapMode {
        match self {
            MipFilter::NotMipmapped | MipFilter::Nearest => vk::SamplerMipmapMode::NEAREST,
            MipFilter::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
    ClampToBorder,
}

impl AddressMode {
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareFunction::Never => vk::CompareOp::NEVER,
            CompareFunction::Less => vk::CompareOp::LESS,
            CompareFunction::Equal => vk::CompareOp::EQUAL,
            CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareFunction::Greater => vk::CompareOp::GREATER,
            CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareFunction::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Fully describes an immutable sampler. Hashable so the sampler cache can
/// deduplicate (floats go through `NotNan`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SamplerDescriptor {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: MipFilter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub compare: Option<CompareFunction>,
    pub max_anisotropy: Option<NotNan<f32>>,
    pub lod_min_clamp: NotNan<f32>,
    pub lod_max_clamp: NotNan<f32>,
}

impl Default for SamplerDescriptor {
    fn default() -> SamplerDescriptor {
        SamplerDescriptor {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mip_filter: MipFilter::NotMipmapped,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            compare: None,
            max_anisotropy: None,
            lod_min_clamp: NotNan::new(0.0).unwrap(),
            lod_max_clamp: NotNan::new(1000.0).unwrap(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Argument buffers

/// One binding inside an argument buffer.
#[derive(Clone, Debug)]
pub enum ArgumentBinding {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Texture {
        texture: TextureHandle,
    },
    Sampler(SamplerDescriptor),
}

/// A named, set-scoped bundle of resource bindings, materialized as a single
/// descriptor set on first bind.
#[derive(Clone, Debug)]
pub struct ArgumentBufferDescriptor {
    pub label: String,
    /// (binding index within the set, bound resource).
    pub bindings: Vec<(u32, ArgumentBinding)>,
    pub persistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_translation() {
        let u = BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST;
        let vk_u = u.to_vk();
        assert!(vk_u.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(vk_u.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!vk_u.contains(vk::BufferUsageFlags::VERTEX_BUFFER));

        let t = TextureUsage::SAMPLED | TextureUsage::COLOR_ATTACHMENT;
        let vk_t = t.to_vk();
        assert!(vk_t.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(vk_t.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn sampler_descriptors_are_hashable_keys() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(SamplerDescriptor::default());
        set.insert(SamplerDescriptor::default());
        assert_eq!(set.len(), 1);
        set.insert(SamplerDescriptor {
            mag_filter: Filter::Nearest,
            ..Default::default()
        });
        assert_eq!(set.len(), 2);
    }
}
