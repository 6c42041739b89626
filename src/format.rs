//! Abstract pixel formats and their Vulkan equivalents.
use ash::vk;

/// Pixel formats understood by the frame graph.
///
/// The set covers what the planner actually emits; exotic compressed formats
/// go through `PixelFormat::Raw` with an explicit vk format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    Rg11B10Float,
    Depth16Unorm,
    Depth32Float,
    Depth24UnormStencil8,
    Depth32FloatStencil8,
    Stencil8,
    /// Escape hatch for formats without an abstract name.
    Raw(vk::Format),
}

impl PixelFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            PixelFormat::R8Unorm => vk::Format::R8_UNORM,
            PixelFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
            PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            PixelFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            PixelFormat::R16Float => vk::Format::R16_SFLOAT,
            PixelFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
            PixelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            PixelFormat::R32Float => vk::Format::R32_SFLOAT,
            PixelFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
            PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            PixelFormat::R32Uint => vk::Format::R32_UINT,
            PixelFormat::Rg11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
            PixelFormat::Depth16Unorm => vk::Format::D16_UNORM,
            PixelFormat::Depth32Float => vk::Format::D32_SFLOAT,
            PixelFormat::Depth24UnormStencil8 => vk::Format::D24_UNORM_S8_UINT,
            PixelFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
            PixelFormat::Stencil8 => vk::Format::S8_UINT,
            PixelFormat::Raw(f) => f,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            PixelFormat::Depth16Unorm
                | PixelFormat::Depth32Float
                | PixelFormat::Depth24UnormStencil8
                | PixelFormat::Depth32FloatStencil8
        )
    }

    pub fn is_stencil(self) -> bool {
        matches!(
            self,
            PixelFormat::Stencil8
                | PixelFormat::Depth24UnormStencil8
                | PixelFormat::Depth32FloatStencil8
        )
    }

    pub fn is_depth_or_stencil(self) -> bool {
        self.is_depth() || self.is_stencil()
    }

    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        let mut aspect = vk::ImageAspectFlags::empty();
        if self.is_depth() {
            aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if self.is_stencil() {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        if aspect.is_empty() {
            aspect = vk::ImageAspectFlags::COLOR;
        }
        aspect
    }
}

/// Texel size in bytes for the uncompressed formats the backend hands out.
pub fn bytes_per_texel(format: vk::Format) -> u32 {
    match format {
        vk::Format::R8_UNORM | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        // depth32 + stencil8 packs into 5 bytes, padded to 8 in practice
        vk::Format::D32_SFLOAT_S8_UINT => 8,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspects() {
        assert_eq!(
            PixelFormat::Bgra8Srgb.aspect_mask(),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            PixelFormat::Depth32Float.aspect_mask(),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            PixelFormat::Depth24UnormStencil8.aspect_mask(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(PixelFormat::Depth24UnormStencil8.is_depth_or_stencil());
        assert!(!PixelFormat::Rgba16Float.is_depth_or_stencil());
    }
}
