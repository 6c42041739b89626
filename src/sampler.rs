//! Process-lifetime sampler cache.
use crate::error::Result;
use crate::resource::SamplerDescriptor;
use ash::vk;
use fxhash::FxHashMap;

/// Samplers are immutable; identical descriptors share one Vulkan object.
pub struct SamplerCache {
    samplers: FxHashMap<SamplerDescriptor, vk::Sampler>,
}

impl SamplerCache {
    pub fn new() -> SamplerCache {
        SamplerCache {
            samplers: FxHashMap::default(),
        }
    }

    pub fn get_or_create(
        &mut self,
        device: &ash::Device,
        desc: &SamplerDescriptor,
    ) -> Result<vk::Sampler> {
        if let Some(&s) = self.samplers.get(desc) {
            return Ok(s);
        }
        let info = vk::SamplerCreateInfo {
            mag_filter: desc.mag_filter.to_vk(),
            min_filter: desc.min_filter.to_vk(),
            mipmap_mode: desc.mip_filter.to_vk(),
            address_mode_u: desc.address_mode_u.to_vk(),
            address_mode_v: desc.address_mode_v.to_vk(),
            address_mode_w: desc.address_mode_w.to_vk(),
            mip_lod_bias: 0.0,
            anisotropy_enable: desc.max_anisotropy.is_some() as u32,
            max_anisotropy: desc.max_anisotropy.map(|a| a.into_inner()).unwrap_or(1.0),
            compare_enable: desc.compare.is_some() as u32,
            compare_op: desc
                .compare
                .map(|c| c.to_vk())
                .unwrap_or(vk::CompareOp::NEVER),
            min_lod: desc.lod_min_clamp.into_inner(),
            max_lod: desc.lod_max_clamp.into_inner(),
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };
        let sampler = unsafe { device.create_sampler(&info, None)? };
        debug!("created sampler {:?}", sampler);
        self.samplers.insert(*desc, sampler);
        Ok(sampler)
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, s) in self.samplers.drain() {
            unsafe {
                device.destroy_sampler(s, None);
            }
        }
    }
}
