//! Keyed pipeline construction and caching.
//!
//! Every pipeline is created at most once per process for a given key; all
//! creations go through the single `vk::PipelineCache` owned by the device.
use crate::desc::*;
use crate::error::Result;
use crate::render_target::RenderTargetSignature;
use crate::shader::ShaderLibrary;
use ash::vk;
use fxhash::FxHashMap;
use std::ffi::CString;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct GraphicsPipelineKey {
    pub descriptor: RenderPipelineDescriptor,
    pub depth_stencil: DepthStencilDescriptor,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_clip_mode: DepthClipMode,
    pub winding: Winding,
    pub layout: vk::PipelineLayout,
    pub render_targets: RenderTargetSignature,
    pub subpass: u32,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ComputePipelineKey {
    pub descriptor: ComputePipelineDescriptor,
    pub layout: vk::PipelineLayout,
    pub threads_per_threadgroup: Size,
}

pub struct PipelineCache {
    graphics: FxHashMap<GraphicsPipelineKey, vk::Pipeline>,
    compute: FxHashMap<ComputePipelineKey, vk::Pipeline>,
}

impl PipelineCache {
    pub fn new() -> PipelineCache {
        PipelineCache {
            graphics: FxHashMap::default(),
            compute: FxHashMap::default(),
        }
    }

    pub fn graphics_pipeline(
        &mut self,
        device: &ash::Device,
        vk_cache: vk::PipelineCache,
        library: &ShaderLibrary,
        key: &GraphicsPipelineKey,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline> {
        if let Some(&p) = self.graphics.get(key) {
            return Ok(p);
        }
        let pipeline = create_graphics_pipeline(device, vk_cache, library, key, render_pass)?;
        self.graphics.insert(key.clone(), pipeline);
        Ok(pipeline)
    }

    pub fn compute_pipeline(
        &mut self,
        device: &ash::Device,
        vk_cache: vk::PipelineCache,
        library: &ShaderLibrary,
        key: &ComputePipelineKey,
    ) -> Result<vk::Pipeline> {
        if let Some(&p) = self.compute.get(key) {
            return Ok(p);
        }
        let function = library.module_for(&key.descriptor.function)?;
        let entry = CString::new(function.entry_point).unwrap();
        let stage = vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::COMPUTE,
            module: function.module,
            p_name: entry.as_ptr(),
            ..Default::default()
        };
        let info = vk::ComputePipelineCreateInfo {
            stage,
            layout: key.layout,
            ..Default::default()
        };
        let pipeline = unsafe {
            device
                .create_compute_pipelines(vk_cache, &[info], None)
                .map_err(|(_, e)| e)?[0]
        };
        debug!("created compute pipeline for {}", key.descriptor.function);
        self.compute.insert(key.clone(), pipeline);
        Ok(pipeline)
    }

    pub fn destroy_all(&mut self, device: &ash::Device) {
        for (_, p) in self.graphics.drain() {
            unsafe { device.destroy_pipeline(p, None) };
        }
        for (_, p) in self.compute.drain() {
            unsafe { device.destroy_pipeline(p, None) };
        }
    }
}

/// Builds the full graphics pipeline state. Sub-states live in locals for the
/// duration of the call so every pointer in the create-info stays valid.
fn create_graphics_pipeline(
    device: &ash::Device,
    vk_cache: vk::PipelineCache,
    library: &ShaderLibrary,
    key: &GraphicsPipelineKey,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline> {
    let desc = &key.descriptor;

    // stages: the vertex function is mandatory, its absence a planner bug
    let vertex = library.module_for(&desc.vertex_function)?;
    let vertex_entry = CString::new(vertex.entry_point).unwrap();
    let mut stages = vec![vk::PipelineShaderStageCreateInfo {
        stage: vk::ShaderStageFlags::VERTEX,
        module: vertex.module,
        p_name: vertex_entry.as_ptr(),
        ..Default::default()
    }];
    let _fragment_entry; // keeps the c-string alive across the create call
    if let Some(ref fragment_function) = desc.fragment_function {
        let fragment = library.module_for(fragment_function)?;
        let entry = CString::new(fragment.entry_point).unwrap();
        stages.push(vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fragment.module,
            p_name: entry.as_ptr(),
            ..Default::default()
        });
        _fragment_entry = entry;
    }

    // vertex input
    let (bindings, attributes) = match desc.vertex_descriptor {
        Some(ref vd) => vertex_input_state(vd),
        None => (Vec::new(), Vec::new()),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        vertex_binding_description_count: bindings.len() as u32,
        p_vertex_binding_descriptions: bindings.as_ptr(),
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: key.topology.to_vk(),
        primitive_restart_enable: vk::TRUE,
        ..Default::default()
    };

    // one viewport and scissor, both overridden dynamically
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: key.cull_mode.to_vk(),
        front_face: key.winding.to_vk(),
        depth_clamp_enable: (key.depth_clip_mode == DepthClipMode::Clamp) as u32,
        rasterizer_discard_enable: (!desc.rasterization_enabled) as u32,
        depth_bias_enable: vk::TRUE,
        line_width: 1.0,
        ..Default::default()
    };

    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        alpha_to_coverage_enable: desc.alpha_to_coverage_enabled as u32,
        alpha_to_one_enable: desc.alpha_to_one_enabled as u32,
        ..Default::default()
    };

    let depth_stencil = depth_stencil_state(&key.depth_stencil, &key.render_targets);

    // per-attachment blend states, padded with the default for slots the
    // descriptor does not mention
    let color_count = key.render_targets.formats.len()
        - key.render_targets.has_depth_stencil as usize;
    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..color_count)
        .map(|i| {
            desc.blend
                .get(i)
                .copied()
                .unwrap_or_default()
                .to_vk()
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        attachment_count: blend_attachments.len() as u32,
        p_attachments: blend_attachments.as_ptr(),
        ..Default::default()
    };

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::DEPTH_BIAS,
        vk::DynamicState::BLEND_CONSTANTS,
        vk::DynamicState::STENCIL_REFERENCE,
    ];
    let dynamic = vk::PipelineDynamicStateCreateInfo {
        dynamic_state_count: dynamic_states.len() as u32,
        p_dynamic_states: dynamic_states.as_ptr(),
        ..Default::default()
    };

    let info = vk::GraphicsPipelineCreateInfo {
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &rasterization,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic,
        layout: key.layout,
        render_pass,
        subpass: key.subpass,
        ..Default::default()
    };

    let pipeline = unsafe {
        device
            .create_graphics_pipelines(vk_cache, &[info], None)
            .map_err(|(_, e)| e)?[0]
    };
    debug!(
        "created graphics pipeline ({} + {:?}, subpass {})",
        desc.vertex_function, desc.fragment_function, key.subpass
    );
    Ok(pipeline)
}

fn vertex_input_state(
    vd: &VertexDescriptor,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = vd
        .layouts
        .iter()
        .map(|l| vk::VertexInputBindingDescription {
            binding: l.buffer_index,
            stride: l.stride,
            input_rate: l.step_function.to_vk(),
        })
        .collect();
    let attributes = vd
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.buffer_index,
            format: a.format.to_vk(),
            offset: a.offset,
        })
        .collect();
    (bindings, attributes)
}

fn depth_stencil_state(
    desc: &DepthStencilDescriptor,
    targets: &RenderTargetSignature,
) -> vk::PipelineDepthStencilStateCreateInfo {
    if !targets.has_depth_stencil {
        // disabled default
        return vk::PipelineDepthStencilStateCreateInfo::default();
    }
    let stencil_enabled = desc.front_stencil.is_some() || desc.back_stencil.is_some();
    vk::PipelineDepthStencilStateCreateInfo {
        depth_test_enable: vk::TRUE,
        depth_write_enable: desc.depth_write_enabled as u32,
        depth_compare_op: desc.depth_compare.to_vk(),
        stencil_test_enable: stencil_enabled as u32,
        front: desc.front_stencil.unwrap_or_default().to_vk(),
        back: desc
            .back_stencil
            .or(desc.front_stencil)
            .unwrap_or_default()
            .to_vk(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::SmallVec;

    fn key() -> GraphicsPipelineKey {
        GraphicsPipelineKey {
            descriptor: RenderPipelineDescriptor {
                label: None,
                vertex_function: "vs".into(),
                fragment_function: Some("fs".into()),
                vertex_descriptor: None,
                blend: SmallVec::new(),
                alpha_to_coverage_enabled: false,
                alpha_to_one_enabled: false,
                rasterization_enabled: true,
            },
            depth_stencil: DepthStencilDescriptor::default(),
            topology: PrimitiveTopology::Triangle,
            cull_mode: CullMode::Back,
            depth_clip_mode: DepthClipMode::Clip,
            winding: Winding::CounterClockwise,
            layout: vk::PipelineLayout::null(),
            render_targets: RenderTargetSignature {
                formats: std::iter::once(vk::Format::B8G8R8A8_SRGB).collect(),
                has_depth_stencil: false,
                sample_count: 1,
                subpass_count: 1,
            },
            subpass: 0,
        }
    }

    #[test]
    fn identical_keys_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let (a, b) = (key(), key());
        assert_eq!(a, b);
        let hash = |k: &GraphicsPipelineKey| {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn subpass_differentiates_keys() {
        let a = key();
        let mut b = key();
        b.subpass = 1;
        assert_ne!(a, b);
    }

    #[test]
    fn vertex_input_translation() {
        let mut vd = VertexDescriptor::default();
        vd.attributes.push(VertexAttributeDescriptor {
            location: 0,
            buffer_index: 0,
            offset: 0,
            format: VertexFormat::Float3,
        });
        vd.attributes.push(VertexAttributeDescriptor {
            location: 1,
            buffer_index: 0,
            offset: 12,
            format: VertexFormat::Float2,
        });
        vd.layouts.push(VertexBufferLayoutDescriptor {
            buffer_index: 0,
            stride: 20,
            step_function: VertexStepFunction::PerVertex,
        });
        let (bindings, attributes) = vertex_input_state(&vd);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    }
}
