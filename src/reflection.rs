//! Per-pipeline merged reflection.
//!
//! Stage reflections are folded into one map keyed by (set, binding);
//! descriptor-set layouts are derived from it, parameterized by which buffer
//! bindings the binding manager currently treats as dynamic. Lookups go
//! through a sorted table of packed binding paths with a sentinel key at the
//! end.
use crate::error::Result;
use crate::path::BindingPath;
use ash::vk;
use fxhash::FxHashMap;
use spirv::{
    AccessQualifier, Reflection, ShaderResource, ShaderResourceType, SpecializationConstant,
};
use spirv_headers::ExecutionModel;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResourceCategory {
    Buffer,
    Texture,
    Sampler,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UsageType {
    ConstantBuffer,
    Read,
    ReadWrite,
    Write,
    Sampler,
    InputAttachment,
}

/// What a shader argument is and where it binds.
#[derive(Clone, Debug)]
pub struct ArgumentReflection {
    pub name: String,
    pub category: ResourceCategory,
    pub usage: UsageType,
    pub path: BindingPath,
    pub stages: vk::ShaderStageFlags,
    pub resource_type: ShaderResourceType,
    pub byte_offset: u32,
    pub byte_size: u32,
}

pub fn stage_flags(model: ExecutionModel) -> vk::ShaderStageFlags {
    match model {
        ExecutionModel::Vertex => vk::ShaderStageFlags::VERTEX,
        ExecutionModel::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ExecutionModel::GLCompute => vk::ShaderStageFlags::COMPUTE,
        ExecutionModel::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ExecutionModel::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ExecutionModel::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        _ => vk::ShaderStageFlags::ALL,
    }
}

fn categorize(res: &ShaderResource) -> (ResourceCategory, UsageType) {
    use ShaderResourceType::*;
    match res.ty {
        UniformBuffer | PushConstantBuffer => (ResourceCategory::Buffer, UsageType::ConstantBuffer),
        UniformTexelBuffer => (ResourceCategory::Buffer, UsageType::Read),
        StorageBuffer | StorageTexelBuffer => (ResourceCategory::Buffer, access_usage(res.access)),
        SampledImage => (ResourceCategory::Texture, UsageType::Read),
        StorageImage => (ResourceCategory::Texture, access_usage(res.access)),
        SubpassInput => (ResourceCategory::Texture, UsageType::InputAttachment),
        Sampler => (ResourceCategory::Sampler, UsageType::Sampler),
    }
}

fn access_usage(access: AccessQualifier) -> UsageType {
    match access {
        AccessQualifier::Read => UsageType::Read,
        AccessQualifier::Write => UsageType::Write,
        AccessQualifier::ReadWrite | AccessQualifier::None => UsageType::ReadWrite,
    }
}

/// Descriptor type for a shader resource, selecting the dynamic variant for
/// buffers flagged dynamic by the binding manager.
pub fn descriptor_type(ty: ShaderResourceType, dynamic: bool) -> Option<vk::DescriptorType> {
    use ShaderResourceType::*;
    Some(match ty {
        UniformBuffer if dynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        StorageBuffer if dynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        SubpassInput => vk::DescriptorType::INPUT_ATTACHMENT,
        Sampler => vk::DescriptorType::SAMPLER,
        // push constants never appear in descriptor sets
        PushConstantBuffer => return None,
    })
}

//--------------------------------------------------------------------------------------------------

/// Merged reflection for one (vertex + fragment) or (compute) pipeline, plus
/// the caches keyed off it.
pub struct PipelineReflection {
    /// Sorted packed paths, with a `u64::MAX` sentinel at the end so lookup
    /// loops need no bounds check.
    keys: Vec<u64>,
    args: Vec<ArgumentReflection>,
    set_count: u32,
    spec_constants: Vec<SpecializationConstant>,
    set_layouts: FxHashMap<(u32, u64), vk::DescriptorSetLayout>,
    pipeline_layouts: FxHashMap<Vec<u64>, vk::PipelineLayout>,
}

impl PipelineReflection {
    /// Folds per-stage reflections into the pipeline-wide view; accessed
    /// stages are unioned per (set, binding).
    pub fn merge(stages: &[(&Reflection, vk::ShaderStageFlags)]) -> PipelineReflection {
        let mut merged: FxHashMap<u64, (ShaderResource, vk::ShaderStageFlags)> =
            FxHashMap::default();
        let mut spec_constants = Vec::new();
        for &(refl, stage) in stages {
            for res in refl.resources() {
                let path = BindingPath::pack(res.binding.set as u16, res.binding.binding as u16, 0);
                merged
                    .entry(path.raw())
                    .and_modify(|(_, s)| *s |= stage)
                    .or_insert_with(|| (res.clone(), stage));
            }
            for sc in refl.specialization_constants() {
                if !spec_constants
                    .iter()
                    .any(|c: &SpecializationConstant| c.constant_id == sc.constant_id)
                {
                    spec_constants.push(sc.clone());
                }
            }
        }
        let resources = merged
            .into_iter()
            .map(|(_, (res, stages))| (res, stages))
            .collect();
        Self::from_resources(resources, spec_constants)
    }

    /// Builds the lookup table from merged resources; exposed for tests and
    /// for synthetic reflections.
    pub fn from_resources(
        resources: Vec<(ShaderResource, vk::ShaderStageFlags)>,
        spec_constants: Vec<SpecializationConstant>,
    ) -> PipelineReflection {
        let mut entries: Vec<(u64, ArgumentReflection)> = resources
            .into_iter()
            .map(|(res, stages)| {
                let path = BindingPath::pack(res.binding.set as u16, res.binding.binding as u16, 0);
                let (category, usage) = categorize(&res);
                (
                    path.sort_key(),
                    ArgumentReflection {
                        name: res.name.clone(),
                        category,
                        usage,
                        path,
                        stages,
                        resource_type: res.ty,
                        byte_offset: res.byte_offset,
                        byte_size: res.byte_size,
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(k, _)| *k);

        let set_count = entries
            .iter()
            .filter(|(_, a)| !a.path.is_push_constant())
            .map(|(_, a)| a.path.set() as u32 + 1)
            .max()
            .unwrap_or(0);

        let mut keys: Vec<u64> = entries.iter().map(|(k, _)| *k).collect();
        keys.push(u64::max_value());
        let args = entries.into_iter().map(|(_, a)| a).collect();

        PipelineReflection {
            keys,
            args,
            set_count,
            spec_constants,
            set_layouts: FxHashMap::default(),
            pipeline_layouts: FxHashMap::default(),
        }
    }

    pub fn arguments(&self) -> &[ArgumentReflection] {
        &self.args
    }

    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.spec_constants
    }

    /// Number of descriptor sets addressed by this pipeline (push constants
    /// excluded).
    pub fn set_count(&self) -> u32 {
        self.set_count
    }

    /// Linear scan over the sorted table; the sentinel makes the loop
    /// self-terminating.
    pub fn argument_reflection(&self, path: BindingPath) -> Option<&ArgumentReflection> {
        // array elements share the base binding's reflection
        let key = path.with_array_index(0).sort_key();
        let mut i = 0;
        while self.keys[i] < key {
            i += 1;
        }
        if self.keys[i] == key {
            Some(&self.args[i])
        } else {
            None
        }
    }

    pub fn binding_is_active(&self, path: BindingPath) -> bool {
        self.argument_reflection(path).is_some()
    }

    /// Resolves an argument name to its binding path. With a parent argument
    /// buffer path, the result is rebased onto the parent's set.
    pub fn binding_path(
        &self,
        name: &str,
        array_index: u32,
        argument_buffer: Option<BindingPath>,
    ) -> Option<BindingPath> {
        let arg = self.args.iter().find(|a| a.name == name)?;
        let path = arg.path.with_array_index(array_index);
        match argument_buffer {
            Some(parent) => Some(path.with_set(parent.set())),
            None => Some(path),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Layout derivation

    /// Descriptor-set layout bindings for one set. `dynamic_mask` has bit `b`
    /// set when binding `b` should use a dynamic buffer descriptor type.
    pub fn set_layout_bindings(
        &self,
        set: u32,
        dynamic_mask: u64,
    ) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.args
            .iter()
            .filter(|a| !a.path.is_push_constant() && a.path.set() as u32 == set)
            .filter_map(|a| {
                let binding = a.path.binding() as u32;
                let dynamic = binding < 64 && (dynamic_mask >> binding) & 1 == 1;
                let ty = descriptor_type(a.resource_type, dynamic)?;
                Some(vk::DescriptorSetLayoutBinding {
                    binding,
                    descriptor_type: ty,
                    // array sizing is a known limitation
                    descriptor_count: 1,
                    stage_flags: a.stages,
                    p_immutable_samplers: std::ptr::null(),
                })
            })
            .collect()
    }

    /// Cached per (set, dynamic-bitset) descriptor set layout.
    pub fn set_layout(
        &mut self,
        device: &ash::Device,
        set: u32,
        dynamic_mask: u64,
    ) -> Result<vk::DescriptorSetLayout> {
        if let Some(&l) = self.set_layouts.get(&(set, dynamic_mask)) {
            return Ok(l);
        }
        let bindings = self.set_layout_bindings(set, dynamic_mask);
        let info = vk::DescriptorSetLayoutCreateInfo {
            binding_count: bindings.len() as u32,
            p_bindings: if bindings.is_empty() {
                std::ptr::null()
            } else {
                bindings.as_ptr()
            },
            ..Default::default()
        };
        let layout = unsafe { device.create_descriptor_set_layout(&info, None)? };
        self.set_layouts.insert((set, dynamic_mask), layout);
        Ok(layout)
    }

    /// One push-constant range per push-constant resource.
    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.args
            .iter()
            .filter(|a| a.path.is_push_constant())
            .map(|a| vk::PushConstantRange {
                stage_flags: a.stages,
                offset: a.byte_offset,
                size: a.byte_size,
            })
            .collect()
    }

    /// Cached pipeline layout, keyed by the per-set dynamic-buffer masks.
    pub fn pipeline_layout(
        &mut self,
        device: &ash::Device,
        dynamic_masks: &[u64],
    ) -> Result<vk::PipelineLayout> {
        let key: Vec<u64> = (0..self.set_count)
            .map(|s| dynamic_masks.get(s as usize).copied().unwrap_or(0))
            .collect();
        if let Some(&l) = self.pipeline_layouts.get(&key) {
            return Ok(l);
        }
        let mut set_layouts = Vec::with_capacity(self.set_count as usize);
        for set in 0..self.set_count {
            set_layouts.push(self.set_layout(device, set, key[set as usize])?);
        }
        let ranges = self.push_constant_ranges();
        let info = vk::PipelineLayoutCreateInfo {
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: if set_layouts.is_empty() {
                std::ptr::null()
            } else {
                set_layouts.as_ptr()
            },
            push_constant_range_count: ranges.len() as u32,
            p_push_constant_ranges: if ranges.is_empty() {
                std::ptr::null()
            } else {
                ranges.as_ptr()
            },
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&info, None)? };
        debug!(
            "created pipeline layout {:?} ({} sets, {} push ranges)",
            layout,
            set_layouts.len(),
            ranges.len()
        );
        self.pipeline_layouts.insert(key, layout);
        Ok(layout)
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for (_, l) in self.pipeline_layouts.drain() {
                device.destroy_pipeline_layout(l, None);
            }
            for (_, l) in self.set_layouts.drain() {
                device.destroy_descriptor_set_layout(l, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spirv::ResourceBinding;

    fn res(
        name: &str,
        ty: ShaderResourceType,
        set: u32,
        binding: u32,
        access: AccessQualifier,
    ) -> ShaderResource {
        ShaderResource {
            ty,
            binding: ResourceBinding { set, binding },
            byte_offset: 0,
            byte_size: 64,
            name: name.to_owned(),
            access,
            array_length: 1,
        }
    }

    fn sample() -> PipelineReflection {
        PipelineReflection::from_resources(
            vec![
                (
                    res(
                        "globals",
                        ShaderResourceType::UniformBuffer,
                        0,
                        0,
                        AccessQualifier::Read,
                    ),
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ),
                (
                    res(
                        "particles",
                        ShaderResourceType::StorageBuffer,
                        0,
                        1,
                        AccessQualifier::ReadWrite,
                    ),
                    vk::ShaderStageFlags::VERTEX,
                ),
                (
                    res(
                        "albedo",
                        ShaderResourceType::SampledImage,
                        1,
                        0,
                        AccessQualifier::Read,
                    ),
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                (
                    {
                        let mut r = res(
                            "transform",
                            ShaderResourceType::PushConstantBuffer,
                            0xffff,
                            0,
                            AccessQualifier::Read,
                        );
                        r.byte_offset = 16;
                        r.byte_size = 64;
                        r
                    },
                    vk::ShaderStageFlags::VERTEX,
                ),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn lookup_table_is_sorted_with_sentinel() {
        let r = sample();
        let path = BindingPath::pack(1, 0, 0);
        let arg = r.argument_reflection(path).unwrap();
        assert_eq!(arg.name, "albedo");
        assert_eq!(arg.category, ResourceCategory::Texture);
        assert!(r.argument_reflection(BindingPath::pack(2, 0, 0)).is_none());
        assert!(r.binding_is_active(BindingPath::pack(0, 1, 0)));
        assert!(!r.binding_is_active(BindingPath::pack(0, 9, 0)));
    }

    #[test]
    fn binding_path_by_name() {
        let r = sample();
        let p = r.binding_path("particles", 0, None).unwrap();
        assert_eq!((p.set(), p.binding()), (0, 1));
        assert!(r.binding_path("missing", 0, None).is_none());

        // rebasing into an argument buffer set
        let parent = BindingPath::argument_buffer(3);
        let p = r.binding_path("particles", 2, Some(parent)).unwrap();
        assert_eq!((p.set(), p.binding(), p.array_index()), (3, 1, 2));
    }

    #[test]
    fn layout_bindings_respect_dynamic_mask() {
        let r = sample();
        let static_bindings = r.set_layout_bindings(0, 0);
        assert_eq!(static_bindings.len(), 2);
        assert_eq!(
            static_bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            static_bindings[1].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
        );

        // binding 1 flagged dynamic
        let dynamic_bindings = r.set_layout_bindings(0, 0b10);
        assert_eq!(
            dynamic_bindings[1].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        );
        // stage union carried through
        assert_eq!(
            dynamic_bindings[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn push_constants_never_reach_descriptor_sets() {
        let r = sample();
        assert_eq!(r.set_count(), 2);
        let ranges = r.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].offset, 16);
        assert_eq!(ranges[0].size, 64);
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert!(descriptor_type(ShaderResourceType::PushConstantBuffer, false).is_none());
    }
}
