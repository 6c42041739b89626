//! Shader library: compiled module discovery and per-pipeline reflection
//! caching.
use crate::error::{BackendError, Result};
use crate::reflection::{stage_flags, PipelineReflection};
use ash::vk;
use fxhash::FxHashMap;
use spirv::Reflection;
use std::fs;
use std::path::Path;

/// Cache key for pipeline reflections and layouts.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum FunctionKey {
    Graphics {
        vertex: String,
        fragment: Option<String>,
    },
    Compute {
        function: String,
    },
}

struct LoadedModule {
    stem: String,
    reflection: Reflection,
    vk_module: vk::ShaderModule,
}

/// A function resolved to its module and effective entry point.
pub struct ResolvedFunction<'a> {
    pub module: vk::ShaderModule,
    pub entry_point: &'a str,
    pub reflection: &'a Reflection,
}

pub struct ShaderLibrary {
    modules: Vec<LoadedModule>,
    /// function name -> (module index, entry point name inside the module)
    functions: FxHashMap<String, (usize, String)>,
    reflections: FxHashMap<FunctionKey, PipelineReflection>,
}

impl ShaderLibrary {
    /// Discovers every `.spv` module under `directory`. A module whose only
    /// entry point is the canonical `main` is indexed by file stem; otherwise
    /// each entry point indexes itself.
    pub fn load(device: &ash::Device, directory: &Path) -> Result<ShaderLibrary> {
        let mut library = ShaderLibrary {
            modules: Vec::new(),
            functions: FxHashMap::default(),
            reflections: FxHashMap::default(),
        };

        let mut entries: Vec<_> = fs::read_dir(directory)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |e| e == "spv"))
            .collect();
        entries.sort();

        for path in entries {
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_owned(),
                None => continue,
            };
            let bytes = fs::read(&path)?;
            let reflection = match Reflection::from_bytes(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    // a malformed module only disables the pipelines using it
                    error!("failed to parse {:?}: {}", path, e);
                    continue;
                }
            };

            let code = &reflection.module().data;
            let info = vk::ShaderModuleCreateInfo {
                code_size: code.len() * 4,
                p_code: code.as_ptr(),
                ..Default::default()
            };
            let vk_module = unsafe { device.create_shader_module(&info, None)? };

            let index = library.modules.len();
            let entry_points: Vec<String> =
                reflection.entry_points().map(|s| s.to_owned()).collect();
            if entry_points.is_empty() {
                error!("module {:?} declares no entry points, skipping", path);
                unsafe {
                    device.destroy_shader_module(vk_module, None);
                }
                continue;
            }
            if entry_points.len() == 1 && entry_points[0] == spirv::reflect::CANONICAL_ENTRY_POINT
            {
                debug!("module {:?}: function {} (canonical entry)", path, stem);
                library
                    .functions
                    .insert(stem.clone(), (index, entry_points[0].clone()));
            } else {
                for ep in &entry_points {
                    debug!("module {:?}: function {}", path, ep);
                    library.functions.insert(ep.clone(), (index, ep.clone()));
                }
            }

            library.modules.push(LoadedModule {
                stem,
                reflection,
                vk_module,
            });
        }

        info!(
            "shader library: {} modules, {} functions",
            library.modules.len(),
            library.functions.len()
        );
        Ok(library)
    }

    /// Resolves a function name to its module and effective entry point.
    pub fn module_for(&self, function: &str) -> Result<ResolvedFunction> {
        let (index, entry_point) = self
            .functions
            .get(function)
            .ok_or_else(|| BackendError::FunctionNotFound(function.to_owned()))?;
        let module = &self.modules[*index];
        trace!("resolved function {} in module {}", function, module.stem);
        Ok(ResolvedFunction {
            module: module.vk_module,
            entry_point,
            reflection: &module.reflection,
        })
    }

    /// The merged pipeline reflection for a function key, cached.
    pub fn reflection_for(&mut self, key: &FunctionKey) -> Result<&mut PipelineReflection> {
        if !self.reflections.contains_key(key) {
            let merged = match key {
                FunctionKey::Graphics { vertex, fragment } => {
                    let vs = self.module_for(vertex)?;
                    let mut stages = vec![(vs.reflection, vk::ShaderStageFlags::VERTEX)];
                    if let Some(fragment) = fragment {
                        let fs = self.module_for(fragment)?;
                        stages.push((fs.reflection, vk::ShaderStageFlags::FRAGMENT));
                    }
                    PipelineReflection::merge(&stages)
                }
                FunctionKey::Compute { function } => {
                    let cs = self.module_for(function)?;
                    let flags = stage_flags(cs.reflection.execution_model());
                    PipelineReflection::merge(&[(cs.reflection, flags)])
                }
            };
            self.reflections.insert(key.clone(), merged);
        }
        Ok(self.reflections.get_mut(key).unwrap())
    }

    /// Pipeline layout for the key, parameterized by the binding manager's
    /// current per-set dynamic-buffer masks. Cached by (key, masks).
    pub fn pipeline_layout_for(
        &mut self,
        device: &ash::Device,
        key: &FunctionKey,
        dynamic_masks: &[u64],
    ) -> Result<vk::PipelineLayout> {
        self.reflection_for(key)?.pipeline_layout(device, dynamic_masks)
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, r) in self.reflections.iter_mut() {
            r.destroy(device);
        }
        self.reflections.clear();
        for m in self.modules.drain(..) {
            unsafe {
                device.destroy_shader_module(m.vk_module, None);
            }
        }
        self.functions.clear();
    }
}
