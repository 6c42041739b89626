//! Physical device selection and logical device creation.
use crate::commands::QueueClass;
use crate::error::{BackendError, Result};
use crate::instance::Instance;
use ash::vk;
use std::ffi::CStr;
use std::os::raw::c_char;

/// The logical device plus the queues the backend submits to.
///
/// Queue handles must not be used concurrently from two threads; the planner
/// thread is the only submitter.
pub struct Device {
    pub raw: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub graphics_family: u32,
    pub transfer_family: u32,
    graphics_queue: vk::Queue,
    transfer_queue: vk::Queue,
    pub pipeline_cache: vk::PipelineCache,
    depth24_stencil8_supported: bool,
}

impl Device {
    pub fn new(instance: &Instance) -> Result<Device> {
        let physical_devices = unsafe { instance.raw.enumerate_physical_devices()? };

        let mut selected = None;
        for &pd in &physical_devices {
            let props = unsafe { instance.raw.get_physical_device_properties(pd) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
            info!("physical device: {:?}", name);

            let families =
                unsafe { instance.raw.get_physical_device_queue_family_properties(pd) };
            let graphics = families.iter().position(|f| {
                f.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            });
            if let Some(graphics) = graphics {
                // prefer a dedicated transfer family for the copy queue
                let transfer = families
                    .iter()
                    .enumerate()
                    .position(|(i, f)| {
                        i != graphics
                            && f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                            && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    })
                    .unwrap_or(graphics);
                let discrete =
                    props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
                // first discrete device wins, otherwise first suitable
                if selected.is_none() || discrete {
                    selected = Some((pd, props, graphics as u32, transfer as u32));
                    if discrete {
                        break;
                    }
                }
            }
        }

        let (pd, properties, graphics_family, transfer_family) =
            selected.ok_or(BackendError::NoSuitableDevice)?;

        // maintenance1 is required for negative-height viewports
        let required_extensions: [&CStr; 2] = [
            ash::extensions::khr::Swapchain::name(),
            vk::KhrMaintenance1Fn::name(),
        ];
        let available = unsafe { instance.raw.enumerate_device_extension_properties(pd)? };
        for required in &required_extensions {
            let found = available.iter().any(|e| {
                (unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }) == *required
            });
            if !found {
                return Err(BackendError::MissingExtension(
                    required.to_string_lossy().into_owned(),
                ));
            }
        }
        let extension_ptrs: Vec<*const c_char> =
            required_extensions.iter().map(|e| e.as_ptr()).collect();

        let priorities = [1.0f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo {
            queue_family_index: graphics_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        }];
        if transfer_family != graphics_family {
            queue_infos.push(vk::DeviceQueueCreateInfo {
                queue_family_index: transfer_family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            });
        }

        let features = vk::PhysicalDeviceFeatures {
            independent_blend: vk::TRUE,
            depth_clamp: vk::TRUE,
            depth_bias_clamp: vk::TRUE,
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo {
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extension_ptrs.len() as u32,
            pp_enabled_extension_names: extension_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let raw = unsafe { instance.raw.create_device(pd, &create_info, None)? };
        let graphics_queue = unsafe { raw.get_device_queue(graphics_family, 0) };
        let transfer_queue = unsafe { raw.get_device_queue(transfer_family, 0) };

        let memory_properties =
            unsafe { instance.raw.get_physical_device_memory_properties(pd) };

        let d24s8 = unsafe {
            instance.raw.get_physical_device_format_properties(
                pd,
                vk::Format::D24_UNORM_S8_UINT,
            )
        };
        let depth24_stencil8_supported = d24s8
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);

        let pipeline_cache = unsafe {
            raw.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)?
        };

        info!(
            "device created (graphics family {}, transfer family {})",
            graphics_family, transfer_family
        );

        Ok(Device {
            raw,
            physical_device: pd,
            properties,
            memory_properties,
            graphics_family,
            transfer_family,
            graphics_queue,
            transfer_queue,
            pipeline_cache,
            depth24_stencil8_supported,
        })
    }

    pub fn queue_family(&self, class: QueueClass) -> u32 {
        match class {
            QueueClass::Graphics | QueueClass::Compute => self.graphics_family,
            QueueClass::Transfer => self.transfer_family,
        }
    }

    pub fn queue(&self, class: QueueClass) -> vk::Queue {
        match class {
            QueueClass::Graphics | QueueClass::Compute => self.graphics_queue,
            QueueClass::Transfer => self.transfer_queue,
        }
    }

    pub fn is_depth24_stencil8_supported(&self) -> bool {
        self.depth24_stencil8_supported
    }

    /// SIMD width assumed for threadgroup sizing on this device.
    pub fn thread_execution_width(&self) -> u32 {
        // API 1.0 has no query for this; 32 is correct for the desktop parts
        // we target and a safe under-estimate elsewhere.
        32
    }

    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
        }
    }

    pub fn destroy(&mut self) {
        unsafe {
            self.raw.destroy_pipeline_cache(self.pipeline_cache, None);
            self.raw.destroy_device(None);
        }
    }
}
