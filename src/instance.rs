//! Vulkan instance creation and validation message forwarding.
use crate::error::{BackendError, Result};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::vk;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

#[cfg(all(unix, not(target_os = "android"), not(target_os = "macos")))]
fn surface_extension_names() -> Vec<*const c_char> {
    vec![
        khr::Surface::name().as_ptr(),
        khr::XlibSurface::name().as_ptr(),
        khr::WaylandSurface::name().as_ptr(),
    ]
}

#[cfg(target_os = "macos")]
fn surface_extension_names() -> Vec<*const c_char> {
    vec![
        khr::Surface::name().as_ptr(),
        ash::extensions::mvk::MacOSSurface::name().as_ptr(),
    ]
}

#[cfg(windows)]
fn surface_extension_names() -> Vec<*const c_char> {
    vec![
        khr::Surface::name().as_ptr(),
        khr::Win32Surface::name().as_ptr(),
    ]
}

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Forwards validation messages into the log. Never fatal.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        CStr::from_bytes_with_nul_unchecked(b"<empty>\0")
    } else {
        CStr::from_ptr((*data).p_message)
    };
    let level = if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log!(level, "(vulkan) {:?}", message);
    vk::FALSE
}

pub struct Instance {
    pub entry: ash::Entry,
    pub raw: ash::Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Creates the instance with the surface extensions and, when
    /// `enable_validation`, the debug machinery and the standard validation
    /// layer if it is installed.
    pub fn new(enable_validation: bool) -> Result<Instance> {
        let entry = unsafe {
            ash::Entry::load()
                .map_err(|e| BackendError::MissingExtension(format!("vulkan loader: {}", e)))?
        };

        let app_name = CString::new("vkgraph").unwrap();
        let app_info = vk::ApplicationInfo {
            p_application_name: app_name.as_ptr(),
            application_version: 0,
            p_engine_name: app_name.as_ptr(),
            engine_version: 0,
            api_version: vk::make_api_version(0, 1, 0, 0),
            ..Default::default()
        };

        let mut extension_names = surface_extension_names();
        if enable_validation {
            extension_names.push(DebugUtils::name().as_ptr());
        }

        let mut layer_names: Vec<CString> = Vec::new();
        if enable_validation {
            let available = entry
                .enumerate_instance_layer_properties()
                .unwrap_or_default();
            let has_validation = available.iter().any(|l| {
                let name = unsafe { CStr::from_ptr(l.layer_name.as_ptr()) };
                name.to_str() == Ok(VALIDATION_LAYER)
            });
            if has_validation {
                layer_names.push(CString::new(VALIDATION_LAYER).unwrap());
            } else {
                warn!("validation requested but {} is not installed", VALIDATION_LAYER);
            }
        }
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo {
            p_application_info: &app_info,
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: extension_names.len() as u32,
            pp_enabled_extension_names: extension_names.as_ptr(),
            ..Default::default()
        };

        let raw = unsafe { entry.create_instance(&create_info, None)? };
        info!("vulkan instance created (api 1.0)");

        let debug = if enable_validation {
            let loader = DebugUtils::new(&entry, &raw);
            let info = vk::DebugUtilsMessengerCreateInfoEXT {
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Instance { entry, raw, debug })
    }

    pub fn destroy(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}
