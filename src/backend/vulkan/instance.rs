//! Vulkan instance creation.

use std::ffi::CStr;

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::backend::{BackendError, BackendResult};

use super::debug;

const API_VERSION: u32 = vk::API_VERSION_1_2;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Debug utils loader together with the messenger it created.
pub struct DebugMessenger {
    pub loader: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

/// Create an instance enabling the surface extensions `display` needs, plus validation
/// when requested and available.
pub fn create_instance(
    entry: &ash::Entry,
    validation: bool,
    display: Option<RawDisplayHandle>,
) -> BackendResult<(ash::Instance, Option<DebugMessenger>)> {
    let validation_available = validation && has_validation_layer(entry);
    if validation && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"graphics3d")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"graphics3d")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(API_VERSION);

    let mut extensions = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .to_vec(),
        None => Vec::new(),
    };
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layers = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    if !validation_available {
        return Ok((instance, None));
    }

    let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
    match debug::create_debug_messenger(&loader) {
        Ok(messenger) => Ok((instance, Some(DebugMessenger { loader, messenger }))),
        Err(err) => {
            unsafe { instance.destroy_instance(None) };
            Err(err)
        }
    }
}

pub fn destroy_instance(instance: &ash::Instance, debug: Option<&DebugMessenger>) {
    unsafe {
        if let Some(debug) = debug {
            debug
                .loader
                .destroy_debug_utils_messenger(debug.messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER_NAME))
}
