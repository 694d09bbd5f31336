//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::backend::types::{DeviceCapabilities, TextureFormat};
use crate::backend::{BackendError, BackendResult};

use super::conversion::{convert_texture_format, sample_count_mask};

/// Extensions enabled when present; each one adds to a device's score.
const OPTIONAL_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::incremental_present::NAME];

const DEPTH_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Depth32Float,
    TextureFormat::Depth32FloatStencil8,
    TextureFormat::Depth24UnormStencil8,
];

/// Scoring inputs gathered from one physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub has_swapchain: bool,
    pub optional_extensions: u32,
    pub geometry_shader: bool,
    pub dual_src_blend: bool,
    pub sample_rate_shading: bool,
    pub sampler_anisotropy: bool,
    /// Needed for wireframe pipelines; not scored.
    pub fill_mode_non_solid: bool,
    /// Has a graphics queue able to present to the surface, and the surface reports at
    /// least one format. Always true without a surface.
    pub presentable: bool,
}

/// Rank a device; negative scores are unusable.
pub fn score_device(candidate: &DeviceCandidate) -> i32 {
    if !candidate.has_swapchain || !candidate.presentable {
        return -1;
    }

    let mut score = match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100,
        vk::PhysicalDeviceType::INTEGRATED_GPU | vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    };
    score += 2 * candidate.optional_extensions as i32;
    score += [
        candidate.geometry_shader,
        candidate.dual_src_blend,
        candidate.sample_rate_shading,
        candidate.sampler_anisotropy,
    ]
    .iter()
    .filter(|enabled| **enabled)
    .count() as i32;
    score
}

/// The device picked for rendering.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub candidate: DeviceCandidate,
    pub optional_extensions: Vec<&'static CStr>,
}

/// Enumerate physical devices and keep the best scoring one.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> BackendResult<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    let mut scored = Vec::with_capacity(devices.len());
    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(physical_device) }
                .unwrap_or_default();
        let has_extension = |name: &CStr| {
            extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
        };
        let optional_extensions: Vec<&'static CStr> = OPTIONAL_DEVICE_EXTENSIONS
            .iter()
            .copied()
            .filter(|name| has_extension(name))
            .collect();

        let queue_family = find_queue_family(instance, physical_device, surface);
        let has_formats = match surface {
            Some((surface_fn, surface)) => unsafe {
                surface_fn.get_physical_device_surface_formats(physical_device, surface)
            }
            .is_ok_and(|formats| !formats.is_empty()),
            None => true,
        };

        let candidate = DeviceCandidate {
            device_type: properties.device_type,
            has_swapchain: has_extension(ash::khr::swapchain::NAME),
            optional_extensions: optional_extensions.len() as u32,
            geometry_shader: features.geometry_shader == vk::TRUE,
            dual_src_blend: features.dual_src_blend == vk::TRUE,
            sample_rate_shading: features.sample_rate_shading == vk::TRUE,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
            presentable: queue_family.is_some() && has_formats,
        };
        let score = score_device(&candidate);

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            name,
            properties.device_type,
            score
        );

        let Some(queue_family) = queue_family else {
            continue;
        };
        scored.push((
            score,
            SelectedDevice {
                physical_device,
                queue_family,
                candidate,
                optional_extensions,
            },
        ));
    }

    best_scoring(scored)
}

/// Highest non-negative score wins, the first one on ties.
///
/// Fails with [`BackendError::Unsupported`] when nothing qualifies.
pub fn best_scoring<T>(scored: impl IntoIterator<Item = (i32, T)>) -> BackendResult<T> {
    let mut best: Option<(i32, T)> = None;
    for (score, item) in scored {
        if score < 0 || best.as_ref().is_some_and(|(best_score, _)| *best_score >= score) {
            continue;
        }
        best = Some((score, item));
    }
    best.map(|(_, item)| item)
        .ok_or_else(|| BackendError::Unsupported("No suitable GPU found".to_string()))
}

/// Find a queue family with graphics support that can also present to `surface`.
pub fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Option<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return None;
        }
        let presents = match surface {
            Some((surface_fn, surface)) => unsafe {
                surface_fn.get_physical_device_surface_support(physical_device, index, surface)
            }
            .unwrap_or(false),
            None => true,
        };
        presents.then_some(index)
    })
}

/// Create the logical device enabling every scored feature the hardware has.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> BackendResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&queue_priorities)];

    let mut extensions = vec![ash::khr::swapchain::NAME.as_ptr()];
    extensions.extend(selected.optional_extensions.iter().map(|name| name.as_ptr()));

    let candidate = &selected.candidate;
    let features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(candidate.geometry_shader)
        .dual_src_blend(candidate.dual_src_blend)
        .sample_rate_shading(candidate.sample_rate_shading)
        .sampler_anisotropy(candidate.sampler_anisotropy)
        .fill_mode_non_solid(candidate.fill_mode_non_solid);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        BackendError::DeviceCreationFailed(format!("Failed to create logical device: {:?}", e))
    })
}

pub fn query_capabilities(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> DeviceCapabilities {
    let physical_device = selected.physical_device;
    let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;

    let depth_formats = DEPTH_FORMATS
        .iter()
        .copied()
        .filter(|format| {
            let properties = unsafe {
                instance.get_physical_device_format_properties(
                    physical_device,
                    convert_texture_format(*format),
                )
            };
            properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .collect();

    DeviceCapabilities {
        min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment.max(1),
        color_sample_counts: sample_count_mask(limits.framebuffer_color_sample_counts),
        depth_sample_counts: sample_count_mask(limits.framebuffer_depth_sample_counts),
        depth_formats,
        max_sampler_anisotropy: if selected.candidate.sampler_anisotropy {
            limits.max_sampler_anisotropy
        } else {
            1.0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            has_swapchain: true,
            presentable: true,
            ..Default::default()
        }
    }

    #[test]
    fn device_type_dominates_score() {
        assert_eq!(score_device(&candidate(vk::PhysicalDeviceType::DISCRETE_GPU)), 100);
        assert_eq!(score_device(&candidate(vk::PhysicalDeviceType::INTEGRATED_GPU)), 50);
        assert_eq!(score_device(&candidate(vk::PhysicalDeviceType::VIRTUAL_GPU)), 50);
        assert_eq!(score_device(&candidate(vk::PhysicalDeviceType::CPU)), 1);
    }

    #[test]
    fn extensions_and_features_add_to_score() {
        let device = DeviceCandidate {
            optional_extensions: 1,
            geometry_shader: true,
            sampler_anisotropy: true,
            ..candidate(vk::PhysicalDeviceType::INTEGRATED_GPU)
        };
        assert_eq!(score_device(&device), 50 + 2 + 2);
    }

    #[test]
    fn unusable_devices_score_negative() {
        let no_swapchain = DeviceCandidate {
            has_swapchain: false,
            ..candidate(vk::PhysicalDeviceType::DISCRETE_GPU)
        };
        assert_eq!(score_device(&no_swapchain), -1);

        let no_format = DeviceCandidate {
            presentable: false,
            ..candidate(vk::PhysicalDeviceType::DISCRETE_GPU)
        };
        assert_eq!(score_device(&no_format), -1);
    }

    #[test]
    fn no_usable_device_is_unsupported() {
        let no_swapchain = DeviceCandidate {
            has_swapchain: false,
            ..candidate(vk::PhysicalDeviceType::DISCRETE_GPU)
        };
        let score = score_device(&no_swapchain);
        assert!(score < 0);
        assert!(matches!(
            best_scoring([(score, "discrete")]),
            Err(BackendError::Unsupported(_))
        ));
        assert!(matches!(
            best_scoring(Vec::<(i32, ())>::new()),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn best_scoring_keeps_first_on_ties() {
        let picked = best_scoring([(50, "first"), (-1, "rejected"), (50, "second"), (1, "cpu")]);
        assert_eq!(picked.unwrap(), "first");
        assert_eq!(best_scoring([(1, "cpu"), (100, "discrete")]).unwrap(), "discrete");
    }
}
