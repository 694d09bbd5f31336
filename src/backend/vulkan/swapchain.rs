//! Swapchain parameter selection and creation.

use ash::vk;

use crate::backend::types::Extent;
use crate::backend::{BackendError, BackendResult};

/// Prefer `B8G8R8A8_UNORM` in sRGB non-linear space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available, FIFO otherwise. Without vsync immediate mode wins if offered.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's current extent when it dictates one, otherwise clamp the request.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: Extent) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (zero means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    if supported.contains(vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED) {
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
    } else {
        vk::CompositeAlphaFlagsKHR::OPAQUE
    }
}

/// A native swapchain with its images and their views.
pub struct NativeSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

#[allow(clippy::too_many_arguments)]
pub fn create_swapchain(
    device: &ash::Device,
    surface_fn: &ash::khr::surface::Instance,
    swapchain_fn: &ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    requested: Extent,
    vsync: bool,
    old_swapchain: vk::SwapchainKHR,
) -> BackendResult<NativeSwapchain> {
    let map_err = |e: vk::Result| BackendError::SwapchainCreationFailed(format!("{:?}", e));

    let capabilities = unsafe {
        surface_fn.get_physical_device_surface_capabilities(physical_device, surface)
    }
    .map_err(map_err)?;
    let formats = unsafe { surface_fn.get_physical_device_surface_formats(physical_device, surface) }
        .map_err(map_err)?;
    let present_modes = unsafe {
        surface_fn.get_physical_device_surface_present_modes(physical_device, surface)
    }
    .map_err(map_err)?;

    let surface_format = choose_surface_format(&formats).ok_or_else(|| {
        BackendError::SwapchainCreationFailed("Surface reports no formats".to_string())
    })?;
    let present_mode = choose_present_mode(&present_modes, vsync);
    let extent = choose_extent(&capabilities, requested);
    let image_count = choose_image_count(&capabilities);

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(choose_composite_alpha(capabilities.supported_composite_alpha))
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { swapchain_fn.create_swapchain(&create_info, None) }.map_err(|e| {
        match e {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                BackendError::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => map_err(other),
        }
    })?;

    let images = match unsafe { swapchain_fn.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_fn.destroy_swapchain(swapchain, None) };
            return Err(map_err(e));
        }
    };

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(surface_format.format)
            .subresource_range(color_subresource_range(1));
        match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                unsafe {
                    for view in views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_fn.destroy_swapchain(swapchain, None);
                }
                return Err(map_err(e));
            }
        }
    }

    log::info!(
        "Created swapchain {}x{} with {} images ({:?}, {:?})",
        extent.width,
        extent.height,
        images.len(),
        surface_format.format,
        present_mode
    );

    Ok(NativeSwapchain {
        swapchain,
        format: surface_format.format,
        extent,
        images,
        views,
    })
}

pub fn color_subresource_range(mip_levels: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: mip_levels,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_unorm_srgb_nonlinear() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
        assert_eq!(
            choose_surface_format(&formats[..1]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_SRGB)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_and_extent_respect_surface_limits() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);

        let extent = choose_extent(&capabilities(2, 3), Extent::new(4000, 600));
        assert_eq!((extent.width, extent.height), (1920, 600));
    }

    #[test]
    fn premultiplied_alpha_when_supported() {
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
            ),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }
}
