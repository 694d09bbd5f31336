//! Command pool, one-shot submissions and image barrier recording.

use ash::vk;

use crate::backend::{BackendError, BackendResult};

use super::conversion::layout_access;
use super::result_error;

pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> BackendResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        BackendError::DeviceCreationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

/// Record commands into a temporary buffer, submit them and wait for completion.
pub fn submit_one_shot(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> BackendResult<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| result_error(e, BackendError::CommandFailed))?;

    let result = (|| {
        let cmd = command_buffers[0];
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))?;

        record(cmd);

        unsafe { device.end_command_buffer(cmd) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))?;

        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .and_then(|_| device.queue_wait_idle(queue))
        }
        .map_err(|e| result_error(e, BackendError::CommandFailed))
    })();

    unsafe { device.free_command_buffers(pool, &command_buffers) };
    result
}

/// Record a layout transition barrier for `level_count` mips starting at `base_mip`.
#[allow(clippy::too_many_arguments)]
pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    base_mip: u32,
    level_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access_mask, src_stage) = layout_access(old_layout, true);
    let (dst_access_mask, dst_stage) = layout_access(new_layout, false);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: base_mip,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Copy `staging` into mip 0 and fill the rest of the chain by successive linear blits.
/// Every level ends in shader-read layout.
pub fn record_texture_upload(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let color = vk::ImageAspectFlags::COLOR;
    transition_image_layout(
        device,
        cmd,
        image,
        color,
        0,
        mip_levels,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    let region = vk::BufferImageCopy::default()
        .image_subresource(subresource_layers(0))
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });
    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    let (mut mip_width, mut mip_height) = (width as i32, height as i32);
    for level in 1..mip_levels {
        transition_image_layout(
            device,
            cmd,
            image,
            color,
            level - 1,
            1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);
        let blit = vk::ImageBlit::default()
            .src_subresource(subresource_layers(level - 1))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .dst_subresource(subresource_layers(level))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ]);
        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        transition_image_layout(
            device,
            cmd,
            image,
            color,
            level - 1,
            1,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        mip_width = next_width;
        mip_height = next_height;
    }

    transition_image_layout(
        device,
        cmd,
        image,
        color,
        mip_levels - 1,
        1,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

pub fn subresource_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}
