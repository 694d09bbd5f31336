//! Render passes, descriptor layout and graphics pipeline creation.

use ash::vk;

use crate::backend::types::{
    PipelineDescriptor, RenderPassDescriptor, LIGHT_BINDING, MATERIAL_BINDING, MAX_TEXTURE_COUNT,
    SAMPLER_BINDING, TEXTURE_BINDING, TRANSFORM_BINDING,
};
use crate::backend::{BackendError, BackendResult};

use super::conversion::{
    convert_fill_mode, convert_sample_count, convert_texture_format, convert_topology,
    convert_vertex_attribute_format,
};
use super::result_error;

/// Minimum fraction of samples shaded individually on multisampled targets.
const MIN_SAMPLE_SHADING: f32 = 0.2;

const MAX_DESCRIPTOR_SETS: u32 = 4096;

/// The one descriptor set layout every pipeline is built against.
pub fn create_descriptor_set_layout(device: &ash::Device) -> BackendResult<vk::DescriptorSetLayout> {
    let all_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(TRANSFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(all_stages),
        vk::DescriptorSetLayoutBinding::default()
            .binding(MATERIAL_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(all_stages),
        vk::DescriptorSetLayoutBinding::default()
            .binding(LIGHT_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(MAX_TEXTURE_COUNT as u32)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(MAX_TEXTURE_COUNT as u32)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ];

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| BackendError::DescriptorFailed(format!("{:?}", e)))
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
) -> BackendResult<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    unsafe { device.create_pipeline_layout(&create_info, None) }
        .map_err(|e| BackendError::PipelineCreationFailed(format!("{:?}", e)))
}

pub fn create_descriptor_pool(device: &ash::Device) -> BackendResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: MAX_DESCRIPTOR_SETS * 3,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: MAX_DESCRIPTOR_SETS * MAX_TEXTURE_COUNT as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: MAX_DESCRIPTOR_SETS * MAX_TEXTURE_COUNT as u32,
        },
    ];

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(MAX_DESCRIPTOR_SETS)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(|e| BackendError::DescriptorFailed(format!("{:?}", e)))
}

pub fn create_pipeline_cache(device: &ash::Device) -> BackendResult<vk::PipelineCache> {
    let create_info = vk::PipelineCacheCreateInfo::default();
    unsafe { device.create_pipeline_cache(&create_info, None) }
        .map_err(|e| BackendError::PipelineCreationFailed(format!("{:?}", e)))
}

/// Single subpass pass with attachments ordered color, depth, resolve.
///
/// Color (or resolve, when multisampled) ends in color-attachment layout; the caller
/// transitions it for sampling.
pub fn create_render_pass(
    device: &ash::Device,
    desc: &RenderPassDescriptor,
) -> BackendResult<vk::RenderPass> {
    let samples = convert_sample_count(desc.samples);
    let color_format = convert_texture_format(desc.color_format);

    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if desc.resolve {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let depth_ref = desc.depth_format.map(|format| {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(convert_texture_format(format))
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        vk::AttachmentReference {
            attachment: attachments.len() as u32 - 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    let resolve_refs = if desc.resolve {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
        vec![vk::AttachmentReference {
            attachment: attachments.len() as u32 - 1,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }]
    } else {
        Vec::new()
    };

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if !resolve_refs.is_empty() {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass];

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| result_error(e, BackendError::PipelineCreationFailed))
}

/// Build one graphics pipeline.
#[allow(clippy::too_many_arguments)]
pub fn create_graphics_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    desc: &PipelineDescriptor,
    vertex_module: vk::ShaderModule,
    pixel_module: vk::ShaderModule,
    render_pass: vk::RenderPass,
    samples: u32,
    sample_shading: bool,
) -> BackendResult<vk::Pipeline> {
    let entry_point = c"main";
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(entry_point),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(pixel_module)
            .name(entry_point),
    ];

    let binding_descriptions = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(desc.vertex_format.stride())
        .input_rate(vk::VertexInputRate::VERTEX)];

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
        .vertex_format
        .attributes()
        .iter()
        .map(|attribute| {
            vk::VertexInputAttributeDescription::default()
                .location(attribute.location)
                .binding(0)
                .format(convert_vertex_attribute_format(attribute.format))
                .offset(attribute.offset)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(desc.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let depth_bias = desc.depth.bias != 0.0;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_fill_mode(desc.fill_mode))
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(depth_bias)
        .depth_bias_constant_factor(if depth_bias { desc.depth.bias } else { 0.0 });

    let multisampled = samples > 1 && sample_shading;
    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(convert_sample_count(samples))
        .sample_shading_enable(multisampled)
        .min_sample_shading(if multisampled { MIN_SAMPLE_SHADING } else { 0.0 });

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth.test_enabled)
        .depth_write_enable(desc.depth.write_enabled)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe { device.create_graphics_pipelines(cache, &[pipeline_info], None) }
        .map_err(|(_, e)| result_error(e, BackendError::PipelineCreationFailed))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::PipelineCreationFailed("No pipeline returned".to_string()))
}
