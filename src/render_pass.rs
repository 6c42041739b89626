//! Render pass and framebuffer construction from a render-target descriptor.
use crate::error::Result;
use crate::render_target::RenderTargetDescriptor;
use ash::vk;
use std::ptr;

/// Creates the Vulkan render pass for a derived render-target descriptor,
/// preserving attachment and subpass ordering.
pub fn build_render_pass(
    device: &ash::Device,
    desc: &RenderTargetDescriptor,
) -> Result<vk::RenderPass> {
    let attachments: Vec<vk::AttachmentDescription> = desc
        .attachments
        .iter()
        .map(|a| vk::AttachmentDescription {
            flags: vk::AttachmentDescriptionFlags::empty(),
            format: a.format.to_vk(),
            samples: vk::SampleCountFlags::from_raw(a.samples),
            load_op: a.load_op,
            store_op: a.store_op,
            stencil_load_op: a.stencil_load_op,
            stencil_store_op: a.stencil_store_op,
            initial_layout: a.initial_layout,
            final_layout: a.final_layout,
        })
        .collect();

    // reference arrays must stay alive until vkCreateRenderPass returns, so
    // all sub-states are collected first and pointers are set afterwards
    struct SubpassRefs {
        color: Vec<vk::AttachmentReference>,
        inputs: Vec<vk::AttachmentReference>,
        depth_stencil: Option<vk::AttachmentReference>,
        preserve: Vec<u32>,
    }

    let refs: Vec<SubpassRefs> = desc
        .subpasses
        .iter()
        .map(|s| SubpassRefs {
            color: s
                .color
                .iter()
                .map(|&(attachment, layout)| vk::AttachmentReference { attachment, layout })
                .collect(),
            inputs: s
                .inputs
                .iter()
                .map(|&(attachment, layout)| vk::AttachmentReference { attachment, layout })
                .collect(),
            depth_stencil: s
                .depth_stencil
                .map(|(attachment, layout)| vk::AttachmentReference { attachment, layout }),
            preserve: s.preserve.to_vec(),
        })
        .collect();

    let subpasses: Vec<vk::SubpassDescription> = refs
        .iter()
        .map(|r| vk::SubpassDescription {
            flags: vk::SubpassDescriptionFlags::empty(),
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            input_attachment_count: r.inputs.len() as u32,
            p_input_attachments: if r.inputs.is_empty() {
                ptr::null()
            } else {
                r.inputs.as_ptr()
            },
            color_attachment_count: r.color.len() as u32,
            p_color_attachments: if r.color.is_empty() {
                ptr::null()
            } else {
                r.color.as_ptr()
            },
            p_resolve_attachments: ptr::null(),
            p_depth_stencil_attachment: r
                .depth_stencil
                .as_ref()
                .map_or(ptr::null(), |d| d as *const _),
            preserve_attachment_count: r.preserve.len() as u32,
            p_preserve_attachments: if r.preserve.is_empty() {
                ptr::null()
            } else {
                r.preserve.as_ptr()
            },
        })
        .collect();

    let dependencies: Vec<vk::SubpassDependency> = desc
        .dependencies
        .iter()
        .map(|d| vk::SubpassDependency {
            src_subpass: d.src_subpass,
            dst_subpass: d.dst_subpass,
            src_stage_mask: d.src_stage_mask,
            dst_stage_mask: d.dst_stage_mask,
            src_access_mask: d.src_access_mask,
            dst_access_mask: d.dst_access_mask,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        })
        .collect();

    let create_info = vk::RenderPassCreateInfo {
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: subpasses.len() as u32,
        p_subpasses: subpasses.as_ptr(),
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };

    let render_pass = unsafe { device.create_render_pass(&create_info, None)? };
    debug!(
        "created render pass {:?} ({} attachments, {} subpasses, {} dependencies)",
        render_pass,
        attachments.len(),
        subpasses.len(),
        dependencies.len()
    );
    Ok(render_pass)
}

/// Creates the framebuffer for a render pass; `views` must follow the
/// descriptor's attachment order.
pub fn build_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    desc: &RenderTargetDescriptor,
    views: &[vk::ImageView],
) -> Result<vk::Framebuffer> {
    assert_eq!(views.len(), desc.attachments.len());
    let create_info = vk::FramebufferCreateInfo {
        render_pass,
        attachment_count: views.len() as u32,
        p_attachments: views.as_ptr(),
        width: desc.extent.0,
        height: desc.extent.1,
        layers: 1,
        ..Default::default()
    };
    let framebuffer = unsafe { device.create_framebuffer(&create_info, None)? };
    Ok(framebuffer)
}
