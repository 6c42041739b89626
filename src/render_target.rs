//! Render-target grouping and render pass derivation.
//!
//! Consecutive draw passes with compatible attachment sets become one Vulkan
//! render pass with one subpass per pass. This module derives everything the
//! render pass builder needs: per-attachment load/store ops and layouts,
//! per-subpass attachment references, and subpass dependencies. It is pure
//! bookkeeping over the pass list and the usage table; no Vulkan objects are
//! touched here.
use crate::commands::{
    AttachmentBinding, ClearValue, PassRecord, PassType, RenderTargets, ResourceUsageTable,
    UsageKind,
};
use crate::format::PixelFormat;
use crate::resource::TextureHandle;
use ash::vk;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::ops::Range;

/// What the group derivation needs to know about an attachment's backing at
/// group entry.
#[derive(Copy, Clone, Debug)]
pub struct AttachmentState {
    pub format: PixelFormat,
    pub current_layout: vk::ImageLayout,
    /// Whether the texture holds meaningful contents at group entry.
    pub initialized: bool,
    pub is_swapchain: bool,
}

/// One attachment of the merged render pass.
#[derive(Clone, Debug)]
pub struct AttachmentInfo {
    pub binding: AttachmentBinding,
    pub format: PixelFormat,
    pub samples: u32,
    pub is_depth_stencil: bool,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub clear_value: Option<ClearValue>,
}

/// Attachment references of one subpass, as indices into the attachment list.
#[derive(Clone, Debug, Default)]
pub struct SubpassInfo {
    pub color: SmallVec<[(u32, vk::ImageLayout); 8]>,
    pub depth_stencil: Option<(u32, vk::ImageLayout)>,
    pub inputs: SmallVec<[(u32, vk::ImageLayout); 8]>,
    pub preserve: SmallVec<[u32; 8]>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

/// The derived description of one render-target group.
#[derive(Clone, Debug)]
pub struct RenderTargetDescriptor {
    /// Depth/stencil attachment first if present, then colors in slot order.
    pub attachments: Vec<AttachmentInfo>,
    pub subpasses: Vec<SubpassInfo>,
    pub dependencies: Vec<SubpassDependency>,
    pub extent: (u32, u32),
    pub sample_count: u32,
    pub first_pass_index: u32,
}

impl RenderTargetDescriptor {
    /// Pipeline-compatibility signature: pipelines created against one group
    /// may be reused in any group with the same signature.
    pub fn signature(&self) -> RenderTargetSignature {
        RenderTargetSignature {
            formats: self.attachments.iter().map(|a| a.format.to_vk()).collect(),
            has_depth_stencil: self.attachments.first().map_or(false, |a| a.is_depth_stencil),
            sample_count: self.sample_count,
            subpass_count: self.subpasses.len() as u32,
        }
    }

    pub fn color_attachment_count(&self) -> usize {
        self.attachments.iter().filter(|a| !a.is_depth_stencil).count()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderTargetSignature {
    pub formats: SmallVec<[vk::Format; 9]>,
    pub has_depth_stencil: bool,
    pub sample_count: u32,
    pub subpass_count: u32,
}

//--------------------------------------------------------------------------------------------------
// Grouping

/// Splits the pass list into maximal runs of consecutive draw passes with
/// compatible render targets. Non-draw passes become single-element ranges.
pub fn group_passes(passes: &[PassRecord]) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < passes.len() {
        let start = i;
        if let PassType::Draw(ref targets) = passes[i].kind {
            i += 1;
            while i < passes.len() {
                match passes[i].kind {
                    PassType::Draw(ref next) if targets.compatible_with(next) => i += 1,
                    _ => break,
                }
            }
        } else {
            i += 1;
        }
        groups.push(start..i);
    }
    groups
}

//--------------------------------------------------------------------------------------------------
// Derivation

struct AttachmentSlot {
    binding: AttachmentBinding,
    is_depth_stencil: bool,
    /// Clear declared by the first subpass using the attachment.
    first_clear: Option<ClearValue>,
}

fn collect_slots(group: &[&RenderTargets]) -> Vec<AttachmentSlot> {
    // attachment order is fixed: depth/stencil first, then colors by slot.
    // every subpass binds the same attachments, so "the first subpass using
    // the attachment" is always the group's first pass.
    let first = group[0];
    let mut slots = Vec::new();
    if let Some(ds) = first.depth_stencil {
        slots.push(AttachmentSlot {
            binding: ds,
            is_depth_stencil: true,
            first_clear: ds.clear,
        });
    }
    for binding in first.color.iter() {
        if let Some(b) = binding {
            slots.push(AttachmentSlot {
                binding: *b,
                is_depth_stencil: false,
                first_clear: b.clear,
            });
        }
    }
    slots
}

/// Derives the render-target descriptor for a group of compatible draw
/// passes.
///
/// `states` describes each attachment's backing at group entry;
/// `last_pass_index` is the pass index of the group's final subpass, used to
/// look up consumers after the group.
pub fn derive_descriptor(
    group: &[&RenderTargets],
    first_pass_index: u32,
    last_pass_index: u32,
    states: &FxHashMap<TextureHandle, AttachmentState>,
    usages: &ResourceUsageTable,
) -> RenderTargetDescriptor {
    assert!(!group.is_empty());
    let slots = collect_slots(group);
    let first = group[0];

    let mut attachments = Vec::with_capacity(slots.len());
    let mut dependencies: Vec<SubpassDependency> = Vec::new();

    for slot in &slots {
        let state = states
            .get(&slot.binding.texture)
            .copied()
            .unwrap_or(AttachmentState {
                format: PixelFormat::Rgba8Unorm,
                current_layout: vk::ImageLayout::UNDEFINED,
                initialized: false,
                is_swapchain: false,
            });

        // load action
        let load_op = if slot.first_clear.is_some()
            && state.current_layout != vk::ImageLayout::PRESENT_SRC_KHR
        {
            vk::AttachmentLoadOp::CLEAR
        } else if state.initialized {
            vk::AttachmentLoadOp::LOAD
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        };

        // store action: keep the contents iff someone consumes them later
        // (presentation counts for swapchain images)
        let next_use = usages.next_use_after(slot.binding.texture, last_pass_index);
        let store_op = if next_use.is_some() || state.is_swapchain {
            vk::AttachmentStoreOp::STORE
        } else {
            vk::AttachmentStoreOp::DONT_CARE
        };

        let initial_layout = if load_op == vk::AttachmentLoadOp::DONT_CARE {
            vk::ImageLayout::UNDEFINED
        } else {
            state.current_layout
        };

        let final_layout = match next_use {
            Some(u) => u.kind.image_layout(),
            None => {
                if state.is_swapchain {
                    vk::ImageLayout::PRESENT_SRC_KHR
                } else if slot.is_depth_stencil {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                }
            }
        };

        let has_stencil = state.format.is_stencil();
        attachments.push(AttachmentInfo {
            binding: slot.binding,
            format: state.format,
            samples: first.sample_count.max(1),
            is_depth_stencil: slot.is_depth_stencil,
            load_op,
            store_op,
            stencil_load_op: if has_stencil {
                load_op
            } else {
                vk::AttachmentLoadOp::DONT_CARE
            },
            stencil_store_op: if has_stencil {
                store_op
            } else {
                vk::AttachmentStoreOp::DONT_CARE
            },
            initial_layout,
            final_layout,
            clear_value: slot.first_clear,
        });
    }

    // subpasses: attachment sets are identical across the group, only the
    // input-attachment reads differ
    let mut subpasses = Vec::with_capacity(group.len());
    for (subpass, _) in group.iter().enumerate() {
        let pass_index = first_pass_index + subpass as u32;
        let mut info = SubpassInfo::default();
        for (a, slot) in slots.iter().enumerate() {
            let reads_as_input = usages
                .usages(slot.binding.texture)
                .iter()
                .any(|u| u.pass_index == pass_index && u.kind == UsageKind::InputAttachment);
            let layout = if reads_as_input {
                vk::ImageLayout::GENERAL
            } else if slot.is_depth_stencil {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            };
            if reads_as_input {
                info.inputs.push((a as u32, layout));
            }
            if slot.is_depth_stencil {
                info.depth_stencil = Some((a as u32, layout));
            } else {
                info.color.push((a as u32, layout));
            }
        }
        subpasses.push(info);
    }

    // inter-subpass dependencies: a later subpass reads what an earlier one
    // wrote; with identical attachment sets that means every consecutive pair
    for (a, slot) in slots.iter().enumerate() {
        let (src_stage, src_access) = if slot.is_depth_stencil {
            (
                vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        } else {
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
        };
        for dst in 1..subpasses.len() {
            let reads_as_input = subpasses[dst].inputs.iter().any(|&(i, _)| i == a as u32);
            let (dst_stage, dst_access) = if reads_as_input {
                (
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::AccessFlags::INPUT_ATTACHMENT_READ,
                )
            } else if slot.is_depth_stencil {
                (
                    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
            } else {
                (
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::AccessFlags::COLOR_ATTACHMENT_READ,
                )
            };
            merge_dependency(
                &mut dependencies,
                SubpassDependency {
                    src_subpass: dst as u32 - 1,
                    dst_subpass: dst as u32,
                    src_stage_mask: src_stage,
                    dst_stage_mask: dst_stage,
                    src_access_mask: src_access,
                    dst_access_mask: dst_access,
                },
            );
        }

        // external entry dependency when contents are loaded from before
        let info = &attachments[a];
        if info.load_op == vk::AttachmentLoadOp::LOAD {
            merge_dependency(
                &mut dependencies,
                SubpassDependency {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage_mask: src_stage,
                    dst_stage_mask: src_stage,
                    src_access_mask: src_access,
                    dst_access_mask: src_access
                        | if slot.is_depth_stencil {
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        } else {
                            vk::AccessFlags::COLOR_ATTACHMENT_READ
                        },
                },
            );
        }

        // external exit dependency towards a known consumer
        if info.store_op == vk::AttachmentStoreOp::STORE {
            if let Some(next) = usages.next_use_after(slot.binding.texture, last_pass_index) {
                merge_dependency(
                    &mut dependencies,
                    SubpassDependency {
                        src_subpass: subpasses.len() as u32 - 1,
                        dst_subpass: vk::SUBPASS_EXTERNAL,
                        src_stage_mask: src_stage,
                        dst_stage_mask: next.stages,
                        src_access_mask: src_access,
                        dst_access_mask: next.kind.access_mask(),
                    },
                );
            }
        }
    }

    RenderTargetDescriptor {
        attachments,
        subpasses,
        dependencies,
        extent: (first.width, first.height),
        sample_count: first.sample_count.max(1),
        first_pass_index,
    }
}

/// Coalesces dependencies with the same (src, dst) pair by OR-ing the masks.
fn merge_dependency(deps: &mut Vec<SubpassDependency>, dep: SubpassDependency) {
    for d in deps.iter_mut() {
        if d.src_subpass == dep.src_subpass && d.dst_subpass == dep.dst_subpass {
            d.src_stage_mask |= dep.src_stage_mask;
            d.dst_stage_mask |= dep.dst_stage_mask;
            d.src_access_mask |= dep.src_access_mask;
            d.dst_access_mask |= dep.dst_access_mask;
            return;
        }
    }
    deps.push(dep);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{QueueClass, ResourceUsage};

    fn targets(tex: u64, clear: Option<ClearValue>) -> RenderTargets {
        let mut t = RenderTargets::default();
        t.color.push(Some(AttachmentBinding {
            texture: TextureHandle(tex),
            mip_level: 0,
            slice: 0,
            clear,
        }));
        t.width = 800;
        t.height = 600;
        t.sample_count = 1;
        t
    }

    fn draw_pass(index: u32, targets: RenderTargets) -> PassRecord {
        PassRecord {
            pass_index: index,
            kind: PassType::Draw(targets),
            commands: 0..0,
        }
    }

    fn swapchain_state() -> FxHashMap<TextureHandle, AttachmentState> {
        let mut m = FxHashMap::default();
        m.insert(
            TextureHandle(1),
            AttachmentState {
                format: PixelFormat::Bgra8Srgb,
                current_layout: vk::ImageLayout::UNDEFINED,
                initialized: false,
                is_swapchain: true,
            },
        );
        m
    }

    #[test]
    fn grouping_merges_compatible_draw_runs() {
        let passes = vec![
            draw_pass(0, targets(1, None)),
            draw_pass(1, targets(1, None)),
            draw_pass(2, targets(2, None)),
            PassRecord {
                pass_index: 3,
                kind: PassType::Compute { label: None },
                commands: 0..0,
            },
            draw_pass(4, targets(2, None)),
        ];
        let groups = group_passes(&passes);
        assert_eq!(groups, vec![0..2, 2..3, 3..4, 4..5]);
    }

    #[test]
    fn single_pass_swapchain_triangle() {
        // one draw pass, cleared swapchain color attachment, presented after
        let t = targets(1, Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])));
        let usages = ResourceUsageTable::new();
        let desc = derive_descriptor(&[&t], 0, 0, &swapchain_state(), &usages);

        assert_eq!(desc.attachments.len(), 1);
        assert_eq!(desc.subpasses.len(), 1);
        let a = &desc.attachments[0];
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(desc.dependencies.is_empty());
        assert_eq!(desc.extent, (800, 600));
    }

    #[test]
    fn two_subpasses_get_one_dependency() {
        let a = targets(1, Some(ClearValue::Color([0.0; 4])));
        let b = targets(1, None);
        let usages = ResourceUsageTable::new();
        let desc = derive_descriptor(&[&a, &b], 0, 1, &swapchain_state(), &usages);

        assert_eq!(desc.subpasses.len(), 2);
        assert_eq!(desc.dependencies.len(), 1);
        let d = &desc.dependencies[0];
        assert_eq!((d.src_subpass, d.dst_subpass), (0, 1));
        assert_eq!(
            d.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(d.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(d.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(d.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_READ);
    }

    #[test]
    fn initialized_attachment_loads_and_adds_external_dependency() {
        let t = targets(2, None);
        let mut states = FxHashMap::default();
        states.insert(
            TextureHandle(2),
            AttachmentState {
                format: PixelFormat::Rgba16Float,
                current_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                initialized: true,
                is_swapchain: false,
            },
        );
        let usages = ResourceUsageTable::new();
        let desc = derive_descriptor(&[&t], 0, 0, &states, &usages);

        let a = &desc.attachments[0];
        assert_eq!(a.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(a.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        // nothing consumes it later: contents are discarded
        assert_eq!(a.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert!(desc
            .dependencies
            .iter()
            .any(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == 0));
    }

    #[test]
    fn stored_attachment_final_layout_follows_consumer() {
        let t = targets(3, Some(ClearValue::Color([0.0; 4])));
        let mut states = FxHashMap::default();
        states.insert(
            TextureHandle(3),
            AttachmentState {
                format: PixelFormat::Rgba8Unorm,
                current_layout: vk::ImageLayout::UNDEFINED,
                initialized: false,
                is_swapchain: false,
            },
        );
        let mut usages = ResourceUsageTable::new();
        usages.record(
            TextureHandle(3),
            ResourceUsage {
                pass_index: 5,
                command_index: 40,
                kind: UsageKind::Read,
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                queue: QueueClass::Graphics,
            },
        );
        let desc = derive_descriptor(&[&t], 0, 0, &states, &usages);

        let a = &desc.attachments[0];
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        // exit dependency towards the sampling pass
        let exit = desc
            .dependencies
            .iter()
            .find(|d| d.dst_subpass == vk::SUBPASS_EXTERNAL)
            .unwrap();
        assert_eq!(exit.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(exit.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn depth_attachment_comes_first_and_defaults_to_general() {
        let mut t = targets(1, None);
        t.depth_stencil = Some(AttachmentBinding {
            texture: TextureHandle(7),
            mip_level: 0,
            slice: 0,
            clear: Some(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
        });
        let mut states = swapchain_state();
        states.insert(
            TextureHandle(7),
            AttachmentState {
                format: PixelFormat::Depth32Float,
                current_layout: vk::ImageLayout::UNDEFINED,
                initialized: false,
                is_swapchain: false,
            },
        );
        let usages = ResourceUsageTable::new();
        let desc = derive_descriptor(&[&t], 0, 0, &states, &usages);

        assert_eq!(desc.attachments.len(), 2);
        assert!(desc.attachments[0].is_depth_stencil);
        assert_eq!(desc.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::GENERAL);
        assert_eq!(
            desc.subpasses[0].depth_stencil,
            Some((0, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
        );
        assert_eq!(desc.subpasses[0].color.as_slice(), &[(1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]);
    }

    #[test]
    fn input_attachment_read_uses_general_layout() {
        let a = targets(1, Some(ClearValue::Color([0.0; 4])));
        let b = targets(1, None);
        let mut usages = ResourceUsageTable::new();
        usages.record(
            TextureHandle(1),
            ResourceUsage {
                pass_index: 1,
                command_index: 10,
                kind: UsageKind::InputAttachment,
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                queue: QueueClass::Graphics,
            },
        );
        let desc = derive_descriptor(&[&a, &b], 0, 1, &swapchain_state(), &usages);

        assert!(desc.subpasses[0].inputs.is_empty());
        assert_eq!(desc.subpasses[1].inputs.as_slice(), &[(0, vk::ImageLayout::GENERAL)]);
        assert_eq!(desc.subpasses[1].color.as_slice(), &[(0, vk::ImageLayout::GENERAL)]);
        let d = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == 0 && d.dst_subpass == 1)
            .unwrap();
        assert!(d.dst_access_mask.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));
    }
}
