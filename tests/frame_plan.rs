//! End-to-end checks of the frame planning layer: pass grouping, render pass
//! derivation, and the synchronization schedule, over the scenarios the
//! backend is expected to handle.
use fxhash::FxHashMap;
use vkgraph::ash::vk;
use vkgraph::render_target::{derive_descriptor, group_passes, AttachmentState};
use vkgraph::resource_commands::{
    generate_resource_commands, Barrier, CommandTime, ResourceCommandStack, ResourceOp,
};
use vkgraph::{
    AttachmentBinding, BufferHandle, ClearValue, Command, PassRecord, PassType, Persistence,
    PixelFormat, QueueClass, RenderTargets, ResourceHandle, ResourceUsage, ResourceUsageTable,
    TextureHandle, UsageKind,
};

fn swapchain_targets(tex: u64, clear: Option<[f32; 4]>) -> RenderTargets {
    let mut t = RenderTargets::default();
    t.color.push(Some(AttachmentBinding {
        texture: TextureHandle(tex),
        mip_level: 0,
        slice: 0,
        clear: clear.map(ClearValue::Color),
    }));
    t.width = 800;
    t.height = 600;
    t.sample_count = 1;
    t
}

fn draw(index: u32, targets: RenderTargets, commands: std::ops::Range<usize>) -> PassRecord {
    PassRecord {
        pass_index: index,
        kind: PassType::Draw(targets),
        commands,
    }
}

fn usage(
    pass: u32,
    cmd: usize,
    kind: UsageKind,
    stages: vk::PipelineStageFlags,
    queue: QueueClass,
) -> ResourceUsage {
    ResourceUsage {
        pass_index: pass,
        command_index: cmd,
        kind,
        stages,
        queue,
    }
}

/// Scenario: one draw pass rendering a triangle into a cleared swapchain
/// attachment that is presented afterwards.
#[test]
fn single_pass_triangle() {
    let _ = pretty_env_logger::try_init();
    let passes = vec![draw(
        0,
        swapchain_targets(1, Some([0.0, 0.0, 0.0, 1.0])),
        0..2,
    )];
    let groups = group_passes(&passes);
    assert_eq!(groups, vec![0..1]);

    let mut states = FxHashMap::default();
    states.insert(
        TextureHandle(1),
        AttachmentState {
            format: PixelFormat::Bgra8Srgb,
            current_layout: vk::ImageLayout::UNDEFINED,
            initialized: false,
            is_swapchain: true,
        },
    );
    let usages = ResourceUsageTable::new();
    let targets = match &passes[0].kind {
        PassType::Draw(t) => t,
        _ => unreachable!(),
    };
    let desc = derive_descriptor(&[targets], 0, 0, &states, &usages);

    assert_eq!(desc.attachments.len(), 1);
    assert_eq!(desc.subpasses.len(), 1);
    assert!(desc.dependencies.is_empty());
    let a = &desc.attachments[0];
    assert_eq!(a.format.to_vk(), vk::Format::B8G8R8A8_SRGB);
    assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
    assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
    assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
    assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    assert_eq!(desc.extent, (800, 600));

    // layout state machine: undefined at entry, present after the group
    let mut layout = vk::ImageLayout::UNDEFINED;
    assert_eq!(a.initial_layout, layout);
    layout = a.final_layout;
    assert_eq!(layout, vk::ImageLayout::PRESENT_SRC_KHR);
}

/// Scenario: two consecutive draw passes over identical attachments merge
/// into one render pass with two subpasses and a single dependency.
#[test]
fn two_draws_same_targets_share_a_render_pass() {
    let passes = vec![
        draw(0, swapchain_targets(1, Some([0.0; 4])), 0..1),
        draw(1, swapchain_targets(1, None), 1..2),
    ];
    let groups = group_passes(&passes);
    assert_eq!(groups, vec![0..2]);

    let mut states = FxHashMap::default();
    states.insert(
        TextureHandle(1),
        AttachmentState {
            format: PixelFormat::Bgra8Srgb,
            current_layout: vk::ImageLayout::UNDEFINED,
            initialized: false,
            is_swapchain: true,
        },
    );
    let usages = ResourceUsageTable::new();
    let targets: Vec<&RenderTargets> = passes
        .iter()
        .map(|p| match &p.kind {
            PassType::Draw(t) => t,
            _ => unreachable!(),
        })
        .collect();
    let desc = derive_descriptor(&targets, 0, 1, &states, &usages);

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

/// Scenario: a compute pass writes a storage buffer, the following draw pass
/// reads it as a uniform buffer on the same queue family.
#[test]
fn compute_producer_draw_consumer() {
    let passes = vec![
        PassRecord {
            pass_index: 0,
            kind: PassType::Compute { label: None },
            commands: 0..1,
        },
        draw(1, swapchain_targets(1, Some([0.0; 4])), 1..3),
    ];
    let groups = group_passes(&passes);
    assert_eq!(groups.len(), 2);

    let mut usages = ResourceUsageTable::new();
    let shared = BufferHandle(42);
    usages.record(
        shared,
        usage(
            0,
            0,
            UsageKind::Write,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            QueueClass::Graphics,
        ),
    );
    usages.record(
        shared,
        usage(
            1,
            2,
            UsageKind::ConstantBuffer,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            QueueClass::Graphics,
        ),
    );

    let schedule = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);

    // exactly one pipeline barrier, right before the consuming command
    let barriers: Vec<_> = schedule
        .iter()
        .filter_map(|c| match &c.op {
            ResourceOp::PipelineBarrier {
                src_stages,
                dst_stages,
                barrier: Barrier::Buffer { src_access, dst_access, .. },
            } => Some((c.index, c.time, *src_stages, *dst_stages, *src_access, *dst_access)),
            _ => None,
        })
        .collect();
    assert_eq!(barriers.len(), 1);
    let (index, time, src_st, dst_st, src_ac, dst_ac) = barriers[0];
    assert_eq!(index, 2);
    assert_eq!(time, CommandTime::Before);
    assert_eq!(src_st, vk::PipelineStageFlags::COMPUTE_SHADER);
    assert_eq!(
        dst_st,
        vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
    );
    assert_eq!(src_ac, vk::AccessFlags::SHADER_WRITE);
    assert_eq!(dst_ac, vk::AccessFlags::UNIFORM_READ);

    // same queue family: no semaphore pair
    assert!(!schedule
        .iter()
        .any(|c| matches!(c.op, ResourceOp::SignalSemaphore { .. })));
}

/// Scenario: a blit pass on the copy queue writes a texture sampled by a
/// draw pass on the graphics queue.
#[test]
fn cross_family_transfer_synchronizes_with_a_semaphore() {
    let passes = vec![
        PassRecord {
            pass_index: 0,
            kind: PassType::Blit { label: None },
            commands: 0..1,
        },
        draw(1, swapchain_targets(1, Some([0.0; 4])), 1..3),
    ];
    let groups = group_passes(&passes);

    let mut usages = ResourceUsageTable::new();
    let shared = TextureHandle(7);
    usages.record(
        shared,
        usage(
            0,
            0,
            UsageKind::BlitDestination,
            vk::PipelineStageFlags::TRANSFER,
            QueueClass::Transfer,
        ),
    );
    usages.record(
        shared,
        usage(
            1,
            2,
            UsageKind::Read,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            QueueClass::Graphics,
        ),
    );

    let schedule = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);

    // one signal on the producer, one wait on the consumer, matching ids
    let signal = schedule
        .iter()
        .find_map(|c| match c.op {
            ResourceOp::SignalSemaphore { id } => Some((c.index, c.time, id)),
            _ => None,
        })
        .expect("producer must signal");
    let wait = schedule
        .iter()
        .find_map(|c| match c.op {
            ResourceOp::WaitForSemaphore { id, stages } => Some((c.index, id, stages)),
            _ => None,
        })
        .expect("consumer must wait");
    assert_eq!(signal.0, 0);
    assert_eq!(signal.1, CommandTime::After);
    assert_eq!(wait.0, 2);
    assert_eq!(signal.2, wait.1);
    assert_eq!(wait.2, vk::PipelineStageFlags::FRAGMENT_SHADER);

    // the texture ends up shader-readable before the draw
    let (old_layout, new_layout) = schedule
        .iter()
        .find_map(|c| match c.op {
            ResourceOp::PipelineBarrier {
                barrier: Barrier::Image { old_layout, new_layout, .. },
                ..
            } => Some((old_layout, new_layout)),
            _ => None,
        })
        .expect("layout transition on the consumer side");
    assert_eq!(old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    assert_eq!(new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

/// Every writer→reader pair across group boundaries must be covered by a
/// barrier, an event, or a semaphore pair.
#[test]
fn hazards_are_always_covered() {
    let passes = vec![
        PassRecord {
            pass_index: 0,
            kind: PassType::Compute { label: None },
            commands: 0..2,
        },
        PassRecord {
            pass_index: 1,
            kind: PassType::Compute { label: None },
            commands: 2..4,
        },
        draw(2, swapchain_targets(1, Some([0.0; 4])), 4..6),
    ];
    let groups = group_passes(&passes);

    let mut usages = ResourceUsageTable::new();
    // chain: pass 0 writes A, pass 1 reads A and writes B, pass 2 reads B
    let a = BufferHandle(1);
    let b = BufferHandle(2);
    usages.record(
        a,
        usage(0, 1, UsageKind::Write, vk::PipelineStageFlags::COMPUTE_SHADER, QueueClass::Graphics),
    );
    usages.record(
        a,
        usage(1, 2, UsageKind::Read, vk::PipelineStageFlags::COMPUTE_SHADER, QueueClass::Graphics),
    );
    usages.record(
        b,
        usage(1, 3, UsageKind::Write, vk::PipelineStageFlags::COMPUTE_SHADER, QueueClass::Graphics),
    );
    usages.record(
        b,
        usage(
            2,
            5,
            UsageKind::ConstantBuffer,
            vk::PipelineStageFlags::VERTEX_SHADER,
            QueueClass::Graphics,
        ),
    );

    let schedule = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);

    // each hazard pair produces its own synchronization op
    let covered: Vec<usize> = schedule
        .iter()
        .filter(|c| {
            matches!(
                c.op,
                ResourceOp::PipelineBarrier { .. }
                    | ResourceOp::WaitForSemaphore { .. }
                    | ResourceOp::WaitForEvent { .. }
            )
        })
        .map(|c| c.index)
        .collect();
    assert!(covered.contains(&2), "A's read is unsynchronized");
    assert!(covered.contains(&5), "B's read is unsynchronized");
}

/// The schedule drains exactly in command order.
#[test]
fn schedule_consumes_in_command_order() {
    let passes = vec![
        PassRecord {
            pass_index: 0,
            kind: PassType::Compute { label: None },
            commands: 0..2,
        },
        draw(1, swapchain_targets(1, Some([0.0; 4])), 2..4),
    ];
    let groups = group_passes(&passes);
    let mut usages = ResourceUsageTable::new();
    let h = BufferHandle(5);
    usages.record(
        h,
        usage(0, 0, UsageKind::Write, vk::PipelineStageFlags::COMPUTE_SHADER, QueueClass::Graphics),
    );
    usages.record(
        h,
        usage(1, 3, UsageKind::Read, vk::PipelineStageFlags::VERTEX_SHADER, QueueClass::Graphics),
    );
    let schedule = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);
    let total = schedule.len();
    let mut stack = ResourceCommandStack::new(schedule);

    let mut drained = 0;
    for index in 0..4usize {
        drained += stack.drain_for(index, CommandTime::Before).len();
        drained += stack.drain_for(index, CommandTime::After).len();
    }
    assert_eq!(drained, total);
    assert!(stack.is_empty());
}

/// Commands referencing resources by handle survive a round trip through the
/// contract types.
#[test]
fn command_stream_round_trip() {
    let commands = vec![
        Command::SetBuffer {
            path: vkgraph::BindingPath::pack(0, 0, 0),
            buffer: BufferHandle(1),
            offset: 0,
        },
        Command::DrawPrimitives {
            topology: vkgraph::PrimitiveTopology::Triangle,
            vertex_start: 0,
            vertex_count: 3,
            instance_count: 1,
            base_instance: 0,
        },
    ];
    match &commands[1] {
        Command::DrawPrimitives {
            vertex_count,
            instance_count,
            ..
        } => {
            assert_eq!((*vertex_count, *instance_count), (3, 1));
        }
        _ => panic!("unexpected command"),
    }
    let handles: Vec<ResourceHandle> = vec![BufferHandle(1).into(), TextureHandle(2).into()];
    assert_ne!(handles[0], handles[1]);
}
