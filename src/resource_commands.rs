//! Resource commands: the per-command-index synchronization schedule.
//!
//! A frame's resource commands are derived from the usage table before
//! encoding starts. They live on a stack consumed from the end; for one
//! command index the before-ops run in reverse stack order until a different
//! index surfaces, then the command itself is encoded, then the after-ops run
//! the same way. That ordering guarantees barriers preceding a command
//! execute before it and follow-up transitions execute right after it.
use crate::commands::{PassRecord, QueueClass, ResourceUsageTable, UsageKind};
use crate::resource::{BufferHandle, Persistence, ResourceHandle, TextureHandle};
use ash::vk;
use std::ops::Range;

/// When an op runs relative to its command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandTime {
    Before,
    After,
}

/// Layout transition request attached to a texture materialization. The old
/// layout is substituted with the stored layout at execution time.
#[derive(Copy, Clone, Debug)]
pub struct TextureBarrier {
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Copy, Clone, Debug)]
pub enum Barrier {
    Image {
        texture: TextureHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    Buffer {
        buffer: BufferHandle,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        offset: u64,
        size: u64,
    },
}

#[derive(Clone, Debug)]
pub enum ResourceOp {
    MaterializeBuffer {
        buffer: BufferHandle,
        usage: vk::BufferUsageFlags,
        sharing_mode: vk::SharingMode,
    },
    MaterializeTexture {
        texture: TextureHandle,
        usage: vk::ImageUsageFlags,
        sharing_mode: vk::SharingMode,
        dst_stage_mask: vk::PipelineStageFlags,
        /// Absent for attachment usages: the render pass transitions those.
        barrier: Option<TextureBarrier>,
    },
    DisposeBuffer {
        buffer: BufferHandle,
    },
    DisposeTexture {
        texture: TextureHandle,
    },
    SignalEvent {
        id: u64,
        stages: vk::PipelineStageFlags,
    },
    WaitForEvent {
        id: u64,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        barrier: Option<Barrier>,
    },
    SignalSemaphore {
        id: u64,
    },
    WaitForSemaphore {
        id: u64,
        stages: vk::PipelineStageFlags,
    },
    PipelineBarrier {
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        barrier: Barrier,
    },
    StoreResource {
        resource: ResourceHandle,
        final_layout: Option<vk::ImageLayout>,
        stages: vk::PipelineStageFlags,
    },
}

/// One scheduled op, anchored to a command index.
#[derive(Clone, Debug)]
pub struct ResourceCommand {
    pub index: usize,
    pub time: CommandTime,
    pub op: ResourceOp,
}

//--------------------------------------------------------------------------------------------------
// Schedule generation

fn buffer_usage_flags(kind: UsageKind) -> vk::BufferUsageFlags {
    match kind {
        UsageKind::ConstantBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
        UsageKind::Read | UsageKind::ReadWrite | UsageKind::Write => {
            vk::BufferUsageFlags::STORAGE_BUFFER
        }
        UsageKind::VertexBuffer => vk::BufferUsageFlags::VERTEX_BUFFER,
        UsageKind::IndexBuffer => vk::BufferUsageFlags::INDEX_BUFFER,
        UsageKind::IndirectBuffer => vk::BufferUsageFlags::INDIRECT_BUFFER,
        UsageKind::BlitSource => vk::BufferUsageFlags::TRANSFER_SRC,
        UsageKind::BlitDestination => vk::BufferUsageFlags::TRANSFER_DST,
        _ => vk::BufferUsageFlags::empty(),
    }
}

fn texture_usage_flags(kind: UsageKind) -> vk::ImageUsageFlags {
    match kind {
        UsageKind::Read | UsageKind::ConstantBuffer => vk::ImageUsageFlags::SAMPLED,
        UsageKind::ReadWrite | UsageKind::Write => vk::ImageUsageFlags::STORAGE,
        UsageKind::InputAttachment => vk::ImageUsageFlags::INPUT_ATTACHMENT,
        UsageKind::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        UsageKind::DepthStencilAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        UsageKind::BlitSource => vk::ImageUsageFlags::TRANSFER_SRC,
        UsageKind::BlitDestination => vk::ImageUsageFlags::TRANSFER_DST,
        _ => vk::ImageUsageFlags::empty(),
    }
}

fn is_attachment(kind: UsageKind) -> bool {
    matches!(
        kind,
        UsageKind::ColorAttachment | UsageKind::DepthStencilAttachment
    )
}

/// Derives the frame's resource-command stack.
///
/// `groups` are the render-target groups, as ranges of pass indices (pass
/// index N is position N of the frame's pass list); hazards whose endpoints
/// fall in the same group are already covered by subpass dependencies and
/// produce nothing here.
pub fn generate_resource_commands(
    groups: &[Range<usize>],
    usages: &ResourceUsageTable,
    persistence_of: &dyn Fn(ResourceHandle) -> Persistence,
) -> Vec<ResourceCommand> {
    let mut out = Vec::new();
    let mut next_sync_id: u64 = 1;

    let group_of = |pass_index: u32| {
        groups
            .iter()
            .position(|g| g.contains(&(pass_index as usize)))
    };
    // cross-queue sharing needs concurrent access; everything else stays
    // exclusive
    let sharing_for = |handle: ResourceHandle| {
        let mut classes: Vec<QueueClass> =
            usages.usages(handle).iter().map(|u| u.queue).collect();
        classes.dedup();
        if classes.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    };

    let mut resources: Vec<ResourceHandle> = usages.resources().map(|(h, _)| *h).collect();
    resources.sort();

    for handle in resources {
        let list = usages.usages(handle);
        if list.is_empty() {
            continue;
        }
        let sharing_mode = sharing_for(handle);

        // materialize at first use
        let first = &list[0];
        match handle {
            ResourceHandle::Buffer(buffer) => {
                let usage = list
                    .iter()
                    .fold(vk::BufferUsageFlags::TRANSFER_DST, |acc, u| {
                        acc | buffer_usage_flags(u.kind)
                    });
                out.push(ResourceCommand {
                    index: first.command_index,
                    time: CommandTime::Before,
                    op: ResourceOp::MaterializeBuffer {
                        buffer,
                        usage,
                        sharing_mode,
                    },
                });
            }
            ResourceHandle::Texture(texture) => {
                let usage = list
                    .iter()
                    .fold(vk::ImageUsageFlags::empty(), |acc, u| {
                        acc | texture_usage_flags(u.kind)
                    });
                let barrier = if is_attachment(first.kind) || first.kind == UsageKind::Present {
                    None
                } else {
                    Some(TextureBarrier {
                        new_layout: first.kind.image_layout(),
                        src_access: vk::AccessFlags::empty(),
                        dst_access: first.kind.access_mask(),
                    })
                };
                out.push(ResourceCommand {
                    index: first.command_index,
                    time: CommandTime::Before,
                    op: ResourceOp::MaterializeTexture {
                        texture,
                        usage,
                        sharing_mode,
                        dst_stage_mask: first.stages,
                        barrier,
                    },
                });
            }
        }

        // hazards between consecutive accesses
        for pair in list.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let hazard = prev.is_write() || next.is_write();
            let layout_change = matches!(handle, ResourceHandle::Texture(_))
                && prev.kind.image_layout() != next.kind.image_layout();
            if !hazard && !layout_change {
                continue;
            }
            if prev.pass_index == next.pass_index {
                // program order within a pass
                continue;
            }
            if let (Some(a), Some(b)) = (group_of(prev.pass_index), group_of(next.pass_index)) {
                if a == b {
                    // covered by a subpass dependency
                    continue;
                }
            }

            let barrier = match handle {
                ResourceHandle::Texture(texture) => Barrier::Image {
                    texture,
                    old_layout: prev.kind.image_layout(),
                    new_layout: next.kind.image_layout(),
                    src_access: prev.kind.access_mask(),
                    dst_access: next.kind.access_mask(),
                },
                ResourceHandle::Buffer(buffer) => Barrier::Buffer {
                    buffer,
                    src_access: prev.kind.access_mask(),
                    dst_access: next.kind.access_mask(),
                    offset: 0,
                    size: vk::WHOLE_SIZE,
                },
            };

            if prev.queue == next.queue {
                // same queue: a plain pipeline barrier before the consumer
                out.push(ResourceCommand {
                    index: next.command_index,
                    time: CommandTime::Before,
                    op: ResourceOp::PipelineBarrier {
                        src_stages: prev.stages,
                        dst_stages: next.stages,
                        barrier,
                    },
                });
            } else {
                // cross queue: a semaphore pair, plus the layout transition
                // on the consumer side
                let id = next_sync_id;
                next_sync_id += 1;
                out.push(ResourceCommand {
                    index: prev.command_index,
                    time: CommandTime::After,
                    op: ResourceOp::SignalSemaphore { id },
                });
                out.push(ResourceCommand {
                    index: next.command_index,
                    time: CommandTime::Before,
                    op: ResourceOp::WaitForSemaphore {
                        id,
                        stages: next.stages,
                    },
                });
                if layout_change {
                    out.push(ResourceCommand {
                        index: next.command_index,
                        time: CommandTime::Before,
                        op: ResourceOp::PipelineBarrier {
                            src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
                            dst_stages: next.stages,
                            barrier,
                        },
                    });
                }
            }
        }

        // end-of-frame handling
        let last = list.last().unwrap();
        match persistence_of(handle) {
            Persistence::Persistent | Persistence::Window => {
                if let Some(writer) = usages.last_writer(handle) {
                    out.push(ResourceCommand {
                        index: writer.command_index,
                        time: CommandTime::After,
                        op: ResourceOp::StoreResource {
                            resource: handle,
                            final_layout: None,
                            stages: writer.stages,
                        },
                    });
                }
            }
            Persistence::PerFrame => {
                let op = match handle {
                    ResourceHandle::Buffer(buffer) => ResourceOp::DisposeBuffer { buffer },
                    ResourceHandle::Texture(texture) => ResourceOp::DisposeTexture { texture },
                };
                out.push(ResourceCommand {
                    index: last.command_index,
                    time: CommandTime::After,
                    op,
                });
            }
        }
    }

    // stack order: descending command index so the ops for the next command
    // index always sit on top; the sort is stable, so ops of one index keep
    // their scheduling order
    out.sort_by(|a, b| b.index.cmp(&a.index));
    out
}

/// A consumable view over the generated stack.
pub struct ResourceCommandStack {
    commands: Vec<ResourceCommand>,
}

impl ResourceCommandStack {
    pub fn new(commands: Vec<ResourceCommand>) -> ResourceCommandStack {
        ResourceCommandStack { commands }
    }

    /// Pops every op scheduled for `index` at `time`.
    ///
    /// Ops for indices not yet reached sit below the top; ops for already-
    /// visited indices whose other phase has not been drained yet may sit
    /// above. Only the tail with indices ≤ `index` is touched, so the
    /// descending stack order is preserved.
    pub fn drain_for(&mut self, index: usize, time: CommandTime) -> Vec<ResourceOp> {
        let boundary = self
            .commands
            .iter()
            .position(|c| c.index <= index)
            .unwrap_or_else(|| self.commands.len());
        let mut ops = Vec::new();
        let mut kept = Vec::new();
        for cmd in self.commands.drain(boundary..) {
            if cmd.index == index && cmd.time == time {
                ops.push(cmd.op);
            } else {
                kept.push(cmd);
            }
        }
        self.commands.extend(kept);
        ops
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn remaining(&self) -> &[ResourceCommand] {
        &self.commands
    }
}

/// Queue class of the pass that owns a command index, for submission-side
/// bookkeeping.
pub fn queue_of_command(passes: &[PassRecord], command_index: usize) -> QueueClass {
    passes
        .iter()
        .find(|p| p.commands.contains(&command_index))
        .map(|p| p.kind.queue_class())
        .unwrap_or(QueueClass::Graphics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{PassType, RenderTargets, ResourceUsage};

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

    fn compute_pass(index: u32, commands: Range<usize>) -> PassRecord {
        PassRecord {
            pass_index: index,
            kind: PassType::Compute { label: None },
            commands,
        }
    }

    fn draw_pass(index: u32, commands: Range<usize>) -> PassRecord {
        PassRecord {
            pass_index: index,
            kind: PassType::Draw(RenderTargets::default()),
            commands,
        }
    }

    fn blit_pass(index: u32, commands: Range<usize>) -> PassRecord {
        PassRecord {
            pass_index: index,
            kind: PassType::Blit { label: None },
            commands,
        }
    }

    #[test]
    fn compute_producer_draw_consumer_gets_barrier() {
        // scenario: compute writes a storage buffer, a draw reads it as a
        // uniform buffer on the same queue
        let _passes = vec![compute_pass(0, 0..2), draw_pass(1, 2..5)];
        let groups = vec![0..1, 1..2];
        let mut usages = ResourceUsageTable::new();
        let h = BufferHandle(7);
        usages.record(
            h,
            usage(
                0,
                1,
                UsageKind::Write,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                QueueClass::Graphics,
            ),
        );
        usages.record(
            h,
            usage(
                1,
                3,
                UsageKind::ConstantBuffer,
                vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
                QueueClass::Graphics,
            ),
        );
        let cmds = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);

        let barrier = cmds
            .iter()
            .find_map(|c| match &c.op {
                ResourceOp::PipelineBarrier {
                    src_stages,
                    dst_stages,
                    barrier: Barrier::Buffer { src_access, dst_access, .. },
                } => Some((c.index, c.time, *src_stages, *dst_stages, *src_access, *dst_access)),
                _ => None,
            })
            .expect("no pipeline barrier generated");
        assert_eq!(barrier.0, 3);
        assert_eq!(barrier.1, CommandTime::Before);
        assert_eq!(barrier.2, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(
            barrier.3,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(barrier.4, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(barrier.5, vk::AccessFlags::UNIFORM_READ);
        // no semaphores needed within one queue
        assert!(!cmds
            .iter()
            .any(|c| matches!(c.op, ResourceOp::SignalSemaphore { .. })));
    }

    #[test]
    fn cross_queue_transfer_uses_semaphore_pair() {
        // scenario: blit on the copy queue writes a texture, a draw samples
        // it on the graphics queue
        let passes = vec![blit_pass(0, 0..1), draw_pass(1, 1..3)];
        let groups = vec![0..1, 1..2];
        let mut usages = ResourceUsageTable::new();
        let h = TextureHandle(3);
        usages.record(
            h,
            usage(
                0,
                0,
                UsageKind::BlitDestination,
                vk::PipelineStageFlags::TRANSFER,
                QueueClass::Transfer,
            ),
        );
        usages.record(
            h,
            usage(
                1,
                2,
                UsageKind::Read,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                QueueClass::Graphics,
            ),
        );
        let cmds = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);

        let signal = cmds
            .iter()
            .find(|c| matches!(c.op, ResourceOp::SignalSemaphore { .. }))
            .expect("no signal");
        assert_eq!(signal.index, 0);
        assert_eq!(signal.time, CommandTime::After);
        let wait = cmds
            .iter()
            .find_map(|c| match c.op {
                ResourceOp::WaitForSemaphore { id, stages } => Some((c.index, id, stages)),
                _ => None,
            })
            .expect("no wait");
        assert_eq!(wait.0, 2);
        assert_eq!(wait.2, vk::PipelineStageFlags::FRAGMENT_SHADER);
        // the consumer side still transitions the layout
        let transition = cmds
            .iter()
            .find_map(|c| match c.op {
                ResourceOp::PipelineBarrier {
                    barrier: Barrier::Image { old_layout, new_layout, .. },
                    ..
                } => Some((old_layout, new_layout)),
                _ => None,
            })
            .expect("no layout transition");
        assert_eq!(transition.0, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(transition.1, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        // materialization is concurrent-sharing for the two families
        let sharing = cmds
            .iter()
            .find_map(|c| match c.op {
                ResourceOp::MaterializeTexture { sharing_mode, .. } => Some(sharing_mode),
                _ => None,
            })
            .unwrap();
        assert_eq!(sharing, vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn same_group_hazard_is_left_to_subpass_dependencies() {
        let passes = vec![draw_pass(0, 0..1), draw_pass(1, 1..2)];
        let groups = vec![0..2];
        let mut usages = ResourceUsageTable::new();
        let h = TextureHandle(4);
        usages.record(
            h,
            usage(
                0,
                0,
                UsageKind::ColorAttachment,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                QueueClass::Graphics,
            ),
        );
        usages.record(
            h,
            usage(
                1,
                1,
                UsageKind::InputAttachment,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                QueueClass::Graphics,
            ),
        );
        let cmds = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);
        assert!(!cmds
            .iter()
            .any(|c| matches!(c.op, ResourceOp::PipelineBarrier { .. })));
        // attachments materialize without a manual transition
        let barrier = cmds
            .iter()
            .find_map(|c| match &c.op {
                ResourceOp::MaterializeTexture { barrier, .. } => Some(barrier.clone()),
                _ => None,
            })
            .unwrap();
        assert!(barrier.is_none());
    }

    #[test]
    fn persistent_resources_get_stored_transients_disposed() {
        let passes = vec![compute_pass(0, 0..1)];
        let groups = vec![0..1];
        let mut usages = ResourceUsageTable::new();
        let p = BufferHandle(1);
        let t = BufferHandle(2);
        for h in [p, t] {
            usages.record(
                h,
                usage(
                    0,
                    0,
                    UsageKind::Write,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    QueueClass::Graphics,
                ),
            );
        }
        let cmds = generate_resource_commands(&groups, &usages, &|h| match h {
            ResourceHandle::Buffer(BufferHandle(1)) => Persistence::Persistent,
            _ => Persistence::PerFrame,
        });
        assert!(cmds.iter().any(|c| matches!(
            c.op,
            ResourceOp::StoreResource {
                resource: ResourceHandle::Buffer(BufferHandle(1)),
                ..
            }
        )));
        assert!(cmds.iter().any(|c| matches!(
            c.op,
            ResourceOp::DisposeBuffer {
                buffer: BufferHandle(2)
            }
        )));
    }

    #[test]
    fn stack_drains_per_index_and_time() {
        let passes = vec![compute_pass(0, 0..2), draw_pass(1, 2..4)];
        let groups = vec![0..1, 1..2];
        let mut usages = ResourceUsageTable::new();
        let h = BufferHandle(9);
        usages.record(
            h,
            usage(
                0,
                1,
                UsageKind::Write,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                QueueClass::Graphics,
            ),
        );
        usages.record(
            h,
            usage(
                1,
                2,
                UsageKind::Read,
                vk::PipelineStageFlags::VERTEX_SHADER,
                QueueClass::Graphics,
            ),
        );
        let cmds = generate_resource_commands(&groups, &usages, &|_| Persistence::PerFrame);
        let mut stack = ResourceCommandStack::new(cmds);

        let before1 = stack.drain_for(1, CommandTime::Before);
        assert!(matches!(before1[0], ResourceOp::MaterializeBuffer { .. }));
        assert!(stack.drain_for(1, CommandTime::After).is_empty());
        let before2 = stack.drain_for(2, CommandTime::Before);
        assert!(matches!(before2[0], ResourceOp::PipelineBarrier { .. }));
        let after2 = stack.drain_for(2, CommandTime::After);
        assert!(matches!(after2[0], ResourceOp::DisposeBuffer { .. }));
        assert!(stack.is_empty());
    }

    #[test]
    fn preamble_can_drain_ahead_of_the_postamble() {
        // a render pass drains every before-op for its whole command range
        // up front; the after-ops must still come out per command afterwards
        let mk = |index, time, op| ResourceCommand { index, time, op };
        let mut stack = ResourceCommandStack::new(vec![
            mk(
                1,
                CommandTime::After,
                ResourceOp::DisposeBuffer {
                    buffer: BufferHandle(2),
                },
            ),
            mk(
                1,
                CommandTime::Before,
                ResourceOp::MaterializeBuffer {
                    buffer: BufferHandle(2),
                    usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                    sharing_mode: vk::SharingMode::EXCLUSIVE,
                },
            ),
            mk(
                0,
                CommandTime::After,
                ResourceOp::DisposeBuffer {
                    buffer: BufferHandle(1),
                },
            ),
            mk(
                0,
                CommandTime::Before,
                ResourceOp::MaterializeBuffer {
                    buffer: BufferHandle(1),
                    usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                    sharing_mode: vk::SharingMode::EXCLUSIVE,
                },
            ),
        ]);

        assert_eq!(stack.drain_for(0, CommandTime::Before).len(), 1);
        assert_eq!(stack.drain_for(1, CommandTime::Before).len(), 1);
        let after0 = stack.drain_for(0, CommandTime::After);
        assert!(matches!(
            after0[0],
            ResourceOp::DisposeBuffer {
                buffer: BufferHandle(1)
            }
        ));
        let after1 = stack.drain_for(1, CommandTime::After);
        assert!(matches!(
            after1[0],
            ResourceOp::DisposeBuffer {
                buffer: BufferHandle(2)
            }
        ));
        assert!(stack.is_empty());
    }
}
