//! Frame execution: encoder routing, submission, and completion handling.
//!
//! The planner thread encodes linearly. At most one encoder is live; a pass
//! of a different type or render-target group finalizes the current one and
//! starts a fresh command-buffer-resources record. Submission places one
//! fence per non-empty queue; a background worker waits on the fences,
//! invokes the completion callback and retires the records.
use crate::commands::{PassRecord, PassType, QueueClass};
use crate::encoder::{
    execute_resource_op, BlitEncoder, ComputeEncoder, EncodeCtx, RenderEncoder,
};
use crate::error::Result;
use crate::render_target::{derive_descriptor, group_passes};
use crate::resource_commands::{
    generate_resource_commands, CommandTime, ResourceCommandStack,
};
use crate::sync::{CommandBufferResources, EventPool, FencePool, SemaphorePool};
use ash::vk;
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

enum ActiveEncoder {
    Render(RenderEncoder),
    Compute(ComputeEncoder),
    Blit(BlitEncoder),
}

/// Work handed to the completion worker after submission.
struct CompletionJob {
    fences: Vec<vk::Fence>,
    records: Vec<CommandBufferResources>,
    callback: Box<dyn FnOnce() + Send>,
}

/// Records and fences whose GPU work has retired, waiting to be recycled on
/// the planner thread.
#[derive(Default)]
struct RetiredBin {
    records: Vec<CommandBufferResources>,
    fences: Vec<vk::Fence>,
}

pub struct FrameExecutor {
    free_records: FxHashMap<u32, Vec<CommandBufferResources>>,
    fence_pool: FencePool,
    retired: Arc<Mutex<RetiredBin>>,
    inflight: Arc<(Mutex<u32>, Condvar)>,
    max_inflight: u32,
    jobs: mpsc::Sender<CompletionJob>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FrameExecutor {
    pub fn new(device: ash::Device, max_inflight: u32) -> FrameExecutor {
        let retired = Arc::new(Mutex::new(RetiredBin::default()));
        let inflight = Arc::new((Mutex::new(0u32), Condvar::new()));
        let (jobs, rx) = mpsc::channel::<CompletionJob>();

        let worker = {
            let retired = retired.clone();
            let inflight = inflight.clone();
            thread::Builder::new()
                .name("frame-completion".into())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        unsafe {
                            if let Err(e) =
                                device.wait_for_fences(&job.fences, true, u64::max_value())
                            {
                                error!("fence wait failed: {}", e);
                            }
                        }
                        {
                            let mut bin = retired.lock().unwrap();
                            bin.records.extend(job.records);
                            bin.fences.extend(job.fences);
                        }
                        {
                            let (count, cvar) = &*inflight;
                            *count.lock().unwrap() -= 1;
                            cvar.notify_all();
                        }
                        // the callback always runs, even after a device loss
                        (job.callback)();
                    }
                })
                .expect("failed to spawn the completion worker")
        };

        FrameExecutor {
            free_records: FxHashMap::default(),
            fence_pool: FencePool::new(),
            retired,
            inflight,
            max_inflight,
            jobs,
            worker: Some(worker),
        }
    }

    /// Blocks the planner until fewer than `max_inflight` frames are pending,
    /// then recycles everything the worker retired.
    pub fn begin_frame(
        &mut self,
        device: &ash::Device,
        semaphores: &mut SemaphorePool,
        events: &mut EventPool,
    ) {
        {
            let (count, cvar) = &*self.inflight;
            let mut count = count.lock().unwrap();
            while *count >= self.max_inflight {
                count = cvar.wait(count).unwrap();
            }
        }
        let mut bin = self.retired.lock().unwrap();
        for mut record in bin.records.drain(..) {
            record.retire(device, semaphores, events);
            self.free_records
                .entry(record.queue_family)
                .or_default()
                .push(record);
        }
        for fence in bin.fences.drain(..) {
            self.fence_pool.recycle(fence);
        }
    }

    fn take_record(
        &mut self,
        device: &ash::Device,
        queue: QueueClass,
        queue_family: u32,
    ) -> Result<CommandBufferResources> {
        if let Some(mut record) = self
            .free_records
            .get_mut(&queue_family)
            .and_then(|v| v.pop())
        {
            record.queue = queue;
            return Ok(record);
        }
        CommandBufferResources::new(device, queue, queue_family)
    }

    /// Encodes and submits one frame. `ctx` carries every subsystem the
    /// encoders touch; the completion callback fires from the worker thread
    /// once all fences signal.
    pub fn execute_frame(
        &mut self,
        mut ctx: EncodeCtx,
        completion: Box<dyn FnOnce() + Send>,
    ) -> Result<()> {
        let passes = ctx.passes;
        let commands = ctx.commands;
        let groups = group_passes(passes);

        // synchronization schedule, derived before any encoding
        let persistence = {
            let registry = &*ctx.registry;
            let table: FxHashMap<_, _> = ctx
                .usages
                .resources()
                .map(|(h, _)| {
                    let p = match *h {
                        crate::resource::ResourceHandle::Texture(t) => registry
                            .texture_descriptor(t)
                            .map(|d| d.persistence)
                            .unwrap_or(crate::resource::Persistence::PerFrame),
                        crate::resource::ResourceHandle::Buffer(b) => registry
                            .buffer_descriptor(b)
                            .map(|d| d.persistence)
                            .unwrap_or(crate::resource::Persistence::PerFrame),
                    };
                    (*h, p)
                })
                .collect();
            table
        };
        let schedule = generate_resource_commands(&groups, ctx.usages, &|h| {
            persistence
                .get(&h)
                .copied()
                .unwrap_or(crate::resource::Persistence::PerFrame)
        });
        let mut stack = ResourceCommandStack::new(schedule);

        let mut submissions: Vec<CommandBufferResources> = Vec::new();

        for group in &groups {
            let members: Vec<&PassRecord> = passes[group.clone()].iter().collect();
            let first = members[0];
            let queue_class = first.kind.queue_class();
            let queue_family = ctx.device.queue_family(queue_class);

            let mut record = self.take_record(&ctx.device.raw, queue_class, queue_family)?;
            let begin_info = vk::CommandBufferBeginInfo {
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            unsafe {
                ctx.device
                    .raw
                    .begin_command_buffer(record.command_buffer, &begin_info)?;
            }

            let is_draw_group = matches!(first.kind, PassType::Draw(_));
            let mut encoder = match &first.kind {
                PassType::Draw(_) => {
                    // barriers, waits and materializations cannot be recorded
                    // inside a render pass instance: the whole group's
                    // preamble runs before the pass begins
                    for pass in &members {
                        for index in pass.commands.clone() {
                            assert!(index < commands.len(), "command range out of bounds");
                            for op in stack.drain_for(index, CommandTime::Before) {
                                execute_resource_op(&mut ctx, &mut record, op)?;
                            }
                        }
                    }

                    let targets: Vec<&crate::commands::RenderTargets> = members
                        .iter()
                        .map(|p| match &p.kind {
                            PassType::Draw(t) => t,
                            _ => unreachable!("mixed group"),
                        })
                        .collect();
                    // C6: the merged render-target description
                    let mut states = FxHashMap::default();
                    for t in &targets {
                        for att in t.attachments() {
                            states
                                .entry(att.texture)
                                .or_insert_with(|| ctx.registry.attachment_state(att.texture));
                        }
                    }
                    let last_pass_index = members.last().unwrap().pass_index;
                    let descriptor = derive_descriptor(
                        &targets,
                        first.pass_index,
                        last_pass_index,
                        &states,
                        ctx.usages,
                    );
                    ActiveEncoder::Render(RenderEncoder::begin(
                        &mut ctx,
                        &mut record,
                        descriptor,
                        members.len(),
                    )?)
                }
                PassType::Compute { .. } => {
                    ActiveEncoder::Compute(ComputeEncoder::begin(&mut ctx))
                }
                PassType::Blit { .. } => ActiveEncoder::Blit(BlitEncoder::begin()),
                PassType::External => ActiveEncoder::Blit(BlitEncoder::begin()),
            };

            for pass in &members {
                for index in pass.commands.clone() {
                    assert!(index < commands.len(), "command range out of bounds");
                    if !is_draw_group {
                        for op in stack.drain_for(index, CommandTime::Before) {
                            execute_resource_op(&mut ctx, &mut record, op)?;
                        }
                    }
                    let command = &commands[index];
                    match (&mut encoder, &pass.kind) {
                        (_, PassType::External) => {
                            trace!("external pass command {} ignored", index);
                        }
                        (ActiveEncoder::Render(e), _) => {
                            e.execute_command(&mut ctx, &mut record, command)?
                        }
                        (ActiveEncoder::Compute(e), _) => {
                            e.execute_command(&mut ctx, &mut record, command)?
                        }
                        (ActiveEncoder::Blit(e), _) => {
                            e.execute_command(&mut ctx, &mut record, command)?
                        }
                    }
                    for op in stack.drain_for(index, CommandTime::After) {
                        execute_resource_op(&mut ctx, &mut record, op)?;
                    }
                }
                if let ActiveEncoder::Render(e) = &mut encoder {
                    let still_valid = e.end_pass(&mut ctx, &mut record)?;
                    debug_assert_eq!(
                        still_valid,
                        pass.pass_index != members.last().unwrap().pass_index
                    );
                }
            }

            unsafe {
                ctx.device.raw.end_command_buffer(record.command_buffer)?;
            }
            submissions.push(record);
        }

        debug_assert!(
            stack.is_empty(),
            "unconsumed resource commands: {:?}",
            stack.remaining()
        );

        self.submit(&ctx, submissions, completion)
    }

    /// One fence per non-empty queue; the worker waits on all of them.
    fn submit(
        &mut self,
        ctx: &EncodeCtx,
        records: Vec<CommandBufferResources>,
        completion: Box<dyn FnOnce() + Send>,
    ) -> Result<()> {
        let device = &ctx.device.raw;
        let mut fences = Vec::new();

        let mut by_queue: VecDeque<(QueueClass, Vec<&CommandBufferResources>)> = VecDeque::new();
        for record in &records {
            match by_queue.iter_mut().find(|(q, _)| *q == record.queue) {
                Some((_, v)) => v.push(record),
                None => by_queue.push_back((record.queue, vec![record])),
            }
        }

        for (queue_class, queue_records) in &by_queue {
            let fence = self.fence_pool.allocate(device)?;
            // per-submit arrays must stay alive until vkQueueSubmit returns
            struct SubmitArrays {
                wait_semaphores: Vec<vk::Semaphore>,
                wait_stages: Vec<vk::PipelineStageFlags>,
                command_buffers: [vk::CommandBuffer; 1],
                signal_semaphores: Vec<vk::Semaphore>,
            }
            let arrays: Vec<SubmitArrays> = queue_records
                .iter()
                .map(|r| SubmitArrays {
                    wait_semaphores: r.wait_semaphores.iter().map(|(s, _)| *s).collect(),
                    wait_stages: r.wait_semaphores.iter().map(|(_, st)| *st).collect(),
                    command_buffers: [r.command_buffer],
                    signal_semaphores: r.signal_semaphores.clone(),
                })
                .collect();
            let submits: Vec<vk::SubmitInfo> = arrays
                .iter()
                .map(|a| vk::SubmitInfo {
                    wait_semaphore_count: a.wait_semaphores.len() as u32,
                    p_wait_semaphores: a.wait_semaphores.as_ptr(),
                    p_wait_dst_stage_mask: a.wait_stages.as_ptr(),
                    command_buffer_count: 1,
                    p_command_buffers: a.command_buffers.as_ptr(),
                    signal_semaphore_count: a.signal_semaphores.len() as u32,
                    p_signal_semaphores: a.signal_semaphores.as_ptr(),
                    ..Default::default()
                })
                .collect();
            let queue = ctx.device.queue(*queue_class);
            unsafe {
                device.queue_submit(queue, &submits, fence)?;
            }
            debug!(
                "submitted {} command buffer(s) to {:?} queue",
                submits.len(),
                queue_class
            );
            fences.push(fence);
        }

        {
            let (count, _) = &*self.inflight;
            *count.lock().unwrap() += 1;
        }
        self.jobs
            .send(CompletionJob {
                fences,
                records,
                callback: completion,
            })
            .expect("completion worker is gone");
        Ok(())
    }

    /// Drains the pipeline and tears down pooled objects.
    pub fn shutdown(
        &mut self,
        device: &ash::Device,
        semaphores: &mut SemaphorePool,
        events: &mut EventPool,
    ) {
        {
            let (count, cvar) = &*self.inflight;
            let mut count = count.lock().unwrap();
            while *count > 0 {
                count = cvar.wait(count).unwrap();
            }
        }
        let mut bin = self.retired.lock().unwrap();
        for mut record in bin.records.drain(..) {
            record.retire(device, semaphores, events);
            record.destroy(device);
        }
        for fence in bin.fences.drain(..) {
            self.fence_pool.recycle(fence);
        }
        drop(bin);
        for (_, list) in self.free_records.drain() {
            for record in list {
                record.destroy(device);
            }
        }
        self.fence_pool.destroy_all(device);
    }
}

impl Drop for FrameExecutor {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        let (tx, _) = mpsc::channel();
        let _ = std::mem::replace(&mut self.jobs, tx);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
