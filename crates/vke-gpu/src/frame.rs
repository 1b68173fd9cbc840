//! Per-frame resources and the ring that rotates them.
//!
//! Each [`FrameSlot`] owns everything one in-flight frame needs: its
//! semaphores and fence, a command buffer, a deletion queue for transient
//! objects and a descriptor pool for transient sets. [`FrameRing`] hands the
//! slots out round-robin, so the CPU is never more than `N - 1` frames ahead
//! of the GPU.

use std::time::Duration;

use ash::vk;

use crate::command::CommandContext;
use crate::config::DescriptorPoolConfig;
use crate::deletion::DeletionQueue;
use crate::descriptors::DescriptorAllocator;
use crate::device::{GpuDevice, SubmitBatch};
use crate::error::{GpuError, Result};
use crate::sync::FrameSync;

/// Where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free, or reclaimed and not yet recording.
    Idle,
    /// Blocked on the previous submission's fence.
    Waiting,
    /// Flushing transient objects and resetting the descriptor pool.
    Reclaiming,
    /// Command buffer is recording.
    Recording,
    /// Work is on the GPU and the fence is armed.
    Submitted,
}

/// Resources for one in-flight frame.
pub struct FrameSlot<D> {
    index: usize,
    sync: FrameSync,
    command: CommandContext,
    deletion_queue: DeletionQueue<D>,
    descriptors: DescriptorAllocator,
    state: SlotState,
}

impl<D: GpuDevice> FrameSlot<D> {
    /// Create every per-slot object.
    pub fn new(device: &D, index: usize, pool: &DescriptorPoolConfig) -> Result<Self> {
        DeletionQueue::build_or_unwind(device, |created| {
            let sync = FrameSync::new(device)?;
            created.push(move |device: &D| sync.destroy(device));
            let command = CommandContext::new(device)?;
            created.push(move |device: &D| command.destroy(device));
            let descriptors = DescriptorAllocator::new(device, pool.max_sets, &pool.ratios)?;

            Ok(Self {
                index,
                sync,
                command,
                deletion_queue: DeletionQueue::new(),
                descriptors,
                state: SlotState::Idle,
            })
        })
    }

    /// Wait for this slot's previous submission, then reclaim its
    /// transient objects and descriptor sets.
    ///
    /// This is the only point where the frame loop blocks on the GPU. The
    /// fence is left signaled; [`FrameSlot::arm`] resets it once the frame
    /// is known to go ahead.
    pub fn acquire(&mut self, device: &D, timeout: Duration) -> Result<()> {
        self.state = SlotState::Waiting;
        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.wait").entered();
            self.sync.wait(device, timeout)?;
        }

        self.state = SlotState::Reclaiming;
        self.deletion_queue.flush(device)?;
        self.descriptors.reset(device)?;

        self.state = SlotState::Idle;
        Ok(())
    }

    /// Reset the fence ahead of this frame's submission.
    pub fn arm(&mut self, device: &D) -> Result<()> {
        self.sync.reset(device)
    }

    /// Reset the command buffer and begin recording.
    pub fn begin(&mut self, device: &D) -> Result<vk::CommandBuffer> {
        let cmd = self.command.reset_and_begin(device)?;
        self.state = SlotState::Recording;
        Ok(cmd)
    }

    /// End recording and submit: wait on the image-available semaphore at
    /// color output, signal render-finished and the in-flight fence.
    pub fn submit(&mut self, device: &D) -> Result<()> {
        self.command.end(device)?;

        let batch = SubmitBatch::new(self.command.buffer())
            .wait(
                self.sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )
            .signal(self.sync.render_finished)
            .fence(self.sync.in_flight);

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.submit").entered();
            device.queue_submit(&batch).map_err(submission_error)?;
        }

        self.state = SlotState::Submitted;
        Ok(())
    }

    /// Give up on the current frame before anything was submitted.
    pub fn abandon(&mut self) {
        self.state = SlotState::Idle;
    }

    /// Position of this slot in its ring.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Current cycle state.
    pub const fn state(&self) -> SlotState {
        self.state
    }

    /// Synchronization objects.
    pub const fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// The command buffer recorded each time this slot comes around.
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command.buffer()
    }

    /// Deletion queue flushed each time this slot is acquired.
    pub fn deletion_queue(&self) -> &DeletionQueue<D> {
        &self.deletion_queue
    }

    pub fn deletion_queue_mut(&mut self) -> &mut DeletionQueue<D> {
        &mut self.deletion_queue
    }

    /// Descriptor allocator reset each time this slot is acquired.
    pub const fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    pub fn descriptors_mut(&mut self) -> &mut DescriptorAllocator {
        &mut self.descriptors
    }

    /// Split borrow used while recording.
    pub(crate) fn transient_mut(&mut self) -> (&mut DeletionQueue<D>, &mut DescriptorAllocator) {
        (&mut self.deletion_queue, &mut self.descriptors)
    }

    /// Number of times this slot has been reclaimed.
    pub const fn reclaim_count(&self) -> u64 {
        self.deletion_queue.flush_count()
    }

    /// Flush remaining transient objects and destroy the slot.
    ///
    /// The device must be idle.
    pub fn destroy(mut self, device: &D) -> Result<()> {
        self.deletion_queue.flush(device)?;
        let Self {
            sync,
            command,
            descriptors,
            ..
        } = self;
        descriptors.destroy(device)?;
        command.destroy(device)?;
        sync.destroy(device)
    }
}

fn submission_error(error: GpuError) -> GpuError {
    match error {
        GpuError::Vulkan(result) | GpuError::Call { result, .. } => {
            GpuError::SubmissionFailed(result)
        }
        other => other,
    }
}

/// Fixed-size ring of frame slots.
pub struct FrameRing<D> {
    slots: Vec<FrameSlot<D>>,
    frame_counter: u64,
}

impl<D: GpuDevice> FrameRing<D> {
    /// Create `count` slots.
    pub fn new(device: &D, count: usize, pool: &DescriptorPoolConfig) -> Result<Self> {
        if count == 0 {
            return Err(GpuError::InvalidState(
                "frame ring needs at least one slot".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            match FrameSlot::new(device, index, pool) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        if let Err(cleanup) = slot.destroy(device) {
                            tracing::error!("Failed to release frame slot: {cleanup}");
                        }
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!("Frame ring created with {count} slots");

        Ok(Self {
            slots,
            frame_counter: 0,
        })
    }

    /// Index of the slot for the current frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn active_index(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    /// The slot for the current frame.
    pub fn active(&self) -> &FrameSlot<D> {
        &self.slots[self.active_index()]
    }

    pub fn active_mut(&mut self) -> &mut FrameSlot<D> {
        let index = self.active_index();
        &mut self.slots[index]
    }

    /// Move to the next frame. Called once per completed frame.
    pub fn advance(&mut self) {
        self.frame_counter += 1;
    }

    /// Number of completed frames.
    pub const fn frame_number(&self) -> u64 {
        self.frame_counter
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get a slot by index.
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    /// Destroy every slot. The device must be idle.
    pub fn destroy(self, device: &D) -> Result<()> {
        for slot in self.slots {
            slot.destroy(device)?;
        }
        Ok(())
    }
}
