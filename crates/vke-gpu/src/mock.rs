//! In-memory device and presentation target for tests.
//!
//! [`MockDevice`] hands out synthetic handles, tracks which objects are
//! alive, records every call by name and emulates fences with a configurable
//! completion delay. Buffer contents are kept in host memory and buffer
//! copies execute at record time, so uploads can be checked end to end.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use parking_lot::{Mutex, MutexGuard};

use crate::device::{DescriptorWrite, GpuDevice, ImageDesc, PresentTarget, SubmitBatch, SwapchainImage};
use crate::error::{GpuError, Result};
use crate::memory::{check_range, GpuBuffer, GpuImage};
use crate::resource::GpuResource;

/// How submitted fences complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceMode {
    /// Signaled as soon as the submission is made.
    #[default]
    Immediate,
    /// Signaled this long after submission.
    Delayed(Duration),
    /// Never signaled; every wait times out.
    Never,
}

#[derive(Debug, Clone, Copy)]
enum FenceState {
    Unsignaled,
    Signaled,
    Pending(Instant),
}

#[derive(Debug, Clone, Copy)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, &'static str>,
    destroyed: Vec<&'static str>,
    calls: Vec<String>,
    fences: HashMap<u64, FenceState>,
    fence_mode: FenceMode,
    pools: HashMap<u64, PoolState>,
    max_pool_sets: Option<u32>,
    memory: HashMap<u64, Vec<u8>>,
    layouts: HashMap<u64, vk::ImageLayout>,
    fail_next_submit: Option<vk::Result>,
    fail_next_create: Option<&'static str>,
    submissions: Vec<SubmitBatch>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn live_handle(&mut self, kind: &'static str) -> u64 {
        let raw = self.handle();
        self.live.insert(raw, kind);
        raw
    }
}

/// Test double for [`GpuDevice`].
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    /// Create a device whose fences signal immediately.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: &str) -> MutexGuard<'_, MockState> {
        let mut state = self.state.lock();
        state.calls.push(call.to_string());
        state
    }

    fn create(&self, call: &'static str) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.record(call);
        if state.fail_next_create == Some(call) {
            state.fail_next_create = None;
            return Err(GpuError::call(call, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        Ok(state)
    }

    /// Change how fences complete for later submissions.
    pub fn set_fence_mode(&self, mode: FenceMode) {
        self.state.lock().fence_mode = mode;
    }

    /// Make the next queue submission fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.lock().fail_next_submit = Some(result);
    }

    /// Make the next `call` (for example `"create_sampler"`) fail with
    /// `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_next_create(&self, call: &'static str) {
        self.state.lock().fail_next_create = Some(call);
    }

    /// Reject descriptor pools larger than `max_sets`.
    pub fn set_max_descriptor_pool_sets(&self, max_sets: u32) {
        self.state.lock().max_pool_sets = Some(max_sets);
    }

    /// Names of every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// How many times `call` was made.
    pub fn call_count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of objects created and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Kinds of destroyed resources, in destruction order.
    pub fn destroyed(&self) -> Vec<&'static str> {
        self.state.lock().destroyed.clone()
    }

    /// Every submission made so far.
    pub fn submissions(&self) -> Vec<SubmitBatch> {
        self.state.lock().submissions.clone()
    }

    /// Whether `fence` is signaled right now.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        match self.state.lock().fences.get(&fence.as_raw()) {
            Some(FenceState::Signaled) => true,
            Some(FenceState::Pending(ready_at)) => *ready_at <= Instant::now(),
            _ => false,
        }
    }

    /// Whether the object with this raw handle is alive.
    pub fn is_live(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// Host copy of a buffer's contents.
    pub fn buffer_contents(&self, buffer: &GpuBuffer) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&buffer.buffer.as_raw()).cloned()
    }

    /// Layout of the last transition recorded for `image`.
    pub fn last_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state.lock().layouts.get(&image.as_raw()).copied()
    }
}

fn raw_handles(resource: &GpuResource) -> Vec<u64> {
    match resource {
        GpuResource::Buffer(buffer) => vec![buffer.buffer.as_raw()],
        GpuResource::Image(image) => vec![image.image.as_raw(), image.view.as_raw()],
        GpuResource::ImageView(view) => vec![view.as_raw()],
        GpuResource::Sampler(sampler) => vec![sampler.as_raw()],
        GpuResource::Pipeline {
            pipeline, layout, ..
        } => vec![pipeline.as_raw(), layout.as_raw()],
        GpuResource::PipelineLayout(layout) => vec![layout.as_raw()],
        GpuResource::DescriptorSetLayout(layout) => vec![layout.as_raw()],
        GpuResource::DescriptorPool(pool) => vec![pool.as_raw()],
        GpuResource::ShaderModule(module) => vec![module.as_raw()],
        GpuResource::CommandPool(pool) => vec![pool.as_raw()],
        GpuResource::Fence(fence) => vec![fence.as_raw()],
        GpuResource::Semaphore(semaphore) => vec![semaphore.as_raw()],
    }
}

impl GpuDevice for MockDevice {
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.create("create_fence")?;
        let raw = state.live_handle("fence");
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(raw, initial);
        Ok(vk::Fence::from_raw(raw))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<()> {
        let ready_at = {
            let state = self.record("wait_for_fence");
            match state.fences.get(&fence.as_raw()) {
                None => return Err(GpuError::InvalidState("wait on unknown fence".to_string())),
                Some(FenceState::Signaled) => return Ok(()),
                Some(FenceState::Pending(ready_at)) => Some(*ready_at),
                Some(FenceState::Unsignaled) => None,
            }
        };

        let now = Instant::now();
        match ready_at {
            Some(ready_at) if ready_at <= now + timeout => {
                thread::sleep(ready_at.saturating_duration_since(now));
                self.state
                    .lock()
                    .fences
                    .insert(fence.as_raw(), FenceState::Signaled);
                Ok(())
            }
            _ => {
                thread::sleep(timeout);
                Err(GpuError::FenceTimeout(timeout))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.record("reset_fence");
        match state.fences.get_mut(&fence.as_raw()) {
            Some(fence_state) => {
                *fence_state = FenceState::Unsignaled;
                Ok(())
            }
            None => Err(GpuError::InvalidState("reset of unknown fence".to_string())),
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.create("create_semaphore")?;
        Ok(vk::Semaphore::from_raw(state.live_handle("semaphore")))
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let mut state = self.create("create_command_pool")?;
        Ok(vk::CommandPool::from_raw(state.live_handle("command pool")))
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let mut state = self.create("allocate_command_buffer")?;
        Ok(vk::CommandBuffer::from_raw(state.handle()))
    }

    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record("reset_command_buffer");
        Ok(())
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record("begin_command_buffer");
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record("end_command_buffer");
        Ok(())
    }

    fn queue_submit(&self, batch: &SubmitBatch) -> Result<()> {
        let mut state = self.record("queue_submit");
        if let Some(result) = state.fail_next_submit.take() {
            return Err(GpuError::call("vkQueueSubmit", result));
        }
        state.submissions.push(*batch);

        if batch.fence != vk::Fence::null() {
            let completion = match state.fence_mode {
                FenceMode::Immediate => FenceState::Signaled,
                FenceMode::Delayed(delay) => FenceState::Pending(Instant::now() + delay),
                FenceMode::Never => FenceState::Unsignaled,
            };
            state.fences.insert(batch.fence.as_raw(), completion);
        }
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let mut state = self.create("create_descriptor_pool")?;
        if matches!(state.max_pool_sets, Some(limit) if max_sets > limit) {
            return Err(GpuError::call(
                "vkCreateDescriptorPool",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        let raw = state.live_handle("descriptor pool");
        state.pools.insert(
            raw,
            PoolState {
                max_sets,
                allocated: 0,
            },
        );
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        let mut state = self.record("reset_descriptor_pool");
        let pool = state
            .pools
            .get_mut(&pool.as_raw())
            .ok_or_else(|| GpuError::InvalidState("reset of unknown pool".to_string()))?;
        pool.allocated = 0;
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut state = self.record("allocate_descriptor_set");
        let pool = state
            .pools
            .get_mut(&pool.as_raw())
            .ok_or_else(|| GpuError::InvalidState("allocation from unknown pool".to_string()))?;
        if pool.allocated >= pool.max_sets {
            return Err(GpuError::call(
                "vkAllocateDescriptorSets",
                vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            ));
        }
        pool.allocated += 1;
        Ok(vk::DescriptorSet::from_raw(state.handle()))
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout> {
        let mut state = self.record("create_descriptor_set_layout");
        Ok(vk::DescriptorSetLayout::from_raw(
            state.live_handle("descriptor set layout"),
        ))
    }

    fn update_descriptor_set(&self, _set: vk::DescriptorSet, _writes: &[DescriptorWrite]) {
        self.record("update_descriptor_set");
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        _location: MemoryLocation,
        _name: &str,
    ) -> Result<GpuBuffer> {
        let mut state = self.record("create_buffer");
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{size} bytes")))?;
        let raw = state.live_handle("buffer");
        state.memory.insert(raw, vec![0; len]);
        Ok(GpuBuffer {
            buffer: vk::Buffer::from_raw(raw),
            allocation: None,
            size,
        })
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.record("write_buffer");
        check_range(buffer.size, offset, data.len())?;
        let memory = state
            .memory
            .get_mut(&buffer.buffer.as_raw())
            .ok_or_else(|| GpuError::InvalidState("write to unknown buffer".to_string()))?;
        let start = usize::try_from(offset)
            .map_err(|_| GpuError::InvalidState("Offset overflow".to_string()))?;
        memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage> {
        let mut state = self.create("create_image")?;
        let image = state.live_handle("image");
        let view = state.live_handle("image view");
        Ok(GpuImage {
            image: vk::Image::from_raw(image),
            view: vk::ImageView::from_raw(view),
            allocation: None,
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn create_sampler(&self, _filter: vk::Filter) -> Result<vk::Sampler> {
        let mut state = self.create("create_sampler")?;
        Ok(vk::Sampler::from_raw(state.live_handle("sampler")))
    }

    fn cmd_copy_buffer(&self, _cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let mut state = self.record("cmd_copy_buffer");
        let Some(source) = state.memory.get(&src.as_raw()).cloned() else {
            return;
        };
        if let Some(target) = state.memory.get_mut(&dst.as_raw()) {
            let len = usize::try_from(size)
                .unwrap_or(usize::MAX)
                .min(source.len())
                .min(target.len());
            target[..len].copy_from_slice(&source[..len]);
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Image,
        _extent: vk::Extent3D,
    ) {
        self.record("cmd_copy_buffer_to_image");
    }

    fn cmd_transition_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        _from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        let mut state = self.record("cmd_transition_image");
        state.layouts.insert(image.as_raw(), to);
    }

    fn cmd_blit_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Image,
        _dst: vk::Image,
        _src_extent: vk::Extent2D,
        _dst_extent: vk::Extent2D,
    ) {
        self.record("cmd_blit_image");
    }

    fn cmd_clear_color(
        &self,
        _cmd: vk::CommandBuffer,
        _image: vk::Image,
        _layout: vk::ImageLayout,
        _color: [f32; 4],
    ) {
        self.record("cmd_clear_color");
    }

    fn destroy(&self, resource: GpuResource) -> Result<()> {
        let mut state = self.record("destroy");
        let kind = resource.kind_name();
        let handles = raw_handles(&resource);
        if let Some(missing) = handles.iter().find(|raw| !state.live.contains_key(raw)) {
            return Err(GpuError::InvalidState(format!(
                "{kind} {missing:#x} is not alive"
            )));
        }
        for raw in handles {
            state.live.remove(&raw);
            state.memory.remove(&raw);
            state.fences.remove(&raw);
            state.pools.remove(&raw);
        }
        state.destroyed.push(kind);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.record("wait_idle");
        Ok(())
    }
}

/// Test double for [`PresentTarget`].
pub struct MockTarget {
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
    next: usize,
    failing_acquires: u32,
    failing_presents: u32,
    recreations: u32,
    presented: Vec<u32>,
    destroyed: bool,
}

impl MockTarget {
    /// Create a target with `image_count` swapchain images.
    pub fn new(extent: vk::Extent2D, image_count: u32) -> Self {
        let base = 1u64 << 40;
        let count = u64::from(image_count.max(1));
        Self {
            images: (0..count).map(|i| vk::Image::from_raw(base + i)).collect(),
            views: (0..count)
                .map(|i| vk::ImageView::from_raw(base + count + i))
                .collect(),
            extent,
            next: 0,
            failing_acquires: 0,
            failing_presents: 0,
            recreations: 0,
            presented: Vec::new(),
            destroyed: false,
        }
    }

    /// Report the next `count` acquires as out of date.
    pub fn fail_acquires(&mut self, count: u32) {
        self.failing_acquires = count;
    }

    /// Report the next `count` presents as out of date.
    pub fn fail_presents(&mut self, count: u32) {
        self.failing_presents = count;
    }

    /// Number of swapchain rebuilds.
    pub const fn recreations(&self) -> u32 {
        self.recreations
    }

    /// Image indices presented so far.
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }

    /// Whether [`PresentTarget::destroy`] was called.
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl PresentTarget for MockTarget {
    fn acquire_next_image(
        &mut self,
        _signal: vk::Semaphore,
        _timeout: Duration,
    ) -> Result<SwapchainImage> {
        if self.failing_acquires > 0 {
            self.failing_acquires -= 1;
            return Err(GpuError::SwapchainOutOfDate);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.images.len();
        Ok(SwapchainImage {
            index: u32::try_from(index).unwrap_or(u32::MAX),
            image: self.images[index],
            view: self.views[index],
            extent: self.extent,
            suboptimal: false,
        })
    }

    fn present(&mut self, index: u32, _wait: vk::Semaphore) -> Result<bool> {
        if self.failing_presents > 0 {
            self.failing_presents -= 1;
            return Err(GpuError::SwapchainOutOfDate);
        }
        self.presented.push(index);
        Ok(false)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.recreations += 1;
        self.extent = extent;
        self.next = 0;
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}
