//! The per-frame orchestrator.
//!
//! [`FrameEngine`] owns the frame ring, the immediate context, the
//! engine-global deletion queue and descriptor allocator, the offscreen draw
//! image and the presentation target. [`FrameEngine::draw_frame`] runs one
//! iteration of the frame protocol:
//!
//! 1. wait on the active slot's fence, then reclaim its transient objects
//!    and descriptor sets
//! 2. acquire a swapchain image (an out-of-date swapchain abandons the frame
//!    and rebuilds it)
//! 3. arm the fence, reset and begin the command buffer
//! 4. hand the caller a [`FrameContext`] to record into the draw image
//! 5. blit the draw image to the swapchain image, end and submit
//! 6. present and advance the ring
//!
//! Any error other than [`GpuError::SwapchainOutOfDate`] is returned to the
//! caller as an engine fault.

use std::sync::Arc;

use ash::vk;

use crate::config::FrameEngineConfig;
use crate::deletion::DeletionQueue;
use crate::descriptors::{DescriptorAllocator, DescriptorLayout, DescriptorSet};
use crate::device::{GpuDevice, ImageDesc, PresentTarget};
use crate::error::{GpuError, Result};
use crate::frame::FrameRing;
use crate::immediate::ImmediateContext;
use crate::memory::{GpuBuffer, GpuImage};
use crate::resource::GpuResource;

/// Which owner a resource or descriptor set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Reclaimed the next time the current frame slot comes around.
    Frame,
    /// Kept until engine shutdown.
    Engine,
}

/// Outcome of one [`FrameEngine::draw_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented.
    Presented,
    /// Submitted, but the swapchain went out of date at present and was
    /// rebuilt.
    PresentOutOfDate,
    /// Nothing was submitted; the swapchain was out of date or the surface
    /// has zero size.
    Skipped,
}

/// The offscreen image every frame renders into before it is blitted to the
/// swapchain.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Samplers created once at startup.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSamplers {
    pub linear: vk::Sampler,
    pub nearest: vk::Sampler,
}

/// Everything the recording callback can touch during one frame.
pub struct FrameContext<'a, D: GpuDevice> {
    device: &'a D,
    command_buffer: vk::CommandBuffer,
    draw: DrawTarget,
    swapchain_extent: vk::Extent2D,
    frame_number: u64,
    slot_index: usize,
    samplers: DefaultSamplers,
    frame_deletion: &'a mut DeletionQueue<D>,
    frame_descriptors: &'a mut DescriptorAllocator,
    global_deletion: &'a mut DeletionQueue<D>,
    global_descriptors: &'a mut DescriptorAllocator,
}

impl<'a, D: GpuDevice> FrameContext<'a, D> {
    /// The device, for recording commands.
    pub const fn device(&self) -> &'a D {
        self.device
    }

    /// Command buffer in the recording state.
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// The draw image, in `GENERAL` layout while the callback runs.
    pub const fn draw_target(&self) -> DrawTarget {
        self.draw
    }

    /// Size of the acquired swapchain image.
    pub const fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }

    /// Number of frames completed before this one.
    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Index of the frame slot recording this frame.
    pub const fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub const fn samplers(&self) -> DefaultSamplers {
        self.samplers
    }

    /// Clear the draw image.
    pub fn clear(&self, color: [f32; 4]) {
        self.device.cmd_clear_color(
            self.command_buffer,
            self.draw.image,
            vk::ImageLayout::GENERAL,
            color,
        );
    }

    /// Allocate a descriptor set from the per-frame or engine-global pool.
    pub fn allocate_descriptor_set(
        &mut self,
        layout: &DescriptorLayout,
        lifetime: Lifetime,
    ) -> Result<DescriptorSet> {
        match lifetime {
            Lifetime::Frame => self.frame_descriptors.allocate(self.device, layout),
            Lifetime::Engine => self.global_descriptors.allocate(self.device, layout),
        }
    }

    /// Destroy `resource` once it can no longer be in use.
    pub fn defer_destroy(&mut self, resource: impl Into<GpuResource>, lifetime: Lifetime) {
        match lifetime {
            Lifetime::Frame => self.frame_deletion.push_resource(resource),
            Lifetime::Engine => self.global_deletion.push_resource(resource),
        }
    }

    /// Run `action` when this frame slot is next reclaimed.
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce(&D) -> Result<()> + 'static,
    {
        self.frame_deletion.push(action);
    }
}

/// Engine-lifetime objects created after the ring.
struct EngineGlobals<D> {
    immediate: ImmediateContext,
    global_descriptors: DescriptorAllocator,
    global_deletion: DeletionQueue<D>,
    draw: DrawTarget,
    samplers: DefaultSamplers,
}

impl<D: GpuDevice> EngineGlobals<D> {
    fn new(device: &D, extent: vk::Extent2D, config: &FrameEngineConfig) -> Result<Self> {
        let immediate = ImmediateContext::new(device, config.immediate_timeout)?;
        let global_descriptors = match DescriptorAllocator::new(
            device,
            config.global_descriptors.max_sets,
            &config.global_descriptors.ratios,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                release("immediate context", immediate.destroy(device));
                return Err(e);
            }
        };

        let mut global_deletion = DeletionQueue::new();
        match create_draw_resources(device, extent, config.draw_format, &mut global_deletion) {
            Ok((draw, samplers)) => Ok(Self {
                immediate,
                global_descriptors,
                global_deletion,
                draw,
                samplers,
            }),
            Err(e) => {
                global_deletion.unwind(device);
                release("global descriptor pool", global_descriptors.destroy(device));
                release("immediate context", immediate.destroy(device));
                Err(e)
            }
        }
    }
}

/// Create the draw image and default samplers, queueing each for
/// destruction with the engine.
fn create_draw_resources<D: GpuDevice>(
    device: &D,
    extent: vk::Extent2D,
    format: vk::Format,
    deletion: &mut DeletionQueue<D>,
) -> Result<(DrawTarget, DefaultSamplers)> {
    let image = device.create_image(&ImageDesc::new("draw image", format, extent).usage(
        vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::COLOR_ATTACHMENT,
    ))?;
    let draw = DrawTarget {
        image: image.image,
        view: image.view,
        format: image.format,
        extent: image.extent_2d(),
    };
    deletion.push_resource(image);

    let linear = device.create_sampler(vk::Filter::LINEAR)?;
    deletion.push_resource(linear);
    let nearest = device.create_sampler(vk::Filter::NEAREST)?;
    deletion.push_resource(nearest);

    Ok((draw, DefaultSamplers { linear, nearest }))
}

fn release(what: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::error!("Failed to release {what}: {e}");
    }
}

/// Drives the frame loop.
pub struct FrameEngine<D: GpuDevice, P: PresentTarget> {
    device: Arc<D>,
    target: P,
    ring: FrameRing<D>,
    immediate: ImmediateContext,
    global_deletion: DeletionQueue<D>,
    global_descriptors: DescriptorAllocator,
    draw: DrawTarget,
    samplers: DefaultSamplers,
    config: FrameEngineConfig,
    pending_resize: Option<vk::Extent2D>,
    skipped_frames: u64,
}

impl<D: GpuDevice, P: PresentTarget> FrameEngine<D, P> {
    /// Create the ring, immediate context, global pool, draw image and
    /// default samplers.
    ///
    /// If any step fails, everything created before it is destroyed before
    /// the error is returned.
    pub fn new(device: Arc<D>, target: P, config: FrameEngineConfig) -> Result<Self> {
        let ring = FrameRing::new(&*device, config.frames_in_flight, &config.frame_descriptors)?;
        let extent = config.draw_extent.unwrap_or_else(|| target.extent());
        let globals = match EngineGlobals::new(&*device, extent, &config) {
            Ok(globals) => globals,
            Err(e) => {
                release("frame ring", ring.destroy(&*device));
                return Err(e);
            }
        };

        tracing::info!(
            "Frame engine ready: {} frames in flight, draw image {}x{} {:?}",
            ring.len(),
            globals.draw.extent.width,
            globals.draw.extent.height,
            globals.draw.format
        );

        let EngineGlobals {
            immediate,
            global_descriptors,
            global_deletion,
            draw,
            samplers,
        } = globals;

        Ok(Self {
            device,
            target,
            ring,
            immediate,
            global_deletion,
            global_descriptors,
            draw,
            samplers,
            config,
            pending_resize: None,
            skipped_frames: 0,
        })
    }

    /// Run one frame, with `record` filling the draw image.
    pub fn draw_frame<F>(&mut self, record: F) -> Result<FrameStatus>
    where
        F: FnOnce(&mut FrameContext<'_, D>) -> Result<()>,
    {
        if let Some(extent) = self.pending_resize {
            if extent.width == 0 || extent.height == 0 {
                self.skipped_frames += 1;
                return Ok(FrameStatus::Skipped);
            }
            self.pending_resize = None;
            self.recreate_swapchain(extent)?;
        }

        let device = Arc::clone(&self.device);
        let device = &*device;
        let frame_number = self.ring.frame_number();
        let slot = self.ring.active_mut();
        let slot_index = slot.index();

        slot.acquire(device, self.config.fence_timeout)?;

        let acquired = {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.acquire_image").entered();
            self.target
                .acquire_next_image(slot.sync().image_available, self.config.acquire_timeout)
        };
        let image = match acquired {
            Ok(image) => image,
            Err(GpuError::SwapchainOutOfDate) => {
                slot.abandon();
                self.skipped_frames += 1;
                tracing::warn!("Swapchain out of date at acquire, skipping frame {frame_number}");
                self.recreate_swapchain(self.target.extent())?;
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => return Err(e),
        };

        slot.arm(device)?;
        let cmd = slot.begin(device)?;
        let render_finished = slot.sync().render_finished;

        device.cmd_transition_image(
            cmd,
            self.draw.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record").entered();
            let (frame_deletion, frame_descriptors) = slot.transient_mut();
            let mut ctx = FrameContext {
                device,
                command_buffer: cmd,
                draw: self.draw,
                swapchain_extent: image.extent,
                frame_number,
                slot_index,
                samplers: self.samplers,
                frame_deletion,
                frame_descriptors,
                global_deletion: &mut self.global_deletion,
                global_descriptors: &mut self.global_descriptors,
            };
            record(&mut ctx)?;
        }

        device.cmd_transition_image(
            cmd,
            self.draw.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        device.cmd_transition_image(
            cmd,
            image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        device.cmd_blit_image(cmd, self.draw.image, image.image, self.draw.extent, image.extent);
        device.cmd_transition_image(
            cmd,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        slot.submit(device)?;

        let presented = {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.present").entered();
            self.target.present(image.index, render_finished)
        };
        let status = match presented {
            Ok(_) => FrameStatus::Presented,
            Err(GpuError::SwapchainOutOfDate) => FrameStatus::PresentOutOfDate,
            Err(e) => return Err(e),
        };

        self.ring.advance();

        if status == FrameStatus::PresentOutOfDate {
            tracing::warn!("Swapchain out of date at present of frame {frame_number}");
            self.recreate_swapchain(self.target.extent())?;
        }

        tracing::trace!("Frame {frame_number} done on slot {slot_index}");
        Ok(status)
    }

    /// Rebuild the swapchain at `extent` before the next frame.
    ///
    /// A zero-sized extent (a minimized window) makes frames skip until a
    /// non-zero size is requested.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        self.pending_resize = Some(extent);
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.device.wait_idle()?;
        self.target.recreate(extent)?;
        let extent = self.target.extent();
        tracing::info!("Swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Record with `record` and block until the GPU has run it.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        self.immediate.submit_and_wait(&*self.device, record)
    }

    /// Upload `data` into a new device-local buffer.
    pub fn upload_buffer<T: bytemuck::Pod>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.immediate.upload_buffer(&*self.device, data, usage, name)
    }

    /// Upload pixels into a new sampled image.
    pub fn upload_image(&self, pixels: &[u8], desc: &ImageDesc<'_>) -> Result<GpuImage> {
        self.immediate.upload_image(&*self.device, pixels, desc)
    }

    /// Allocate a set that lives until shutdown.
    pub fn allocate_global_set(&mut self, layout: &DescriptorLayout) -> Result<DescriptorSet> {
        self.global_descriptors.allocate(&*self.device, layout)
    }

    /// The engine-global descriptor allocator.
    pub fn global_descriptors_mut(&mut self) -> &mut DescriptorAllocator {
        &mut self.global_descriptors
    }

    /// Destroy `resource` at shutdown.
    pub fn defer_destroy(&mut self, resource: impl Into<GpuResource>) {
        self.global_deletion.push_resource(resource);
    }

    pub const fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub const fn target(&self) -> &P {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut P {
        &mut self.target
    }

    pub const fn ring(&self) -> &FrameRing<D> {
        &self.ring
    }

    pub const fn config(&self) -> &FrameEngineConfig {
        &self.config
    }

    pub const fn draw_target(&self) -> DrawTarget {
        self.draw
    }

    pub const fn samplers(&self) -> DefaultSamplers {
        self.samplers
    }

    /// Number of completed frames.
    pub const fn frame_number(&self) -> u64 {
        self.ring.frame_number()
    }

    /// Number of frames abandoned before submission.
    pub const fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Wait for the GPU and destroy everything the engine owns: frame-scoped
    /// objects first, then engine-global ones, then the present target.
    pub fn destroy(self) -> Result<()> {
        let Self {
            device,
            mut target,
            ring,
            immediate,
            mut global_deletion,
            global_descriptors,
            ..
        } = self;

        device.wait_idle()?;
        ring.destroy(&*device)?;
        immediate.destroy(&*device)?;
        global_descriptors.destroy(&*device)?;
        global_deletion.flush(&*device)?;
        target.destroy();

        tracing::info!("Frame engine destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DescriptorSetLayoutBuilder;
    use crate::mock::{FenceMode, MockDevice, MockTarget};
    use ash::vk::Handle;
    use std::time::Duration;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    fn engine() -> (Arc<MockDevice>, FrameEngine<MockDevice, MockTarget>) {
        engine_with(FrameEngineConfig::default())
    }

    fn engine_with(config: FrameEngineConfig) -> (Arc<MockDevice>, FrameEngine<MockDevice, MockTarget>) {
        let device = Arc::new(MockDevice::new());
        let engine =
            FrameEngine::new(Arc::clone(&device), MockTarget::new(EXTENT, 3), config).unwrap();
        (device, engine)
    }

    #[test]
    fn five_frames_rotate_and_reclaim_each_slot() {
        let (device, mut engine) = engine();

        for _ in 0..5 {
            let status = engine.draw_frame(|_| Ok(())).unwrap();
            assert_eq!(status, FrameStatus::Presented);
        }

        assert_eq!(engine.frame_number(), 5);
        assert_eq!(engine.ring().slot(0).unwrap().reclaim_count(), 3);
        assert_eq!(engine.ring().slot(1).unwrap().reclaim_count(), 2);
        assert_eq!(engine.target().presented(), &[0, 1, 2, 0, 1]);
        assert_eq!(device.call_count("queue_submit"), 5);

        engine.destroy().unwrap();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn frame_callback_sees_slot_and_frame_number() {
        let (_device, mut engine) = engine();
        let mut seen = Vec::new();

        for _ in 0..4 {
            engine
                .draw_frame(|frame| {
                    seen.push((frame.frame_number(), frame.slot_index()));
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 0), (3, 1)]);
    }

    #[test]
    fn draw_image_is_blitted_and_presented() {
        let (device, mut engine) = engine();
        let draw = engine.draw_target();

        engine.draw_frame(|frame| {
            assert_eq!(
                device.last_layout(frame.draw_target().image),
                Some(vk::ImageLayout::GENERAL)
            );
            frame.clear([0.0, 0.0, 1.0, 1.0]);
            Ok(())
        })
        .unwrap();

        assert_eq!(device.call_count("cmd_blit_image"), 1);
        assert_eq!(
            device.last_layout(draw.image),
            Some(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        );
        let swapchain_image = vk::Image::from_raw(1u64 << 40);
        assert_eq!(
            device.last_layout(swapchain_image),
            Some(vk::ImageLayout::PRESENT_SRC_KHR)
        );
    }

    #[test]
    fn submission_waits_on_acquire_and_signals_render_finished() {
        let (device, mut engine) = engine();
        engine.draw_frame(|_| Ok(())).unwrap();

        let sync = *engine.ring().slot(0).unwrap().sync();
        let batch = device.submissions()[0];
        assert_eq!(
            batch.wait,
            Some((
                sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            ))
        );
        assert_eq!(batch.signal, Some(sync.render_finished));
        assert_eq!(batch.fence, sync.in_flight);
    }

    #[test]
    fn frame_resources_survive_until_slot_returns() {
        let (device, mut engine) = engine();
        let mut raw = 0;

        engine
            .draw_frame(|frame| {
                let buffer = frame.device().create_buffer(
                    64,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    gpu_allocator::MemoryLocation::CpuToGpu,
                    "per-frame uniforms",
                )?;
                raw = buffer.buffer.as_raw();
                frame.defer_destroy(buffer, Lifetime::Frame);
                Ok(())
            })
            .unwrap();

        engine.draw_frame(|_| Ok(())).unwrap();
        assert!(device.is_live(raw));

        engine.draw_frame(|_| Ok(())).unwrap();
        assert!(!device.is_live(raw));
    }

    #[test]
    fn engine_lifetime_resources_outlive_frames() {
        let (device, mut engine) = engine();
        let mut raw = 0;

        engine
            .draw_frame(|frame| {
                let sampler = frame.device().create_sampler(vk::Filter::LINEAR)?;
                raw = sampler.as_raw();
                frame.defer_destroy(sampler, Lifetime::Engine);
                Ok(())
            })
            .unwrap();
        for _ in 0..4 {
            engine.draw_frame(|_| Ok(())).unwrap();
        }
        assert!(device.is_live(raw));

        engine.destroy().unwrap();
        assert!(!device.is_live(raw));
    }

    #[test]
    fn per_frame_descriptor_sets_expire_with_their_slot() {
        let (device, mut engine) = engine();
        let layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(&*device)
            .unwrap();
        let mut first = None;

        engine
            .draw_frame(|frame| {
                first = Some(frame.allocate_descriptor_set(&layout, Lifetime::Frame)?);
                Ok(())
            })
            .unwrap();
        let first = first.unwrap();
        assert!(engine.ring().slot(0).unwrap().descriptors().is_live(&first));

        engine.draw_frame(|_| Ok(())).unwrap();
        engine.draw_frame(|_| Ok(())).unwrap();

        assert!(!engine.ring().slot(0).unwrap().descriptors().is_live(&first));
        engine.defer_destroy(layout.into_resource());
        engine.destroy().unwrap();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn out_of_date_acquire_skips_without_advancing() {
        let (device, mut engine) = engine();
        engine.target_mut().fail_acquires(1);

        let status = engine.draw_frame(|_| Ok(())).unwrap();

        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(engine.frame_number(), 0);
        assert_eq!(engine.skipped_frames(), 1);
        assert_eq!(engine.target().recreations(), 1);
        assert_eq!(device.call_count("queue_submit"), 0);

        // The slot's fence was never reset, so the retry does not stall.
        let status = engine.draw_frame(|_| Ok(())).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(engine.frame_number(), 1);
    }

    #[test]
    fn out_of_date_present_still_advances() {
        let (_device, mut engine) = engine();
        engine.target_mut().fail_presents(1);

        let status = engine.draw_frame(|_| Ok(())).unwrap();

        assert_eq!(status, FrameStatus::PresentOutOfDate);
        assert_eq!(engine.frame_number(), 1);
        assert_eq!(engine.target().recreations(), 1);
    }

    #[test]
    fn resize_requests_rebuild_before_next_frame() {
        let (_device, mut engine) = engine();
        let resized = vk::Extent2D {
            width: 800,
            height: 600,
        };

        engine.request_resize(resized);
        engine.draw_frame(|frame| {
            assert_eq!(frame.swapchain_extent(), resized);
            Ok(())
        })
        .unwrap();

        assert_eq!(engine.target().recreations(), 1);
    }

    #[test]
    fn minimized_surface_skips_frames() {
        let (device, mut engine) = engine();
        engine.request_resize(vk::Extent2D {
            width: 0,
            height: 0,
        });

        assert_eq!(engine.draw_frame(|_| Ok(())).unwrap(), FrameStatus::Skipped);
        assert_eq!(device.call_count("queue_submit"), 0);

        engine.request_resize(EXTENT);
        assert_eq!(
            engine.draw_frame(|_| Ok(())).unwrap(),
            FrameStatus::Presented
        );
    }

    #[test]
    fn fence_timeout_is_fatal() {
        let (device, mut engine) = engine_with(
            FrameEngineConfig::default().with_fence_timeout(Duration::from_millis(5)),
        );
        device.set_fence_mode(FenceMode::Never);

        engine.draw_frame(|_| Ok(())).unwrap();
        engine.draw_frame(|_| Ok(())).unwrap();
        let err = engine.draw_frame(|_| Ok(())).unwrap_err();

        assert!(matches!(err, GpuError::FenceTimeout(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn submit_failure_is_fatal() {
        let (device, mut engine) = engine();
        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

        let err = engine.draw_frame(|_| Ok(())).unwrap_err();

        assert!(matches!(err, GpuError::SubmissionFailed(_)));
        assert_eq!(engine.frame_number(), 0);
    }

    #[test]
    fn recording_errors_propagate() {
        let (_device, mut engine) = engine();
        let err = engine
            .draw_frame(|_| Err(GpuError::Other("record failed".into())))
            .unwrap_err();
        assert!(matches!(err, GpuError::Other(_)));
    }

    #[test]
    fn uploads_go_through_the_immediate_context() {
        let (device, engine) = engine();
        let vertices: [f32; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];

        let buffer = engine
            .upload_buffer(&vertices, vk::BufferUsageFlags::VERTEX_BUFFER, "triangle")
            .unwrap();

        assert_eq!(buffer.size, 24);
        assert_eq!(
            device.buffer_contents(&buffer).unwrap(),
            bytemuck::cast_slice::<f32, u8>(&vertices)
        );
        let mut engine = engine;
        engine.defer_destroy(buffer);
        engine.destroy().unwrap();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn three_slot_ring_rotates_through_all_slots() {
        let (_device, mut engine) =
            engine_with(FrameEngineConfig::default().with_frames_in_flight(3));
        let mut slots = Vec::new();
        for _ in 0..6 {
            engine
                .draw_frame(|frame| {
                    slots.push(frame.slot_index());
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }

    fn try_engine(
        device: &Arc<MockDevice>,
        config: FrameEngineConfig,
    ) -> Result<FrameEngine<MockDevice, MockTarget>> {
        FrameEngine::new(Arc::clone(device), MockTarget::new(EXTENT, 3), config)
    }

    #[test]
    fn failed_frame_pool_releases_the_partial_slot() {
        let device = Arc::new(MockDevice::new());
        device.set_max_descriptor_pool_sets(100);

        let result = try_engine(&device, FrameEngineConfig::default());

        assert!(matches!(result, Err(GpuError::PoolCreation(_))));
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn failed_global_pool_releases_ring_and_immediate_context() {
        let device = Arc::new(MockDevice::new());
        let mut global = crate::config::DescriptorPoolConfig::global();
        global.max_sets = 0;

        let result = try_engine(&device, FrameEngineConfig::default().with_global_descriptors(global));

        assert!(matches!(result, Err(GpuError::PoolCreation(_))));
        assert_eq!(device.call_count("create_command_pool"), 3);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn failed_sampler_releases_everything_created_before_it() {
        let device = Arc::new(MockDevice::new());
        device.fail_next_create("create_sampler");

        let result = try_engine(&device, FrameEngineConfig::default());

        assert!(result.is_err());
        assert!(device.destroyed().contains(&"image"));
        assert_eq!(device.live_count(), 0);
    }
}
