//! Blocking one-shot GPU submissions.
//!
//! [`ImmediateContext`] owns a command buffer and fence outside the frame
//! ring. It is used for uploads during initialization and asset loading,
//! where waiting for the GPU is acceptable. Only one submission is in flight
//! at a time: concurrent callers are serialized on an internal lock, so the
//! command buffer is never reset while another thread is recording or
//! waiting on it.

use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::command::CommandContext;
use crate::deletion::DeletionQueue;
use crate::device::{GpuDevice, ImageDesc, SubmitBatch};
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage};
use crate::resource::GpuResource;

struct ImmediateState {
    command: CommandContext,
    fence: vk::Fence,
    submissions: u64,
}

/// Single-flight synchronous submission context.
pub struct ImmediateContext {
    state: Mutex<ImmediateState>,
    timeout: Duration,
}

impl ImmediateContext {
    /// Create the command buffer and fence.
    pub fn new<D: GpuDevice>(device: &D, timeout: Duration) -> Result<Self> {
        DeletionQueue::build_or_unwind(device, |created| {
            let command = CommandContext::new(device)?;
            created.push(move |device: &D| command.destroy(device));
            let fence = device.create_fence(true)?;
            Ok(Self {
                state: Mutex::new(ImmediateState {
                    command,
                    fence,
                    submissions: 0,
                }),
                timeout,
            })
        })
    }

    /// Record with `record`, submit to the graphics queue and block until
    /// the GPU has finished.
    ///
    /// Fails with [`GpuError::SubmissionFailed`] if the submit call errors
    /// and [`GpuError::SubmissionTimeout`] if the fence does not signal in
    /// time.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit_and_wait<D, F>(&self, device: &D, record: F) -> Result<()>
    where
        D: GpuDevice,
        F: FnOnce(vk::CommandBuffer),
    {
        let mut state = self.state.lock();

        device.reset_fence(state.fence)?;
        let cmd = state.command.reset_and_begin(device)?;
        record(cmd);
        state.command.end(device)?;

        let batch = SubmitBatch::new(cmd).fence(state.fence);
        device.queue_submit(&batch).map_err(|e| match e {
            GpuError::Vulkan(result) | GpuError::Call { result, .. } => {
                GpuError::SubmissionFailed(result)
            }
            other => other,
        })?;

        device
            .wait_for_fence(state.fence, self.timeout)
            .map_err(|e| match e {
                GpuError::FenceTimeout(_) => GpuError::SubmissionTimeout(self.timeout),
                other => other,
            })?;

        state.submissions += 1;
        Ok(())
    }

    /// Copy `data` into a new device-local buffer through a staging buffer.
    ///
    /// On failure the GPU may still reference the staging buffer, so neither
    /// buffer is destroyed.
    pub fn upload_buffer<D, T>(
        &self,
        device: &D,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer>
    where
        D: GpuDevice,
        T: bytemuck::Pod,
    {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "upload of {name} has no data"
            )));
        }
        let size = bytes.len() as u64;

        let staging = self.stage(device, bytes, name)?;
        let buffer = device.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        self.submit_and_wait(device, |cmd| {
            device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, size);
        })?;
        device.destroy(GpuResource::Buffer(staging))?;

        tracing::debug!("Uploaded {size} bytes to {name}");
        Ok(buffer)
    }

    /// Copy tightly packed pixels into a new image and leave it ready for
    /// sampling.
    pub fn upload_image<D: GpuDevice>(
        &self,
        device: &D,
        pixels: &[u8],
        desc: &ImageDesc<'_>,
    ) -> Result<GpuImage> {
        if pixels.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "upload of {} has no data",
                desc.name
            )));
        }

        let staging = self.stage(device, pixels, desc.name)?;
        let image_desc = desc.usage(desc.usage | vk::ImageUsageFlags::TRANSFER_DST);
        let image = device.create_image(&image_desc)?;

        self.submit_and_wait(device, |cmd| {
            device.cmd_transition_image(
                cmd,
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            device.cmd_copy_buffer_to_image(cmd, staging.buffer, image.image, image.extent);
            device.cmd_transition_image(
                cmd,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;
        device.destroy(GpuResource::Buffer(staging))?;

        tracing::debug!(
            "Uploaded {}x{} image {}",
            image.extent.width,
            image.extent.height,
            desc.name
        );
        Ok(image)
    }

    fn stage<D: GpuDevice>(&self, device: &D, bytes: &[u8], name: &str) -> Result<GpuBuffer> {
        let staging = device.create_buffer(
            bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name} staging"),
        )?;
        if let Err(e) = device.write_buffer(&staging, 0, bytes) {
            device.destroy(GpuResource::Buffer(staging))?;
            return Err(e);
        }
        Ok(staging)
    }

    /// Number of completed submissions.
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Wait budget for each submission.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Destroy the command pool and fence. The device must be idle.
    pub fn destroy<D: GpuDevice>(self, device: &D) -> Result<()> {
        let state = self.state.into_inner();
        state.command.destroy(device)?;
        device.destroy(GpuResource::Fence(state.fence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FenceMode, MockDevice};
    use std::sync::Arc;
    use std::thread;

    const SEQUENCE: [&str; 7] = [
        "reset_fence",
        "reset_command_buffer",
        "begin_command_buffer",
        "cmd_copy_buffer",
        "end_command_buffer",
        "queue_submit",
        "wait_for_fence",
    ];

    #[test]
    fn failed_fence_releases_the_command_pool() {
        let device = MockDevice::new();
        device.fail_next_create("create_fence");

        assert!(ImmediateContext::new(&device, Duration::from_secs(1)).is_err());
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn submit_and_wait_runs_full_cycle() {
        let device = MockDevice::new();
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();
        let start = device.calls().len();

        ctx.submit_and_wait(&device, |cmd| {
            device.cmd_copy_buffer(cmd, vk::Buffer::null(), vk::Buffer::null(), 4);
        })
        .unwrap();

        assert_eq!(device.calls()[start..], SEQUENCE.map(String::from));
        assert_eq!(ctx.submission_count(), 1);
        ctx.destroy(&device).unwrap();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn sequential_submissions_complete_before_next_reset() {
        let device = MockDevice::new();
        device.set_fence_mode(FenceMode::Delayed(Duration::from_millis(20)));
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();

        ctx.submit_and_wait(&device, |_| {}).unwrap();
        let fence = ctx.state.lock().fence;
        assert!(device.is_fence_signaled(fence));
        ctx.submit_and_wait(&device, |_| {}).unwrap();

        assert_eq!(ctx.submission_count(), 2);
    }

    #[test]
    fn overlapping_callers_are_serialized() {
        let device = Arc::new(MockDevice::new());
        device.set_fence_mode(FenceMode::Delayed(Duration::from_millis(5)));
        let ctx = Arc::new(ImmediateContext::new(&*device, Duration::from_secs(1)).unwrap());
        let start = device.calls().len();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let device = Arc::clone(&device);
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    ctx.submit_and_wait(&*device, |cmd| {
                        thread::sleep(Duration::from_millis(10));
                        device.cmd_copy_buffer(cmd, vk::Buffer::null(), vk::Buffer::null(), 4);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let calls = device.calls();
        let tail = &calls[start..];
        assert_eq!(tail.len(), SEQUENCE.len() * 2);
        for chunk in tail.chunks(SEQUENCE.len()) {
            assert_eq!(chunk, SEQUENCE.map(String::from));
        }
    }

    #[test]
    fn timeout_is_reported_as_submission_timeout() {
        let device = MockDevice::new();
        device.set_fence_mode(FenceMode::Never);
        let ctx = ImmediateContext::new(&device, Duration::from_millis(5)).unwrap();

        let err = ctx.submit_and_wait(&device, |_| {}).unwrap_err();

        assert!(matches!(err, GpuError::SubmissionTimeout(_)));
        assert_eq!(ctx.submission_count(), 0);
    }

    #[test]
    fn submit_error_is_reported_as_submission_failed() {
        let device = MockDevice::new();
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();
        device.fail_next_submit(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let err = ctx.submit_and_wait(&device, |_| {}).unwrap_err();
        assert!(matches!(err, GpuError::SubmissionFailed(_)));

        // The next submission still works because the fence is reset up front.
        ctx.submit_and_wait(&device, |_| {}).unwrap();
    }

    #[test]
    fn upload_buffer_copies_bytes_and_frees_staging() {
        let device = MockDevice::new();
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();
        let live_before = device.live_count();

        let data: [u32; 4] = [1, 2, 3, 4];
        let buffer = ctx
            .upload_buffer(&device, &data, vk::BufferUsageFlags::STORAGE_BUFFER, "numbers")
            .unwrap();

        assert_eq!(buffer.size, 16);
        assert_eq!(
            device.buffer_contents(&buffer).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&data)
        );
        assert_eq!(device.live_count(), live_before + 1);
        device.destroy(GpuResource::Buffer(buffer)).unwrap();
    }

    #[test]
    fn upload_image_ends_in_shader_read_layout() {
        let device = MockDevice::new();
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();
        let desc = ImageDesc::new(
            "checker",
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D {
                width: 2,
                height: 2,
            },
        )
        .usage(vk::ImageUsageFlags::SAMPLED);

        let image = ctx.upload_image(&device, &[255u8; 16], &desc).unwrap();

        assert_eq!(
            device.last_layout(image.image),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
        device.destroy(GpuResource::Image(image)).unwrap();
    }

    #[test]
    fn empty_uploads_are_rejected() {
        let device = MockDevice::new();
        let ctx = ImmediateContext::new(&device, Duration::from_secs(1)).unwrap();
        let empty: [u32; 0] = [];
        assert!(ctx
            .upload_buffer(&device, &empty, vk::BufferUsageFlags::VERTEX_BUFFER, "empty")
            .is_err());
    }
}
