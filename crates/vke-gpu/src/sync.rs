//! Synchronization primitives.

use std::time::Duration;

use ash::vk;

use crate::deletion::DeletionQueue;
use crate::device::GpuDevice;
use crate::error::Result;
use crate::resource::GpuResource;

/// Frame synchronization resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// The fence starts signaled so the first wait returns immediately.
    pub fn new<D: GpuDevice>(device: &D) -> Result<Self> {
        DeletionQueue::build_or_unwind(device, |created| {
            let image_available = device.create_semaphore()?;
            created.push_resource(GpuResource::Semaphore(image_available));
            let render_finished = device.create_semaphore()?;
            created.push_resource(GpuResource::Semaphore(render_finished));
            Ok(Self {
                image_available,
                render_finished,
                in_flight: device.create_fence(true)?,
            })
        })
    }

    /// Wait for the previous use of this frame to finish.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait<D: GpuDevice>(&self, device: &D, timeout: Duration) -> Result<()> {
        device.wait_for_fence(self.in_flight, timeout)
    }

    /// Reset the fence for the next submission.
    pub fn reset<D: GpuDevice>(&self, device: &D) -> Result<()> {
        device.reset_fence(self.in_flight)
    }

    /// Destroy synchronization resources.
    ///
    /// The fence must not be pending.
    pub fn destroy<D: GpuDevice>(self, device: &D) -> Result<()> {
        device.destroy(GpuResource::Semaphore(self.image_available))?;
        device.destroy(GpuResource::Semaphore(self.render_finished))?;
        device.destroy(GpuResource::Fence(self.in_flight))
    }
}
