//! The narrow device interface the frame lifecycle is built on.
//!
//! [`GpuDevice`] covers exactly the calls the engine itself makes: object
//! creation and destruction, fences, command recording, queue submission,
//! descriptor pools and the handful of transfer commands the engine records.
//! [`PresentTarget`] covers the swapchain. The Vulkan backend implements
//! both on [`crate::GpuContext`] and [`crate::WindowTarget`]; tests use the
//! mock backend.
//!
//! Handles passed back into a device must have been created by that same
//! device and must not have been destroyed.

use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::Result;
use crate::memory::{GpuBuffer, GpuImage};
use crate::resource::GpuResource;

/// One queue submission: a single command buffer with optional semaphores.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitBatch {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage that waits.
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    /// Fence signaled when the batch completes (may be null).
    pub fence: vk::Fence,
}

impl SubmitBatch {
    /// Create a batch for a single command buffer.
    pub fn new(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            ..Default::default()
        }
    }

    /// Wait on a semaphore at the given stage.
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait = Some((semaphore, stage));
        self
    }

    /// Signal a semaphore on completion.
    pub fn signal(mut self, semaphore: vk::Semaphore) -> Self {
        self.signal = Some(semaphore);
        self
    }

    /// Signal a fence on completion.
    pub fn fence(mut self, fence: vk::Fence) -> Self {
        self.fence = fence;
        self
    }
}

/// A single descriptor write, applied by [`GpuDevice::update_descriptor_set`].
#[derive(Debug, Clone, Copy)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    Image {
        binding: u32,
        kind: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorWrite {
    /// Binding slot this write targets.
    pub const fn binding(&self) -> u32 {
        match self {
            Self::Buffer { binding, .. } | Self::Image { binding, .. } => *binding,
        }
    }

    /// Descriptor kind being written.
    pub const fn kind(&self) -> vk::DescriptorType {
        match self {
            Self::Buffer { kind, .. } | Self::Image { kind, .. } => *kind,
        }
    }
}

/// Description of a 2D image to allocate.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub location: MemoryLocation,
}

impl<'a> ImageDesc<'a> {
    /// A device-local 2D image.
    pub fn new(name: &'a str, format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            name,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::empty(),
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Set the image usage flags.
    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Aspect covered by the default view.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        match self.format {
            vk::Format::D32_SFLOAT | vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Device operations consumed by the frame lifecycle engine.
pub trait GpuDevice {
    // Synchronization
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    /// Block until the fence signals. A timeout yields
    /// [`crate::GpuError::FenceTimeout`].
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    // Command recording
    /// Create a resettable command pool on the graphics queue family.
    fn create_command_pool(&self) -> Result<vk::CommandPool>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Begin a one-time-submit recording.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Submit to the graphics queue.
    fn queue_submit(&self, batch: &SubmitBatch) -> Result<()>;

    // Descriptors
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()>;
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // Memory
    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer>;
    /// Copy bytes into a host-visible buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Create an image and its default view.
    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage>;
    fn create_sampler(&self, filter: vk::Filter) -> Result<vk::Sampler>;

    // Transfer commands recorded by the engine itself
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64);
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    );
    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    );
    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    );
    /// Clear a color image that is in `GENERAL` or `TRANSFER_DST_OPTIMAL`.
    fn cmd_clear_color(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    );

    /// Destroy any object created by this device.
    fn destroy(&self, resource: GpuResource) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;
}

/// An image handed out by [`PresentTarget::acquire_next_image`].
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub suboptimal: bool,
}

/// Presentation surface operations.
pub trait PresentTarget {
    /// Acquire the next presentable image, signaling `signal` when it is
    /// ready. An out-of-date surface yields
    /// [`crate::GpuError::SwapchainOutOfDate`].
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> Result<SwapchainImage>;

    /// Queue `index` for presentation once `wait` signals. Returns whether
    /// the swapchain is suboptimal.
    fn present(&mut self, index: u32, wait: vk::Semaphore) -> Result<bool>;

    /// Rebuild the swapchain at the given extent.
    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()>;

    fn extent(&self) -> vk::Extent2D;

    /// Release the swapchain and surface. The device must be idle.
    fn destroy(&mut self);
}

/// Duration in nanoseconds, saturating at `u64::MAX`.
pub(crate) fn duration_to_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_batch_builder_sets_fields() {
        let batch = SubmitBatch::new(vk::CommandBuffer::null())
            .wait(
                vk::Semaphore::null(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )
            .fence(vk::Fence::null());
        assert!(batch.wait.is_some());
        assert!(batch.signal.is_none());
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let depth = ImageDesc::new("depth", vk::Format::D32_SFLOAT, extent);
        let color = ImageDesc::new("color", vk::Format::R16G16B16A16_SFLOAT, extent);
        assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(color.aspect(), vk::ImageAspectFlags::COLOR);
        assert_eq!(color.extent.depth, 1);
    }

    #[test]
    fn huge_timeouts_saturate() {
        assert_eq!(duration_to_ns(Duration::MAX), u64::MAX);
        assert_eq!(duration_to_ns(Duration::from_secs(1)), 1_000_000_000);
    }
}
