//! Value-typed GPU resources.
//!
//! Every object the engine may need to destroy later is described by a
//! [`GpuResource`] value. Deletion queues store these values directly
//! rather than closures pointing back into their owners.

use ash::vk;

use crate::memory::{GpuBuffer, GpuImage};

/// Pipeline flavour carried alongside a pipeline handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

impl PipelineKind {
    /// Bind point used when recording commands against this pipeline.
    pub const fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            Self::Graphics => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

/// A destroyable GPU object.
#[derive(Debug)]
pub enum GpuResource {
    /// Buffer together with its memory allocation.
    Buffer(GpuBuffer),
    /// Image together with its default view and memory allocation.
    Image(GpuImage),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    /// Pipeline and the layout it was built against; both are destroyed.
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        kind: PipelineKind,
    },
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    ShaderModule(vk::ShaderModule),
    CommandPool(vk::CommandPool),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
}

impl GpuResource {
    /// Short name used in logs.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::ImageView(_) => "image view",
            Self::Sampler(_) => "sampler",
            Self::Pipeline { kind, .. } => match kind {
                PipelineKind::Graphics => "graphics pipeline",
                PipelineKind::Compute => "compute pipeline",
            },
            Self::PipelineLayout(_) => "pipeline layout",
            Self::DescriptorSetLayout(_) => "descriptor set layout",
            Self::DescriptorPool(_) => "descriptor pool",
            Self::ShaderModule(_) => "shader module",
            Self::CommandPool(_) => "command pool",
            Self::Fence(_) => "fence",
            Self::Semaphore(_) => "semaphore",
        }
    }
}

impl From<GpuBuffer> for GpuResource {
    fn from(buffer: GpuBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<GpuImage> for GpuResource {
    fn from(image: GpuImage) -> Self {
        Self::Image(image)
    }
}

impl From<vk::Sampler> for GpuResource {
    fn from(sampler: vk::Sampler) -> Self {
        Self::Sampler(sampler)
    }
}

impl From<vk::DescriptorSetLayout> for GpuResource {
    fn from(layout: vk::DescriptorSetLayout) -> Self {
        Self::DescriptorSetLayout(layout)
    }
}
