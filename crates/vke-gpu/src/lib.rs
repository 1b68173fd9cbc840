//! Vulkan frame-lifecycle layer for the vke engine.
//!
//! This crate provides:
//! - Instance, device and swapchain management on top of `ash`
//! - Memory allocation via gpu-allocator
//! - Per-frame slots with fences, semaphores, command buffers, deletion
//!   queues and descriptor pools, rotated by a [`FrameRing`]
//! - A blocking [`ImmediateContext`] for uploads
//! - The [`FrameEngine`] that drives acquire, record, submit and present
//!
//! Everything above the Vulkan backend talks to the device through the
//! [`GpuDevice`] and [`PresentTarget`] traits; the `mock` feature exposes an
//! in-memory implementation of both for tests.

pub mod command;
pub mod config;
pub mod context;
pub mod deletion;
pub mod descriptors;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod immediate;
pub mod instance;
pub mod memory;
pub mod resource;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use command::CommandContext;
pub use config::{DescriptorPoolConfig, FrameEngineConfig};
pub use context::{GpuContext, GpuContextBuilder};
pub use deletion::DeletionQueue;
pub use descriptors::{
    DescriptorAllocator, DescriptorLayout, DescriptorSet, DescriptorSetLayoutBuilder,
    DescriptorWriter, PoolSizeRatio,
};
pub use device::{DescriptorWrite, GpuDevice, ImageDesc, PresentTarget, SubmitBatch, SwapchainImage};
pub use engine::{DefaultSamplers, DrawTarget, FrameContext, FrameEngine, FrameStatus, Lifetime};
pub use error::{GpuError, Result};
pub use frame::{FrameRing, FrameSlot, SlotState};
pub use gpu_allocator::MemoryLocation;
pub use immediate::ImmediateContext;
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use resource::{GpuResource, PipelineKind};
pub use surface::{SurfaceContext, WindowTarget};
pub use swapchain::{Swapchain, SwapchainDesc};
pub use sync::FrameSync;

/// Frame engine running on a real device and window.
pub type WindowEngine = FrameEngine<GpuContext, WindowTarget>;
