//! Command buffer management.

use ash::vk;

use crate::deletion::DeletionQueue;
use crate::device::GpuDevice;
use crate::error::Result;
use crate::resource::GpuResource;

/// A resettable command pool with one primary command buffer.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandContext {
    /// Create the pool and allocate its command buffer.
    pub fn new<D: GpuDevice>(device: &D) -> Result<Self> {
        DeletionQueue::build_or_unwind(device, |created| {
            let pool = device.create_command_pool()?;
            created.push_resource(GpuResource::CommandPool(pool));
            let buffer = device.allocate_command_buffer(pool)?;
            Ok(Self { pool, buffer })
        })
    }

    /// Get the raw pool handle.
    pub const fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the command buffer.
    pub const fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Reset the command buffer and begin a one-time-submit recording.
    ///
    /// The previous submission of this buffer must have completed.
    pub fn reset_and_begin<D: GpuDevice>(&self, device: &D) -> Result<vk::CommandBuffer> {
        device.reset_command_buffer(self.buffer)?;
        device.begin_command_buffer(self.buffer)?;
        Ok(self.buffer)
    }

    /// End recording.
    pub fn end<D: GpuDevice>(&self, device: &D) -> Result<()> {
        device.end_command_buffer(self.buffer)
    }

    /// Destroy the pool, which frees its command buffer.
    pub fn destroy<D: GpuDevice>(self, device: &D) -> Result<()> {
        device.destroy(GpuResource::CommandPool(self.pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn reset_and_begin_resets_before_beginning() {
        let device = MockDevice::new();
        let ctx = CommandContext::new(&device).unwrap();

        ctx.reset_and_begin(&device).unwrap();
        ctx.end(&device).unwrap();

        let calls = device.calls();
        let tail: Vec<_> = calls.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                "reset_command_buffer".to_string(),
                "begin_command_buffer".to_string(),
                "end_command_buffer".to_string()
            ]
        );
    }

    #[test]
    fn destroy_frees_the_pool() {
        let device = MockDevice::new();
        let ctx = CommandContext::new(&device).unwrap();
        ctx.destroy(&device).unwrap();
        assert_eq!(device.live_count(), 0);
    }
}
