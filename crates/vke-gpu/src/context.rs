//! Vulkan device context.
//!
//! [`GpuContext`] owns the instance, logical device, graphics queue and
//! memory allocator, and implements [`GpuDevice`] on top of them.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;

use crate::device::{duration_to_ns, DescriptorWrite, GpuDevice, ImageDesc, SubmitBatch};
use crate::error::{GpuError, Result, VkResultExt};
use crate::instance::{create_instance, select_physical_device, DebugMessenger};
use crate::memory::{GpuAllocator, GpuBuffer, GpuImage};
use crate::resource::GpuResource;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<DebugMessenger>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    allocator: Mutex<GpuAllocator>,
    graphics_queue_family: u32,
    /// The queue is externally synchronized; frame and immediate submissions
    /// may come from different threads.
    graphics_queue: Mutex<vk::Queue>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub const fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub const fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Run `f` with exclusive access to the graphics queue.
    pub fn with_queue<T>(&self, f: impl FnOnce(vk::Queue) -> T) -> T {
        let queue = self.graphics_queue.lock();
        f(*queue)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // SAFETY: everything created from this device has been destroyed by
        // its owner; the allocator must go before the device.
        unsafe {
            let _ = self.device.device_wait_idle();
            self.allocator.lock().shutdown();
            self.device.destroy_device(None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

impl GpuDevice for GpuContext {
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: valid device and create info.
        unsafe { self.device.create_fence(&info, None) }.named("vkCreateFence")
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<()> {
        // SAFETY: the fence belongs to this device.
        let result = unsafe {
            self.device
                .wait_for_fences(&[fence], true, duration_to_ns(timeout))
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout(timeout)),
            Err(e) => Err(GpuError::call("vkWaitForFences", e)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: the fence belongs to this device and is not pending.
        unsafe { self.device.reset_fences(&[fence]) }.named("vkResetFences")
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        // SAFETY: valid device and create info.
        unsafe { self.device.create_semaphore(&info, None) }.named("vkCreateSemaphore")
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_queue_family);
        // SAFETY: valid device and create info.
        unsafe { self.device.create_command_pool(&info, None) }.named("vkCreateCommandPool")
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: the pool belongs to this device.
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .named("vkAllocateCommandBuffers")?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("No command buffer allocated".to_string()))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the command buffer is not pending; its fence was waited on.
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .named("vkResetCommandBuffer")
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the command buffer is in the initial state.
        unsafe { self.device.begin_command_buffer(cmd, &info) }.named("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the command buffer is recording.
        unsafe { self.device.end_command_buffer(cmd) }.named("vkEndCommandBuffer")
    }

    fn queue_submit(&self, batch: &SubmitBatch) -> Result<()> {
        let command_buffers = [batch.command_buffer];
        let (wait_semaphores, wait_stages) = match batch.wait {
            Some((semaphore, stage)) => (vec![semaphore], vec![stage]),
            None => (Vec::new(), Vec::new()),
        };
        let signal_semaphores: Vec<_> = batch.signal.into_iter().collect();

        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        self.with_queue(|queue| {
            // SAFETY: the queue is locked and every handle belongs to this
            // device.
            unsafe {
                self.device
                    .queue_submit(queue, std::slice::from_ref(&submit), batch.fence)
            }
        })
        .named("vkQueueSubmit")
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        // SAFETY: valid device and create info.
        unsafe { self.device.create_descriptor_pool(&info, None) }.named("vkCreateDescriptorPool")
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        // SAFETY: no set from this pool is referenced by pending work.
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .named("vkResetDescriptorPool")
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        // SAFETY: pool and layout belong to this device.
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .named("vkAllocateDescriptorSets")?;
        sets.into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("No descriptor set allocated".to_string()))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        // SAFETY: valid device and create info.
        unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .named("vkCreateDescriptorSetLayout")
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Buffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => [vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                }],
                DescriptorWrite::Image { .. } => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Image {
                    view,
                    sampler,
                    layout,
                    ..
                } => [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }],
                DescriptorWrite::Buffer { .. } => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let vk_writes: Vec<_> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding())
                    .descriptor_type(write.kind());
                match write {
                    DescriptorWrite::Buffer { .. } => base.buffer_info(&buffer_infos[i]),
                    DescriptorWrite::Image { .. } => base.image_info(&image_infos[i]),
                }
            })
            .collect();

        // SAFETY: the set is not in use by pending work.
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator
            .lock()
            .create_buffer(size, usage, location, name)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.write_bytes(offset, data)
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage> {
        self.allocator.lock().create_image(desc)
    }

    fn create_sampler(&self, filter: vk::Filter) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        // SAFETY: valid device and create info.
        unsafe { self.device.create_sampler(&info, None) }.named("vkCreateSampler")
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy::default().size(size);
        // SAFETY: cmd is recording and both buffers hold at least `size` bytes.
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(extent);
        // SAFETY: cmd is recording and dst is in TRANSFER_DST_OPTIMAL.
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        let aspect = if to == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(from)
            .new_layout(to)
            .image(image)
            .subresource_range(full_range(aspect));
        let dependency =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        // SAFETY: cmd is recording; synchronization2 is enabled on this device.
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let region = vk::ImageBlit2::default()
            .src_subresource(color_layers())
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_subresource(color_layers())
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_extent)]);
        let info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(std::slice::from_ref(&region));
        // SAFETY: cmd is recording and both images are in transfer layouts.
        unsafe { self.device.cmd_blit_image2(cmd, &info) };
    }

    fn cmd_clear_color(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        let clear = vk::ClearColorValue { float32: color };
        let range = full_range(vk::ImageAspectFlags::COLOR);
        // SAFETY: cmd is recording and the image is in `layout`.
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, &clear, &[range]);
        }
    }

    fn destroy(&self, resource: GpuResource) -> Result<()> {
        tracing::trace!("Destroying {}", resource.kind_name());
        // SAFETY: resources reach this point only once the GPU is done with
        // them.
        unsafe {
            match resource {
                GpuResource::Buffer(buffer) => return self.allocator.lock().free_buffer(buffer),
                GpuResource::Image(image) => return self.allocator.lock().free_image(image),
                GpuResource::ImageView(view) => self.device.destroy_image_view(view, None),
                GpuResource::Sampler(sampler) => self.device.destroy_sampler(sampler, None),
                GpuResource::Pipeline {
                    pipeline, layout, ..
                } => {
                    self.device.destroy_pipeline(pipeline, None);
                    self.device.destroy_pipeline_layout(layout, None);
                }
                GpuResource::PipelineLayout(layout) => {
                    self.device.destroy_pipeline_layout(layout, None);
                }
                GpuResource::DescriptorSetLayout(layout) => {
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
                GpuResource::DescriptorPool(pool) => self.device.destroy_descriptor_pool(pool, None),
                GpuResource::ShaderModule(module) => self.device.destroy_shader_module(module, None),
                GpuResource::CommandPool(pool) => self.device.destroy_command_pool(pool, None),
                GpuResource::Fence(fence) => self.device.destroy_fence(fence, None),
                GpuResource::Semaphore(semaphore) => self.device.destroy_semaphore(semaphore, None),
            }
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_idle(&self) -> Result<()> {
        // SAFETY: valid device.
        unsafe { self.device.device_wait_idle() }.named("vkDeviceWaitIdle")
    }
}

fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    validation: bool,
    display: Option<RawDisplayHandle>,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: vke_core::constants::ENGINE_NAME.to_string(),
            validation: cfg!(debug_assertions),
            display: None,
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub const fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Enable the surface extensions needed to present on `display`.
    pub const fn display(mut self, display: RawDisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        // SAFETY: loading the system Vulkan library has no preconditions
        // beyond it being a conforming loader.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // SAFETY: entry is valid; everything below is created from it in order.
        unsafe {
            let instance = create_instance(&entry, &self.app_name, self.display, self.validation)?;
            let debug = if self.validation {
                match DebugMessenger::new(&entry, &instance) {
                    Ok(debug) => Some(debug),
                    Err(e) => {
                        tracing::warn!("Debug messenger unavailable: {e}");
                        None
                    }
                }
            } else {
                None
            };

            let (physical_device, graphics_queue_family) = select_physical_device(&instance)?;
            let device = Arc::new(create_device(&instance, physical_device, graphics_queue_family)?);
            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);
            let allocator = GpuAllocator::new(&instance, Arc::clone(&device), physical_device)?;

            Ok(GpuContext {
                entry,
                instance,
                debug,
                physical_device,
                device,
                allocator: Mutex::new(allocator),
                graphics_queue_family,
                graphics_queue: Mutex::new(graphics_queue),
            })
        }
    }
}

/// Create the logical device with one graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    instance
        .create_device(physical_device, &create_info, None)
        .named("vkCreateDevice")
}
