//! Surface management for windowed rendering.
//!
//! [`WindowTarget`] ties a window surface and its swapchain to a
//! [`GpuContext`] and is the [`PresentTarget`] used by the frame engine
//! outside of tests.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::GpuContext;
use crate::device::{duration_to_ns, GpuDevice, PresentTarget, SwapchainImage};
use crate::error::{GpuError, Result, VkResultExt};
use crate::swapchain::{Swapchain, SwapchainDesc};

/// A Vulkan surface and the extension loaders that act on it.
pub struct SurfaceContext {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(gpu: &GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            gpu.entry(),
            gpu.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(format!("{e:?}")))?;

        let surface_loader = ash::khr::surface::Instance::new(gpu.entry(), gpu.instance());
        let swapchain_loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());

        let supported = surface_loader
            .get_physical_device_surface_support(
                gpu.physical_device(),
                gpu.graphics_queue_family(),
                surface,
            )
            .named("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        if !supported {
            surface_loader.destroy_surface(surface, None);
            return Err(GpuError::SurfaceCreation(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        Ok(Self {
            surface,
            surface_loader,
            swapchain_loader,
        })
    }

    /// Pick swapchain parameters for this surface.
    pub fn describe(
        &self,
        gpu: &GpuContext,
        desired: vk::Extent2D,
        vsync: bool,
    ) -> Result<(vk::SurfaceCapabilitiesKHR, SwapchainDesc)> {
        let physical_device = gpu.physical_device();
        // SAFETY: surface and physical device are valid.
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .named("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                self.surface_loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .named("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .named("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            )
        };
        let desc = SwapchainDesc::choose(&capabilities, &formats, &present_modes, desired, vsync)?;
        Ok((capabilities, desc))
    }

    /// Create a swapchain for this surface.
    ///
    /// # Safety
    /// `old_swapchain`, if any, must not be in use.
    pub unsafe fn create_swapchain(
        &self,
        gpu: &GpuContext,
        desired: vk::Extent2D,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Swapchain> {
        let (capabilities, desc) = self.describe(gpu, desired, vsync)?;
        Swapchain::new(
            gpu.device(),
            &self.swapchain_loader,
            self.surface,
            &capabilities,
            &desc,
            old_swapchain,
        )
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// A window surface with its swapchain.
pub struct WindowTarget {
    gpu: Arc<GpuContext>,
    surface: SurfaceContext,
    swapchain: Option<Swapchain>,
    vsync: bool,
    destroyed: bool,
}

impl WindowTarget {
    /// Create a surface and swapchain for `window`.
    ///
    /// # Safety
    /// The window must outlive the target.
    pub unsafe fn new<W>(gpu: Arc<GpuContext>, window: &W, extent: vk::Extent2D, vsync: bool) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let surface = SurfaceContext::from_window(&gpu, window)?;
        let swapchain = match surface.create_swapchain(&gpu, extent, vsync, None) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                surface.destroy();
                return Err(e);
            }
        };
        Ok(Self {
            gpu,
            surface,
            swapchain: Some(swapchain),
            vsync,
            destroyed: false,
        })
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |s| s.images.len())
    }

    /// Format of the swapchain images.
    pub fn format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map_or(vk::Format::UNDEFINED, |s| s.format)
    }

    fn live(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Swapchain destroyed".to_string()))
    }
}

impl PresentTarget for WindowTarget {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> Result<SwapchainImage> {
        let swapchain = self.live()?;
        // SAFETY: swapchain and semaphore belong to this device.
        let (index, suboptimal) = unsafe {
            swapchain.acquire_next_image(&self.surface.swapchain_loader, signal, duration_to_ns(timeout))
        }?;
        let slot = index as usize;
        let image = swapchain.images.get(slot).copied().ok_or_else(|| {
            GpuError::InvalidState(format!("Swapchain returned image index {index}"))
        })?;
        Ok(SwapchainImage {
            index,
            image,
            view: swapchain.image_views[slot],
            extent: swapchain.extent,
            suboptimal,
        })
    }

    fn present(&mut self, index: u32, wait: vk::Semaphore) -> Result<bool> {
        let swapchain = self.live()?;
        let loader = &self.surface.swapchain_loader;
        self.gpu.with_queue(|queue| {
            // SAFETY: the queue is locked for the duration of the call.
            unsafe { swapchain.present(loader, queue, index, wait) }
        })
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        let old = self.swapchain.take();
        // SAFETY: the engine waits for the device to go idle before
        // recreating, so the old swapchain is unused.
        unsafe {
            let created = self.surface.create_swapchain(
                &self.gpu,
                extent,
                self.vsync,
                old.as_ref().map(|s| s.swapchain),
            );
            if let Some(old) = old {
                old.destroy(self.gpu.device(), &self.surface.swapchain_loader);
            }
            self.swapchain = Some(created?);
        }
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or_else(vk::Extent2D::default, |s| s.extent)
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        // SAFETY: the device is idle.
        unsafe {
            if let Some(swapchain) = self.swapchain.take() {
                swapchain.destroy(self.gpu.device(), &self.surface.swapchain_loader);
            }
            self.surface.destroy();
        }
        tracing::debug!("Window target destroyed");
    }
}

impl Drop for WindowTarget {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        // Dropped without an explicit destroy, e.g. when engine creation
        // failed. The surface must go before the context destroys the
        // instance.
        if let Err(e) = self.gpu.wait_idle() {
            tracing::warn!("Device wait failed while dropping window target: {e}");
        }
        PresentTarget::destroy(self);
    }
}
