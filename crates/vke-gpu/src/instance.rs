//! Vulkan instance creation and physical device selection.

use std::ffi::{c_char, c_void, CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::{GpuError, Result, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions needed to present to `display`, plus debug utils when
/// validation is on.
pub fn required_instance_extensions(
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<Vec<&'static CStr>> {
    let mut extensions = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| GpuError::SurfaceCreation(format!("{e:?}")))?
            .iter()
            // SAFETY: ash_window hands out pointers to static extension names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect(),
        None => Vec::new(),
    };

    if validation {
        extensions.push(ash::ext::debug_utils::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME);
        extensions.push(ash::khr::get_physical_device_properties2::NAME);
    }

    Ok(extensions)
}

/// Debug messenger forwarding validation output to `tracing`.
pub(crate) struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub(crate) unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = loader
            .create_debug_utils_messenger(&messenger_create_info(), None)
            .named("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, messenger })
    }

    /// # Safety
    /// Must be called before the instance is destroyed.
    pub(crate) unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Create a Vulkan 1.3 instance.
///
/// Missing validation layers are logged and skipped rather than treated as
/// fatal.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::Other("Application name contains a NUL byte".to_string()))?;
    let engine_name = CString::new(vke_core::constants::ENGINE_NAME)
        .map_err(|_| GpuError::Other("Engine name contains a NUL byte".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let validation = validation && validation_layer_available(entry)?;
    let extensions = required_instance_extensions(display, validation)?;
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
    let layer_names: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let mut debug_info = messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);
    if validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = entry
        .create_instance(&create_info, None)
        .named("vkCreateInstance")?;

    tracing::info!(
        "Vulkan instance created (validation {})",
        if validation { "on" } else { "off" }
    );

    Ok(instance)
}

unsafe fn validation_layer_available(entry: &ash::Entry) -> Result<bool> {
    let available = entry
        .enumerate_instance_layer_properties()
        .named("vkEnumerateInstanceLayerProperties")?;
    let found = available
        .iter()
        .any(|props| props.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
    if !found {
        tracing::warn!("Validation layer {VALIDATION_LAYER:?} not available");
    }
    Ok(found)
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let kind = match kind {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        _ => "unknown",
    };
    // SAFETY: the loader passes valid callback data for the duration of the call.
    let message = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => tracing::error!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => tracing::warn!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => tracing::debug!(target: "vulkan", kind, "{message}"),
        _ => tracing::trace!(target: "vulkan", kind, "{message}"),
    }

    vk::FALSE
}

/// Pick the highest-scoring physical device with Vulkan 1.3 and a graphics
/// queue.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = instance
        .enumerate_physical_devices()
        .named("vkEnumeratePhysicalDevices")?;

    let mut best = None;
    let mut best_score = -1;

    for device in devices {
        let Some(queue_family) = graphics_queue_family(instance, device) else {
            continue;
        };
        let score = score_physical_device(instance, device);
        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    let (device, queue_family) = best.ok_or(GpuError::NoSuitableDevice)?;

    let properties = instance.get_physical_device_properties(device);
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!("Selected GPU: {name} ({:?})", properties.device_type);

    Ok((device, queue_family))
}

/// First queue family supporting graphics (and therefore compute and
/// transfer).
unsafe fn graphics_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    instance
        .get_physical_device_queue_family_properties(device)
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .and_then(|i| u32::try_from(i).ok())
}

unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = instance.get_physical_device_properties(device);
    let memory = instance.get_physical_device_memory_properties(device);
    let heaps = memory
        .memory_heaps_as_slice()
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size);
    score_device(properties.api_version, properties.device_type, heaps.sum())
}

/// Score a device from its API version, type and device-local memory.
///
/// Devices below Vulkan 1.3 score -1 and are never selected.
pub fn score_device(api_version: u32, device_type: vk::PhysicalDeviceType, vram_bytes: u64) -> i32 {
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 3)
    {
        return -1;
    }

    let mut score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    // +1 per GB
    score += i32::try_from(vram_bytes / (1024 * 1024 * 1024)).unwrap_or(i32::MAX - score);
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn pre_1_3_devices_are_rejected() {
        let score = score_device(
            vk::make_api_version(0, 1, 2, 0),
            vk::PhysicalDeviceType::DISCRETE_GPU,
            8 * GB,
        );
        assert_eq!(score, -1);
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = score_device(vk::API_VERSION_1_3, vk::PhysicalDeviceType::DISCRETE_GPU, 2 * GB);
        let integrated =
            score_device(vk::API_VERSION_1_3, vk::PhysicalDeviceType::INTEGRATED_GPU, 16 * GB);
        assert!(discrete > integrated);
    }

    #[test]
    fn more_memory_breaks_ties() {
        let small = score_device(vk::API_VERSION_1_3, vk::PhysicalDeviceType::DISCRETE_GPU, 4 * GB);
        let large = score_device(vk::API_VERSION_1_3, vk::PhysicalDeviceType::DISCRETE_GPU, 12 * GB);
        assert_eq!(large - small, 8);
    }

    #[test]
    fn headless_validation_requests_only_debug_utils() {
        let extensions = required_instance_extensions(None, true).unwrap();
        assert!(extensions.contains(&ash::ext::debug_utils::NAME));
        #[cfg(not(target_os = "macos"))]
        assert_eq!(extensions.len(), 1);
    }
}
