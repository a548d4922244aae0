//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Loaded entry points, the instance, and the optional validation messenger.
pub struct Instance {
    entry: ash::Entry,
    raw: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Load the Vulkan loader and create an instance able to present to `display`.
    ///
    /// # Safety
    /// The display handle must be valid.
    pub unsafe fn new(
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        let entry = ash::Entry::load()
            .map_err(|e| GpuError::LoaderUnavailable(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Prism")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extension_names: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display)?.to_vec();
        if enable_validation {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        #[cfg(target_os = "macos")]
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

        let layers = if enable_validation {
            available_layers(&entry, validation_layers())?
        } else {
            vec![]
        };
        let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);

        let raw = entry.create_instance(&create_info, None)?;

        let debug = if enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &raw);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = loader.create_debug_utils_messenger(&messenger_info, None)?;
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Self { entry, raw, debug })
    }

    /// The loaded entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The raw instance.
    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    /// Destroy the messenger and the instance.
    ///
    /// # Safety
    /// Every object created from this instance must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        if let Some((loader, messenger)) = self.debug.take() {
            loader.destroy_debug_utils_messenger(messenger, None);
        }
        self.raw.destroy_instance(None);
    }
}

/// Keep only the requested layers the loader knows about.
unsafe fn available_layers(
    entry: &ash::Entry,
    requested: Vec<&'static CStr>,
) -> Result<Vec<&'static CStr>> {
    let available = entry.enumerate_instance_layer_properties()?;
    Ok(requested
        .into_iter()
        .filter(|layer| {
            let found = available
                .iter()
                .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect())
}

/// Forward validation messages to `tracing`.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!("[{message_type:?}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!("[{message_type:?}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::debug!("[{message_type:?}] {message}");
        }
        _ => tracing::trace!("[{message_type:?}] {message}"),
    }

    vk::FALSE
}
