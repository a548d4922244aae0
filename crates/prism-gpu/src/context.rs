//! GPU context management.

use crate::adapter::{required_device_extensions, Adapter, AdapterRequirements};
use crate::config::PresentSettings;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::surface::Surface;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;

/// Instance, surface and logical device for one window.
///
/// Any swapchain created from the context must be destroyed before the
/// context is dropped.
pub struct GpuContext {
    instance: Instance,
    surface: Surface,
    device: LogicalDevice,
}

impl GpuContext {
    /// The Vulkan instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The window surface.
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// The selected adapter.
    pub fn adapter(&self) -> &Adapter {
        self.device.adapter()
    }

    /// The logical device.
    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy();
            self.surface.destroy();
            self.instance.destroy();
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    separate_transfer_queue: bool,
    extensions: Vec<&'static CStr>,
    samples: u32,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            separate_transfer_queue: false,
            extensions: Vec::new(),
            samples: 0,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Demand a transfer queue family distinct from graphics and compute.
    pub fn separate_transfer_queue(mut self, separate: bool) -> Self {
        self.separate_transfer_queue = separate;
        self
    }

    /// Require an additional device extension.
    pub fn extension(mut self, name: &'static CStr) -> Self {
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
        self
    }

    /// Request an MSAA sample count. The adapter may clamp it.
    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Take the sample count from presentation settings.
    pub fn present_settings(self, settings: &PresentSettings) -> Self {
        self.samples(settings.samples)
    }

    /// Adapter requirements this builder describes.
    pub fn requirements(&self) -> AdapterRequirements {
        let mut extensions = required_device_extensions();
        for &ext in &self.extensions {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }

        AdapterRequirements {
            extensions,
            sample_count: PresentSettings::default()
                .with_samples(self.samples)
                .requested_sample_count(),
            separate_transfer_queue: self.separate_transfer_queue,
        }
    }

    /// Build the GPU context for a window.
    ///
    /// The window must outlive the context.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let mut instance =
            unsafe { Instance::new(&self.app_name, display, self.enable_validation)? };

        let surface = match unsafe { Surface::from_window(&instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(e);
            }
        };

        let requirements = self.requirements();
        let device = unsafe {
            Adapter::select(instance.raw(), &surface, &requirements)
                .and_then(|adapter| LogicalDevice::new(&adapter, &requirements.extensions))
        };
        let device = match device {
            Ok(device) => device,
            Err(e) => {
                unsafe {
                    surface.destroy();
                    instance.destroy();
                }
                return Err(e);
            }
        };

        tracing::debug!(
            "GPU context ready, sample count {:?}",
            device.adapter().sample_count()
        );

        Ok(GpuContext {
            instance,
            surface,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn requirements_always_include_swapchain() {
        let requirements = GpuContextBuilder::new().requirements();
        assert_eq!(requirements.extensions, vec![ash::khr::swapchain::NAME]);
        assert_eq!(requirements.sample_count, vk::SampleCountFlags::TYPE_1);
        assert!(!requirements.separate_transfer_queue);
    }

    #[test]
    fn extra_extensions_are_deduplicated() {
        let requirements = GpuContextBuilder::new()
            .extension(ash::khr::swapchain::NAME)
            .extension(ash::khr::maintenance1::NAME)
            .extension(ash::khr::maintenance1::NAME)
            .requirements();
        assert_eq!(
            requirements.extensions,
            vec![ash::khr::swapchain::NAME, ash::khr::maintenance1::NAME]
        );
    }

    #[test]
    fn sample_count_comes_from_settings() {
        let settings = PresentSettings::default().with_samples(6);
        let requirements = GpuContextBuilder::new()
            .present_settings(&settings)
            .separate_transfer_queue(true)
            .requirements();
        assert_eq!(requirements.sample_count, vk::SampleCountFlags::TYPE_4);
        assert!(requirements.separate_transfer_queue);
    }
}
