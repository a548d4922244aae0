//! Presentation surface.
//!
//! The surface is created from the raw handles of a window owned by the
//! windowing layer; this module only wraps it and answers capability queries.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A Vulkan surface and its extension loader.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(instance: &Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let handle = ash_window::create_surface(
            instance.entry(),
            instance.raw(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        if handle == vk::SurfaceKHR::null() {
            return Err(GpuError::NullHandle("window surface"));
        }

        Ok(Self {
            handle,
            loader: ash::khr::surface::Instance::new(instance.entry(), instance.raw()),
        })
    }

    /// The raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader.
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Query what the surface supports on an adapter.
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        SurfaceSupport::query(&self.loader, physical_device, self.handle)
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created from this surface may still exist.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.handle, None);
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query capabilities, formats and present modes.
    pub fn query(
        loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }
}
