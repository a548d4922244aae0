//! Application context.

use ash::vk;
use prism_gpu::{GpuContext, LogicalDevice, PresentSettings};
use std::sync::Arc;
use std::time::Instant;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Window and GPU state shared with the application.
pub struct AppContext {
    /// GPU context. Declared before the window so the surface goes first.
    pub gpu: GpuContext,
    /// Settings used for every swapchain rebuild.
    pub present: PresentSettings,
    /// Number of frames rendered.
    pub frame_count: u64,
    /// Time of last frame.
    pub last_frame_time: Instant,
    /// The window.
    pub window: Arc<Window>,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, gpu: GpuContext, present: PresentSettings) -> Self {
        Self {
            gpu,
            present,
            frame_count: 0,
            last_frame_time: Instant::now(),
            window,
        }
    }

    /// The logical device.
    pub fn device(&self) -> &LogicalDevice {
        self.gpu.device()
    }

    /// Current window size in pixels.
    pub fn window_extent(&self) -> vk::Extent2D {
        window_extent(self.window.inner_size())
    }

    /// Whether the window currently has no area, e.g. while minimized.
    pub fn is_minimized(&self) -> bool {
        let extent = self.window_extent();
        extent.width == 0 || extent.height == 0
    }

    /// Record and submit a one-shot command buffer on the graphics queue.
    pub fn with_graphics_commands<F>(&self, record: F) -> prism_gpu::Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        self.gpu.device().with_command_buffer(
            record,
            prism_gpu::QueueRole::Graphics,
            vk::CommandBufferLevel::PRIMARY,
        )
    }

    /// Advance the frame clock, returning seconds since the last frame.
    pub(crate) fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        dt
    }
}

pub(crate) fn window_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_extent_keeps_physical_pixels() {
        assert_eq!(
            window_extent(PhysicalSize::new(1280, 720)),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(window_extent(PhysicalSize::new(0, 720)).width, 0);
    }
}
