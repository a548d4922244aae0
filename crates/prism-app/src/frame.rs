//! Per-frame data handed to the application.

use ash::vk;
use prism_gpu::Frame;

/// Everything an application needs to record one frame.
///
/// The command buffer is already recording and the main render pass has
/// begun on the frame's framebuffer when [`PrismApp::paint`] is called.
///
/// [`PrismApp::paint`]: crate::PrismApp::paint
pub struct FrameContext<'a> {
    frame: &'a Frame,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    /// Time since the previous frame in seconds.
    pub dt: f32,
    /// Number of frames rendered before this one.
    pub frame_number: u64,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(
        frame: &'a Frame,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        dt: f32,
        frame_number: u64,
    ) -> Self {
        Self {
            frame,
            render_pass,
            extent,
            samples,
            dt,
            frame_number,
        }
    }

    /// Command buffer recording the main pass.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.frame.command_buffer
    }

    /// Swapchain image index being rendered.
    pub fn image_index(&self) -> u32 {
        self.frame.index
    }

    /// The underlying swapchain frame.
    pub fn frame(&self) -> &Frame {
        self.frame
    }

    /// Main render pass, for pipeline creation.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Size of the render area.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Sample count of the color attachment.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Viewport covering the whole render area.
    pub fn viewport(&self) -> vk::Viewport {
        full_viewport(self.extent)
    }

    /// Scissor covering the whole render area.
    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

pub(crate) fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}
