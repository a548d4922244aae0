//! Application trait.

use crate::context::AppContext;
use crate::frame::FrameContext;
use ash::vk;
use prism_gpu::OverlayRecorder;
use winit::event::WindowEvent;

/// Trait implemented by applications driven by [`run_app`](crate::run_app).
///
/// The runner owns the swapchain. Per redraw it rebuilds the swapchain if
/// needed, calls [`update`](Self::update), then records the frame through
/// [`paint`](Self::paint) and presents it.
pub trait PrismApp: Sized {
    /// Initialize the application once the window and GPU context exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draws into the main render pass.
    fn paint(&mut self, ctx: &AppContext, frame: &FrameContext) -> anyhow::Result<()>;

    /// Recorder for the overlay pass, installed once after [`init`](Self::init).
    fn overlay(&mut self) -> Option<Box<dyn OverlayRecorder>> {
        None
    }

    /// Called after the swapchain was rebuilt with a new extent.
    ///
    /// Pipelines that depend on the render pass must be recreated here.
    fn on_resize(
        &mut self,
        _ctx: &mut AppContext,
        _extent: vk::Extent2D,
        _render_pass: vk::RenderPass,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` if the event was consumed.
    fn on_event(&mut self, _event: &WindowEvent) -> bool {
        false
    }

    /// Release GPU resources. The device is idle when this is called.
    fn cleanup(&mut self, _ctx: &mut AppContext) {}
}
