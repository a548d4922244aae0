//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use prism_gpu::command::{begin_command_buffer, end_command_buffer};
use prism_gpu::{GpuContextBuilder, GpuError, PresentSettings, Swapchain};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::PrismApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Depth, stencil, MSAA and vsync settings for the swapchain.
    pub present: PresentSettings,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Require a transfer queue family of its own.
    pub separate_transfer_queue: bool,
    /// Color the main pass clears to.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            present: PresentSettings::default(),
            validation: cfg!(debug_assertions),
            separate_transfer_queue: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Replace the presentation settings.
    pub fn with_present(mut self, present: PresentSettings) -> Self {
        self.present = present;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.present = self.present.with_vsync(vsync);
        self
    }

    /// Request an MSAA sample count.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.present = self.present.with_samples(samples);
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Require a dedicated transfer queue family.
    pub fn with_separate_transfer_queue(mut self, separate: bool) -> Self {
        self.separate_transfer_queue = separate;
        self
    }

    /// Set the clear color of the main pass.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Clear values for the main pass, indexed like its attachments.
///
/// The third entry covers the resolve target, which is never cleared.
fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 3] {
    let color = vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    };
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    [color, depth, color]
}

/// Run a [`PrismApp`] with the given configuration.
///
/// This function initializes logging, creates the window, GPU context and
/// swapchain, and runs the event loop until the application exits.
pub fn run_app<A: PrismApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: PrismApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

/// Internal application state.
struct AppState<A: PrismApp> {
    swapchain: Swapchain,
    app: A,
    ctx: AppContext,
    clear_values: [vk::ClearValue; 3],
    target_frame_time: Option<Duration>,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: PrismApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e}");
                    }
                    state.ctx.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    debug!("Window resized to {}x{}", size.width, size.height);
                    state.swapchain.request_rebuild();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: PrismApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        // Create window
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        // Create GPU context
        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .separate_transfer_queue(self.config.separate_transfer_queue)
            .present_settings(&self.config.present)
            .build(window.as_ref())?;

        info!("GPU: {}", gpu.adapter().capabilities().summary());

        let mut ctx = AppContext::new(window, gpu, self.config.present);

        let mut swapchain = Swapchain::create(
            ctx.device(),
            ctx.gpu.surface(),
            &ctx.present,
            ctx.window_extent(),
        )?;

        // Initialize the application
        let mut app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                swapchain.destroy();
                return Err(e);
            }
        };

        if let Some(overlay) = app.overlay() {
            swapchain.set_overlay(overlay);
        }

        let mut state = AppState {
            swapchain,
            app,
            ctx,
            clear_values: clear_values(self.config.clear_color),
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        };

        // A minimized window gets its first swapchain on the first redraw
        if !state.swapchain.needs_rebuild() {
            let extent = state.swapchain.extent();
            let render_pass = state.swapchain.main_render_pass();
            state.app.on_resize(&mut state.ctx, extent, render_pass)?;
        }

        Ok(state)
    }
}

impl<A: PrismApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = self.ctx.tick();
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        let window_extent = self.ctx.window_extent();
        if self
            .swapchain
            .check_rebuild(&self.ctx.present, window_extent)?
        {
            let extent = self.swapchain.extent();
            let render_pass = self.swapchain.main_render_pass();
            self.app.on_resize(&mut self.ctx, extent, render_pass)?;
        }

        self.app.update(&self.ctx, dt);

        // Minimized or still out of date
        if self.swapchain.needs_rebuild() {
            return Ok(());
        }

        let Self {
            swapchain,
            app,
            ctx,
            clear_values,
            ..
        } = self;

        let device = ctx.gpu.device().device();
        let render_pass = swapchain.main_render_pass();
        let extent = swapchain.extent();
        let samples = swapchain.sample_count();
        let frame_number = ctx.frame_count;

        let mut paint_error = None;
        let recorded = swapchain.render(|frame| {
            let cmd = frame.command_buffer;
            unsafe {
                begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(render_pass)
                    .framebuffer(frame.framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(clear_values.as_slice());
                device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            }

            let frame_ctx =
                FrameContext::new(frame, render_pass, extent, samples, dt, frame_number);
            let painted = app.paint(ctx, &frame_ctx);

            unsafe {
                device.cmd_end_render_pass(cmd);
                end_command_buffer(device, cmd)?;
            }

            painted.map_err(|e| {
                paint_error = Some(e);
                GpuError::InvalidState("frame recording aborted by the application".to_string())
            })
        });

        if let Some(e) = paint_error {
            return Err(e);
        }
        recorded?;

        swapchain.present()?;
        ctx.frame_count += 1;

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        // Print FPS statistics
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // Then the swapchain, before the context drops the device
        self.swapchain.destroy();

        info!("Cleanup complete");
    }
}

impl<A: PrismApp> Drop for AppState<A> {
    fn drop(&mut self) {
        self.swapchain.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::default();
        assert_eq!(config.title, "Prism");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.present, PresentSettings::default());
        assert!(!config.separate_transfer_queue);
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn builder_updates_present_settings() {
        let config = AppConfig::new("Demo")
            .with_size(800, 600)
            .with_vsync(true)
            .with_samples(4);
        assert_eq!(config.title, "Demo");
        assert_eq!(config.width, 800);
        assert!(config.present.vsync);
        assert_eq!(config.present.samples, 4);
        assert_eq!(config.present.depth_buffer_bits, 24);
    }

    #[test]
    fn target_fps_becomes_frame_time() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn clear_values_follow_attachment_order() {
        let values = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
