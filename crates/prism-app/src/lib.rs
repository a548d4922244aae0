//! Windowing shell for Prism.
//!
//! This crate drives the presentation layer from a winit event loop:
//! - Window creation and logging setup
//! - GPU context and swapchain creation
//! - Swapchain rebuild on resize
//! - The per-frame render and present calls
//!
//! # Example
//!
//! ```no_run
//! use prism_app::{run_app, AppConfig, AppContext, FrameContext, PrismApp};
//!
//! struct MyApp;
//!
//! impl PrismApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn paint(&mut self, _ctx: &AppContext, _frame: &FrameContext) -> anyhow::Result<()> {
//!         // The main render pass is already begun; record draws here
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("Hello"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::PrismApp;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use prism_gpu::{GpuContext, OverlayRecorder, PresentSettings};
pub use winit::event::WindowEvent;
