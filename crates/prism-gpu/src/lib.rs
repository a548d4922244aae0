//! Vulkan presentation and GPU resource lifecycle.
//!
//! This crate provides:
//! - Adapter selection and queue family resolution
//! - Logical device, queues and per-role command pools
//! - Swapchain creation, rebuild and the per-frame render/present protocol
//! - Attachment memory via gpu-allocator

pub mod adapter;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod queue;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use adapter::{Adapter, AdapterRequirements};
pub use capabilities::{AdapterCapabilities, GpuVendor};
pub use config::PresentSettings;
pub use context::{GpuContext, GpuContextBuilder};
pub use device::{LogicalDevice, PoolSlot, Queues};
pub use error::{GpuError, Result};
pub use frame::Frame;
pub use memory::{GpuAllocator, GpuImage};
pub use queue::{QueueFamilies, QueueRole};
pub use surface::Surface;
pub use swapchain::{OverlayRecorder, Swapchain};
pub use sync::{FrameSemaphores, FrameSynchronizer, FrameTimeline};
