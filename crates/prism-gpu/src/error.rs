//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Out-of-date and suboptimal surfaces are not errors: the swapchain turns them
/// into a pending rebuild instead.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader or driver could not be loaded.
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    /// No adapter was found.
    #[error("No suitable GPU found")]
    NoSuitableAdapter,

    /// A queue family required for a role could not be resolved.
    #[error("Device does not have a {0} queue")]
    MissingQueueFamily(&'static str),

    /// A separate transfer queue family was requested but none exists.
    #[error("Device does not have a separate transfer queue")]
    SeparateTransferUnavailable,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// No format satisfies the requested precision.
    #[error("Format negotiation failed: {0}")]
    FormatNegotiation(String),

    /// No memory type matches the requirements.
    #[error("No memory type in {type_bits:#b} with properties {properties:?}")]
    NoMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// A creation call returned a null handle.
    #[error("Failed to create {0}")]
    NullHandle(&'static str),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
