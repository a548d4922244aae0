//! Physical adapter selection.

use crate::capabilities::{clamp_sample_count, AdapterCapabilities};
use crate::error::{GpuError, Result};
use crate::memory::find_memory_type_index;
use crate::queue::{describe_families, QueueFamilies};
use crate::surface::Surface;
use ash::vk;
use std::ffi::CStr;

/// Device extensions every adapter must support.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// What the application needs from an adapter.
#[derive(Debug, Clone)]
pub struct AdapterRequirements {
    /// Device extensions that must be supported.
    pub extensions: Vec<&'static CStr>,
    /// Desired MSAA sample count (clamped to what the adapter supports).
    pub sample_count: vk::SampleCountFlags,
    /// Demand a transfer queue family distinct from graphics and compute.
    pub separate_transfer_queue: bool,
}

impl Default for AdapterRequirements {
    fn default() -> Self {
        Self {
            extensions: required_device_extensions(),
            sample_count: vk::SampleCountFlags::TYPE_1,
            separate_transfer_queue: false,
        }
    }
}

/// Outcome of testing one adapter against the requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suitability {
    /// Graphics and present (and a separate transfer, if demanded) resolved.
    pub queues_resolved: bool,
    /// Every required extension is supported.
    pub extensions_supported: bool,
    /// The surface offers at least one format and one present mode.
    pub surface_adequate: bool,
    /// Anisotropic sampling is supported.
    pub sampler_anisotropy: bool,
    /// The adapter is a discrete GPU.
    pub discrete: bool,
}

impl Suitability {
    /// Passes every capability test.
    pub fn is_suitable(&self) -> bool {
        self.queues_resolved
            && self.extensions_supported
            && self.surface_adequate
            && self.sampler_anisotropy
    }

    /// Suitable and discrete.
    pub fn is_preferred(&self) -> bool {
        self.is_suitable() && self.discrete
    }
}

/// Pick the first preferred adapter, or the first adapter when none is preferred.
pub fn pick_adapter(reports: &[Suitability]) -> Option<usize> {
    if reports.is_empty() {
        return None;
    }
    Some(reports.iter().position(Suitability::is_preferred).unwrap_or(0))
}

/// The selected physical adapter and what was negotiated with it.
#[derive(Clone)]
pub struct Adapter {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    queue_families: QueueFamilies,
    sample_count: vk::SampleCountFlags,
    capabilities: AdapterCapabilities,
}

impl Adapter {
    /// Enumerate adapters and select one for the surface.
    ///
    /// # Safety
    /// The instance and surface must be valid.
    pub unsafe fn select(
        instance: &ash::Instance,
        surface: &Surface,
        requirements: &AdapterRequirements,
    ) -> Result<Self> {
        let devices = instance.enumerate_physical_devices()?;
        if devices.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        let reports: Vec<Suitability> = devices
            .iter()
            .map(|&device| assess(instance, surface, device, requirements))
            .collect();

        for (index, report) in reports.iter().enumerate() {
            tracing::debug!("Adapter {index}: {report:?}");
        }

        let index = pick_adapter(&reports).ok_or(GpuError::NoSuitableAdapter)?;
        if !reports[index].is_preferred() {
            tracing::warn!(
                "No discrete GPU meets the requirements, falling back to adapter {index}"
            );
        }

        let physical_device = devices[index];
        let capabilities = AdapterCapabilities::query(instance, physical_device);

        let missing = capabilities.missing_extensions(&requirements.extensions);
        if let Some(ext) = missing.first() {
            return Err(GpuError::ExtensionNotSupported(
                ext.to_string_lossy().into_owned(),
            ));
        }

        let queue_families = QueueFamilies::query(
            instance,
            surface.loader(),
            physical_device,
            surface.handle(),
            requirements.separate_transfer_queue,
        )?;
        tracing::debug!("Queue families: {queue_families:?}");

        let sample_count = clamp_sample_count(
            requirements.sample_count,
            capabilities.max_usable_sample_count(),
        );

        tracing::info!("Selected GPU: {}", capabilities.summary());

        Ok(Self {
            instance: instance.clone(),
            physical_device,
            surface: surface.handle(),
            queue_families,
            sample_count,
            capabilities,
        })
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance this adapter belongs to.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Surface the adapter was selected for.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Resolved queue families.
    pub fn queue_families(&self) -> &QueueFamilies {
        &self.queue_families
    }

    /// Negotiated MSAA sample count.
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    /// Get adapter capabilities.
    pub fn capabilities(&self) -> &AdapterCapabilities {
        &self.capabilities
    }

    /// First candidate format supporting `features` with the given tiling.
    pub fn first_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|&format| {
            let properties = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            format_supports(&properties, tiling, features)
        })
    }

    /// Index of a memory type allowed by `type_bits` that has all `properties`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let memory = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        find_memory_type_index(&memory, type_bits, properties)
    }
}

/// Whether format properties offer `features` for the given tiling.
pub fn format_supports(
    properties: &vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
        _ => false,
    }
}

/// Test one adapter, against its own queue families and surface support.
///
/// # Safety
/// The instance, surface and physical device must be valid.
unsafe fn assess(
    instance: &ash::Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
    requirements: &AdapterRequirements,
) -> Suitability {
    let capabilities = AdapterCapabilities::query(instance, physical_device);

    let queues_resolved = describe_families(
        instance,
        surface.loader(),
        physical_device,
        surface.handle(),
    )
    .and_then(|families| QueueFamilies::resolve(&families, requirements.separate_transfer_queue))
    .is_ok();

    let extensions_supported = capabilities
        .missing_extensions(&requirements.extensions)
        .is_empty();

    let surface_adequate = extensions_supported
        && surface
            .support(physical_device)
            .is_ok_and(|support| !support.formats.is_empty() && !support.present_modes.is_empty());

    Suitability {
        queues_resolved,
        extensions_supported,
        surface_adequate,
        sampler_anisotropy: capabilities.supports_sampler_anisotropy,
        discrete: capabilities.is_discrete(),
    }
}
