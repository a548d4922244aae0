//! Adapter capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// What an adapter reports about itself.
#[derive(Debug, Clone)]
pub struct AdapterCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Discrete, integrated, virtual, CPU or other
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Anisotropic sampling support
    pub supports_sampler_anisotropy: bool,
    /// Sample counts usable for color attachments
    pub color_sample_counts: vk::SampleCountFlags,
    /// Sample counts usable for depth attachments
    pub depth_sample_counts: vk::SampleCountFlags,
    /// Available device extensions
    pub available_extensions: HashSet<String>,
}

impl AdapterCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let available_extensions: HashSet<String> = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            device_local_memory_mb,
            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            color_sample_counts: properties.limits.framebuffer_color_sample_counts,
            depth_sample_counts: properties.limits.framebuffer_depth_sample_counts,
            available_extensions,
        }
    }

    /// Whether this is a discrete GPU.
    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    /// Extensions from `required` this adapter lacks.
    pub fn missing_extensions<'a>(&self, required: &[&'a CStr]) -> Vec<&'a CStr> {
        required
            .iter()
            .copied()
            .filter(|ext| {
                ext.to_str()
                    .map_or(true, |name| !self.available_extensions.contains(name))
            })
            .collect()
    }

    /// Largest sample count usable for both color and depth attachments.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_common_sample_count(self.color_sample_counts, self.depth_sample_counts)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

const SAMPLE_COUNTS_DESCENDING: [vk::SampleCountFlags; 7] = [
    vk::SampleCountFlags::TYPE_64,
    vk::SampleCountFlags::TYPE_32,
    vk::SampleCountFlags::TYPE_16,
    vk::SampleCountFlags::TYPE_8,
    vk::SampleCountFlags::TYPE_4,
    vk::SampleCountFlags::TYPE_2,
    vk::SampleCountFlags::TYPE_1,
];

/// Largest power of two present in both flag sets, down to 1.
pub fn max_common_sample_count(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let common = color & depth;
    SAMPLE_COUNTS_DESCENDING
        .into_iter()
        .find(|&count| common.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Clamp a requested sample count to the hardware maximum.
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    max_usable: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    if requested.as_raw() > max_usable.as_raw() {
        tracing::warn!(
            "Requested {:?} MSAA exceeds adapter limit, using {:?}",
            requested,
            max_usable
        );
        max_usable
    } else {
        requested
    }
}
