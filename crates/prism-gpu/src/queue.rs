//! Queue family topology.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::BTreeSet;

/// What a single queue family offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Capability flags reported by the driver.
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the target surface.
    pub supports_present: bool,
}

impl QueueFamilyInfo {
    /// Describe a family.
    pub fn new(flags: vk::QueueFlags, supports_present: bool) -> Self {
        Self {
            flags,
            supports_present,
        }
    }
}

/// Resolved queue family indices. Any role may be missing on a given adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

/// A role a queue (and its command pool) plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
}

impl QueueRole {
    /// Human-readable role name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }
}

impl QueueFamilies {
    /// Walk the families once and assign a family to every role.
    ///
    /// Graphics, present and compute take the first family offering them.
    /// With `separate_transfer`, transfer takes the first transfer-capable
    /// family distinct from the graphics and compute families; otherwise a
    /// family already used for graphics or compute is preferred.
    pub fn resolve(families: &[QueueFamilyInfo], separate_transfer: bool) -> Result<Self> {
        let mut resolved = Self::default();
        let mut first_transfer = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if resolved.graphics.is_none() && family.flags.contains(vk::QueueFlags::GRAPHICS) {
                resolved.graphics = Some(index);
            }
            if resolved.compute.is_none() && family.flags.contains(vk::QueueFlags::COMPUTE) {
                resolved.compute = Some(index);
            }
            if resolved.present.is_none() && family.supports_present {
                resolved.present = Some(index);
            }

            if !family.flags.contains(vk::QueueFlags::TRANSFER) {
                continue;
            }
            if first_transfer.is_none() {
                first_transfer = Some(index);
            }
            if separate_transfer
                && resolved.transfer.is_none()
                && resolved.graphics != Some(index)
                && resolved.compute != Some(index)
            {
                resolved.transfer = Some(index);
            }
        }

        if !separate_transfer {
            let shared = |index: u32| {
                families[index as usize]
                    .flags
                    .contains(vk::QueueFlags::TRANSFER)
            };
            resolved.transfer = resolved
                .graphics
                .filter(|&i| shared(i))
                .or_else(|| resolved.compute.filter(|&i| shared(i)))
                .or(first_transfer);
        }

        if resolved.graphics.is_none() {
            return Err(GpuError::MissingQueueFamily("graphics"));
        }
        if resolved.present.is_none() {
            return Err(GpuError::MissingQueueFamily("present"));
        }
        if separate_transfer && resolved.transfer.is_none() {
            return Err(GpuError::SeparateTransferUnavailable);
        }

        Ok(resolved)
    }

    /// Query the families of an adapter against a surface and resolve them.
    ///
    /// # Safety
    /// The instance, physical device and surface must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        separate_transfer: bool,
    ) -> Result<Self> {
        let infos = describe_families(instance, surface_loader, physical_device, surface)?;
        Self::resolve(&infos, separate_transfer)
    }

    /// Family serving the given role, if any.
    pub fn family(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Every distinct family in use, in ascending order.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Describe every queue family of an adapter, testing present support per family.
///
/// # Safety
/// The instance, physical device and surface must be valid.
pub unsafe fn describe_families(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Vec<QueueFamilyInfo>> {
    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .enumerate()
        .map(|(index, properties)| -> Result<QueueFamilyInfo> {
            let supports_present = surface_loader.get_physical_device_surface_support(
                physical_device,
                index as u32,
                surface,
            )?;
            Ok(QueueFamilyInfo::new(properties.queue_flags, supports_present))
        })
        .collect()
}
