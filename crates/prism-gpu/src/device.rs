//! Logical device, queues and per-role command pools.

use crate::adapter::Adapter;
use crate::command::{create_command_pool, execute_single_time_commands};
use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::queue::{QueueFamilies, QueueRole};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// A per-role resource that is either owned or borrowed from another role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSlot<T> {
    Owned(T),
    AliasOf(QueueRole),
}

/// Decide how the pool of `role` is provided.
///
/// Compute and transfer alias the graphics pool when they share its family.
/// Returns `None` when the role has no queue family.
pub fn plan_pool(families: &QueueFamilies, role: QueueRole) -> Option<PoolSlot<u32>> {
    let family = families.family(role)?;
    if role != QueueRole::Graphics && families.graphics == Some(family) {
        Some(PoolSlot::AliasOf(QueueRole::Graphics))
    } else {
        Some(PoolSlot::Owned(family))
    }
}

/// Queues associated with the device. Handles are looked up, never owned.
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub compute: Option<vk::Queue>,
    pub transfer: Option<vk::Queue>,
}

impl Queues {
    /// Queue for a submission role.
    pub fn get(&self, role: QueueRole) -> Option<vk::Queue> {
        match role {
            QueueRole::Graphics => Some(self.graphics),
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }
}

/// Transient command pools, one per queue role.
#[derive(Debug)]
pub struct CommandPools {
    graphics: vk::CommandPool,
    compute: Option<PoolSlot<vk::CommandPool>>,
    transfer: Option<PoolSlot<vk::CommandPool>>,
}

impl CommandPools {
    /// Create the graphics pool and whatever compute/transfer pools are not aliases.
    ///
    /// # Safety
    /// The device must be valid and created with queues for every family used.
    unsafe fn new(device: &ash::Device, families: &QueueFamilies) -> Result<Self> {
        let graphics_family = families
            .graphics
            .ok_or(GpuError::MissingQueueFamily("graphics"))?;
        let flags = vk::CommandPoolCreateFlags::TRANSIENT;

        let graphics = create_command_pool(device, graphics_family, flags)?;
        let mut pools = Self {
            graphics,
            compute: None,
            transfer: None,
        };

        for role in [QueueRole::Compute, QueueRole::Transfer] {
            let slot = match plan_pool(families, role) {
                Some(PoolSlot::Owned(family)) => {
                    match create_command_pool(device, family, flags) {
                        Ok(pool) => Some(PoolSlot::Owned(pool)),
                        Err(e) => {
                            pools.destroy(device);
                            return Err(e);
                        }
                    }
                }
                Some(PoolSlot::AliasOf(other)) => Some(PoolSlot::AliasOf(other)),
                None => None,
            };
            match role {
                QueueRole::Compute => pools.compute = slot,
                _ => pools.transfer = slot,
            }
        }

        Ok(pools)
    }

    /// Pool serving `role`, with aliases resolved.
    pub fn get(&self, role: QueueRole) -> Option<vk::CommandPool> {
        let slot = match role {
            QueueRole::Graphics => return Some(self.graphics),
            QueueRole::Compute => self.compute?,
            QueueRole::Transfer => self.transfer?,
        };
        match slot {
            PoolSlot::Owned(pool) => Some(pool),
            PoolSlot::AliasOf(QueueRole::Graphics) => Some(self.graphics),
            PoolSlot::AliasOf(other) => self.get(other),
        }
    }

    /// Slot of a non-graphics role.
    pub fn slot(&self, role: QueueRole) -> Option<PoolSlot<vk::CommandPool>> {
        match role {
            QueueRole::Graphics => Some(PoolSlot::Owned(self.graphics)),
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Destroy every owned pool exactly once.
    ///
    /// # Safety
    /// No command buffer from these pools may be pending.
    unsafe fn destroy(&mut self, device: &ash::Device) {
        for slot in [self.transfer.take(), self.compute.take()].into_iter().flatten() {
            if let PoolSlot::Owned(pool) = slot {
                device.destroy_command_pool(pool, None);
            }
        }
        if self.graphics != vk::CommandPool::null() {
            device.destroy_command_pool(self.graphics, None);
            self.graphics = vk::CommandPool::null();
        }
    }
}

/// The logical device and everything created directly from it.
pub struct LogicalDevice {
    device: Arc<ash::Device>,
    adapter: Adapter,
    queues: Queues,
    command_pools: CommandPools,
    allocator: Arc<Mutex<GpuAllocator>>,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl LogicalDevice {
    /// Create the device with one queue per unique family.
    ///
    /// # Safety
    /// The adapter must be valid.
    pub unsafe fn new(adapter: &Adapter, extensions: &[&CStr]) -> Result<Self> {
        let families = *adapter.queue_families();
        let graphics_family = families
            .graphics
            .ok_or(GpuError::MissingQueueFamily("graphics"))?;
        let present_family = families
            .present
            .ok_or(GpuError::MissingQueueFamily("present"))?;

        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        let extension_names: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = adapter
            .instance()
            .create_device(adapter.physical_device(), &create_info, None)?;

        let queues = Queues {
            graphics: device.get_device_queue(graphics_family, 0),
            present: device.get_device_queue(present_family, 0),
            compute: families.compute.map(|f| device.get_device_queue(f, 0)),
            transfer: families.transfer.map(|f| device.get_device_queue(f, 0)),
        };

        let command_pools = match CommandPools::new(&device, &families) {
            Ok(pools) => pools,
            Err(e) => {
                device.destroy_device(None);
                return Err(e);
            }
        };

        let device = Arc::new(device);
        let allocator = match GpuAllocator::new(
            adapter.instance(),
            device.clone(),
            adapter.physical_device(),
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                let mut pools = command_pools;
                pools.destroy(&device);
                device.destroy_device(None);
                return Err(e);
            }
        };
        let swapchain_loader = ash::khr::swapchain::Device::new(adapter.instance(), &device);

        tracing::debug!(
            "Logical device created with queue families {:?}",
            families.unique()
        );

        Ok(Self {
            device,
            adapter: adapter.clone(),
            queues,
            command_pools,
            allocator: Arc::new(Mutex::new(allocator)),
            swapchain_loader,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device entry points.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        self.device.clone()
    }

    /// The adapter this device was created on.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Device queues.
    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Command pools per role.
    pub fn command_pools(&self) -> &CommandPools {
        &self.command_pools
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Arc<Mutex<GpuAllocator>> {
        &self.allocator
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Record and run a one-shot command buffer on the queue of `role`, blocking
    /// until that queue is idle.
    pub fn with_command_buffer<F>(
        &self,
        record: F,
        role: QueueRole,
        level: vk::CommandBufferLevel,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let queue = self
            .queues
            .get(role)
            .ok_or(GpuError::MissingQueueFamily(role.name()))?;
        let pool = self
            .command_pools
            .get(role)
            .ok_or(GpuError::MissingQueueFamily(role.name()))?;

        unsafe { execute_single_time_commands(&self.device, pool, queue, level, record) }
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    /// Destroy pools, allocator memory, and the device.
    ///
    /// # Safety
    /// Every swapchain and resource created from this device must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        let _ = self.device.device_wait_idle();

        // Free all VkDeviceMemory before the device goes away
        self.allocator.lock().shutdown();

        self.command_pools.destroy(&self.device);
        self.device.destroy_device(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_families_alias_the_graphics_pool() {
        let families = QueueFamilies {
            graphics: Some(0),
            present: Some(0),
            compute: Some(0),
            transfer: Some(0),
        };
        assert_eq!(
            plan_pool(&families, QueueRole::Graphics),
            Some(PoolSlot::Owned(0))
        );
        assert_eq!(
            plan_pool(&families, QueueRole::Compute),
            Some(PoolSlot::AliasOf(QueueRole::Graphics))
        );
        assert_eq!(
            plan_pool(&families, QueueRole::Transfer),
            Some(PoolSlot::AliasOf(QueueRole::Graphics))
        );
    }

    #[test]
    fn distinct_families_own_their_pools() {
        let families = QueueFamilies {
            graphics: Some(0),
            present: Some(0),
            compute: Some(2),
            transfer: Some(1),
        };
        assert_eq!(
            plan_pool(&families, QueueRole::Compute),
            Some(PoolSlot::Owned(2))
        );
        assert_eq!(
            plan_pool(&families, QueueRole::Transfer),
            Some(PoolSlot::Owned(1))
        );
    }

    #[test]
    fn missing_roles_have_no_pool() {
        let families = QueueFamilies {
            graphics: Some(0),
            present: Some(1),
            compute: None,
            transfer: None,
        };
        assert_eq!(plan_pool(&families, QueueRole::Compute), None);
        assert_eq!(plan_pool(&families, QueueRole::Transfer), None);
    }

    #[test]
    fn aliases_resolve_to_the_graphics_pool() {
        use ash::vk::Handle;

        let graphics = vk::CommandPool::from_raw(10);
        let transfer = vk::CommandPool::from_raw(20);
        let pools = CommandPools {
            graphics,
            compute: Some(PoolSlot::AliasOf(QueueRole::Graphics)),
            transfer: Some(PoolSlot::Owned(transfer)),
        };
        assert_eq!(pools.get(QueueRole::Graphics), Some(graphics));
        assert_eq!(pools.get(QueueRole::Compute), Some(graphics));
        assert_eq!(pools.get(QueueRole::Transfer), Some(transfer));
        assert_eq!(
            pools.slot(QueueRole::Compute),
            Some(PoolSlot::AliasOf(QueueRole::Graphics))
        );
    }
}
