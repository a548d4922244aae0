//! GPU memory management for swapchain attachments.

use crate::adapter::Adapter;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Index of the first memory type allowed by `type_bits` that has all `required` flags.
pub fn find_memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory
        .memory_types
        .iter()
        .take(memory.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    /// Create a device-local 2D attachment image together with its view.
    pub fn create_attachment(
        &mut self,
        adapter: &Adapter,
        desc: &AttachmentDesc,
        name: &str,
    ) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let properties = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        if adapter
            .find_memory_type(requirements.memory_type_bits, properties)
            .is_none()
        {
            unsafe { self.device.destroy_image(image, None) };
            return Err(GpuError::NoMemoryType {
                type_bits: requirements.memory_type_bits,
                properties,
            });
        }

        let allocation = self
            .allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
            .and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| GpuError::AllocationFailed(e.to_string()))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut gpu_image = GpuImage {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
        };

        let bound = unsafe {
            let allocation = gpu_image.allocation.as_ref().map(|a| (a.memory(), a.offset()));
            match allocation {
                Some((memory, offset)) => self.device.bind_image_memory(image, memory, offset),
                None => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
            }
        };

        let view = bound.and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(desc.aspect)
                        .level_count(1)
                        .layer_count(1),
                );
            unsafe { self.device.create_image_view(&view_info, None) }
        });

        match view {
            Ok(view) => {
                gpu_image.view = view;
                Ok(gpu_image)
            }
            Err(e) => {
                self.free_image(&mut gpu_image)?;
                Err(e.into())
            }
        }
    }

    /// Free an image, its view, and its allocation.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        unsafe {
            if image.view != vk::ImageView::null() {
                self.device.destroy_image_view(image.view, None);
            }
        }
        image.view = vk::ImageView::null();

        if let Some(allocation) = image.allocation.take() {
            self.allocator
                .as_mut()
                .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_image(image.image, None);
        }
        image.image = vk::Image::null();

        Ok(())
    }
}

impl GpuAllocator {
    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parameters of a swapchain-sized attachment.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl AttachmentDesc {
    /// Depth/stencil attachment for the main pass.
    pub fn depth(
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            format,
            extent,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
        }
    }

    /// Transient multisampled color target resolved into the swapchain image.
    pub fn msaa_color(
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            format,
            extent,
            samples,
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Aspect mask a depth/stencil format's view needs.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// A GPU image with its view and allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}
