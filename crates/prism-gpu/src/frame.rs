//! Per-image frame resources.

use crate::command::{allocate_command_buffer, create_command_pool};
use crate::error::Result;
use crate::sync::create_fence;
use ash::vk;

/// Framebuffer attachments in render pass order.
///
/// With MSAA the multisampled color target comes first and the swapchain
/// image is the resolve target at the end.
pub fn framebuffer_attachments(
    swapchain_view: vk::ImageView,
    depth_view: Option<vk::ImageView>,
    msaa_view: Option<vk::ImageView>,
) -> Vec<vk::ImageView> {
    match msaa_view {
        Some(msaa_view) => std::iter::once(msaa_view)
            .chain(depth_view)
            .chain(std::iter::once(swapchain_view))
            .collect(),
        None => std::iter::once(swapchain_view).chain(depth_view).collect(),
    }
}

/// Resources for rendering into one swapchain image.
///
/// The fence gates every reuse of the command pool: it is created signaled
/// and signaled again by each submission.
#[derive(Debug)]
pub struct Frame {
    /// Index of the swapchain image.
    pub index: u32,
    pub command_pool: vk::CommandPool,
    /// Primary buffer for the main pass.
    pub command_buffer: vk::CommandBuffer,
    /// Primary buffer for the overlay pass.
    pub overlay_command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    /// Swapchain image, owned by the swapchain.
    pub image: vk::Image,
    pub color_view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// What every frame of one swapchain generation shares.
#[derive(Debug, Clone, Copy)]
pub struct FrameTargets {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub graphics_family: u32,
    pub depth_view: Option<vk::ImageView>,
    pub msaa_view: Option<vk::ImageView>,
}

impl Frame {
    /// Create the frame for swapchain image `index`.
    ///
    /// # Safety
    /// The device, image and every handle in `targets` must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        index: u32,
        image: vk::Image,
        targets: &FrameTargets,
    ) -> Result<Self> {
        let mut frame = Self {
            index,
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            overlay_command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            image,
            color_view: vk::ImageView::null(),
            framebuffer: vk::Framebuffer::null(),
        };

        if let Err(e) = frame.init(device, targets) {
            frame.destroy(device);
            return Err(e);
        }
        Ok(frame)
    }

    unsafe fn init(&mut self, device: &ash::Device, targets: &FrameTargets) -> Result<()> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(targets.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        self.color_view = device.create_image_view(&view_info, None)?;

        self.command_pool = create_command_pool(
            device,
            targets.graphics_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        self.command_buffer =
            allocate_command_buffer(device, self.command_pool, vk::CommandBufferLevel::PRIMARY)?;
        self.overlay_command_buffer =
            allocate_command_buffer(device, self.command_pool, vk::CommandBufferLevel::PRIMARY)?;

        self.fence = create_fence(device, true)?;

        let attachments =
            framebuffer_attachments(self.color_view, targets.depth_view, targets.msaa_view);
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(targets.render_pass)
            .attachments(&attachments)
            .width(targets.extent.width)
            .height(targets.extent.height)
            .layers(1);
        self.framebuffer = device.create_framebuffer(&framebuffer_info, None)?;

        Ok(())
    }

    /// Destroy everything the frame created. The swapchain image is left alone.
    ///
    /// # Safety
    /// The frame's fence must be signaled or never submitted.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.framebuffer != vk::Framebuffer::null() {
            device.destroy_framebuffer(self.framebuffer, None);
            self.framebuffer = vk::Framebuffer::null();
        }
        if self.fence != vk::Fence::null() {
            device.destroy_fence(self.fence, None);
            self.fence = vk::Fence::null();
        }
        // Destroying the pool frees its command buffers
        if self.command_pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.command_pool, None);
            self.command_pool = vk::CommandPool::null();
        }
        self.command_buffer = vk::CommandBuffer::null();
        self.overlay_command_buffer = vk::CommandBuffer::null();
        if self.color_view != vk::ImageView::null() {
            device.destroy_image_view(self.color_view, None);
            self.color_view = vk::ImageView::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn single_sampled_order_is_color_then_depth() {
        assert_eq!(
            framebuffer_attachments(view(1), Some(view(2)), None),
            vec![view(1), view(2)]
        );
        assert_eq!(framebuffer_attachments(view(1), None, None), vec![view(1)]);
    }

    #[test]
    fn multisampled_order_puts_swapchain_image_last() {
        assert_eq!(
            framebuffer_attachments(view(1), Some(view(2)), Some(view(3))),
            vec![view(3), view(2), view(1)]
        );
        assert_eq!(
            framebuffer_attachments(view(1), None, Some(view(3))),
            vec![view(3), view(1)]
        );
    }
}
