//! Main and overlay render passes.
//!
//! Both passes share one attachment layout so they can render into the same
//! framebuffer: color (multisampled when MSAA is on), then the optional
//! depth/stencil attachment, then the single-sampled resolve target.

use crate::error::{GpuError, Result};
use crate::format::stencil_bits;
use ash::vk;

/// Which of the two swapchain passes to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Clears and draws the application's content.
    Main,
    /// Draws on top of the main pass output.
    Overlay,
}

/// Formats and sample count shared by the swapchain passes.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassLayout {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

impl RenderPassLayout {
    /// Whether color is rendered multisampled and resolved into the swapchain image.
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Layout the color attachment is left in by the main pass.
    pub fn color_final_layout(&self) -> vk::ImageLayout {
        if self.is_multisampled() {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            // Presented directly
            vk::ImageLayout::PRESENT_SRC_KHR
        }
    }

    /// Attachment index of the depth/stencil attachment, if any.
    pub fn depth_index(&self) -> Option<u32> {
        self.depth_format.map(|_| 1)
    }

    /// Attachment index of the resolve target, if any.
    pub fn resolve_index(&self) -> Option<u32> {
        self.is_multisampled()
            .then(|| 1 + u32::from(self.depth_format.is_some()))
    }

    /// Attachment descriptions in framebuffer order.
    pub fn attachments(&self, kind: PassKind) -> Vec<vk::AttachmentDescription> {
        let (color_load, color_initial) = match kind {
            PassKind::Main => (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED),
            PassKind::Overlay => (vk::AttachmentLoadOp::LOAD, self.color_final_layout()),
        };

        let mut attachments = vec![vk::AttachmentDescription::default()
            .format(self.color_format)
            .samples(self.samples)
            .load_op(color_load)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(color_initial)
            .final_layout(self.color_final_layout())];

        if let Some(depth_format) = self.depth_format {
            let stencil_load = if stencil_bits(depth_format) > 0 {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::DONT_CARE
            };
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth_format)
                    .samples(self.samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(stencil_load)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        if self.is_multisampled() {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            );
        }

        attachments
    }

    /// External dependency ordering the pass after previous attachment use.
    pub fn dependency(&self) -> vk::SubpassDependency {
        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let mut src_access = vk::AccessFlags::NONE;

        if self.depth_format.is_some() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
            dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
    }

    /// Create one of the passes.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create(&self, device: &ash::Device, kind: PassKind) -> Result<vk::RenderPass> {
        let attachments = self.attachments(kind);

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = self.depth_index().map(|index| {
            vk::AttachmentReference::default()
                .attachment(index)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });
        let resolve_refs: Vec<vk::AttachmentReference> = self
            .resolve_index()
            .map(|index| {
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .into_iter()
            .collect();

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let subpasses = [subpass];
        let dependencies = [self.dependency()];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = device.create_render_pass(&create_info, None)?;
        if render_pass == vk::RenderPass::null() {
            return Err(GpuError::NullHandle(match kind {
                PassKind::Main => "main render pass",
                PassKind::Overlay => "overlay render pass",
            }));
        }
        Ok(render_pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(depth: Option<vk::Format>, samples: vk::SampleCountFlags) -> RenderPassLayout {
        RenderPassLayout {
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: depth,
            samples,
        }
    }

    #[test]
    fn single_sampled_color_is_presented_directly() {
        let layout = layout(None, vk::SampleCountFlags::TYPE_1);
        let attachments = layout.attachments(PassKind::Main);

        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(layout.depth_index(), None);
        assert_eq!(layout.resolve_index(), None);
    }

    #[test]
    fn multisampled_pass_resolves_after_depth() {
        let layout = layout(Some(vk::Format::D32_SFLOAT), vk::SampleCountFlags::TYPE_4);
        let attachments = layout.attachments(PassKind::Main);

        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(layout.depth_index(), Some(1));
        assert_eq!(layout.resolve_index(), Some(2));
    }

    #[test]
    fn resolve_follows_color_without_depth() {
        let layout = layout(None, vk::SampleCountFlags::TYPE_2);
        assert_eq!(layout.resolve_index(), Some(1));
        assert_eq!(layout.attachments(PassKind::Main).len(), 2);
    }

    #[test]
    fn overlay_loads_what_the_main_pass_left() {
        for samples in [vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_8] {
            let layout = layout(Some(vk::Format::D24_UNORM_S8_UINT), samples);
            let main = layout.attachments(PassKind::Main);
            let overlay = layout.attachments(PassKind::Overlay);

            assert_eq!(main.len(), overlay.len());
            assert_eq!(overlay[0].load_op, vk::AttachmentLoadOp::LOAD);
            assert_eq!(overlay[0].initial_layout, main[0].final_layout);
            assert_eq!(overlay[0].final_layout, main[0].final_layout);
        }
    }

    #[test]
    fn dependency_covers_depth_tests_only_with_depth() {
        let color_only = layout(None, vk::SampleCountFlags::TYPE_1).dependency();
        assert_eq!(
            color_only.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            color_only.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );

        let with_depth =
            layout(Some(vk::Format::D32_SFLOAT), vk::SampleCountFlags::TYPE_1).dependency();
        assert!(with_depth
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(with_depth
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(with_depth.src_subpass, vk::SUBPASS_EXTERNAL);
    }

    #[test]
    fn stencil_is_cleared_only_when_the_format_has_it() {
        let with_stencil = layout(
            Some(vk::Format::D24_UNORM_S8_UINT),
            vk::SampleCountFlags::TYPE_1,
        );
        for kind in [PassKind::Main, PassKind::Overlay] {
            let depth = with_stencil.attachments(kind)[1];
            assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        }

        let depth_only = layout(Some(vk::Format::D32_SFLOAT), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            depth_only.attachments(PassKind::Main)[1].stencil_load_op,
            vk::AttachmentLoadOp::DONT_CARE
        );
    }
}
