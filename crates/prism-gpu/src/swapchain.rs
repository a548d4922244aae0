//! Swapchain lifecycle.
//!
//! The swapchain owns its render passes, attachments and per-image frames,
//! and rebuilds all of them whenever the surface is invalidated.

use crate::adapter::Adapter;
use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use crate::config::PresentSettings;
use crate::device::{LogicalDevice, Queues};
use crate::error::{GpuError, Result};
use crate::format::{negotiate_depth_format, SwapchainPlan};
use crate::frame::{Frame, FrameTargets};
use crate::memory::{AttachmentDesc, GpuAllocator, GpuImage};
use crate::render_pass::{PassKind, RenderPassLayout};
use crate::surface::{Surface, SurfaceSupport};
use crate::sync::{
    reset_fence, wait_for_fence, AcquireOutcome, FrameSemaphores, FrameSynchronizer,
    FrameTimeline, PresentOutcome,
};
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

/// Draws into the overlay pass after the main pass of every frame.
pub trait OverlayRecorder {
    /// Record commands into `cmd`, which is inside the overlay render pass.
    fn record(&mut self, cmd: vk::CommandBuffer, frame: &Frame);
}

/// Sharing mode and queue family list for swapchain images.
pub fn image_sharing(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, vec![])
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    }
}

/// The presentation swapchain and everything sized to it.
pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    adapter: Adapter,
    queues: Queues,
    allocator: Arc<Mutex<GpuAllocator>>,

    handle: vk::SwapchainKHR,
    format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    main_render_pass: vk::RenderPass,
    overlay_render_pass: vk::RenderPass,
    depth_image: Option<GpuImage>,
    msaa_image: Option<GpuImage>,
    frames: Vec<Frame>,
    sync: FrameSynchronizer,
    overlay: Option<Box<dyn OverlayRecorder>>,
}

impl Swapchain {
    /// Create the swapchain for a surface and build it for the first time.
    ///
    /// When the window has no area yet, the swapchain is returned empty and
    /// still needing a rebuild.
    pub fn create(
        device: &LogicalDevice,
        surface: &Surface,
        settings: &PresentSettings,
        window_size: vk::Extent2D,
    ) -> Result<Self> {
        let mut swapchain = Self {
            device: device.device_arc(),
            loader: device.swapchain_loader().clone(),
            surface_loader: surface.loader().clone(),
            surface: surface.handle(),
            adapter: device.adapter().clone(),
            queues: *device.queues(),
            allocator: device.allocator().clone(),
            handle: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            main_render_pass: vk::RenderPass::null(),
            overlay_render_pass: vk::RenderPass::null(),
            depth_image: None,
            msaa_image: None,
            frames: Vec::new(),
            sync: FrameSynchronizer::new(),
            overlay: None,
        };

        if let Err(e) = swapchain.check_rebuild(settings, window_size) {
            swapchain.destroy();
            return Err(e);
        }
        Ok(swapchain)
    }

    /// Destroy every resource and the swapchain itself.
    ///
    /// Must be called before the logical device is destroyed. Calling it twice is harmless.
    pub fn destroy(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.destroy_resources();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }

    /// Flag the swapchain for rebuild, e.g. after a window resize.
    pub fn request_rebuild(&mut self) {
        self.sync.request_rebuild();
    }

    /// Install the recorder that draws into the overlay pass.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRecorder>) {
        self.overlay = Some(overlay);
    }

    /// Remove the overlay recorder. The overlay pass is still recorded, empty.
    pub fn clear_overlay(&mut self) -> Option<Box<dyn OverlayRecorder>> {
        self.overlay.take()
    }

    /// Rebuild the swapchain if it was invalidated.
    ///
    /// Returns `Ok(true)` when a new swapchain was built. Returns `Ok(false)`
    /// when nothing needed rebuilding, or when the surface currently has no
    /// area, in which case the rebuild stays pending.
    pub fn check_rebuild(
        &mut self,
        settings: &PresentSettings,
        window_size: vk::Extent2D,
    ) -> Result<bool> {
        if !self.sync.needs_rebuild() {
            return Ok(false);
        }

        unsafe {
            self.device.device_wait_idle()?;
            self.destroy_resources();
        }

        let support = SurfaceSupport::query(
            &self.surface_loader,
            self.adapter.physical_device(),
            self.surface,
        )?;
        let Some(plan) = SwapchainPlan::negotiate(&support, settings, window_size)? else {
            tracing::debug!(
                "Surface has no area ({}x{}), postponing swapchain rebuild",
                window_size.width,
                window_size.height
            );
            return Ok(false);
        };

        let depth_format = negotiate_depth_format(settings, |format| {
            self.adapter
                .first_supported_format(
                    &[format],
                    vk::ImageTiling::OPTIMAL,
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                )
                .is_some()
        })?;

        let new_handle = unsafe { self.create_handle(&plan)? };
        let old_handle = std::mem::replace(&mut self.handle, new_handle);
        if old_handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_handle, None) };
        }

        self.format = plan.surface_format.format;
        self.present_mode = plan.present_mode;
        self.extent = plan.extent;

        let depth_format = (depth_format != vk::Format::UNDEFINED).then_some(depth_format);
        let semaphores = match unsafe { self.build_resources(depth_format) } {
            Ok(semaphores) => semaphores,
            Err(e) => {
                unsafe { self.destroy_resources() };
                return Err(e);
            }
        };
        self.sync.reset(semaphores);

        tracing::info!(
            "Swapchain built: {}x{} {:?} {:?}, {} images, {:?} depth, {:?}",
            self.extent.width,
            self.extent.height,
            self.format,
            self.present_mode,
            self.frames.len(),
            depth_format,
            self.sample_count()
        );

        Ok(true)
    }

    /// Acquire an image, record the main pass through `record_main` and the
    /// overlay pass, and submit both.
    ///
    /// Does nothing while a rebuild is pending. An out-of-date surface flags
    /// a rebuild instead of failing.
    pub fn render<F>(&mut self, record_main: F) -> Result<()>
    where
        F: FnOnce(&Frame) -> Result<()>,
    {
        if self.sync.needs_rebuild() {
            return Ok(());
        }

        let mut timeline = SwapchainTimeline {
            device: &self.device,
            loader: &self.loader,
            swapchain: self.handle,
            queues: self.queues,
            frames: &self.frames,
        };
        let device = &self.device;
        let frames = &self.frames;
        let overlay = &mut self.overlay;
        let overlay_pass = self.overlay_render_pass;
        let extent = self.extent;

        self.sync.render(&mut timeline, |index| {
            let frame = frame_at(frames, index)?;
            record_main(frame)?;
            unsafe { record_overlay(device, overlay_pass, extent, frame, overlay.as_mut()) }
        })?;

        Ok(())
    }

    /// Present the image rendered by the last [`render`](Self::render).
    ///
    /// Does nothing while a rebuild is pending.
    pub fn present(&mut self) -> Result<()> {
        if self.sync.needs_rebuild() {
            return Ok(());
        }

        let mut timeline = SwapchainTimeline {
            device: &self.device,
            loader: &self.loader,
            swapchain: self.handle,
            queues: self.queues,
            frames: &self.frames,
        };
        self.sync.present(&mut timeline)?;
        Ok(())
    }

    /// Raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Current image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Color format of the swapchain images.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Present mode in use.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Pass that clears and draws the application's content.
    pub fn main_render_pass(&self) -> vk::RenderPass {
        self.main_render_pass
    }

    /// Pass drawn on top of the main pass.
    pub fn overlay_render_pass(&self) -> vk::RenderPass {
        self.overlay_render_pass
    }

    /// Depth/stencil attachment, if depth or stencil was requested.
    pub fn depth_image(&self) -> Option<&GpuImage> {
        self.depth_image.as_ref()
    }

    /// Multisampled color attachment, if MSAA is on.
    pub fn msaa_image(&self) -> Option<&GpuImage> {
        self.msaa_image.as_ref()
    }

    /// One frame per swapchain image.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frame of the most recently acquired image.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.sync.current_frame())
    }

    /// Whether a rebuild is pending.
    pub fn needs_rebuild(&self) -> bool {
        self.sync.needs_rebuild()
    }

    /// Sample count of the color and depth attachments.
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.adapter.sample_count()
    }

    unsafe fn create_handle(&self, plan: &SwapchainPlan) -> Result<vk::SwapchainKHR> {
        let families = self.adapter.queue_families();
        let graphics = families
            .graphics
            .ok_or(GpuError::MissingQueueFamily("graphics"))?;
        let present = families
            .present
            .ok_or(GpuError::MissingQueueFamily("present"))?;
        let (sharing_mode, family_indices) = image_sharing(graphics, present);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(plan.composite_alpha)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(self.handle);

        let handle = self
            .loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        if handle == vk::SwapchainKHR::null() {
            return Err(GpuError::NullHandle("swapchain"));
        }
        Ok(handle)
    }

    /// Build passes, attachments and frames for the current handle.
    ///
    /// Everything created is stored on `self` as it is created so a failure
    /// can be cleaned up by [`destroy_resources`](Self::destroy_resources).
    unsafe fn build_resources(
        &mut self,
        depth_format: Option<vk::Format>,
    ) -> Result<Vec<FrameSemaphores>> {
        let samples = self.sample_count();
        let layout = RenderPassLayout {
            color_format: self.format,
            depth_format,
            samples,
        };
        self.main_render_pass = layout.create(&self.device, PassKind::Main)?;
        self.overlay_render_pass = layout.create(&self.device, PassKind::Overlay)?;

        if let Some(format) = depth_format {
            let desc = AttachmentDesc::depth(format, self.extent, samples);
            self.depth_image = Some(self.allocator.lock().create_attachment(
                &self.adapter,
                &desc,
                "swapchain depth",
            )?);
        }
        if layout.is_multisampled() {
            let desc = AttachmentDesc::msaa_color(self.format, self.extent, samples);
            self.msaa_image = Some(self.allocator.lock().create_attachment(
                &self.adapter,
                &desc,
                "swapchain msaa color",
            )?);
        }

        let graphics_family = self
            .adapter
            .queue_families()
            .graphics
            .ok_or(GpuError::MissingQueueFamily("graphics"))?;
        let targets = FrameTargets {
            format: self.format,
            extent: self.extent,
            render_pass: self.main_render_pass,
            graphics_family,
            depth_view: self.depth_image.as_ref().map(|image| image.view),
            msaa_view: self.msaa_image.as_ref().map(|image| image.view),
        };

        let images = self.loader.get_swapchain_images(self.handle)?;
        self.frames.reserve(images.len());
        for (index, &image) in images.iter().enumerate() {
            self.frames
                .push(Frame::new(&self.device, index as u32, image, &targets)?);
        }

        let mut semaphores = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            match FrameSemaphores::new(&self.device) {
                Ok(pair) => semaphores.push(pair),
                Err(e) => {
                    for pair in &semaphores {
                        pair.destroy(&self.device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(semaphores)
    }

    /// Destroy frames, semaphores, attachments and passes, leaving the handle.
    ///
    /// # Safety
    /// The device must be idle.
    unsafe fn destroy_resources(&mut self) {
        for frame in &mut self.frames {
            frame.destroy(&self.device);
        }
        self.frames.clear();

        for pair in self.sync.take_semaphores() {
            pair.destroy(&self.device);
        }

        {
            let mut allocator = self.allocator.lock();
            for mut image in [self.msaa_image.take(), self.depth_image.take()]
                .into_iter()
                .flatten()
            {
                if let Err(e) = allocator.free_image(&mut image) {
                    tracing::warn!("Failed to free swapchain attachment: {e}");
                }
            }
        }

        for pass in [&mut self.overlay_render_pass, &mut self.main_render_pass] {
            if *pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(*pass, None);
                *pass = vk::RenderPass::null();
            }
        }
    }
}

fn frame_at(frames: &[Frame], index: usize) -> Result<&Frame> {
    frames
        .get(index)
        .ok_or_else(|| GpuError::InvalidState(format!("No frame for swapchain image {index}")))
}

/// Record the overlay pass into the frame's overlay command buffer.
unsafe fn record_overlay(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    frame: &Frame,
    overlay: Option<&mut Box<dyn OverlayRecorder>>,
) -> Result<()> {
    let cmd = frame.overlay_command_buffer;
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

    // Enough for every attachment index, only the cleared ones are read
    let clear_values = [vk::ClearValue::default(); 3];
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(frame.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
        .clear_values(&clear_values);

    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
    if let Some(overlay) = overlay {
        overlay.record(cmd, frame);
    }
    device.cmd_end_render_pass(cmd);

    end_command_buffer(device, cmd)
}

/// The frame protocol's GPU side, over one swapchain generation.
struct SwapchainTimeline<'a> {
    device: &'a ash::Device,
    loader: &'a ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    queues: Queues,
    frames: &'a [Frame],
}

impl FrameTimeline for SwapchainTimeline<'_> {
    fn acquire(&mut self, image_acquired: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_acquired,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_fence(&mut self, frame: usize) -> Result<()> {
        let fence = frame_at(self.frames, frame)?.fence;
        unsafe { wait_for_fence(self.device, fence, u64::MAX) }
    }

    fn reset_fence(&mut self, frame: usize) -> Result<()> {
        let fence = frame_at(self.frames, frame)?.fence;
        unsafe { reset_fence(self.device, fence) }
    }

    fn reset_command_pool(&mut self, frame: usize) -> Result<()> {
        let pool = frame_at(self.frames, frame)?.command_pool;
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn submit(&mut self, frame: usize, semaphores: &FrameSemaphores) -> Result<()> {
        let frame = frame_at(self.frames, frame)?;
        unsafe {
            submit_command_buffers(
                self.device,
                self.queues.graphics,
                &[frame.command_buffer, frame.overlay_command_buffer],
                &[semaphores.image_acquired],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[semaphores.render_complete],
                frame.fence,
            )
        }
    }

    fn present(&mut self, image: u32, render_complete: vk::Semaphore) -> Result<PresentOutcome> {
        let wait_semaphores = [render_complete];
        let swapchains = [self.swapchain];
        let image_indices = [image];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(self.queues.present, &present_info) };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
