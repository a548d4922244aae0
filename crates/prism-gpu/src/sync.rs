//! Synchronization primitives and the per-frame acquire/submit/present protocol.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Semaphores ordering one acquire → submit → present chain on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSemaphores {
    /// Signaled when the presentation engine hands the image over
    pub image_acquired: vk::Semaphore,
    /// Signaled when rendering into the image is complete
    pub render_complete: vk::Semaphore,
}

impl FrameSemaphores {
    /// Create both semaphores.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let image_acquired = create_semaphore(device)?;
        match create_semaphore(device) {
            Ok(render_complete) => Ok(Self {
                image_acquired,
                render_complete,
            }),
            Err(e) => {
                device.destroy_semaphore(image_acquired, None);
                Err(e)
            }
        }
    }

    /// Destroy both semaphores.
    ///
    /// # Safety
    /// The semaphores must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.render_complete, None);
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// The surface changed; the swapchain must be rebuilt.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The surface changed; the swapchain must be rebuilt.
    OutOfDate,
}

/// The GPU operations the frame protocol is made of.
///
/// `frame` always names the frame slot matching the acquired image.
pub trait FrameTimeline {
    /// Acquire the next image, signaling `image_acquired`.
    fn acquire(&mut self, image_acquired: vk::Semaphore) -> Result<AcquireOutcome>;
    /// Block until the frame's previous submission has finished.
    fn wait_fence(&mut self, frame: usize) -> Result<()>;
    /// Unsignal the frame's fence.
    fn reset_fence(&mut self, frame: usize) -> Result<()>;
    /// Recycle every command buffer of the frame.
    fn reset_command_pool(&mut self, frame: usize) -> Result<()>;
    /// Submit the frame's command buffers, signaling its fence on completion.
    fn submit(&mut self, frame: usize, semaphores: &FrameSemaphores) -> Result<()>;
    /// Queue `image` for presentation once `render_complete` is signaled.
    fn present(&mut self, image: u32, render_complete: vk::Semaphore) -> Result<PresentOutcome>;
}

/// Fences and semaphores bookkeeping for frames in flight.
///
/// Semaphore pairs cycle round-robin, independently of which image the
/// presentation engine hands out. A frame's pool is only reset after its
/// fence has been waited on.
#[derive(Debug)]
pub struct FrameSynchronizer {
    semaphores: Vec<FrameSemaphores>,
    semaphore_index: usize,
    current_frame: usize,
    acquired: Option<u32>,
    needs_rebuild: bool,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self {
            semaphores: Vec::new(),
            semaphore_index: 0,
            current_frame: 0,
            acquired: None,
            needs_rebuild: true,
        }
    }
}

impl FrameSynchronizer {
    /// A synchronizer with no semaphores yet, waiting for its first build.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install fresh semaphores after a rebuild and mark the chain valid.
    ///
    /// Returns the previous pairs so the caller can destroy them.
    pub fn reset(&mut self, semaphores: Vec<FrameSemaphores>) -> Vec<FrameSemaphores> {
        let old = std::mem::replace(&mut self.semaphores, semaphores);
        self.semaphore_index = 0;
        self.current_frame = 0;
        self.acquired = None;
        self.needs_rebuild = false;
        old
    }

    /// Remove every semaphore pair, leaving the chain invalid.
    pub fn take_semaphores(&mut self) -> Vec<FrameSemaphores> {
        self.needs_rebuild = true;
        self.acquired = None;
        std::mem::take(&mut self.semaphores)
    }

    /// Flag the chain for rebuild.
    pub fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// Whether the chain must be rebuilt before the next frame.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Frame slot of the most recently acquired image.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Index of the semaphore pair the next frame will use.
    pub fn semaphore_index(&self) -> usize {
        self.semaphore_index
    }

    /// All semaphore pairs.
    pub fn semaphores(&self) -> &[FrameSemaphores] {
        &self.semaphores
    }

    fn current_semaphores(&self) -> Result<FrameSemaphores> {
        self.semaphores
            .get(self.semaphore_index)
            .copied()
            .ok_or_else(|| GpuError::InvalidState("No frame semaphores allocated".to_string()))
    }

    /// Acquire an image, make its frame reusable, record and submit it.
    ///
    /// Returns `Ok(false)` without touching the GPU while a rebuild is
    /// pending, and `Ok(false)` after flagging a rebuild when the acquire
    /// reports an out-of-date surface.
    pub fn render<T, F>(&mut self, timeline: &mut T, record: F) -> Result<bool>
    where
        T: FrameTimeline,
        F: FnOnce(usize) -> Result<()>,
    {
        if self.needs_rebuild {
            return Ok(false);
        }

        let semaphores = self.current_semaphores()?;
        let image = match timeline.acquire(semaphores.image_acquired)? {
            AcquireOutcome::Acquired(image) => image,
            AcquireOutcome::OutOfDate => {
                tracing::trace!("Acquire reported an out-of-date swapchain");
                self.needs_rebuild = true;
                return Ok(false);
            }
        };

        let frame = image as usize;
        self.current_frame = frame;

        if let Err(e) = Self::record_and_submit(timeline, frame, &semaphores, record) {
            // The acquired image is never presented, so the chain is unusable
            self.needs_rebuild = true;
            return Err(e);
        }

        self.acquired = Some(image);
        Ok(true)
    }

    fn record_and_submit<T, F>(
        timeline: &mut T,
        frame: usize,
        semaphores: &FrameSemaphores,
        record: F,
    ) -> Result<()>
    where
        T: FrameTimeline,
        F: FnOnce(usize) -> Result<()>,
    {
        timeline.wait_fence(frame)?;
        timeline.reset_command_pool(frame)?;
        record(frame)?;
        // Unsignal only once a submission that signals it again is certain
        timeline.reset_fence(frame)?;
        timeline.submit(frame, semaphores)
    }

    /// Present the image submitted by the last [`render`](Self::render).
    ///
    /// Returns `Ok(false)` while a rebuild is pending or when presentation
    /// reports an out-of-date surface.
    pub fn present<T: FrameTimeline>(&mut self, timeline: &mut T) -> Result<bool> {
        if self.needs_rebuild {
            return Ok(false);
        }

        let image = self.acquired.take().ok_or_else(|| {
            GpuError::InvalidState("Present called without a rendered frame".to_string())
        })?;
        let semaphores = self.current_semaphores()?;

        match timeline.present(image, semaphores.render_complete)? {
            PresentOutcome::Presented => {
                self.semaphore_index = (self.semaphore_index + 1) % self.semaphores.len();
                Ok(true)
            }
            PresentOutcome::OutOfDate => {
                tracing::trace!("Present reported an out-of-date swapchain");
                self.needs_rebuild = true;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Acquire(vk::Semaphore),
        Wait(usize),
        ResetFence(usize),
        ResetPool(usize),
        Record(usize),
        Submit(usize, FrameSemaphores),
        Present(u32, vk::Semaphore),
    }

    /// Records every call and hands out images round-robin.
    struct RecordingTimeline {
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        fail_wait: bool,
        fail_submit: bool,
        log: Rc<RefCell<Vec<Event>>>,
    }

    impl RecordingTimeline {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_wait: false,
                fail_submit: false,
                log: Rc::default(),
            }
        }

        fn push(&self, event: Event) {
            self.log.borrow_mut().push(event);
        }

        fn events(&self) -> Vec<Event> {
            self.log.borrow().clone()
        }
    }

    impl FrameTimeline for RecordingTimeline {
        fn acquire(&mut self, image_acquired: vk::Semaphore) -> Result<AcquireOutcome> {
            self.push(Event::Acquire(image_acquired));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired(image))
        }

        fn wait_fence(&mut self, frame: usize) -> Result<()> {
            self.push(Event::Wait(frame));
            if self.fail_wait {
                return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(())
        }

        fn reset_fence(&mut self, frame: usize) -> Result<()> {
            self.push(Event::ResetFence(frame));
            Ok(())
        }

        fn reset_command_pool(&mut self, frame: usize) -> Result<()> {
            self.push(Event::ResetPool(frame));
            Ok(())
        }

        fn submit(&mut self, frame: usize, semaphores: &FrameSemaphores) -> Result<()> {
            self.push(Event::Submit(frame, *semaphores));
            if self.fail_submit {
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            Ok(())
        }

        fn present(
            &mut self,
            image: u32,
            render_complete: vk::Semaphore,
        ) -> Result<PresentOutcome> {
            self.push(Event::Present(image, render_complete));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }
    }

    fn semaphore_pairs(count: u64) -> Vec<FrameSemaphores> {
        (0..count)
            .map(|i| FrameSemaphores {
                image_acquired: vk::Semaphore::from_raw(100 + i),
                render_complete: vk::Semaphore::from_raw(200 + i),
            })
            .collect()
    }

    fn ready_synchronizer(count: u64) -> FrameSynchronizer {
        let mut sync = FrameSynchronizer::new();
        sync.reset(semaphore_pairs(count));
        sync
    }

    fn run_frame(sync: &mut FrameSynchronizer, timeline: &mut RecordingTimeline) -> bool {
        let log = timeline.log.clone();
        let rendered = sync
            .render(timeline, move |frame| {
                log.borrow_mut().push(Event::Record(frame));
                Ok(())
            })
            .unwrap();
        rendered && sync.present(timeline).unwrap()
    }

    #[test]
    fn new_synchronizer_waits_for_a_build() {
        let mut sync = FrameSynchronizer::new();
        let mut timeline = RecordingTimeline::new(3);
        assert!(sync.needs_rebuild());
        assert!(!sync.render(&mut timeline, |_| Ok(())).unwrap());
        assert!(!sync.present(&mut timeline).unwrap());
        assert!(timeline.events().is_empty());
    }

    #[test]
    fn pool_is_reset_only_after_its_fence_is_waited() {
        let mut sync = ready_synchronizer(3);
        let mut timeline = RecordingTimeline::new(3);

        for _ in 0..10 {
            assert!(run_frame(&mut sync, &mut timeline));
        }

        let events = timeline.events();
        for (position, event) in events.iter().enumerate() {
            if let Event::ResetPool(frame) = *event {
                let last_wait = events[..position]
                    .iter()
                    .rposition(|e| *e == Event::Wait(frame))
                    .expect("pool reset without a preceding fence wait");
                let resubmitted = events[last_wait..position]
                    .iter()
                    .any(|e| matches!(e, Event::Submit(f, _) if *f == frame));
                assert!(!resubmitted, "frame {frame} submitted between wait and reset");
            }
        }
    }

    #[test]
    fn frame_steps_run_in_order() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        assert!(run_frame(&mut sync, &mut timeline));

        let pairs = semaphore_pairs(2);
        assert_eq!(
            timeline.events(),
            vec![
                Event::Acquire(pairs[0].image_acquired),
                Event::Wait(0),
                Event::ResetPool(0),
                Event::Record(0),
                Event::ResetFence(0),
                Event::Submit(0, pairs[0]),
                Event::Present(0, pairs[0].render_complete),
            ]
        );
    }

    #[test]
    fn semaphore_pairs_cycle_independently_of_images() {
        let mut sync = ready_synchronizer(3);
        let mut timeline = RecordingTimeline::new(3);
        // The presentation engine may hand out images in any order
        timeline.acquire_script = VecDeque::from(vec![
            AcquireOutcome::Acquired(2),
            AcquireOutcome::Acquired(0),
            AcquireOutcome::Acquired(2),
            AcquireOutcome::Acquired(1),
        ]);

        let mut used = Vec::new();
        for _ in 0..4 {
            used.push(sync.semaphore_index());
            assert!(run_frame(&mut sync, &mut timeline));
        }
        assert_eq!(used, vec![0, 1, 2, 0]);
        assert_eq!(sync.current_frame(), 1);
    }

    #[test]
    fn out_of_date_acquire_flags_rebuild_and_skips_the_frame() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        timeline.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let mut recorded = false;
        let rendered = sync
            .render(&mut timeline, |_| {
                recorded = true;
                Ok(())
            })
            .unwrap();

        assert!(!rendered);
        assert!(!recorded);
        assert!(sync.needs_rebuild());
        assert!(!sync.present(&mut timeline).unwrap());
        assert_eq!(timeline.events().len(), 1);
        assert_eq!(sync.semaphore_index(), 0);
    }

    #[test]
    fn out_of_date_present_flags_rebuild_and_keeps_semaphore_index() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        timeline.present_script.push_back(PresentOutcome::OutOfDate);

        assert!(!run_frame(&mut sync, &mut timeline));
        assert!(sync.needs_rebuild());
        assert_eq!(sync.semaphore_index(), 0);
    }

    #[test]
    fn reset_clears_rebuild_and_returns_old_pairs() {
        let mut sync = ready_synchronizer(2);
        sync.request_rebuild();
        assert!(sync.needs_rebuild());

        let old = sync.reset(semaphore_pairs(3));
        assert_eq!(old.len(), 2);
        assert!(!sync.needs_rebuild());
        assert_eq!(sync.semaphores().len(), 3);
        assert_eq!(sync.semaphore_index(), 0);
    }

    #[test]
    fn present_without_render_is_an_error() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        assert!(matches!(
            sync.present(&mut timeline),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn failed_recording_leaves_the_fence_signaled() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);

        let result = sync.render(&mut timeline, |_| {
            Err(GpuError::InvalidState("record failed".to_string()))
        });
        assert!(result.is_err());
        assert!(sync.needs_rebuild());
        assert!(!timeline
            .events()
            .iter()
            .any(|e| matches!(e, Event::ResetFence(_) | Event::Submit(..))));
    }

    #[test]
    fn failed_submit_flags_rebuild_before_the_fence_is_waited_again() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        timeline.fail_submit = true;

        assert!(sync.render(&mut timeline, |_| Ok(())).is_err());
        assert!(sync.needs_rebuild());
        assert_eq!(sync.semaphore_index(), 0);
        assert!(!sync.present(&mut timeline).unwrap());

        // The unsignaled fence is never waited on before a rebuild
        let before = timeline.events().len();
        assert!(!sync.render(&mut timeline, |_| Ok(())).unwrap());
        assert_eq!(timeline.events().len(), before);

        sync.reset(semaphore_pairs(2));
        timeline.fail_submit = false;
        assert!(run_frame(&mut sync, &mut timeline));
    }

    #[test]
    fn failed_fence_wait_flags_rebuild_without_recording() {
        let mut sync = ready_synchronizer(2);
        let mut timeline = RecordingTimeline::new(2);
        timeline.fail_wait = true;

        let mut recorded = false;
        let result = sync.render(&mut timeline, |_| {
            recorded = true;
            Ok(())
        });

        assert!(matches!(
            result,
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert!(!recorded);
        assert!(sync.needs_rebuild());
    }
}
