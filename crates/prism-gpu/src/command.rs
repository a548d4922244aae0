//! Command pool and command buffer helpers.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a command pool for a queue family.
///
/// # Safety
/// The device must be valid and the queue family must exist.
pub unsafe fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(flags);

    let pool = device.create_command_pool(&create_info, None)?;
    if pool == vk::CommandPool::null() {
        return Err(GpuError::NullHandle("command pool"));
    }
    Ok(pool)
}

/// Allocate a single command buffer.
///
/// # Safety
/// The device and pool must be valid.
pub unsafe fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(level)
        .command_buffer_count(1);

    device
        .allocate_command_buffers(&alloc_info)?
        .into_iter()
        .next()
        .ok_or(GpuError::NullHandle("command buffer"))
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Runs a release action on drop unless disarmed.
struct ReleaseGuard<F: FnOnce()> {
    release: Option<F>,
}

impl<F: FnOnce()> ReleaseGuard<F> {
    fn new(release: F) -> Self {
        Self {
            release: Some(release),
        }
    }

    /// Skip the release, e.g. when the GPU may still be using the resource.
    fn disarm(&mut self) {
        self.release = None;
    }
}

impl<F: FnOnce()> Drop for ReleaseGuard<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Record, submit and wait for a one-shot command buffer.
///
/// The buffer is freed on every exit path except a failed wait after a
/// successful submit, where it may still be executing and is leaked instead.
/// The call blocks until `queue` is idle.
///
/// # Safety
/// All handles must be valid, and `pool` must belong to `queue`'s family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    level: vk::CommandBufferLevel,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = allocate_command_buffer(device, pool, level)?;
    let mut guard = ReleaseGuard::new(|| unsafe { device.free_command_buffers(pool, &[cmd]) });

    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    f(cmd);
    end_command_buffer(device, cmd)?;

    submit_command_buffers(device, queue, &[cmd], &[], &[], &[], vk::Fence::null())?;
    if let Err(e) = device.queue_wait_idle(queue) {
        guard.disarm();
        tracing::warn!("Queue wait failed after submit, leaking command buffer: {e}");
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn guard_releases_on_early_return() {
        let released = Cell::new(0);
        let run = |fail: bool| -> Result<()> {
            let _guard = ReleaseGuard::new(|| released.set(released.get() + 1));
            if fail {
                return Err(GpuError::InvalidState("record failed".to_string()));
            }
            Ok(())
        };

        assert!(run(true).is_err());
        assert!(run(false).is_ok());
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn disarmed_guard_keeps_the_resource() {
        let released = Cell::new(false);
        let mut guard = ReleaseGuard::new(|| released.set(true));
        guard.disarm();
        drop(guard);
        assert!(!released.get());
    }
}
