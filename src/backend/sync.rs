// Synchronization primitives
//
// One FrameSlot per frame in flight. The fence bounds how far the CPU can run
// ahead of the GPU, the semaphores order acquire -> render -> present on the
// GPU side.

use super::device::DeviceContext;
use super::error::{GpuError, InitError, VkContext};
use ash::vk;
use std::sync::Arc;

/// Fence and queue operations used by the frame loop
pub trait SyncBackend {
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    fn submit(&self, queue: vk::Queue, submission: &Submission) -> Result<(), vk::Result>;
}

/// A single command buffer submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

impl SyncBackend for ash::Device {
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.reset_fences(&[fence]) }
    }

    fn submit(&self, queue: vk::Queue, submission: &Submission) -> Result<(), vk::Result> {
        let wait_semaphores = [submission.wait];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.queue_submit(queue, &[submit_info.build()], submission.fence) }
    }
}

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    /// Block until the GPU is done with this slot's previous submission
    pub fn wait<B: SyncBackend>(&self, backend: &B) -> Result<(), GpuError> {
        backend.wait_for_fence(self.in_flight_fence).gpu_context("Fence wait")
    }

    /// Reset the fence and submit the slot's command buffer
    pub fn submit<B: SyncBackend>(&self, backend: &B, queue: vk::Queue) -> Result<(), GpuError> {
        backend.reset_fence(self.in_flight_fence).gpu_context("Fence reset")?;

        let submission = Submission {
            command_buffer: self.command_buffer,
            wait: self.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: self.render_finished,
            fence: self.in_flight_fence,
        };
        backend.submit(queue, &submission).gpu_context("Queue submit")
    }
}

/// Slot index after `current`, cycling through `count` slots
pub fn next_slot(current: usize, count: usize) -> usize {
    (current + 1) % count
}

fn begin_slot<'a, B: SyncBackend>(slots: &'a [FrameSlot], backend: &B, slot: usize) -> Result<&'a FrameSlot, GpuError> {
    let frame = &slots[slot];
    frame.wait(backend)?;
    Ok(frame)
}

pub struct FrameResources {
    slots: Vec<FrameSlot>,
    command_pool: vk::CommandPool,
    device: Arc<DeviceContext>,
}

impl FrameResources {
    pub fn new(device: Arc<DeviceContext>, frames_in_flight: usize) -> Result<Self, InitError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families().graphics);

        let command_pool =
            unsafe { device.device().create_command_pool(&pool_info, None) }.init_context("Command pool creation")?;

        // From here on Drop cleans up whatever was created
        let mut resources = Self {
            slots: Vec::with_capacity(frames_in_flight),
            command_pool,
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let command_buffers = unsafe { resources.device.device().allocate_command_buffers(&alloc_info) }
            .init_context("Command buffer allocation")?;

        for command_buffer in command_buffers {
            let slot = resources.create_slot(command_buffer)?;
            resources.slots.push(slot);
        }

        log::debug!("Created {} frame slots", resources.slots.len());
        Ok(resources)
    }

    fn create_slot(&self, command_buffer: vk::CommandBuffer) -> Result<FrameSlot, InitError> {
        let device = self.device.device();
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available =
                device.create_semaphore(&semaphore_info, None).init_context("Semaphore creation")?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(result) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(InitError::Vulkan {
                        what: "Semaphore creation",
                        result,
                    });
                }
            };
            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(result) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(InitError::Vulkan {
                        what: "Fence creation",
                        result,
                    });
                }
            };

            Ok(FrameSlot {
                command_buffer,
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Wait until `slot` is free again and hand it out for recording.
    /// This is the only point where a tick blocks on the GPU.
    pub fn begin_frame<B: SyncBackend>(&self, backend: &B, slot: usize) -> Result<&FrameSlot, GpuError> {
        begin_slot(&self.slots, backend, slot)
    }

    pub fn submit<B: SyncBackend>(&self, backend: &B, queue: vk::Queue, slot: usize) -> Result<(), GpuError> {
        self.slots[slot].submit(backend, queue)
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        let device = self.device.device();
        unsafe {
            for slot in self.slots.drain(..) {
                device.destroy_semaphore(slot.image_available, None);
                device.destroy_semaphore(slot.render_finished, None);
                device.destroy_fence(slot.in_flight_fence, None);
            }
            // Frees the command buffers as well
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
