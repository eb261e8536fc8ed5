// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight ring and the per-image fence table.
//!
//! ```text
//! acquire:  wait slot.fence ─► acquire(signal slot.image_available)
//! submit:   wait images_in_flight[i] (if any) ─► images_in_flight[i] = slot.fence
//!           reset slot.fence ─► submit(wait image_available @ COLOR_ATTACHMENT_OUTPUT,
//!                                     signal render_finished, fence slot.fence)
//!           present(wait render_finished) ─► current = (current + 1) % ring
//! ```
//!
//! A slot's fence is only reset right before the submit that re-signals it, so
//! an acquire that comes back out-of-date leaves the slot waitable.

use ash::vk;
use tracing::{debug, trace};

use crate::device::DeviceProvider;
use crate::error::{ChainError, ChainResult};

/// Default bound on frames the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Result of [`FrameSync::acquire_next_image`] the caller may want to rebuild on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable, but the chain no longer matches the surface exactly.
    Suboptimal(u32),
    /// No image was acquired; the chain must be rebuilt before rendering.
    OutOfDate,
}

impl AcquireOutcome {
    pub fn image_index(self) -> Option<u32> {
        match self {
            AcquireOutcome::Ready(i) | AcquireOutcome::Suboptimal(i) => Some(i),
            AcquireOutcome::OutOfDate => None,
        }
    }

    pub fn needs_rebuild(self) -> bool {
        !matches!(self, AcquireOutcome::Ready(_))
    }

    /// The platform result code this outcome was derived from.
    pub fn raw(self) -> vk::Result {
        match self {
            AcquireOutcome::Ready(_) => vk::Result::SUCCESS,
            AcquireOutcome::Suboptimal(_) => vk::Result::SUBOPTIMAL_KHR,
            AcquireOutcome::OutOfDate => vk::Result::ERROR_OUT_OF_DATE_KHR,
        }
    }
}

/// Result of the present half of [`FrameSync::submit_command_buffers`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_rebuild(self) -> bool {
        self != PresentOutcome::Presented
    }

    pub fn raw(self) -> vk::Result {
        match self {
            PresentOutcome::Presented => vk::Result::SUCCESS,
            PresentOutcome::Suboptimal => vk::Result::SUBOPTIMAL_KHR,
            PresentOutcome::OutOfDate => vk::Result::ERROR_OUT_OF_DATE_KHR,
        }
    }
}

struct InFlightSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    frame_complete: vk::Fence,
}

pub struct FrameSync {
    slots: Vec<InFlightSlot>,
    // fence of the slot that last submitted work for each image
    images_in_flight: Vec<Option<vk::Fence>>,
    current: usize,
}

impl FrameSync {
    /// Creates `frames_in_flight` slots (fences start signaled) and an empty
    /// table for `image_count` images.
    pub fn new<D: DeviceProvider + ?Sized>(
        device: &D,
        frames_in_flight: usize,
        image_count: usize,
    ) -> ChainResult<Self> {
        let mut sync = FrameSync {
            slots: Vec::with_capacity(frames_in_flight),
            images_in_flight: vec![None; image_count],
            current: 0,
        };
        for _ in 0..frames_in_flight {
            if let Err(e) = sync.push_slot(device) {
                sync.destroy(device);
                return Err(e);
            }
        }
        debug!(
            "frame sync ready: {} slots for {} images",
            frames_in_flight, image_count
        );
        Ok(sync)
    }

    fn push_slot<D: DeviceProvider + ?Sized>(&mut self, device: &D) -> ChainResult<()> {
        let image_available = device
            .create_semaphore()
            .map_err(ChainError::construction("image-available semaphore"))?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(result) => {
                device.destroy_semaphore(image_available);
                return Err(ChainError::Construction {
                    what: "render-finished semaphore",
                    result,
                });
            }
        };
        let frame_complete = match device.create_fence(true) {
            Ok(f) => f,
            Err(result) => {
                device.destroy_semaphore(render_finished);
                device.destroy_semaphore(image_available);
                return Err(ChainError::Construction {
                    what: "frame fence",
                    result,
                });
            }
        };
        self.slots.push(InFlightSlot {
            image_available,
            render_finished,
            frame_complete,
        });
        Ok(())
    }

    /// Waits until the current slot's previous frame has retired, then asks
    /// the presentation engine for the next image.
    pub fn acquire_next_image<D: DeviceProvider + ?Sized>(
        &self,
        device: &D,
        swapchain: vk::SwapchainKHR,
    ) -> ChainResult<AcquireOutcome> {
        let slot = self.slots.get(self.current).ok_or(ChainError::Destroyed)?;

        device
            .wait_for_fence(slot.frame_complete)
            .map_err(ChainError::FenceWait)?;

        match device.acquire_next_image(swapchain, slot.image_available) {
            Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(ChainError::Acquire(e)),
        }
    }

    /// Submits `command_buffers` for `image_index` and presents it.
    ///
    /// The ring advances once the submit went through, whatever the present
    /// returns.
    pub fn submit_command_buffers<D: DeviceProvider + ?Sized>(
        &mut self,
        device: &D,
        swapchain: vk::SwapchainKHR,
        command_buffers: &[vk::CommandBuffer],
        image_index: u32,
    ) -> ChainResult<PresentOutcome> {
        if self.slots.is_empty() {
            return Err(ChainError::Destroyed);
        }
        let image = image_index as usize;
        let count = self.images_in_flight.len();
        if image >= count {
            return Err(ChainError::ImageIndexOutOfRange {
                index: image_index,
                count,
            });
        }

        let slot = &self.slots[self.current];

        // The engine may hand out images out of ring order; make sure whatever
        // last rendered into this image has drained.
        if let Some(fence) = self.images_in_flight[image] {
            trace!(image_index, ?fence, "waiting on previous owner of image");
            device.wait_for_fence(fence).map_err(ChainError::FenceWait)?;
        }
        self.images_in_flight[image] = Some(slot.frame_complete);

        device
            .reset_fence(slot.frame_complete)
            .map_err(ChainError::Submission)?;
        device
            .submit_graphics(
                command_buffers,
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                slot.render_finished,
                slot.frame_complete,
            )
            .map_err(ChainError::Submission)?;

        let presented = device.queue_present(swapchain, slot.render_finished, image_index);
        self.current = (self.current + 1) % self.slots.len();

        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(ChainError::Present(e)),
        }
    }

    /// Destroys every semaphore and fence. Safe to call more than once.
    pub fn destroy<D: DeviceProvider + ?Sized>(&mut self, device: &D) {
        for slot in self.slots.drain(..) {
            device.destroy_semaphore(slot.image_available);
            device.destroy_semaphore(slot.render_finished);
            device.destroy_fence(slot.frame_complete);
        }
        self.images_in_flight.iter_mut().for_each(|f| *f = None);
        self.current = 0;
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Fence recorded for `image_index`, if any work has targeted it.
    pub fn image_fence(&self, image_index: u32) -> Option<vk::Fence> {
        self.images_in_flight
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    pub fn slot_fence(&self, slot: usize) -> Option<vk::Fence> {
        self.slots.get(slot).map(|s| s.frame_complete)
    }
}
