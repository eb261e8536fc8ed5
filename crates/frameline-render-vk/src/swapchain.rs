// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use frameline_render::RenderSize;
use tracing::{info, warn};

use crate::chain::PresentChain;
use crate::device::DeviceProvider;
use crate::error::{ChainError, ChainResult};
use crate::select::PresentPolicy;
use crate::sync::{AcquireOutcome, FrameSync, PresentOutcome, MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Copy, Debug)]
pub struct ChainConfig {
    pub frames_in_flight: usize,
    pub present_policy: PresentPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            present_policy: PresentPolicy::Fifo,
        }
    }
}

/// Owns the presentation chain and its frame synchronizer as one unit.
///
/// Creation order is chain then sync; [`SwapChain::destroy`] (also run on
/// drop) waits for the device to go idle and releases sync objects first,
/// then the chain. The frame loop must not be running when it does.
pub struct SwapChain<D: DeviceProvider> {
    device: Arc<D>,
    config: ChainConfig,
    chain: PresentChain,
    sync: FrameSync,
    live: bool,
}

impl<D: DeviceProvider> SwapChain<D> {
    pub fn new(device: Arc<D>, window: RenderSize, mut config: ChainConfig) -> ChainResult<Self> {
        if config.frames_in_flight == 0 {
            warn!("frames_in_flight = 0 is not usable, using 1");
            config.frames_in_flight = 1;
        }
        let (chain, sync) = Self::build(device.as_ref(), window, &config)?;
        Ok(SwapChain {
            device,
            config,
            chain,
            sync,
            live: true,
        })
    }

    fn build(
        device: &D,
        window: RenderSize,
        config: &ChainConfig,
    ) -> ChainResult<(PresentChain, FrameSync)> {
        let mut chain = PresentChain::build(device, window, config.present_policy)?;
        match FrameSync::new(device, config.frames_in_flight, chain.image_count()) {
            Ok(sync) => Ok((chain, sync)),
            Err(e) => {
                chain.destroy(device);
                Err(e)
            }
        }
    }

    /// Tears everything down and builds it again for `window`.
    pub fn recreate(&mut self, window: RenderSize) -> ChainResult<()> {
        self.destroy();
        let (chain, sync) = Self::build(self.device.as_ref(), window, &self.config)?;
        self.chain = chain;
        self.sync = sync;
        self.live = true;
        info!(
            "presentation chain rebuilt at {}x{}",
            self.chain.extent().width,
            self.chain.extent().height
        );
        Ok(())
    }

    /// Releases every owned object. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if !self.live {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            warn!("device_wait_idle before chain teardown failed: {e}");
        }
        let device = self.device.as_ref();
        self.sync.destroy(device);
        self.chain.destroy(device);
        self.live = false;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn acquire_next_image(&mut self) -> ChainResult<AcquireOutcome> {
        if !self.live {
            return Err(ChainError::Destroyed);
        }
        self.sync
            .acquire_next_image(self.device.as_ref(), self.chain.swapchain())
    }

    pub fn submit_command_buffers(
        &mut self,
        command_buffers: &[vk::CommandBuffer],
        image_index: u32,
    ) -> ChainResult<PresentOutcome> {
        if !self.live {
            return Err(ChainError::Destroyed);
        }
        self.sync.submit_command_buffers(
            self.device.as_ref(),
            self.chain.swapchain(),
            command_buffers,
            image_index,
        )
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> ChainConfig {
        self.config
    }

    pub fn chain(&self) -> &PresentChain {
        &self.chain
    }

    pub fn frame_sync(&self) -> &FrameSync {
        &self.sync
    }

    pub fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    pub fn image_format(&self) -> vk::Format {
        self.chain.surface_format().format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.chain.depth_format()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain.present_mode()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent()
    }

    pub fn width(&self) -> u32 {
        self.chain.extent().width
    }

    pub fn height(&self) -> u32 {
        self.chain.extent().height
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        let extent = self.chain.extent();
        extent.width as f32 / extent.height as f32
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.chain.render_pass()
    }

    /// Subpass pipelines must be built against.
    pub fn subpass(&self) -> u32 {
        0
    }

    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.chain.framebuffers().get(index).copied()
    }

    pub fn image_view(&self, index: usize) -> Option<vk::ImageView> {
        self.chain.image_views().get(index).copied()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }
}

impl<D: DeviceProvider> Drop for SwapChain<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
