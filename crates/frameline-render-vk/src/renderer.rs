// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use frameline_render::{RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::ash_device::{AshDevice, DeviceOptions};
use crate::device::DeviceProvider;
use crate::swapchain::{ChainConfig, SwapChain};

#[derive(Clone, Copy, Debug, Default)]
pub struct VkOptions {
    pub chain: ChainConfig,
    pub device: DeviceOptions,
}

/// Clears color and depth every frame through the presentation chain.
///
/// One command buffer is recorded per chain image and re-recorded whenever the
/// chain is rebuilt or the clear color changes.
pub struct VkRenderer {
    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,
    // field order is drop order: chain before the device it was built on
    swapchain: SwapChain<AshDevice>,
    device: Arc<AshDevice>,

    clear: [f32; 4],
    size: RenderSize,
    paused: bool,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        let d = self.device.raw();
        unsafe {
            d.device_wait_idle().ok();
            d.destroy_command_pool(self.cmd_pool, None);
        }
    }
}

impl VkRenderer {
    pub fn with_options(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: VkOptions,
    ) -> Result<Self> {
        let device = Arc::new(AshDevice::new(window, display, options.device)?);

        let initial = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let swapchain = SwapChain::new(Arc::clone(&device), initial, options.chain)
            .context("build presentation chain")?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families().graphics);
        let cmd_pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;

        let mut r = VkRenderer {
            cmd_pool,
            cmd_bufs: Vec::new(),
            swapchain,
            device,
            clear: [0.02, 0.02, 0.04, 1.0],
            size: initial,
            paused: size.is_empty(),
        };
        r.record_commands()?;

        info!(
            "Vulkan renderer ready ({}x{}, {} images, {} frames in flight, {:?})",
            r.swapchain.width(),
            r.swapchain.height(),
            r.swapchain.image_count(),
            r.swapchain.frames_in_flight(),
            r.swapchain.present_mode(),
        );
        Ok(r)
    }

    pub fn swapchain(&self) -> &SwapChain<AshDevice> {
        &self.swapchain
    }

    fn ensure_command_buffers(&mut self) -> Result<()> {
        let wanted = self.swapchain.image_count();
        if self.cmd_bufs.len() == wanted {
            return Ok(());
        }
        let d = self.device.raw();
        if !self.cmd_bufs.is_empty() {
            unsafe { d.free_command_buffers(self.cmd_pool, &self.cmd_bufs) };
            self.cmd_bufs.clear();
        }
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.cmd_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(wanted as u32);
        self.cmd_bufs =
            unsafe { d.allocate_command_buffers(&alloc_info) }.context("allocate_command_buffers")?;
        debug!("{} command buffers allocated", wanted);
        Ok(())
    }

    /// Caller guarantees none of the buffers is pending.
    fn record_commands(&mut self) -> Result<()> {
        self.ensure_command_buffers()?;

        let d = self.device.raw();
        unsafe { d.reset_command_pool(self.cmd_pool, vk::CommandPoolResetFlags::empty()) }
            .context("reset_command_pool")?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent(),
        };

        for (i, &cmd) in self.cmd_bufs.iter().enumerate() {
            let framebuffer = self
                .swapchain
                .framebuffer(i)
                .ok_or_else(|| anyhow!("no framebuffer for image {i}"))?;
            let rp_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.swapchain.render_pass())
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clears);
            unsafe {
                d.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
                d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                d.cmd_end_render_pass(cmd);
                d.end_command_buffer(cmd)?;
            }
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        self.swapchain
            .recreate(self.size)
            .context("rebuild presentation chain")?;
        self.record_commands()
    }
}

impl Renderer for VkRenderer {
    fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle, size: RenderSize) -> Result<Self> {
        Self::with_options(window, display, size, VkOptions::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if size.is_empty() {
            // minimized; keep the old chain until a real size arrives
            self.paused = true;
            return Ok(());
        }
        self.paused = false;
        self.rebuild()
    }

    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }

        let acquired = self.swapchain.acquire_next_image()?;
        let Some(image_index) = acquired.image_index() else {
            warn!("swapchain out of date on acquire, rebuilding");
            return self.rebuild();
        };

        let cmd = self
            .cmd_bufs
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| anyhow!("no command buffer for image {image_index}"))?;
        let presented = self.swapchain.submit_command_buffers(&[cmd], image_index)?;

        if acquired.needs_rebuild() || presented.needs_rebuild() {
            warn!(?acquired, ?presented, "rebuilding presentation chain");
            self.rebuild()?;
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if self.clear == rgba {
            return;
        }
        self.clear = rgba;
        if let Err(e) = self.device.wait_idle() {
            warn!("device_wait_idle before re-record failed: {e}");
            return;
        }
        if let Err(e) = self.record_commands() {
            warn!("re-recording command buffers failed: {e:#}");
        }
    }
}
