// SPDX-License-Identifier: CEPL-1.0
//! The device seam the presentation chain is built against.
//!
//! Everything the chain and the frame synchronizer ask of the GPU goes through
//! [`DeviceProvider`]. [`AshDevice`](crate::AshDevice) is the real
//! implementation; tests drive the same code with a scripted device.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::ChainResult;
use crate::select;

/// What the surface reports for the selected physical device.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

pub trait DeviceProvider {
    // --- queries ---
    fn swapchain_support(&self) -> VkResult<SwapchainSupport>;
    fn queue_families(&self) -> QueueFamilies;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    /// First of `candidates` whose `tiling` features contain `features`.
    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> ChainResult<vk::Format> {
        select::find_supported_format(candidates, tiling, features, |f| {
            self.format_properties(f)
        })
    }

    // --- images ---
    fn create_image_with_memory(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)>;
    fn destroy_image_with_memory(&self, image: vk::Image, memory: vk::DeviceMemory);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // --- swapchain ---
    /// `info.surface` is left null by callers; the provider fills in its own surface.
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>)
        -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// Also releases the presentable images the swapchain owns.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // --- render pass / framebuffers ---
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>)
        -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // --- sync ---
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks without timeout.
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;

    // --- frame ---
    /// Blocks without timeout. `Ok((index, suboptimal))`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn submit_graphics(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()>;
    /// `Ok(suboptimal)`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool>;
}

/// Index of the first memory type allowed by `type_bits` that has all of
/// `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && memory.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}
