// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, per-image views and depth buffers, the shared render pass and
//! one framebuffer per image.

use ash::vk;
use frameline_render::RenderSize;
use tracing::{debug, info};

use crate::device::{DeviceProvider, QueueFamilies};
use crate::error::{ChainError, ChainResult};
use crate::select::{self, PresentPolicy, DEPTH_CANDIDATES};

/// Per-image depth buffer. Image, memory and view live and die together.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

/// Everything that depends on the swapchain. Built in dependency order and
/// released in reverse by [`PresentChain::destroy`].
pub struct PresentChain {
    swapchain: vk::SwapchainKHR,
    // owned by the swapchain, never destroyed here
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Vec<DepthAttachment>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl PresentChain {
    /// Builds the whole chain. On failure everything created so far is
    /// released before the error is returned.
    pub fn build<D: DeviceProvider + ?Sized>(
        device: &D,
        window: RenderSize,
        policy: PresentPolicy,
    ) -> ChainResult<Self> {
        let support = device
            .swapchain_support()
            .map_err(ChainError::construction("swapchain support query"))?;
        if support.formats.is_empty() {
            return Err(ChainError::NoSurfaceFormats);
        }

        let surface_format = select::choose_surface_format(&support.formats);
        let present_mode = select::choose_present_mode(&support.present_modes, policy);
        let extent = select::resolve_extent(&support.capabilities, window);
        let depth_format = device.find_supported_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let mut chain = PresentChain {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            surface_format,
            depth_format,
            present_mode,
            extent,
        };

        let families = device.queue_families();
        let min_image_count = select::desired_image_count(&support.capabilities);
        if let Err(e) = chain.create_all(device, &support.capabilities, families, min_image_count) {
            chain.destroy(device);
            return Err(e);
        }

        info!(
            "presentation chain ready ({}x{}, {} images, {:?}/{:?}, depth {:?}, {:?})",
            extent.width,
            extent.height,
            chain.images.len(),
            surface_format.format,
            surface_format.color_space,
            depth_format,
            present_mode,
        );
        Ok(chain)
    }

    fn create_all<D: DeviceProvider + ?Sized>(
        &mut self,
        device: &D,
        caps: &vk::SurfaceCapabilitiesKHR,
        families: QueueFamilies,
        min_image_count: u32,
    ) -> ChainResult<()> {
        self.create_swapchain(device, caps, families, min_image_count)?;
        self.create_image_views(device)?;
        self.create_depth_resources(device)?;
        self.create_render_pass(device)?;
        self.create_framebuffers(device)
    }

    fn create_swapchain<D: DeviceProvider + ?Sized>(
        &mut self,
        device: &D,
        caps: &vk::SurfaceCapabilitiesKHR,
        families: QueueFamilies,
        min_image_count: u32,
    ) -> ChainResult<()> {
        let family_indices = [families.graphics, families.present];
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .min_image_count(min_image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        info = if families.is_shared() {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        self.swapchain = device
            .create_swapchain(&info)
            .map_err(ChainError::construction("swapchain"))?;

        // The driver may hand back more images than we asked for.
        self.images = device
            .swapchain_images(self.swapchain)
            .map_err(ChainError::construction("swapchain images"))?;
        debug!(
            "swapchain created: requested {} images, got {}",
            min_image_count,
            self.images.len()
        );
        Ok(())
    }

    fn create_image_views<D: DeviceProvider + ?Sized>(&mut self, device: &D) -> ChainResult<()> {
        self.image_views.reserve(self.images.len());
        for &image in &self.images {
            let info = view_info(image, self.surface_format.format, vk::ImageAspectFlags::COLOR);
            let view = device
                .create_image_view(&info)
                .map_err(ChainError::construction("swapchain image view"))?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth_resources<D: DeviceProvider + ?Sized>(&mut self, device: &D) -> ChainResult<()> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.depth_format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.depth.reserve(self.images.len());
        for _ in 0..self.images.len() {
            let (image, memory) = device
                .create_image_with_memory(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .map_err(ChainError::construction("depth image"))?;
            let info = view_info(image, self.depth_format, vk::ImageAspectFlags::DEPTH);
            let view = match device.create_image_view(&info) {
                Ok(view) => view,
                Err(result) => {
                    device.destroy_image_with_memory(image, memory);
                    return Err(ChainError::Construction {
                        what: "depth image view",
                        result,
                    });
                }
            };
            self.depth.push(DepthAttachment {
                image,
                memory,
                view,
            });
        }
        Ok(())
    }

    fn create_render_pass<D: DeviceProvider + ?Sized>(&mut self, device: &D) -> ChainResult<()> {
        let attachments = attachment_descriptions(self.surface_format.format, self.depth_format);
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref)];
        let dependencies = [external_dependency()];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        self.render_pass = device
            .create_render_pass(&info)
            .map_err(ChainError::construction("render pass"))?;
        Ok(())
    }

    fn create_framebuffers<D: DeviceProvider + ?Sized>(&mut self, device: &D) -> ChainResult<()> {
        self.framebuffers.reserve(self.image_views.len());
        for (color, depth) in self.image_views.iter().zip(&self.depth) {
            let attachments = [*color, depth.view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = device
                .create_framebuffer(&info)
                .map_err(ChainError::construction("framebuffer"))?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Releases framebuffers, render pass, depth attachments, image views and
    /// finally the swapchain. Safe to call more than once.
    pub fn destroy<D: DeviceProvider + ?Sized>(&mut self, device: &D) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        for depth in self.depth.drain(..) {
            device.destroy_image_view(depth.view);
            device.destroy_image_with_memory(depth.image, depth.memory);
        }
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            debug!("presentation chain destroyed");
        }
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn depth_attachments(&self) -> &[DepthAttachment] {
        &self.depth
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

fn view_info(
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}

/// Color (index 0) and depth (index 1) attachments of the chain's render pass.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    let color = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    [color, depth]
}

/// Holds color output and early fragment tests of subpass 0 until earlier
/// work on the same attachments (including presentation) has finished.
pub fn external_dependency() -> vk::SubpassDependency {
    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}
