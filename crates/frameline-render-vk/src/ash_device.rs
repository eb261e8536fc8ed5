// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

use crate::device::{find_memory_type, DeviceProvider, QueueFamilies, SwapchainSupport};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    /// Enable the Khronos validation layer and debug-utils messages when the
    /// loader offers them.
    pub validation: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            validation: cfg!(debug_assertions),
        }
    }
}

/// Instance, surface, physical + logical device and the two queues the
/// presentation chain submits to.
pub struct AshDevice {
    _entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    memory: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    swapchain_loader: swapchain::Device,
}

// Vulkan validation output lands in the tracing subscriber.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback data pointer for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader.
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    options: DeviceOptions,
) -> Result<(Instance, bool)> {
    let app_name = c"frameline";
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .engine_name(app_name)
        .api_version(vk::API_VERSION_1_0);

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();

    let mut debug_utils_on = false;
    if options.validation {
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("enumerate_instance_extension_properties")?;
        debug_utils_on = available
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == debug_utils::NAME));
        if debug_utils_on {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let layer_props = unsafe { entry.enumerate_instance_layer_properties() }
            .context("enumerate_instance_layer_properties")?;
        if layer_props
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
        {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;
    Ok((instance, debug_utils_on))
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    let messenger = unsafe { loader.create_debug_utils_messenger(&info, None) }
        .context("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

/// A family doing both graphics and present wins; otherwise the first of each.
fn find_queue_families(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut graphics = None;
    let mut present = None;
    for (i, q) in qprops.iter().enumerate() {
        let i = i as u32;
        if q.queue_count == 0 {
            continue;
        }
        let does_graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let does_present =
            unsafe { surface_loader.get_physical_device_surface_support(phys, i, surface) }
                .unwrap_or(false);
        if does_graphics && does_present {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if does_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if does_present && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    unsafe { instance.enumerate_device_extension_properties(phys) }
        .map(|exts| {
            exts.iter()
                .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME))
        })
        .unwrap_or(false)
}

fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    debug!("{} physical device(s)", devices.len());

    for phys in devices {
        let Some(families) = find_queue_families(instance, surface_loader, surface, phys) else {
            continue;
        };
        if !supports_swapchain(instance, phys) {
            continue;
        }
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(phys, surface) }.unwrap_or_default();
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(phys, surface) }
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            continue;
        }

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "physical device: {} (graphics family {}, present family {})",
            name, families.graphics, families.present
        );
        return Ok((phys, families));
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

impl AshDevice {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        options: DeviceOptions,
    ) -> Result<Self> {
        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;

        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let (instance, debug_utils_on) = create_instance(&entry, dh, options)?;
        let debug = if debug_utils_on {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
            .context("create_surface")?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let (phys, families) = pick_physical_device(&instance, &surface_loader, surface)?;
        let memory = unsafe { instance.get_physical_device_memory_properties(phys) };

        let priorities = [1.0_f32];
        let mut unique = vec![families.graphics];
        if !families.is_shared() {
            unique.push(families.present);
        }
        let queue_infos: Vec<_> = unique
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_exts);

        let device = unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        Ok(AshDevice {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            memory,
            device,
            families,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

impl DeviceProvider for AshDevice {
    fn swapchain_support(&self) -> VkResult<SwapchainSupport> {
        unsafe {
            Ok(SwapchainSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.phys, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.phys, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.phys, self.surface)?,
            })
        }
    }

    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }

    fn create_image_with_memory(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let d = &self.device;
        let image = unsafe { d.create_image(info, None)? };
        let req = unsafe { d.get_image_memory_requirements(image) };

        let Some(type_index) = find_memory_type(&self.memory, req.memory_type_bits, properties) else {
            error!(
                "no memory type for bits {:#x} with {:?}",
                req.memory_type_bits, properties
            );
            unsafe { d.destroy_image(image, None) };
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        };

        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(req.size)
            .memory_type_index(type_index);
        let memory = match unsafe { d.allocate_memory(&alloc, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { d.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { d.bind_image_memory(image, memory, 0) } {
            unsafe {
                d.destroy_image(image, None);
                d.free_memory(memory, None);
            }
            return Err(e);
        }
        Ok((image, memory))
    }

    fn destroy_image_with_memory(&self, image: vk::Image, memory: vk::DeviceMemory) {
        unsafe {
            self.device.destroy_image(image, None);
            self.device.free_memory(memory, None);
        }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let info = info.surface(self.surface);
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn submit_graphics(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let waits = [wait];
        let stages = [wait_stage];
        let signals = [signal];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signals);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit), fence)
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool> {
        let waits = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present)
        }
    }
}
