// SPDX-License-Identifier: CEPL-1.0
//! Scripted stand-in for a GPU.
//!
//! Hands out fake handles, tracks which are alive, and models fence and
//! semaphore state closely enough to flag misuse. Work submitted with a fence
//! never completes on its own: the fence stays pending until someone waits on
//! it, which is then logged as a blocking wait.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use frameline_render_vk::ash::prelude::VkResult;
use frameline_render_vk::ash::vk::{self, Handle};
use frameline_render_vk::{DeviceProvider, QueueFamilies, SwapchainSupport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    SwapchainImage,
    Image,
    Memory,
    ImageView,
    RenderPass,
    Framebuffer,
    Semaphore,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Guarded work submitted, not yet observed complete.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Created(Kind, u64),
    Destroyed(Kind, u64),
    WaitFence { fence: vk::Fence, blocked: bool },
    ResetFence(vk::Fence),
    Acquire { signal: vk::Semaphore },
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present { wait: vk::Semaphore, image_index: u32 },
    WaitIdle,
}

#[derive(Clone, Debug)]
pub struct SwapchainRecord {
    pub min_image_count: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct FramebufferRecord {
    pub handle: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Default)]
struct State {
    next_raw: u64,
    live: HashMap<u64, Kind>,
    created: HashMap<Kind, usize>,
    fail_on: Option<(Kind, usize)>,

    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    // view -> image it looks at
    views: HashMap<u64, u64>,
    // framebuffer -> (render pass, attachments)
    framebuffers: HashMap<u64, (u64, Vec<u64>)>,

    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    next_image: u32,
    present_script: VecDeque<VkResult<bool>>,
    submit_failure: Option<vk::Result>,

    events: Vec<Event>,
    violations: Vec<String>,
    swapchain_records: Vec<SwapchainRecord>,
    framebuffer_records: Vec<FramebufferRecord>,
}

impl State {
    fn alloc(&mut self, kind: Kind) -> VkResult<u64> {
        let n = self.created.entry(kind).or_insert(0);
        *n += 1;
        if self.fail_on == Some((kind, *n)) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.next_raw += 1;
        let raw = self.next_raw;
        self.live.insert(raw, kind);
        self.events.push(Event::Created(kind, raw));
        Ok(raw)
    }

    fn release(&mut self, kind: Kind, raw: u64) {
        match self.live.get(&raw) {
            Some(&k) if k == kind => {
                self.live.remove(&raw);
                self.events.push(Event::Destroyed(kind, raw));
            }
            Some(&k) => self
                .violations
                .push(format!("destroyed {k:?} {raw} as a {kind:?}")),
            None => self
                .violations
                .push(format!("{kind:?} {raw} destroyed twice or never created")),
        }
    }

    fn violate(&mut self, msg: String) {
        self.violations.push(msg);
    }
}

pub struct MockDevice {
    pub support: SwapchainSupport,
    pub families: QueueFamilies,
    /// Formats reporting depth-attachment support with optimal tiling.
    pub depth_formats: Vec<vk::Format>,
    /// Overrides how many images a new swapchain hands back.
    pub forced_image_count: Option<u32>,
    state: RefCell<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        MockDevice {
            support: SwapchainSupport {
                capabilities,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::R8G8B8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            },
            families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
            depth_formats: vec![vk::Format::D32_SFLOAT],
            forced_image_count: None,
            state: RefCell::new(State::default()),
        }
    }

    /// Surface that leaves the extent to the window, within `min..=max`.
    pub fn with_free_extent(mut self, min: (u32, u32), max: (u32, u32)) -> Self {
        let caps = &mut self.support.capabilities;
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: min.0,
            height: min.1,
        };
        caps.max_image_extent = vk::Extent2D {
            width: max.0,
            height: max.1,
        };
        self
    }

    // --- scripting ---

    /// Results returned by the next acquires, in order. Once drained, images
    /// are handed out round-robin.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = VkResult<(u32, bool)>>) {
        self.state.borrow_mut().acquire_script.extend(results);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = VkResult<bool>>) {
        self.state.borrow_mut().present_script.extend(results);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_failure = Some(result);
    }

    /// The `nth` (1-based, counted from now on) creation of `kind` fails.
    pub fn fail_on(&self, kind: Kind, nth: usize) {
        let mut s = self.state.borrow_mut();
        let already = s.created.get(&kind).copied().unwrap_or(0);
        s.fail_on = Some((kind, already + nth));
    }

    // --- inspection ---

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_of(&self, kind: Kind) -> usize {
        self.state.borrow().live.values().filter(|&&k| k == kind).count()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.state.borrow().swapchain_records.clone()
    }

    pub fn framebuffer_records(&self) -> Vec<FramebufferRecord> {
        self.state.borrow().framebuffer_records.clone()
    }

    /// Kinds in the order they were destroyed since the last `clear_events`.
    pub fn destroy_order(&self) -> Vec<Kind> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Destroyed(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl DeviceProvider for MockDevice {
    fn swapchain_support(&self) -> VkResult<SwapchainSupport> {
        Ok(self.support.clone())
    }

    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if self.depth_formats.contains(&format) {
            vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            }
        } else {
            vk::FormatProperties::default()
        }
    }

    fn create_image_with_memory(
        &self,
        _info: &vk::ImageCreateInfo<'_>,
        _properties: vk::MemoryPropertyFlags,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let mut s = self.state.borrow_mut();
        let image = s.alloc(Kind::Image)?;
        let memory = match s.alloc(Kind::Memory) {
            Ok(m) => m,
            Err(e) => {
                s.release(Kind::Image, image);
                return Err(e);
            }
        };
        Ok((vk::Image::from_raw(image), vk::DeviceMemory::from_raw(memory)))
    }

    fn destroy_image_with_memory(&self, image: vk::Image, memory: vk::DeviceMemory) {
        let mut s = self.state.borrow_mut();
        let raw = image.as_raw();
        if s.live.get(&raw) == Some(&Kind::SwapchainImage) {
            s.violate(format!("destroyed swapchain-owned image {raw}"));
            return;
        }
        if s.views.values().any(|&img| img == raw) {
            s.violate(format!("image {raw} destroyed while a view still uses it"));
        }
        s.release(Kind::Image, raw);
        s.release(Kind::Memory, memory.as_raw());
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        let mut s = self.state.borrow_mut();
        let image = info.image.as_raw();
        if !matches!(s.live.get(&image), Some(Kind::Image | Kind::SwapchainImage)) {
            s.violate(format!("view created for unknown image {image}"));
        }
        let raw = s.alloc(Kind::ImageView)?;
        s.views.insert(raw, image);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.borrow_mut();
        let raw = view.as_raw();
        if s.framebuffers.values().any(|(_, atts)| atts.contains(&raw)) {
            s.violate(format!("view {raw} destroyed while a framebuffer still uses it"));
        }
        s.views.remove(&raw);
        s.release(Kind::ImageView, raw);
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.borrow_mut();
        let queue_family_indices = if info.queue_family_index_count > 0 {
            // SAFETY: the caller's create info keeps the index array alive for this call.
            unsafe {
                std::slice::from_raw_parts(
                    info.p_queue_family_indices,
                    info.queue_family_index_count as usize,
                )
            }
            .to_vec()
        } else {
            Vec::new()
        };
        s.swapchain_records.push(SwapchainRecord {
            min_image_count: info.min_image_count,
            format: info.image_format,
            extent: info.image_extent,
            present_mode: info.present_mode,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices,
        });

        let raw = s.alloc(Kind::Swapchain)?;
        let count = self.forced_image_count.unwrap_or(info.min_image_count);
        let mut images = Vec::with_capacity(count as usize);
        for _ in 0..count {
            images.push(vk::Image::from_raw(s.alloc(Kind::SwapchainImage)?));
        }
        s.swapchain_images.insert(raw, images);
        s.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        let images = s.swapchain_images.remove(&raw).unwrap_or_default();
        for image in images {
            let image = image.as_raw();
            if s.views.values().any(|&img| img == image) {
                s.violate(format!("swapchain {raw} destroyed while image {image} has a view"));
            }
            s.release(Kind::SwapchainImage, image);
        }
        s.release(Kind::Swapchain, raw);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        let raw = self.state.borrow_mut().alloc(Kind::RenderPass)?;
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.state.borrow_mut();
        let raw = render_pass.as_raw();
        if s.framebuffers.values().any(|(rp, _)| *rp == raw) {
            s.violate(format!("render pass {raw} destroyed before its framebuffers"));
        }
        s.release(Kind::RenderPass, raw);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        let mut s = self.state.borrow_mut();
        // SAFETY: the caller's create info keeps the attachment array alive for this call.
        let attachments = unsafe {
            std::slice::from_raw_parts(info.p_attachments, info.attachment_count as usize)
        }
        .to_vec();
        let raw = s.alloc(Kind::Framebuffer)?;
        let handle = vk::Framebuffer::from_raw(raw);
        s.framebuffers.insert(
            raw,
            (
                info.render_pass.as_raw(),
                attachments.iter().map(|v| v.as_raw()).collect(),
            ),
        );
        s.framebuffer_records.push(FramebufferRecord {
            handle,
            render_pass: info.render_pass,
            attachments,
            width: info.width,
            height: info.height,
            layers: info.layers,
        });
        Ok(handle)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.state.borrow_mut();
        let raw = framebuffer.as_raw();
        s.framebuffers.remove(&raw);
        s.release(Kind::Framebuffer, raw);
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::Semaphore)?;
        s.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.borrow_mut();
        let raw = semaphore.as_raw();
        s.semaphores.remove(&raw);
        s.release(Kind::Semaphore, raw);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::Fence)?;
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(raw, state);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        if s.fences.remove(&raw) == Some(FenceState::Pending) {
            s.violate(format!("fence {raw} destroyed while its work is pending"));
        }
        s.release(Kind::Fence, raw);
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        match s.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => {
                s.events.push(Event::WaitFence { fence, blocked: false });
                Ok(())
            }
            Some(FenceState::Pending) => {
                s.fences.insert(raw, FenceState::Signaled);
                s.events.push(Event::WaitFence { fence, blocked: true });
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                s.violate(format!("wait on fence {raw} that nothing will signal"));
                Err(vk::Result::TIMEOUT)
            }
            None => {
                s.violate(format!("wait on unknown fence {raw}"));
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        match s.fences.get(&raw).copied() {
            Some(FenceState::Pending) => {
                s.violate(format!("fence {raw} reset while its work is pending"));
            }
            None => {
                s.violate(format!("reset of unknown fence {raw}"));
                return Err(vk::Result::ERROR_DEVICE_LOST);
            }
            _ => {}
        }
        s.fences.insert(raw, FenceState::Unsignaled);
        s.events.push(Event::ResetFence(fence));
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        for state in s.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        s.events.push(Event::WaitIdle);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Acquire { signal });
        let count = s
            .swapchain_images
            .get(&swapchain.as_raw())
            .map(Vec::len)
            .unwrap_or(0) as u32;
        let result = match s.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None if count == 0 => Err(vk::Result::ERROR_SURFACE_LOST_KHR),
            None => {
                let index = s.next_image % count;
                s.next_image += 1;
                Ok((index, false))
            }
        };
        if result.is_ok() {
            let raw = signal.as_raw();
            match s.semaphores.get(&raw).copied() {
                Some(true) => s.violate(format!("acquire signals semaphore {raw} that is already signaled")),
                None => s.violate(format!("acquire signals unknown semaphore {raw}")),
                Some(false) => {}
            }
            s.semaphores.insert(raw, true);
        }
        result
    }

    fn submit_graphics(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Submit {
            command_buffers: command_buffers.to_vec(),
            wait,
            wait_stage,
            signal,
            fence,
        });
        if let Some(e) = s.submit_failure.take() {
            return Err(e);
        }

        let fence_raw = fence.as_raw();
        if s.fences.get(&fence_raw) != Some(&FenceState::Unsignaled) {
            s.violate(format!("submit with fence {fence_raw} that was not reset"));
        }
        s.fences.insert(fence_raw, FenceState::Pending);

        let wait_raw = wait.as_raw();
        if s.semaphores.get(&wait_raw) != Some(&true) {
            s.violate(format!("submit waits on semaphore {wait_raw} nothing signaled"));
        }
        s.semaphores.insert(wait_raw, false);

        let signal_raw = signal.as_raw();
        if s.semaphores.get(&signal_raw) == Some(&true) {
            s.violate(format!("submit signals semaphore {signal_raw} that is already signaled"));
        }
        s.semaphores.insert(signal_raw, true);
        Ok(())
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.events.push(Event::Present { wait, image_index });
        if !s.swapchain_images.contains_key(&swapchain.as_raw()) {
            s.violate(format!("present to unknown swapchain {}", swapchain.as_raw()));
        }
        let raw = wait.as_raw();
        if s.semaphores.get(&raw) != Some(&true) {
            s.violate(format!("present waits on semaphore {raw} nothing signaled"));
        }
        s.semaphores.insert(raw, false);
        s.present_script.pop_front().unwrap_or(Ok(false))
    }
}

/// Distinct fences waited on, in first-wait order.
pub fn waited_fences(events: &[Event]) -> Vec<vk::Fence> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter_map(|e| match e {
            Event::WaitFence { fence, .. } if seen.insert(*fence) => Some(*fence),
            _ => None,
        })
        .collect()
}
