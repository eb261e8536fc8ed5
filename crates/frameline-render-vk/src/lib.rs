// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan presentation chain and frame synchronization.
//!
//! [`SwapChain`] owns the swapchain, its per-image views, depth buffers and
//! framebuffers, the shared render pass and the frames-in-flight ring. It is
//! generic over [`DeviceProvider`], implemented for real hardware by
//! [`AshDevice`]. [`VkRenderer`] drives it as a clear-only renderer.

mod ash_device;
mod chain;
mod device;
mod error;
mod renderer;
pub mod select;
mod swapchain;
mod sync;

pub use ash;

pub use ash_device::{AshDevice, DeviceOptions};
pub use chain::{attachment_descriptions, external_dependency, DepthAttachment, PresentChain};
pub use device::{find_memory_type, DeviceProvider, QueueFamilies, SwapchainSupport};
pub use error::{ChainError, ChainResult};
pub use renderer::{VkOptions, VkRenderer};
pub use select::{PresentPolicy, DEPTH_CANDIDATES};
pub use swapchain::{ChainConfig, SwapChain};
pub use sync::{AcquireOutcome, FrameSync, PresentOutcome, MAX_FRAMES_IN_FLIGHT};
