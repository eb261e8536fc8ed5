// SPDX-License-Identifier: CEPL-1.0
//! Surface format, depth format, present mode and extent choices.

use ash::vk;
use frameline_render::RenderSize;

use crate::error::{ChainError, ChainResult};

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// How the chain should pace presentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Strict FIFO: no tearing, latency bounded by the chain length.
    #[default]
    Fifo,
    /// Mailbox when the surface offers it, FIFO otherwise.
    Mailbox,
}

/// `B8G8R8A8_UNORM` + `SRGB_NONLINEAR` when offered, else whatever the driver
/// lists first. `formats` must not be empty.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], policy: PresentPolicy) -> vk::PresentModeKHR {
    match policy {
        PresentPolicy::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the one mode every surface must support.
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's current extent when it dictates one, else the window size
/// clamped into the surface's limits.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: window.width.min(max.width).max(min.width),
        height: window.height.min(max.height).max(min.height),
    }
}

/// One more than the minimum so the CPU never waits on the presentation engine
/// for a free image; `max_image_count == 0` means no upper bound.
pub fn desired_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> ChainResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| ChainError::NoSupportedFormat {
            candidates: candidates.to_vec(),
        })
}
