// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use frameline_render::RenderSize;
use winit::window::Window;

/// Current client-area size of `window`; zero while minimized on most platforms.
pub fn client_size(window: &Window) -> RenderSize {
    let size = window.inner_size();
    RenderSize {
        width: size.width,
        height: size.height,
    }
}
