// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use frameline_core::init_tracing;
use frameline_platform::client_size;
use frameline_render::{RenderSize, Renderer};
use frameline_render_vk::{DeviceOptions, VkOptions, VkRenderer};
use tracing::{error, info};

use frameline_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, AppCfg, PresentModeCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the TOML config file
    #[arg(long, default_value = "frameline.toml")]
    config: PathBuf,

    /// Override the configured present mode
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

struct App {
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    cfg: AppCfg,
    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(Window::default_attributes().with_title("frameline"))?;
        self.render_size = client_size(&window);

        let options = VkOptions {
            chain: self.cfg.render.chain_config(),
            device: DeviceOptions {
                validation: self.cfg.render.validation,
            },
        };
        let mut renderer = {
            let wh = window.window_handle()?;
            let dh = window.display_handle()?;
            VkRenderer::with_options(&wh, &dh, self.render_size, options)?
        };
        renderer.set_clear_color(self.cfg.render.clear_color);

        info!(
            "present mode = {:?}, frames in flight = {}",
            renderer.swapchain().present_mode(),
            renderer.swapchain().frames_in_flight()
        );
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("renderer init failed: {e:#}");
                self.exiting = true;
                event_loop.exit();
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                // renderer before the window it presents to
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_empty();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                        self.exiting = true;
                        event_loop.exit();
                        return;
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Some(renderer) = &mut self.renderer {
                    match renderer.render() {
                        Ok(()) => self.frames = self.frames.saturating_add(1),
                        Err(e) => {
                            error!("render error: {e:#}");
                            self.exiting = true;
                            event_loop.exit();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if self.paused {
            self.frames = 0;
            return;
        }
        // acquire/present pace the loop
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(mode) = args.present_mode {
        cfg.render.present_mode = mode;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        window: None,
        renderer: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        cfg,
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
