// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use prism_core::{init_tracing, FrameRateCounter};
use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use prism_platform::{create_window, is_quit_request};
use prism_render::{RenderSettings, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use tracing::{error, info};

mod config;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means built-in defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// OBJ file for the monkey mesh (overrides the config file)
    #[arg(long)]
    monkey: Option<PathBuf>,
}

struct App {
    cfg: AppCfg,
    settings: RenderSettings,
    // Dropped before the window: the surface must go first.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    exiting: bool,
    fps: FrameRateCounter,
    /// First fatal error; `main` returns it once the loop has exited.
    failure: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let want = self.cfg.window_size();
        let window = match create_window(event_loop, &self.cfg.window.title, want.width, want.height)
        {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, e.context("window creation failed"));
                return;
            }
        };

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        match VkRenderer::new(&window, &window, self.render_size, &self.settings) {
            Ok(r) => {
                info!(
                    "vk renderer up: {}x{}, {} objects",
                    self.render_size.width,
                    self.render_size.height,
                    r.scene().len()
                );
                self.renderer = Some(r);
            }
            Err(e) => {
                self.window = Some(window);
                self.fail(event_loop, e.context("vk init failed"));
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
        self.fps.reset(Instant::now());
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

        if is_quit_request(&event) {
            info!("quit requested");
            self.shutdown(event_loop);
            return;
        }

        match event {
            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.render_size.is_empty() {
                    return;
                }
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.render() {
                    Ok(true) => self.fps.frame(),
                    Ok(false) => {}
                    Err(e) => {
                        let frame = r.frame_number();
                        self.fail(event_loop, e.context(format!("render error at frame {frame}")));
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

        if self.render_size.is_empty() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.fps.reset(Instant::now());
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(frames) = self.fps.tick(Instant::now()) {
            info!("fps ~ {}", frames);
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = load_cfg(&args.config);
    let mut settings = cfg.clone().into_settings();
    if let Some(monkey) = args.monkey {
        settings.monkey_mesh = monkey;
    }
    info!(
        "shaders from {}, monkey from {}",
        prism_render_vk::shader_dir(&settings).display(),
        settings.monkey_mesh.display()
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        render_size: cfg.window_size(),
        cfg,
        settings,
        renderer: None,
        window: None,
        exiting: false,
        fps: FrameRateCounter::default(),
        failure: None,
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
