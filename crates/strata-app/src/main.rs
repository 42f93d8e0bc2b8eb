// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use strata_core::{init_tracing, RenderSize};
use strata_platform::{create_window, framebuffer_size, WindowDesc};
use strata_vk::{vk, Context, ContextDesc, FrameStatus, TracingSink, FRAMES_IN_FLIGHT};
use tracing::{debug, error, info};

use strata_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "strata.toml")]
    config: PathBuf,

    /// Exit after this many presented frames (0 = until closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Disable the validation layer even if the config enables it
    #[arg(long)]
    no_validation: bool,
}

struct App {
    cfg: AppCfg,
    validation: bool,
    max_frames: u64,

    // Dropped before the window: the surface refers to it.
    ctx: Option<Context>,
    cmds: Vec<vk::CommandBuffer>,
    window: Option<Window>,
    render_size: RenderSize,

    exiting: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(
            event_loop,
            &WindowDesc {
                title: self.cfg.window.title.clone(),
                width: self.cfg.window.width,
                height: self.cfg.window.height,
            },
        )?;
        self.render_size = framebuffer_size(&window);

        let desc = ContextDesc {
            app_name: self.cfg.window.title.clone(),
            validation: self.validation,
            framebuffer: self.render_size,
        };
        let ctx = Context::new(&window, &desc, Box::new(TracingSink))?;
        self.cmds = ctx
            .device()
            .create_graphics_command_buffers(FRAMES_IN_FLIGHT as u32)?;

        self.ctx = Some(ctx);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(ctx) = &self.ctx {
            if let Err(e) = ctx.device().wait_idle() {
                error!("wait_idle on shutdown: {e}");
            }
            ctx.device().free_graphics_command_buffers(&self.cmds);
        }
        self.cmds.clear();
        self.ctx = None;
        self.window = None;
    }

    /// Clear the acquired image and hand it to present.
    fn draw(&mut self) -> Result<FrameStatus> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(FrameStatus::Skipped);
        };
        let clear = self.cfg.render.clear_color;
        let cmds = &self.cmds;
        let roles = *ctx.roles();

        ctx.render_frame(self.render_size, |dev, frame, image| {
            if frame.reloaded {
                info!(
                    "chain reloaded: {}x{} {:?}",
                    frame.extent.width, frame.extent.height, frame.format
                );
            }
            let cmd = cmds[frame.slot];
            dev.record_single_use_commands(cmd, true, |rec| {
                image.transition(
                    rec,
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    Some(roles.graphics),
                );
                rec.begin_color_pass(frame.view, frame.area(), clear);
                rec.end_color_pass();
                image.transition(
                    rec,
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::AccessFlags2::NONE,
                    Some(roles.present),
                );
            })?;
            dev.submit_for_rendering(cmd, frame)?;
            Ok(())
        })
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.ctx.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("vk init failed: {e:#}");
                self.exiting = true;
                event_loop.exit();
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
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
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                debug!(
                    "Resized → {}x{}",
                    self.render_size.width, self.render_size.height
                );
                if let Some(ctx) = &mut self.ctx {
                    if let Err(e) = ctx.resize(self.render_size) {
                        error!("resize: {e:#}");
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                match self.draw() {
                    Ok(FrameStatus::Rendered) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => {
                        error!("render error: {e:#}");
                        self.exiting = true;
                        self.shutdown();
                        event_loop.exit();
                        return;
                    }
                }

                let presented = self.ctx.as_ref().map_or(0, |c| c.presented());
                if self.max_frames > 0 && presented >= self.max_frames {
                    info!("presented {presented} frames; exiting");
                    self.exiting = true;
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
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
    let cfg = load_cfg(&args.config);
    let validation = cfg.render.validation && !args.no_validation;
    info!("config: {} (validation: {validation})", args.config.display());

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        validation,
        max_frames: args.frames,
        ctx: None,
        cmds: Vec::new(),
        window: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        exiting: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    app.shutdown();
    Ok(())
}
