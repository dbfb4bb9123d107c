use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    platform::run_return::EventLoopExtRunReturn,
    window::WindowBuilder,
};

use crate::error::{Error, Result};
use crate::render::compositor::Compositor;
use crate::render::frame_timer::FrameTimer;
use crate::render::RenderContext;

/// The realtime presentation path: one primary window, its surface, and a
/// vsync-paced redraw loop driving the compositor.
pub struct ServerWindow {
    // Field order matters: the surface must drop before the window whose
    // handle it was created from.
    surface: wgpu::Surface,
    window: winit::window::Window,
    event_loop: EventLoop<()>,
    format: Option<wgpu::TextureFormat>,
}

impl ServerWindow {
    /// Creates the window and its surface. Must run on the main thread;
    /// the render context is created afterwards against this surface.
    pub fn create(instance: &wgpu::Instance, width: u32, height: u32) -> Result<ServerWindow> {
        let event_loop = EventLoop::new();
        let window = WindowBuilder::new()
            .with_title("scinsynth")
            .with_inner_size(winit::dpi::PhysicalSize::new(width, height))
            .with_resizable(true)
            .build(&event_loop)
            .map_err(|err| Error::GpuResource(format!("window creation failed: {}", err)))?;
        let surface = unsafe { instance.create_surface(&window) };
        Ok(ServerWindow {
            surface,
            window,
            event_loop,
            format: None,
        })
    }

    pub fn surface(&self) -> &wgpu::Surface {
        &self.surface
    }

    /// Picks and remembers the surface format; ScinthDef pipelines must
    /// target it.
    pub fn configure(&mut self, ctx: &RenderContext) -> Result<wgpu::TextureFormat> {
        let format = self
            .surface
            .get_supported_formats(&ctx.adapter)
            .first()
            .copied()
            .ok_or_else(|| Error::GpuResource("surface has no supported formats".to_string()))?;
        let size = self.window.inner_size();
        self.surface
            .configure(&ctx.device, &surface_config(format, size.width, size.height));
        self.format = Some(format);
        Ok(format)
    }

    /// Runs the event loop until the window closes or `quit` is raised.
    /// Each redraw assembles one compositor frame against the acquired
    /// surface texture; presentation is vsync-paced.
    pub fn run(
        mut self,
        ctx: &RenderContext,
        compositor: &mut Compositor,
        frame_timer: &mut FrameTimer,
        quit: Arc<AtomicBool>,
        num_images: usize,
    ) {
        let format = match self.format {
            Some(format) => format,
            None => {
                error!("window run without configured surface");
                return;
            }
        };
        let mut size = self.window.inner_size();
        let mut frame_index = 0usize;
        let loop_start = std::time::Instant::now();
        frame_timer.start();

        let window = &self.window;
        let surface = &self.surface;
        self.event_loop.run_return(|event, _, control_flow| {
            *control_flow = ControlFlow::Poll;
            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        info!("window close requested");
                        *control_flow = ControlFlow::Exit;
                    }
                    WindowEvent::Resized(new_size) => {
                        size = new_size;
                        if size.width > 0 && size.height > 0 {
                            surface.configure(
                                &ctx.device,
                                &surface_config(format, size.width, size.height),
                            );
                        }
                    }
                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        size = *new_inner_size;
                        if size.width > 0 && size.height > 0 {
                            surface.configure(
                                &ctx.device,
                                &surface_config(format, size.width, size.height),
                            );
                        }
                    }
                    _ => {}
                },
                Event::MainEventsCleared => {
                    if quit.load(Ordering::Relaxed) {
                        *control_flow = ControlFlow::Exit;
                        return;
                    }
                    window.request_redraw();
                }
                Event::RedrawRequested(_) => {
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    let surface_texture = match surface.get_current_texture() {
                        Ok(texture) => texture,
                        Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                            surface.configure(
                                &ctx.device,
                                &surface_config(format, size.width, size.height),
                            );
                            match surface.get_current_texture() {
                                Ok(texture) => texture,
                                Err(err) => {
                                    error!("could not reacquire surface texture: {}", err);
                                    *control_flow = ControlFlow::Exit;
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            error!("surface error: {}", err);
                            *control_flow = ControlFlow::Exit;
                            return;
                        }
                    };
                    let view = surface_texture
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());

                    let mut encoder =
                        ctx.device
                            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                                label: Some("window frame"),
                            });
                    let time = (std::time::Instant::now() - loop_start).as_secs_f64();
                    compositor.encode_frame(
                        &ctx.device,
                        &ctx.queue,
                        &mut encoder,
                        &view,
                        frame_index,
                        time,
                    );
                    ctx.queue.submit(std::iter::once(encoder.finish()));
                    surface_texture.present();

                    frame_timer.mark_frame();
                    frame_index = (frame_index + 1) % num_images;
                }
                _ => {}
            }
        });

        quit.store(true, Ordering::Relaxed);
        compositor.clear();
    }
}

fn surface_config(
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::SurfaceConfiguration {
    wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width,
        height,
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
    }
}
