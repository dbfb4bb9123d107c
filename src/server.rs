//! Server skeleton: wires the registries, the compositor channel, the
//! dispatcher and either the offscreen engine or the window loop, and owns
//! thread startup and teardown order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;

use crate::base::parser::{self, VGenRegistry};
use crate::config::ServerOptions;
use crate::error::Error;
use crate::osc::dispatcher::{Dispatcher, ScinthDefRegistry};
use crate::osc::server::OscServer;
use crate::render::compositor::Compositor;
use crate::render::frame_timer::FrameTimer;
use crate::render::offscreen::Offscreen;
use crate::render::sampler::SamplerFactory;
use crate::render::scinthdef::ScinthDef;
use crate::render::window::ServerWindow;
use crate::render::{RenderContext, OFFSCREEN_FORMAT};

/// Distinguishes startup failures (exit code 1) from failures of a running
/// server (exit code 2).
#[derive(Debug)]
pub enum ServerError {
    Init(Error),
    Runtime(Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Init(err) => write!(f, "initialization failed: {}", err),
            ServerError::Runtime(err) => write!(f, "runtime failure: {}", err),
        }
    }
}

pub fn run(options: ServerOptions) -> std::result::Result<(), ServerError> {
    if options.offscreen {
        run_offscreen(options)
    } else {
        run_windowed(options)
    }
}

fn run_offscreen(options: ServerOptions) -> std::result::Result<(), ServerError> {
    let ctx = Arc::new(RenderContext::new_offscreen().map_err(ServerError::Init)?);
    let quit = Arc::new(AtomicBool::new(false));

    let (vgens, defs, sampler_factory) =
        build_registries(&ctx, &options, OFFSCREEN_FORMAT).map_err(ServerError::Init)?;

    let (mut compositor, compositor_tx, node_count) = Compositor::new();
    let mut frame_timer = FrameTimer::new(options.frame_rate);
    let mut offscreen = Offscreen::new(&ctx, options.width, options.height, options.num_images)
        .map_err(ServerError::Init)?;

    let osc = OscServer::bind(&options.bind_address, options.udp_port)
        .map_err(ServerError::Init)?;
    let dispatcher = Dispatcher::new(
        ctx.clone(),
        vgens,
        defs,
        sampler_factory,
        compositor_tx,
        frame_timer.shared_stats(),
        node_count,
        Some(offscreen.handle()),
        quit.clone(),
        osc.socket(),
        (options.width, options.height),
        OFFSCREEN_FORMAT,
        options.num_images,
    );
    let control_thread = osc.spawn(dispatcher, quit.clone()).map_err(ServerError::Init)?;

    info!(
        "offscreen engine running at {}x{}, frame rate {}",
        options.width, options.height, options.frame_rate
    );
    let result = offscreen.run(&ctx, &mut compositor, &mut frame_timer, options.frame_rate);

    quit.store(true, Ordering::Relaxed);
    offscreen.shutdown();
    if control_thread.join().is_err() {
        error!("control thread panicked");
    }
    info!("server shut down");
    result.map_err(ServerError::Runtime)
}

fn run_windowed(options: ServerOptions) -> std::result::Result<(), ServerError> {
    let instance = wgpu::Instance::new(wgpu::Backends::all());
    let mut window = ServerWindow::create(&instance, options.width, options.height)
        .map_err(ServerError::Init)?;
    let ctx = Arc::new(
        RenderContext::new(instance, Some(window.surface())).map_err(ServerError::Init)?,
    );
    let surface_format = window.configure(&ctx).map_err(ServerError::Init)?;
    let quit = Arc::new(AtomicBool::new(false));

    let (vgens, defs, sampler_factory) =
        build_registries(&ctx, &options, surface_format).map_err(ServerError::Init)?;

    let (mut compositor, compositor_tx, node_count) = Compositor::new();
    let mut frame_timer = FrameTimer::new(options.frame_rate);

    let osc = OscServer::bind(&options.bind_address, options.udp_port)
        .map_err(ServerError::Init)?;
    let dispatcher = Dispatcher::new(
        ctx.clone(),
        vgens,
        defs,
        sampler_factory,
        compositor_tx,
        frame_timer.shared_stats(),
        node_count,
        None,
        quit.clone(),
        osc.socket(),
        (options.width, options.height),
        surface_format,
        options.num_images,
    );
    let control_thread = osc.spawn(dispatcher, quit.clone()).map_err(ServerError::Init)?;

    info!(
        "window running at {}x{}, vsync paced",
        options.width, options.height
    );
    window.run(
        &ctx,
        &mut compositor,
        &mut frame_timer,
        quit.clone(),
        options.num_images,
    );

    quit.store(true, Ordering::Relaxed);
    if control_thread.join().is_err() {
        error!("control thread panicked");
    }
    info!("server shut down");
    Ok(())
}

/// Builds the VGen and ScinthDef registries and performs the startup
/// directory loads. Per-file failures are logged and skipped; only an
/// unreadable configured directory is fatal.
fn build_registries(
    ctx: &Arc<RenderContext>,
    options: &ServerOptions,
    target_format: wgpu::TextureFormat,
) -> crate::Result<(Arc<VGenRegistry>, ScinthDefRegistry, Arc<SamplerFactory>)> {
    let vgens = Arc::new(VGenRegistry::new());
    let defs: ScinthDefRegistry = Arc::new(RwLock::new(HashMap::new()));
    let sampler_factory = Arc::new(SamplerFactory::new(
        ctx.supports(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER),
    ));

    if let Some(dir) = &options.vgen_dir {
        for path in yaml_files(dir)? {
            match vgens.load_file(&path) {
                Ok(count) => info!("loaded {} vgens from {}", count, path.display()),
                Err(err) => error!("skipping vgen file {}: {}", path.display(), err),
            }
        }
        info!("vgen registry holds {} entries", vgens.len());
    }

    if let Some(dir) = &options.scinth_def_dir {
        for path in yaml_files(dir)? {
            match parser::load_scinthdefs_file(&vgens, &path) {
                Ok(parsed) => {
                    for abstract_def in parsed {
                        let name = abstract_def.name().to_string();
                        match ScinthDef::build(
                            ctx,
                            &sampler_factory,
                            Arc::new(abstract_def),
                            (options.width, options.height),
                            target_format,
                        ) {
                            Ok(def) => {
                                defs.write().insert(name, Arc::new(def));
                            }
                            Err(err) => error!("scinthdef {} failed to realize: {}", name, err),
                        }
                    }
                }
                Err(err) => error!("skipping scinthdef file {}: {}", path.display(), err),
            }
        }
        info!("scinthdef registry holds {} entries", defs.read().len());
    }

    Ok((vgens, defs, sampler_factory))
}

fn yaml_files(dir: &Path) -> crate::Result<Vec<std::path::PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| Error::Parse(format!("reading directory {}: {}", dir.display(), err)))?;
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.extension().map(|ext| ext == "yaml").unwrap_or(false) {
                    paths.push(path);
                }
            }
            Err(err) => warn!("skipping unreadable directory entry: {}", err),
        }
    }
    paths.sort();
    Ok(paths)
}
