use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{error, info, warn};
use parking_lot::RwLock;
use rosc::{OscMessage, OscPacket, OscType};

use crate::base::parser::{self, VGenRegistry};
use crate::osc::commands::{parse_address, Command, COMMAND_PREFIX};
use crate::render::compositor::CompositorCommand;
use crate::render::frame_timer::SharedFrameStats;
use crate::render::offscreen::OffscreenHandle;
use crate::render::sampler::SamplerFactory;
use crate::render::scinth::Scinth;
use crate::render::scinthdef::ScinthDef;
use crate::render::RenderContext;
use crate::VERSION;

/// When the server volunteers error replies: never, for failing recognized
/// commands, or additionally for unrecognized ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Silent,
    PerCommand,
    All,
}

pub type ScinthDefRegistry = Arc<RwLock<HashMap<String, Arc<ScinthDef>>>>;

/// Decodes datagrams into commands and mutates the running node tree.
/// Handlers run on the control thread only; everything they share with the
/// render loop goes through the compositor channel or a lock.
pub struct Dispatcher {
    ctx: Arc<RenderContext>,
    vgens: Arc<VGenRegistry>,
    defs: ScinthDefRegistry,
    sampler_factory: Arc<SamplerFactory>,
    compositor: Sender<CompositorCommand>,
    stats: SharedFrameStats,
    node_count: Arc<AtomicUsize>,
    offscreen: Option<OffscreenHandle>,
    quit: Arc<AtomicBool>,
    socket: Arc<UdpSocket>,

    canvas_size: (u32, u32),
    target_format: wgpu::TextureFormat,
    num_images: usize,

    dump_osc: bool,
    error_policy: ErrorPolicy,
    notify_clients: HashSet<SocketAddr>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<RenderContext>,
        vgens: Arc<VGenRegistry>,
        defs: ScinthDefRegistry,
        sampler_factory: Arc<SamplerFactory>,
        compositor: Sender<CompositorCommand>,
        stats: SharedFrameStats,
        node_count: Arc<AtomicUsize>,
        offscreen: Option<OffscreenHandle>,
        quit: Arc<AtomicBool>,
        socket: Arc<UdpSocket>,
        canvas_size: (u32, u32),
        target_format: wgpu::TextureFormat,
        num_images: usize,
    ) -> Dispatcher {
        Dispatcher {
            ctx,
            vgens,
            defs,
            sampler_factory,
            compositor,
            stats,
            node_count,
            offscreen,
            quit,
            socket,
            canvas_size,
            target_format,
            num_images,
            dump_osc: false,
            error_policy: ErrorPolicy::Silent,
            notify_clients: HashSet::new(),
        }
    }

    pub fn handle_datagram(&mut self, bytes: &[u8], sender: SocketAddr) {
        match rosc::decoder::decode_udp(bytes) {
            Ok((_, packet)) => self.handle_packet(packet, sender),
            Err(err) => {
                error!("malformed OSC datagram from {}: {:?}", sender, err);
                self.report_error(sender, "decode", &format!("{:?}", err), true);
            }
        }
    }

    fn handle_packet(&mut self, packet: OscPacket, sender: SocketAddr) {
        match packet {
            OscPacket::Message(message) => self.handle_message(message, sender),
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    self.handle_packet(packet, sender);
                }
            }
        }
    }

    fn handle_message(&mut self, message: OscMessage, sender: SocketAddr) {
        if self.dump_osc {
            info!("OSC from {}: {} {:?}", sender, message.addr, message.args);
        }
        if !message.addr.starts_with(COMMAND_PREFIX) {
            error!(
                "OSC command {} does not have {} prefix, ignoring",
                message.addr, COMMAND_PREFIX
            );
            self.report_error(sender, &message.addr, "missing /scin_ prefix", true);
            return;
        }
        let Some(command) = parse_address(&message.addr) else {
            error!("unsupported OSC command {}", message.addr);
            self.report_error(sender, &message.addr, "unknown command", true);
            return;
        };

        let args = message.args;
        match command {
            Command::Quit => self.handle_quit(sender),
            Command::Status => self.handle_status(sender),
            Command::Notify => self.handle_notify(&args, sender),
            Command::DumpOsc => {
                self.dump_osc = int_arg(&args, 0).unwrap_or(0) != 0;
            }
            Command::Error => {
                self.error_policy = match int_arg(&args, 0).unwrap_or(0) {
                    0 => ErrorPolicy::Silent,
                    1 => ErrorPolicy::PerCommand,
                    _ => ErrorPolicy::All,
                };
            }
            Command::Version => {
                self.reply(
                    sender,
                    "/scin_version.reply",
                    vec![OscType::String(VERSION.to_string())],
                );
            }
            Command::DefLoad => self.handle_def_load(&args, sender),
            Command::DefReceive => self.handle_def_receive(&args, sender),
            Command::DefFree => self.handle_def_free(&args, sender),
            Command::ScinthNew => self.handle_scinth_new(&args, sender),
            Command::NodeFree => self.handle_node_free(&args),
            Command::NodeRun => self.handle_node_run(&args),
            Command::NodeSet => self.handle_node_set(&args, sender),
            Command::AdvanceFrame => self.handle_advance_frame(&args),
            Command::ScreenShot => self.handle_screen_shot(&args, sender),
        }
    }

    fn handle_quit(&mut self, sender: SocketAddr) {
        info!("got quit command, terminating");
        self.reply(sender, "/scin_done", vec![OscType::String("quit".to_string())]);
        for client in self.notify_clients.clone() {
            if client != sender {
                self.reply(client, "/scin_done", vec![OscType::String("quit".to_string())]);
            }
        }
        self.quit.store(true, Ordering::Relaxed);
        if let Some(offscreen) = &self.offscreen {
            offscreen.stop();
        }
    }

    fn handle_status(&mut self, sender: SocketAddr) {
        let stats = self.stats.snapshot();
        self.reply(
            sender,
            "/scin_status.reply",
            vec![
                OscType::Int(self.node_count.load(Ordering::Relaxed) as i32),
                OscType::Float(stats.mean_frame_rate as f32),
                OscType::Int(stats.total_late_frames as i32),
                OscType::Int(stats.target_frame_rate),
            ],
        );
    }

    fn handle_notify(&mut self, args: &[OscType], sender: SocketAddr) {
        match int_arg(args, 0) {
            Some(0) => {
                self.notify_clients.remove(&sender);
            }
            Some(_) => {
                self.notify_clients.insert(sender);
            }
            None => {
                self.report_error(sender, "notify", "expected integer argument", false);
                return;
            }
        }
        self.reply(sender, "/scin_done", vec![OscType::String("notify".to_string())]);
    }

    fn handle_def_load(&mut self, args: &[OscType], sender: SocketAddr) {
        let Some(path) = str_arg(args, 0) else {
            self.report_error(sender, "d_load", "expected file path argument", false);
            return;
        };
        match parser::load_scinthdefs_file(&self.vgens, std::path::Path::new(path)) {
            Ok(defs) => {
                let realized = self.realize_defs(defs);
                self.reply(
                    sender,
                    "/scin_done",
                    vec![
                        OscType::String("d_load".to_string()),
                        OscType::Int(realized as i32),
                    ],
                );
            }
            Err(err) => {
                error!("d_load of {} failed: {}", path, err);
                self.report_error(sender, "d_load", &err.to_string(), false);
            }
        }
    }

    fn handle_def_receive(&mut self, args: &[OscType], sender: SocketAddr) {
        let Some(yaml) = str_arg(args, 0) else {
            self.report_error(sender, "d_recv", "expected yaml string argument", false);
            return;
        };
        let defs = parser::parse_scinthdefs_str(&self.vgens, yaml);
        let realized = self.realize_defs(defs);
        self.reply(
            sender,
            "/scin_done",
            vec![
                OscType::String("d_recv".to_string()),
                OscType::Int(realized as i32),
            ],
        );
    }

    /// Builds parsed defs on the GPU and registers them. A def that fails
    /// to realize is dropped without touching its registered predecessor.
    fn realize_defs(&mut self, defs: Vec<crate::base::scinthdef::AbstractScinthDef>) -> usize {
        let mut realized = 0;
        for abstract_def in defs {
            let name = abstract_def.name().to_string();
            match ScinthDef::build(
                &self.ctx,
                &self.sampler_factory,
                Arc::new(abstract_def),
                self.canvas_size,
                self.target_format,
            ) {
                Ok(def) => {
                    self.defs.write().insert(name, Arc::new(def));
                    realized += 1;
                }
                Err(err) => error!("scinthdef {} failed to realize: {}", name, err),
            }
        }
        realized
    }

    fn handle_def_free(&mut self, args: &[OscType], sender: SocketAddr) {
        for arg in args {
            match arg {
                OscType::String(name) => {
                    if self.defs.write().remove(name).is_none() {
                        warn!("d_free of unknown scinthdef {}", name);
                    }
                }
                other => {
                    self.report_error(
                        sender,
                        "d_free",
                        &format!("expected name, got {:?}", other),
                        false,
                    );
                }
            }
        }
    }

    fn handle_scinth_new(&mut self, args: &[OscType], sender: SocketAddr) {
        let Some(def_name) = str_arg(args, 0) else {
            self.report_error(sender, "s_new", "expected scinthdef name", false);
            return;
        };
        let Some(node_id) = int_arg(args, 1) else {
            self.report_error(sender, "s_new", "expected node id", false);
            return;
        };
        let Some(def) = self.defs.read().get(def_name).cloned() else {
            error!("s_new references unknown scinthdef {}", def_name);
            self.report_error(sender, "s_new", "unknown scinthdef", false);
            return;
        };

        match Scinth::new(&self.ctx, def, node_id, self.num_images) {
            Ok(mut scinth) => {
                // Initial parameter values apply before the first frame.
                let (by_name, by_index) = parse_parameter_pairs(&args[2..]);
                for (name, value) in by_name {
                    scinth.set_parameter_by_name(&name, value);
                }
                for (index, value) in by_index {
                    scinth.set_parameter_by_index(index, value);
                }
                let _ = self.compositor.send(CompositorCommand::Play(Box::new(scinth)));
            }
            Err(err) => {
                error!("failed to build scinth {}: {}", node_id, err);
                self.report_error(sender, "s_new", &err.to_string(), false);
            }
        }
    }

    fn handle_node_free(&mut self, args: &[OscType]) {
        let node_ids: Vec<i32> = args.iter().filter_map(as_int).collect();
        if !node_ids.is_empty() {
            let _ = self.compositor.send(CompositorCommand::Free(node_ids));
        }
    }

    fn handle_node_run(&mut self, args: &[OscType]) {
        for pair in args.chunks(2) {
            if let [id, run] = pair {
                if let (Some(node_id), Some(run)) = (as_int(id), as_int(run)) {
                    let _ = self
                        .compositor
                        .send(CompositorCommand::Run(node_id, run != 0));
                }
            }
        }
    }

    fn handle_node_set(&mut self, args: &[OscType], sender: SocketAddr) {
        let Some(node_id) = int_arg(args, 0) else {
            self.report_error(sender, "n_set", "expected node id", false);
            return;
        };
        let (by_name, by_index) = parse_parameter_pairs(&args[1..]);
        if !by_name.is_empty() {
            let _ = self
                .compositor
                .send(CompositorCommand::SetByName(node_id, by_name));
        }
        if !by_index.is_empty() {
            let _ = self
                .compositor
                .send(CompositorCommand::SetByIndex(node_id, by_index));
        }
    }

    fn handle_advance_frame(&mut self, args: &[OscType]) {
        let Some(offscreen) = &self.offscreen else {
            warn!("nrt_advanceFrame without offscreen engine");
            return;
        };
        let frames = int_arg(args, 0).unwrap_or(1).max(0);
        let dt = float_arg(args, 1);
        for _ in 0..frames {
            match dt {
                Some(dt) => offscreen.render_frame(dt as f64),
                None => offscreen.advance_frame(),
            }
        }
    }

    fn handle_screen_shot(&mut self, args: &[OscType], sender: SocketAddr) {
        let Some(offscreen) = &self.offscreen else {
            warn!("nrt_screenShot without offscreen engine");
            return;
        };
        let Some(path) = str_arg(args, 0) else {
            self.report_error(sender, "nrt_screenShot", "expected file path", false);
            return;
        };
        offscreen.add_encoder(Box::new(crate::av::PngEncoder::new(
            std::path::PathBuf::from(path),
        )));
        self.reply(
            sender,
            "/scin_done",
            vec![
                OscType::String("nrt_screenShot".to_string()),
                OscType::String(path.to_string()),
            ],
        );
    }

    fn reply(&self, to: SocketAddr, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        match rosc::encoder::encode(&packet) {
            Ok(bytes) => {
                if let Err(err) = self.socket.send_to(&bytes, to) {
                    error!("failed to send reply to {}: {}", to, err);
                }
            }
            Err(err) => error!("failed to encode reply: {:?}", err),
        }
    }

    /// Error replies follow the policy: silent drops everything,
    /// per-command replies for failing recognized commands, all
    /// additionally replies for unknown/unparseable traffic.
    fn report_error(&self, to: SocketAddr, context: &str, message: &str, unknown: bool) {
        let send = match self.error_policy {
            ErrorPolicy::Silent => false,
            ErrorPolicy::PerCommand => !unknown,
            ErrorPolicy::All => true,
        };
        if send {
            self.reply(
                to,
                "/scin_error",
                vec![
                    OscType::String(context.to_string()),
                    OscType::String(message.to_string()),
                ],
            );
        }
    }
}

fn as_int(arg: &OscType) -> Option<i32> {
    match arg {
        OscType::Int(value) => Some(*value),
        OscType::Long(value) => Some(*value as i32),
        _ => None,
    }
}

fn as_float(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(value) => Some(*value),
        OscType::Double(value) => Some(*value as f32),
        OscType::Int(value) => Some(*value as f32),
        _ => None,
    }
}

fn int_arg(args: &[OscType], index: usize) -> Option<i32> {
    args.get(index).and_then(as_int)
}

fn float_arg(args: &[OscType], index: usize) -> Option<f32> {
    args.get(index).and_then(as_float)
}

fn str_arg(args: &[OscType], index: usize) -> Option<&str> {
    match args.get(index) {
        Some(OscType::String(value)) => Some(value),
        _ => None,
    }
}

/// Splits alternating key/value arguments into by-name and by-index
/// parameter updates; keys may be strings or integer indices. Malformed
/// pairs are skipped.
fn parse_parameter_pairs(args: &[OscType]) -> (Vec<(String, f32)>, Vec<(usize, f32)>) {
    let mut by_name = Vec::new();
    let mut by_index = Vec::new();
    for pair in args.chunks(2) {
        let [key, value] = pair else {
            warn!("dangling parameter key {:?}", pair);
            break;
        };
        let Some(value) = as_float(value) else {
            warn!("non-numeric parameter value {:?}", value);
            continue;
        };
        match key {
            OscType::String(name) => by_name.push((name.clone(), value)),
            OscType::Int(index) if *index >= 0 => by_index.push((*index as usize, value)),
            other => warn!("unsupported parameter key {:?}", other),
        }
    }
    (by_name, by_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_pairs_split_by_key_kind() {
        let args = vec![
            OscType::String("bright".to_string()),
            OscType::Float(0.5),
            OscType::Int(2),
            OscType::Float(1.5),
            OscType::String("rate".to_string()),
            OscType::Int(3),
        ];
        let (by_name, by_index) = parse_parameter_pairs(&args);
        assert_eq!(
            by_name,
            vec![("bright".to_string(), 0.5), ("rate".to_string(), 3.0)]
        );
        assert_eq!(by_index, vec![(2, 1.5)]);
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let args = vec![
            OscType::String("a".to_string()),
            OscType::String("not-a-number".to_string()),
            OscType::Int(-4),
            OscType::Float(1.0),
            OscType::String("dangling".to_string()),
        ];
        let (by_name, by_index) = parse_parameter_pairs(&args);
        assert!(by_name.is_empty());
        assert!(by_index.is_empty());
    }

    #[test]
    fn numeric_coercions() {
        assert_eq!(as_float(&OscType::Int(2)), Some(2.0));
        assert_eq!(as_float(&OscType::Double(0.25)), Some(0.25));
        assert_eq!(as_int(&OscType::Long(7)), Some(7));
        assert_eq!(as_int(&OscType::Float(1.0)), None);
    }
}
