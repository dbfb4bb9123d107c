use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;

use crate::render::scinth::Scinth;
use crate::render::{RenderDevice, RenderQueue};

/// Structural mutations of the node tree. The dispatcher never touches the
/// Scinth list directly: commands are queued from the control thread and
/// applied on the render thread between frames, so recording never races a
/// mutation. Commands for the same node apply in arrival order.
pub enum CompositorCommand {
    Play(Box<Scinth>),
    Free(Vec<i32>),
    Run(i32, bool),
    SetByName(i32, Vec<(String, f32)>),
    SetByIndex(i32, Vec<(usize, f32)>),
}

/// Ordered collection of live Scinths and the per-frame command-buffer
/// assembly against a target framebuffer.
pub struct Compositor {
    scinths: Vec<Scinth>,
    commands: Receiver<CompositorCommand>,
    node_count: Arc<AtomicUsize>,
}

impl Compositor {
    pub fn new() -> (Compositor, Sender<CompositorCommand>, Arc<AtomicUsize>) {
        let (sender, receiver) = unbounded();
        let node_count = Arc::new(AtomicUsize::new(0));
        (
            Compositor {
                scinths: Vec::new(),
                commands: receiver,
                node_count: node_count.clone(),
            },
            sender,
            node_count,
        )
    }

    /// Drains queued structural commands. Runs on the render thread only.
    pub fn process_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                CompositorCommand::Play(scinth) => {
                    // A node id can only be claimed once; replaying replaces.
                    self.scinths.retain(|s| s.node_id() != scinth.node_id());
                    self.scinths.push(*scinth);
                }
                CompositorCommand::Free(node_ids) => {
                    self.scinths.retain(|s| !node_ids.contains(&s.node_id()));
                }
                CompositorCommand::Run(node_id, run) => {
                    match self.scinth_mut(node_id) {
                        Some(scinth) => scinth.set_running(run),
                        None => warn!("run command for unknown node {}", node_id),
                    }
                }
                CompositorCommand::SetByName(node_id, pairs) => {
                    match self.scinth_mut(node_id) {
                        Some(scinth) => {
                            for (name, value) in pairs {
                                scinth.set_parameter_by_name(&name, value);
                            }
                        }
                        None => warn!("set command for unknown node {}", node_id),
                    }
                }
                CompositorCommand::SetByIndex(node_id, pairs) => {
                    match self.scinth_mut(node_id) {
                        Some(scinth) => {
                            for (index, value) in pairs {
                                scinth.set_parameter_by_index(index, value);
                            }
                        }
                        None => warn!("set command for unknown node {}", node_id),
                    }
                }
            }
        }
        self.node_count.store(self.scinths.len(), Ordering::Relaxed);
    }

    fn scinth_mut(&mut self, node_id: i32) -> Option<&mut Scinth> {
        self.scinths.iter_mut().find(|s| s.node_id() == node_id)
    }

    /// Assembles one frame: drains commands, runs compute passes, then a
    /// single render pass executing each running Scinth's bundle in play
    /// order.
    pub fn encode_frame(
        &mut self,
        device: &RenderDevice,
        queue: &RenderQueue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        image_index: usize,
        frame_time: f64,
    ) {
        self.process_commands();

        let mut active = Vec::new();
        for (index, scinth) in self.scinths.iter_mut().enumerate() {
            if scinth.prepare_frame(device, queue, image_index, frame_time) {
                active.push(index);
            }
        }

        for &index in active.iter() {
            self.scinths[index].record_compute(encoder, image_index);
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("compositor pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: true,
                },
            })],
            depth_stencil_attachment: None,
        });
        pass.execute_bundles(active.iter().map(|&index| self.scinths[index].bundle(image_index)));
    }

    pub fn node_count(&self) -> usize {
        self.scinths.len()
    }

    /// Drops every live Scinth. Called at teardown after in-flight frames
    /// have completed.
    pub fn clear(&mut self) {
        self.scinths.clear();
        self.node_count.store(0, Ordering::Relaxed);
    }
}
