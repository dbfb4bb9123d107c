use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info};
use parking_lot::{Condvar, Mutex};

use crate::av::{EncodedFrame, Encoder};
use crate::error::{Error, Result};
use crate::render::compositor::Compositor;
use crate::render::frame_timer::FrameTimer;
use crate::render::{RenderContext, OFFSCREEN_FORMAT};

/// Render-loop gates shared with the control thread.
#[derive(Default)]
struct RenderFlags {
    render: bool,
    advance_frames: usize,
    manual_deltas: VecDeque<f64>,
}

/// Control surface over a running offscreen engine, safe to use from the
/// dispatcher while the render loop owns the engine itself.
#[derive(Clone)]
pub struct OffscreenHandle {
    flags: Arc<Mutex<RenderFlags>>,
    condition: Arc<Condvar>,
    encoders: Arc<Mutex<Vec<Box<dyn Encoder>>>>,
    quit: Arc<AtomicBool>,
}

impl OffscreenHandle {
    /// Pauses the render loop at the next frame boundary. Time can still be
    /// advanced with `advance_frame`.
    pub fn pause(&self) {
        self.flags.lock().render = false;
    }

    pub fn resume(&self) {
        self.flags.lock().render = true;
        self.condition.notify_all();
    }

    /// When paused at a nonzero frame rate, renders one additional frame.
    pub fn advance_frame(&self) {
        self.flags.lock().advance_frames += 1;
        self.condition.notify_all();
    }

    /// At frame rate zero, advances simulated time by `dt` seconds and
    /// renders one frame.
    pub fn render_frame(&self, dt: f64) {
        if dt < 0.0 {
            error!("ignoring render frame with negative dt {}", dt);
            return;
        }
        self.flags.lock().manual_deltas.push_back(dt);
        self.condition.notify_all();
    }

    /// Registers an encoder to receive readback frames from subsequent
    /// frames onward.
    pub fn add_encoder(&self, encoder: Box<dyn Encoder>) {
        info!("adding encoder {}", encoder.description());
        self.encoders.lock().push(encoder);
    }

    /// Stops the render loop at the next frame boundary.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::Relaxed);
        self.condition.notify_all();
    }

    pub fn stopped(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }
}

/// One slot of the offscreen pipeline: a render target plus the padded
/// staging buffer its pixels are read back through.
struct FrameSlot {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    in_flight: bool,
    frame_time: f64,
}

/// Headless pipelined render loop. `num_images` slots rotate through
/// `Idle -> Rendering -> Readback -> Encoding -> Idle`; one slot is always
/// held back for readback so rendering and encoding overlap across frames.
pub struct Offscreen {
    width: u32,
    height: u32,
    slots: Vec<FrameSlot>,
    padded_bytes_per_row: u32,
    pipeline_depth: usize,

    handle: OffscreenHandle,

    // Readback completions arrive from wgpu's mapping callbacks; frames are
    // released to encoders strictly in submission order.
    map_sender: Sender<(usize, std::result::Result<(), wgpu::BufferAsyncError>)>,
    map_receiver: Receiver<(usize, std::result::Result<(), wgpu::BufferAsyncError>)>,
    pending: VecDeque<usize>,
    mapped: HashSet<usize>,

    frame_sender: Option<Sender<EncodedFrame>>,
    encode_thread: Option<JoinHandle<()>>,
}

impl Offscreen {
    pub fn new(ctx: &RenderContext, width: u32, height: u32, num_images: usize) -> Result<Offscreen> {
        if num_images < 2 {
            return Err(Error::Validation(format!(
                "offscreen pipeline needs at least 2 images, got {}",
                num_images
            )));
        }

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let unpadded_bytes_per_row = 4 * width;
        let padding = (align - unpadded_bytes_per_row % align) % align;
        let padded_bytes_per_row = unpadded_bytes_per_row + padding;

        let mut slots = Vec::new();
        for index in 0..num_images {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("offscreen target {}", index)),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("offscreen staging {}", index)),
                size: padded_bytes_per_row as u64 * height as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            slots.push(FrameSlot {
                texture,
                view,
                staging,
                in_flight: false,
                frame_time: 0.0,
            });
        }

        let encoders: Arc<Mutex<Vec<Box<dyn Encoder>>>> = Arc::new(Mutex::new(Vec::new()));
        let (frame_sender, frame_receiver) = unbounded::<EncodedFrame>();
        let encode_thread = {
            let encoders = encoders.clone();
            std::thread::Builder::new()
                .name("encoder-fanout".to_string())
                .spawn(move || {
                    while let Ok(frame) = frame_receiver.recv() {
                        let mut encoders = encoders.lock();
                        encoders.retain_mut(|encoder| {
                            let keep = encoder.encode_frame(&frame);
                            if !keep {
                                info!("encoder {} finished", encoder.description());
                            }
                            keep
                        });
                    }
                })
                .map_err(|err| Error::GpuResource(format!("spawning encoder thread: {}", err)))?
        };

        let (map_sender, map_receiver) = unbounded();

        Ok(Offscreen {
            width,
            height,
            slots,
            padded_bytes_per_row,
            pipeline_depth: num_images - 1,
            handle: OffscreenHandle {
                flags: Arc::new(Mutex::new(RenderFlags {
                    render: true,
                    advance_frames: 0,
                    manual_deltas: VecDeque::new(),
                })),
                condition: Arc::new(Condvar::new()),
                encoders,
                quit: Arc::new(AtomicBool::new(false)),
            },
            map_sender,
            map_receiver,
            pending: VecDeque::new(),
            mapped: HashSet::new(),
            frame_sender: Some(frame_sender),
            encode_thread: Some(encode_thread),
        })
    }

    pub fn handle(&self) -> OffscreenHandle {
        self.handle.clone()
    }

    /// The blocking render loop; owns the calling thread until `stop()`.
    /// Positive frame rates advance simulated time deterministically and
    /// pace against the wall clock; -1 free-runs under late-frame tracking;
    /// 0 renders only on explicit `render_frame`/`advance_frame` calls.
    pub fn run(
        &mut self,
        ctx: &RenderContext,
        compositor: &mut Compositor,
        frame_timer: &mut FrameTimer,
        frame_rate: i32,
    ) -> Result<()> {
        let mut result = Ok(());
        let period = if frame_rate > 0 {
            1.0 / frame_rate as f64
        } else {
            0.0
        };
        let loop_start = Instant::now();
        let mut next_deadline = Instant::now();
        let mut time = 0.0f64;
        frame_timer.start();

        loop {
            let Some(dt) = self.wait_for_frame(frame_rate, period) else {
                break;
            };

            match frame_rate {
                rate if rate > 0 => time += dt,
                0 => time += dt,
                // Free run follows the wall clock.
                _ => time = (Instant::now() - loop_start).as_secs_f64(),
            }

            let Some(slot_index) = self.acquire_slot(ctx) else {
                result = Err(Error::GpuResource(
                    "offscreen readback failed, aborting render loop".to_string(),
                ));
                break;
            };

            let mut encoder = ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("offscreen frame"),
                });
            {
                let view = &self.slots[slot_index].view;
                compositor.encode_frame(
                    &ctx.device,
                    &ctx.queue,
                    &mut encoder,
                    view,
                    slot_index,
                    time,
                );
            }
            encoder.copy_texture_to_buffer(
                self.slots[slot_index].texture.as_image_copy(),
                wgpu::ImageCopyBuffer {
                    buffer: &self.slots[slot_index].staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: std::num::NonZeroU32::new(self.padded_bytes_per_row),
                        rows_per_image: std::num::NonZeroU32::new(self.height),
                    },
                },
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
            ctx.queue.submit(std::iter::once(encoder.finish()));

            self.slots[slot_index].in_flight = true;
            self.slots[slot_index].frame_time = time;
            self.pending.push_back(slot_index);

            let sender = self.map_sender.clone();
            self.slots[slot_index]
                .staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send((slot_index, result));
                });

            self.drain_completions(ctx, false);
            frame_timer.mark_frame();

            if frame_rate > 0 {
                next_deadline += Duration::from_secs_f64(period);
                let now = Instant::now();
                if next_deadline > now {
                    std::thread::sleep(next_deadline - now);
                } else {
                    // Late; resynchronize rather than spiral.
                    next_deadline = now;
                }
            }
        }

        // Drain in-flight frames before teardown, bounded by the pipeline
        // depth.
        self.drain_completions(ctx, true);
        compositor.clear();
        result
    }

    /// Blocks until the loop should render another frame, returning the
    /// simulated dt, or None on quit.
    fn wait_for_frame(&self, frame_rate: i32, period: f64) -> Option<f64> {
        let mut flags = self.handle.flags.lock();
        loop {
            if self.handle.stopped() {
                return None;
            }
            if frame_rate == 0 {
                if let Some(dt) = flags.manual_deltas.pop_front() {
                    return Some(dt);
                }
                if flags.advance_frames > 0 {
                    flags.advance_frames -= 1;
                    return Some(0.0);
                }
            } else {
                if flags.render {
                    return Some(period);
                }
                if flags.advance_frames > 0 {
                    flags.advance_frames -= 1;
                    return Some(period);
                }
            }
            self.handle.condition.wait(&mut flags);
        }
    }

    /// Finds an idle slot, blocking on readback completion when the render
    /// ring is full. Returns None only on device failure.
    fn acquire_slot(&mut self, ctx: &RenderContext) -> Option<usize> {
        loop {
            let in_flight = self.slots.iter().filter(|slot| slot.in_flight).count();
            if in_flight < self.pipeline_depth {
                if let Some(index) = self.slots.iter().position(|slot| !slot.in_flight) {
                    return Some(index);
                }
            }
            if !self.drain_completions(ctx, true) {
                return None;
            }
        }
    }

    /// Pumps the device and releases completed readbacks to the encoder
    /// thread in submission order. With `block` set, waits until at least
    /// one pending readback completes. Returns false on readback failure.
    fn drain_completions(&mut self, ctx: &RenderContext, block: bool) -> bool {
        loop {
            let maintain = if block && !self.pending.is_empty() {
                wgpu::Maintain::Wait
            } else {
                wgpu::Maintain::Poll
            };
            ctx.device.poll(maintain);

            let mut failed = false;
            while let Ok((slot, result)) = self.map_receiver.try_recv() {
                match result {
                    Ok(()) => {
                        self.mapped.insert(slot);
                    }
                    Err(err) => {
                        error!("readback of slot {} failed: {}", slot, err);
                        failed = true;
                    }
                }
            }
            if failed {
                return false;
            }

            let mut released = false;
            while let Some(&head) = self.pending.front() {
                if !self.mapped.remove(&head) {
                    break;
                }
                self.release_slot(head);
                self.pending.pop_front();
                released = true;
            }

            if !block || self.pending.is_empty() || released {
                return true;
            }
        }
    }

    /// Copies one completed readback out of its staging buffer, stripping
    /// the row padding, and fans it out.
    fn release_slot(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        let has_encoders = !self.handle.encoders.lock().is_empty();
        if has_encoders {
            let unpadded_bytes_per_row = (4 * self.width) as usize;
            let padded_data = slot.staging.slice(..).get_mapped_range();
            let data: Vec<u8> = padded_data
                .chunks(self.padded_bytes_per_row as usize)
                .flat_map(|chunk| &chunk[..unpadded_bytes_per_row])
                .copied()
                .collect();
            drop(padded_data);

            if let Some(sender) = &self.frame_sender {
                let _ = sender.send(EncodedFrame {
                    rgba: Arc::new(data),
                    width: self.width,
                    height: self.height,
                    time: slot.frame_time,
                });
            }
        }
        slot.staging.unmap();
        slot.in_flight = false;
    }

    /// Tears down the encoder fan-out after the render loop has exited.
    pub fn shutdown(mut self) {
        self.frame_sender.take();
        if let Some(thread) = self.encode_thread.take() {
            let _ = thread.join();
        }
    }
}
