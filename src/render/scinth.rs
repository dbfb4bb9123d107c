use std::sync::Arc;

use log::warn;

use crate::base::intrinsic::Intrinsic;
use crate::base::scinthdef::BindingSlot;
use crate::error::{Error, Result};
use crate::render::scinthdef::ScinthDef;
use crate::render::{RenderContext, RenderDevice, RenderQueue};

/// A running, controllable instance of a ScinthDef: per-image uniform
/// buffers and bind groups, the current parameter vector and one
/// pre-recorded render bundle per pipeline image. Parameter values are
/// baked into the bundles as push constants, so changing one marks the
/// bundles dirty and they are re-recorded on the next prepared frame.
pub struct Scinth {
    node_id: i32,
    scinthdef: Arc<ScinthDef>,

    parameter_values: Vec<f32>,
    uniform_buffers: Vec<wgpu::Buffer>,
    compute_buffers: Vec<wgpu::Buffer>,
    draw_bind_groups: Vec<wgpu::BindGroup>,
    compute_bind_groups: Vec<wgpu::BindGroup>,
    bundles: Vec<wgpu::RenderBundle>,

    start_time: Option<f64>,
    running: bool,
    commands_dirty: bool,
}

impl Scinth {
    pub fn new(
        ctx: &RenderContext,
        scinthdef: Arc<ScinthDef>,
        node_id: i32,
        num_images: usize,
    ) -> Result<Scinth> {
        let abstract_def = scinthdef.abstract_def();
        let parameter_values: Vec<f32> = abstract_def
            .parameters()
            .iter()
            .map(|p| p.default_value())
            .collect();

        let uniform_stride = abstract_def.uniform_manifest().stride() as u64;
        let mut uniform_buffers = Vec::new();
        if uniform_stride > 0 {
            for image in 0..num_images {
                uniform_buffers.push(ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("scinth {} uniform {}", node_id, image)),
                    size: uniform_stride,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }));
            }
        }

        let compute_stride = abstract_def.compute_manifest().stride() as u64;
        let mut compute_buffers = Vec::new();
        if scinthdef.compute_pipeline().is_some() && compute_stride > 0 {
            for image in 0..num_images {
                compute_buffers.push(ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("scinth {} compute {}", node_id, image)),
                    size: compute_stride,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                }));
            }
        }

        let mut draw_bind_groups = Vec::new();
        let mut compute_bind_groups = Vec::new();
        for image in 0..num_images {
            draw_bind_groups.push(Self::bind_group(
                ctx,
                &scinthdef,
                scinthdef.draw_bindings(),
                scinthdef.draw_bind_group_layout(),
                &uniform_buffers,
                &compute_buffers,
                image,
            )?);
            if let Some(layout) = scinthdef.compute_bind_group_layout() {
                compute_bind_groups.push(Self::bind_group(
                    ctx,
                    &scinthdef,
                    scinthdef.compute_bindings(),
                    layout,
                    &uniform_buffers,
                    &compute_buffers,
                    image,
                )?);
            }
        }

        let mut scinth = Scinth {
            node_id,
            scinthdef,
            parameter_values,
            uniform_buffers,
            compute_buffers,
            draw_bind_groups,
            compute_bind_groups,
            bundles: Vec::new(),
            start_time: None,
            running: true,
            commands_dirty: false,
        };
        scinth.record_bundles(&ctx.device);
        Ok(scinth)
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_group(
        ctx: &RenderContext,
        scinthdef: &ScinthDef,
        slots: &[BindingSlot],
        layout: &wgpu::BindGroupLayout,
        uniform_buffers: &[wgpu::Buffer],
        compute_buffers: &[wgpu::Buffer],
        image: usize,
    ) -> Result<wgpu::BindGroup> {
        let mut entries = Vec::new();
        for (binding, slot) in slots.iter().enumerate() {
            let resource = match slot {
                BindingSlot::Uniform => uniform_buffers[image].as_entire_binding(),
                // No image commands have landed yet, so every texture slot
                // sees the context's white fallback image.
                BindingSlot::Texture { .. } => {
                    wgpu::BindingResource::TextureView(&ctx.empty_image.view)
                }
                BindingSlot::Sampler { key, .. } => {
                    let sampler = scinthdef.sampler_for_key(*key).ok_or_else(|| {
                        Error::GpuResource(format!("sampler key {:08x} not realized", key))
                    })?;
                    wgpu::BindingResource::Sampler(sampler)
                }
                BindingSlot::ComputeBuffer => compute_buffers[image].as_entire_binding(),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            });
        }
        Ok(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        }))
    }

    /// Re-records one render bundle per pipeline image with the current
    /// push-constant parameter values.
    fn record_bundles(&mut self, device: &RenderDevice) {
        let def = &self.scinthdef;
        self.bundles.clear();
        for image in 0..self.draw_bind_groups.len() {
            let mut encoder =
                device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
                    label: Some(&format!("scinth {}", self.node_id)),
                    color_formats: &[Some(def.target_format())],
                    depth_stencil: None,
                    sample_count: 1,
                    multiview: None,
                });
            encoder.set_pipeline(def.render_pipeline());
            if !self.parameter_values.is_empty() {
                encoder.set_push_constants(
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                    0,
                    bytemuck::cast_slice(&self.parameter_values),
                );
            }
            encoder.set_bind_group(0, &self.draw_bind_groups[image], &[]);
            encoder.set_vertex_buffer(0, def.vertex_buffer().slice(..));
            encoder.set_index_buffer(def.index_buffer().slice(..), wgpu::IndexFormat::Uint16);
            encoder.draw_indexed(0..def.index_count(), 0, 0..1);
            self.bundles.push(encoder.finish(&wgpu::RenderBundleDescriptor {
                label: Some(&format!("scinth {}", self.node_id)),
            }));
        }
    }

    /// Prepares the slot at `image_index` for a frame at `frame_time`
    /// seconds: re-records dirty bundles and refreshes the uniform
    /// intrinsics. Returns whether the Scinth renders this frame.
    pub fn prepare_frame(
        &mut self,
        device: &RenderDevice,
        queue: &RenderQueue,
        image_index: usize,
        frame_time: f64,
    ) -> bool {
        if !self.running {
            return false;
        }
        if self.commands_dirty {
            self.record_bundles(device);
            self.commands_dirty = false;
        }

        let start_time = *self.start_time.get_or_insert(frame_time);
        if !self.uniform_buffers.is_empty() {
            let manifest = self.scinthdef.abstract_def().uniform_manifest();
            for element in manifest.elements() {
                if element.intrinsic() == Some(Intrinsic::Time) {
                    let time = (frame_time - start_time) as f32;
                    queue.write_buffer(
                        &self.uniform_buffers[image_index],
                        element.offset() as u64,
                        bytemuck::bytes_of(&time),
                    );
                }
            }
        }
        true
    }

    /// Records this Scinth's compute dispatch, if it has a compute stage.
    pub fn record_compute(&self, encoder: &mut wgpu::CommandEncoder, image_index: usize) {
        let Some(pipeline) = self.scinthdef.compute_pipeline() else {
            return;
        };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&format!("scinth {} compute", self.node_id)),
        });
        pass.set_pipeline(pipeline);
        if !self.parameter_values.is_empty() {
            pass.set_push_constants(0, bytemuck::cast_slice(&self.parameter_values));
        }
        pass.set_bind_group(0, &self.compute_bind_groups[image_index], &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }

    pub fn bundle(&self, image_index: usize) -> &wgpu::RenderBundle {
        &self.bundles[image_index]
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, run: bool) {
        self.running = run;
    }

    pub fn set_parameter_by_name(&mut self, name: &str, value: f32) {
        match self.scinthdef.abstract_def().parameter_index(name) {
            Some(index) => self.set_parameter_by_index(index, value),
            None => warn!(
                "scinth {} has no parameter named {}",
                self.node_id, name
            ),
        }
    }

    pub fn set_parameter_by_index(&mut self, index: usize, value: f32) {
        if index >= self.parameter_values.len() {
            warn!(
                "scinth {} parameter index {} out of range",
                self.node_id, index
            );
            return;
        }
        self.parameter_values[index] = value;
        self.commands_dirty = true;
    }

    pub fn has_compute_stage(&self) -> bool {
        self.scinthdef.compute_pipeline().is_some()
    }
}
