use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use wgpu::util::DeviceExt;

use crate::base::scinthdef::{AbstractScinthDef, BindingSlot, PolygonMode};
use crate::error::{Error, Result};
use crate::render::sampler::{SamplerFactory, SamplerRef};
use crate::render::shader::{ShaderCompiler, ShaderStage};
use crate::render::RenderContext;

/// A ScinthDef realized on the GPU: compiled shader modules, pipelines,
/// bind-group layouts and the shape's vertex/index buffers. One per
/// registered ScinthDef name; shared by every Scinth instantiated from it.
pub struct ScinthDef {
    abstract_def: Arc<AbstractScinthDef>,

    draw_bindings: Vec<BindingSlot>,
    compute_bindings: Vec<BindingSlot>,
    draw_bind_group_layout: wgpu::BindGroupLayout,
    compute_bind_group_layout: Option<wgpu::BindGroupLayout>,

    render_pipeline: wgpu::RenderPipeline,
    compute_pipeline: Option<wgpu::ComputePipeline>,

    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,

    // Guards keep the realized samplers cached for the life of the def.
    samplers: HashMap<u32, SamplerRef>,
    target_format: wgpu::TextureFormat,
}

impl ScinthDef {
    /// Builds every GPU object the def needs. Fails atomically: any
    /// sub-error rejects the whole def and releases what was created.
    pub fn build(
        ctx: &RenderContext,
        sampler_factory: &Arc<SamplerFactory>,
        abstract_def: Arc<AbstractScinthDef>,
        canvas_size: (u32, u32),
        target_format: wgpu::TextureFormat,
    ) -> Result<ScinthDef> {
        let name = abstract_def.name();
        let vertex_module = ShaderCompiler::compile(
            &ctx.device,
            &format!("{} vertex", name),
            abstract_def.vertex_shader(),
            ShaderStage::Vertex,
        )?;
        let fragment_module = ShaderCompiler::compile(
            &ctx.device,
            &format!("{} fragment", name),
            abstract_def.fragment_shader(),
            ShaderStage::Fragment,
        )?;
        let compute_module = match abstract_def.compute_shader() {
            Some(source) => Some(ShaderCompiler::compile(
                &ctx.device,
                &format!("{} compute", name),
                source,
                ShaderStage::Compute,
            )?),
            None => None,
        };

        let mut samplers = HashMap::new();
        for instance in abstract_def.instances() {
            if let Some(config) = instance.sampler_config() {
                samplers.entry(config.sampler.key()).or_insert_with(|| {
                    SamplerFactory::get_sampler(sampler_factory, &ctx.device, &config.sampler)
                });
            }
        }

        let draw_bindings = abstract_def.draw_bindings();
        let compute_bindings = abstract_def.compute_bindings();

        let draw_bind_group_layout = Self::bind_group_layout(
            ctx,
            &draw_bindings,
            wgpu::ShaderStages::VERTEX_FRAGMENT,
            true,
            &format!("{} draw layout", name),
        );
        let compute_bind_group_layout = compute_module.as_ref().map(|_| {
            Self::bind_group_layout(
                ctx,
                &compute_bindings,
                wgpu::ShaderStages::COMPUTE,
                false,
                &format!("{} compute layout", name),
            )
        });

        let (vertex_buffer, index_buffer, index_count) =
            Self::build_vertex_data(ctx, &abstract_def, canvas_size)?;

        let push_constant_size = (abstract_def.parameters().len() * 4) as u32;
        let mut push_constant_ranges = Vec::new();
        if push_constant_size > 0 {
            push_constant_ranges.push(wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX_FRAGMENT,
                range: 0..push_constant_size,
            });
        }

        let pipeline_layout =
            ctx.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(name),
                    bind_group_layouts: &[&draw_bind_group_layout],
                    push_constant_ranges: &push_constant_ranges,
                });

        // One vertex buffer holding the shape data at the manifest layout.
        let vertex_manifest = abstract_def.vertex_manifest();
        let mut attributes = Vec::new();
        for (location, element) in vertex_manifest.elements().enumerate() {
            let format = element.element_type().vertex_format().ok_or_else(|| {
                Error::Validation(format!(
                    "vertex element {} has no attribute format",
                    element.name()
                ))
            })?;
            attributes.push(wgpu::VertexAttribute {
                format,
                offset: element.offset() as wgpu::BufferAddress,
                shader_location: location as u32,
            });
        }

        let topology = abstract_def.shape().topology().primitive_topology();
        let strip_index_format = match topology {
            wgpu::PrimitiveTopology::TriangleStrip | wgpu::PrimitiveTopology::LineStrip => {
                Some(wgpu::IndexFormat::Uint16)
            }
            _ => None,
        };

        let render_pipeline =
            ctx.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(name),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: "main",
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: vertex_manifest.stride() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &attributes,
                        }],
                    },
                    primitive: wgpu::PrimitiveState {
                        topology,
                        strip_index_format,
                        polygon_mode: Self::polygon_mode(
                            ctx,
                            abstract_def.render_options().polygon_mode,
                        ),
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: "main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format: target_format,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                });

        let compute_pipeline = match (&compute_module, &compute_bind_group_layout) {
            (Some(module), Some(layout)) => {
                let mut compute_ranges = Vec::new();
                if push_constant_size > 0 {
                    compute_ranges.push(wgpu::PushConstantRange {
                        stages: wgpu::ShaderStages::COMPUTE,
                        range: 0..push_constant_size,
                    });
                }
                let compute_layout =
                    ctx.device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some(&format!("{} compute", name)),
                            bind_group_layouts: &[layout],
                            push_constant_ranges: &compute_ranges,
                        });
                Some(
                    ctx.device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(&format!("{} compute", name)),
                            layout: Some(&compute_layout),
                            module,
                            entry_point: "main",
                        }),
                )
            }
            _ => None,
        };

        Ok(ScinthDef {
            abstract_def,
            draw_bindings,
            compute_bindings,
            draw_bind_group_layout,
            compute_bind_group_layout,
            render_pipeline,
            compute_pipeline,
            vertex_buffer,
            index_buffer,
            index_count,
            samplers,
            target_format,
        })
    }

    fn bind_group_layout(
        ctx: &RenderContext,
        slots: &[BindingSlot],
        visibility: wgpu::ShaderStages,
        compute_buffer_read_only: bool,
        label: &str,
    ) -> wgpu::BindGroupLayout {
        let mut entries = Vec::new();
        for (binding, slot) in slots.iter().enumerate() {
            let ty = match slot {
                BindingSlot::Uniform => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingSlot::Texture { .. } => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                BindingSlot::Sampler { .. } => {
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                }
                BindingSlot::ComputeBuffer => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: compute_buffer_read_only,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility,
                ty,
                count: None,
            });
        }
        ctx.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn build_vertex_data(
        ctx: &RenderContext,
        abstract_def: &AbstractScinthDef,
        canvas_size: (u32, u32),
    ) -> Result<(wgpu::Buffer, wgpu::Buffer, u32)> {
        let shape = abstract_def.shape();
        let manifest = abstract_def.vertex_manifest();

        // normPos spans [-aspect, aspect] on the longer axis so a unit in
        // normalized space stays square on screen.
        let (width, height) = (canvas_size.0 as f32, canvas_size.1 as f32);
        let norm_pos_scale = if width >= height {
            [width / height, 1.0]
        } else {
            [1.0, height / width]
        };

        let stride_floats = (manifest.stride() / 4) as usize;
        let mut vertex_data = vec![0.0f32; shape.number_of_vertices() as usize * stride_floats];
        shape.store_vertex_data(manifest, norm_pos_scale, &mut vertex_data)?;

        let mut index_data = vec![0u16; shape.number_of_indices() as usize];
        shape.store_index_data(&mut index_data)?;

        let vertex_buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} vertices", abstract_def.name())),
                contents: bytemuck::cast_slice(&vertex_data),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} indices", abstract_def.name())),
                contents: bytemuck::cast_slice(&index_data),
                usage: wgpu::BufferUsages::INDEX,
            });

        Ok((vertex_buffer, index_buffer, index_data.len() as u32))
    }

    fn polygon_mode(ctx: &RenderContext, mode: PolygonMode) -> wgpu::PolygonMode {
        match mode {
            PolygonMode::Fill => wgpu::PolygonMode::Fill,
            PolygonMode::Line if ctx.supports(wgpu::Features::POLYGON_MODE_LINE) => {
                wgpu::PolygonMode::Line
            }
            PolygonMode::Point if ctx.supports(wgpu::Features::POLYGON_MODE_POINT) => {
                wgpu::PolygonMode::Point
            }
            other => {
                warn!("polygon mode {:?} unsupported by device, using fill", other);
                wgpu::PolygonMode::Fill
            }
        }
    }

    pub fn abstract_def(&self) -> &Arc<AbstractScinthDef> {
        &self.abstract_def
    }

    pub fn draw_bindings(&self) -> &[BindingSlot] {
        &self.draw_bindings
    }

    pub fn compute_bindings(&self) -> &[BindingSlot] {
        &self.compute_bindings
    }

    pub fn draw_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.draw_bind_group_layout
    }

    pub fn compute_bind_group_layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.compute_bind_group_layout.as_ref()
    }

    pub fn render_pipeline(&self) -> &wgpu::RenderPipeline {
        &self.render_pipeline
    }

    pub fn compute_pipeline(&self) -> Option<&wgpu::ComputePipeline> {
        self.compute_pipeline.as_ref()
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn sampler_for_key(&self, key: u32) -> Option<&wgpu::Sampler> {
        self.samplers.get(&key).map(|guard| guard.sampler())
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }
}
