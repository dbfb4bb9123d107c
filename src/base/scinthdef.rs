use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;

use crate::base::element::ElementType;
use crate::base::instance::{ImageArgType, VGenInput, VGenInstance};
use crate::base::intrinsic::Intrinsic;
use crate::base::manifest::Manifest;
use crate::base::shape::Shape;
use crate::base::tween::AbstractTween;
use crate::base::vgen::Rate;
use crate::error::{Error, Result};

const PI_LITERAL: &str = "3.1415926535897932384626433832795f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

impl PolygonMode {
    pub fn from_name(name: &str) -> Option<PolygonMode> {
        match name {
            "fill" => Some(PolygonMode::Fill),
            "line" => Some(PolygonMode::Line),
            "point" => Some(PolygonMode::Point),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub polygon_mode: PolygonMode,
}

/// A named, defaulted ScinthDef parameter, addressable over the wire by
/// name or index.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    default_value: f32,
}

impl Parameter {
    pub fn new(name: &str, default_value: f32) -> Parameter {
        Parameter {
            name: name.to_string(),
            default_value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }
}

/// One slot in the bind-group layout shared between the emitted shader
/// headers and the realized pipeline. Sampling VGens occupy two successive
/// slots, texture then sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSlot {
    Uniform,
    Texture {
        key: u32,
        image_index: usize,
        parameterized: bool,
    },
    Sampler {
        key: u32,
        image_index: usize,
        parameterized: bool,
    },
    ComputeBuffer,
}

/// A complete ScinthDef signal graph plus everything `build()` derives from
/// it: rate partition, sampler maps, the four manifests and the emitted
/// shader sources. Immutable once built.
#[derive(Debug)]
pub struct AbstractScinthDef {
    name: String,
    shape: Box<dyn Shape>,
    render_options: RenderOptions,
    parameters: Vec<Parameter>,
    instances: Vec<VGenInstance>,
    tweens: Vec<AbstractTween>,

    prefix: String,
    fragment_output_name: String,
    parameter_indices: HashMap<String, usize>,
    has_compute_stage: bool,

    vertex_shader: String,
    fragment_shader: String,
    compute_shader: String,

    vertex_manifest: Manifest,
    fragment_manifest: Manifest,
    uniform_manifest: Manifest,
    compute_manifest: Manifest,

    // Sampler key -> image index, for each of the four binding classes.
    // Ordered maps so binding assignment is deterministic.
    draw_fixed_images: BTreeMap<u32, usize>,
    draw_parameterized_images: BTreeMap<u32, usize>,
    compute_fixed_images: BTreeMap<u32, usize>,
    compute_parameterized_images: BTreeMap<u32, usize>,
}

impl AbstractScinthDef {
    pub fn new(
        name: &str,
        shape: Box<dyn Shape>,
        render_options: RenderOptions,
        parameters: Vec<Parameter>,
        instances: Vec<VGenInstance>,
    ) -> AbstractScinthDef {
        AbstractScinthDef {
            name: name.to_string(),
            shape,
            render_options,
            parameters,
            instances,
            tweens: Vec::new(),
            prefix: String::new(),
            fragment_output_name: String::new(),
            parameter_indices: HashMap::new(),
            has_compute_stage: false,
            vertex_shader: String::new(),
            fragment_shader: String::new(),
            compute_shader: String::new(),
            vertex_manifest: Manifest::new(),
            fragment_manifest: Manifest::new(),
            uniform_manifest: Manifest::new(),
            compute_manifest: Manifest::new(),
            draw_fixed_images: BTreeMap::new(),
            draw_parameterized_images: BTreeMap::new(),
            compute_fixed_images: BTreeMap::new(),
            compute_parameterized_images: BTreeMap::new(),
        }
    }

    /// Attaches tween curve specifications. Only meaningful before
    /// `build()`.
    pub fn set_tweens(&mut self, tweens: Vec<AbstractTween>) {
        self.tweens = tweens;
    }

    /// Compiles the graph into shader sources and binding manifests. Every
    /// emitted identifier is namespaced by a random 32-bit prefix so several
    /// ScinthDefs never collide inside one program.
    pub fn build(&mut self) -> Result<()> {
        self.build_with_prefix(rand::random::<u32>())
    }

    /// Deterministic variant of `build()`; with the prefix held fixed the
    /// emitted shader strings are byte-identical across runs.
    pub fn build_with_prefix(&mut self, prefix: u32) -> Result<()> {
        self.prefix = format!("{}_{:08x}", self.name, prefix);
        self.fragment_output_name = format!("{}_outColor", self.prefix);

        if self.instances.is_empty() {
            return Err(Error::Validation("empty graph".to_string()));
        }
        for (index, instance) in self.instances.iter().enumerate() {
            instance.validate(index)?;
        }
        if self.instances[self.instances.len() - 1].rate() != Rate::Pixel {
            return Err(Error::Validation(format!(
                "scinthdef {} root vgen must be pixel rate",
                self.name
            )));
        }
        for tween in self.tweens.iter() {
            tween.validate()?;
        }

        self.parameter_indices.clear();
        for (index, parameter) in self.parameters.iter().enumerate() {
            if self
                .parameter_indices
                .insert(parameter.name().to_string(), index)
                .is_some()
            {
                return Err(Error::Validation(format!(
                    "scinthdef {} has duplicate parameter name {}",
                    self.name,
                    parameter.name()
                )));
            }
        }

        let (compute_vgens, vertex_vgens, fragment_vgens) = self.group_vgens()?;
        self.build_draw_stage(&vertex_vgens, &fragment_vgens)?;
        self.build_compute_stage(&compute_vgens)?;
        self.finalize_shaders()?;
        Ok(())
    }

    /// Partitions instances by rate and enforces rate monotonicity along
    /// every input edge. The instance list is already topologically ordered,
    /// so a single linear pass over the edges replaces the recursive
    /// root-down walk. Sampler bindings are collected into the four binding
    /// maps on the way.
    #[allow(clippy::type_complexity)]
    fn group_vgens(&mut self) -> Result<(BTreeSet<usize>, BTreeSet<usize>, BTreeSet<usize>)> {
        let mut compute_vgens = BTreeSet::new();
        let mut vertex_vgens = BTreeSet::new();
        let mut fragment_vgens = BTreeSet::new();

        for (index, instance) in self.instances.iter().enumerate() {
            let rate = instance.rate();
            match rate {
                Rate::Frame => compute_vgens.insert(index),
                Rate::Shape => vertex_vgens.insert(index),
                Rate::Pixel => fragment_vgens.insert(index),
            };

            for input in instance.inputs() {
                if let VGenInput::VGen { index: upstream, .. } = input {
                    if self.instances[*upstream].rate() > rate {
                        return Err(Error::RateViolation(index));
                    }
                }
            }

            if instance.abstract_vgen().is_sampler() {
                // validate() has already required the config.
                let config = instance.sampler_config().ok_or_else(|| {
                    Error::Validation(format!(
                        "sampling vgen at index {} has no sampler configuration",
                        index
                    ))
                })?;
                let key = config.sampler.key();
                let map = match (rate, config.image_arg_type) {
                    (Rate::Frame, ImageArgType::Constant) => &mut self.compute_fixed_images,
                    (Rate::Frame, ImageArgType::Parameter) => {
                        &mut self.compute_parameterized_images
                    }
                    (_, ImageArgType::Constant) => &mut self.draw_fixed_images,
                    (_, ImageArgType::Parameter) => &mut self.draw_parameterized_images,
                };
                map.insert(key, config.image_index);
            }
        }

        Ok((compute_vgens, vertex_vgens, fragment_vgens))
    }

    fn build_draw_stage(
        &mut self,
        vertex_vgens: &BTreeSet<usize>,
        fragment_vgens: &BTreeSet<usize>,
    ) -> Result<()> {
        // Position leads the vertex manifest; its type comes from the Shape.
        self.vertex_manifest.add_element_with_intrinsic(
            "position",
            self.shape.element_type(),
            Intrinsic::Position,
        );

        let last_index = self.instances.len() - 1;
        let mut fragment_body = String::new();
        for &index in fragment_vgens {
            let inputs = self.resolve_inputs(index, Rate::Pixel)?;
            let intrinsics = self.resolve_intrinsics(index, Rate::Pixel)?;

            let instance = &self.instances[index];
            let mut outputs = Vec::new();
            let mut output_dimensions = Vec::new();
            for j in 0..instance.number_of_outputs() {
                if index < last_index || j > 0 {
                    outputs.push(format!("{}_out_{}_{}", self.prefix, index, j));
                } else {
                    outputs.push(self.fragment_output_name.clone());
                }
                output_dimensions.push(instance.output_dimension(j));
            }

            let already_defined: HashSet<String> =
                [self.fragment_output_name.clone()].into_iter().collect();
            let block = instance.abstract_vgen().parameterize(
                &inputs,
                &intrinsics,
                &outputs,
                &output_dimensions,
                &already_defined,
            )?;
            fragment_body.push_str(&format!(
                "\n    // --- {}\n    {}\n",
                instance.abstract_vgen().name(),
                block
            ));
        }
        self.fragment_shader = fragment_body;

        let mut vertex_body = String::new();
        for &index in vertex_vgens {
            let inputs = self.resolve_inputs(index, Rate::Shape)?;
            let intrinsics = self.resolve_intrinsics(index, Rate::Shape)?;

            let instance = &self.instances[index];
            let mut outputs = Vec::new();
            let mut output_dimensions = Vec::new();
            for j in 0..instance.number_of_outputs() {
                outputs.push(format!("{}_out_{}_{}", self.prefix, index, j));
                output_dimensions.push(instance.output_dimension(j));
            }

            let block = instance.abstract_vgen().parameterize(
                &inputs,
                &intrinsics,
                &outputs,
                &output_dimensions,
                &HashSet::new(),
            )?;
            vertex_body.push_str(&format!(
                "\n    // --- {}\n    {}\n",
                instance.abstract_vgen().name(),
                block
            ));
        }
        self.vertex_shader = vertex_body;

        Ok(())
    }

    fn build_compute_stage(&mut self, compute_vgens: &BTreeSet<usize>) -> Result<()> {
        self.has_compute_stage = !compute_vgens.is_empty();
        if !self.has_compute_stage {
            return Ok(());
        }

        let mut compute_body = String::new();
        for &index in compute_vgens {
            let inputs = self.resolve_inputs(index, Rate::Frame)?;
            let intrinsics = self.resolve_intrinsics(index, Rate::Frame)?;

            let instance = &self.instances[index];
            let mut outputs = Vec::new();
            let mut output_dimensions = Vec::new();
            for j in 0..instance.number_of_outputs() {
                outputs.push(format!("{}_out_{}_{}", self.prefix, index, j));
                output_dimensions.push(instance.output_dimension(j));
            }

            let block = instance.abstract_vgen().parameterize(
                &inputs,
                &intrinsics,
                &outputs,
                &output_dimensions,
                &HashSet::new(),
            )?;
            compute_body.push_str(&format!(
                "\n    // --- {}\n    {}\n",
                instance.abstract_vgen().name(),
                block
            ));
        }
        self.compute_shader = compute_body;
        Ok(())
    }

    /// Textual references for every input of the instance at `index`, as
    /// seen from `stage`. Cross-stage references register manifest entries
    /// as a side effect.
    fn resolve_inputs(&mut self, index: usize, stage: Rate) -> Result<Vec<String>> {
        let mut resolved = Vec::new();
        for (input_index, input) in self.instances[index].inputs().to_vec().iter().enumerate() {
            match input {
                VGenInput::Constant(constant) => resolved.push(constant.glsl_literal()),
                VGenInput::Parameter(parameter_index) => {
                    let parameter = self.parameters.get(*parameter_index).ok_or_else(|| {
                        Error::Validation(format!(
                            "vgen index {} input {} references unknown parameter {}",
                            index, input_index, parameter_index
                        ))
                    })?;
                    resolved.push(format!("{}_parameters.{}", self.prefix, parameter.name()));
                }
                VGenInput::VGen {
                    index: upstream,
                    output,
                    dimension,
                } => {
                    let upstream_rate = self.instances[*upstream].rate();
                    match (upstream_rate, stage) {
                        // Same stage: a plain local reference.
                        (up, down) if up == down => {
                            resolved.push(format!("{}_out_{}_{}", self.prefix, upstream, output));
                        }
                        // Shape output consumed per pixel travels as a varying.
                        (Rate::Shape, Rate::Pixel) => {
                            let name = format!("{}_out_{}_{}", self.prefix, upstream, output);
                            let element_type =
                                ElementType::from_dimension(*dimension).ok_or_else(|| {
                                    Error::Validation(format!(
                                        "vgen index {} input dimension {} unsupported",
                                        index, dimension
                                    ))
                                })?;
                            self.fragment_manifest.add_element(&name, element_type);
                            resolved.push(format!("{}_in_{}", self.prefix, name));
                        }
                        // Frame output consumed downstream reads the compute
                        // output buffer.
                        (Rate::Frame, _) => {
                            let name = format!("out_{}_{}", upstream, output);
                            let element_type =
                                ElementType::from_dimension(*dimension).ok_or_else(|| {
                                    Error::Validation(format!(
                                        "vgen index {} input dimension {} unsupported",
                                        index, dimension
                                    ))
                                })?;
                            self.compute_manifest.add_element(&name, element_type);
                            resolved
                                .push(format!("{}_compute_buffer.{}", self.prefix, name));
                        }
                        _ => return Err(Error::RateViolation(index)),
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Substitution strings for every intrinsic the instance's template
    /// references, with per-stage support rules. Pass-through intrinsics
    /// register their manifest entries here.
    fn resolve_intrinsics(&mut self, index: usize, stage: Rate) -> Result<HashMap<Intrinsic, String>> {
        let mut referenced: Vec<Intrinsic> = self.instances[index]
            .abstract_vgen()
            .intrinsics()
            .iter()
            .copied()
            .collect();
        // The template's intrinsic set is unordered; manifest registration
        // order must not depend on it.
        referenced.sort();
        let mut resolved = HashMap::new();
        for intrinsic in referenced {
            let unsupported = || Error::UnsupportedIntrinsic { index, intrinsic };
            match intrinsic {
                Intrinsic::FragCoord => {
                    if stage != Rate::Pixel {
                        return Err(unsupported());
                    }
                    resolved.insert(intrinsic, "gl_FragCoord".to_string());
                }
                Intrinsic::NormPos => {
                    if stage == Rate::Frame {
                        return Err(unsupported());
                    }
                    self.vertex_manifest.add_element_with_intrinsic(
                        "normPos",
                        ElementType::Vec2,
                        Intrinsic::NormPos,
                    );
                    if stage == Rate::Pixel {
                        self.fragment_manifest.add_element_with_intrinsic(
                            "normPos",
                            ElementType::Vec2,
                            Intrinsic::NormPos,
                        );
                    }
                    resolved.insert(intrinsic, format!("{}_in_normPos", self.prefix));
                }
                Intrinsic::TexPos => {
                    if stage == Rate::Frame {
                        return Err(unsupported());
                    }
                    self.vertex_manifest.add_element_with_intrinsic(
                        "texPos",
                        ElementType::Vec2,
                        Intrinsic::TexPos,
                    );
                    if stage == Rate::Pixel {
                        self.fragment_manifest.add_element_with_intrinsic(
                            "texPos",
                            ElementType::Vec2,
                            Intrinsic::TexPos,
                        );
                    }
                    resolved.insert(intrinsic, format!("{}_in_texPos", self.prefix));
                }
                Intrinsic::Pi => {
                    resolved.insert(intrinsic, PI_LITERAL.to_string());
                }
                Intrinsic::Time => {
                    self.uniform_manifest.add_element_with_intrinsic(
                        "time",
                        ElementType::Float,
                        Intrinsic::Time,
                    );
                    resolved.insert(intrinsic, format!("{}_ubo.time", self.prefix));
                }
                Intrinsic::Sampler => {
                    let config = self.instances[index].sampler_config().ok_or_else(|| {
                        Error::Validation(format!(
                            "vgen index {} references @sampler but is not a sampler",
                            index
                        ))
                    })?;
                    let (texture, sampler) = self.sampler_identifiers(
                        config.sampler.key(),
                        config.image_index,
                        config.image_arg_type == ImageArgType::Parameter,
                    );
                    resolved.insert(intrinsic, format!("sampler2D({}, {})", texture, sampler));
                }
                // Position is only written by the vertex tail; tween
                // intrinsics await the tween playback stage.
                Intrinsic::Position
                | Intrinsic::TweenDuration
                | Intrinsic::TweenSampler
                | Intrinsic::NotFound => {
                    return Err(unsupported());
                }
            }
        }
        Ok(resolved)
    }

    /// Namespaced texture/sampler identifier pair for one sampler slot.
    fn sampler_identifiers(
        &self,
        key: u32,
        image_index: usize,
        parameterized: bool,
    ) -> (String, String) {
        let kind = if parameterized { "param" } else { "fixed" };
        (
            format!("{}_tex_{:08x}_{}_{}", self.prefix, key, kind, image_index),
            format!("{}_smp_{:08x}_{}_{}", self.prefix, key, kind, image_index),
        )
    }

    /// Bind-group layout slots for the draw stages, in binding order.
    pub fn draw_bindings(&self) -> Vec<BindingSlot> {
        let mut slots = Vec::new();
        if !self.uniform_manifest.is_empty() {
            slots.push(BindingSlot::Uniform);
        }
        for (&key, &image_index) in self.draw_fixed_images.iter() {
            slots.push(BindingSlot::Texture {
                key,
                image_index,
                parameterized: false,
            });
            slots.push(BindingSlot::Sampler {
                key,
                image_index,
                parameterized: false,
            });
        }
        for (&key, &image_index) in self.draw_parameterized_images.iter() {
            slots.push(BindingSlot::Texture {
                key,
                image_index,
                parameterized: true,
            });
            slots.push(BindingSlot::Sampler {
                key,
                image_index,
                parameterized: true,
            });
        }
        if !self.compute_manifest.is_empty() {
            slots.push(BindingSlot::ComputeBuffer);
        }
        slots
    }

    /// Bind-group layout slots for the compute stage, in binding order.
    pub fn compute_bindings(&self) -> Vec<BindingSlot> {
        let mut slots = Vec::new();
        if !self.uniform_manifest.is_empty() {
            slots.push(BindingSlot::Uniform);
        }
        for (&key, &image_index) in self.compute_fixed_images.iter() {
            slots.push(BindingSlot::Texture {
                key,
                image_index,
                parameterized: false,
            });
            slots.push(BindingSlot::Sampler {
                key,
                image_index,
                parameterized: false,
            });
        }
        for (&key, &image_index) in self.compute_parameterized_images.iter() {
            slots.push(BindingSlot::Texture {
                key,
                image_index,
                parameterized: true,
            });
            slots.push(BindingSlot::Sampler {
                key,
                image_index,
                parameterized: true,
            });
        }
        // A frame-rate VGen nothing consumes leaves the manifest empty; an
        // empty buffer block would not parse.
        if !self.compute_manifest.is_empty() {
            slots.push(BindingSlot::ComputeBuffer);
        }
        slots
    }

    /// Declaration lines for one binding slot list.
    fn binding_declarations(&self, slots: &[BindingSlot], writable_compute: bool) -> String {
        let mut header = String::new();
        for (binding, slot) in slots.iter().enumerate() {
            match slot {
                BindingSlot::Uniform => {
                    let mut body = String::new();
                    for element in self.uniform_manifest.elements() {
                        body.push_str(&format!(
                            "    {} {};\n",
                            element.type_name(),
                            element.name()
                        ));
                    }
                    header.push_str(&format!(
                        "\n// --- uniform buffer\nlayout(binding = {}) uniform UBO {{\n{}}} {}_ubo;\n",
                        binding, body, self.prefix
                    ));
                }
                BindingSlot::Texture {
                    key,
                    image_index,
                    parameterized,
                } => {
                    let (texture, _) =
                        self.sampler_identifiers(*key, *image_index, *parameterized);
                    header.push_str(&format!(
                        "layout(binding = {}) uniform texture2D {};\n",
                        binding, texture
                    ));
                }
                BindingSlot::Sampler {
                    key,
                    image_index,
                    parameterized,
                } => {
                    let (_, sampler) =
                        self.sampler_identifiers(*key, *image_index, *parameterized);
                    header.push_str(&format!(
                        "layout(binding = {}) uniform sampler {};\n",
                        binding, sampler
                    ));
                }
                BindingSlot::ComputeBuffer => {
                    let mut body = String::new();
                    for element in self.compute_manifest.elements() {
                        body.push_str(&format!(
                            "    {} {};\n",
                            element.type_name(),
                            element.name()
                        ));
                    }
                    let qualifier = if writable_compute { "" } else { "readonly " };
                    header.push_str(&format!(
                        "\n// --- buffer for compute shader outputs\nlayout(binding = {}) {}buffer ComputeBuffer {{\n{}}} {}_compute_buffer;\n",
                        binding, qualifier, body, self.prefix
                    ));
                }
            }
        }
        header
    }

    fn push_constant_declaration(&self) -> String {
        if self.parameters.is_empty() {
            return String::new();
        }
        let mut body = String::new();
        for parameter in self.parameters.iter() {
            body.push_str(&format!("    float {};\n", parameter.name()));
        }
        format!(
            "\n// --- parameter push constants\nlayout(push_constant) uniform parametersBlock {{\n{}}} {}_parameters;\n",
            body, self.prefix
        )
    }

    fn finalize_shaders(&mut self) -> Result<()> {
        self.vertex_manifest.pack();
        self.fragment_manifest.pack();
        self.uniform_manifest.pack();
        self.compute_manifest.pack();

        let mut vertex_header = String::from("#version 450\n");
        let mut fragment_header = vertex_header.clone();

        vertex_header.push_str("\n// --- vertex shader inputs from vertex format\n");
        for (location, element) in self.vertex_manifest.elements().enumerate() {
            vertex_header.push_str(&format!(
                "layout(location = {}) in {} {}_in_{};\n",
                location,
                element.type_name(),
                self.prefix,
                element.name()
            ));
        }

        if !self.fragment_manifest.is_empty() {
            // Shape-rate VGen outputs and pass-through intrinsics travel as
            // varyings: vertex outputs matched to fragment inputs.
            vertex_header.push_str("\n// --- vertex shader outputs to fragment shader\n");
            fragment_header.push_str("\n// --- fragment shader inputs from vertex shader\n");
            let mut location = 0;
            for element in self.fragment_manifest.elements() {
                if element.intrinsic() == Some(Intrinsic::Position) {
                    continue;
                }
                fragment_header.push_str(&format!(
                    "layout(location = {}) in {} {}_in_{};\n",
                    location,
                    element.type_name(),
                    self.prefix,
                    element.name()
                ));
                vertex_header.push_str(&format!(
                    "layout(location = {}) out {} {}_out_{};\n",
                    location,
                    element.type_name(),
                    self.prefix,
                    element.name()
                ));
                location += 1;

                match element.intrinsic() {
                    Some(Intrinsic::TexPos) | Some(Intrinsic::NormPos) => {
                        self.vertex_shader.push_str(&format!(
                            "\n    // --- copy vertex format element to fragment shader\n    {}_out_{} = {}_in_{};\n",
                            self.prefix,
                            element.name(),
                            self.prefix,
                            element.name()
                        ));
                    }
                    None => {
                        // Elements with no intrinsic are shape-rate VGen
                        // outputs feeding the fragment shader.
                        self.vertex_shader.push_str(&format!(
                            "\n    // --- export VGen output to fragment shader\n    {}_out_{} = {};\n",
                            self.prefix,
                            element.name(),
                            element.name()
                        ));
                    }
                    _ => {}
                }
            }
        }

        let draw_bindings = self.draw_bindings();
        let draw_declarations = self.binding_declarations(&draw_bindings, false);
        vertex_header.push_str(&draw_declarations);
        fragment_header.push_str(&draw_declarations);

        let push_constants = self.push_constant_declaration();
        vertex_header.push_str(&push_constants);
        fragment_header.push_str(&push_constants);

        // The vertex tail writes gl_Position from the position attribute,
        // widened to vec4 per the Shape's element type.
        self.vertex_shader
            .push_str("\n    // --- hard-coded vertex position output\n");
        let position_line = match self.shape.element_type() {
            ElementType::Float => format!(
                "    gl_Position = vec4({}_in_position, 0.0f, 0.0f, 1.0f);\n",
                self.prefix
            ),
            ElementType::Vec2 => format!(
                "    gl_Position = vec4({}_in_position, 0.0f, 1.0f);\n",
                self.prefix
            ),
            ElementType::Vec3 => format!(
                "    gl_Position = vec4({}_in_position, 1.0f);\n",
                self.prefix
            ),
            ElementType::Vec4 => format!("    gl_Position = {}_in_position;\n", self.prefix),
            ElementType::Mat4 => {
                return Err(Error::Validation(
                    "shape position attribute cannot be a matrix".to_string(),
                ))
            }
        };
        self.vertex_shader.push_str(&position_line);

        self.vertex_shader = format!(
            "{}\nvoid main() {{{}}}\n",
            vertex_header, self.vertex_shader
        );

        fragment_header.push_str("\n// --- fragment output color\n");
        fragment_header.push_str(&format!(
            "layout(location = 0) out vec4 {};\n",
            self.fragment_output_name
        ));
        self.fragment_shader = format!(
            "{}\nvoid main() {{{}}}\n",
            fragment_header, self.fragment_shader
        );

        debug!("{} vertex shader:\n{}", self.name, self.vertex_shader);
        debug!("{} fragment shader:\n{}", self.name, self.fragment_shader);

        if self.has_compute_stage {
            let mut compute_header = String::from("#version 450\nlayout(local_size_x = 1) in;\n");
            let compute_bindings = self.compute_bindings();
            compute_header.push_str(&self.binding_declarations(&compute_bindings, true));
            compute_header.push_str(&self.push_constant_declaration());

            // Export every consumed compute output into the buffer.
            for element in self.compute_manifest.elements() {
                self.compute_shader.push_str(&format!(
                    "\n    // --- export compute VGen output to buffer\n    {}_compute_buffer.{} = {}_{};\n",
                    self.prefix,
                    element.name(),
                    self.prefix,
                    element.name()
                ));
            }

            self.compute_shader = format!(
                "{}\nvoid main() {{{}}}\n",
                compute_header, self.compute_shader
            );
            debug!("{} compute shader:\n{}", self.name, self.compute_shader);
        } else {
            self.compute_shader.clear();
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn shape(&self) -> &dyn Shape {
        self.shape.as_ref()
    }

    pub fn render_options(&self) -> RenderOptions {
        self.render_options
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_indices.get(name).copied()
    }

    pub fn instances(&self) -> &[VGenInstance] {
        &self.instances
    }

    pub fn tweens(&self) -> &[AbstractTween] {
        &self.tweens
    }

    pub fn has_compute_stage(&self) -> bool {
        self.has_compute_stage
    }

    pub fn vertex_shader(&self) -> &str {
        &self.vertex_shader
    }

    pub fn fragment_shader(&self) -> &str {
        &self.fragment_shader
    }

    pub fn compute_shader(&self) -> Option<&str> {
        if self.has_compute_stage {
            Some(&self.compute_shader)
        } else {
            None
        }
    }

    pub fn fragment_output_name(&self) -> &str {
        &self.fragment_output_name
    }

    pub fn vertex_manifest(&self) -> &Manifest {
        &self.vertex_manifest
    }

    pub fn fragment_manifest(&self) -> &Manifest {
        &self.fragment_manifest
    }

    pub fn uniform_manifest(&self) -> &Manifest {
        &self.uniform_manifest
    }

    pub fn compute_manifest(&self) -> &Manifest {
        &self.compute_manifest
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::base::instance::Constant;
    use crate::base::shape::Quad;
    use crate::base::vgen::{AbstractVGen, Rates};

    fn vgen(
        name: &str,
        rates: Rates,
        inputs: &[&str],
        outputs: &[&str],
        input_dims: Vec<Vec<usize>>,
        output_dims: Vec<Vec<usize>>,
        shader: &str,
    ) -> Arc<AbstractVGen> {
        let mut vgen = AbstractVGen::new(
            name,
            rates,
            false,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
            input_dims,
            output_dims,
            shader,
        );
        vgen.prepare_template().unwrap();
        Arc::new(vgen)
    }

    fn solid_def() -> AbstractScinthDef {
        let constant = vgen(
            "Constant",
            Rates::PIXEL,
            &["value"],
            &["out"],
            vec![vec![1]],
            vec![vec![4]],
            "@out = vec4(@value, @value, @value, 1.0f);",
        );
        let mut instance = VGenInstance::new(constant, Rate::Pixel);
        instance.add_constant_input(Constant::Float(0.5));
        instance.add_output(4);
        AbstractScinthDef::new(
            "solid",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            vec![instance],
        )
    }

    #[test]
    fn empty_graph_is_rejected() {
        let mut def = AbstractScinthDef::new(
            "empty",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            Vec::new(),
        );
        let err = def.build().unwrap_err();
        assert!(matches!(err, Error::Validation(ref message) if message == "empty graph"));
    }

    #[test]
    fn single_constant_pixel_graph_builds() {
        let mut def = solid_def();
        def.build_with_prefix(0x1234abcd).unwrap();

        assert!(!def.has_compute_stage());
        assert!(def.compute_shader().is_none());
        assert_eq!(def.prefix(), "solid_1234abcd");

        let fragment = def.fragment_shader();
        assert!(fragment.contains("layout(location = 0) out vec4 solid_1234abcd_outColor;"));
        assert!(fragment
            .contains("solid_1234abcd_outColor = vec4(0.5f, 0.5f, 0.5f, 1.0f);"));

        // No varyings, so the vertex shader only carries position.
        let vertex = def.vertex_shader();
        assert!(vertex.contains("layout(location = 0) in vec2 solid_1234abcd_in_position;"));
        assert!(vertex.contains("gl_Position = vec4(solid_1234abcd_in_position, 0.0f, 1.0f);"));
    }

    #[test]
    fn fixed_prefix_builds_are_byte_identical() {
        let mut first = solid_def();
        first.build_with_prefix(7).unwrap();
        let mut second = solid_def();
        second.build_with_prefix(7).unwrap();
        assert_eq!(first.vertex_shader(), second.vertex_shader());
        assert_eq!(first.fragment_shader(), second.fragment_shader());
    }

    #[test]
    fn random_builds_differ_only_in_prefix() {
        let mut def = solid_def();
        def.build().unwrap();
        let prefix = def.prefix().to_string();
        let normalized = def.fragment_shader().replace(&prefix, "P");

        let mut other = solid_def();
        other.build().unwrap();
        let other_normalized = other
            .fragment_shader()
            .replace(other.prefix(), "P");
        assert_eq!(normalized, other_normalized);
    }

    #[test]
    fn pixel_into_shape_is_a_rate_violation() {
        let producer = vgen(
            "PixelValue",
            Rates::PIXEL,
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![1]],
            "@out = 1.0f;",
        );
        let consumer = vgen(
            "ShapeScale",
            Rates::SHAPE | Rates::PIXEL,
            &["in"],
            &["out"],
            vec![vec![1]],
            vec![vec![1]],
            "@out = @in * 2.0f;",
        );

        let mut first = VGenInstance::new(producer, Rate::Pixel);
        first.add_output(1);
        let mut second = VGenInstance::new(consumer.clone(), Rate::Shape);
        second.add_vgen_input(0, 0, 1);
        second.add_output(1);
        // Root must be pixel rate, hang a pixel consumer off the shape one.
        let mut third = VGenInstance::new(consumer, Rate::Pixel);
        third.add_vgen_input(1, 0, 1);
        third.add_output(1);

        let mut def = AbstractScinthDef::new(
            "backwards",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            vec![first, second, third],
        );
        let err = def.build_with_prefix(1).unwrap_err();
        assert!(matches!(err, Error::RateViolation(1)));
        assert_eq!(err.vgen_index(), Some(1));
    }

    #[test]
    fn shape_rate_output_becomes_a_varying() {
        let norm = vgen(
            "NormCoords",
            Rates::SHAPE,
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![2]],
            "@out = @normPos;",
        );
        let brightness = vgen(
            "Brightness",
            Rates::PIXEL,
            &["pos", "level"],
            &["out"],
            vec![vec![2, 1]],
            vec![vec![4]],
            "@out = vec4(@pos * @level, 0.0f, 1.0f);",
        );

        let mut shape_instance = VGenInstance::new(norm, Rate::Shape);
        shape_instance.add_output(2);
        let mut pixel_instance = VGenInstance::new(brightness, Rate::Pixel);
        pixel_instance.add_vgen_input(0, 0, 2);
        pixel_instance.add_parameter_input(0);
        pixel_instance.add_output(4);

        let mut def = AbstractScinthDef::new(
            "varying",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            vec![Parameter::new("level", 1.0)],
            vec![shape_instance, pixel_instance],
        );
        def.build_with_prefix(0xff).unwrap();
        let p = def.prefix().to_string();

        // The shape output crosses stages through the fragment manifest.
        assert_eq!(def.fragment_manifest().len(), 1);
        let vertex = def.vertex_shader();
        let fragment = def.fragment_shader();

        // normPos vertex attribute feeds the shape VGen, whose output is
        // exported as a varying and consumed by the fragment stage.
        assert!(vertex.contains(&format!("layout(location = 1) in vec2 {}_in_normPos;", p)));
        assert!(vertex.contains(&format!("layout(location = 0) out vec2 {}_out_{}_out_0_0;", p, p)));
        assert!(vertex.contains(&format!("{}_out_{}_out_0_0 = {}_out_0_0;", p, p, p)));
        assert!(fragment.contains(&format!("layout(location = 0) in vec2 {}_in_{}_out_0_0;", p, p)));
        assert!(fragment.contains(&format!("{}_in_{}_out_0_0", p, p)));

        // Parameters land in the push-constant block of both stages.
        assert!(vertex.contains("layout(push_constant) uniform parametersBlock {"));
        assert!(fragment.contains(&format!("{}_parameters.level", p)));
    }

    #[test]
    fn frame_rate_input_emits_compute_stage() {
        let clock = vgen(
            "FrameClock",
            Rates::FRAME,
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![1]],
            "@out = @time;",
        );
        let tint = vgen(
            "Tint",
            Rates::PIXEL,
            &["t"],
            &["out"],
            vec![vec![1]],
            vec![vec![4]],
            "@out = vec4(sin(@t), 0.0f, 0.0f, 1.0f);",
        );

        let mut frame_instance = VGenInstance::new(clock, Rate::Frame);
        frame_instance.add_output(1);
        let mut pixel_instance = VGenInstance::new(tint, Rate::Pixel);
        pixel_instance.add_vgen_input(0, 0, 1);
        pixel_instance.add_output(4);

        let mut def = AbstractScinthDef::new(
            "clocked",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            vec![frame_instance, pixel_instance],
        );
        def.build_with_prefix(0xc0de).unwrap();
        let p = def.prefix().to_string();

        assert!(def.has_compute_stage());
        let compute = def.compute_shader().unwrap();
        assert!(compute.starts_with("#version 450\nlayout(local_size_x = 1) in;\n"));
        assert!(compute.contains(&format!("{}_compute_buffer.out_0_0 = {}_out_0_0;", p, p)));
        assert!(compute.contains(&format!("{}_ubo.time", p)));

        // Draw stages read the compute buffer read-only at the binding
        // following the uniform block.
        let fragment = def.fragment_shader();
        assert!(fragment.contains("layout(binding = 1) readonly buffer ComputeBuffer {"));
        assert!(fragment.contains(&format!("{}_compute_buffer.out_0_0", p)));
        assert_eq!(
            def.draw_bindings(),
            vec![BindingSlot::Uniform, BindingSlot::ComputeBuffer]
        );
        assert_eq!(
            def.compute_bindings(),
            vec![BindingSlot::Uniform, BindingSlot::ComputeBuffer]
        );
    }

    #[test]
    fn fragcoord_outside_pixel_stage_is_unsupported() {
        let bad = vgen(
            "BadCoord",
            Rates::SHAPE,
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![2]],
            "@out = @fragCoord.xy;",
        );
        let pass = vgen(
            "Pass",
            Rates::PIXEL,
            &["in"],
            &["out"],
            vec![vec![2]],
            vec![vec![4]],
            "@out = vec4(@in, 0.0f, 1.0f);",
        );

        let mut shape_instance = VGenInstance::new(bad, Rate::Shape);
        shape_instance.add_output(2);
        let mut pixel_instance = VGenInstance::new(pass, Rate::Pixel);
        pixel_instance.add_vgen_input(0, 0, 2);
        pixel_instance.add_output(4);

        let mut def = AbstractScinthDef::new(
            "badcoord",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            vec![shape_instance, pixel_instance],
        );
        let err = def.build_with_prefix(2).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedIntrinsic {
                index: 0,
                intrinsic: Intrinsic::FragCoord
            }
        ));
    }

    #[test]
    fn uniform_time_lands_in_both_draw_headers() {
        let osc = vgen(
            "TimeSine",
            Rates::PIXEL,
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![4]],
            "@out = vec4(sin(@time * @pi), 0.0f, 0.0f, 1.0f);",
        );
        let mut instance = VGenInstance::new(osc, Rate::Pixel);
        instance.add_output(4);

        let mut def = AbstractScinthDef::new(
            "timer",
            Box::new(Quad::new(1, 1)),
            RenderOptions::default(),
            Vec::new(),
            vec![instance],
        );
        def.build_with_prefix(3).unwrap();

        assert_eq!(def.uniform_manifest().len(), 1);
        assert_eq!(def.uniform_manifest().element(0).name(), "time");
        for shader in [def.vertex_shader(), def.fragment_shader()] {
            assert!(shader.contains("layout(binding = 0) uniform UBO {"));
            assert!(shader.contains("    float time;\n"));
        }
        assert!(def
            .fragment_shader()
            .contains("3.1415926535897932384626433832795f"));
    }
}
