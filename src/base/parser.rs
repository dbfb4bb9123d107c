//! YAML loading of AbstractVGens and AbstractScinthDefs. Files are
//! multi-document streams; a malformed document is logged and skipped
//! without failing the rest of the batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_yaml::Value;

use crate::base::instance::{Constant, ImageArgType, VGenInstance};
use crate::base::sampler::{AbstractSampler, AddressMode, BorderColor, FilterMode};
use crate::base::scinthdef::{AbstractScinthDef, Parameter, PolygonMode, RenderOptions};
use crate::base::shape::{Quad, Shape};
use crate::base::tween::{AbstractTween, Curve};
use crate::base::vgen::{AbstractVGen, Rate, Rates};
use crate::error::{Error, Result};

/// Thread-shared registry of validated AbstractVGens, keyed by class name.
#[derive(Default)]
pub struct VGenRegistry {
    vgens: RwLock<HashMap<String, Arc<AbstractVGen>>>,
}

impl VGenRegistry {
    pub fn new() -> VGenRegistry {
        VGenRegistry::default()
    }

    /// Parses every document in the YAML string, returning the number of
    /// AbstractVGens added to the registry.
    pub fn parse_str(&self, yaml: &str) -> usize {
        let mut added = 0;
        for value in documents(yaml) {
            match parse_abstract_vgen(&value) {
                Ok(vgen) => {
                    info!("registered vgen {}", vgen.name());
                    self.vgens
                        .write()
                        .insert(vgen.name().to_string(), Arc::new(vgen));
                    added += 1;
                }
                Err(err) => error!("skipping vgen document: {}", err),
            }
        }
        added
    }

    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|err| Error::Parse(format!("reading {}: {}", path.display(), err)))?;
        Ok(self.parse_str(&yaml))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<AbstractVGen>> {
        self.vgens.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.vgens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vgens.read().is_empty()
    }
}

/// Parses every ScinthDef document in the YAML string against the VGen
/// registry, returning the defs that parsed and built.
pub fn parse_scinthdefs_str(registry: &VGenRegistry, yaml: &str) -> Vec<AbstractScinthDef> {
    let mut defs = Vec::new();
    for value in documents(yaml) {
        match parse_scinthdef(registry, &value) {
            Ok(mut def) => match def.build() {
                Ok(()) => {
                    info!("scinthdef {} parsed and built", def.name());
                    defs.push(def);
                }
                Err(err) => error!("scinthdef {} failed to build: {}", def.name(), err),
            },
            Err(err) => error!("skipping scinthdef document: {}", err),
        }
    }
    defs
}

pub fn load_scinthdefs_file(
    registry: &VGenRegistry,
    path: &Path,
) -> Result<Vec<AbstractScinthDef>> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|err| Error::Parse(format!("reading {}: {}", path.display(), err)))?;
    Ok(parse_scinthdefs_str(registry, &yaml))
}

fn documents(yaml: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        match Value::deserialize(document) {
            Ok(Value::Null) => {}
            Ok(value) => values.push(value),
            Err(err) => error!("yaml document failed to parse: {}", err),
        }
    }
    values
}

fn require_str<'a>(value: &'a Value, key: &str, what: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Parse(format!("{} missing string key {}", what, key)))
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_abstract_vgen(value: &Value) -> Result<AbstractVGen> {
    if !value.is_mapping() {
        return Err(Error::Parse("top-level vgen node is not a map".to_string()));
    }
    let name = require_str(value, "name", "vgen")?;
    let fragment = require_str(value, "fragment", "vgen")?;

    let rates = match value.get("rates").and_then(Value::as_sequence) {
        Some(seq) => {
            let mut rates = Rates::empty();
            for entry in seq {
                let rate_name = entry
                    .as_str()
                    .ok_or_else(|| Error::Parse(format!("vgen {} has non-string rate", name)))?;
                let rate = Rate::from_name(rate_name).ok_or_else(|| {
                    Error::Parse(format!("vgen {} has unknown rate {}", name, rate_name))
                })?;
                rates |= rate.flag();
            }
            rates
        }
        // Absent rate list means the template runs anywhere.
        None => Rates::all(),
    };

    let is_sampler = value
        .get("isSampler")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let inputs = string_list(value, "inputs");
    let mut outputs = string_list(value, "outputs");
    if outputs.is_empty() {
        outputs.push("out".to_string());
    }

    let (input_dimensions, output_dimensions) = match value
        .get("dimensions")
        .and_then(Value::as_sequence)
    {
        Some(seq) => {
            let mut input_dims = Vec::new();
            let mut output_dims = Vec::new();
            for entry in seq {
                input_dims.push(dimension_list(entry, "inputs", inputs.len())?);
                output_dims.push(dimension_list(entry, "outputs", outputs.len())?);
            }
            (input_dims, output_dims)
        }
        // Default: one all-scalar configuration.
        None => (vec![vec![1; inputs.len()]], vec![vec![1; outputs.len()]]),
    };

    let mut vgen = AbstractVGen::new(
        name,
        rates,
        is_sampler,
        inputs,
        outputs,
        input_dimensions,
        output_dimensions,
        fragment,
    );
    vgen.prepare_template()?;
    Ok(vgen)
}

fn dimension_list(entry: &Value, key: &str, default_len: usize) -> Result<Vec<usize>> {
    match entry.get(key).and_then(Value::as_sequence) {
        Some(seq) => seq
            .iter()
            .map(|v| {
                v.as_u64()
                    .map(|d| d as usize)
                    .ok_or_else(|| Error::Parse(format!("non-integer dimension in {}", key)))
            })
            .collect(),
        None => Ok(vec![1; default_len]),
    }
}

fn parse_scinthdef(registry: &VGenRegistry, value: &Value) -> Result<AbstractScinthDef> {
    if !value.is_mapping() {
        return Err(Error::Parse(
            "top-level scinthdef node is not a map".to_string(),
        ));
    }
    let name = require_str(value, "name", "scinthdef")?;
    let vgens = value
        .get("vgens")
        .and_then(Value::as_sequence)
        .ok_or_else(|| {
            Error::Parse(format!("scinthdef {} missing vgens sequence", name))
        })?;

    let mut parameters = Vec::new();
    if let Some(seq) = value.get("parameters").and_then(Value::as_sequence) {
        for entry in seq {
            if let Some(param_name) = entry.as_str() {
                parameters.push(Parameter::new(param_name, 0.0));
            } else if entry.is_mapping() {
                let param_name = require_str(entry, "name", "parameter")?;
                let default = entry
                    .get("defaultValue")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0) as f32;
                parameters.push(Parameter::new(param_name, default));
            } else {
                return Err(Error::Parse(format!(
                    "scinthdef {} has malformed parameter entry",
                    name
                )));
            }
        }
    }

    let render_options = parse_render_options(value)?;
    let shape = parse_shape(value)?;

    let mut instances: Vec<VGenInstance> = Vec::new();
    for vgen_value in vgens {
        let class_name = require_str(vgen_value, "className", "vgen entry")?;
        let abstract_vgen = registry.lookup(class_name).ok_or_else(|| {
            Error::Parse(format!(
                "scinthdef {} references undefined vgen {}",
                name, class_name
            ))
        })?;
        let rate_name = require_str(vgen_value, "rate", "vgen entry")?;
        let rate = Rate::from_name(rate_name).ok_or_else(|| {
            Error::Parse(format!(
                "scinthdef {} vgen {} has unknown rate {}",
                name, class_name, rate_name
            ))
        })?;

        let mut instance = VGenInstance::new(abstract_vgen.clone(), rate);

        if let Some(inputs) = vgen_value.get("inputs").and_then(Value::as_sequence) {
            for input in inputs {
                parse_input(&mut instance, input, instances.len(), name, class_name)?;
            }
        }

        match vgen_value.get("outputs").and_then(Value::as_sequence) {
            Some(outputs) => {
                for output in outputs {
                    let dimension = output
                        .get("dimension")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            Error::Parse(format!(
                                "scinthdef {} vgen {} output missing dimension",
                                name, class_name
                            ))
                        })?;
                    instance.add_output(dimension as usize);
                }
            }
            // Without explicit outputs, advertise the template's first
            // dimension configuration.
            None => {
                for dimension in abstract_vgen.output_dimensions()[0].clone() {
                    instance.add_output(dimension);
                }
            }
        }

        if let Some(sampler_value) = vgen_value.get("sampler") {
            let (image_index, image_arg_type, sampler) = parse_sampler(sampler_value)?;
            instance.set_sampler_config(image_index, image_arg_type, sampler);
        }

        instances.push(instance);
    }

    let mut def = AbstractScinthDef::new(name, shape, render_options, parameters, instances);
    if let Some(tweens) = value.get("tweens").and_then(Value::as_sequence) {
        let tweens = tweens
            .iter()
            .map(parse_tween)
            .collect::<Result<Vec<AbstractTween>>>()?;
        def.set_tweens(tweens);
    }
    Ok(def)
}

fn parse_tween(value: &Value) -> Result<AbstractTween> {
    let levels = value
        .get("levels")
        .and_then(Value::as_sequence)
        .ok_or_else(|| Error::Parse("tween missing levels sequence".to_string()))?
        .iter()
        .map(|level| {
            let mut packed = [0.0f32; 4];
            match level.as_f64() {
                Some(scalar) => packed[0] = scalar as f32,
                None => {
                    let seq = level.as_sequence().ok_or_else(|| {
                        Error::Parse("tween level is neither scalar nor sequence".to_string())
                    })?;
                    for (slot, entry) in packed.iter_mut().zip(seq.iter()) {
                        *slot = entry.as_f64().ok_or_else(|| {
                            Error::Parse("tween level holds a non-float".to_string())
                        })? as f32;
                    }
                }
            }
            Ok(packed)
        })
        .collect::<Result<Vec<[f32; 4]>>>()?;

    let durations = value
        .get("durations")
        .and_then(Value::as_sequence)
        .ok_or_else(|| Error::Parse("tween missing durations sequence".to_string()))?
        .iter()
        .map(|entry| {
            entry
                .as_f64()
                .map(|d| d as f32)
                .ok_or_else(|| Error::Parse("tween duration is not a float".to_string()))
        })
        .collect::<Result<Vec<f32>>>()?;

    let curves = match value.get("curves").and_then(Value::as_sequence) {
        Some(seq) => seq
            .iter()
            .map(|entry| {
                let raw = entry
                    .as_u64()
                    .ok_or_else(|| Error::Parse("tween curve is not an integer".to_string()))?;
                Curve::from_value(raw as u32)
                    .ok_or_else(|| Error::Parse(format!("unknown tween curve {}", raw)))
            })
            .collect::<Result<Vec<Curve>>>()?,
        None => vec![Curve::Linear],
    };

    Ok(AbstractTween {
        dimension: value.get("dimension").and_then(Value::as_u64).unwrap_or(1) as usize,
        sample_rate: value
            .get("sampleRate")
            .and_then(Value::as_f64)
            .unwrap_or(512.0) as f32,
        total_time: durations.iter().sum(),
        looping: value.get("loop").and_then(Value::as_bool).unwrap_or(false),
        levels,
        durations,
        curves,
    })
}

fn parse_input(
    instance: &mut VGenInstance,
    input: &Value,
    instance_count: usize,
    def_name: &str,
    class_name: &str,
) -> Result<()> {
    let input_type = require_str(input, "type", "vgen input")?;
    match input_type {
        "constant" => {
            let value = input.get("value").ok_or_else(|| {
                Error::Parse(format!(
                    "scinthdef {} vgen {} constant input with no value key",
                    def_name, class_name
                ))
            })?;
            instance.add_constant_input(parse_constant(value)?);
        }
        "parameter" => {
            let index = input.get("index").and_then(Value::as_u64).ok_or_else(|| {
                Error::Parse(format!(
                    "scinthdef {} vgen {} parameter input with no index key",
                    def_name, class_name
                ))
            })?;
            instance.add_parameter_input(index as usize);
        }
        "vgen" => {
            let vgen_index = input
                .get("vgenIndex")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    Error::Parse(format!(
                        "scinthdef {} vgen {} vgen input with no vgenIndex key",
                        def_name, class_name
                    ))
                })?;
            if vgen_index as usize >= instance_count {
                return Err(Error::Parse(format!(
                    "scinthdef {} vgen {} vgen input with invalid index {}",
                    def_name, class_name, vgen_index
                )));
            }
            let output_index = input
                .get("outputIndex")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let dimension = input.get("dimension").and_then(Value::as_u64).unwrap_or(1);
            instance.add_vgen_input(
                vgen_index as usize,
                output_index as usize,
                dimension as usize,
            );
        }
        other => {
            return Err(Error::Parse(format!(
                "scinthdef {} vgen {} has undefined input type {}",
                def_name, class_name, other
            )));
        }
    }
    Ok(())
}

fn parse_constant(value: &Value) -> Result<Constant> {
    if let Some(scalar) = value.as_f64() {
        return Ok(Constant::Float(scalar as f32));
    }
    let seq = value
        .as_sequence()
        .ok_or_else(|| Error::Parse("constant value is neither scalar nor sequence".to_string()))?;
    let floats: Vec<f32> = seq
        .iter()
        .filter_map(Value::as_f64)
        .map(|v| v as f32)
        .collect();
    if floats.len() != seq.len() {
        return Err(Error::Parse("constant sequence holds non-floats".to_string()));
    }
    match floats.as_slice() {
        [x, y] => Ok(Constant::Vec2([*x, *y])),
        [x, y, z] => Ok(Constant::Vec3([*x, *y, *z])),
        [x, y, z, w] => Ok(Constant::Vec4([*x, *y, *z, *w])),
        _ => Err(Error::Parse(format!(
            "constant sequence of length {} unsupported",
            floats.len()
        ))),
    }
}

fn parse_render_options(value: &Value) -> Result<RenderOptions> {
    let mut options = RenderOptions::default();
    if let Some(options_value) = value.get("options") {
        if let Some(mode_name) = options_value.get("polygonMode").and_then(Value::as_str) {
            options.polygon_mode = PolygonMode::from_name(mode_name).ok_or_else(|| {
                Error::Parse(format!("unknown polygon mode {}", mode_name))
            })?;
        }
    }
    Ok(options)
}

fn parse_shape(value: &Value) -> Result<Box<dyn Shape>> {
    match value.get("shape") {
        None => Ok(Box::new(Quad::new(1, 1))),
        Some(shape_value) => {
            let shape_name = shape_value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Quad");
            if shape_name != "Quad" {
                return Err(Error::Parse(format!("unknown shape {}", shape_name)));
            }
            let width_edges = shape_value
                .get("widthEdges")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            let height_edges = shape_value
                .get("heightEdges")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            Ok(Box::new(Quad::new(width_edges, height_edges)))
        }
    }
}

fn parse_sampler(value: &Value) -> Result<(usize, ImageArgType, AbstractSampler)> {
    let image_index = value
        .get("imageIndex")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Parse("sampler block missing imageIndex".to_string()))?
        as usize;
    let image_arg_type = match value.get("imageArgType").and_then(Value::as_str) {
        None | Some("constant") => ImageArgType::Constant,
        Some("parameter") => ImageArgType::Parameter,
        Some(other) => {
            return Err(Error::Parse(format!(
                "sampler block has unknown imageArgType {}",
                other
            )))
        }
    };

    let mut sampler = AbstractSampler::new();
    if let Some(mode) = value.get("minFilter").and_then(Value::as_str) {
        sampler.min_filter = parse_filter(mode)?;
    }
    if let Some(mode) = value.get("magFilter").and_then(Value::as_str) {
        sampler.mag_filter = parse_filter(mode)?;
    }
    if let Some(mode) = value.get("mipmapFilter").and_then(Value::as_str) {
        sampler.mipmap_filter = parse_filter(mode)?;
    }
    if let Some(mode) = value.get("addressModeU").and_then(Value::as_str) {
        sampler.address_mode_u = parse_address_mode(mode)?;
    }
    if let Some(mode) = value.get("addressModeV").and_then(Value::as_str) {
        sampler.address_mode_v = parse_address_mode(mode)?;
    }
    if let Some(color) = value.get("borderColor").and_then(Value::as_str) {
        sampler.border_color = match color {
            "transparentBlack" => BorderColor::TransparentBlack,
            "black" => BorderColor::OpaqueBlack,
            "white" => BorderColor::OpaqueWhite,
            other => {
                return Err(Error::Parse(format!("unknown border color {}", other)));
            }
        };
    }
    sampler.anisotropic_filtering = value
        .get("anisotropic")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok((image_index, image_arg_type, sampler))
}

fn parse_filter(mode: &str) -> Result<FilterMode> {
    match mode {
        "linear" => Ok(FilterMode::Linear),
        "nearest" => Ok(FilterMode::Nearest),
        other => Err(Error::Parse(format!("unknown filter mode {}", other))),
    }
}

fn parse_address_mode(mode: &str) -> Result<AddressMode> {
    match mode {
        "clampToBorder" => Ok(AddressMode::ClampToBorder),
        "clampToEdge" => Ok(AddressMode::ClampToEdge),
        "repeat" => Ok(AddressMode::Repeat),
        "mirroredRepeat" => Ok(AddressMode::MirroredRepeat),
        other => Err(Error::Parse(format!("unknown address mode {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSTANT_VGEN: &str = r#"
name: Constant
rates: [frame, shape, pixel]
inputs: [value]
outputs: [out]
dimensions:
  - inputs: [1]
    outputs: [4]
fragment: "@out = vec4(@value, @value, @value, 1.0f);"
"#;

    #[test]
    fn parses_a_vgen_document() {
        let registry = VGenRegistry::new();
        assert_eq!(registry.parse_str(CONSTANT_VGEN), 1);
        let vgen = registry.lookup("Constant").unwrap();
        assert_eq!(vgen.inputs(), &["value".to_string()]);
        assert_eq!(vgen.output_dimensions(), &[vec![4]]);
        assert!(!vgen.is_sampler());
    }

    #[test]
    fn skips_invalid_vgen_documents() {
        let registry = VGenRegistry::new();
        let yaml = format!(
            "{}\n---\nname: Broken\nfragment: \"@out = @missing;\"\n",
            CONSTANT_VGEN
        );
        assert_eq!(registry.parse_str(&yaml), 1);
        assert!(registry.lookup("Broken").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn parses_and_builds_a_scinthdef() {
        let registry = VGenRegistry::new();
        registry.parse_str(CONSTANT_VGEN);

        let yaml = r#"
name: solid
vgens:
  - className: Constant
    rate: pixel
    inputs:
      - type: constant
        value: 0.5
    outputs:
      - dimension: 4
"#;
        let defs = parse_scinthdefs_str(&registry, yaml);
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.name(), "solid");
        assert!(!def.has_compute_stage());
        assert!(def.fragment_shader().contains("vec4(0.5f, 0.5f, 0.5f, 1.0f)"));
    }

    #[test]
    fn unknown_class_name_skips_the_document() {
        let registry = VGenRegistry::new();
        let yaml = r#"
name: mystery
vgens:
  - className: DoesNotExist
    rate: pixel
"#;
        let defs = parse_scinthdefs_str(&registry, yaml);
        assert!(defs.is_empty());
    }

    #[test]
    fn parses_tweens() {
        let registry = VGenRegistry::new();
        registry.parse_str(CONSTANT_VGEN);
        let yaml = r#"
name: tweened
tweens:
  - dimension: 1
    sampleRate: 256
    levels: [0.0, 1.0, 0.0]
    durations: [0.5, 1.5]
    curves: [18, 2]
vgens:
  - className: Constant
    rate: pixel
    inputs:
      - type: constant
        value: 1.0
    outputs:
      - dimension: 4
"#;
        let defs = parse_scinthdefs_str(&registry, yaml);
        assert_eq!(defs.len(), 1);
        let tweens = defs[0].tweens();
        assert_eq!(tweens.len(), 1);
        assert_eq!(tweens[0].curves, vec![Curve::Linear, Curve::BackOut]);
        assert_eq!(tweens[0].total_time, 2.0);

        // A malformed tween drops the document.
        let bad = yaml.replace("durations: [0.5, 1.5]", "durations: [0.5]");
        assert!(parse_scinthdefs_str(&registry, &bad).is_empty());
    }

    #[test]
    fn parses_parameters_and_shape() {
        let registry = VGenRegistry::new();
        registry.parse_str(
            r#"
name: Bright
inputs: [level]
outputs: [out]
dimensions:
  - inputs: [1]
    outputs: [4]
fragment: "@out = vec4(@level, @level, @level, 1.0f);"
"#,
        );
        let yaml = r#"
name: lit
shape:
  name: Quad
  widthEdges: 4
  heightEdges: 3
parameters:
  - name: bright
    defaultValue: 0.75
vgens:
  - className: Bright
    rate: pixel
    inputs:
      - type: parameter
        index: 0
    outputs:
      - dimension: 4
"#;
        let defs = parse_scinthdefs_str(&registry, yaml);
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.parameters().len(), 1);
        assert_eq!(def.parameters()[0].name(), "bright");
        assert_eq!(def.parameters()[0].default_value(), 0.75);
        assert_eq!(def.shape().number_of_vertices(), 20);
        assert!(def
            .fragment_shader()
            .contains("_parameters.bright"));
    }
}
