use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use crate::base::element::ElementType;
use crate::base::intrinsic::Intrinsic;
use crate::error::{Error, Result};

bitflags! {
    /// Supported rates for a VGen template.
    pub struct Rates: u32 {
        const FRAME = 1;
        const SHAPE = 2;
        const PIXEL = 4;
    }
}

/// The stage a VGen instance computes at. Ordering matters: along any input
/// edge the upstream rate must not exceed the downstream rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rate {
    Frame,
    Shape,
    Pixel,
}

impl Rate {
    pub fn from_name(name: &str) -> Option<Rate> {
        match name {
            "frame" => Some(Rate::Frame),
            "shape" => Some(Rate::Shape),
            "pixel" => Some(Rate::Pixel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rate::Frame => "frame",
            Rate::Shape => "shape",
            Rate::Pixel => "pixel",
        }
    }

    pub fn flag(&self) -> Rates {
        match self {
            Rate::Frame => Rates::FRAME,
            Rate::Shape => Rates::SHAPE,
            Rate::Pixel => Rates::PIXEL,
        }
    }
}

/// A resolved span of the shader template, produced once by
/// `prepare_template` so parameterization is a straight concatenation.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Input(usize),
    Output(usize),
    Intrinsic(Intrinsic),
}

/// Template for one generator: a parameterizable shader fragment with
/// declared inputs, outputs, per-configuration dimensions and supported
/// rates. Immutable once `prepare_template` succeeds.
#[derive(Debug)]
pub struct AbstractVGen {
    name: String,
    supported_rates: Rates,
    is_sampler: bool,
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_dimensions: Vec<Vec<usize>>,
    output_dimensions: Vec<Vec<usize>>,
    shader: String,

    intrinsics: HashSet<Intrinsic>,
    segments: Vec<Segment>,
    valid: bool,
}

impl AbstractVGen {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        supported_rates: Rates,
        is_sampler: bool,
        inputs: Vec<String>,
        outputs: Vec<String>,
        input_dimensions: Vec<Vec<usize>>,
        output_dimensions: Vec<Vec<usize>>,
        shader: &str,
    ) -> AbstractVGen {
        AbstractVGen {
            name: name.to_string(),
            supported_rates,
            is_sampler,
            inputs,
            outputs,
            input_dimensions,
            output_dimensions,
            shader: shader.to_string(),
            intrinsics: HashSet::new(),
            segments: Vec::new(),
            valid: false,
        }
    }

    /// Scans the shader template, resolves every `@name` placeholder and
    /// checks the declaration tables. Must succeed before the template can
    /// be parameterized.
    pub fn prepare_template(&mut self) -> Result<()> {
        self.valid = false;

        if self.outputs.is_empty() {
            return Err(Error::Validation(format!(
                "vgen {} declares no outputs",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for name in self.inputs.iter().chain(self.outputs.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(Error::Validation(format!(
                    "vgen {} declares duplicate name {}",
                    self.name, name
                )));
            }
            if is_reserved(name) {
                return Err(Error::Validation(format!(
                    "vgen {} declares reserved name {}",
                    self.name, name
                )));
            }
        }

        if self.input_dimensions.len() != self.output_dimensions.len()
            || self.output_dimensions.is_empty()
        {
            return Err(Error::Validation(format!(
                "vgen {} has mismatched dimension tables",
                self.name
            )));
        }
        for (input_dims, output_dims) in self
            .input_dimensions
            .iter()
            .zip(self.output_dimensions.iter())
        {
            if input_dims.len() != self.inputs.len() || output_dims.len() != self.outputs.len() {
                return Err(Error::Validation(format!(
                    "vgen {} has dimension tuple of wrong arity",
                    self.name
                )));
            }
        }

        self.segments = self.scan_template()?;
        self.intrinsics = self
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Intrinsic(intrinsic) => Some(*intrinsic),
                _ => None,
            })
            .collect();

        self.valid = true;
        Ok(())
    }

    fn scan_template(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = self.shader.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            if c != '@' {
                literal.push(c);
                continue;
            }
            let mut tag = String::new();
            while let Some((_, t)) = chars.peek() {
                if t.is_ascii_alphanumeric() || *t == '_' {
                    tag.push(*t);
                    chars.next();
                } else {
                    break;
                }
            }
            if tag.is_empty() {
                literal.push('@');
                continue;
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            if let Some(index) = self.inputs.iter().position(|name| *name == tag) {
                segments.push(Segment::Input(index));
            } else if let Some(index) = self.outputs.iter().position(|name| *name == tag) {
                segments.push(Segment::Output(index));
            } else {
                let intrinsic = Intrinsic::from_tag(&tag);
                if intrinsic == Intrinsic::NotFound {
                    return Err(Error::Validation(format!(
                        "vgen {} references unknown placeholder @{}",
                        self.name, tag
                    )));
                }
                segments.push(Segment::Intrinsic(intrinsic));
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(segments)
    }

    /// Substitutes resolved names into the template. The first occurrence
    /// of each output placeholder is emitted as a typed declaration unless
    /// the name is in `already_defined`.
    pub fn parameterize(
        &self,
        inputs: &[String],
        intrinsics: &HashMap<Intrinsic, String>,
        outputs: &[String],
        output_dimensions: &[usize],
        already_defined: &HashSet<String>,
    ) -> Result<String> {
        if !self.valid {
            return Err(Error::Validation(format!(
                "vgen {} parameterized before template preparation",
                self.name
            )));
        }
        if inputs.len() != self.inputs.len() || outputs.len() != self.outputs.len() {
            return Err(Error::Validation(format!(
                "vgen {} parameterized with wrong arity, {} inputs and {} outputs",
                self.name,
                inputs.len(),
                outputs.len()
            )));
        }

        let mut defined: HashSet<&str> = already_defined.iter().map(|s| s.as_str()).collect();
        let mut body = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(text) => body.push_str(text),
                Segment::Input(index) => body.push_str(&inputs[*index]),
                Segment::Output(index) => {
                    let name = outputs[*index].as_str();
                    if defined.insert(name) {
                        let dimension = output_dimensions.get(*index).copied().unwrap_or(1);
                        let element_type =
                            ElementType::from_dimension(dimension).ok_or_else(|| {
                                Error::Validation(format!(
                                    "vgen {} output {} has dimension {}",
                                    self.name, name, dimension
                                ))
                            })?;
                        body.push_str(element_type.type_name());
                        body.push(' ');
                    }
                    body.push_str(name);
                }
                Segment::Intrinsic(intrinsic) => {
                    let substitution = intrinsics.get(intrinsic).ok_or_else(|| {
                        Error::Validation(format!(
                            "vgen {} missing substitution for intrinsic {:?}",
                            self.name, intrinsic
                        ))
                    })?;
                    body.push_str(substitution);
                }
            }
        }
        Ok(body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported_rates(&self) -> Rates {
        self.supported_rates
    }

    pub fn is_sampler(&self) -> bool {
        self.is_sampler
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn input_dimensions(&self) -> &[Vec<usize>] {
        &self.input_dimensions
    }

    pub fn output_dimensions(&self) -> &[Vec<usize>] {
        &self.output_dimensions
    }

    pub fn intrinsics(&self) -> &HashSet<Intrinsic> {
        &self.intrinsics
    }

    pub fn valid(&self) -> bool {
        self.valid
    }
}

/// Identifiers a VGen may not claim for its own inputs or outputs: the
/// intrinsic tags and anything in the GLSL reserved namespace.
fn is_reserved(name: &str) -> bool {
    name.starts_with("gl_") || Intrinsic::from_tag(name) != Intrinsic::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel_vgen(
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
        input_dims: Vec<Vec<usize>>,
        output_dims: Vec<Vec<usize>>,
        shader: &str,
    ) -> AbstractVGen {
        AbstractVGen::new(
            name,
            Rates::PIXEL,
            false,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
            input_dims,
            output_dims,
            shader,
        )
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut dup_in = pixel_vgen(
            "dupIn",
            &["in1", "in1"],
            &["out"],
            vec![vec![1, 1]],
            vec![vec![1]],
            "@out = @in1 + @in1;",
        );
        assert!(dup_in.prepare_template().is_err());
        assert!(!dup_in.valid());

        let mut dup_out = pixel_vgen(
            "dupOut",
            &[],
            &["out", "out"],
            vec![vec![]],
            vec![vec![1, 1]],
            "@out = 2.0f;",
        );
        assert!(dup_out.prepare_template().is_err());

        let mut cross = pixel_vgen(
            "inCrossOut",
            &["cross"],
            &["cross"],
            vec![vec![1]],
            vec![vec![1]],
            "@cross = @cross;",
        );
        assert!(cross.prepare_template().is_err());
    }

    #[test]
    fn reserved_names_rejected() {
        let mut time_input = pixel_vgen(
            "timeInput",
            &["time"],
            &["out"],
            vec![vec![1]],
            vec![vec![1]],
            "@out = @time;",
        );
        assert!(time_input.prepare_template().is_err());

        let mut gl_output = pixel_vgen(
            "glOutput",
            &[],
            &["gl_thing"],
            vec![vec![]],
            vec![vec![1]],
            "@gl_thing = 1.0f;",
        );
        assert!(gl_output.prepare_template().is_err());
    }

    #[test]
    fn unknown_placeholders_rejected() {
        let mut unknown = pixel_vgen(
            "noParams",
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![1]],
            "@out = sin(@freq * 2 * @pi * @time);",
        );
        assert!(unknown.prepare_template().is_err());

        let mut absent = pixel_vgen(
            "absentInputParam",
            &["a"],
            &["out"],
            vec![vec![1]],
            vec![vec![1]],
            "@out = @time * (@a + @b);",
        );
        assert!(absent.prepare_template().is_err());

        let mut no_outputs = pixel_vgen(
            "absentOutputParam",
            &["a"],
            &[],
            vec![vec![1]],
            vec![vec![]],
            "@out = 1.0f;",
        );
        assert!(no_outputs.prepare_template().is_err());
    }

    #[test]
    fn parameterize_checks_arity() {
        let mut mismatch = pixel_vgen(
            "mismatchInput",
            &["in1", "in2"],
            &["out"],
            vec![vec![1, 1]],
            vec![vec![1]],
            "@out = @in1 + @in2 / 2.0;",
        );
        mismatch.prepare_template().unwrap();
        let result = mismatch.parameterize(
            &["onlyOne".to_string()],
            &HashMap::new(),
            &["out".to_string()],
            &[1],
            &HashSet::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn parameterize_declares_outputs_on_first_use() {
        let mut constant = pixel_vgen(
            "constant",
            &[],
            &["out"],
            vec![vec![]],
            vec![vec![1]],
            "@out = 2.0f;",
        );
        constant.prepare_template().unwrap();
        let body = constant
            .parameterize(
                &[],
                &HashMap::new(),
                &["subOut".to_string()],
                &[1],
                &HashSet::new(),
            )
            .unwrap();
        assert_eq!(body, "float subOut = 2.0f;");
    }

    #[test]
    fn parameterize_substitutes_inputs_and_intrinsics() {
        let mut vgen = pixel_vgen(
            "moreComplex",
            &["freq", "phase", "mul", "add"],
            &["out"],
            vec![vec![1, 1, 1, 1]],
            vec![vec![4]],
            "float temp = @add + @mul * (sin((@time * 2.0 * @pi * @freq) + @phase));\n\
             @out = vec4(temp, temp, temp, 1.0);\n",
        );
        vgen.prepare_template().unwrap();
        assert!(vgen.intrinsics().contains(&Intrinsic::Time));
        assert!(vgen.intrinsics().contains(&Intrinsic::Pi));

        let mut intrinsics = HashMap::new();
        intrinsics.insert(Intrinsic::Time, "time".to_string());
        intrinsics.insert(Intrinsic::Pi, "3.14159".to_string());
        let already_defined: HashSet<String> = ["fragColor".to_string()].into_iter().collect();

        let body = vgen
            .parameterize(
                &[
                    "otherVGen_out".to_string(),
                    "normPos.x".to_string(),
                    "ubo.mul".to_string(),
                    "0.5f".to_string(),
                ],
                &intrinsics,
                &["fragColor".to_string()],
                &[4],
                &already_defined,
            )
            .unwrap();
        assert_eq!(
            body,
            "float temp = 0.5f + ubo.mul * (sin((time * 2.0 * 3.14159 * otherVGen_out) + normPos.x));\n\
             fragColor = vec4(temp, temp, temp, 1.0);\n"
        );
    }

    #[test]
    fn rate_ordering_is_frame_shape_pixel() {
        assert!(Rate::Frame < Rate::Shape);
        assert!(Rate::Shape < Rate::Pixel);
        assert_eq!(Rate::from_name("shape"), Some(Rate::Shape));
        assert_eq!(Rate::from_name("vertex"), None);
    }
}
