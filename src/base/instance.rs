use std::sync::Arc;

use crate::base::sampler::AbstractSampler;
use crate::base::vgen::{AbstractVGen, Rate};
use crate::error::{Error, Result};

/// A constant input value, one to four channels wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl Constant {
    pub fn dimension(&self) -> usize {
        match self {
            Constant::Float(_) => 1,
            Constant::Vec2(_) => 2,
            Constant::Vec3(_) => 3,
            Constant::Vec4(_) => 4,
        }
    }

    /// GLSL literal for this constant, floats carrying an `f` suffix. The
    /// debug float formatting keeps the decimal point integral values need
    /// for the suffix to parse.
    pub fn glsl_literal(&self) -> String {
        match self {
            Constant::Float(v) => format!("{:?}f", v),
            Constant::Vec2(v) => format!("vec2({:?}f, {:?}f)", v[0], v[1]),
            Constant::Vec3(v) => format!("vec3({:?}f, {:?}f, {:?}f)", v[0], v[1], v[2]),
            Constant::Vec4(v) => {
                format!("vec4({:?}f, {:?}f, {:?}f, {:?}f)", v[0], v[1], v[2], v[3])
            }
        }
    }
}

/// One bound input of a VGen instance.
#[derive(Debug, Clone, PartialEq)]
pub enum VGenInput {
    Constant(Constant),
    /// Index into the ScinthDef parameter list.
    Parameter(usize),
    /// Output of an earlier instance in the graph.
    VGen {
        index: usize,
        output: usize,
        dimension: usize,
    },
}

impl VGenInput {
    pub fn dimension(&self) -> usize {
        match self {
            VGenInput::Constant(constant) => constant.dimension(),
            VGenInput::Parameter(_) => 1,
            VGenInput::VGen { dimension, .. } => *dimension,
        }
    }
}

/// How a sampling VGen receives its image argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageArgType {
    Constant,
    Parameter,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub image_index: usize,
    pub image_arg_type: ImageArgType,
    pub sampler: AbstractSampler,
}

/// One node in a ScinthDef signal graph: an AbstractVGen, a chosen rate,
/// bound inputs and advertised output dimensions. Mutable only while the
/// graph is under construction.
#[derive(Debug, Clone)]
pub struct VGenInstance {
    abstract_vgen: Arc<AbstractVGen>,
    rate: Rate,
    inputs: Vec<VGenInput>,
    output_dimensions: Vec<usize>,
    sampler_config: Option<SamplerConfig>,
}

impl VGenInstance {
    pub fn new(abstract_vgen: Arc<AbstractVGen>, rate: Rate) -> VGenInstance {
        VGenInstance {
            abstract_vgen,
            rate,
            inputs: Vec::new(),
            output_dimensions: Vec::new(),
            sampler_config: None,
        }
    }

    pub fn add_constant_input(&mut self, constant: Constant) {
        self.inputs.push(VGenInput::Constant(constant));
    }

    pub fn add_parameter_input(&mut self, parameter_index: usize) {
        self.inputs.push(VGenInput::Parameter(parameter_index));
    }

    pub fn add_vgen_input(&mut self, vgen_index: usize, output_index: usize, dimension: usize) {
        self.inputs.push(VGenInput::VGen {
            index: vgen_index,
            output: output_index,
            dimension,
        });
    }

    pub fn add_output(&mut self, dimension: usize) {
        self.output_dimensions.push(dimension);
    }

    pub fn set_sampler_config(
        &mut self,
        image_index: usize,
        image_arg_type: ImageArgType,
        sampler: AbstractSampler,
    ) {
        self.sampler_config = Some(SamplerConfig {
            image_index,
            image_arg_type,
            sampler,
        });
    }

    /// Checks this instance against its template and its position in the
    /// graph. `self_index` is the instance's position in the ScinthDef
    /// instance list; VGen inputs may only reference earlier positions.
    pub fn validate(&self, self_index: usize) -> Result<()> {
        let name = self.abstract_vgen.name();

        if self.inputs.len() != self.abstract_vgen.inputs().len() {
            return Err(Error::Validation(format!(
                "input size mismatch for vgen {}, expected {}, got {}",
                name,
                self.abstract_vgen.inputs().len(),
                self.inputs.len()
            )));
        }

        if (self.rate.flag() & self.abstract_vgen.supported_rates()).is_empty() {
            return Err(Error::Validation(format!(
                "unsupported rate {} for vgen {}",
                self.rate.name(),
                name
            )));
        }

        for input in self.inputs.iter() {
            if let VGenInput::VGen { index, .. } = input {
                if *index >= self_index {
                    return Err(Error::Validation(format!(
                        "vgen {} at index {} references non-topological input index {}",
                        name, self_index, index
                    )));
                }
            }
        }

        // The advertised output dimensions must match one of the template's
        // allowed configurations, and the bound inputs must agree with that
        // configuration's input tuple.
        let config = self
            .abstract_vgen
            .output_dimensions()
            .iter()
            .position(|dims| dims.as_slice() == self.output_dimensions.as_slice())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "vgen {} advertises unsupported output dimensions {:?}",
                    name, self.output_dimensions
                ))
            })?;
        let input_dims = &self.abstract_vgen.input_dimensions()[config];
        for (input, expected) in self.inputs.iter().zip(input_dims.iter()) {
            if input.dimension() != *expected {
                return Err(Error::Validation(format!(
                    "vgen {} input dimension {} does not match expected {}",
                    name,
                    input.dimension(),
                    expected
                )));
            }
        }

        if self.abstract_vgen.is_sampler() && self.sampler_config.is_none() {
            return Err(Error::Validation(format!(
                "sampling vgen {} has no sampler configuration",
                name
            )));
        }
        if !self.abstract_vgen.is_sampler() && self.sampler_config.is_some() {
            return Err(Error::Validation(format!(
                "vgen {} is not a sampler but carries a sampler configuration",
                name
            )));
        }

        Ok(())
    }

    pub fn abstract_vgen(&self) -> &Arc<AbstractVGen> {
        &self.abstract_vgen
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn inputs(&self) -> &[VGenInput] {
        &self.inputs
    }

    pub fn number_of_outputs(&self) -> usize {
        self.output_dimensions.len()
    }

    pub fn output_dimension(&self, output: usize) -> usize {
        self.output_dimensions[output]
    }

    pub fn output_dimensions(&self) -> &[usize] {
        &self.output_dimensions
    }

    pub fn sampler_config(&self) -> Option<&SamplerConfig> {
        self.sampler_config.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::vgen::Rates;

    fn passthrough() -> Arc<AbstractVGen> {
        let mut vgen = AbstractVGen::new(
            "passthrough",
            Rates::PIXEL | Rates::SHAPE,
            false,
            vec!["in".to_string()],
            vec!["out".to_string()],
            vec![vec![1]],
            vec![vec![1]],
            "@out = @in;",
        );
        vgen.prepare_template().unwrap();
        Arc::new(vgen)
    }

    #[test]
    fn validates_input_arity() {
        let instance = VGenInstance::new(passthrough(), Rate::Pixel);
        assert!(instance.validate(0).is_err());
    }

    #[test]
    fn validates_rate_support() {
        let mut instance = VGenInstance::new(passthrough(), Rate::Frame);
        instance.add_constant_input(Constant::Float(1.0));
        instance.add_output(1);
        assert!(instance.validate(0).is_err());
    }

    #[test]
    fn validates_topological_references() {
        let mut instance = VGenInstance::new(passthrough(), Rate::Pixel);
        instance.add_vgen_input(1, 0, 1);
        instance.add_output(1);
        assert!(instance.validate(1).is_err());

        let mut ordered = VGenInstance::new(passthrough(), Rate::Pixel);
        ordered.add_vgen_input(0, 0, 1);
        ordered.add_output(1);
        assert!(ordered.validate(1).is_ok());
    }

    #[test]
    fn validates_dimensions() {
        let mut wrong_output = VGenInstance::new(passthrough(), Rate::Pixel);
        wrong_output.add_constant_input(Constant::Float(0.0));
        wrong_output.add_output(3);
        assert!(wrong_output.validate(0).is_err());

        let mut wrong_input = VGenInstance::new(passthrough(), Rate::Pixel);
        wrong_input.add_constant_input(Constant::Vec2([0.0, 1.0]));
        wrong_input.add_output(1);
        assert!(wrong_input.validate(0).is_err());
    }

    #[test]
    fn constant_literals_carry_float_suffix() {
        assert_eq!(Constant::Float(0.5).glsl_literal(), "0.5f");
        assert_eq!(Constant::Float(1.0).glsl_literal(), "1.0f");
        assert_eq!(
            Constant::Vec2([0.0, 1.0]).glsl_literal(),
            "vec2(0.0f, 1.0f)"
        );
    }
}
