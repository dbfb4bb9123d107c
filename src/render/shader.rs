use std::borrow::Cow;

use log::error;

use crate::error::{Error, Result};
use crate::render::RenderDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    fn naga_stage(&self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Translates GLSL sources emitted by the ScinthDef compiler into shader
/// modules on the device.
pub struct ShaderCompiler;

impl ShaderCompiler {
    /// Compiles one stage. A driver-side parse or validation failure is
    /// captured through an error scope and surfaced as `ShaderCompile`,
    /// with the rejected source logged for inspection.
    pub fn compile(
        device: &RenderDevice,
        name: &str,
        source: &str,
        stage: ShaderStage,
    ) -> Result<wgpu::ShaderModule> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage: stage.naga_stage(),
                defines: naga::FastHashMap::default(),
            },
        });
        let scope_error = futures_lite::future::block_on(device.pop_error_scope());
        match scope_error {
            None => Ok(module),
            Some(err) => {
                error!("shader {} failed to compile:\n{}", name, source);
                Err(Error::ShaderCompile {
                    name: name.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }
}
