//! The GPU runtime: device bootstrap, realized ScinthDefs and Scinths, the
//! compositor and the offscreen engine.

use std::ops::Deref;

use log::info;

use crate::error::{Error, Result};

pub mod compositor;
pub mod frame_timer;
pub mod image;
pub mod offscreen;
pub mod sampler;
pub mod scinth;
pub mod scinthdef;
pub mod shader;
pub mod window;

pub struct RenderInstance(pub wgpu::Instance);
pub struct RenderAdapter(pub wgpu::Adapter);
pub struct RenderDevice(pub wgpu::Device);
pub struct RenderQueue(pub wgpu::Queue);

impl Deref for RenderInstance {
    type Target = wgpu::Instance;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for RenderAdapter {
    type Target = wgpu::Adapter;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for RenderDevice {
    type Target = wgpu::Device;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for RenderQueue {
    type Target = wgpu::Queue;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Texture format of offscreen render targets, chosen for direct RGBA
/// readback into encoders.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// The logical GPU: instance, adapter, device and queue, plus the small set
/// of shared resources every pipeline needs. The rest of the server treats
/// this as an opaque handle.
pub struct RenderContext {
    pub instance: RenderInstance,
    pub adapter: RenderAdapter,
    pub device: RenderDevice,
    pub queue: RenderQueue,
    /// 1x1 white texture bound to sampler slots with no image loaded.
    pub empty_image: image::GpuTexture,
}

impl RenderContext {
    /// Creates the wgpu instance, adapter, device and queue. A compatible
    /// surface narrows adapter selection for the windowed path.
    pub fn new(
        instance: wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface>,
    ) -> Result<RenderContext> {
        let power_preference = wgpu::PowerPreference::HighPerformance;

        let adapter = futures_lite::future::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface,
                ..Default::default()
            },
        ))
        .ok_or_else(|| Error::GpuResource("no suitable gpu adapter found".to_string()))?;
        info!("using adapter {}", adapter.get_info().name);

        // Parameters ride in push constants; the other features are
        // best-effort and degraded when absent.
        let adapter_features = adapter.features();
        let mut features = wgpu::Features::PUSH_CONSTANTS;
        for optional in [
            wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
            wgpu::Features::POLYGON_MODE_LINE,
            wgpu::Features::POLYGON_MODE_POINT,
        ] {
            if adapter_features.contains(optional) {
                features |= optional;
            }
        }

        let limits = wgpu::Limits {
            max_push_constant_size: 128,
            ..Default::default()
        };

        let (device, queue) = futures_lite::future::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                features,
                limits,
            },
            None, // trace_path
        ))
        .map_err(|err| Error::GpuResource(format!("device request failed: {}", err)))?;

        let device = RenderDevice(device);
        let queue = RenderQueue(queue);
        let empty_image = image::GpuTexture::white_pixel(&device, &queue);

        Ok(RenderContext {
            instance: RenderInstance(instance),
            adapter: RenderAdapter(adapter),
            device,
            queue,
            empty_image,
        })
    }

    /// Headless context for the offscreen engine.
    pub fn new_offscreen() -> Result<RenderContext> {
        let instance = wgpu::Instance::new(wgpu::Backends::all());
        RenderContext::new(instance, None)
    }

    pub fn supports(&self, feature: wgpu::Features) -> bool {
        self.device.features().contains(feature)
    }
}
