use crate::render::{RenderDevice, RenderQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    G8,
    RGBA8,
}

impl PixelFormat {
    pub fn bytes(&self) -> u32 {
        match self {
            PixelFormat::G8 => 1,
            PixelFormat::RGBA8 => 4,
        }
    }
}

impl From<&PixelFormat> for wgpu::TextureFormat {
    fn from(p: &PixelFormat) -> Self {
        match p {
            PixelFormat::G8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::RGBA8 => wgpu::TextureFormat::Rgba8UnormSrgb,
        }
    }
}

/// Borrowed pixel data ready for upload.
pub struct RawImage<'a> {
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl<'a> RawImage<'a> {
    pub fn new(bytes: &'a [u8], dim: (u32, u32), pixel_format: PixelFormat) -> Self {
        Self {
            bytes,
            width: dim.0,
            height: dim.1,
            pixel_format,
        }
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.pixel_format.bytes() * self.width
    }
}

/// A texture uploaded to the device together with its default view.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn from_raw_image(
        device: &RenderDevice,
        queue: &RenderQueue,
        raw_img: &RawImage,
        label: Option<&str>,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: raw_img.width,
            height: raw_img.height,
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: (&raw_img.pixel_format).into(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        });

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            raw_img.bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: std::num::NonZeroU32::new(raw_img.bytes_per_row()),
                rows_per_image: std::num::NonZeroU32::new(raw_img.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// Fallback image bound to sampler slots before a client supplies
    /// anything: a single opaque white pixel.
    pub fn white_pixel(device: &RenderDevice, queue: &RenderQueue) -> Self {
        let bytes = [0xffu8; 4];
        let raw = RawImage::new(&bytes, (1, 1), PixelFormat::RGBA8);
        Self::from_raw_image(device, queue, &raw, Some("empty image"))
    }
}
