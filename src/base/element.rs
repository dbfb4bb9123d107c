/// The data types a manifest element or VGen output can take on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl ElementType {
    /// Maps a VGen output dimension to an element type. Matrices are never
    /// VGen outputs, so only 1-4 resolve.
    pub fn from_dimension(dimension: usize) -> Option<ElementType> {
        match dimension {
            1 => Some(ElementType::Float),
            2 => Some(ElementType::Vec2),
            3 => Some(ElementType::Vec3),
            4 => Some(ElementType::Vec4),
            _ => None,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            ElementType::Float => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
            ElementType::Mat4 => 16,
        }
    }

    pub fn byte_size(&self) -> u32 {
        match self {
            ElementType::Float => 4,
            ElementType::Vec2 => 8,
            ElementType::Vec3 => 12,
            ElementType::Vec4 => 16,
            ElementType::Mat4 => 64,
        }
    }

    /// Natural alignment of the type inside a packed GPU buffer. Note vec3
    /// aligns to 16 bytes, same as vec4.
    pub fn alignment(&self) -> u32 {
        match self {
            ElementType::Float => 4,
            ElementType::Vec2 => 8,
            ElementType::Vec3 => 16,
            ElementType::Vec4 => 16,
            ElementType::Mat4 => 16,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ElementType::Float => "float",
            ElementType::Vec2 => "vec2",
            ElementType::Vec3 => "vec3",
            ElementType::Vec4 => "vec4",
            ElementType::Mat4 => "mat4",
        }
    }

    pub fn vertex_format(&self) -> Option<wgpu::VertexFormat> {
        match self {
            ElementType::Float => Some(wgpu::VertexFormat::Float32),
            ElementType::Vec2 => Some(wgpu::VertexFormat::Float32x2),
            ElementType::Vec3 => Some(wgpu::VertexFormat::Float32x3),
            ElementType::Vec4 => Some(wgpu::VertexFormat::Float32x4),
            // A mat4 vertex attribute would need four slots; no Shape emits one.
            ElementType::Mat4 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_round_trip() {
        for dim in 1..=4 {
            assert_eq!(ElementType::from_dimension(dim).unwrap().dimension(), dim);
        }
        assert!(ElementType::from_dimension(0).is_none());
        assert!(ElementType::from_dimension(5).is_none());
    }

    #[test]
    fn sizes_and_alignment() {
        assert_eq!(ElementType::Vec3.byte_size(), 12);
        assert_eq!(ElementType::Vec3.alignment(), 16);
        assert_eq!(ElementType::Mat4.byte_size(), 64);
        assert_eq!(ElementType::Vec2.type_name(), "vec2");
    }
}
