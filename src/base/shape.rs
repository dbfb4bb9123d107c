use crate::base::element::ElementType;
use crate::base::intrinsic::Intrinsic;
use crate::base::manifest::Manifest;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
    TriangleList,
}

impl Topology {
    pub fn primitive_topology(&self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        }
    }
}

/// Abstract 2D mesh generator. Populates vertex data against a requested
/// vertex-attribute manifest, so a Shape only needs to know how to produce
/// the intrinsics the manifest asks for.
pub trait Shape: std::fmt::Debug + Send + Sync {
    /// Element type of the `position` vertex attribute.
    fn element_type(&self) -> ElementType;

    fn topology(&self) -> Topology;

    fn number_of_vertices(&self) -> u32;

    fn number_of_indices(&self) -> u32;

    /// Writes interleaved vertex data into `store`, which must hold
    /// `number_of_vertices() * manifest.stride() / 4` floats. Values land at
    /// the packed offsets of the manifest.
    fn store_vertex_data(
        &self,
        vertex_manifest: &Manifest,
        norm_pos_scale: [f32; 2],
        store: &mut [f32],
    ) -> Result<()>;

    /// Writes `number_of_indices()` 16-bit indices into `store`.
    fn store_index_data(&self, store: &mut [u16]) -> Result<()>;
}

/// A unit quad spanning [-1, 1] on both axes, subdivided into a grid and
/// emitted as one triangle strip with degenerate stitching between rows.
#[derive(Debug, Clone, Copy)]
pub struct Quad {
    width_edges: u32,
    height_edges: u32,
}

impl Quad {
    pub fn new(width_edges: u32, height_edges: u32) -> Quad {
        Quad {
            width_edges: width_edges.max(1),
            height_edges: height_edges.max(1),
        }
    }
}

impl Shape for Quad {
    fn element_type(&self) -> ElementType {
        ElementType::Vec2
    }

    fn topology(&self) -> Topology {
        Topology::TriangleStrip
    }

    fn number_of_vertices(&self) -> u32 {
        (self.width_edges + 1) * (self.height_edges + 1)
    }

    fn number_of_indices(&self) -> u32 {
        let indices_per_row = (self.width_edges + 1) * 2;
        // All but the final row add two indices to restart the strip with
        // degenerate triangles.
        self.height_edges * indices_per_row + (self.height_edges - 1) * 2
    }

    fn store_vertex_data(
        &self,
        vertex_manifest: &Manifest,
        norm_pos_scale: [f32; 2],
        store: &mut [f32],
    ) -> Result<()> {
        let stride_floats = (vertex_manifest.stride() / 4) as usize;
        let upper_left = [-1.0f32, -1.0f32];

        let mut vertex = 0usize;
        for i in 0..=self.height_edges {
            let y = i as f32 / self.height_edges as f32;
            for j in 0..=self.width_edges {
                let v = [j as f32 / self.width_edges as f32, y];
                let base = vertex * stride_floats;
                for k in 0..vertex_manifest.len() {
                    let element = vertex_manifest.element(k);
                    let at = base + (element.offset() / 4) as usize;
                    match element.intrinsic() {
                        Some(Intrinsic::Position) => {
                            store[at] = upper_left[0] + v[0] * 2.0;
                            store[at + 1] = upper_left[1] + v[1] * 2.0;
                        }
                        Some(Intrinsic::NormPos) => {
                            store[at] = (upper_left[0] + v[0] * 2.0) * norm_pos_scale[0];
                            store[at + 1] = (upper_left[1] + v[1] * 2.0) * norm_pos_scale[1];
                        }
                        Some(Intrinsic::TexPos) => {
                            store[at] = v[0];
                            store[at + 1] = v[1];
                        }
                        other => {
                            return Err(Error::Validation(format!(
                                "unsupported vertex manifest intrinsic {:?} in Quad",
                                other
                            )));
                        }
                    }
                }
                vertex += 1;
            }
        }
        Ok(())
    }

    fn store_index_data(&self, store: &mut [u16]) -> Result<()> {
        let width_verts = (self.width_edges + 1) as u16;
        let mut at = 0usize;
        for i in 0..self.height_edges {
            let row_start = i as u16 * width_verts;
            for j in 0..=self.width_edges {
                let top_index = j as u16 + row_start;
                store[at] = top_index;
                store[at + 1] = top_index + width_verts;
                at += 2;
            }
            // Repeat the last index of this row and the first of the next to
            // restart the strip.
            if i < self.height_edges - 1 {
                store[at] = row_start + width_verts + self.width_edges as u16;
                store[at + 1] = row_start + width_verts;
                at += 2;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_manifest() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.add_element_with_intrinsic("position", ElementType::Vec2, Intrinsic::Position);
        manifest.add_element_with_intrinsic("texPos", ElementType::Vec2, Intrinsic::TexPos);
        manifest.pack();
        manifest
    }

    #[test]
    fn counts_match_grid_formulas() {
        let quad = Quad::new(1, 1);
        assert_eq!(quad.number_of_vertices(), 4);
        assert_eq!(quad.number_of_indices(), 4);

        let quad = Quad::new(2, 2);
        assert_eq!(quad.number_of_vertices(), 9);
        assert_eq!(quad.number_of_indices(), 14);

        let quad = Quad::new(4, 3);
        assert_eq!(quad.number_of_vertices(), 20);
        assert_eq!(quad.number_of_indices(), 3 * 10 + 4);
    }

    #[test]
    fn unit_quad_vertex_data() {
        let quad = Quad::new(1, 1);
        let manifest = vertex_manifest();
        let stride_floats = (manifest.stride() / 4) as usize;
        let mut store = vec![0.0f32; 4 * stride_floats];
        quad.store_vertex_data(&manifest, [1.0, 1.0], &mut store)
            .unwrap();

        // Row-major from the upper-left corner.
        assert_eq!(&store[0..4], &[-1.0, -1.0, 0.0, 0.0]);
        assert_eq!(&store[stride_floats..stride_floats + 4], &[1.0, -1.0, 1.0, 0.0]);
        assert_eq!(
            &store[3 * stride_floats..3 * stride_floats + 4],
            &[1.0, 1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn strip_indices_stitch_rows() {
        let quad = Quad::new(1, 2);
        let mut store = vec![0u16; quad.number_of_indices() as usize];
        quad.store_index_data(&mut store).unwrap();
        assert_eq!(store, vec![0, 2, 1, 3, 3, 2, 2, 4, 3, 5]);
    }

    #[test]
    fn rejects_unsupported_manifest_elements() {
        let quad = Quad::new(1, 1);
        let mut manifest = Manifest::new();
        manifest.add_element_with_intrinsic("time", ElementType::Float, Intrinsic::Time);
        manifest.pack();
        let mut store = vec![0.0f32; 8];
        assert!(quad
            .store_vertex_data(&manifest, [1.0, 1.0], &mut store)
            .is_err());
    }
}
