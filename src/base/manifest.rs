use crate::base::element::ElementType;
use crate::base::intrinsic::Intrinsic;

/// One named entry in a packed layout table.
#[derive(Debug, Clone)]
pub struct ManifestElement {
    name: String,
    element_type: ElementType,
    intrinsic: Option<Intrinsic>,
    offset: u32,
}

impl ManifestElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn type_name(&self) -> &'static str {
        self.element_type.type_name()
    }

    /// Byte offset assigned by `pack()`.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn byte_size(&self) -> u32 {
        self.element_type.byte_size()
    }

    /// The intrinsic this element carries data for, or None when it is a
    /// VGen output.
    pub fn intrinsic(&self) -> Option<Intrinsic> {
        self.intrinsic
    }
}

/// Ordered, packed layout table mapping named elements to byte offsets.
/// Used for vertex attributes, fragment varyings, uniform-block members and
/// compute-output buffers.
///
/// Elements keep insertion order. Inserting a name twice is a no-op, since
/// several VGens may register the same intrinsic-backed element.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    elements: Vec<ManifestElement>,
    stride: u32,
}

impl Manifest {
    pub fn new() -> Manifest {
        Manifest::default()
    }

    pub fn add_element(&mut self, name: &str, element_type: ElementType) {
        self.insert(name, element_type, None);
    }

    pub fn add_element_with_intrinsic(
        &mut self,
        name: &str,
        element_type: ElementType,
        intrinsic: Intrinsic,
    ) {
        self.insert(name, element_type, Some(intrinsic));
    }

    fn insert(&mut self, name: &str, element_type: ElementType, intrinsic: Option<Intrinsic>) {
        if self.elements.iter().any(|e| e.name == name) {
            return;
        }
        self.elements.push(ManifestElement {
            name: name.to_string(),
            element_type,
            intrinsic,
            offset: 0,
        });
    }

    /// Assigns contiguous byte offsets respecting each element's natural
    /// alignment and computes the total stride. Idempotent.
    pub fn pack(&mut self) {
        let mut cursor = 0u32;
        let mut max_align = 4u32;
        for element in self.elements.iter_mut() {
            let align = element.element_type.alignment();
            max_align = max_align.max(align);
            cursor = align_up(cursor, align);
            element.offset = cursor;
            cursor += element.element_type.byte_size();
        }
        self.stride = if self.elements.is_empty() {
            0
        } else {
            align_up(cursor, max_align)
        };
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total packed size of one record, valid after `pack()`.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn element(&self, index: usize) -> &ManifestElement {
        &self.elements[index]
    }

    pub fn elements(&self) -> impl Iterator<Item = &ManifestElement> {
        self.elements.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_with_natural_alignment() {
        let mut manifest = Manifest::new();
        manifest.add_element("a", ElementType::Float);
        manifest.add_element("b", ElementType::Vec2);
        manifest.add_element("c", ElementType::Float);
        manifest.add_element("d", ElementType::Vec3);
        manifest.pack();

        assert_eq!(manifest.element(0).offset(), 0);
        assert_eq!(manifest.element(1).offset(), 8);
        assert_eq!(manifest.element(2).offset(), 16);
        assert_eq!(manifest.element(3).offset(), 32);
        // 32 + 12 = 44, rounded up to the largest member alignment (16).
        assert_eq!(manifest.stride(), 48);
    }

    #[test]
    fn packing_twice_is_identical() {
        let mut manifest = Manifest::new();
        manifest.add_element("time", ElementType::Float);
        manifest.add_element("color", ElementType::Vec4);
        manifest.pack();
        let offsets: Vec<u32> = manifest.elements().map(|e| e.offset()).collect();
        let stride = manifest.stride();

        manifest.pack();
        let offsets_again: Vec<u32> = manifest.elements().map(|e| e.offset()).collect();
        assert_eq!(offsets, offsets_again);
        assert_eq!(stride, manifest.stride());
    }

    #[test]
    fn duplicate_names_keep_first_entry() {
        let mut manifest = Manifest::new();
        manifest.add_element_with_intrinsic("normPos", ElementType::Vec2, Intrinsic::NormPos);
        manifest.add_element("normPos", ElementType::Vec4);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.element(0).element_type(), ElementType::Vec2);
        assert_eq!(manifest.element(0).intrinsic(), Some(Intrinsic::NormPos));
    }

    #[test]
    fn empty_manifest_has_zero_stride() {
        let mut manifest = Manifest::new();
        manifest.pack();
        assert!(manifest.is_empty());
        assert_eq!(manifest.stride(), 0);
    }
}
