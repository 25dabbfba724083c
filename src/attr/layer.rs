//! Attribute layers, layer groups and the raw geometry capture.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use super::AttrKind;

/// Geometry domains an attribute layer can attach to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Domain {
    /// Points/vertices
    Point = 0,
    /// Edges
    Edge = 1,
    /// Face corners (loops)
    Corner = 2,
    /// Faces
    Face = 3,
}

impl Domain {
    /// Number of geometry domains.
    pub const COUNT: usize = 4;

    /// All domains in storage order.
    pub const ALL: [Domain; Self::COUNT] = [Self::Point, Self::Edge, Self::Corner, Self::Face];

    /// Index of this domain into per-domain arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One named, typed, fixed-stride attribute array.
///
/// `data` holds `elem_count * kind.stride()` raw bytes while the owning
/// snapshot is expanded, and is `None` while it is compacted into the store.
/// The name and kind are retained across compaction so expansion can walk the
/// layer list in lock-step with the stored handles.
#[derive(Clone, Debug, PartialEq)]
pub struct AttrLayer {
    pub name: String,
    pub kind: AttrKind,
    pub data: Option<Vec<u8>>,
}

impl AttrLayer {
    /// Create a layer from raw bytes.
    pub fn new(name: impl Into<String>, kind: AttrKind, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len() % kind.stride(), 0);
        Self {
            name: name.into(),
            kind,
            data: Some(data),
        }
    }

    /// Create a layer from a slice of plain-old-data elements.
    ///
    /// The element type size must equal the kind's stride.
    pub fn from_slice<T: Pod>(name: impl Into<String>, kind: AttrKind, values: &[T]) -> Self {
        assert_eq!(std::mem::size_of::<T>(), kind.stride());
        Self::new(name, kind, bytemuck::cast_slice(values).to_vec())
    }

    /// Create a 3D vector layer (positions, normals).
    pub fn from_vec3(name: impl Into<String>, values: &[Vec3]) -> Self {
        Self::from_slice(name, AttrKind::Float3, values)
    }

    /// Create a 2D vector layer (UVs).
    pub fn from_vec2(name: impl Into<String>, values: &[Vec2]) -> Self {
        Self::from_slice(name, AttrKind::Float2, values)
    }

    /// Number of bytes currently held in raw form.
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

/// Ordered sequence of attribute layers for one geometry domain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerGroup {
    pub layers: Vec<AttrLayer>,
}

impl LayerGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer to the group.
    pub fn push(&mut self, layer: AttrLayer) {
        self.layers.push(layer);
    }

    /// Number of layers in the group.
    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Check if the group has no layers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Sum of raw bytes currently held by the group's layers.
    pub fn raw_size(&self) -> usize {
        self.layers.iter().map(AttrLayer::raw_size).sum()
    }
}

/// One shape-key block: a named deformation target over the point domain.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeKeyBlock {
    pub name: String,
    pub elem_count: usize,
    /// `elem_count * stride` bytes; `None` while compacted.
    pub data: Option<Vec<u8>>,
}

/// A sequence of shape-key blocks sharing one element stride.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeKeySet {
    pub stride: usize,
    pub blocks: Vec<ShapeKeyBlock>,
}

impl ShapeKeySet {
    /// Sum of raw bytes currently held by the blocks.
    pub fn raw_size(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.data.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

/// One selection-history entry: the element index and the domain it lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SelectElem {
    pub index: u32,
    pub domain: u32,
}

/// Element stride of the selection-history array in the store.
pub const SELECT_STRIDE: usize = std::mem::size_of::<SelectElem>();

/// Ordered selection history.
///
/// The element count is retained across compaction for validation.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectHistory {
    pub elem_count: usize,
    pub elems: Option<Vec<SelectElem>>,
}

impl SelectHistory {
    /// Create from a list of entries.
    pub fn new(elems: Vec<SelectElem>) -> Self {
        Self {
            elem_count: elems.len(),
            elems: Some(elems),
        }
    }
}

/// Element selection mode flags; point/edge/face may combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectMode(u8);

impl SelectMode {
    pub const POINT: Self = Self(1 << 0);
    pub const EDGE: Self = Self(1 << 1);
    pub const FACE: Self = Self(1 << 2);

    /// Check whether all flags of `other` are set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combine two modes.
    #[inline]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// UV-editor selection mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UvSelectMode {
    #[default]
    Vertex,
    Edge,
    Face,
    Island,
}

/// Full raw capture of one tracked object's editable geometry.
///
/// Produced by the editor collaborator at encode time and consumed by it at
/// decode time. Compaction strips the per-layer byte arrays but leaves all
/// structural metadata (layer names/kinds, counts, block names) in place, so
/// the same value describes both the expanded and the compacted state.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryData {
    /// Attribute layer groups, indexed by [`Domain`].
    pub domains: [LayerGroup; Domain::COUNT],
    /// Element counts, indexed by [`Domain`].
    pub counts: [usize; Domain::COUNT],
    /// Shape-key blocks, if the object has any.
    pub shape_keys: Option<ShapeKeySet>,
    /// Selection history, if any elements were selected in order.
    pub selection: Option<SelectHistory>,
    /// Active element selection mode.
    pub select_mode: SelectMode,
    /// Active UV selection mode.
    pub uv_select_mode: UvSelectMode,
    /// Active shape-key index (0 = basis).
    pub active_shape: usize,
}

impl GeometryData {
    /// Create an empty capture with the given per-domain element counts.
    pub fn with_counts(counts: [usize; Domain::COUNT]) -> Self {
        Self {
            domains: Default::default(),
            counts,
            shape_keys: None,
            selection: None,
            select_mode: SelectMode::POINT,
            uv_select_mode: UvSelectMode::default(),
            active_shape: 0,
        }
    }

    /// Layer group for a domain.
    #[inline]
    pub fn group(&self, domain: Domain) -> &LayerGroup {
        &self.domains[domain.index()]
    }

    /// Mutable layer group for a domain.
    #[inline]
    pub fn group_mut(&mut self, domain: Domain) -> &mut LayerGroup {
        &mut self.domains[domain.index()]
    }

    /// Element count for a domain.
    #[inline]
    pub fn count(&self, domain: Domain) -> usize {
        self.counts[domain.index()]
    }

    /// Estimated raw byte size of everything currently held expanded.
    pub fn raw_size(&self) -> usize {
        let layers: usize = self.domains.iter().map(LayerGroup::raw_size).sum();
        let keys = self.shape_keys.as_ref().map_or(0, ShapeKeySet::raw_size);
        let select = self
            .selection
            .as_ref()
            .and_then(|s| s.elems.as_ref())
            .map_or(0, |e| e.len() * SELECT_STRIDE);
        layers + keys + select
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    #[test]
    fn test_layer_from_slice() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.5, 1.0, 0.0),
        ];
        let layer = AttrLayer::from_slice("position", AttrKind::Float3, &points);
        assert_eq!(layer.raw_size(), 3 * 12);

        let uvs = vec![Vec2::ZERO, Vec2::ONE];
        let layer = AttrLayer::from_slice("uv", AttrKind::Float2, &uvs);
        assert_eq!(layer.raw_size(), 2 * 8);
    }

    #[test]
    #[should_panic]
    fn test_layer_from_slice_stride_mismatch() {
        let values = vec![0u8; 4];
        let _ = AttrLayer::from_slice("bad", AttrKind::Float3, &values);
    }

    #[test]
    fn test_select_elem_layout() {
        assert_eq!(SELECT_STRIDE, 8);
        let e = SelectElem { index: 7, domain: Domain::Point.index() as u32 };
        let bytes: &[u8] = bytemuck::bytes_of(&e);
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_select_mode_flags() {
        let mode = SelectMode::POINT.with(SelectMode::EDGE);
        assert!(mode.contains(SelectMode::POINT));
        assert!(mode.contains(SelectMode::EDGE));
        assert!(!mode.contains(SelectMode::FACE));
    }

    #[test]
    fn test_geometry_raw_size() {
        let mut geo = GeometryData::with_counts([2, 0, 0, 0]);
        geo.group_mut(Domain::Point)
            .push(AttrLayer::from_slice("position", AttrKind::Float3, &[Vec3::ZERO, Vec3::ONE]));
        geo.selection = Some(SelectHistory::new(vec![SelectElem::default()]));
        assert_eq!(geo.raw_size(), 2 * 12 + 8);
    }
}
