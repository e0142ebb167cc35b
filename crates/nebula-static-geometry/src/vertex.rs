//! Vertex and index data descriptions shared by source meshes and merged buckets.
//!
//! A [`VertexData`] pairs a [`VertexDeclaration`] (which elements exist, where,
//! and in which stream) with a [`VertexBufferBinding`] (which buffer feeds each
//! stream). Two pieces of geometry can share a merged buffer only when their
//! [`geometry_format_signature`] strings match.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::buffer::{IndexType, SharedIndexBuffer, SharedVertexBuffer, checked_range};
use crate::error::BatchError;

// ---------------------------------------------------------------------------
// Element semantics and types
// ---------------------------------------------------------------------------

/// Meaning of a vertex element. Discriminants are stable signature codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum VertexElementSemantic {
    Position = 1,
    BlendWeights = 2,
    BlendIndices = 3,
    Normal = 4,
    Diffuse = 5,
    Specular = 6,
    TextureCoordinates = 7,
    Binormal = 8,
    Tangent = 9,
}

impl VertexElementSemantic {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Semantics rotated (but not translated or scaled) by the instance orientation.
    pub fn is_direction(self) -> bool {
        matches!(
            self,
            VertexElementSemantic::Normal
                | VertexElementSemantic::Tangent
                | VertexElementSemantic::Binormal
        )
    }

    /// Skinning data, meaningless once geometry is baked into a static batch.
    pub fn is_blend(self) -> bool {
        matches!(
            self,
            VertexElementSemantic::BlendWeights | VertexElementSemantic::BlendIndices
        )
    }
}

/// Storage type of a vertex element. Discriminants are stable signature codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VertexElementType {
    Float1 = 0,
    Float2 = 1,
    Float3 = 2,
    Float4 = 3,
    Colour = 4,
    Short1 = 5,
    Short2 = 6,
    Short3 = 7,
    Short4 = 8,
    UByte4 = 9,
    ColourArgb = 10,
    ColourAbgr = 11,
}

impl VertexElementType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Size of one element of this type in bytes.
    pub fn size(self) -> usize {
        match self {
            VertexElementType::Float1 => 4,
            VertexElementType::Float2 => 8,
            VertexElementType::Float3 => 12,
            VertexElementType::Float4 => 16,
            VertexElementType::Colour
            | VertexElementType::ColourArgb
            | VertexElementType::ColourAbgr
            | VertexElementType::UByte4 => 4,
            VertexElementType::Short1 => 2,
            VertexElementType::Short2 => 4,
            VertexElementType::Short3 => 6,
            VertexElementType::Short4 => 8,
        }
    }
}

/// One element of a vertex: where it lives and what it means.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElement {
    /// Stream (buffer binding) the element is read from.
    pub source: u16,
    /// Byte offset within one vertex of that stream.
    pub offset: usize,
    pub element_type: VertexElementType,
    pub semantic: VertexElementSemantic,
    /// Distinguishes repeated semantics such as multiple texture coordinate sets.
    pub index: u16,
}

impl VertexElement {
    pub fn new(
        source: u16,
        offset: usize,
        element_type: VertexElementType,
        semantic: VertexElementSemantic,
        index: u16,
    ) -> Self {
        Self {
            source,
            offset,
            element_type,
            semantic,
            index,
        }
    }

    /// Size of this element in bytes.
    pub fn size(&self) -> usize {
        self.element_type.size()
    }
}

// ---------------------------------------------------------------------------
// VertexDeclaration
// ---------------------------------------------------------------------------

/// Ordered list of vertex elements across one or more streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexDeclaration {
    elements: Vec<VertexElement>,
}

impl VertexDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element and return it.
    pub fn add_element(
        &mut self,
        source: u16,
        offset: usize,
        element_type: VertexElementType,
        semantic: VertexElementSemantic,
        index: u16,
    ) -> VertexElement {
        let element = VertexElement::new(source, offset, element_type, semantic, index);
        self.elements.push(element);
        element
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// First element carrying `semantic`, if any.
    pub fn find_element_by_semantic(
        &self,
        semantic: VertexElementSemantic,
    ) -> Option<&VertexElement> {
        self.elements.iter().find(|e| e.semantic == semantic)
    }

    /// All elements read from `source`, in declaration order.
    pub fn find_elements_by_source(&self, source: u16) -> Vec<VertexElement> {
        self.elements
            .iter()
            .filter(|e| e.source == source)
            .copied()
            .collect()
    }

    /// Byte stride implied by the elements of `source`.
    pub fn vertex_size(&self, source: u16) -> usize {
        self.elements
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.offset + e.size())
            .max()
            .unwrap_or(0)
    }

    /// Remove every element carrying `semantic`. Returns whether any was removed.
    pub fn remove_element(&mut self, semantic: VertexElementSemantic) -> bool {
        let before = self.elements.len();
        self.elements.retain(|e| e.semantic != semantic);
        self.elements.len() != before
    }

    /// Distinct stream indices referenced by the declaration.
    pub fn sources(&self) -> BTreeSet<u16> {
        self.elements.iter().map(|e| e.source).collect()
    }

    /// Rewrite element sources through `map` (old source to new source).
    pub fn remap_sources(&mut self, map: &BTreeMap<u16, u16>) {
        for element in &mut self.elements {
            if let Some(&new_source) = map.get(&element.source) {
                element.source = new_source;
            }
        }
    }
}

/// Identifying string for a vertex/index layout.
///
/// Pipe-delimited: the index type code, then `source|semantic|type` for every
/// element in declaration order. Geometry may share a bucket only when these
/// strings are identical.
pub fn geometry_format_signature(declaration: &VertexDeclaration, index_type: IndexType) -> String {
    let mut signature = format!("{}|", index_type.code());
    for element in declaration.elements() {
        let _ = write!(
            signature,
            "{}|{}|{}|",
            element.source,
            element.semantic.code(),
            element.element_type.code()
        );
    }
    signature
}

// ---------------------------------------------------------------------------
// VertexBufferBinding
// ---------------------------------------------------------------------------

/// Maps stream indices to vertex buffers.
#[derive(Clone, Debug, Default)]
pub struct VertexBufferBinding {
    bindings: BTreeMap<u16, SharedVertexBuffer>,
}

impl VertexBufferBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_binding(&mut self, source: u16, buffer: SharedVertexBuffer) {
        self.bindings.insert(source, buffer);
    }

    pub fn unset_binding(&mut self, source: u16) -> Option<SharedVertexBuffer> {
        self.bindings.remove(&source)
    }

    pub fn buffer(&self, source: u16) -> Option<&SharedVertexBuffer> {
        self.bindings.get(&source)
    }

    pub fn buffer_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &SharedVertexBuffer)> {
        self.bindings.iter().map(|(&s, b)| (s, b))
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Renumber bound streams to `0..n` in order. Returns the old-to-new map.
    pub fn close_gaps(&mut self) -> BTreeMap<u16, u16> {
        let old = std::mem::take(&mut self.bindings);
        let mut map = BTreeMap::new();
        for (new_source, (old_source, buffer)) in old.into_iter().enumerate() {
            let new_source = new_source as u16;
            map.insert(old_source, new_source);
            self.bindings.insert(new_source, buffer);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// VertexData / IndexData
// ---------------------------------------------------------------------------

/// A run of vertices described by a declaration and fed by bound buffers.
#[derive(Clone, Debug, Default)]
pub struct VertexData {
    pub declaration: VertexDeclaration,
    pub binding: VertexBufferBinding,
    pub vertex_start: usize,
    pub vertex_count: usize,
    /// Per-vertex W values (1.0 original, 0.0 extruded) for shadow volume programs.
    pub hardware_shadow_volume_w_buffer: Option<SharedVertexBuffer>,
}

impl VertexData {
    /// Vertex data reading `vertex_count` vertices from a single stream.
    pub fn single_stream(declaration: VertexDeclaration, buffer: SharedVertexBuffer) -> Self {
        let vertex_count = buffer.num_vertices();
        let mut binding = VertexBufferBinding::new();
        binding.set_binding(0, buffer);
        Self {
            declaration,
            binding,
            vertex_start: 0,
            vertex_count,
            hardware_shadow_volume_w_buffer: None,
        }
    }

    /// Same declaration, no buffers and no vertices.
    pub fn clone_structure(&self) -> Self {
        Self {
            declaration: self.declaration.clone(),
            ..Self::default()
        }
    }

    /// Renumber streams to remove holes left by unbound buffers, keeping the
    /// declaration consistent. Returns the old-to-new source map.
    pub fn close_gaps_in_bindings(&mut self) -> BTreeMap<u16, u16> {
        let map = self.binding.close_gaps();
        self.declaration.remap_sources(&map);
        map
    }

    pub fn position_element(&self) -> Result<VertexElement, BatchError> {
        self.declaration
            .find_element_by_semantic(VertexElementSemantic::Position)
            .copied()
            .ok_or(BatchError::MissingPosition)
    }

    /// Read the positions of `vertex_start..vertex_start + vertex_count`.
    pub fn read_positions(&self) -> Result<Vec<Vec3>, BatchError> {
        let element = self.position_element()?;
        if !matches!(
            element.element_type,
            VertexElementType::Float3 | VertexElementType::Float4
        ) {
            return Err(BatchError::UnsupportedElementType {
                semantic: element.semantic,
                element_type: element.element_type,
            });
        }
        let buffer = self
            .binding
            .buffer(element.source)
            .ok_or(BatchError::UnboundSource {
                stream: element.source,
            })?;
        let stride = buffer.vertex_size();
        let lock = buffer.lock_read()?;
        (self.vertex_start..self.vertex_start + self.vertex_count)
            .map(|v| {
                let range = checked_range(lock.len(), v * stride + element.offset, 12)?;
                let xyz: [f32; 3] = bytemuck::pod_read_unaligned(&lock[range]);
                Ok(Vec3::from_array(xyz))
            })
            .collect()
    }
}

/// A run of indices in an index buffer.
#[derive(Clone, Debug, Default)]
pub struct IndexData {
    pub index_buffer: Option<SharedIndexBuffer>,
    pub index_start: usize,
    pub index_count: usize,
}

impl IndexData {
    /// Index data covering all of `buffer`.
    pub fn whole(buffer: SharedIndexBuffer) -> Self {
        let index_count = buffer.num_indexes();
        Self {
            index_buffer: Some(buffer),
            index_start: 0,
            index_count,
        }
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.index_buffer.as_ref().map(|b| b.index_type())
    }

    /// Read `index_start..index_start + index_count` as `u32`.
    pub fn read_indices(&self) -> Result<Vec<u32>, BatchError> {
        let buffer = self
            .index_buffer
            .as_ref()
            .ok_or(BatchError::MissingIndexBuffer)?;
        Ok(buffer.read_indices(self.index_start, self.index_count)?)
    }
}

// ---------------------------------------------------------------------------
// Standard vertex formats
// ---------------------------------------------------------------------------

/// Interleaved position, normal and UV.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPositionNormalUv {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexPositionNormalUv {
    /// Declaration of this layout on stream 0.
    pub fn declaration() -> VertexDeclaration {
        let mut decl = VertexDeclaration::new();
        decl.add_element(
            0,
            0,
            VertexElementType::Float3,
            VertexElementSemantic::Position,
            0,
        );
        decl.add_element(
            0,
            12,
            VertexElementType::Float3,
            VertexElementSemantic::Normal,
            0,
        );
        decl.add_element(
            0,
            24,
            VertexElementType::Float2,
            VertexElementSemantic::TextureCoordinates,
            0,
        );
        decl
    }
}

const _: () = assert!(std::mem::size_of::<VertexPositionNormalUv>() == 32);
