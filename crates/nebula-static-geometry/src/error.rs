//! Error types for static geometry batching.

use thiserror::Error;

use crate::buffer::BufferError;

/// Errors raised while assigning, building or rendering batched geometry.
///
/// An unresolved material is not an error: it is logged and the material's
/// geometry is left out of the build.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A submesh declares a different number of LOD geometry variants than
    /// its parent mesh has LOD levels.
    #[error(
        "submesh of mesh '{mesh}' has {variants} LOD geometry variants but the mesh has {levels} LOD levels"
    )]
    LodCountMismatch {
        mesh: String,
        variants: usize,
        levels: usize,
    },

    /// A single geometry item does not fit into an empty geometry bucket.
    #[error("geometry with {vertex_count} vertices exceeds the bucket limit of {max_vertex_index}")]
    GeometryTooLarge {
        vertex_count: usize,
        max_vertex_index: usize,
    },

    /// Doubling the position stream for stencil shadows overflows the index range.
    #[error(
        "index range exceeded when using stencil shadows ({vertex_count} vertices, limit {max_vertex_index}); reduce the region size or polygon count"
    )]
    StencilIndexRangeExceeded {
        vertex_count: usize,
        max_vertex_index: usize,
    },

    /// A merged index value does not fit the destination index type.
    #[error("merged index {index} does not fit the destination index buffer")]
    IndexOutOfRange { index: u32 },

    /// Stencil shadows were requested for geometry with 32-bit indices.
    #[error("only 16-bit indexes are supported when stencil shadows are enabled")]
    ShadowIndexTypeUnsupported,

    /// Shadow volumes were requested from a region built without stencil shadows.
    #[error("region '{region}' has no edge list; it was not built with stencil shadows")]
    MissingEdgeList { region: String },

    /// A mesh was queued before its bounds were computed.
    #[error("mesh '{mesh}' has empty bounds; call update_bounds before queueing it")]
    EmptyMeshBounds { mesh: String },

    /// A queued instance lies outside the addressable region grid.
    #[error("point {point} is outside the static geometry region grid")]
    RegionOutOfRange { point: glam::Vec3 },

    /// Shadow volume indices do not fit the shadow index buffer.
    #[error("shadow volume needs {required} indices but the shadow index buffer holds {capacity}")]
    ShadowIndexBufferOverflow { required: usize, capacity: usize },

    /// Index data was added to an edge list for a vertex set that does not exist.
    #[error("edge list has no vertex set {vertex_set}")]
    UnknownVertexSet { vertex_set: usize },

    /// The vertex declaration has no position element.
    #[error("vertex declaration has no position element")]
    MissingPosition,

    /// A transformed semantic uses an element type the copier cannot rotate.
    #[error("{semantic:?} element of type {element_type:?} cannot be transformed")]
    UnsupportedElementType {
        semantic: crate::vertex::VertexElementSemantic,
        element_type: crate::vertex::VertexElementType,
    },

    /// A source stream is missing from a vertex buffer binding.
    #[error("no vertex buffer bound at source {stream}")]
    UnboundSource { stream: u16 },

    /// A submesh has no vertex data to read from.
    #[error("submesh {sub_mesh} of mesh '{mesh}' has no vertex data")]
    MissingVertexData { mesh: String, sub_mesh: usize },

    /// Geometry data was missing its index buffer.
    #[error("index data has no index buffer")]
    MissingIndexBuffer,

    /// The region was already built; a new region must be created instead.
    #[error("region '{region}' is already built")]
    AlreadyBuilt { region: String },

    /// Buffer lock or access failure.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}
