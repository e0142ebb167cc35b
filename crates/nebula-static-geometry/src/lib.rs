//! Static geometry batching: merges many placed mesh instances into a few
//! large pre-transformed vertex/index buffers, grouped by spatial region,
//! level of detail, material and vertex format.

pub mod bounds;
pub mod buffer;
pub mod context;
pub mod copy;
pub mod error;
pub mod geometry_bucket;
pub mod gpu;
pub mod lod_bucket;
pub mod material;
pub mod material_bucket;
pub mod mesh;
pub mod queued;
pub mod region;
pub mod render;
pub mod scene;
pub mod shadow;
pub mod static_geometry;
pub mod vertex;

#[cfg(test)]
mod test_util;

pub use bounds::Aabb;
pub use buffer::{
    BufferError, BufferUsage, HardwareBufferManager, HardwareIndexBuffer, HardwareVertexBuffer,
    IndexType, LockMode, SharedIndexBuffer, SharedVertexBuffer, SystemMemoryBufferManager,
};
pub use context::{BuildContext, RenderSystemCapabilities};
pub use error::BatchError;
pub use geometry_bucket::{BatchRenderable, GeometryBucket, RegionRenderState};
pub use gpu::{GpuBatchAllocator, GpuGeometryBatch};
pub use lod_bucket::LodBucket;
pub use material::{InMemoryMaterialLibrary, Material, MaterialLibrary, Technique};
pub use material_bucket::MaterialBucket;
pub use mesh::{Mesh, MeshLodUsage, SubMesh};
pub use queued::{GeometryLinkCache, QueuedGeometry, QueuedSubMesh, SubMeshLodGeometryLink};
pub use region::{Region, RegionState, ShadowVolumeRequest};
pub use render::{
    CollectingRenderQueue, DEFAULT_RENDERABLE_PRIORITY, RENDER_QUEUE_MAIN, RenderOperation,
    RenderQueue, RenderQueueEntry, Renderable,
};
pub use scene::{Camera, Light, LightKind, SceneGraph, SceneNodeId, SceneTree};
pub use shadow::{EdgeData, ShadowRenderable, ShadowRenderableFlags};
pub use static_geometry::{MeshInstance, StaticGeometry, StaticGeometryOptions, StaticGeometryStats};
pub use vertex::{
    IndexData, VertexData, VertexDeclaration, VertexElement, VertexElementSemantic,
    VertexElementType, VertexPositionNormalUv,
};
