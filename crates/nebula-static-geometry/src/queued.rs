//! Instance requests waiting to be batched.
//!
//! A [`QueuedSubMesh`] is one placed submesh with its geometry resolved for
//! every LOD level. A [`QueuedGeometry`] is the same instance narrowed to a
//! single LOD, which is what buckets actually merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::bounds::Aabb;
use crate::buffer::{BufferUsage, HardwareBufferManager, checked_range};
use crate::error::BatchError;
use crate::mesh::{Mesh, SubMesh};
use crate::vertex::{IndexData, VertexData};

/// Vertex and index data for one LOD level of a submesh.
#[derive(Clone, Debug)]
pub struct SubMeshLodGeometryLink {
    pub vertex_data: Arc<VertexData>,
    pub index_data: Arc<IndexData>,
}

/// One placed submesh, immutable once queued.
#[derive(Clone, Debug)]
pub struct QueuedSubMesh {
    pub mesh: Arc<Mesh>,
    pub sub_mesh_index: usize,
    pub material_name: String,
    /// Geometry per LOD level, index 0 being full detail.
    pub geometry_lod_list: Arc<Vec<SubMeshLodGeometryLink>>,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
    pub world_bounds: Aabb,
}

impl QueuedSubMesh {
    pub fn new(
        mesh: Arc<Mesh>,
        sub_mesh_index: usize,
        material_name: impl Into<String>,
        geometry_lod_list: Arc<Vec<SubMeshLodGeometryLink>>,
        position: Vec3,
        orientation: Quat,
        scale: Vec3,
    ) -> Self {
        let world_bounds = mesh.bounds.transformed(position, orientation, scale);
        Self {
            mesh,
            sub_mesh_index,
            material_name: material_name.into(),
            geometry_lod_list,
            position,
            orientation,
            scale,
            world_bounds,
        }
    }

    /// Narrow to one LOD. Levels past the last variant use the coarsest one.
    pub fn geometry_at_lod(&self, lod: usize) -> Option<QueuedGeometry> {
        let link = self
            .geometry_lod_list
            .get(lod)
            .or_else(|| self.geometry_lod_list.last())?;
        Some(QueuedGeometry {
            geometry: link.clone(),
            position: self.position,
            orientation: self.orientation,
            scale: self.scale,
        })
    }
}

/// A queued submesh resolved to a single LOD's geometry.
#[derive(Clone, Debug)]
pub struct QueuedGeometry {
    pub geometry: SubMeshLodGeometryLink,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
}

impl QueuedGeometry {
    pub fn vertex_count(&self) -> usize {
        self.geometry.vertex_data.vertex_count
    }

    pub fn index_count(&self) -> usize {
        self.geometry.index_data.index_count
    }
}

// ---------------------------------------------------------------------------
// Geometry determination
// ---------------------------------------------------------------------------

/// Resolve the geometry of every LOD level of a submesh.
///
/// Submeshes with their own vertex data link to it directly. Submeshes that
/// draw from the mesh's shared vertices get a compact private copy per LOD
/// holding only the vertices that LOD references.
pub fn determine_geometry(
    mesh: &Mesh,
    sub_mesh_index: usize,
    buffers: &dyn HardwareBufferManager,
) -> Result<Vec<SubMeshLodGeometryLink>, BatchError> {
    let missing = || BatchError::MissingVertexData {
        mesh: mesh.name.clone(),
        sub_mesh: sub_mesh_index,
    };
    let sub_mesh: &SubMesh = mesh.sub_meshes.get(sub_mesh_index).ok_or_else(missing)?;
    let vertex_data = mesh.sub_mesh_vertex_data(sub_mesh).ok_or_else(missing)?;

    let dedicated = (!sub_mesh.use_shared_vertices).then(|| Arc::new(vertex_data.clone()));
    (0..sub_mesh.lod_variant_count())
        .filter_map(|lod| sub_mesh.lod_index_data(lod))
        .map(|index_data| match &dedicated {
            Some(vertex_data) => Ok(SubMeshLodGeometryLink {
                vertex_data: vertex_data.clone(),
                index_data: Arc::new(index_data.clone()),
            }),
            None => split_vertex_data(vertex_data, index_data, buffers),
        })
        .collect()
}

/// Copy only the vertices referenced by `index_data` into new buffers and
/// remap the indices to match. Vertices keep their original relative order.
fn split_vertex_data(
    source: &VertexData,
    index_data: &IndexData,
    buffers: &dyn HardwareBufferManager,
) -> Result<SubMeshLodGeometryLink, BatchError> {
    let index_type = index_data
        .index_type()
        .ok_or(BatchError::MissingIndexBuffer)?;
    let indices = index_data.read_indices()?;

    let mut remap: BTreeMap<u32, u32> = indices.iter().map(|&i| (i, 0)).collect();
    for (new_index, slot) in remap.values_mut().enumerate() {
        *slot = new_index as u32;
    }

    let mut vertex_data = source.clone_structure();
    vertex_data.vertex_count = remap.len();
    for (stream, buffer) in source.binding.iter() {
        let stride = buffer.vertex_size();
        let mut bytes = vec![0u8; stride * remap.len()];
        {
            let lock = buffer.lock_read()?;
            for (new_index, &old_index) in remap.keys().enumerate() {
                let from = checked_range(
                    lock.len(),
                    (source.vertex_start + old_index as usize) * stride,
                    stride,
                )?;
                bytes[new_index * stride..(new_index + 1) * stride].copy_from_slice(&lock[from]);
            }
        }
        let compact =
            buffers.create_vertex_buffer_with_data(stride, &bytes, BufferUsage::StaticWriteOnly)?;
        vertex_data.binding.set_binding(stream, compact);
    }

    let remapped: Vec<u32> = indices.iter().map(|i| remap[i]).collect();
    let index_buffer =
        buffers.create_index_buffer_with_data(index_type, &remapped, BufferUsage::StaticWriteOnly)?;

    Ok(SubMeshLodGeometryLink {
        vertex_data: Arc::new(vertex_data),
        index_data: Arc::new(IndexData::whole(index_buffer)),
    })
}

/// Reuses resolved geometry across instances of the same submesh.
#[derive(Default)]
pub struct GeometryLinkCache {
    entries: FxHashMap<(usize, usize), (Arc<Mesh>, Arc<Vec<SubMeshLodGeometryLink>>)>,
}

impl GeometryLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved geometry for a submesh, computed on first request.
    pub fn geometry_for(
        &mut self,
        mesh: &Arc<Mesh>,
        sub_mesh_index: usize,
        buffers: &dyn HardwareBufferManager,
    ) -> Result<Arc<Vec<SubMeshLodGeometryLink>>, BatchError> {
        // The entry keeps the mesh alive, so its address stays unique.
        let key = (Arc::as_ptr(mesh) as usize, sub_mesh_index);
        if let Some((_, links)) = self.entries.get(&key) {
            return Ok(links.clone());
        }
        let links = Arc::new(determine_geometry(mesh, sub_mesh_index, buffers)?);
        self.entries.insert(key, (mesh.clone(), links.clone()));
        Ok(links)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{IndexType, SystemMemoryBufferManager};
    use crate::vertex::{VertexDeclaration, VertexElementSemantic, VertexElementType};

    fn position_data(manager: &SystemMemoryBufferManager, points: &[[f32; 3]]) -> VertexData {
        let mut decl = VertexDeclaration::new();
        decl.add_element(0, 0, VertexElementType::Float3, VertexElementSemantic::Position, 0);
        let buffer = manager
            .create_vertex_buffer_with_data(12, bytemuck::cast_slice(points), BufferUsage::Static)
            .unwrap();
        VertexData::single_stream(decl, buffer)
    }

    fn index_data(manager: &SystemMemoryBufferManager, indices: &[u32]) -> IndexData {
        IndexData::whole(
            manager
                .create_index_buffer_with_data(IndexType::U16, indices, BufferUsage::Static)
                .unwrap(),
        )
    }

    #[test]
    fn test_shared_vertices_are_split_per_lod() {
        let manager = SystemMemoryBufferManager::new();
        let points = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [5.0, 5.0, 5.0],
            [1.0, 1.0, 0.0],
        ];
        let mut mesh = Mesh::new("shared");
        mesh.shared_vertex_data = Some(position_data(&manager, &points));
        mesh.add_lod_level(10.0);
        let mut sub = SubMesh::shared("m", index_data(&manager, &[4, 1, 2, 1, 0, 2]));
        sub.lod_face_list.push(index_data(&manager, &[4, 1, 2]));
        mesh.sub_meshes.push(sub);

        let links = determine_geometry(&mesh, 0, &manager).unwrap();

        assert_eq!(links.len(), 2);
        // vertex 3 is never referenced and is dropped
        assert_eq!(links[0].vertex_data.vertex_count, 4);
        assert_eq!(links[0].index_data.read_indices().unwrap(), vec![3, 1, 2, 1, 0, 2]);
        assert_eq!(
            links[0].vertex_data.read_positions().unwrap()[3],
            Vec3::new(1.0, 1.0, 0.0)
        );
        assert_eq!(links[1].vertex_data.vertex_count, 3);
        assert_eq!(links[1].index_data.read_indices().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_dedicated_vertices_are_linked_not_copied() {
        let manager = SystemMemoryBufferManager::new();
        let vertex_data = position_data(&manager, &[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let mut mesh = Mesh::new("own");
        mesh.sub_meshes
            .push(SubMesh::new("m", vertex_data, index_data(&manager, &[0, 1, 2])));

        let links = determine_geometry(&mesh, 0, &manager).unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(manager.live_vertex_buffers(), 1);
    }

    #[test]
    fn test_geometry_at_lod_falls_back_to_coarsest() {
        let manager = SystemMemoryBufferManager::new();
        let mut mesh = Mesh::new("two-lods");
        mesh.shared_vertex_data = Some(position_data(
            &manager,
            &[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
        ));
        mesh.add_lod_level(20.0);
        let mut sub = SubMesh::shared("m", index_data(&manager, &[0, 1, 2, 1, 3, 2]));
        sub.lod_face_list.push(index_data(&manager, &[0, 1, 2]));
        mesh.sub_meshes.push(sub);
        let mesh = Arc::new(mesh);

        let mut cache = GeometryLinkCache::new();
        let links = cache.geometry_for(&mesh, 0, &manager).unwrap();
        let queued = QueuedSubMesh::new(mesh, 0, "m", links, Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);

        assert_eq!(queued.geometry_at_lod(0).unwrap().vertex_count(), 4);
        assert_eq!(queued.geometry_at_lod(1).unwrap().vertex_count(), 3);
        assert_eq!(queued.geometry_at_lod(7).unwrap().vertex_count(), 3);
    }

    #[test]
    fn test_cache_reuses_links() {
        let manager = SystemMemoryBufferManager::new();
        let vertex_data = position_data(&manager, &[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let mut mesh = Mesh::new("cached");
        mesh.sub_meshes
            .push(SubMesh::new("m", vertex_data, index_data(&manager, &[0, 1, 2])));
        let mesh = Arc::new(mesh);

        let mut cache = GeometryLinkCache::new();
        let a = cache.geometry_for(&mesh, 0, &manager).unwrap();
        let b = cache.geometry_for(&mesh, 0, &manager).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
