//! Geometry fixtures shared by unit tests.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::buffer::{BufferUsage, HardwareBufferManager, IndexType};
use crate::mesh::{Mesh, SubMesh};
use crate::queued::{QueuedGeometry, QueuedSubMesh, SubMeshLodGeometryLink, determine_geometry};
use crate::vertex::{
    IndexData, VertexData, VertexDeclaration, VertexElementSemantic, VertexElementType,
    VertexPositionNormalUv,
};

/// `count` vertices along +X with +Z normals.
pub fn line_vertices(count: usize) -> Vec<VertexPositionNormalUv> {
    (0..count)
        .map(|i| VertexPositionNormalUv {
            position: [i as f32, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 0.0],
        })
        .collect()
}

/// Triangle-list indices touching every vertex in `0..count`.
pub fn covering_indices(count: usize) -> Vec<u32> {
    (0..count as u32)
        .chain(std::iter::repeat(0))
        .take(count.div_ceil(3) * 3)
        .collect()
}

pub fn vertex_data(
    buffers: &dyn HardwareBufferManager,
    vertices: &[VertexPositionNormalUv],
) -> VertexData {
    let buffer = buffers
        .create_vertex_buffer_with_data(
            std::mem::size_of::<VertexPositionNormalUv>(),
            bytemuck::cast_slice(vertices),
            BufferUsage::Static,
        )
        .unwrap();
    VertexData::single_stream(VertexPositionNormalUv::declaration(), buffer)
}

pub fn index_data(
    buffers: &dyn HardwareBufferManager,
    index_type: IndexType,
    indices: &[u32],
) -> IndexData {
    IndexData::whole(
        buffers
            .create_index_buffer_with_data(index_type, indices, BufferUsage::Static)
            .unwrap(),
    )
}

/// One LOD of geometry with `vertex_count` vertices.
pub fn link(
    buffers: &dyn HardwareBufferManager,
    vertex_count: usize,
    index_type: IndexType,
) -> SubMeshLodGeometryLink {
    SubMeshLodGeometryLink {
        vertex_data: Arc::new(vertex_data(buffers, &line_vertices(vertex_count))),
        index_data: Arc::new(index_data(
            buffers,
            index_type,
            &covering_indices(vertex_count),
        )),
    }
}

pub fn queued(link: SubMeshLodGeometryLink, position: Vec3) -> QueuedGeometry {
    QueuedGeometry {
        geometry: link,
        position,
        orientation: Quat::IDENTITY,
        scale: Vec3::ONE,
    }
}

/// A one-submesh mesh over shared vertices whose LOD `n` references the
/// first `vertex_counts[n]` vertices. LOD `n` starts at `distances[n - 1]`.
pub fn lod_mesh(
    buffers: &dyn HardwareBufferManager,
    name: &str,
    material: &str,
    vertex_counts: &[usize],
    distances: &[f32],
    index_type: IndexType,
) -> Arc<Mesh> {
    let full = vertex_counts.iter().copied().max().unwrap_or(0);
    let mut mesh = Mesh::new(name);
    mesh.shared_vertex_data = Some(vertex_data(buffers, &line_vertices(full)));
    let mut sub_mesh = SubMesh::shared(
        material,
        index_data(buffers, index_type, &covering_indices(vertex_counts[0])),
    );
    for &count in &vertex_counts[1..] {
        sub_mesh
            .lod_face_list
            .push(index_data(buffers, index_type, &covering_indices(count)));
    }
    mesh.sub_meshes.push(sub_mesh);
    for &distance in distances {
        mesh.add_lod_level(distance);
    }
    mesh.update_bounds().unwrap();
    Arc::new(mesh)
}

pub fn queued_sub_mesh(
    buffers: &dyn HardwareBufferManager,
    mesh: &Arc<Mesh>,
    position: Vec3,
) -> Arc<QueuedSubMesh> {
    let links = determine_geometry(mesh, 0, buffers).unwrap();
    Arc::new(QueuedSubMesh::new(
        mesh.clone(),
        0,
        mesh.sub_meshes[0].material_name.clone(),
        Arc::new(links),
        position,
        Quat::IDENTITY,
        Vec3::ONE,
    ))
}

/// `count` vertices along +X split over two streams: positions on stream 0,
/// normal and UV interleaved on stream 1.
pub fn two_stream_vertex_data(buffers: &dyn HardwareBufferManager, count: usize) -> VertexData {
    let mut declaration = VertexDeclaration::new();
    declaration.add_element(0, 0, VertexElementType::Float3, VertexElementSemantic::Position, 0);
    declaration.add_element(1, 0, VertexElementType::Float3, VertexElementSemantic::Normal, 0);
    declaration.add_element(
        1,
        12,
        VertexElementType::Float2,
        VertexElementSemantic::TextureCoordinates,
        0,
    );

    let positions: Vec<[f32; 3]> = (0..count).map(|i| [i as f32, 0.0, 0.0]).collect();
    let attributes: Vec<[f32; 5]> = (0..count)
        .map(|i| [0.0, 0.0, 1.0, i as f32, 0.5])
        .collect();
    let mut data = VertexData {
        declaration,
        vertex_count: count,
        ..VertexData::default()
    };
    data.binding.set_binding(
        0,
        buffers
            .create_vertex_buffer_with_data(12, bytemuck::cast_slice(&positions), BufferUsage::Static)
            .unwrap(),
    );
    data.binding.set_binding(
        1,
        buffers
            .create_vertex_buffer_with_data(20, bytemuck::cast_slice(&attributes), BufferUsage::Static)
            .unwrap(),
    );
    data
}

/// A one-submesh mesh over [`two_stream_vertex_data`].
pub fn two_stream_mesh(buffers: &dyn HardwareBufferManager, material: &str, count: usize) -> Arc<Mesh> {
    let mut mesh = Mesh::new("two_stream");
    mesh.sub_meshes.push(SubMesh::new(
        material,
        two_stream_vertex_data(buffers, count),
        index_data(buffers, IndexType::U16, &covering_indices(count)),
    ));
    mesh.update_bounds().unwrap();
    Arc::new(mesh)
}
