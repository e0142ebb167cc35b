//! Procedural content: a two-LOD rock mesh and a seeded field of instances.

use std::sync::Arc;

use glam::{Quat, Vec3};
use nebula_static_geometry::{
    BatchError, BufferUsage, HardwareBufferManager, IndexData, IndexType, Mesh, MeshInstance,
    SubMesh, VertexData, VertexPositionNormalUv,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

const CUBE_CORNERS: [[f32; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

#[rustfmt::skip]
const CUBE_INDICES: [u32; 36] = [
    0, 2, 1, 0, 3, 2,
    4, 5, 6, 4, 6, 7,
    0, 1, 5, 0, 5, 4,
    3, 7, 6, 3, 6, 2,
    0, 4, 7, 0, 7, 3,
    1, 2, 6, 1, 6, 5,
];

/// Closed tetrahedron over alternate cube corners.
#[rustfmt::skip]
const TETRA_INDICES: [u32; 12] = [
    0, 2, 5,
    0, 5, 7,
    0, 7, 2,
    2, 7, 5,
];

/// A cube-shaped rock with a tetrahedron as its far LOD.
pub fn rock_mesh(
    buffers: &dyn HardwareBufferManager,
    material: &str,
    lod_distance: f32,
) -> Result<Arc<Mesh>, BatchError> {
    let vertices: Vec<VertexPositionNormalUv> = CUBE_CORNERS
        .iter()
        .map(|&corner| {
            let position = Vec3::from_array(corner);
            VertexPositionNormalUv {
                position: corner,
                normal: position.normalize().to_array(),
                uv: [(corner[0] + 1.0) * 0.5, (corner[1] + 1.0) * 0.5],
            }
        })
        .collect();
    let vertex_buffer = buffers.create_vertex_buffer_with_data(
        std::mem::size_of::<VertexPositionNormalUv>(),
        bytemuck::cast_slice(&vertices),
        BufferUsage::StaticWriteOnly,
    )?;

    let mut sub_mesh = SubMesh::shared(
        material,
        IndexData::whole(buffers.create_index_buffer_with_data(
            IndexType::U16,
            &CUBE_INDICES,
            BufferUsage::StaticWriteOnly,
        )?),
    );
    sub_mesh
        .lod_face_list
        .push(IndexData::whole(buffers.create_index_buffer_with_data(
            IndexType::U16,
            &TETRA_INDICES,
            BufferUsage::StaticWriteOnly,
        )?));

    let mut mesh = Mesh::new(format!("rock.{material}"));
    mesh.shared_vertex_data = Some(VertexData::single_stream(
        VertexPositionNormalUv::declaration(),
        vertex_buffer,
    ));
    mesh.sub_meshes.push(sub_mesh);
    mesh.add_lod_level(lod_distance);
    mesh.update_bounds()?;
    Ok(Arc::new(mesh))
}

/// `count` randomly placed, rotated and scaled instances of `meshes` spread
/// over a square of side `extent` centred on the origin.
pub fn scatter(meshes: &[Arc<Mesh>], count: usize, extent: f32, seed: u64) -> Vec<MeshInstance> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let half = extent * 0.5;
    (0..count)
        .filter_map(|_| {
            let mesh = meshes.get(rng.gen_range(0..meshes.len().max(1)))?.clone();
            let position = Vec3::new(
                rng.gen_range(-half..half),
                0.0,
                rng.gen_range(-half..half),
            );
            let yaw = rng.gen_range(0.0..std::f32::consts::TAU);
            let scale = rng.gen_range(0.5..3.0);
            Some(
                MeshInstance::new(mesh)
                    .at(position)
                    .rotated(Quat::from_rotation_y(yaw))
                    .scaled(Vec3::splat(scale)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_static_geometry::SystemMemoryBufferManager;

    #[test]
    fn test_rock_mesh_has_two_lods() {
        let manager = SystemMemoryBufferManager::new();
        let mesh = rock_mesh(&manager, "stone", 100.0).unwrap();
        assert_eq!(mesh.num_lod_levels(), 2);
        assert_eq!(mesh.sub_meshes[0].lod_variant_count(), 2);
        assert_eq!(mesh.bounds.min, Vec3::splat(-1.0));
        assert_eq!(mesh.bounds.max, Vec3::splat(1.0));
    }

    #[test]
    fn test_scatter_is_deterministic() {
        let manager = SystemMemoryBufferManager::new();
        let meshes = vec![rock_mesh(&manager, "stone", 100.0).unwrap()];
        let a = scatter(&meshes, 16, 500.0, 7);
        let b = scatter(&meshes, 16, 500.0, 7);
        assert_eq!(a.len(), 16);
        for (a, b) in a.iter().zip(&b) {
            assert_eq!(a.position, b.position);
            assert!(a.position.x.abs() <= 250.0 && a.position.z.abs() <= 250.0);
        }
    }

    #[test]
    fn test_scatter_without_meshes_is_empty() {
        assert!(scatter(&[], 10, 100.0, 1).is_empty());
    }
}
