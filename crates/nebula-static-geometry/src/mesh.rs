//! Source meshes: shared or per-submesh vertex data, per-LOD index lists and
//! LOD switch distances.

use crate::bounds::Aabb;
use crate::error::BatchError;
use crate::vertex::{IndexData, VertexData};

/// Distance at which a mesh switches to one of its LOD levels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshLodUsage {
    /// Squared camera distance from which this level is used.
    pub from_depth_squared: f32,
}

/// One material-homogeneous part of a mesh.
#[derive(Clone, Debug, Default)]
pub struct SubMesh {
    pub material_name: String,
    /// Read vertices from the parent mesh's shared vertex data.
    pub use_shared_vertices: bool,
    /// Dedicated vertices when `use_shared_vertices` is false.
    pub vertex_data: Option<VertexData>,
    /// Full-detail triangle list.
    pub index_data: IndexData,
    /// Reduced triangle lists for LOD levels 1 and up.
    pub lod_face_list: Vec<IndexData>,
}

impl SubMesh {
    pub fn new(material_name: impl Into<String>, vertex_data: VertexData, index_data: IndexData) -> Self {
        Self {
            material_name: material_name.into(),
            use_shared_vertices: false,
            vertex_data: Some(vertex_data),
            index_data,
            lod_face_list: Vec::new(),
        }
    }

    /// Submesh drawing from the mesh's shared vertex data.
    pub fn shared(material_name: impl Into<String>, index_data: IndexData) -> Self {
        Self {
            material_name: material_name.into(),
            use_shared_vertices: true,
            vertex_data: None,
            index_data,
            lod_face_list: Vec::new(),
        }
    }

    /// Index data for `lod`, or `None` if the submesh has no such level.
    pub fn lod_index_data(&self, lod: usize) -> Option<&IndexData> {
        match lod {
            0 => Some(&self.index_data),
            n => self.lod_face_list.get(n - 1),
        }
    }

    /// Number of LOD index lists, including full detail.
    pub fn lod_variant_count(&self) -> usize {
        1 + self.lod_face_list.len()
    }
}

/// A renderable mesh made of submeshes.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub name: String,
    pub shared_vertex_data: Option<VertexData>,
    pub sub_meshes: Vec<SubMesh>,
    /// LOD 0 is always present with a distance of zero.
    lod_usages: Vec<MeshLodUsage>,
    /// Empty until [`Mesh::update_bounds`] runs.
    pub bounds: Aabb,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared_vertex_data: None,
            sub_meshes: Vec::new(),
            lod_usages: vec![MeshLodUsage {
                from_depth_squared: 0.0,
            }],
            bounds: Aabb::EMPTY,
        }
    }

    /// Add a LOD level used from `distance` onwards. Submeshes must receive a
    /// matching entry in their `lod_face_list`.
    pub fn add_lod_level(&mut self, distance: f32) {
        self.lod_usages.push(MeshLodUsage {
            from_depth_squared: distance * distance,
        });
    }

    pub fn num_lod_levels(&self) -> usize {
        self.lod_usages.len()
    }

    pub fn lod_level(&self, index: usize) -> Option<&MeshLodUsage> {
        self.lod_usages.get(index)
    }

    pub fn lod_levels(&self) -> &[MeshLodUsage] {
        &self.lod_usages
    }

    /// Vertex data a submesh reads from.
    pub fn sub_mesh_vertex_data<'a>(&'a self, sub_mesh: &'a SubMesh) -> Option<&'a VertexData> {
        if sub_mesh.use_shared_vertices {
            self.shared_vertex_data.as_ref()
        } else {
            sub_mesh.vertex_data.as_ref()
        }
    }

    /// Recompute `bounds` from every vertex position in the mesh.
    pub fn update_bounds(&mut self) -> Result<(), BatchError> {
        let mut bounds = Aabb::EMPTY;
        let sources = self
            .shared_vertex_data
            .iter()
            .chain(self.sub_meshes.iter().filter_map(|s| s.vertex_data.as_ref()));
        for vertex_data in sources {
            bounds.merge(&Aabb::from_points(vertex_data.read_positions()?));
        }
        self.bounds = bounds;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lod_levels_start_at_zero() {
        let mut mesh = Mesh::new("rock");
        assert_eq!(mesh.num_lod_levels(), 1);
        mesh.add_lod_level(50.0);
        assert_eq!(mesh.num_lod_levels(), 2);
        assert_eq!(mesh.lod_level(0).unwrap().from_depth_squared, 0.0);
        assert_eq!(mesh.lod_level(1).unwrap().from_depth_squared, 2500.0);
        assert!(mesh.lod_level(2).is_none());
    }

    #[test]
    fn test_sub_mesh_lod_index_data() {
        let mut sub = SubMesh::shared("stone", IndexData::default());
        sub.lod_face_list.push(IndexData {
            index_count: 3,
            ..IndexData::default()
        });
        assert_eq!(sub.lod_variant_count(), 2);
        assert_eq!(sub.lod_index_data(1).unwrap().index_count, 3);
        assert!(sub.lod_index_data(2).is_none());
    }
}
