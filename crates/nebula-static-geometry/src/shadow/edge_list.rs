use glam::{Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::error::BatchError;
use crate::vertex::{IndexData, VertexData};

/// A triangle of the edge list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triangle {
    pub index_set: usize,
    pub vertex_set: usize,
    /// Vertex indices within the vertex set.
    pub vert_index: [usize; 3],
    /// Indices into the common (position-welded) vertex list.
    pub shared_vert_index: [usize; 3],
}

/// An edge between one or two triangles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The triangle the edge was found on first, then its neighbour. Both
    /// are the same triangle while the edge is degenerate.
    pub tri_index: [usize; 2],
    pub vert_index: [usize; 2],
    pub shared_vert_index: [usize; 2],
    /// Open edge with only one adjoining triangle.
    pub degenerate: bool,
}

/// Edges and triangles drawn from one vertex set.
#[derive(Clone, Debug)]
pub struct EdgeGroup {
    pub vertex_set: usize,
    pub vertex_data: VertexData,
    pub tri_start: usize,
    pub tri_count: usize,
    pub edges: Vec<Edge>,
}

/// Connectivity used for silhouette detection.
#[derive(Clone, Debug, Default)]
pub struct EdgeData {
    pub triangles: Vec<Triangle>,
    /// Unnormalised plane equation of each triangle.
    pub triangle_face_normals: Vec<Vec4>,
    pub triangle_light_facings: Vec<bool>,
    pub edge_groups: Vec<EdgeGroup>,
    /// No degenerate edges anywhere.
    pub is_closed: bool,
}

impl EdgeData {
    /// Recompute which triangles face `light` (`(pos, 1)` or `(-dir, 0)`,
    /// in the same space as the geometry).
    pub fn update_light_facing(&mut self, light: Vec4) {
        for (facing, normal) in self
            .triangle_light_facings
            .iter_mut()
            .zip(&self.triangle_face_normals)
        {
            *facing = normal.dot(light) > 0.0;
        }
    }
}

/// Collects triangle-list geometry and welds it into an [`EdgeData`].
#[derive(Default)]
pub struct EdgeListBuilder {
    vertex_data: Vec<VertexData>,
    index_data: Vec<(IndexData, usize)>,
}

impl EdgeListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex set and return its index.
    pub fn add_vertex_data(&mut self, vertex_data: &VertexData) -> usize {
        self.vertex_data.push(vertex_data.clone());
        self.vertex_data.len() - 1
    }

    /// Add triangles indexing into `vertex_set`.
    pub fn add_index_data(&mut self, index_data: &IndexData, vertex_set: usize) {
        self.index_data.push((index_data.clone(), vertex_set));
    }

    pub fn build(self) -> Result<EdgeData, BatchError> {
        let positions = self
            .vertex_data
            .iter()
            .map(VertexData::read_positions)
            .collect::<Result<Vec<_>, _>>()?;

        let mut data = EdgeData {
            edge_groups: self
                .vertex_data
                .iter()
                .enumerate()
                .map(|(vertex_set, vertex_data)| EdgeGroup {
                    vertex_set,
                    vertex_data: vertex_data.clone(),
                    tri_start: 0,
                    tri_count: 0,
                    edges: Vec::new(),
                })
                .collect(),
            ..EdgeData::default()
        };

        // Triangles of one vertex set must be contiguous.
        let mut order: Vec<usize> = (0..self.index_data.len()).collect();
        order.sort_by_key(|&i| self.index_data[i].1);

        let mut common: FxHashMap<(usize, [u32; 3]), usize> = FxHashMap::default();
        let mut open_edges: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        for index_set in order {
            let (index_data, vertex_set) = &self.index_data[index_set];
            let vertex_set = *vertex_set;
            let set_positions = positions
                .get(vertex_set)
                .ok_or(BatchError::UnknownVertexSet { vertex_set })?;
            let group = &mut data.edge_groups[vertex_set];
            if group.tri_count == 0 {
                group.tri_start = data.triangles.len();
            }

            for tri in index_data.read_indices()?.chunks_exact(3) {
                let vert_index = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
                let mut p = [Vec3::ZERO; 3];
                let mut shared_vert_index = [0; 3];
                for k in 0..3 {
                    p[k] = *set_positions
                        .get(vert_index[k])
                        .ok_or(BatchError::IndexOutOfRange { index: tri[k] })?;
                    let next = common.len();
                    shared_vert_index[k] = *common
                        .entry((vertex_set, p[k].to_array().map(f32::to_bits)))
                        .or_insert(next);
                }

                let tri_index = data.triangles.len();
                let normal = (p[1] - p[0]).cross(p[2] - p[0]);
                data.triangle_face_normals
                    .push(normal.extend(-normal.dot(p[0])));
                data.triangle_light_facings.push(false);
                data.triangles.push(Triangle {
                    index_set,
                    vertex_set,
                    vert_index,
                    shared_vert_index,
                });
                group.tri_count += 1;

                for (a, b) in [(0, 1), (1, 2), (2, 0)] {
                    let (sa, sb) = (shared_vert_index[a], shared_vert_index[b]);
                    if let Some(edge) = open_edges.remove(&(sb, sa)) {
                        let edge = &mut group.edges[edge];
                        edge.tri_index[1] = tri_index;
                        edge.degenerate = false;
                    } else {
                        open_edges.insert((sa, sb), group.edges.len());
                        group.edges.push(Edge {
                            tri_index: [tri_index, tri_index],
                            vert_index: [vert_index[a], vert_index[b]],
                            shared_vert_index: [sa, sb],
                            degenerate: true,
                        });
                    }
                }
            }
        }

        data.is_closed = data
            .edge_groups
            .iter()
            .flat_map(|g| &g.edges)
            .all(|e| !e.degenerate);
        Ok(data)
    }
}
