use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use super::edge_list::{EdgeData, EdgeGroup};
use crate::buffer::{IndexType, LockMode, SharedIndexBuffer, checked_range};
use crate::error::BatchError;
use crate::material::{Material, Technique};
use crate::render::{OperationType, RenderOperation, Renderable};
use crate::scene::Light;
use crate::vertex::{
    IndexData, VertexBufferBinding, VertexData, VertexDeclaration, VertexElementSemantic,
    VertexElementType,
};

/// Optional parts of a generated shadow volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadowRenderableFlags {
    /// Close the volume with the light-facing triangles.
    pub include_light_cap: bool,
    /// Close the far end with the extruded light-facing triangles. Ignored
    /// for directional lights, whose volume ends at infinity.
    pub include_dark_cap: bool,
}

/// The shadow volume of one edge group.
///
/// Draws from the group's doubled position buffer only: vertex `i` is the
/// original and `i + n` its extruded copy. Other streams of the batch hold
/// `n` vertices and are never bound here.
#[derive(Clone, Debug)]
pub struct ShadowRenderable {
    vertex_data: VertexData,
    index_data: IndexData,
    original_vertex_count: usize,
    world_transform: Mat4,
}

impl ShadowRenderable {
    /// Bind the group's position stream as stream 0, followed by its W
    /// buffer when the batch has one.
    pub fn new(group: &EdgeGroup) -> Result<Self, BatchError> {
        let source = &group.vertex_data;
        let position = source.position_element()?;
        let buffer = source
            .binding
            .buffer(position.source)
            .ok_or(BatchError::UnboundSource {
                stream: position.source,
            })?;

        let mut declaration = VertexDeclaration::new();
        declaration.add_element(
            position.source,
            position.offset,
            position.element_type,
            VertexElementSemantic::Position,
            0,
        );
        let mut binding = VertexBufferBinding::new();
        binding.set_binding(position.source, buffer.clone());
        if let Some(w_buffer) = &source.hardware_shadow_volume_w_buffer {
            let w_source = position.source + 1;
            declaration.add_element(
                w_source,
                0,
                VertexElementType::Float1,
                VertexElementSemantic::TextureCoordinates,
                0,
            );
            binding.set_binding(w_source, w_buffer.clone());
        }

        let original_vertex_count = source.vertex_count;
        let mut vertex_data = VertexData {
            declaration,
            binding,
            vertex_start: 0,
            vertex_count: original_vertex_count * 2,
            hardware_shadow_volume_w_buffer: source.hardware_shadow_volume_w_buffer.clone(),
        };
        vertex_data.close_gaps_in_bindings();
        Ok(Self {
            vertex_data,
            index_data: IndexData::default(),
            original_vertex_count,
            world_transform: Mat4::IDENTITY,
        })
    }

    pub fn vertex_data(&self) -> &VertexData {
        &self.vertex_data
    }

    /// Indices written by the last [`generate_shadow_volume`].
    pub fn index_data(&self) -> &IndexData {
        &self.index_data
    }

    pub fn original_vertex_count(&self) -> usize {
        self.original_vertex_count
    }

    pub fn set_world_transform(&mut self, world_transform: Mat4) {
        self.world_transform = world_transform;
    }

    /// Move the second half of the position buffer `distance` away from the
    /// light. `light` is `(pos, 1)` or `(-dir, 0)` in geometry space.
    pub fn extrude_vertices(&self, light: Vec4, distance: f32) -> Result<(), BatchError> {
        let element = self.vertex_data.position_element()?;
        let buffer = self
            .vertex_data
            .binding
            .buffer(element.source)
            .ok_or(BatchError::UnboundSource {
                stream: element.source,
            })?;
        let stride = buffer.vertex_size();
        let n = self.original_vertex_count;
        let mut lock = buffer.lock(LockMode::Normal)?;
        for i in 0..n {
            let src = checked_range(lock.len(), i * stride + element.offset, 12)?;
            let p = Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(&lock[src]));
            let direction = if light.w == 0.0 {
                -light.truncate()
            } else {
                p - light.truncate()
            };
            let extruded = (p + direction.normalize_or_zero() * distance).to_array();
            let dst = checked_range(lock.len(), (i + n) * stride + element.offset, 12)?;
            lock[dst].copy_from_slice(bytemuck::bytes_of(&extruded));
        }
        Ok(())
    }
}

impl Renderable for ShadowRenderable {
    fn render_operation(&self) -> RenderOperation {
        RenderOperation {
            operation_type: OperationType::TriangleList,
            vertex_data: self.vertex_data.clone(),
            index_data: self.index_data.clone(),
            use_indexes: true,
        }
    }

    fn world_transforms(&self) -> Mat4 {
        self.world_transform
    }

    fn world_position(&self) -> Vec3 {
        self.world_transform.w_axis.truncate()
    }

    fn material(&self) -> Option<&Arc<Material>> {
        None
    }

    fn technique(&self) -> Option<&Technique> {
        None
    }

    fn lights(&self) -> &[Light] {
        &[]
    }

    fn casts_shadows(&self) -> bool {
        false
    }

    fn custom_parameter(&self, _index: usize) -> Option<Vec4> {
        None
    }
}

/// Write silhouette (and optional cap) indices for every edge group into
/// `index_buffer`, one contiguous range per renderable.
///
/// `renderables` pairs with `edge_data.edge_groups` by position and light
/// facing must already be current for `light`.
pub fn generate_shadow_volume(
    edge_data: &EdgeData,
    index_buffer: &SharedIndexBuffer,
    renderables: &mut [ShadowRenderable],
    light: Vec4,
    flags: ShadowRenderableFlags,
) -> Result<(), BatchError> {
    let facings = &edge_data.triangle_light_facings;
    let directional = light.w == 0.0;
    let capacity = index_buffer.num_indexes();
    let mut lock = index_buffer.lock(LockMode::Discard)?;
    let mut written = 0;

    for (group, renderable) in edge_data.edge_groups.iter().zip(renderables.iter_mut()) {
        let n = renderable.original_vertex_count;
        let mut indices: Vec<usize> = Vec::new();
        for edge in &group.edges {
            let facing = facings[edge.tri_index[0]];
            let silhouette = if edge.degenerate {
                facing
            } else {
                facing != facings[edge.tri_index[1]]
            };
            if !silhouette {
                continue;
            }
            let [mut v0, mut v1] = edge.vert_index;
            if !facing {
                std::mem::swap(&mut v0, &mut v1);
            }
            indices.extend([v1, v0, v0 + n]);
            if !directional {
                indices.extend([v0 + n, v1 + n, v1]);
            }
        }

        let dark_cap = flags.include_dark_cap && !directional;
        if flags.include_light_cap || dark_cap {
            let triangles = &edge_data.triangles[group.tri_start..group.tri_start + group.tri_count];
            for (t, triangle) in triangles.iter().enumerate() {
                if !facings[group.tri_start + t] {
                    continue;
                }
                let [a, b, c] = triangle.vert_index;
                if flags.include_light_cap {
                    indices.extend([a, b, c]);
                }
                if dark_cap {
                    indices.extend([a + n, c + n, b + n]);
                }
            }
        }

        if written + indices.len() > capacity {
            return Err(BatchError::ShadowIndexBufferOverflow {
                required: written + indices.len(),
                capacity,
            });
        }
        for (i, &index) in indices.iter().enumerate() {
            IndexType::U16.write(&mut lock, written + i, index as u32)?;
        }
        renderable.index_data = IndexData {
            index_buffer: Some(index_buffer.clone()),
            index_start: written,
            index_count: indices.len(),
        };
        written += indices.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferUsage, HardwareBufferManager, SystemMemoryBufferManager};
    use crate::copy::duplicate_first_half;
    use crate::shadow::EdgeListBuilder;

    /// A single upward-facing triangle in a doubled position buffer.
    fn triangle(manager: &SystemMemoryBufferManager) -> EdgeData {
        let mut decl = VertexDeclaration::new();
        decl.add_element(0, 0, VertexElementType::Float3, VertexElementSemantic::Position, 0);
        let points: [[f32; 3]; 6] = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0; 3],
            [0.0; 3],
            [0.0; 3],
        ];
        let buffer = manager
            .create_vertex_buffer_with_data(12, bytemuck::cast_slice(&points), BufferUsage::Static)
            .unwrap();
        duplicate_first_half(&mut buffer.lock(LockMode::Normal).unwrap(), 36).unwrap();
        let mut vertex_data = VertexData::single_stream(decl, buffer);
        vertex_data.vertex_count = 3;
        let indices = IndexData::whole(
            manager
                .create_index_buffer_with_data(IndexType::U16, &[0, 1, 2], BufferUsage::Static)
                .unwrap(),
        );

        let mut builder = EdgeListBuilder::new();
        let set = builder.add_vertex_data(&vertex_data);
        builder.add_index_data(&indices, set);
        builder.build().unwrap()
    }

    fn setup(
        manager: &SystemMemoryBufferManager,
        light: Vec4,
        flags: ShadowRenderableFlags,
        capacity: usize,
    ) -> Result<Vec<ShadowRenderable>, BatchError> {
        let mut edge_data = triangle(manager);
        edge_data.update_light_facing(light);
        let mut renderables = edge_data
            .edge_groups
            .iter()
            .map(ShadowRenderable::new)
            .collect::<Result<Vec<_>, _>>()?;
        let index_buffer =
            manager.create_index_buffer(IndexType::U16, capacity, BufferUsage::DynamicWriteOnly);
        generate_shadow_volume(&edge_data, &index_buffer, &mut renderables, light, flags)?;
        Ok(renderables)
    }

    #[test]
    fn test_point_light_silhouette_uses_quads() {
        let manager = SystemMemoryBufferManager::new();
        let renderables = setup(
            &manager,
            Vec4::new(0.2, 0.2, 5.0, 1.0),
            ShadowRenderableFlags::default(),
            64,
        )
        .unwrap();
        let r = &renderables[0];
        assert_eq!(r.vertex_data().vertex_count, 6);
        assert_eq!(r.index_data().index_count, 3 * 6);
        let indices = r.index_data().read_indices().unwrap();
        // edge (0, 1) of a light-facing triangle
        assert_eq!(&indices[..6], &[1, 0, 3, 3, 4, 1]);
    }

    #[test]
    fn test_directional_light_uses_single_triangles() {
        let manager = SystemMemoryBufferManager::new();
        let flags = ShadowRenderableFlags {
            include_light_cap: true,
            include_dark_cap: true,
        };
        let renderables = setup(&manager, Vec4::new(0.0, 0.0, 1.0, 0.0), flags, 64).unwrap();
        // three silhouette triangles plus the light cap, no dark cap
        assert_eq!(renderables[0].index_data().index_count, 3 * 3 + 3);
    }

    #[test]
    fn test_caps_for_point_lights() {
        let manager = SystemMemoryBufferManager::new();
        let flags = ShadowRenderableFlags {
            include_light_cap: true,
            include_dark_cap: true,
        };
        let renderables = setup(&manager, Vec4::new(0.2, 0.2, 5.0, 1.0), flags, 64).unwrap();
        let indices = renderables[0].index_data().read_indices().unwrap();
        assert_eq!(indices.len(), 18 + 6);
        assert_eq!(&indices[18..], &[0, 1, 2, 3, 5, 4]);
    }

    #[test]
    fn test_back_facing_triangle_casts_nothing() {
        let manager = SystemMemoryBufferManager::new();
        let renderables = setup(
            &manager,
            Vec4::new(0.2, 0.2, -5.0, 1.0),
            ShadowRenderableFlags::default(),
            64,
        )
        .unwrap();
        assert_eq!(renderables[0].index_data().index_count, 0);
    }

    #[test]
    fn test_index_buffer_overflow() {
        let manager = SystemMemoryBufferManager::new();
        let err = setup(
            &manager,
            Vec4::new(0.2, 0.2, 5.0, 1.0),
            ShadowRenderableFlags::default(),
            4,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BatchError::ShadowIndexBufferOverflow {
                required: 18,
                capacity: 4
            }
        ));
    }

    #[test]
    fn test_extrusion_moves_second_half_away_from_light() {
        let manager = SystemMemoryBufferManager::new();
        let renderables = setup(
            &manager,
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            ShadowRenderableFlags::default(),
            64,
        )
        .unwrap();
        let r = &renderables[0];
        r.extrude_vertices(Vec4::new(0.0, 0.0, 1.0, 0.0), 10.0).unwrap();

        let buffer = r.vertex_data().binding.buffer(0).unwrap();
        let mut bytes = vec![0u8; buffer.size_in_bytes()];
        buffer.read_data(0, &mut bytes).unwrap();
        let points: &[[f32; 3]] = bytemuck::cast_slice(&bytes);
        assert_eq!(points[0], [0.0, 0.0, 0.0]);
        assert_eq!(points[3], [0.0, 0.0, -10.0]);
        assert_eq!(points[5], [0.0, 1.0, -10.0]);
    }
}
