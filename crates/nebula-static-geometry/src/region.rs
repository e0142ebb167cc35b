//! Spatial cells of a static geometry batch.
//!
//! A region collects queued submeshes while unbuilt, then owns the full
//! LOD / material / geometry bucket hierarchy and a scene node at its centre.
//! Each frame the camera picks one active LOD, and only that LOD is queued.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::bounds::Aabb;
use crate::buffer::{BufferUsage, HardwareBufferManager, IndexType, SharedIndexBuffer};
use crate::context::BuildContext;
use crate::error::BatchError;
use crate::geometry_bucket::RegionRenderState;
use crate::lod_bucket::LodBucket;
use crate::queued::QueuedSubMesh;
use crate::render::{RENDER_QUEUE_MAIN, RenderQueue};
use crate::scene::{Camera, Light, LightKind, SceneGraph, SceneNodeId};
use crate::shadow::{
    EdgeData, EdgeListBuilder, ShadowRenderable, ShadowRenderableFlags, generate_shadow_volume,
};

/// Lifecycle of a region. There is no way back from `Built` to `Unbuilt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    Unbuilt,
    Built,
    Disposed,
}

/// Parameters of one shadow volume update.
#[derive(Clone, Debug)]
pub struct ShadowVolumeRequest {
    pub light: Light,
    /// Extrusion distance for directional lights.
    pub directional_extrusion_distance: f32,
    /// Extrude on the CPU. Skipped when a vertex program does the extrusion.
    pub extrude_vertices: bool,
    pub flags: ShadowRenderableFlags,
    /// Size of the region's shared shadow index buffer, in indices.
    pub index_buffer_capacity: usize,
}

/// One spatial cell of batched geometry.
#[derive(Debug)]
pub struct Region {
    name: String,
    id: u32,
    center: Vec3,
    state: RegionState,
    queued: Vec<Arc<QueuedSubMesh>>,
    lod_squared_distances: Vec<f32>,
    local_bounds: Aabb,
    bounding_radius: f32,
    lod_buckets: Vec<LodBucket>,
    current_lod: usize,
    camera_squared_distance: f32,
    beyond_far_distance: bool,
    squared_rendering_distance: f32,
    visible: bool,
    casts_shadows: bool,
    render_queue_group: u8,
    visibility_flags: u32,
    camera_visibility_mask: u32,
    node: Option<SceneNodeId>,
    edge_list: Option<EdgeData>,
    vertex_program_in_use: bool,
    shadow_renderables: Vec<ShadowRenderable>,
    shadow_index_buffer: Option<SharedIndexBuffer>,
}

impl Region {
    pub fn new(name: impl Into<String>, id: u32, center: Vec3) -> Self {
        Self {
            name: name.into(),
            id,
            center,
            state: RegionState::Unbuilt,
            queued: Vec::new(),
            lod_squared_distances: Vec::new(),
            local_bounds: Aabb::EMPTY,
            bounding_radius: 0.0,
            lod_buckets: Vec::new(),
            current_lod: 0,
            camera_squared_distance: 0.0,
            beyond_far_distance: false,
            squared_rendering_distance: 0.0,
            visible: true,
            casts_shadows: false,
            render_queue_group: RENDER_QUEUE_MAIN,
            visibility_flags: u32::MAX,
            camera_visibility_mask: u32::MAX,
            node: None,
            edge_list: None,
            vertex_program_in_use: false,
            shadow_renderables: Vec::new(),
            shadow_index_buffer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn queued_sub_meshes(&self) -> &[Arc<QueuedSubMesh>] {
        &self.queued
    }

    /// Squared distance from which each LOD is used, LOD 0 first.
    pub fn lod_squared_distances(&self) -> &[f32] {
        &self.lod_squared_distances
    }

    /// Bounds of all assigned geometry relative to the centre.
    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }

    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }

    pub fn lod_buckets(&self) -> &[LodBucket] {
        &self.lod_buckets
    }

    pub fn lod_bucket_mut(&mut self, lod: usize) -> Option<&mut LodBucket> {
        self.lod_buckets.get_mut(lod)
    }

    pub fn lod_count(&self) -> usize {
        self.lod_squared_distances.len()
    }

    pub fn current_lod(&self) -> usize {
        self.current_lod
    }

    pub fn camera_squared_distance(&self) -> f32 {
        self.camera_squared_distance
    }

    pub fn is_beyond_far_distance(&self) -> bool {
        self.beyond_far_distance
    }

    pub fn scene_node(&self) -> Option<SceneNodeId> {
        self.node
    }

    pub fn edge_list(&self) -> Option<&EdgeData> {
        self.edge_list.as_ref()
    }

    pub fn vertex_program_in_use(&self) -> bool {
        self.vertex_program_in_use
    }

    /// Maximum squared distance to the camera before culling; 0 disables it.
    pub fn set_squared_rendering_distance(&mut self, squared_distance: f32) {
        self.squared_rendering_distance = squared_distance;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    pub fn set_cast_shadows(&mut self, casts_shadows: bool) {
        self.casts_shadows = casts_shadows;
    }

    pub fn render_queue_group(&self) -> u8 {
        self.render_queue_group
    }

    pub fn set_render_queue_group(&mut self, group: u8) {
        self.render_queue_group = group;
    }

    pub fn visibility_flags(&self) -> u32 {
        self.visibility_flags
    }

    pub fn set_visibility_flags(&mut self, flags: u32) {
        self.visibility_flags = flags;
    }

    /// Visible when enabled, within the rendering distance and sharing a
    /// visibility flag with the last notified camera.
    pub fn is_visible(&self) -> bool {
        self.visible
            && !self.beyond_far_distance
            && self.visibility_flags & self.camera_visibility_mask != 0
    }

    /// Queue a submesh and widen LOD distances and bounds to cover it.
    pub fn assign(&mut self, sub_mesh: Arc<QueuedSubMesh>) -> Result<(), BatchError> {
        if self.state != RegionState::Unbuilt {
            return Err(BatchError::AlreadyBuilt {
                region: self.name.clone(),
            });
        }
        let levels = sub_mesh.mesh.lod_levels();
        if sub_mesh.geometry_lod_list.len() != levels.len() {
            return Err(BatchError::LodCountMismatch {
                mesh: sub_mesh.mesh.name.clone(),
                variants: sub_mesh.geometry_lod_list.len(),
                levels: levels.len(),
            });
        }

        for (lod, usage) in levels.iter().enumerate() {
            match self.lod_squared_distances.get_mut(lod) {
                Some(distance) => *distance = distance.max(usage.from_depth_squared),
                None => self.lod_squared_distances.push(usage.from_depth_squared),
            }
        }

        let local = sub_mesh.world_bounds.translated(-self.center);
        self.local_bounds.merge(&local);
        self.bounding_radius = self.bounding_radius.max(local.max_corner_distance());
        self.queued.push(sub_mesh);
        Ok(())
    }

    /// Attach to the scene and build every LOD.
    ///
    /// With `stencil_shadows` an edge list over all geometry buckets is built
    /// as well; this requires 16-bit indices throughout.
    pub fn build(
        &mut self,
        scene: &mut dyn SceneGraph,
        ctx: &BuildContext<'_>,
        stencil_shadows: bool,
        log_details: bool,
    ) -> Result<usize, BatchError> {
        if self.state != RegionState::Unbuilt {
            return Err(BatchError::AlreadyBuilt {
                region: self.name.clone(),
            });
        }
        let node = scene.create_child_scene_node(&self.name, self.center);
        scene.attach_object(node, &self.name);
        self.node = Some(node);
        self.state = RegionState::Built;

        let mut built = 0;
        for (lod, &squared_distance) in self.lod_squared_distances.iter().enumerate() {
            let mut bucket = LodBucket::new(lod, squared_distance, self.center);
            for sub_mesh in &self.queued {
                bucket.assign(sub_mesh, lod)?;
            }
            built += bucket.build(ctx, stencil_shadows, log_details)?;
            self.lod_buckets.push(bucket);
        }

        if stencil_shadows {
            self.build_edge_list()?;
        }

        if log_details {
            log::info!(
                "Region {} ({}) at {}: {} submeshes, {} LODs, {} geometry buckets, radius {}",
                self.name,
                self.id,
                self.center,
                self.queued.len(),
                self.lod_buckets.len(),
                built,
                self.bounding_radius
            );
        }
        Ok(built)
    }

    fn build_edge_list(&mut self) -> Result<(), BatchError> {
        let mut builder = EdgeListBuilder::new();
        let mut vertex_program_in_use = false;
        for lod in &self.lod_buckets {
            for material in lod.material_buckets().values() {
                vertex_program_in_use |= material.uses_vertex_program();
                for geometry in material.geometry_buckets() {
                    if geometry.index_type() != IndexType::U16 {
                        return Err(BatchError::ShadowIndexTypeUnsupported);
                    }
                    let vertex_set = builder.add_vertex_data(geometry.vertex_data());
                    builder.add_index_data(geometry.index_data(), vertex_set);
                }
            }
        }
        self.vertex_program_in_use = vertex_program_in_use;
        self.edge_list = Some(builder.build()?);
        Ok(())
    }

    /// Pick the active LOD for `camera` and cull past the rendering distance.
    pub fn notify_current_camera(&mut self, camera: &Camera) {
        let squared_depth = camera.position.distance_squared(self.center);
        let squared_distance = (squared_depth - self.bounding_radius * self.bounding_radius).max(0.0);
        self.camera_squared_distance = squared_distance;
        self.camera_visibility_mask = camera.visibility_mask;

        self.beyond_far_distance = self.squared_rendering_distance > 0.0
            && squared_distance > self.squared_rendering_distance;
        if self.beyond_far_distance {
            return;
        }

        let lod_value = if camera.lod_bias > 0.0 {
            squared_distance / camera.lod_bias
        } else {
            squared_distance
        };
        self.current_lod = self.lod_squared_distances.len().saturating_sub(1);
        for (i, &threshold) in self.lod_squared_distances.iter().enumerate() {
            if threshold > lod_value {
                self.current_lod = i.saturating_sub(1);
                break;
            }
        }
    }

    /// Queue the active LOD's geometry.
    pub fn update_render_queue(&self, queue: &mut dyn RenderQueue, scene: &dyn SceneGraph) {
        if !self.is_visible() {
            return;
        }
        let (Some(node), Some(lod)) = (self.node, self.lod_buckets.get(self.current_lod)) else {
            return;
        };
        let state = RegionRenderState {
            center: self.center,
            world_transform: scene.full_transform(node),
            lights: scene.find_lights(node, self.bounding_radius),
            casts_shadows: self.casts_shadows,
        };
        lod.add_renderables(
            queue,
            self.render_queue_group,
            self.camera_squared_distance,
            &state,
        );
    }

    /// How far a point light's shadow must be extruded to leave its range.
    pub fn point_extrusion_distance(&self, light: &Light) -> f32 {
        match light.kind {
            LightKind::Point { position, range } => {
                let world_center = self.center + self.local_bounds.center();
                range - (world_center - position).length()
            }
            LightKind::Directional { .. } => 0.0,
        }
    }

    /// Shadow volumes for `request.light`, one per edge group.
    ///
    /// Renderables are created on first use and refreshed on every call. The
    /// shared index buffer is replaced when a request needs more room.
    pub fn shadow_volume_renderables(
        &mut self,
        scene: &dyn SceneGraph,
        buffers: &dyn HardwareBufferManager,
        request: &ShadowVolumeRequest,
    ) -> Result<&[ShadowRenderable], BatchError> {
        let missing = || BatchError::MissingEdgeList {
            region: self.name.clone(),
        };
        let node = self.node.ok_or_else(missing)?;
        let edge_list = self.edge_list.as_mut().ok_or_else(missing)?;

        let world = scene.full_transform(node);
        let light: Vec4 = world.inverse() * request.light.as_vec4();
        edge_list.update_light_facing(light);

        if self.shadow_renderables.is_empty() {
            self.shadow_renderables = edge_list
                .edge_groups
                .iter()
                .map(ShadowRenderable::new)
                .collect::<Result<_, _>>()?;
        }
        let reusable = self
            .shadow_index_buffer
            .as_ref()
            .filter(|buffer| buffer.num_indexes() >= request.index_buffer_capacity)
            .cloned();
        let index_buffer = match reusable {
            Some(buffer) => buffer,
            None => {
                let buffer = buffers.create_index_buffer(
                    IndexType::U16,
                    request.index_buffer_capacity,
                    BufferUsage::DynamicWriteOnly,
                );
                self.shadow_index_buffer = Some(buffer.clone());
                buffer
            }
        };
        generate_shadow_volume(
            edge_list,
            &index_buffer,
            &mut self.shadow_renderables,
            light,
            request.flags,
        )?;

        let distance = match request.light.kind {
            LightKind::Directional { .. } => request.directional_extrusion_distance,
            LightKind::Point { .. } => self.point_extrusion_distance(&request.light),
        };
        let extrude = request.extrude_vertices && !self.vertex_program_in_use;
        for renderable in &mut self.shadow_renderables {
            renderable.set_world_transform(world);
            if extrude {
                renderable.extrude_vertices(light, distance)?;
            }
        }
        Ok(&self.shadow_renderables)
    }

    /// Release every bucket and detach from the scene.
    pub fn dispose(&mut self, scene: &mut dyn SceneGraph) {
        for lod in &mut self.lod_buckets {
            lod.dispose();
        }
        self.lod_buckets.clear();
        self.shadow_renderables.clear();
        self.shadow_index_buffer = None;
        self.edge_list = None;
        if let Some(node) = self.node.take() {
            scene.remove_from_parent(node);
            scene.destroy_scene_node(node);
        }
        self.state = RegionState::Disposed;
    }
}
