//! The parent manager: turns placed mesh instances into built regions.
//!
//! Instances are split into one queued submesh per submesh, each routed to
//! the region whose grid cell contains the centre of its world bounds.
//! Region indices pack three 10-bit cell coordinates, giving 1024 cells
//! per axis centred on the origin.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::buffer::HardwareBufferManager;
use crate::context::BuildContext;
use crate::error::BatchError;
use crate::mesh::Mesh;
use crate::queued::{GeometryLinkCache, QueuedSubMesh};
use crate::region::Region;
use crate::render::{RENDER_QUEUE_MAIN, RenderQueue};
use crate::scene::{Camera, SceneGraph};

const REGION_RANGE: i32 = 1024;
const REGION_HALF_RANGE: i32 = 512;
const REGION_MIN_INDEX: i32 = -REGION_HALF_RANGE;
const REGION_MAX_INDEX: i32 = REGION_HALF_RANGE - 1;

/// Settings shared by every region of a [`StaticGeometry`].
#[derive(Clone, Debug, PartialEq)]
pub struct StaticGeometryOptions {
    pub region_dimensions: Vec3,
    pub origin: Vec3,
    /// Regions farther than this from the camera are hidden; 0 disables culling.
    pub rendering_distance: f32,
    pub visible: bool,
    pub cast_shadows: bool,
    pub render_queue_group: u8,
    pub visibility_flags: u32,
    pub log_details: bool,
}

impl Default for StaticGeometryOptions {
    fn default() -> Self {
        Self {
            region_dimensions: Vec3::splat(1000.0),
            origin: Vec3::ZERO,
            rendering_distance: 0.0,
            visible: true,
            cast_shadows: false,
            render_queue_group: RENDER_QUEUE_MAIN,
            visibility_flags: u32::MAX,
            log_details: false,
        }
    }
}

impl StaticGeometryOptions {
    pub fn squared_rendering_distance(&self) -> f32 {
        self.rendering_distance * self.rendering_distance
    }

    /// Packed index of the region cell containing `point`.
    pub fn region_index(&self, point: Vec3) -> Result<u32, BatchError> {
        let scaled = ((point - self.origin) / self.region_dimensions).floor();
        if !scaled.is_finite()
            || scaled.min_element() < REGION_MIN_INDEX as f32
            || scaled.max_element() > REGION_MAX_INDEX as f32
        {
            return Err(BatchError::RegionOutOfRange { point });
        }
        let cell = scaled.as_ivec3() + REGION_HALF_RANGE;
        Ok((cell.x + (cell.y << 10) + (cell.z << 20)) as u32)
    }

    /// Centre of the region cell with packed `index`.
    pub fn region_center(&self, index: u32) -> Vec3 {
        let mask = (REGION_RANGE - 1) as u32;
        let cell = Vec3::new(
            (index & mask) as f32,
            ((index >> 10) & mask) as f32,
            ((index >> 20) & mask) as f32,
        ) - REGION_HALF_RANGE as f32;
        self.origin + (cell + 0.5) * self.region_dimensions
    }
}

/// A mesh placed in the world, with optional per-submesh material overrides.
#[derive(Clone, Debug)]
pub struct MeshInstance {
    pub mesh: Arc<Mesh>,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
    material_overrides: FxHashMap<usize, String>,
}

impl MeshInstance {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: Vec3::ONE,
            material_overrides: FxHashMap::default(),
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, orientation: Quat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn scaled(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Draw submesh `sub_mesh` with `material` instead of its own.
    pub fn with_material(mut self, sub_mesh: usize, material: impl Into<String>) -> Self {
        self.material_overrides.insert(sub_mesh, material.into());
        self
    }

    pub fn material_name(&self, sub_mesh: usize) -> &str {
        self.material_overrides
            .get(&sub_mesh)
            .map(String::as_str)
            .unwrap_or_else(|| {
                self.mesh
                    .sub_meshes
                    .get(sub_mesh)
                    .map_or("", |s| s.material_name.as_str())
            })
    }
}

/// Totals over every built region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticGeometryStats {
    pub queued_sub_meshes: usize,
    pub regions: usize,
    pub lod_buckets: usize,
    pub material_buckets: usize,
    pub geometry_buckets: usize,
    pub vertices: usize,
    pub indices: usize,
}

/// Batches static mesh instances into regions of merged geometry.
pub struct StaticGeometry {
    name: String,
    options: StaticGeometryOptions,
    queued: Vec<Arc<QueuedSubMesh>>,
    regions: BTreeMap<u32, Region>,
    geometry_cache: GeometryLinkCache,
    built: bool,
}

impl StaticGeometry {
    pub fn new(name: impl Into<String>, options: StaticGeometryOptions) -> Self {
        Self {
            name: name.into(),
            options,
            queued: Vec::new(),
            regions: BTreeMap::new(),
            geometry_cache: GeometryLinkCache::new(),
            built: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &StaticGeometryOptions {
        &self.options
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn queued_sub_meshes(&self) -> &[Arc<QueuedSubMesh>] {
        &self.queued
    }

    pub fn regions(&self) -> &BTreeMap<u32, Region> {
        &self.regions
    }

    pub fn region(&self, index: u32) -> Option<&Region> {
        self.regions.get(&index)
    }

    pub fn regions_mut(&mut self) -> impl Iterator<Item = &mut Region> {
        self.regions.values_mut()
    }

    /// Region dimensions only affect the next build.
    pub fn set_region_dimensions(&mut self, dimensions: Vec3) {
        self.options.region_dimensions = dimensions;
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.options.origin = origin;
    }

    pub fn set_rendering_distance(&mut self, distance: f32) {
        self.options.rendering_distance = distance;
        let squared = self.options.squared_rendering_distance();
        for region in self.regions.values_mut() {
            region.set_squared_rendering_distance(squared);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.options.visible = visible;
        for region in self.regions.values_mut() {
            region.set_visible(visible);
        }
    }

    pub fn set_cast_shadows(&mut self, cast_shadows: bool) {
        self.options.cast_shadows = cast_shadows;
        for region in self.regions.values_mut() {
            region.set_cast_shadows(cast_shadows);
        }
    }

    pub fn set_render_queue_group(&mut self, group: u8) {
        self.options.render_queue_group = group;
        for region in self.regions.values_mut() {
            region.set_render_queue_group(group);
        }
    }

    pub fn set_visibility_flags(&mut self, flags: u32) {
        self.options.visibility_flags = flags;
        for region in self.regions.values_mut() {
            region.set_visibility_flags(flags);
        }
    }

    /// Queue every submesh of `instance`. Geometry for each submesh is
    /// resolved once and shared by later instances of the same mesh.
    ///
    /// The mesh must have non-empty bounds, which decide its region.
    pub fn add_mesh_instance(
        &mut self,
        instance: &MeshInstance,
        buffers: &dyn HardwareBufferManager,
    ) -> Result<(), BatchError> {
        if instance.mesh.bounds.is_empty() {
            return Err(BatchError::EmptyMeshBounds {
                mesh: instance.mesh.name.clone(),
            });
        }
        for sub_mesh_index in 0..instance.mesh.sub_meshes.len() {
            let links = self
                .geometry_cache
                .geometry_for(&instance.mesh, sub_mesh_index, buffers)?;
            self.queued.push(Arc::new(QueuedSubMesh::new(
                instance.mesh.clone(),
                sub_mesh_index,
                instance.material_name(sub_mesh_index),
                links,
                instance.position,
                instance.orientation,
                instance.scale,
            )));
        }
        Ok(())
    }

    /// Discard any previous build, distribute queued submeshes into regions
    /// and build each one.
    ///
    /// Shadow edge lists are built only when this geometry casts shadows and
    /// `stencil_shadows` is set.
    pub fn build(
        &mut self,
        scene: &mut dyn SceneGraph,
        ctx: &BuildContext<'_>,
        stencil_shadows: bool,
    ) -> Result<(), BatchError> {
        self.destroy(scene);

        for sub_mesh in &self.queued {
            let index = self.options.region_index(sub_mesh.world_bounds.center())?;
            let region = match self.regions.entry(index) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    entry.insert(new_region(&self.name, &self.options, index))
                }
            };
            region.assign(sub_mesh.clone())?;
        }

        let stencil = self.options.cast_shadows && stencil_shadows;
        let mut geometry_buckets = 0;
        for region in self.regions.values_mut() {
            geometry_buckets += region.build(scene, ctx, stencil, self.options.log_details)?;
        }
        self.built = true;
        log::info!(
            "Static geometry '{}' built: {} submeshes in {} regions, {} geometry buckets",
            self.name,
            self.queued.len(),
            self.regions.len(),
            geometry_buckets
        );
        Ok(())
    }

    /// Dispose every region but keep the queued input for a rebuild.
    pub fn destroy(&mut self, scene: &mut dyn SceneGraph) {
        for region in self.regions.values_mut() {
            region.dispose(scene);
        }
        self.regions.clear();
        self.built = false;
    }

    /// Dispose every region and forget all queued input.
    pub fn reset(&mut self, scene: &mut dyn SceneGraph) {
        self.destroy(scene);
        self.queued.clear();
        self.geometry_cache.clear();
    }

    pub fn notify_current_camera(&mut self, camera: &Camera) {
        for region in self.regions.values_mut() {
            region.notify_current_camera(camera);
        }
    }

    pub fn update_render_queue(&self, queue: &mut dyn RenderQueue, scene: &dyn SceneGraph) {
        if !self.options.visible {
            return;
        }
        for region in self.regions.values() {
            region.update_render_queue(queue, scene);
        }
    }

    pub fn stats(&self) -> StaticGeometryStats {
        let mut stats = StaticGeometryStats {
            queued_sub_meshes: self.queued.len(),
            regions: self.regions.len(),
            ..Default::default()
        };
        for region in self.regions.values() {
            stats.lod_buckets += region.lod_buckets().len();
            for lod in region.lod_buckets() {
                stats.material_buckets += lod.material_buckets().len();
                for material in lod.material_buckets().values() {
                    stats.geometry_buckets += material.geometry_buckets().len();
                    for geometry in material.geometry_buckets() {
                        stats.vertices += geometry.vertex_count();
                        stats.indices += geometry.index_count();
                    }
                }
            }
        }
        stats
    }

    /// Log the full region hierarchy.
    pub fn dump(&self) {
        log::info!(
            "Static geometry '{}': origin {}, region size {}, {} regions",
            self.name,
            self.options.origin,
            self.options.region_dimensions,
            self.regions.len()
        );
        for region in self.regions.values() {
            log::info!(
                "  Region {} ({}) centre {} radius {} current LOD {}",
                region.name(),
                region.id(),
                region.center(),
                region.bounding_radius(),
                region.current_lod()
            );
            for lod in region.lod_buckets() {
                log::info!(
                    "    LOD {} from squared distance {}",
                    lod.lod(),
                    lod.squared_distance()
                );
                for (name, material) in lod.material_buckets() {
                    log::info!(
                        "      Material {} ({} geometry buckets)",
                        name,
                        material.geometry_buckets().len()
                    );
                    for geometry in material.geometry_buckets() {
                        log::info!(
                            "        {}: {} vertices, {} indices",
                            geometry.format_signature(),
                            geometry.vertex_count(),
                            geometry.index_count()
                        );
                    }
                }
            }
        }
    }
}

fn new_region(name: &str, options: &StaticGeometryOptions, index: u32) -> Region {
    let mut region = Region::new(
        format!("{name}:{index}"),
        index,
        options.region_center(index),
    );
    region.set_squared_rendering_distance(options.squared_rendering_distance());
    region.set_visible(options.visible);
    region.set_cast_shadows(options.cast_shadows);
    region.set_render_queue_group(options.render_queue_group);
    region.set_visibility_flags(options.visibility_flags);
    region
}
