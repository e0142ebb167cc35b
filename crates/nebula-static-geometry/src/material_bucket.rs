//! Groups geometry of one material into format-compatible geometry buckets.

use std::sync::Arc;

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::context::BuildContext;
use crate::error::BatchError;
use crate::geometry_bucket::{BatchRenderable, GeometryBucket, RegionRenderState};
use crate::material::Material;
use crate::queued::QueuedGeometry;
use crate::render::{DEFAULT_RENDERABLE_PRIORITY, RenderQueue};
use crate::vertex::geometry_format_signature;

/// All geometry of one material within one LOD of a region.
///
/// Each format signature has at most one current bucket open for new
/// geometry. A full bucket stays in the list but is never offered geometry
/// again.
#[derive(Debug)]
pub struct MaterialBucket {
    material_name: String,
    material: Option<Arc<Material>>,
    geometry_buckets: Vec<GeometryBucket>,
    current_geometry: FxHashMap<String, usize>,
    region_center: Vec3,
}

impl MaterialBucket {
    pub fn new(material_name: impl Into<String>, region_center: Vec3) -> Self {
        Self {
            material_name: material_name.into(),
            material: None,
            geometry_buckets: Vec::new(),
            current_geometry: FxHashMap::default(),
            region_center,
        }
    }

    pub fn material_name(&self) -> &str {
        &self.material_name
    }

    /// The resolved material; `None` before build or when it was not found.
    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    /// Every geometry bucket, in creation order.
    pub fn geometry_buckets(&self) -> &[GeometryBucket] {
        &self.geometry_buckets
    }

    pub fn geometry_bucket_mut(&mut self, index: usize) -> Option<&mut GeometryBucket> {
        self.geometry_buckets.get_mut(index)
    }

    /// The bucket currently accepting geometry of `signature`.
    pub fn current_bucket(&self, signature: &str) -> Option<&GeometryBucket> {
        self.current_geometry
            .get(signature)
            .and_then(|&i| self.geometry_buckets.get(i))
    }

    /// Route `geometry` to the current bucket of its format, opening a new
    /// bucket when there is none or the current one is full.
    pub fn assign(&mut self, geometry: &QueuedGeometry) -> Result<(), BatchError> {
        let vertex_data = &geometry.geometry.vertex_data;
        let index_data = &geometry.geometry.index_data;
        let index_type = index_data
            .index_type()
            .ok_or(BatchError::MissingIndexBuffer)?;
        let signature = geometry_format_signature(&vertex_data.declaration, index_type);

        if let Some(current) = self
            .current_geometry
            .get(&signature)
            .and_then(|&i| self.geometry_buckets.get_mut(i))
        {
            if current.assign(geometry) {
                return Ok(());
            }
        }

        let mut bucket =
            GeometryBucket::new(signature.clone(), vertex_data, index_data, self.region_center)?;
        if !bucket.assign(geometry) {
            return Err(BatchError::GeometryTooLarge {
                vertex_count: geometry.vertex_count(),
                max_vertex_index: bucket.max_vertex_index(),
            });
        }
        self.geometry_buckets.push(bucket);
        self.current_geometry
            .insert(signature, self.geometry_buckets.len() - 1);
        Ok(())
    }

    /// Resolve the material and build every geometry bucket.
    ///
    /// An unknown material is logged and its geometry discarded; the return
    /// value is then zero.
    pub fn build(
        &mut self,
        ctx: &BuildContext<'_>,
        stencil_shadows: bool,
        log_details: bool,
    ) -> Result<usize, BatchError> {
        let Some(material) = ctx.materials.get_by_name(&self.material_name) else {
            log::error!(
                "Material '{}' not found; its static geometry will not be rendered",
                self.material_name
            );
            self.dispose();
            return Ok(0);
        };
        ctx.materials.load(&material);
        self.material = Some(material);

        for bucket in &mut self.geometry_buckets {
            bucket.build(ctx, stencil_shadows, log_details)?;
        }
        if log_details {
            log::debug!(
                "Material bucket {}: {} geometry buckets",
                self.material_name,
                self.geometry_buckets.len()
            );
        }
        Ok(self.geometry_buckets.len())
    }

    /// Whether the material's preferred technique extrudes shadows on the GPU.
    pub fn uses_vertex_program(&self) -> bool {
        self.material
            .as_ref()
            .and_then(|m| m.best_technique(0))
            .is_some_and(|t| t.has_vertex_program)
    }

    /// Submit every geometry bucket with the technique for this distance.
    pub fn add_renderables(
        &self,
        queue: &mut dyn RenderQueue,
        group: u8,
        camera_squared_distance: f32,
        region: &RegionRenderState,
    ) {
        let Some(material) = &self.material else {
            return;
        };
        let lod = material.lod_index_for_squared_distance(camera_squared_distance);
        let Some(technique) = material.best_technique(lod) else {
            log::warn!("Material '{}' has no supported technique", material.name);
            return;
        };
        for bucket in &self.geometry_buckets {
            let renderable = BatchRenderable {
                bucket,
                material,
                technique,
                region,
            };
            queue.add_renderable(&renderable, group, DEFAULT_RENDERABLE_PRIORITY);
        }
    }

    pub fn dispose(&mut self) {
        for bucket in &mut self.geometry_buckets {
            bucket.dispose();
        }
        self.geometry_buckets.clear();
        self.current_geometry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{IndexType, SystemMemoryBufferManager};
    use crate::material::{InMemoryMaterialLibrary, Technique};
    use crate::render::CollectingRenderQueue;
    use crate::test_util::{link, queued};
    use glam::Mat4;

    fn render_state() -> RegionRenderState {
        RegionRenderState {
            center: Vec3::ZERO,
            world_transform: Mat4::IDENTITY,
            lights: Vec::new(),
            casts_shadows: false,
        }
    }

    #[test]
    fn test_full_bucket_opens_a_new_one() {
        let manager = SystemMemoryBufferManager::new();
        let mut bucket = MaterialBucket::new("M1", Vec3::ZERO);
        for n in [100, 200, 65_400] {
            bucket
                .assign(&queued(link(&manager, n, IndexType::U16), Vec3::ZERO))
                .unwrap();
        }
        let counts: Vec<usize> = bucket
            .geometry_buckets()
            .iter()
            .map(|b| b.vertex_count())
            .collect();
        assert_eq!(counts, vec![300, 65_400]);
    }

    #[test]
    fn test_earlier_buckets_are_never_revisited() {
        let manager = SystemMemoryBufferManager::new();
        let mut bucket = MaterialBucket::new("M1", Vec3::ZERO);
        for n in [60_000, 10_000, 5_000] {
            bucket
                .assign(&queued(link(&manager, n, IndexType::U16), Vec3::ZERO))
                .unwrap();
        }
        // 5000 would fit the first bucket but only the current one is tried
        let counts: Vec<usize> = bucket
            .geometry_buckets()
            .iter()
            .map(|b| b.vertex_count())
            .collect();
        assert_eq!(counts, vec![60_000, 15_000]);
    }

    #[test]
    fn test_formats_are_kept_apart() {
        let manager = SystemMemoryBufferManager::new();
        let mut bucket = MaterialBucket::new("M1", Vec3::ZERO);
        bucket
            .assign(&queued(link(&manager, 3, IndexType::U16), Vec3::ZERO))
            .unwrap();
        bucket
            .assign(&queued(link(&manager, 3, IndexType::U32), Vec3::ZERO))
            .unwrap();
        assert_eq!(bucket.geometry_buckets().len(), 2);
        assert!(bucket.current_bucket("0|0|1|2|0|4|2|0|7|1|").is_some());
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        let manager = SystemMemoryBufferManager::new();
        let mut bucket = MaterialBucket::new("M1", Vec3::ZERO);
        let err = bucket
            .assign(&queued(link(&manager, 70_000, IndexType::U16), Vec3::ZERO))
            .unwrap_err();
        assert!(matches!(err, BatchError::GeometryTooLarge { vertex_count: 70_000, .. }));
        assert!(bucket.geometry_buckets().is_empty());
    }

    #[test]
    fn test_missing_material_builds_nothing() {
        let manager = SystemMemoryBufferManager::new();
        let library = InMemoryMaterialLibrary::new();
        let ctx = BuildContext::new(&library, &manager);
        let mut bucket = MaterialBucket::new("Mx", Vec3::ZERO);
        bucket
            .assign(&queued(link(&manager, 3, IndexType::U16), Vec3::ZERO))
            .unwrap();

        assert_eq!(bucket.build(&ctx, false, false).unwrap(), 0);
        assert!(bucket.geometry_buckets().is_empty());

        let mut queue = CollectingRenderQueue::new();
        bucket.add_renderables(&mut queue, 50, 0.0, &render_state());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_technique_follows_camera_distance() {
        let manager = SystemMemoryBufferManager::new();
        let mut library = InMemoryMaterialLibrary::new();
        library.insert(
            Material::new("M1")
                .with_lod_distances(&[10.0])
                .with_techniques(vec![Technique::new("near", 0), Technique::new("far", 1)]),
        );
        let ctx = BuildContext::new(&library, &manager);
        let mut bucket = MaterialBucket::new("M1", Vec3::ZERO);
        bucket
            .assign(&queued(link(&manager, 3, IndexType::U16), Vec3::ZERO))
            .unwrap();
        assert_eq!(bucket.build(&ctx, false, false).unwrap(), 1);
        assert!(library.is_loaded("M1"));

        let mut queue = CollectingRenderQueue::new();
        bucket.add_renderables(&mut queue, 50, 4.0, &render_state());
        bucket.add_renderables(&mut queue, 50, 400.0, &render_state());
        let techniques: Vec<_> = queue
            .entries()
            .iter()
            .map(|e| e.technique_name.clone().unwrap())
            .collect();
        assert_eq!(techniques, vec!["near", "far"]);
        assert_eq!(queue.entries()[0].priority, DEFAULT_RENDERABLE_PRIORITY);
    }
}
