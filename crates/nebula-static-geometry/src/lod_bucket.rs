//! One level of detail of a region.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::context::BuildContext;
use crate::error::BatchError;
use crate::geometry_bucket::RegionRenderState;
use crate::material_bucket::MaterialBucket;
use crate::queued::{QueuedGeometry, QueuedSubMesh};
use crate::render::RenderQueue;

/// The material buckets making up one LOD of a region.
#[derive(Debug)]
pub struct LodBucket {
    lod: usize,
    /// Squared camera distance from which this LOD is used.
    squared_distance: f32,
    material_buckets: BTreeMap<String, MaterialBucket>,
    queued: Vec<QueuedGeometry>,
    region_center: Vec3,
}

impl LodBucket {
    pub fn new(lod: usize, squared_distance: f32, region_center: Vec3) -> Self {
        Self {
            lod,
            squared_distance,
            material_buckets: BTreeMap::new(),
            queued: Vec::new(),
            region_center,
        }
    }

    pub fn lod(&self) -> usize {
        self.lod
    }

    pub fn squared_distance(&self) -> f32 {
        self.squared_distance
    }

    pub fn material_buckets(&self) -> &BTreeMap<String, MaterialBucket> {
        &self.material_buckets
    }

    pub fn material_bucket(&self, material_name: &str) -> Option<&MaterialBucket> {
        self.material_buckets.get(material_name)
    }

    pub fn material_bucket_mut(&mut self, material_name: &str) -> Option<&mut MaterialBucket> {
        self.material_buckets.get_mut(material_name)
    }

    /// Geometry assigned to this LOD, in assignment order.
    pub fn queued_geometry(&self) -> &[QueuedGeometry] {
        &self.queued
    }

    /// Queue `sub_mesh` at `lod`, or at its coarsest variant when it has
    /// fewer levels.
    pub fn assign(&mut self, sub_mesh: &QueuedSubMesh, lod: usize) -> Result<(), BatchError> {
        // A submesh with no geometry at all has nothing to contribute.
        let Some(geometry) = sub_mesh.geometry_at_lod(lod) else {
            return Ok(());
        };
        let region_center = self.region_center;
        self.material_buckets
            .entry(sub_mesh.material_name.clone())
            .or_insert_with(|| MaterialBucket::new(sub_mesh.material_name.clone(), region_center))
            .assign(&geometry)?;
        self.queued.push(geometry);
        Ok(())
    }

    /// Build every material bucket; returns the number of geometry buckets built.
    pub fn build(
        &mut self,
        ctx: &BuildContext<'_>,
        stencil_shadows: bool,
        log_details: bool,
    ) -> Result<usize, BatchError> {
        let mut built = 0;
        for bucket in self.material_buckets.values_mut() {
            built += bucket.build(ctx, stencil_shadows, log_details)?;
        }
        if log_details {
            log::debug!(
                "LOD {} (from {} squared): {} materials, {} geometry buckets",
                self.lod,
                self.squared_distance,
                self.material_buckets.len(),
                built
            );
        }
        Ok(built)
    }

    pub fn add_renderables(
        &self,
        queue: &mut dyn RenderQueue,
        group: u8,
        camera_squared_distance: f32,
        region: &RegionRenderState,
    ) {
        for bucket in self.material_buckets.values() {
            bucket.add_renderables(queue, group, camera_squared_distance, region);
        }
    }

    pub fn dispose(&mut self) {
        for bucket in self.material_buckets.values_mut() {
            bucket.dispose();
        }
        self.material_buckets.clear();
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{IndexType, SystemMemoryBufferManager};
    use crate::test_util::{lod_mesh, queued_sub_mesh};

    #[test]
    fn test_missing_levels_fall_back_to_coarsest() {
        let manager = SystemMemoryBufferManager::new();
        let mesh = lod_mesh(&manager, "rock", "M1", &[500, 200], &[50.0], IndexType::U16);
        let sub_mesh = queued_sub_mesh(&manager, &mesh, Vec3::ZERO);

        for (lod, expected) in [(0, 500), (1, 200), (2, 200), (3, 200)] {
            let mut bucket = LodBucket::new(lod, 0.0, Vec3::ZERO);
            bucket.assign(&sub_mesh, lod).unwrap();
            assert_eq!(bucket.queued_geometry()[0].vertex_count(), expected);
        }
    }

    #[test]
    fn test_materials_get_separate_buckets() {
        let manager = SystemMemoryBufferManager::new();
        let a = queued_sub_mesh(
            &manager,
            &lod_mesh(&manager, "a", "M1", &[3], &[], IndexType::U16),
            Vec3::ZERO,
        );
        let b = queued_sub_mesh(
            &manager,
            &lod_mesh(&manager, "b", "M2", &[3], &[], IndexType::U16),
            Vec3::ZERO,
        );
        let mut bucket = LodBucket::new(0, 0.0, Vec3::ZERO);
        bucket.assign(&a, 0).unwrap();
        bucket.assign(&b, 0).unwrap();
        bucket.assign(&a, 0).unwrap();

        assert_eq!(
            bucket.material_buckets().keys().collect::<Vec<_>>(),
            vec!["M1", "M2"]
        );
        let m1 = bucket.material_bucket("M1").unwrap();
        assert_eq!(m1.geometry_buckets()[0].vertex_count(), 6);
    }
}
