//! Render queue contract: batched geometry is submitted as [`Renderable`]s.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::material::{Material, Technique};
use crate::scene::{Camera, Light};
use crate::vertex::{IndexData, VertexData};

/// Priority used for every batched renderable.
pub const DEFAULT_RENDERABLE_PRIORITY: u16 = 100;

/// Render queue group for ordinary scene geometry.
pub const RENDER_QUEUE_MAIN: u8 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    TriangleList,
}

/// Everything needed to issue one draw.
#[derive(Clone, Debug)]
pub struct RenderOperation {
    pub operation_type: OperationType,
    pub vertex_data: VertexData,
    pub index_data: IndexData,
    pub use_indexes: bool,
}

/// Something the render queue can draw.
pub trait Renderable {
    fn render_operation(&self) -> RenderOperation;

    fn world_transforms(&self) -> Mat4;

    /// Position used for depth sorting.
    fn world_position(&self) -> Vec3;

    fn material(&self) -> Option<&Arc<Material>>;

    fn technique(&self) -> Option<&Technique>;

    fn lights(&self) -> &[Light];

    fn casts_shadows(&self) -> bool;

    /// Per-renderable shader constant, if one was set at `index`.
    fn custom_parameter(&self, index: usize) -> Option<Vec4>;

    fn squared_view_depth(&self, camera: &Camera) -> f32 {
        self.world_position().distance_squared(camera.position)
    }
}

/// Receives renderables during the queue update.
pub trait RenderQueue {
    fn add_renderable(&mut self, renderable: &dyn Renderable, group: u8, priority: u16);
}

/// Snapshot of one submission.
#[derive(Clone, Debug)]
pub struct RenderQueueEntry {
    pub group: u8,
    pub priority: u16,
    pub material_name: Option<String>,
    pub technique_name: Option<String>,
    pub world_transform: Mat4,
    pub world_position: Vec3,
    pub light_count: usize,
    pub casts_shadows: bool,
    pub operation: RenderOperation,
}

/// A render queue that records what it was given.
#[derive(Default)]
pub struct CollectingRenderQueue {
    entries: Vec<RenderQueueEntry>,
}

impl CollectingRenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[RenderQueueEntry] {
        &self.entries
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

impl RenderQueue for CollectingRenderQueue {
    fn add_renderable(&mut self, renderable: &dyn Renderable, group: u8, priority: u16) {
        self.entries.push(RenderQueueEntry {
            group,
            priority,
            material_name: renderable.material().map(|m| m.name.clone()),
            technique_name: renderable.technique().map(|t| t.name.clone()),
            world_transform: renderable.world_transforms(),
            world_position: renderable.world_position(),
            light_count: renderable.lights().len(),
            casts_shadows: renderable.casts_shadows(),
            operation: renderable.render_operation(),
        });
    }
}
