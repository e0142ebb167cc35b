//! Scene graph, camera and light contracts the batcher relies on.
//!
//! Regions attach one scene node each at their centre. The batcher only
//! creates, reads and destroys those nodes; it never owns the graph.

use glam::{Mat4, Quat, Vec3, Vec4};
use rustc_hash::FxHashMap;

/// Opaque handle to a scene node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneNodeId(pub u32);

/// Scene graph operations used by regions.
pub trait SceneGraph {
    /// Create a child of the root node at `position`.
    fn create_child_scene_node(&mut self, name: &str, position: Vec3) -> SceneNodeId;

    fn attach_object(&mut self, node: SceneNodeId, object_name: &str);

    /// Detach `node` from its parent without destroying it.
    fn remove_from_parent(&mut self, node: SceneNodeId);

    fn destroy_scene_node(&mut self, node: SceneNodeId);

    fn derived_position(&self, node: SceneNodeId) -> Vec3;

    fn derived_orientation(&self, node: SceneNodeId) -> Quat;

    /// Lights that can affect a sphere of `radius` around `node`.
    fn find_lights(&self, node: SceneNodeId, radius: f32) -> Vec<Light>;

    /// Full world transform of `node`.
    fn full_transform(&self, node: SceneNodeId) -> Mat4 {
        Mat4::from_rotation_translation(self.derived_orientation(node), self.derived_position(node))
    }
}

// ---------------------------------------------------------------------------
// Lights and cameras
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    Directional { direction: Vec3 },
    Point { position: Vec3, range: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
}

impl Light {
    pub fn directional(name: impl Into<String>, direction: Vec3) -> Self {
        Self {
            name: name.into(),
            kind: LightKind::Directional {
                direction: direction.normalize_or_zero(),
            },
        }
    }

    pub fn point(name: impl Into<String>, position: Vec3, range: f32) -> Self {
        Self {
            name: name.into(),
            kind: LightKind::Point { position, range },
        }
    }

    /// Homogeneous light vector: `(position, 1)` for point lights and
    /// `(-direction, 0)` for directional lights.
    pub fn as_vec4(&self) -> Vec4 {
        match self.kind {
            LightKind::Directional { direction } => (-direction).extend(0.0),
            LightKind::Point { position, .. } => position.extend(1.0),
        }
    }

    /// Whether this light reaches a sphere at `center` with `radius`.
    pub fn affects(&self, center: Vec3, radius: f32) -> bool {
        match self.kind {
            LightKind::Directional { .. } => true,
            LightKind::Point { position, range } => position.distance(center) <= range + radius,
        }
    }
}

/// The viewpoint used for LOD and distance culling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Values above 1 keep higher detail further away.
    pub lod_bias: f32,
    /// Objects whose visibility flags share no bit with this mask are skipped.
    pub visibility_mask: u32,
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            lod_bias: 1.0,
            visibility_mask: u32::MAX,
        }
    }

    pub fn with_lod_bias(mut self, lod_bias: f32) -> Self {
        self.lod_bias = lod_bias;
        self
    }

    pub fn with_visibility_mask(mut self, mask: u32) -> Self {
        self.visibility_mask = mask;
        self
    }
}

// ---------------------------------------------------------------------------
// SceneTree
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct NodeRecord {
    name: String,
    position: Vec3,
    orientation: Quat,
    attached_objects: Vec<String>,
    in_graph: bool,
}

/// Flat scene graph whose nodes are all children of an implicit root.
#[derive(Default)]
pub struct SceneTree {
    nodes: FxHashMap<SceneNodeId, NodeRecord>,
    lights: Vec<Light>,
    next_id: u32,
}

impl SceneTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    /// Number of nodes that exist (attached or not).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_name(&self, node: SceneNodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.name.as_str())
    }

    pub fn attached_objects(&self, node: SceneNodeId) -> &[String] {
        self.nodes
            .get(&node)
            .map(|n| n.attached_objects.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_in_graph(&self, node: SceneNodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.in_graph)
    }

    /// Move a node; regions pick the change up through `derived_position`.
    pub fn set_transform(&mut self, node: SceneNodeId, position: Vec3, orientation: Quat) {
        if let Some(record) = self.nodes.get_mut(&node) {
            record.position = position;
            record.orientation = orientation;
        }
    }
}

impl SceneGraph for SceneTree {
    fn create_child_scene_node(&mut self, name: &str, position: Vec3) -> SceneNodeId {
        let id = SceneNodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeRecord {
                name: name.to_string(),
                position,
                orientation: Quat::IDENTITY,
                attached_objects: Vec::new(),
                in_graph: true,
            },
        );
        id
    }

    fn attach_object(&mut self, node: SceneNodeId, object_name: &str) {
        if let Some(record) = self.nodes.get_mut(&node) {
            record.attached_objects.push(object_name.to_string());
        }
    }

    fn remove_from_parent(&mut self, node: SceneNodeId) {
        if let Some(record) = self.nodes.get_mut(&node) {
            record.in_graph = false;
        }
    }

    fn destroy_scene_node(&mut self, node: SceneNodeId) {
        self.nodes.remove(&node);
    }

    fn derived_position(&self, node: SceneNodeId) -> Vec3 {
        self.nodes.get(&node).map_or(Vec3::ZERO, |n| n.position)
    }

    fn derived_orientation(&self, node: SceneNodeId) -> Quat {
        self.nodes.get(&node).map_or(Quat::IDENTITY, |n| n.orientation)
    }

    fn find_lights(&self, node: SceneNodeId, radius: f32) -> Vec<Light> {
        let center = self.derived_position(node);
        self.lights
            .iter()
            .filter(|l| l.affects(center, radius))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_as_vec4() {
        let sun = Light::directional("sun", Vec3::new(0.0, -2.0, 0.0));
        assert_eq!(sun.as_vec4(), Vec4::new(0.0, 1.0, 0.0, 0.0));
        let lamp = Light::point("lamp", Vec3::new(1.0, 2.0, 3.0), 10.0);
        assert_eq!(lamp.as_vec4(), Vec4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn test_find_lights_respects_range() {
        let mut scene = SceneTree::new();
        scene.add_light(Light::directional("sun", Vec3::NEG_Y));
        scene.add_light(Light::point("near", Vec3::new(5.0, 0.0, 0.0), 2.0));
        scene.add_light(Light::point("far", Vec3::new(100.0, 0.0, 0.0), 2.0));
        let node = scene.create_child_scene_node("region", Vec3::ZERO);

        let names: Vec<String> = scene
            .find_lights(node, 4.0)
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["sun".to_string(), "near".to_string()]);
    }

    #[test]
    fn test_node_lifecycle() {
        let mut scene = SceneTree::new();
        let node = scene.create_child_scene_node("r", Vec3::new(1.0, 0.0, 0.0));
        scene.attach_object(node, "r");
        assert_eq!(scene.attached_objects(node), &["r".to_string()]);
        assert_eq!(
            scene.full_transform(node),
            Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))
        );
        scene.remove_from_parent(node);
        assert!(!scene.is_in_graph(node));
        scene.destroy_scene_node(node);
        assert_eq!(scene.node_count(), 0);
    }
}
