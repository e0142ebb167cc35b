//! Material lookup seen from the batcher: materials are resolved by name,
//! loaded once, and asked for the technique to use at a given material LOD.

use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

// ---------------------------------------------------------------------------
// Technique
// ---------------------------------------------------------------------------

/// One way of rendering a material.
#[derive(Clone, Debug, PartialEq)]
pub struct Technique {
    pub name: String,
    /// Material LOD index this technique serves.
    pub lod_index: usize,
    /// Whether the current render system can use this technique.
    pub supported: bool,
    /// Whether the first pass uses a vertex program.
    pub has_vertex_program: bool,
}

impl Technique {
    pub fn new(name: impl Into<String>, lod_index: usize) -> Self {
        Self {
            name: name.into(),
            lod_index,
            supported: true,
            has_vertex_program: false,
        }
    }

    pub fn with_vertex_program(mut self) -> Self {
        self.has_vertex_program = true;
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// A named material with distance-based technique selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    /// Squared distances at which each material LOD starts; the first is 0.
    lod_squared_distances: Vec<f32>,
    techniques: Vec<Technique>,
}

impl Material {
    /// A material with a single supported technique at LOD 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lod_squared_distances: vec![0.0],
            techniques: vec![Technique::new("default", 0)],
        }
    }

    /// Replace the techniques.
    pub fn with_techniques(mut self, techniques: Vec<Technique>) -> Self {
        self.techniques = techniques;
        self
    }

    /// Set material LOD distances (unsquared) for levels 1 and up.
    pub fn with_lod_distances(mut self, distances: &[f32]) -> Self {
        self.lod_squared_distances = std::iter::once(0.0)
            .chain(distances.iter().map(|d| d * d))
            .collect();
        self
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    /// Material LOD index for a squared camera distance.
    pub fn lod_index_for_squared_distance(&self, squared_distance: f32) -> usize {
        self.lod_squared_distances
            .iter()
            .position(|&d| d > squared_distance)
            .map(|i| i.saturating_sub(1))
            .unwrap_or(self.lod_squared_distances.len().saturating_sub(1))
    }

    /// Best supported technique for `lod_index`: an exact match, else the
    /// highest supported technique below it, else the first supported one.
    pub fn best_technique(&self, lod_index: usize) -> Option<&Technique> {
        let supported = || self.techniques.iter().filter(|t| t.supported);
        supported()
            .find(|t| t.lod_index == lod_index)
            .or_else(|| {
                supported()
                    .filter(|t| t.lod_index < lod_index)
                    .max_by_key(|t| t.lod_index)
            })
            .or_else(|| supported().next())
    }
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// Read-only material registry consulted at build time.
pub trait MaterialLibrary {
    /// Resolve a material by name.
    fn get_by_name(&self, name: &str) -> Option<Arc<Material>>;

    /// Make sure a resolved material is ready for rendering.
    fn load(&self, _material: &Material) {}
}

/// Name-keyed in-memory material library.
#[derive(Default)]
pub struct InMemoryMaterialLibrary {
    materials: FxHashMap<String, Arc<Material>>,
    loaded: Mutex<FxHashSet<String>>,
}

impl InMemoryMaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material, replacing any previous one with the same name.
    pub fn insert(&mut self, material: Material) -> Arc<Material> {
        let material = Arc::new(material);
        self.materials
            .insert(material.name.clone(), material.clone());
        material
    }

    /// Whether `load` has been called for the named material.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded
            .lock()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

impl MaterialLibrary for InMemoryMaterialLibrary {
    fn get_by_name(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.get(name).cloned()
    }

    fn load(&self, material: &Material) {
        if let Ok(mut set) = self.loaded.lock() {
            set.insert(material.name.clone());
        }
    }
}
