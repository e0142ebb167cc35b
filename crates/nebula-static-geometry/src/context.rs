//! Collaborators handed to every build step.

use crate::buffer::HardwareBufferManager;
use crate::material::MaterialLibrary;

/// Render system features that change how buckets are built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSystemCapabilities {
    /// Vertex programs are available, so shadow volumes are extruded on the GPU.
    pub vertex_programs: bool,
}

/// Material registry, buffer manager and capabilities used during a build.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub materials: &'a dyn MaterialLibrary,
    pub buffers: &'a dyn HardwareBufferManager,
    pub capabilities: RenderSystemCapabilities,
}

impl<'a> BuildContext<'a> {
    pub fn new(materials: &'a dyn MaterialLibrary, buffers: &'a dyn HardwareBufferManager) -> Self {
        Self {
            materials,
            buffers,
            capabilities: RenderSystemCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: RenderSystemCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}
