//! Stencil shadow volumes for batched regions.
//!
//! A region built with stencil shadows keeps an [`EdgeData`] over all of its
//! merged geometry. Each frame the light is moved into region space, triangle
//! light facing is refreshed and silhouette quads are written for every edge
//! group into a shared 16-bit index buffer.

mod edge_list;
mod renderable;

pub use edge_list::{Edge, EdgeData, EdgeGroup, EdgeListBuilder, Triangle};
pub use renderable::{ShadowRenderable, ShadowRenderableFlags, generate_shadow_volume};
