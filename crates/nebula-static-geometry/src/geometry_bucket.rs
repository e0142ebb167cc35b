//! The leaf of the batching hierarchy: one merged vertex/index buffer pair.
//!
//! A bucket accepts geometry of a single format signature until its index
//! type runs out of addressable vertices, then copies every queued item into
//! freshly allocated buffers with indices rebased and vertices moved into
//! region space.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::buffer::{BufferUsage, IndexType, LockMode, SharedVertexBuffer, checked_range};
use crate::context::BuildContext;
use crate::copy::{InstanceTransform, copy_indices, copy_vertices, duplicate_first_half};
use crate::error::BatchError;
use crate::material::{Material, Technique};
use crate::queued::QueuedGeometry;
use crate::render::{OperationType, RenderOperation, Renderable};
use crate::scene::Light;
use crate::vertex::{IndexData, VertexData};

/// A bound stream of the merged layout and where it comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StreamLayout {
    /// Stream index in the queued geometry.
    source: u16,
    /// Stream index in the merged vertex data.
    dest_source: u16,
    dest_stride: usize,
}

/// Merged geometry of one format signature within a material bucket.
#[derive(Debug)]
pub struct GeometryBucket {
    format_signature: String,
    vertex_data: VertexData,
    index_data: IndexData,
    index_type: IndexType,
    max_vertex_index: usize,
    streams: Vec<StreamLayout>,
    queued: Vec<QueuedGeometry>,
    region_center: Vec3,
    custom_parameters: BTreeMap<usize, Vec4>,
    built: bool,
}

impl GeometryBucket {
    /// Create an empty bucket shaped like `example_vertices`/`example_indices`.
    ///
    /// Blend weights and indices are dropped from the merged layout; a stream
    /// left with no elements is removed and the remaining streams renumbered.
    pub fn new(
        format_signature: impl Into<String>,
        example_vertices: &VertexData,
        example_indices: &IndexData,
        region_center: Vec3,
    ) -> Result<Self, BatchError> {
        let index_type = example_indices
            .index_type()
            .ok_or(BatchError::MissingIndexBuffer)?;
        let format_signature = format_signature.into();

        let mut vertex_data = example_vertices.clone_structure();
        let declaration = &mut vertex_data.declaration;
        let sources_before = declaration.sources();
        let blend: BTreeSet<_> = declaration
            .elements()
            .iter()
            .map(|e| e.semantic)
            .filter(|s| s.is_blend())
            .collect();
        for &semantic in &blend {
            declaration.remove_element(semantic);
        }
        if !blend.is_empty() {
            log::warn!(
                "Dropping blend elements {:?} from static geometry format {}",
                blend,
                format_signature
            );
        }

        let sources: BTreeSet<u16> = declaration.sources();
        for dropped in sources_before.difference(&sources) {
            log::debug!("Stream {dropped} carried only blend data and is no longer bound");
        }
        let remap: BTreeMap<u16, u16> = sources
            .iter()
            .enumerate()
            .map(|(new_source, &old_source)| (old_source, new_source as u16))
            .collect();
        declaration.remap_sources(&remap);
        let streams = remap
            .iter()
            .map(|(&source, &dest_source)| StreamLayout {
                source,
                dest_source,
                dest_stride: declaration.vertex_size(dest_source),
            })
            .collect();

        Ok(Self {
            format_signature,
            vertex_data,
            index_data: IndexData::default(),
            index_type,
            max_vertex_index: index_type.max_vertex_index(),
            streams,
            queued: Vec::new(),
            region_center,
            custom_parameters: BTreeMap::new(),
            built: false,
        })
    }

    pub fn format_signature(&self) -> &str {
        &self.format_signature
    }

    /// Merged vertex data; buffers are bound once built.
    pub fn vertex_data(&self) -> &VertexData {
        &self.vertex_data
    }

    /// Merged index data; the buffer is set once built.
    pub fn index_data(&self) -> &IndexData {
        &self.index_data
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn max_vertex_index(&self) -> usize {
        self.max_vertex_index
    }

    pub fn queued_geometry(&self) -> &[QueuedGeometry] {
        &self.queued
    }

    /// Committed vertex count.
    pub fn vertex_count(&self) -> usize {
        self.vertex_data.vertex_count
    }

    /// Committed index count.
    pub fn index_count(&self) -> usize {
        self.index_data.index_count
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Queue `geometry` if it fits; otherwise leave the bucket untouched and
    /// return `false`.
    pub fn assign(&mut self, geometry: &QueuedGeometry) -> bool {
        if self.vertex_data.vertex_count + geometry.vertex_count() > self.max_vertex_index {
            return false;
        }
        self.vertex_data.vertex_count += geometry.vertex_count();
        self.index_data.index_count += geometry.index_count();
        self.queued.push(geometry.clone());
        true
    }

    /// Allocate the merged buffers and copy every queued item into them.
    ///
    /// With `stencil_shadows` the position stream is allocated at twice the
    /// vertex count and its first half mirrored into the second.
    pub fn build(
        &mut self,
        ctx: &BuildContext<'_>,
        stencil_shadows: bool,
        log_details: bool,
    ) -> Result<(), BatchError> {
        let vertex_count = self.vertex_data.vertex_count;
        let position_source = self.vertex_data.position_element()?.source;
        if stencil_shadows && vertex_count * 2 > self.max_vertex_index {
            return Err(BatchError::StencilIndexRangeExceeded {
                vertex_count: vertex_count * 2,
                max_vertex_index: self.max_vertex_index,
            });
        }

        let index_buffer = ctx.buffers.create_index_buffer(
            self.index_type,
            self.index_data.index_count,
            BufferUsage::StaticWriteOnly,
        );
        let mut index_lock = index_buffer.lock(LockMode::Discard)?;

        let dest_buffers: Vec<SharedVertexBuffer> = self
            .streams
            .iter()
            .map(|stream| {
                let doubled = stencil_shadows && stream.dest_source == position_source;
                ctx.buffers.create_vertex_buffer(
                    stream.dest_stride,
                    if doubled { vertex_count * 2 } else { vertex_count },
                    BufferUsage::StaticWriteOnly,
                )
            })
            .collect();

        {
            let mut vertex_locks = dest_buffers
                .iter()
                .map(|b| b.lock(LockMode::Discard))
                .collect::<Result<Vec<_>, _>>()?;

            let mut index_offset = 0;
            let mut vertex_offset = 0;
            for geometry in &self.queued {
                let src_indices = &geometry.geometry.index_data;
                let src_index_buffer = src_indices
                    .index_buffer
                    .as_ref()
                    .ok_or(BatchError::MissingIndexBuffer)?;
                {
                    let src = src_index_buffer.lock_read()?;
                    copy_indices(
                        &src,
                        src_index_buffer.index_type(),
                        src_indices.index_start,
                        src_indices.index_count,
                        &mut index_lock,
                        self.index_type,
                        index_offset,
                        vertex_offset as u32,
                    )?;
                }
                index_offset += src_indices.index_count;

                let transform = InstanceTransform::new(
                    geometry.position,
                    geometry.orientation,
                    geometry.scale,
                    self.region_center,
                );
                let src_vertices = &geometry.geometry.vertex_data;
                for (stream, dest) in self.streams.iter().zip(vertex_locks.iter_mut()) {
                    let src_buffer = src_vertices.binding.buffer(stream.source).ok_or(
                        BatchError::UnboundSource {
                            stream: stream.source,
                        },
                    )?;
                    let src_stride = src_buffer.vertex_size();
                    let elements = self
                        .vertex_data
                        .declaration
                        .find_elements_by_source(stream.dest_source);
                    let src = src_buffer.lock_read()?;
                    let src_range = checked_range(
                        src.len(),
                        src_vertices.vertex_start * src_stride,
                        src_vertices.vertex_count * src_stride,
                    )?;
                    let dest_range = checked_range(
                        dest.len(),
                        vertex_offset * stream.dest_stride,
                        src_vertices.vertex_count * stream.dest_stride,
                    )?;
                    copy_vertices(
                        &src[src_range],
                        src_stride,
                        &mut dest[dest_range],
                        stream.dest_stride,
                        src_vertices.vertex_count,
                        &elements,
                        &transform,
                    )?;
                }
                vertex_offset += src_vertices.vertex_count;
            }
        }
        drop(index_lock);

        if stencil_shadows {
            if let Some((stream, buffer)) = self
                .streams
                .iter()
                .zip(&dest_buffers)
                .find(|(s, _)| s.dest_source == position_source)
            {
                let mut lock = buffer.lock(LockMode::Normal)?;
                duplicate_first_half(&mut lock, vertex_count * stream.dest_stride)?;
            }
            if ctx.capabilities.vertex_programs {
                let w: Vec<f32> = (0..vertex_count * 2)
                    .map(|i| if i < vertex_count { 1.0 } else { 0.0 })
                    .collect();
                self.vertex_data.hardware_shadow_volume_w_buffer =
                    Some(ctx.buffers.create_vertex_buffer_with_data(
                        std::mem::size_of::<f32>(),
                        bytemuck::cast_slice(&w),
                        BufferUsage::StaticWriteOnly,
                    )?);
            }
        }

        for (stream, buffer) in self.streams.iter().zip(dest_buffers) {
            self.vertex_data.binding.set_binding(stream.dest_source, buffer);
        }
        self.vertex_data.vertex_start = 0;
        self.index_data.index_start = 0;
        self.index_data.index_buffer = Some(index_buffer);
        self.built = true;

        if log_details {
            log::debug!(
                "Geometry bucket {}: {} items, {} vertices, {} indices",
                self.format_signature,
                self.queued.len(),
                vertex_count,
                self.index_data.index_count
            );
        }
        Ok(())
    }

    /// Release the merged buffers.
    pub fn dispose(&mut self) {
        self.vertex_data.binding.clear();
        self.vertex_data.hardware_shadow_volume_w_buffer = None;
        self.index_data.index_buffer = None;
        self.queued.clear();
        self.built = false;
    }

    pub fn set_custom_parameter(&mut self, index: usize, value: Vec4) {
        self.custom_parameters.insert(index, value);
    }

    pub fn custom_parameter(&self, index: usize) -> Option<Vec4> {
        self.custom_parameters.get(&index).copied()
    }

    pub fn render_operation(&self) -> RenderOperation {
        RenderOperation {
            operation_type: OperationType::TriangleList,
            vertex_data: self.vertex_data.clone(),
            index_data: self.index_data.clone(),
            use_indexes: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Region-level state shared by every bucket submitted in one queue update.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionRenderState {
    pub center: Vec3,
    pub world_transform: Mat4,
    pub lights: Vec<Light>,
    pub casts_shadows: bool,
}

/// A geometry bucket paired with the material state it is drawn with.
pub struct BatchRenderable<'a> {
    pub bucket: &'a GeometryBucket,
    pub material: &'a Arc<Material>,
    pub technique: &'a Technique,
    pub region: &'a RegionRenderState,
}

impl Renderable for BatchRenderable<'_> {
    fn render_operation(&self) -> RenderOperation {
        self.bucket.render_operation()
    }

    fn world_transforms(&self) -> Mat4 {
        self.region.world_transform
    }

    fn world_position(&self) -> Vec3 {
        self.region.center
    }

    fn material(&self) -> Option<&Arc<Material>> {
        Some(self.material)
    }

    fn technique(&self) -> Option<&Technique> {
        Some(self.technique)
    }

    fn lights(&self) -> &[Light] {
        &self.region.lights
    }

    fn casts_shadows(&self) -> bool {
        self.region.casts_shadows
    }

    fn custom_parameter(&self, index: usize) -> Option<Vec4> {
        self.bucket.custom_parameter(index)
    }
}
