//! Upload of built geometry buckets to wgpu buffers.

use wgpu::util::DeviceExt;

use crate::buffer::IndexType;
use crate::error::BatchError;
use crate::geometry_bucket::GeometryBucket;
use crate::vertex::{VertexDeclaration, VertexElementType};

impl IndexType {
    /// Matching wgpu index format.
    pub fn wgpu_format(self) -> wgpu::IndexFormat {
        match self {
            IndexType::U16 => wgpu::IndexFormat::Uint16,
            IndexType::U32 => wgpu::IndexFormat::Uint32,
        }
    }
}

/// wgpu vertex format for an element type, if there is one.
pub fn vertex_format(element_type: VertexElementType) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat;

    match element_type {
        VertexElementType::Float1 => Some(VertexFormat::Float32),
        VertexElementType::Float2 => Some(VertexFormat::Float32x2),
        VertexElementType::Float3 => Some(VertexFormat::Float32x3),
        VertexElementType::Float4 => Some(VertexFormat::Float32x4),
        VertexElementType::Colour
        | VertexElementType::ColourArgb
        | VertexElementType::ColourAbgr => Some(VertexFormat::Unorm8x4),
        VertexElementType::UByte4 => Some(VertexFormat::Uint8x4),
        VertexElementType::Short2 => Some(VertexFormat::Sint16x2),
        VertexElementType::Short4 => Some(VertexFormat::Sint16x4),
        VertexElementType::Short1 | VertexElementType::Short3 => None,
    }
}

/// Vertex attributes of one stream. Shader locations follow declaration order
/// across all streams; elements without a wgpu format are skipped.
pub fn vertex_attributes(declaration: &VertexDeclaration, source: u16) -> Vec<wgpu::VertexAttribute> {
    declaration
        .elements()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.source == source)
        .filter_map(|(location, e)| {
            Some(wgpu::VertexAttribute {
                format: vertex_format(e.element_type)?,
                offset: e.offset as wgpu::BufferAddress,
                shader_location: location as u32,
            })
        })
        .collect()
}

/// One vertex stream on the GPU.
pub struct GpuVertexStream {
    pub slot: u32,
    pub buffer: wgpu::Buffer,
    pub stride: wgpu::BufferAddress,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl GpuVertexStream {
    pub fn layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

/// A geometry bucket resident in GPU memory.
pub struct GpuGeometryBatch {
    pub vertex_streams: Vec<GpuVertexStream>,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub index_format: wgpu::IndexFormat,
}

impl GpuGeometryBatch {
    /// Bind vertex and index buffers to a render pass.
    pub fn bind<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>) {
        for stream in &self.vertex_streams {
            render_pass.set_vertex_buffer(stream.slot, stream.buffer.slice(..));
        }
        render_pass.set_index_buffer(self.index_buffer.slice(..), self.index_format);
    }

    /// Draw the whole batch.
    pub fn draw(&self, render_pass: &mut wgpu::RenderPass) {
        render_pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

/// Creates GPU copies of built geometry buckets.
pub struct GpuBatchAllocator<'a> {
    device: &'a wgpu::Device,
}

impl<'a> GpuBatchAllocator<'a> {
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self { device }
    }

    /// Upload every bound stream and the index buffer of a built bucket.
    pub fn upload(&self, label: &str, bucket: &GeometryBucket) -> Result<GpuGeometryBatch, BatchError> {
        let vertex_data = bucket.vertex_data();
        let mut vertex_streams = Vec::with_capacity(vertex_data.binding.buffer_count());
        for (source, buffer) in vertex_data.binding.iter() {
            let lock = buffer.lock_read()?;
            vertex_streams.push(GpuVertexStream {
                slot: u32::from(source),
                buffer: self.create_buffer(
                    &format!("{label}-stream{source}"),
                    &lock,
                    wgpu::BufferUsages::VERTEX,
                ),
                stride: buffer.vertex_size() as wgpu::BufferAddress,
                attributes: vertex_attributes(&vertex_data.declaration, source),
            });
        }

        let index_data = bucket.index_data();
        let index_buffer = index_data
            .index_buffer
            .as_ref()
            .ok_or(BatchError::MissingIndexBuffer)?;
        let lock = index_buffer.lock_read()?;
        Ok(GpuGeometryBatch {
            vertex_streams,
            index_buffer: self.create_buffer(
                &format!("{label}-indices"),
                &lock,
                wgpu::BufferUsages::INDEX,
            ),
            index_count: index_data.index_count as u32,
            index_format: bucket.index_type().wgpu_format(),
        })
    }

    fn create_buffer(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: usage | wgpu::BufferUsages::COPY_DST,
        })
    }
}
