//! Strided vertex and index copies used when merging geometry into a bucket.
//!
//! Each vertex is first copied as raw bytes, then any position or direction
//! elements are rewritten with the instance transform applied. Streams that
//! carry no transformed element take a single block copy.

use glam::{Quat, Vec3};

use crate::buffer::{BufferError, IndexType, checked_range};
use crate::error::BatchError;
use crate::vertex::{VertexElement, VertexElementSemantic, VertexElementType};

/// Placement of one instance relative to the region that batches it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceTransform {
    pub orientation: Quat,
    pub scale: Vec3,
    /// Instance position minus region centre.
    pub translation: Vec3,
}

impl InstanceTransform {
    pub fn new(position: Vec3, orientation: Quat, scale: Vec3, region_center: Vec3) -> Self {
        Self {
            orientation,
            scale,
            translation: position - region_center,
        }
    }

    /// `orientation * (p * scale) + (position - region_center)`
    pub fn transform_position(&self, p: Vec3) -> Vec3 {
        self.orientation * (p * self.scale) + self.translation
    }

    /// Rotation only.
    pub fn transform_direction(&self, d: Vec3) -> Vec3 {
        self.orientation * d
    }
}

fn is_transformed(element: &VertexElement) -> bool {
    element.semantic == VertexElementSemantic::Position || element.semantic.is_direction()
}

/// Rewrite the xyz of a float element in place through `f`.
fn transform_float_element(
    src: &[u8],
    dst: &mut [u8],
    element: &VertexElement,
    f: impl Fn(Vec3) -> Vec3,
) -> Result<(), BatchError> {
    match element.element_type {
        VertexElementType::Float3 | VertexElementType::Float4 => {
            let xyz: [f32; 3] = bytemuck::pod_read_unaligned(&src[..12]);
            let out = f(Vec3::from_array(xyz)).to_array();
            dst[..12].copy_from_slice(bytemuck::bytes_of(&out));
            Ok(())
        }
        other => Err(BatchError::UnsupportedElementType {
            semantic: element.semantic,
            element_type: other,
        }),
    }
}

/// Copy `vertex_count` vertices of one stream from `src` to `dst`.
///
/// Both slices start at the first vertex to copy. Vertices are `src_stride`
/// bytes apart in `src` and `dst_stride` apart in `dst`; `elements` describe
/// the stream and must fit both strides.
pub fn copy_vertices(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    vertex_count: usize,
    elements: &[VertexElement],
    transform: &InstanceTransform,
) -> Result<(), BatchError> {
    checked_range(src.len(), 0, src_stride * vertex_count)?;
    checked_range(dst.len(), 0, dst_stride * vertex_count)?;
    let stride = src_stride.min(dst_stride);
    for element in elements {
        checked_range(stride, element.offset, element.size())?;
    }

    let transformed: Vec<&VertexElement> = elements.iter().filter(|e| is_transformed(e)).collect();
    if transformed.is_empty() && src_stride == dst_stride {
        let len = src_stride * vertex_count;
        dst[..len].copy_from_slice(&src[..len]);
        return Ok(());
    }

    for v in 0..vertex_count {
        let src_vertex = &src[v * src_stride..v * src_stride + stride];
        let dst_vertex = &mut dst[v * dst_stride..v * dst_stride + stride];
        dst_vertex.copy_from_slice(src_vertex);

        for element in &transformed {
            let range = element.offset..element.offset + element.size();
            let (s, d) = (&src_vertex[range.clone()], &mut dst_vertex[range]);
            if element.semantic == VertexElementSemantic::Position {
                transform_float_element(s, d, element, |p| transform.transform_position(p))?;
            } else {
                transform_float_element(s, d, element, |n| transform.transform_direction(n))?;
            }
        }
    }
    Ok(())
}

/// Copy `count` indices from `src` (starting at index `src_start`) into `dst`
/// (starting at index `dst_start`), adding `vertex_offset` to every value.
pub fn copy_indices(
    src: &[u8],
    src_type: IndexType,
    src_start: usize,
    count: usize,
    dst: &mut [u8],
    dst_type: IndexType,
    dst_start: usize,
    vertex_offset: u32,
) -> Result<(), BatchError> {
    for i in 0..count {
        let source = src_type.read(src, src_start + i)?;
        let value = source
            .checked_add(vertex_offset)
            .filter(|&v| dst_type == IndexType::U32 || v <= u32::from(u16::MAX))
            .ok_or(BatchError::IndexOutOfRange {
                index: source.saturating_add(vertex_offset),
            })?;
        dst_type.write(dst, dst_start + i, value)?;
    }
    Ok(())
}

/// Copy the first `half_len` bytes of `bytes` over the following `half_len`.
pub(crate) fn duplicate_first_half(bytes: &mut [u8], half_len: usize) -> Result<(), BufferError> {
    checked_range(bytes.len(), half_len, half_len)?;
    bytes.copy_within(0..half_len, half_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::VertexPositionNormalUv;
    use std::f32::consts::FRAC_PI_2;

    fn vertex(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> VertexPositionNormalUv {
        VertexPositionNormalUv {
            position,
            normal,
            uv,
        }
    }

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_position_is_scaled_rotated_and_translated() {
        let src = [vertex([1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.25, 0.75])];
        let mut dst = [VertexPositionNormalUv::default(); 1];
        let transform = InstanceTransform::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_rotation_z(FRAC_PI_2),
            Vec3::splat(2.0),
            Vec3::new(4.0, 0.0, 0.0),
        );

        copy_vertices(
            bytemuck::cast_slice(&src),
            32,
            bytemuck::cast_slice_mut(&mut dst),
            32,
            1,
            VertexPositionNormalUv::declaration().elements(),
            &transform,
        )
        .unwrap();

        // (1,0,0) * 2 rotated 90deg about Z = (0,2,0), plus (10 - 4, 0, 0)
        assert!(approx(dst[0].position, [6.0, 2.0, 0.0]));
        // normal rotated only, not scaled or translated
        assert!(approx(dst[0].normal, [0.0, 1.0, 0.0]));
        assert_eq!(dst[0].uv, [0.25, 0.75]);
    }

    #[test]
    fn test_untransformed_stream_is_block_copied() {
        let uv_elements = [VertexElement::new(
            1,
            0,
            VertexElementType::Float2,
            VertexElementSemantic::TextureCoordinates,
            0,
        )];
        let src: [[f32; 2]; 3] = [[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];
        let mut dst = [[0.0f32; 2]; 3];
        let transform = InstanceTransform::new(
            Vec3::new(100.0, 0.0, 0.0),
            Quat::IDENTITY,
            Vec3::ONE,
            Vec3::ZERO,
        );
        copy_vertices(
            bytemuck::cast_slice(&src),
            8,
            bytemuck::cast_slice_mut(&mut dst),
            8,
            3,
            &uv_elements,
            &transform,
        )
        .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_short_position_is_rejected() {
        let elements = [VertexElement::new(
            0,
            0,
            VertexElementType::Short4,
            VertexElementSemantic::Position,
            0,
        )];
        let src = [0u8; 8];
        let mut dst = [0u8; 8];
        let transform = InstanceTransform::new(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE, Vec3::ZERO);
        let result = copy_vertices(&src, 8, &mut dst, 8, 1, &elements, &transform);
        assert!(matches!(
            result,
            Err(BatchError::UnsupportedElementType { .. })
        ));
    }

    #[test]
    fn test_short_destination_is_an_overrun() {
        let src = [vertex([0.0; 3], [0.0; 3], [0.0; 2]); 2];
        let mut dst = [VertexPositionNormalUv::default(); 1];
        let transform = InstanceTransform::new(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE, Vec3::ZERO);
        let result = copy_vertices(
            bytemuck::cast_slice(&src),
            32,
            bytemuck::cast_slice_mut(&mut dst),
            32,
            2,
            VertexPositionNormalUv::declaration().elements(),
            &transform,
        );
        assert!(matches!(result, Err(BatchError::Buffer(_))));
    }

    #[test]
    fn test_indices_are_offset() {
        let src: [u16; 3] = [0, 1, 2];
        let mut dst = [0u16; 6];
        copy_indices(
            bytemuck::cast_slice(&src),
            IndexType::U16,
            0,
            3,
            bytemuck::cast_slice_mut(&mut dst),
            IndexType::U16,
            3,
            100,
        )
        .unwrap();
        assert_eq!(dst, [0, 0, 0, 100, 101, 102]);
    }

    #[test]
    fn test_index_overflowing_u16_is_rejected() {
        let src: [u16; 1] = [10];
        let mut dst = [0u16; 1];
        let result = copy_indices(
            bytemuck::cast_slice(&src),
            IndexType::U16,
            0,
            1,
            bytemuck::cast_slice_mut(&mut dst),
            IndexType::U16,
            0,
            65_530,
        );
        assert!(matches!(
            result,
            Err(BatchError::IndexOutOfRange { index: 65_540 })
        ));
    }

    #[test]
    fn test_index_overflowing_u32_is_rejected() {
        let src: [u32; 2] = [1, u32::MAX - 2];
        let mut dst = [0u32; 2];
        let result = copy_indices(
            bytemuck::cast_slice(&src),
            IndexType::U32,
            0,
            2,
            bytemuck::cast_slice_mut(&mut dst),
            IndexType::U32,
            0,
            5,
        );
        assert!(matches!(
            result,
            Err(BatchError::IndexOutOfRange { index: u32::MAX })
        ));
        assert_eq!(dst[0], 6);
    }

    #[test]
    fn test_duplicate_first_half() {
        let mut bytes = [1u8, 2, 3, 0, 0, 0];
        duplicate_first_half(&mut bytes, 3).unwrap();
        assert_eq!(bytes, [1, 2, 3, 1, 2, 3]);
    }
}
