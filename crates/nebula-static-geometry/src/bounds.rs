//! Axis-aligned bounding boxes in `f32` world or region space.

use glam::{Quat, Vec3};

/// Axis-Aligned Bounding Box.
///
/// An empty box has `min > max` on every axis and absorbs nothing when merged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create an AABB from two corners, sorting components so min <= max.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest box containing every point.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut acc, p| {
            acc.min = acc.min.min(p);
            acc.max = acc.max.max(p);
            acc
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Grow this box to enclose `other`.
    pub fn merge(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// The eight corners, or an empty array for an empty box.
    pub fn corners(&self) -> Vec<Vec3> {
        if self.is_empty() {
            return Vec::new();
        }
        let (a, b) = (self.min, self.max);
        vec![
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box shifted by `offset`.
    pub fn translated(&self, offset: Vec3) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Box enclosing this box after scale, rotation and translation.
    pub fn transformed(&self, position: Vec3, orientation: Quat, scale: Vec3) -> Aabb {
        Aabb::from_points(
            self.corners()
                .into_iter()
                .map(|c| orientation * (c * scale) + position),
        )
    }

    /// Distance from the origin to the farthest corner.
    pub fn max_corner_distance(&self) -> f32 {
        self.corners()
            .into_iter()
            .map(Vec3::length)
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_new_sorts_corners() {
        let b = Aabb::new(Vec3::new(1.0, -1.0, 5.0), Vec3::new(-1.0, 1.0, 0.0));
        assert_eq!(b.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 1.0, 5.0));
    }

    #[test]
    fn test_merge_into_empty() {
        let mut b = Aabb::EMPTY;
        assert!(b.is_empty());
        b.merge(&Aabb::new(Vec3::ZERO, Vec3::ONE));
        b.merge(&Aabb::EMPTY);
        assert_eq!(b, Aabb::new(Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn test_transformed_box_encloses_rotated_corners() {
        let b = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let t = b.transformed(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_z(FRAC_PI_2), Vec3::ONE);
        assert!((t.min.x - 9.0).abs() < 1e-5);
        assert!((t.max.x - 10.0).abs() < 1e-5);
        assert!((t.max.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_max_corner_distance_uses_farthest_corner() {
        let b = Aabb::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(3.0, 4.0, 0.0));
        assert!((b.max_corner_distance() - 5.0).abs() < 1e-5);
        assert_eq!(Aabb::EMPTY.max_corner_distance(), 0.0);
    }
}
