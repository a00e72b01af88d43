//! Points, atom clouds and the diameter estimator.

use serde::{Deserialize, Serialize};

/// A position in Angstrom.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point3D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn translate(&self, by: &Point3D) -> Point3D {
        Point3D::new(self.x + by.x, self.y + by.y, self.z + by.z)
    }
}

impl From<(f64, f64, f64)> for Point3D {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Point3D {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Atom coordinates of one selection, in file order.
pub type AtomCloud = Vec<Point3D>;

/// Maximum Euclidean distance over all unordered pairs of distinct points.
///
/// Fewer than two points have no pair and yield exactly `0.0`. The result is
/// not rounded.
pub fn max_pairwise_distance(cloud: &[Point3D]) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in cloud.iter().enumerate() {
        for b in &cloud[i + 1..] {
            max = max.max(a.distance(b));
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_345() {
        let a = Point3D::new(0.0, 0.0, 0.0);
        let b = Point3D::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
        assert!((b.distance(&a) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_point_cloud() {
        let cloud = vec![Point3D::new(0.0, 0.0, 0.0), Point3D::new(3.0, 4.0, 0.0)];
        assert_eq!(max_pairwise_distance(&cloud), 5.0);
    }

    #[test]
    fn test_empty_and_single_point() {
        assert_eq!(max_pairwise_distance(&[]), 0.0);
        assert_eq!(max_pairwise_distance(&[Point3D::new(7.5, -2.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_duplicate_points_only() {
        let p = Point3D::new(1.0, 1.0, 1.0);
        assert_eq!(max_pairwise_distance(&[p, p, p]), 0.0);
    }

    #[test]
    fn test_order_does_not_matter() {
        let cloud = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.5, -2.0, 0.3),
            Point3D::new(-4.0, 2.2, 1.0),
            Point3D::new(0.7, 0.7, -3.1),
        ];
        let mut reversed = cloud.clone();
        reversed.reverse();
        let mut rotated = cloud.clone();
        rotated.rotate_left(2);

        let d = max_pairwise_distance(&cloud);
        assert_eq!(d, max_pairwise_distance(&reversed));
        assert_eq!(d, max_pairwise_distance(&rotated));
    }

    #[test]
    fn test_translation_invariant() {
        let cloud = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(0.0, 6.0, 8.0),
        ];
        let shift = Point3D::new(125.25, -40.5, 3.0);
        let moved: AtomCloud = cloud.iter().map(|p| p.translate(&shift)).collect();

        let d = max_pairwise_distance(&cloud);
        // |(1,0,0) - (0,6,8)| = sqrt(101)
        assert!((d - 101f64.sqrt()).abs() < 1e-9);
        assert!((max_pairwise_distance(&moved) - d).abs() < 1e-9);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Point3D::from((1.0, 2.0, 3.0)), Point3D::new(1.0, 2.0, 3.0));
        assert_eq!(Point3D::from([1.0, 2.0, 3.0]), Point3D::new(1.0, 2.0, 3.0));
        assert!(!Point3D::new(f64::NAN, 0.0, 0.0).is_finite());
    }
}
