//! Rectified stereo pinhole camera.

use nalgebra::{Point2, Vector3};

/// Intrinsics shared by both cameras of a rectified stereo rig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    /// Focal length in pixels.
    pub f: f64,
    /// Principal point, u coordinate.
    pub cu: f64,
    /// Principal point, v coordinate.
    pub cv: f64,
    /// Distance between the two optical centres (metres).
    pub baseline: f64,
}

impl CameraModel {
    pub fn new(f: f64, cu: f64, cv: f64, baseline: f64) -> Self {
        Self { f, cu, cv, baseline }
    }

    /// KITTI odometry sequences 00-02 (grayscale pair).
    pub fn kitti() -> Self {
        Self {
            f: 718.856,
            cu: 607.1928,
            cv: 185.2157,
            baseline: 0.537_150_588,
        }
    }

    /// Triangulate a left/right observation into the left camera frame.
    ///
    /// Returns `None` for zero, negative or non-finite disparity.
    pub fn triangulate(&self, left: &Point2<f64>, right: &Point2<f64>) -> Option<Vector3<f64>> {
        let disparity = left.x - right.x;
        if !disparity.is_finite() || disparity <= 0.0 {
            return None;
        }
        let z = self.f * self.baseline / disparity;
        let x = (left.x - self.cu) * z / self.f;
        let y = (left.y - self.cv) * z / self.f;
        Some(Vector3::new(x, y, z))
    }

    /// Project a point in the left camera frame into the left image.
    pub fn project_left(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.f * p.x / p.z + self.cu,
            self.f * p.y / p.z + self.cv,
        ))
    }

    /// Project a point in the left camera frame into the right image.
    pub fn project_right(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.f * (p.x - self.baseline) / p.z + self.cu,
            self.f * p.y / p.z + self.cv,
        ))
    }

    /// Project into both images at once.
    pub fn project_stereo(&self, p: &Vector3<f64>) -> Option<(Point2<f64>, Point2<f64>)> {
        Some((self.project_left(p)?, self.project_right(p)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_triangulate_inverts_projection() {
        let cam = CameraModel::kitti();
        let p = Vector3::new(1.5, -0.4, 12.0);
        let (l, r) = cam.project_stereo(&p).unwrap();
        let back = cam.triangulate(&l, &r).unwrap();
        assert_relative_eq!(back, p, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_disparity() {
        let cam = CameraModel::kitti();
        let l = Point2::new(100.0, 50.0);
        assert!(cam.triangulate(&l, &Point2::new(100.0, 50.0)).is_none());
        assert!(cam.triangulate(&l, &Point2::new(120.0, 50.0)).is_none());
        assert!(cam.triangulate(&l, &Point2::new(f64::NAN, 50.0)).is_none());
    }

    #[test]
    fn test_points_behind_camera_do_not_project() {
        let cam = CameraModel::kitti();
        assert!(cam.project_left(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project_right(&Vector3::new(0.0, 0.0, 0.0)).is_none());
    }
}
