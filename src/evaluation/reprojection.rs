//! Stereo reprojection error of a relative motion estimate.
//!
//! Each correspondence is triangulated in the previous pair, moved into the
//! current camera with the candidate motion and projected into both current
//! images. The per-correspondence error is the mean of the left and right
//! pixel distances.

use nalgebra::Point2;

use crate::egomotion::Correspondence;
use crate::frame::CameraModel;
use crate::geometry::SE3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectionStats {
    /// Mean error in pixels over valid correspondences; `None` if none were valid.
    pub mean_abs_error: Option<f64>,
    pub num_valid: usize,
    /// Correspondences rejected for non-positive disparity or depth.
    pub num_rejected: usize,
}

/// Evaluate `relative` (previous-to-current) against `correspondences`.
pub fn reprojection_error(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    relative: &SE3,
) -> ReprojectionStats {
    let mut sum = 0.0;
    let mut num_valid = 0;

    for c in correspondences {
        let Some(err) = correspondence_error(c, camera, relative) else {
            continue;
        };
        sum += err;
        num_valid += 1;
    }

    ReprojectionStats {
        mean_abs_error: (num_valid > 0).then(|| sum / num_valid as f64),
        num_valid,
        num_rejected: correspondences.len() - num_valid,
    }
}

fn correspondence_error(c: &Correspondence, camera: &CameraModel, relative: &SE3) -> Option<f64> {
    let p_prev = camera.triangulate(&c.left_prev, &c.right_prev)?;
    let p_curr = relative.transform_point(&p_prev);
    let (left, right) = camera.project_stereo(&p_curr)?;

    let err = 0.5 * (pixel_distance(&left, &c.left_curr) + pixel_distance(&right, &c.right_curr));
    err.is_finite().then_some(err)
}

fn pixel_distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a - b).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egomotion::TrackId;
    use nalgebra::{UnitQuaternion, Vector3};

    fn camera() -> CameraModel {
        CameraModel::new(500.0, 320.0, 240.0, 0.5)
    }

    fn motion() -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.01, -0.02, 0.005),
            translation: Vector3::new(0.05, 0.0, -1.0),
        }
    }

    fn synthesize(points: &[Vector3<f64>], cam: &CameraModel, relative: &SE3) -> Vec<Correspondence> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (lp, rp) = cam.project_stereo(p).unwrap();
                let (lc, rc) = cam.project_stereo(&relative.transform_point(p)).unwrap();
                Correspondence {
                    track_id: TrackId(i as u64),
                    left_prev: lp,
                    right_prev: rp,
                    left_curr: lc,
                    right_curr: rc,
                }
            })
            .collect()
    }

    fn scene() -> Vec<Vector3<f64>> {
        let mut pts = Vec::new();
        for i in -3..=3 {
            for j in -2..=2 {
                pts.push(Vector3::new(i as f64, j as f64 * 0.5, 8.0 + (i + j) as f64 * 0.3));
            }
        }
        pts
    }

    #[test]
    fn test_exact_motion_gives_zero_error() {
        let cam = camera();
        let corr = synthesize(&scene(), &cam, &motion());
        let stats = reprojection_error(&corr, &cam, &motion());
        assert_eq!(stats.num_valid, corr.len());
        assert!(stats.mean_abs_error.unwrap() < 1e-9);
    }

    #[test]
    fn test_wrong_motion_gives_positive_error() {
        let cam = camera();
        let corr = synthesize(&scene(), &cam, &motion());
        let stats = reprojection_error(&corr, &cam, &SE3::identity());
        assert!(stats.mean_abs_error.unwrap() > 1.0);
    }

    #[test]
    fn test_zero_disparity_is_excluded() {
        let cam = camera();
        let mut corr = synthesize(&scene(), &cam, &motion());
        let n = corr.len();
        corr[0].right_prev = corr[0].left_prev;
        corr[1].right_prev.x = corr[1].left_prev.x + 3.0;

        let stats = reprojection_error(&corr, &cam, &motion());
        assert_eq!(stats.num_valid, n - 2);
        assert_eq!(stats.num_rejected, 2);
        let err = stats.mean_abs_error.unwrap();
        assert!(err.is_finite());
        assert!(err < 1e-9);
    }

    #[test]
    fn test_all_invalid_yields_none() {
        let cam = camera();
        let mut corr = synthesize(&scene()[..3], &cam, &motion());
        for c in &mut corr {
            c.right_prev = c.left_prev;
        }
        let stats = reprojection_error(&corr, &cam, &motion());
        assert_eq!(stats.mean_abs_error, None);
        assert_eq!(stats.num_valid, 0);
    }
}
