//! Synthetic stereo scene: a static point cloud watched by a moving rig.

use nalgebra::{Point2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::egomotion::{Correspondence, EstimatorError, FrameMotion, TrackId};
use crate::frame::{CameraModel, ImageDims};
use crate::geometry::SE3;

#[derive(Debug, Clone)]
pub struct SceneConfig {
    pub camera: CameraModel,
    pub dims: ImageDims,
    pub num_frames: usize,
    pub num_landmarks: usize,
    /// Camera-to-previous motion applied at every frame.
    pub step: SE3,
    /// Half-width of the uniform noise added to every image coordinate.
    pub pixel_noise: f64,
    /// Half-width of the uniform noise added to the reported translation.
    pub motion_noise: f64,
    /// Fewer visible correspondences than this is an estimation failure.
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            camera: CameraModel::kitti(),
            dims: ImageDims::new(1241, 376),
            num_frames: 5,
            num_landmarks: 200,
            // One unit forward along the optical axis per frame.
            step: SE3::from_translation(Vector3::new(0.0, 0.0, 1.0)),
            pixel_noise: 0.0,
            motion_noise: 0.0,
            min_inliers: 6,
            seed: 7,
        }
    }
}

/// Scene with known ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    config: SceneConfig,
    landmarks: Vec<Vector3<f64>>,
    poses: Vec<SE3>,
}

impl SyntheticScene {
    pub fn new(config: SceneConfig) -> Self {
        let mut poses = Vec::with_capacity(config.num_frames);
        let mut pose = SE3::identity();
        for _ in 0..config.num_frames {
            poses.push(pose);
            pose = pose.compose(&config.step);
        }

        // Landmarks sit beyond the furthest camera, inside the first frustum.
        let travel = poses
            .iter()
            .map(|p| p.translation.norm())
            .fold(0.0, f64::max);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let landmarks = (0..config.num_landmarks)
            .map(|_| {
                let depth = rng.gen_range(8.0..45.0);
                Vector3::new(
                    rng.gen_range(-0.6..0.6) * depth,
                    rng.gen_range(-0.2..0.2) * depth,
                    travel + depth,
                )
            })
            .collect();

        Self {
            config,
            landmarks,
            poses,
        }
    }

    pub fn camera(&self) -> CameraModel {
        self.config.camera
    }

    pub fn dims(&self) -> ImageDims {
        self.config.dims
    }

    pub fn num_frames(&self) -> usize {
        self.poses.len()
    }

    /// Camera-to-world pose of every frame, frame 0 at the origin.
    pub fn ground_truth(&self) -> &[SE3] {
        &self.poses
    }

    /// True previous-to-current transform into `frame`.
    pub fn true_motion(&self, frame: usize) -> Option<SE3> {
        let curr = self.poses.get(frame)?;
        let prev = self.poses.get(frame.checked_sub(1)?)?;
        Some(curr.inverse().compose(prev))
    }

    fn project(&self, frame: usize, landmark: &Vector3<f64>) -> Option<(Point2<f64>, Point2<f64>)> {
        let pc = self.poses[frame].inverse().transform_point(landmark);
        let (l, r) = self.config.camera.project_stereo(&pc)?;
        let (w, h) = (self.config.dims.width as f64, self.config.dims.height as f64);
        let inside = |p: &Point2<f64>| p.x >= 0.0 && p.x < w && p.y >= 0.0 && p.y < h;
        (inside(&l) && inside(&r)).then_some((l, r))
    }

    /// What an estimator would report for the step `frame - 1 -> frame`.
    ///
    /// Noise is drawn from a generator seeded by the frame index, so the same
    /// frame always produces the same observation.
    pub fn observed_motion(&self, frame: usize) -> Result<FrameMotion, EstimatorError> {
        let truth = self
            .true_motion(frame)
            .ok_or_else(|| EstimatorError::degenerate(format!("frame {frame} is outside the scene")))?;
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ (frame as u64).wrapping_mul(0x9e37_79b9));
        let px = self.config.pixel_noise;
        let mut jitter = |p: Point2<f64>| {
            if px > 0.0 {
                Point2::new(p.x + rng.gen_range(-px..px), p.y + rng.gen_range(-px..px))
            } else {
                p
            }
        };

        let mut inliers = Vec::new();
        for (id, x) in self.landmarks.iter().enumerate() {
            let (Some((lp, rp)), Some((lc, rc))) = (self.project(frame - 1, x), self.project(frame, x))
            else {
                continue;
            };
            // Rectified rig: both images share the row coordinate.
            let lp = jitter(lp);
            let lc = jitter(lc);
            inliers.push(Correspondence {
                track_id: TrackId(id as u64),
                left_prev: lp,
                right_prev: Point2::new(jitter(rp).x, lp.y),
                left_curr: lc,
                right_curr: Point2::new(jitter(rc).x, lc.y),
            });
        }

        let n = inliers.len();
        if n < self.config.min_inliers {
            return Err(EstimatorError::insufficient(n, n));
        }

        let mut relative = truth;
        let mn = self.config.motion_noise;
        if mn > 0.0 {
            relative.translation += Vector3::new(
                rng.gen_range(-mn..mn),
                rng.gen_range(-mn..mn),
                rng.gen_range(-mn..mn),
            );
        }

        Ok(FrameMotion {
            frame_index: frame,
            relative,
            inliers,
            num_matches: n,
            num_inliers: n,
        })
    }
}
