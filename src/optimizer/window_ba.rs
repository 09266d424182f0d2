//! Windowed stereo bundle adjustment using Levenberg-Marquardt.
//!
//! The oldest frame of the window is the anchor and stays fixed. Every other
//! frame contributes its world-to-camera pose `T_j_anchor` as six parameters
//! (axis-angle + translation), every usable track a landmark `X` expressed in
//! the anchor frame. Each stereo observation yields four residuals:
//!
//! ```text
//! r = [ π_L(T_j X) - u_L ,  π_R(T_j X) - u_R ]      (u, v for both images)
//! ```
//!
//! scaled by the square root of a Huber weight. The scale of the problem is
//! fixed by the stereo baseline, so no extra gauge constraint is needed.

use std::collections::BTreeMap;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Owned, Point2, Vector3, Vector4};
use tracing::debug;

use super::refiner::WindowSolver;
use super::window::{StereoObservation, WindowSnapshot};
use crate::error::{Result, VoError};
use crate::frame::CameraModel;
use crate::geometry::SE3;

const POSE_DIM: usize = 6;
const POINT_DIM: usize = 3;
const RESIDUALS_PER_OBS: usize = 4;
/// Depth floor used when a landmark drifts behind a camera mid-iteration.
const MIN_DEPTH: f64 = 1e-3;
const DIFF_STEP: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct WindowBAConfig {
    /// LM patience: evaluations are capped at `max_iterations * (params + 1)`.
    pub max_iterations: usize,
    /// Huber kernel threshold on the 4-vector stereo residual (pixels).
    pub huber_threshold_px: f64,
    /// Tracks seen in fewer frames are left out.
    pub min_observations: usize,
    /// Upper bound on landmarks per solve. The longest tracks are kept.
    pub max_landmarks: usize,
}

impl Default for WindowBAConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            huber_threshold_px: 9.488_f64.sqrt(), // 95% chi2 with 4 DOF
            min_observations: 2,
            max_landmarks: 150,
        }
    }
}

/// Default [`WindowSolver`].
#[derive(Debug, Clone, Default)]
pub struct WindowBundleAdjuster {
    pub config: WindowBAConfig,
}

impl WindowBundleAdjuster {
    pub fn new(config: WindowBAConfig) -> Self {
        Self { config }
    }
}

/// A single observation with parameter indices resolved.
#[derive(Debug, Clone, Copy)]
struct Observation {
    /// `None` for the anchor frame.
    pose_idx: Option<usize>,
    point_idx: usize,
    measured: StereoObservation,
}

struct WindowProblem<'a> {
    camera: &'a CameraModel,
    observations: Vec<Observation>,
    num_poses: usize,
    huber_threshold: f64,
    params: DVector<f64>,
}

impl<'a> WindowProblem<'a> {
    fn pose(&self, params: &DVector<f64>, pose_idx: Option<usize>) -> SE3 {
        match pose_idx {
            Some(i) => SE3::from_params(&params.as_slice()[i * POSE_DIM..(i + 1) * POSE_DIM]),
            None => SE3::identity(),
        }
    }

    fn point(&self, params: &DVector<f64>, point_idx: usize) -> Vector3<f64> {
        let base = self.num_poses * POSE_DIM + point_idx * POINT_DIM;
        Vector3::new(params[base], params[base + 1], params[base + 2])
    }

    /// Unweighted stereo residual of one observation.
    fn raw_error(&self, pose: &SE3, point: &Vector3<f64>, measured: &StereoObservation) -> Vector4<f64> {
        let mut pc = pose.transform_point(point);
        pc.z = pc.z.max(MIN_DEPTH);
        let cam = self.camera;
        let left = Point2::new(cam.f * pc.x / pc.z + cam.cu, cam.f * pc.y / pc.z + cam.cv);
        let right_u = cam.f * (pc.x - cam.baseline) / pc.z + cam.cu;
        Vector4::new(
            left.x - measured.left.x,
            left.y - measured.left.y,
            right_u - measured.right.x,
            left.y - measured.right.y,
        )
    }

    fn huber_scale(&self, error_norm: f64) -> f64 {
        if error_norm <= self.huber_threshold {
            1.0
        } else {
            (self.huber_threshold / error_norm).sqrt()
        }
    }

    fn observation_error(&self, params: &DVector<f64>, obs: &Observation) -> Vector4<f64> {
        let pose = self.pose(params, obs.pose_idx);
        let point = self.point(params, obs.point_idx);
        self.raw_error(&pose, &point, &obs.measured)
    }

    fn compute_residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let mut residuals = DVector::zeros(self.observations.len() * RESIDUALS_PER_OBS);
        for (k, obs) in self.observations.iter().enumerate() {
            let e = self.observation_error(params, obs);
            let w = self.huber_scale(e.norm());
            residuals
                .rows_mut(k * RESIDUALS_PER_OBS, RESIDUALS_PER_OBS)
                .copy_from(&(e * w));
        }
        residuals
    }

    /// Central differences, one 4-row block per observation. The Huber scale
    /// is frozen at the linearisation point.
    fn compute_jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let num_params = params.len();
        let mut jac = DMatrix::zeros(self.observations.len() * RESIDUALS_PER_OBS, num_params);
        let mut perturbed = params.clone();

        for (k, obs) in self.observations.iter().enumerate() {
            let w = self.huber_scale(self.observation_error(params, obs).norm());
            let row = k * RESIDUALS_PER_OBS;

            let pose_cols = obs.pose_idx.map(|i| (i * POSE_DIM, POSE_DIM));
            let point_cols = Some((self.num_poses * POSE_DIM + obs.point_idx * POINT_DIM, POINT_DIM));

            for (start, len) in [pose_cols, point_cols].into_iter().flatten() {
                for col in start..start + len {
                    let original = perturbed[col];
                    perturbed[col] = original + DIFF_STEP;
                    let plus = self.observation_error(&perturbed, obs);
                    perturbed[col] = original - DIFF_STEP;
                    let minus = self.observation_error(&perturbed, obs);
                    perturbed[col] = original;

                    let d = (plus - minus) * (w / (2.0 * DIFF_STEP));
                    jac.view_mut((row, col), (RESIDUALS_PER_OBS, 1)).copy_from(&d);
                }
            }
        }
        jac
    }

    fn cost(&self, params: &DVector<f64>) -> f64 {
        0.5 * self.compute_residuals(params).norm_squared()
    }
}

impl<'a> LeastSquaresProblem<f64, Dyn, Dyn> for WindowProblem<'a> {
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.compute_residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.compute_jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

impl WindowSolver for WindowBundleAdjuster {
    fn solve(&self, window: &WindowSnapshot, camera: &CameraModel) -> Result<Vec<SE3>> {
        let num_frames = window.frames.len();
        if num_frames < 2 {
            return Err(VoError::RefinementFailure {
                reason: format!("window holds {num_frames} frame(s)"),
            });
        }

        // Direct estimates give the starting point.
        let initial_poses = window.chained_poses();
        let num_poses = num_frames - 1;

        let min_observations = self.config.min_observations.max(2);
        let mut skipped = 0usize;
        let mut candidates: Vec<BTreeMap<usize, &StereoObservation>> = window
            .tracks
            .iter()
            .map(|track| {
                track
                    .observations
                    .iter()
                    .filter_map(|(frame, obs)| window.slot_of(*frame).map(|slot| (slot, obs)))
                    .collect::<BTreeMap<_, _>>()
            })
            .filter(|in_window| {
                let usable = in_window.len() >= min_observations;
                skipped += usize::from(!usable);
                usable
            })
            .collect();
        // Stable, so equal-length tracks keep their id order.
        candidates.sort_by_key(|in_window| std::cmp::Reverse(in_window.len()));

        let mut landmarks: Vec<Vector3<f64>> = Vec::new();
        let mut observations = Vec::new();
        let mut capped = 0usize;

        for in_window in candidates {
            if landmarks.len() >= self.config.max_landmarks {
                capped += 1;
                continue;
            }
            let Some(point) = in_window.iter().find_map(|(slot, obs)| {
                camera
                    .triangulate(&obs.left, &obs.right)
                    .map(|p| initial_poses[*slot].transform_point(&p))
            }) else {
                skipped += 1;
                continue;
            };

            let point_idx = landmarks.len();
            landmarks.push(point);
            for (slot, obs) in in_window {
                observations.push(Observation {
                    pose_idx: (slot > 0).then(|| slot - 1),
                    point_idx,
                    measured: *obs,
                });
            }
        }

        if landmarks.is_empty() {
            return Err(VoError::RefinementFailure {
                reason: format!("no usable tracks ({skipped} skipped)"),
            });
        }

        let mut params = DVector::zeros(num_poses * POSE_DIM + landmarks.len() * POINT_DIM);
        for (i, pose) in initial_poses.iter().skip(1).enumerate() {
            params.as_mut_slice()[i * POSE_DIM..(i + 1) * POSE_DIM]
                .copy_from_slice(&pose.inverse().to_params());
        }
        for (i, x) in landmarks.iter().enumerate() {
            let base = num_poses * POSE_DIM + i * POINT_DIM;
            params.rows_mut(base, POINT_DIM).copy_from(x);
        }

        let problem = WindowProblem {
            camera,
            observations,
            num_poses,
            huber_threshold: self.config.huber_threshold_px,
            params,
        };
        let initial_cost = problem.cost(&problem.params);

        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(self.config.max_iterations)
            .minimize(problem);

        let final_cost = problem.cost(&problem.params);
        debug!(
            frames = num_frames,
            landmarks = landmarks.len(),
            observations = problem.observations.len(),
            skipped_tracks = skipped,
            capped_tracks = capped,
            evaluations = report.number_of_evaluations,
            "window BA: cost {:.4} -> {:.4} ({:?})",
            initial_cost,
            final_cost,
            report.termination
        );

        let usable = report.termination.was_successful()
            || matches!(
                report.termination,
                TerminationReason::LostPatience | TerminationReason::NoImprovementPossible(_)
            );
        if !usable {
            return Err(VoError::RefinementFailure {
                reason: format!("minimiser stopped with {:?}", report.termination),
            });
        }
        if !final_cost.is_finite() {
            return Err(VoError::RefinementFailure {
                reason: "final cost is not finite".to_string(),
            });
        }

        // Back to camera-to-anchor, then to camera-to-previous.
        let mut camera_to_anchor = Vec::with_capacity(num_frames);
        camera_to_anchor.push(SE3::identity());
        for i in 0..num_poses {
            camera_to_anchor.push(problem.pose(&problem.params, Some(i)).inverse());
        }

        let mut relative = Vec::with_capacity(num_frames);
        relative.push(window.frames[0].motion);
        for pair in camera_to_anchor.windows(2) {
            relative.push(pair[0].inverse().compose(&pair[1]));
        }
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egomotion::TrackId;
    use crate::optimizer::window::{SnapshotFrame, Track};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn step() -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.02, 0.0),
            translation: Vector3::new(0.05, 0.0, 0.8),
        }
    }

    /// Window of `n` frames moving by `step()` (camera-to-previous) through a
    /// cloud of points, observed with `pixel_noise`.
    fn synthetic_window(n: usize, pixel_noise: f64, seed: u64) -> (WindowSnapshot, Vec<SE3>) {
        let cam = CameraModel::kitti();
        let mut rng = StdRng::seed_from_u64(seed);
        let points: Vec<Vector3<f64>> = (0..60)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-6.0..6.0),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(8.0..30.0),
                )
            })
            .collect();

        let mut poses = vec![SE3::identity()];
        for _ in 1..n {
            let last = *poses.last().unwrap();
            poses.push(last.compose(&step()));
        }

        let mut tracks = Vec::new();
        for (id, p) in points.iter().enumerate() {
            let mut observations = BTreeMap::new();
            for (frame, pose) in poses.iter().enumerate() {
                let pc = pose.inverse().transform_point(p);
                if let Some((l, r)) = cam.project_stereo(&pc) {
                    let dv = rng.gen_range(-pixel_noise..=pixel_noise);
                    let noisy = StereoObservation {
                        left: Point2::new(l.x + rng.gen_range(-pixel_noise..=pixel_noise), l.y + dv),
                        right: Point2::new(r.x + rng.gen_range(-pixel_noise..=pixel_noise), r.y + dv),
                    };
                    observations.insert(frame, noisy);
                }
            }
            tracks.push(Track {
                id: TrackId(id as u64),
                observations,
            });
        }

        let frames = (0..n)
            .map(|i| SnapshotFrame {
                frame_index: i,
                motion: if i == 0 { SE3::identity() } else { step() },
            })
            .collect();
        (WindowSnapshot { frames, tracks }, poses)
    }

    fn reprojection_cost(window: &WindowSnapshot, relative: &[SE3]) -> f64 {
        // Landmarks triangulated in the anchor, re-projected with the chained poses.
        let cam = CameraModel::kitti();
        let mut poses = vec![SE3::identity()];
        for r in relative.iter().skip(1) {
            let last = *poses.last().unwrap();
            poses.push(last.compose(r));
        }
        let mut total = 0.0;
        for track in &window.tracks {
            let Some(anchor_obs) = track.observations.get(&0) else { continue };
            let Some(x) = cam.triangulate(&anchor_obs.left, &anchor_obs.right) else { continue };
            for (frame, obs) in &track.observations {
                let pc = poses[*frame].inverse().transform_point(&x);
                if let Some((l, _)) = cam.project_stereo(&pc) {
                    total += (l - obs.left).norm();
                }
            }
        }
        total
    }

    #[test]
    fn test_exact_window_stays_put() {
        let (window, _) = synthetic_window(4, 0.0, 1);
        let ba = WindowBundleAdjuster::default();
        let relative = ba.solve(&window, &CameraModel::kitti()).unwrap();
        assert_eq!(relative.len(), 4);
        assert_eq!(relative[0], SE3::identity());
        for r in &relative[1..] {
            assert_relative_eq!(r.to_matrix(), step().to_matrix(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_perturbed_motion_is_pulled_back() {
        let (mut window, _) = synthetic_window(4, 0.3, 2);
        let perturbed = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.01, 0.03, -0.01),
            translation: Vector3::new(0.12, -0.05, 0.7),
        };
        window.frames[2].motion = perturbed;
        let direct: Vec<SE3> = window.frames.iter().map(|f| f.motion).collect();

        let ba = WindowBundleAdjuster::default();
        let refined = ba.solve(&window, &CameraModel::kitti()).unwrap();

        let err_before = (direct[2].translation - step().translation).norm();
        let err_after = (refined[2].translation - step().translation).norm();
        assert!(err_after < err_before, "{err_after} >= {err_before}");
        assert!(reprojection_cost(&window, &refined) < reprojection_cost(&window, &direct));
    }

    #[test]
    fn test_deterministic() {
        let (window, _) = synthetic_window(4, 0.5, 3);
        let ba = WindowBundleAdjuster::default();
        let a = ba.solve(&window, &CameraModel::kitti()).unwrap();
        let b = ba.solve(&window, &CameraModel::kitti()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_usable_tracks_fails() {
        let (mut window, _) = synthetic_window(3, 0.0, 4);
        for track in &mut window.tracks {
            let first = *track.observations.keys().next().unwrap();
            track.observations.retain(|frame, _| *frame == first);
        }
        let err = WindowBundleAdjuster::default()
            .solve(&window, &CameraModel::kitti())
            .unwrap_err();
        assert!(matches!(err, VoError::RefinementFailure { .. }));
    }

    #[test]
    fn test_landmark_cap_bounds_the_problem() {
        let (mut window, _) = synthetic_window(4, 0.0, 6);
        // Shorten every other track to two frames.
        for track in window.tracks.iter_mut().step_by(2) {
            let keep: Vec<usize> = track.observations.keys().copied().take(2).collect();
            track.observations.retain(|frame, _| keep.contains(frame));
        }
        let ba = WindowBundleAdjuster::new(WindowBAConfig {
            max_landmarks: 10,
            ..WindowBAConfig::default()
        });
        let relative = ba.solve(&window, &CameraModel::kitti()).unwrap();
        for r in &relative[1..] {
            assert_relative_eq!(r.to_matrix(), step().to_matrix(), epsilon = 1e-6);
        }

        let ba = WindowBundleAdjuster::new(WindowBAConfig {
            max_landmarks: 0,
            ..WindowBAConfig::default()
        });
        assert!(ba.solve(&window, &CameraModel::kitti()).is_err());
    }

    #[test]
    fn test_numeric_jacobian_matches_finite_difference_of_residuals() {
        let (window, _) = synthetic_window(3, 0.0, 5);
        let cam = CameraModel::kitti();
        let obs = window.tracks[0]
            .observations
            .values()
            .next()
            .copied()
            .unwrap();
        let problem = WindowProblem {
            camera: &cam,
            observations: vec![Observation {
                pose_idx: Some(0),
                point_idx: 0,
                measured: obs,
            }],
            num_poses: 1,
            huber_threshold: 1e9,
            params: DVector::from_vec(vec![0.01, -0.02, 0.005, 0.1, 0.0, -0.8, 1.0, 0.5, 12.0]),
        };
        let j = problem.compute_jacobian(&problem.params);
        let h = 1e-5;
        for col in 0..problem.params.len() {
            let mut plus = problem.params.clone();
            plus[col] += h;
            let mut minus = problem.params.clone();
            minus[col] -= h;
            let fd = (problem.compute_residuals(&plus) - problem.compute_residuals(&minus)) / (2.0 * h);
            for row in 0..RESIDUALS_PER_OBS {
                assert_relative_eq!(j[(row, col)], fd[row], epsilon = 1e-3, max_relative = 1e-4);
            }
        }
    }
}
