//! Sliding-window refinement: keeps the window, runs the solver, serves poses.

use tracing::debug;

use super::window::{Window, WindowFrame, WindowSnapshot};
use super::window_ba::WindowBundleAdjuster;
use crate::egomotion::{Correspondence, TrackId};
use crate::error::{Result, VoError};
use crate::frame::CameraModel;
use crate::geometry::SE3;

/// Joint refinement of the poses in a window.
pub trait WindowSolver {
    /// One camera-to-previous transform per snapshot frame. The first entry is
    /// the anchor's direct motion, returned unchanged.
    fn solve(&self, window: &WindowSnapshot, camera: &CameraModel) -> Result<Vec<SE3>>;
}

impl<S: WindowSolver + ?Sized> WindowSolver for Box<S> {
    fn solve(&self, window: &WindowSnapshot, camera: &CameraModel) -> Result<Vec<SE3>> {
        (**self).solve(window, camera)
    }
}

pub struct SlidingWindowRefiner<I, S = WindowBundleAdjuster> {
    window: Window<I>,
    solver: S,
    camera: CameraModel,
    /// Result of the last `refine`, cleared whenever the window changes.
    refined: Option<Vec<SE3>>,
}

impl<I> SlidingWindowRefiner<I, WindowBundleAdjuster> {
    pub fn new(capacity: usize, camera: CameraModel) -> Self {
        Self::with_solver(capacity, camera, WindowBundleAdjuster::default())
    }
}

impl<I, S: WindowSolver> SlidingWindowRefiner<I, S> {
    pub fn with_solver(capacity: usize, camera: CameraModel, solver: S) -> Self {
        Self {
            window: Window::new(capacity),
            solver,
            camera,
            refined: None,
        }
    }

    pub fn window(&self) -> &Window<I> {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// `motion` is the direct camera-to-previous estimate of the new frame.
    pub fn push(
        &mut self,
        frame_index: usize,
        images: I,
        motion: SE3,
        correspondences: &[Correspondence],
    ) -> Option<WindowFrame<I>> {
        self.refined = None;
        let evicted = self.window.push(frame_index, images, motion, correspondences);
        if let Some(frame) = &evicted {
            debug!(
                evicted = frame.frame_index,
                tracks = self.window.num_tracks(),
                "window full, dropped oldest frame"
            );
        }
        evicted
    }

    pub fn is_ready(&self) -> bool {
        self.window.is_full()
    }

    pub fn refine(&mut self) -> Result<Vec<SE3>> {
        if !self.is_ready() {
            return Err(VoError::NotReady {
                len: self.window.len(),
                capacity: self.window.capacity(),
            });
        }
        let snapshot = self.window.snapshot();
        let poses = self.solver.solve(&snapshot, &self.camera)?;
        if poses.len() != snapshot.frames.len() {
            return Err(VoError::RefinementFailure {
                reason: format!(
                    "solver returned {} poses for {} frames",
                    poses.len(),
                    snapshot.frames.len()
                ),
            });
        }
        self.refined = Some(poses.clone());
        Ok(poses)
    }

    /// Refined camera-to-previous transform of window slot `index`.
    pub fn camera_pose(&self, index: usize) -> Result<SE3> {
        let poses = self.refined.as_ref().ok_or(VoError::NotRefinedYet)?;
        poses.get(index).copied().ok_or(VoError::IndexOutOfWindow {
            index,
            len: poses.len(),
        })
    }

    /// Refined pose of the newest frame.
    pub fn latest_pose(&self) -> Result<SE3> {
        self.camera_pose(self.window.len().saturating_sub(1))
    }

    pub fn remove_track(&mut self, id: TrackId) {
        if self.window.remove_track(id).is_some() {
            self.refined = None;
        }
    }

    pub fn clear_tracks(&mut self) {
        self.window.clear_tracks();
        self.refined = None;
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.refined = None;
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.window.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SceneConfig, SyntheticScene};
    use std::cell::Cell;

    /// Returns the direct motions, counting calls.
    struct PassThrough {
        calls: Cell<usize>,
    }

    impl WindowSolver for PassThrough {
        fn solve(&self, window: &WindowSnapshot, _camera: &CameraModel) -> Result<Vec<SE3>> {
            self.calls.set(self.calls.get() + 1);
            Ok(window.frames.iter().map(|f| f.motion).collect())
        }
    }

    struct Failing;

    impl WindowSolver for Failing {
        fn solve(&self, _window: &WindowSnapshot, _camera: &CameraModel) -> Result<Vec<SE3>> {
            Err(VoError::RefinementFailure {
                reason: "scripted".to_string(),
            })
        }
    }

    fn pass_through(capacity: usize) -> SlidingWindowRefiner<(), PassThrough> {
        SlidingWindowRefiner::with_solver(
            capacity,
            CameraModel::kitti(),
            PassThrough { calls: Cell::new(0) },
        )
    }

    #[test]
    fn test_not_ready_until_full() {
        let mut refiner = pass_through(3);
        refiner.push(0, (), SE3::identity(), &[]);
        refiner.push(1, (), SE3::identity(), &[]);
        assert!(!refiner.is_ready());
        assert!(matches!(
            refiner.refine(),
            Err(VoError::NotReady { len: 2, capacity: 3 })
        ));
        refiner.push(2, (), SE3::identity(), &[]);
        assert!(refiner.is_ready());
        assert_eq!(refiner.refine().unwrap().len(), 3);
    }

    #[test]
    fn test_pose_access_follows_window_changes() {
        let mut refiner = pass_through(2);
        assert!(matches!(refiner.camera_pose(0), Err(VoError::NotRefinedYet)));

        refiner.push(0, (), SE3::identity(), &[]);
        refiner.push(1, (), SE3::identity(), &[]);
        refiner.refine().unwrap();
        assert!(refiner.camera_pose(1).is_ok());
        assert!(matches!(
            refiner.camera_pose(2),
            Err(VoError::IndexOutOfWindow { index: 2, len: 2 })
        ));

        refiner.push(2, (), SE3::identity(), &[]);
        assert!(matches!(refiner.camera_pose(1), Err(VoError::NotRefinedYet)));

        refiner.refine().unwrap();
        refiner.reset();
        assert!(refiner.is_empty());
        assert!(matches!(refiner.latest_pose(), Err(VoError::NotRefinedYet)));
    }

    #[test]
    fn test_solver_failure_is_reported() {
        let mut refiner: SlidingWindowRefiner<(), Failing> =
            SlidingWindowRefiner::with_solver(2, CameraModel::kitti(), Failing);
        refiner.push(0, (), SE3::identity(), &[]);
        refiner.push(1, (), SE3::identity(), &[]);
        assert!(matches!(
            refiner.refine(),
            Err(VoError::RefinementFailure { .. })
        ));
        assert!(matches!(refiner.camera_pose(0), Err(VoError::NotRefinedYet)));
    }

    #[test]
    fn test_refine_is_idempotent() {
        let scene = SyntheticScene::new(SceneConfig {
            num_landmarks: 60,
            pixel_noise: 0.4,
            ..SceneConfig::default()
        });
        let mut refiner: SlidingWindowRefiner<usize> = SlidingWindowRefiner::new(4, scene.camera());
        refiner.push(0, 0, SE3::identity(), &[]);
        for frame in 1..4 {
            let motion = scene.observed_motion(frame).unwrap();
            refiner.push(frame, frame, motion.relative.inverse(), &motion.inliers);
        }
        let first = refiner.refine().unwrap();
        let second = refiner.refine().unwrap();
        assert_eq!(first, second);
        assert_eq!(refiner.camera_pose(3).unwrap(), first[3]);
    }
}
