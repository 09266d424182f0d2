//! Synthetic stereo rig for offline runs and tests.
//!
//! [`SyntheticSource`] yields frame numbers instead of pixels and
//! [`SyntheticEstimator`] answers with the scene's known motion, so the whole
//! pipeline can run without image data.

mod scene;

use std::collections::BTreeMap;

pub use scene::{SceneConfig, SyntheticScene};

use nalgebra::Matrix4;

use crate::egomotion::{EstimatorError, RawMotion, StereoMotionEstimator};
use crate::error::Result;
use crate::frame::{FrameSource, ImageDims, StereoPair};

/// Failure injected at a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    InsufficientInliers,
    Degenerate,
    /// Return a matrix that is not a rigid transform.
    NonRigid,
}

pub struct SyntheticEstimator {
    scene: SyntheticScene,
    failures: BTreeMap<usize, ScriptedFailure>,
}

impl SyntheticEstimator {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            failures: BTreeMap::new(),
        }
    }

    pub fn fail_at(mut self, frame: usize, failure: ScriptedFailure) -> Self {
        self.failures.insert(frame, failure);
        self
    }
}

impl StereoMotionEstimator for SyntheticEstimator {
    type Image = usize;

    fn estimate(
        &mut self,
        _prev: &StereoPair<usize>,
        curr: &StereoPair<usize>,
        _dims: ImageDims,
    ) -> std::result::Result<RawMotion, EstimatorError> {
        let frame = curr.left;
        match self.failures.get(&frame) {
            Some(ScriptedFailure::InsufficientInliers) => return Err(EstimatorError::insufficient(12, 2)),
            Some(ScriptedFailure::Degenerate) => {
                return Err(EstimatorError::degenerate("all matches collinear"))
            }
            Some(ScriptedFailure::NonRigid) => {
                return Ok(RawMotion {
                    relative: Matrix4::identity() * 2.0,
                    matches: Vec::new(),
                    inliers: Vec::new(),
                })
            }
            None => {}
        }

        let motion = self.scene.observed_motion(frame)?;
        Ok(RawMotion {
            relative: motion.relative.to_matrix(),
            inliers: (0..motion.inliers.len()).collect(),
            matches: motion.inliers,
        })
    }
}

/// Yields one pair per scene frame; both images carry the frame number.
pub struct SyntheticSource {
    next: usize,
    end: usize,
    dims: ImageDims,
}

impl SyntheticSource {
    pub fn new(scene: &SyntheticScene) -> Self {
        Self {
            next: 0,
            end: scene.num_frames(),
            dims: scene.dims(),
        }
    }
}

impl FrameSource for SyntheticSource {
    type Image = usize;

    fn next_pair(&mut self) -> Result<Option<StereoPair<usize>>> {
        if self.next >= self.end {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(StereoPair {
            index,
            left: index,
            right: index,
            dims: self.dims,
        }))
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.end - self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egomotion::EgomotionAdapter;
    use crate::error::VoError;

    #[test]
    fn test_source_yields_every_frame_once() {
        let scene = SyntheticScene::new(SceneConfig::default());
        let mut source = SyntheticSource::new(&scene);
        assert_eq!(source.remaining(), Some(5));
        let mut seen = Vec::new();
        while let Some(pair) = source.next_pair().unwrap() {
            seen.push(pair.index);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_estimator_through_adapter() {
        let scene = SyntheticScene::new(SceneConfig::default());
        let mut source = SyntheticSource::new(&scene);
        let mut adapter = EgomotionAdapter::new(
            SyntheticEstimator::new(scene).fail_at(2, ScriptedFailure::NonRigid),
        );
        let p0 = source.next_pair().unwrap().unwrap();
        let p1 = source.next_pair().unwrap().unwrap();
        let p2 = source.next_pair().unwrap().unwrap();

        let m1 = adapter.estimate(1, &p0, &p1).unwrap();
        assert_eq!(m1.num_inliers, m1.num_matches);
        assert!((m1.relative.translation.z + 1.0).abs() < 1e-12);

        assert!(matches!(
            adapter.estimate(2, &p1, &p2),
            Err(VoError::DegenerateMotion { frame: 2 })
        ));
    }
}
