//! Wraps an external stereo egomotion estimator.
//!
//! The adapter is the only place that talks to the estimator. It turns the
//! estimator's raw output into validated, frame-tagged data:
//! - failures become `VoError::EstimationFailure` with the frame index
//! - the motion matrix must be a rigid transform (`DegenerateMotion` otherwise)
//! - outliers are discarded

use tracing::{info, warn};

use super::types::{EstimatorError, FrameMotion, RawMotion};
use crate::error::{Result, VoError};
use crate::frame::{ImageDims, StereoPair};
use crate::geometry::SE3;

/// Contract of the external relative-pose estimator.
pub trait StereoMotionEstimator {
    type Image;

    /// Called once with the first pair before any `estimate`.
    fn prime(&mut self, _first: &StereoPair<Self::Image>) -> std::result::Result<(), EstimatorError> {
        Ok(())
    }

    /// Motion between two consecutive pairs.
    fn estimate(
        &mut self,
        prev: &StereoPair<Self::Image>,
        curr: &StereoPair<Self::Image>,
        dims: ImageDims,
    ) -> std::result::Result<RawMotion, EstimatorError>;
}

impl<E: StereoMotionEstimator + ?Sized> StereoMotionEstimator for Box<E> {
    type Image = E::Image;

    fn prime(&mut self, first: &StereoPair<Self::Image>) -> std::result::Result<(), EstimatorError> {
        (**self).prime(first)
    }

    fn estimate(
        &mut self,
        prev: &StereoPair<Self::Image>,
        curr: &StereoPair<Self::Image>,
        dims: ImageDims,
    ) -> std::result::Result<RawMotion, EstimatorError> {
        (**self).estimate(prev, curr, dims)
    }
}

pub struct EgomotionAdapter<E> {
    estimator: E,
}

impl<E: StereoMotionEstimator> EgomotionAdapter<E> {
    pub fn new(estimator: E) -> Self {
        Self { estimator }
    }

    pub fn prime(&mut self, first: &StereoPair<E::Image>) -> Result<()> {
        self.estimator
            .prime(first)
            .map_err(|e| wrap_failure(0, e))
    }

    /// Estimate the motion from `prev` to `curr`, tagging everything with
    /// `frame_index` (the index of `curr` in the run).
    pub fn estimate(
        &mut self,
        frame_index: usize,
        prev: &StereoPair<E::Image>,
        curr: &StereoPair<E::Image>,
    ) -> Result<FrameMotion> {
        let raw = self
            .estimator
            .estimate(prev, curr, curr.dims)
            .map_err(|e| wrap_failure(frame_index, e))?;
        let motion = validate(frame_index, raw)?;

        info!(
            frame = frame_index,
            matches = motion.num_matches,
            inliers = motion.num_inliers,
            "egomotion: {:.1}% inliers",
            100.0 * motion.inlier_ratio()
        );
        Ok(motion)
    }
}

fn wrap_failure(frame: usize, e: EstimatorError) -> VoError {
    VoError::EstimationFailure {
        frame,
        severity: e.kind,
        num_matches: e.num_matches,
        num_inliers: e.num_inliers,
        reason: e.message,
    }
}

fn validate(frame_index: usize, raw: RawMotion) -> Result<FrameMotion> {
    let relative = SE3::from_rigid_matrix(&raw.relative)
        .ok_or(VoError::DegenerateMotion { frame: frame_index })?;

    let num_matches = raw.matches.len();
    let mut inliers = Vec::with_capacity(raw.inliers.len());
    for &idx in &raw.inliers {
        match raw.matches.get(idx) {
            Some(c) => inliers.push(*c),
            None => warn!(
                frame = frame_index,
                index = idx,
                matches = num_matches,
                "estimator reported an inlier index outside the match set"
            ),
        }
    }

    Ok(FrameMotion {
        frame_index,
        relative,
        num_inliers: inliers.len(),
        inliers,
        num_matches,
    })
}
