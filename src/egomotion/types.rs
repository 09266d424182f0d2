//! Data exchanged with the external stereo egomotion estimator.

use nalgebra::{Matrix4, Point2};

use crate::error::FailureSeverity;
use crate::geometry::SE3;

/// Stable identifier the tracker assigns to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

/// The same physical feature seen in two consecutive stereo pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub track_id: TrackId,
    pub left_prev: Point2<f64>,
    pub right_prev: Point2<f64>,
    pub left_curr: Point2<f64>,
    pub right_curr: Point2<f64>,
}

impl Correspondence {
    /// Disparity in the previous pair.
    pub fn prev_disparity(&self) -> f64 {
        self.left_prev.x - self.right_prev.x
    }
}

/// What the estimator returns for one frame transition.
#[derive(Debug, Clone)]
pub struct RawMotion {
    /// Previous-to-current transform: maps points from the previous camera
    /// frame into the current one.
    pub relative: Matrix4<f64>,
    /// Every correspondence the estimator matched.
    pub matches: Vec<Correspondence>,
    /// Indices into `matches` the robust fit accepted.
    pub inliers: Vec<usize>,
}

/// Failure reported by the estimator.
#[derive(Debug, Clone)]
pub struct EstimatorError {
    pub kind: FailureSeverity,
    pub num_matches: usize,
    pub num_inliers: usize,
    pub message: String,
}

impl EstimatorError {
    pub fn insufficient(num_matches: usize, num_inliers: usize) -> Self {
        Self {
            kind: FailureSeverity::InsufficientInliers,
            num_matches,
            num_inliers,
            message: "too few inliers".to_string(),
        }
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        Self {
            kind: FailureSeverity::Degenerate,
            num_matches: 0,
            num_inliers: 0,
            message: message.into(),
        }
    }
}

/// Validated egomotion for one frame.
#[derive(Debug, Clone)]
pub struct FrameMotion {
    pub frame_index: usize,
    /// Previous-to-current transform.
    pub relative: SE3,
    /// Inlier correspondences; outliers are dropped.
    pub inliers: Vec<Correspondence>,
    pub num_matches: usize,
    pub num_inliers: usize,
}

impl FrameMotion {
    pub fn inlier_ratio(&self) -> f64 {
        if self.num_matches == 0 {
            0.0
        } else {
            self.num_inliers as f64 / self.num_matches as f64
        }
    }
}
