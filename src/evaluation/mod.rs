//! Accuracy evaluation of motion estimates.

pub mod ground_truth;
pub mod reprojection;

pub use ground_truth::GroundTruth;
pub use reprojection::{reprojection_error, ReprojectionStats};
