//! Egomotion: per-frame relative pose from an external stereo estimator.

pub mod adapter;
#[cfg(feature = "opencv")]
pub mod opencv_estimator;
pub mod types;

pub use adapter::{EgomotionAdapter, StereoMotionEstimator};
pub use types::{Correspondence, EstimatorError, FrameMotion, RawMotion, TrackId};
