//! Error taxonomy for the odometry pipeline.

use std::path::PathBuf;

/// How bad an egomotion failure is for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSeverity {
    /// Too few inliers for this frame pair; the run can continue.
    InsufficientInliers,
    /// Structurally degenerate input; the run must stop.
    Degenerate,
}

/// Errors produced by the odometry library.
#[derive(thiserror::Error, Debug)]
pub enum VoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot read image list {path:?}: {reason}")]
    ListRead { path: PathBuf, reason: String },

    #[error(
        "egomotion failed at frame {frame} ({severity:?}): {reason} \
         (matches={num_matches}, inliers={num_inliers})"
    )]
    EstimationFailure {
        frame: usize,
        severity: FailureSeverity,
        num_matches: usize,
        num_inliers: usize,
        reason: String,
    },

    #[error("cannot load stereo pair {frame}: {reason}")]
    FrameLoad { frame: usize, reason: String },

    #[error("degenerate relative motion at frame {frame}")]
    DegenerateMotion { frame: usize },

    #[error("window holds {len} of {capacity} frames, refinement not possible yet")]
    NotReady { len: usize, capacity: usize },

    #[error("window changed since the last refinement")]
    NotRefinedYet,

    #[error("frame {index} is outside the window (len={len})")]
    IndexOutOfWindow { index: usize, len: usize },

    #[error("window refinement failed: {reason}")]
    RefinementFailure { reason: String },

    #[error("the run was aborted and cannot be resumed")]
    RunAborted,

    #[error("i/o failure on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VoError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that end the run instead of skipping a frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VoError::EstimationFailure {
                severity: FailureSeverity::InsufficientInliers,
                ..
            } | VoError::RefinementFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VoError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn estimation(severity: FailureSeverity) -> VoError {
        VoError::EstimationFailure {
            frame: 3,
            severity,
            num_matches: 40,
            num_inliers: 2,
            reason: "too few inliers".to_string(),
        }
    }

    #[test]
    fn test_only_recoverable_failures_are_not_fatal() {
        assert!(!estimation(FailureSeverity::InsufficientInliers).is_fatal());
        assert!(!VoError::RefinementFailure { reason: "diverged".to_string() }.is_fatal());
        assert!(estimation(FailureSeverity::Degenerate).is_fatal());
        assert!(VoError::DegenerateMotion { frame: 3 }.is_fatal());
        assert!(VoError::RunAborted.is_fatal());
    }
}
