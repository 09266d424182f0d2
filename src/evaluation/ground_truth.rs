//! Reference poses for accuracy comparison.

use std::path::Path;

use crate::error::Result;
use crate::geometry::SE3;
use crate::io::trajectory::read_poses;

/// Camera-to-world ground-truth poses, one per dataset frame.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    poses: Vec<SE3>,
    /// Dataset index of run frame 0.
    offset: usize,
}

impl GroundTruth {
    pub fn new(poses: Vec<SE3>) -> Self {
        Self { poses, offset: 0 }
    }

    /// Load a KITTI-style pose file (12 or 16 values per line).
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_poses(path)?))
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Previous-to-current motion into run frame `frame` (`frame >= 1`).
    pub fn relative_motion(&self, frame: usize) -> Option<SE3> {
        let curr_idx = self.offset + frame;
        let prev = self.poses.get(curr_idx.checked_sub(1)?)?;
        let curr = self.poses.get(curr_idx)?;
        Some(curr.inverse().compose(prev))
    }
}
