use crate::geometry::SE3;

/// Which estimate a trajectory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryKind {
    /// Integrated straight from the egomotion estimates.
    Direct,
    /// Integrated from sliding-window refinement results.
    Refined,
}

/// Append-only sequence of camera-to-world poses, one per processed frame.
///
/// Index 0 is always the identity.
#[derive(Debug, Clone)]
pub struct Trajectory {
    kind: TrajectoryKind,
    poses: Vec<SE3>,
}

impl Trajectory {
    pub fn new(kind: TrajectoryKind) -> Self {
        Self {
            kind,
            poses: vec![SE3::identity()],
        }
    }

    /// Build from already integrated poses (e.g. read back from disk).
    pub fn from_poses(kind: TrajectoryKind, poses: Vec<SE3>) -> Self {
        Self { kind, poses }
    }

    pub fn kind(&self) -> TrajectoryKind {
        self.kind
    }

    pub fn push(&mut self, pose: SE3) {
        self.poses.push(pose);
    }

    /// Pose of the most recent frame.
    pub fn last(&self) -> SE3 {
        self.poses.last().copied().unwrap_or_else(SE3::identity)
    }

    pub fn poses(&self) -> &[SE3] {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Path length through the camera centres.
    pub fn total_distance(&self) -> f64 {
        self.poses
            .windows(2)
            .map(|w| (w[1].translation - w[0].translation).norm())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_starts_at_identity() {
        let traj = Trajectory::new(TrajectoryKind::Direct);
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.last(), SE3::identity());
        assert_eq!(traj.kind(), TrajectoryKind::Direct);
    }

    #[test]
    fn test_total_distance() {
        let mut traj = Trajectory::new(TrajectoryKind::Refined);
        traj.push(SE3::from_translation(Vector3::new(3.0, 0.0, 0.0)));
        traj.push(SE3::from_translation(Vector3::new(3.0, 4.0, 0.0)));
        assert!((traj.total_distance() - 7.0).abs() < 1e-12);
    }
}
