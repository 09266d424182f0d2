//! Per-frame reports and the run summary.

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Direct estimate used for both trajectories (refinement off or window
    /// not full yet).
    Direct,
    /// Window refinement succeeded.
    Refined,
    /// Refinement failed, the direct estimate was used instead.
    RefinementFallback,
    /// Too few inliers; the last pose was repeated.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: usize,
    pub outcome: FrameOutcome,
    pub num_matches: usize,
    pub num_inliers: usize,
    /// Mean reprojection error (pixels) of the direct estimate.
    pub direct_error: Option<f64>,
    pub refined_error: Option<f64>,
    pub ground_truth_error: Option<f64>,
}

impl FrameReport {
    /// True when the ground-truth motion explains the inliers better than
    /// the direct estimate.
    pub fn ground_truth_beats_direct(&self) -> bool {
        matches!(
            (self.ground_truth_error, self.direct_error),
            (Some(gt), Some(direct)) if gt < direct
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Poses in each trajectory, frame 0 included.
    pub num_poses: usize,
    pub skipped: usize,
    pub refined: usize,
    pub refinement_fallbacks: usize,
    pub ground_truth_better: usize,
    pub mean_direct_error: Option<f64>,
    pub mean_refined_error: Option<f64>,
    pub cancelled: bool,
    pub reports: Vec<FrameReport>,
}

impl RunSummary {
    pub fn from_reports(num_poses: usize, cancelled: bool, reports: Vec<FrameReport>) -> Self {
        let count = |o: FrameOutcome| reports.iter().filter(|r| r.outcome == o).count();
        Self {
            num_poses,
            skipped: count(FrameOutcome::Skipped),
            refined: count(FrameOutcome::Refined),
            refinement_fallbacks: count(FrameOutcome::RefinementFallback),
            ground_truth_better: reports.iter().filter(|r| r.ground_truth_beats_direct()).count(),
            mean_direct_error: mean(reports.iter().filter_map(|r| r.direct_error)),
            mean_refined_error: mean(reports.iter().filter_map(|r| r.refined_error)),
            cancelled,
            reports,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: FrameOutcome, direct: Option<f64>, gt: Option<f64>) -> FrameReport {
        FrameReport {
            frame_index: 1,
            outcome,
            num_matches: 10,
            num_inliers: 8,
            direct_error: direct,
            refined_error: None,
            ground_truth_error: gt,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_reports(
            4,
            false,
            vec![
                report(FrameOutcome::Direct, Some(1.0), Some(0.5)),
                report(FrameOutcome::Skipped, None, None),
                report(FrameOutcome::Refined, Some(3.0), Some(4.0)),
            ],
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.refined, 1);
        assert_eq!(summary.ground_truth_better, 1);
        assert_eq!(summary.mean_direct_error, Some(2.0));
        assert_eq!(summary.mean_refined_error, None);
    }
}
