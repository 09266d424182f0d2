//! Frame-by-frame driver.
//!
//! Owns every piece of mutable run state ([`PipelineContext`]) and moves it
//! through [`PipelineState`]. For each frame:
//! 1. estimate the motion from the previous pair
//! 2. integrate the direct trajectory
//! 3. push the frame into the window and, when enabled and full, refine it
//! 4. integrate the refined trajectory (direct motion when not refined)
//!
//! Trajectories are flushed on normal completion, on cancellation and before
//! a fatal error is returned.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::control::CancellationToken;
use super::result::{FrameOutcome, FrameReport, RunSummary};
use super::state::PipelineState;
use crate::egomotion::{EgomotionAdapter, FrameMotion, StereoMotionEstimator};
use crate::error::{Result, VoError};
use crate::evaluation::{reprojection_error, GroundTruth};
use crate::frame::{CameraModel, FrameSource, StereoPair};
use crate::geometry::SE3;
use crate::io::{write_trajectory, TrajectoryFormat};
use crate::odometry::{accumulate, Trajectory, TrajectoryKind};
use crate::optimizer::{SlidingWindowRefiner, WindowBundleAdjuster, WindowSolver};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub refinement_enabled: bool,
    pub window_size: usize,
    /// Consecutive skipped frames tolerated before the run aborts.
    pub max_consecutive_failures: usize,
    pub trajectory_format: TrajectoryFormat,
    /// Where the direct trajectory is written; `None` keeps it in memory.
    pub direct_output: Option<PathBuf>,
    /// Written only when refinement is enabled.
    pub refined_output: Option<PathBuf>,
    /// Reported when the source yields no pair at all.
    pub image_list: PathBuf,
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(VoError::Config(format!(
                "window_size must be at least 2, got {}",
                self.window_size
            )));
        }
        Ok(())
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            refinement_enabled: false,
            window_size: 4,
            max_consecutive_failures: 5,
            trajectory_format: TrajectoryFormat::Kitti12,
            direct_output: None,
            refined_output: None,
            image_list: PathBuf::new(),
        }
    }
}

/// Mutable state of a run. The window's newest frame holds the previous
/// stereo pair.
pub struct PipelineContext<I, W> {
    pub direct: Trajectory,
    pub refined: Trajectory,
    pub refiner: SlidingWindowRefiner<StereoPair<I>, W>,
    pub consecutive_failures: usize,
    pub reports: Vec<FrameReport>,
    pub cancelled: bool,
}

impl<I, W: WindowSolver> PipelineContext<I, W> {
    fn new(window_size: usize, camera: CameraModel, solver: W) -> Self {
        Self {
            direct: Trajectory::new(TrajectoryKind::Direct),
            refined: Trajectory::new(TrajectoryKind::Refined),
            refiner: SlidingWindowRefiner::with_solver(window_size, camera, solver),
            consecutive_failures: 0,
            reports: Vec::new(),
            cancelled: false,
        }
    }

    /// Index the next frame will get (one pose per processed frame).
    fn next_frame_index(&self) -> usize {
        self.direct.len()
    }
}

pub struct VoPipeline<S, E, W = WindowBundleAdjuster>
where
    S: FrameSource,
{
    options: PipelineOptions,
    camera: CameraModel,
    source: S,
    adapter: EgomotionAdapter<E>,
    ground_truth: Option<GroundTruth>,
    cancel: CancellationToken,
    state: PipelineState,
    ctx: PipelineContext<S::Image, W>,
}

impl<S, E> VoPipeline<S, E, WindowBundleAdjuster>
where
    S: FrameSource,
    E: StereoMotionEstimator<Image = S::Image>,
{
    pub fn new(options: PipelineOptions, camera: CameraModel, source: S, estimator: E) -> Self {
        Self::with_solver(options, camera, source, estimator, WindowBundleAdjuster::default())
    }
}

impl<S, E, W> VoPipeline<S, E, W>
where
    S: FrameSource,
    E: StereoMotionEstimator<Image = S::Image>,
    W: WindowSolver,
{
    pub fn with_solver(
        options: PipelineOptions,
        camera: CameraModel,
        source: S,
        estimator: E,
        solver: W,
    ) -> Self {
        let ctx = PipelineContext::new(options.window_size, camera, solver);
        Self {
            options,
            camera,
            source,
            adapter: EgomotionAdapter::new(estimator),
            ground_truth: None,
            cancel: CancellationToken::new(),
            state: PipelineState::Init,
            ctx,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn direct_trajectory(&self) -> &Trajectory {
        &self.ctx.direct
    }

    pub fn refined_trajectory(&self) -> &Trajectory {
        &self.ctx.refined
    }

    pub fn reports(&self) -> &[FrameReport] {
        &self.ctx.reports
    }

    /// Run to completion. A run is single-shot: once finished, calling
    /// `run` again returns the same summary; once aborted, it returns
    /// [`VoError::RunAborted`].
    pub fn run(&mut self) -> Result<RunSummary> {
        loop {
            match self.state {
                PipelineState::Init => match self.initialize() {
                    Ok(()) => self.state = PipelineState::Running,
                    Err(e) => {
                        // Nothing was integrated yet, nothing to flush.
                        self.state = PipelineState::Aborted;
                        return Err(e);
                    }
                },
                PipelineState::Running => match self.step() {
                    Ok(true) => {}
                    Ok(false) => self.state = PipelineState::Done,
                    Err(e) => return Err(self.abort(e)),
                },
                PipelineState::Done => self.state = PipelineState::Flush,
                PipelineState::Flush => {
                    if let Err(e) = self.flush() {
                        self.state = PipelineState::Aborted;
                        return Err(e);
                    }
                    self.state = PipelineState::Finished;
                }
                PipelineState::Finished => return Ok(self.summary()),
                PipelineState::Aborted => return Err(VoError::RunAborted),
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_reports(
            self.ctx.direct.len(),
            self.ctx.cancelled,
            self.ctx.reports.clone(),
        )
    }

    fn initialize(&mut self) -> Result<()> {
        self.options.validate()?;
        let first = self.source.next_pair()?.ok_or_else(|| VoError::ListRead {
            path: self.options.image_list.clone(),
            reason: "no stereo pair to process".to_string(),
        })?;
        self.adapter.prime(&first)?;

        info!(
            refinement = self.options.refinement_enabled,
            window = self.ctx.refiner.window().capacity(),
            remaining = ?self.source.remaining(),
            "odometry started at pair {}",
            first.index
        );
        self.ctx.refiner.push(0, first, SE3::identity(), &[]);
        Ok(())
    }

    /// Process one frame. `Ok(false)` when the run should stop normally.
    fn step(&mut self) -> Result<bool> {
        if self.cancel.is_cancelled() {
            info!(frames = self.ctx.direct.len(), "run cancelled");
            self.ctx.cancelled = true;
            return Ok(false);
        }
        let Some(curr) = self.source.next_pair()? else {
            return Ok(false);
        };
        let frame = self.ctx.next_frame_index();

        let prev = self
            .ctx
            .refiner
            .window()
            .latest()
            .map(|f| &f.images)
            .ok_or_else(|| VoError::FrameLoad {
                frame,
                reason: "no previous stereo pair".to_string(),
            })?;

        match self.adapter.estimate(frame, prev, &curr) {
            Ok(motion) => {
                self.ctx.consecutive_failures = 0;
                self.integrate(frame, curr, motion)?;
            }
            Err(e) if !e.is_fatal() => self.skip(frame, curr, e)?,
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    fn integrate(&mut self, frame: usize, curr: StereoPair<S::Image>, motion: FrameMotion) -> Result<()> {
        let ctx = &mut self.ctx;
        let direct_pose = accumulate(&ctx.direct.last(), &motion.relative);
        ctx.direct.push(direct_pose);

        let direct_error = reprojection_error(&motion.inliers, &self.camera, &motion.relative).mean_abs_error;
        let ground_truth_error = self
            .ground_truth
            .as_ref()
            .and_then(|gt| gt.relative_motion(frame))
            .and_then(|gt| reprojection_error(&motion.inliers, &self.camera, &gt).mean_abs_error);

        ctx.refiner
            .push(frame, curr, motion.relative.inverse(), &motion.inliers);

        let mut outcome = FrameOutcome::Direct;
        let mut refined_relative = motion.relative;
        let mut refined_error = None;
        if self.options.refinement_enabled && ctx.refiner.is_ready() {
            match ctx.refiner.refine().and_then(|_| ctx.refiner.latest_pose()) {
                Ok(camera_to_prev) => {
                    refined_relative = camera_to_prev.inverse();
                    refined_error =
                        reprojection_error(&motion.inliers, &self.camera, &refined_relative).mean_abs_error;
                    outcome = FrameOutcome::Refined;
                }
                Err(VoError::RefinementFailure { reason }) => {
                    warn!(frame, %reason, "window refinement failed, keeping direct estimate");
                    outcome = FrameOutcome::RefinementFallback;
                }
                Err(e) => return Err(e),
            }
        }
        let refined_pose = accumulate(&ctx.refined.last(), &refined_relative);
        ctx.refined.push(refined_pose);

        debug!(
            frame,
            ?outcome,
            direct_error = ?direct_error,
            refined_error = ?refined_error,
            "frame integrated"
        );
        ctx.reports.push(FrameReport {
            frame_index: frame,
            outcome,
            num_matches: motion.num_matches,
            num_inliers: motion.num_inliers,
            direct_error,
            refined_error,
            ground_truth_error,
        });
        Ok(())
    }

    /// Repeat the last pose and restart the window at `curr`.
    fn skip(&mut self, frame: usize, curr: StereoPair<S::Image>, error: VoError) -> Result<()> {
        let ctx = &mut self.ctx;
        ctx.consecutive_failures += 1;
        if ctx.consecutive_failures > self.options.max_consecutive_failures {
            warn!(
                frame,
                failures = ctx.consecutive_failures,
                "too many consecutive estimation failures"
            );
            return Err(error);
        }
        warn!(frame, failures = ctx.consecutive_failures, "{error}; frame skipped");

        let (num_matches, num_inliers) = match &error {
            VoError::EstimationFailure {
                num_matches,
                num_inliers,
                ..
            } => (*num_matches, *num_inliers),
            _ => (0, 0),
        };

        let direct_last = ctx.direct.last();
        ctx.direct.push(direct_last);
        let refined_last = ctx.refined.last();
        ctx.refined.push(refined_last);

        ctx.refiner.reset();
        ctx.refiner.push(frame, curr, SE3::identity(), &[]);

        ctx.reports.push(FrameReport {
            frame_index: frame,
            outcome: FrameOutcome::Skipped,
            num_matches,
            num_inliers,
            direct_error: None,
            refined_error: None,
            ground_truth_error: None,
        });
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(path) = &self.options.direct_output {
            write_trajectory(&self.ctx.direct, path, self.options.trajectory_format)?;
            info!(poses = self.ctx.direct.len(), "wrote {}", path.display());
        }
        if self.options.refinement_enabled {
            if let Some(path) = &self.options.refined_output {
                write_trajectory(&self.ctx.refined, path, self.options.trajectory_format)?;
                info!(poses = self.ctx.refined.len(), "wrote {}", path.display());
            }
        }
        Ok(())
    }

    /// Flush what we have, then hand back the fatal error.
    fn abort(&mut self, error: VoError) -> VoError {
        self.state = PipelineState::Flush;
        if let Err(flush_err) = self.flush() {
            warn!("flushing partial trajectories failed: {flush_err}");
        }
        self.state = PipelineState::Aborted;
        warn!(frames = self.ctx.direct.len(), "run aborted: {error}");
        error
    }
}
