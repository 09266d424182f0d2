//! Driver state machine.

/// Lifecycle of a run.
///
/// ```text
/// Init -> Running -> Done -> Flush -> Finished
///   \________\______________________-> Aborted   (after flushing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Waiting for the first stereo pair.
    #[default]
    Init,
    /// Processing one frame per step.
    Running,
    /// Source exhausted or run cancelled.
    Done,
    /// Writing trajectories.
    Flush,
    Finished,
    /// A fatal error ended the run; partial results were flushed.
    Aborted,
}
