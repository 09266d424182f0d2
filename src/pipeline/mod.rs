//! Pipeline driver: runs the per-frame state machine and flushes results.

pub mod control;
pub mod driver;
pub mod result;
pub mod state;

pub use control::CancellationToken;
pub use driver::{PipelineContext, PipelineOptions, VoPipeline};
pub use result::{FrameOutcome, FrameReport, RunSummary};
pub use state::PipelineState;
