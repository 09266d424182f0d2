//! Sliding-window refinement of recent poses.
//!
//! - [`window`]: bounded FIFO of frames and the tracks linking them
//! - [`refiner`]: drives a [`WindowSolver`] over the window
//! - [`window_ba`]: default solver, stereo bundle adjustment with LM

pub mod refiner;
pub mod window;
pub mod window_ba;

pub use refiner::{SlidingWindowRefiner, WindowSolver};
pub use window::{StereoObservation, Track, Window, WindowFrame, WindowSnapshot};
pub use window_ba::{WindowBAConfig, WindowBundleAdjuster};
