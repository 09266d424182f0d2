//! Direct odometry: integrating relative motion into trajectories.

pub mod integrator;
mod trajectory;

pub use integrator::{accumulate, accumulate_matrix};
pub use trajectory::{Trajectory, TrajectoryKind};
