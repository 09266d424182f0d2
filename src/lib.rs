pub mod config;
pub mod egomotion;
pub mod error;
pub mod evaluation;
pub mod frame;
pub mod geometry;
pub mod io;
pub mod odometry;
pub mod optimizer;
pub mod pipeline;
pub mod sim;

pub use error::{FailureSeverity, Result, VoError};
