//! Rigid-body geometry.

pub mod se3;

pub use se3::SE3;
