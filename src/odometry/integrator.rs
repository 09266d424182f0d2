//! Pose integration.
//!
//! Convention: the estimator reports the *previous-to-current* transform
//! `T_curr_prev` (maps points from the previous camera into the current one).
//! The integrated pose is camera-to-world, so each step multiplies by its
//! inverse:
//!
//! ```text
//! P_n = P_{n-1} * inverse(T_n) = inverse(T_1) * inverse(T_2) * ... * inverse(T_n)
//! ```

use nalgebra::Matrix4;

use crate::error::{Result, VoError};
use crate::geometry::SE3;

/// Compose a relative motion into a global pose.
///
/// Uses the exact rigid inverse, never a numeric matrix inverse.
pub fn accumulate(global: &SE3, relative: &SE3) -> SE3 {
    global.compose(&relative.inverse())
}

/// Like [`accumulate`] for a raw 4x4 matrix coming from outside the crate.
///
/// Fails with `DegenerateMotion` when `relative` is not a rigid transform.
pub fn accumulate_matrix(frame: usize, global: &SE3, relative: &Matrix4<f64>) -> Result<SE3> {
    let relative = SE3::from_rigid_matrix(relative).ok_or(VoError::DegenerateMotion { frame })?;
    Ok(accumulate(global, &relative))
}
