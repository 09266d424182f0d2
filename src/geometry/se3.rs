//! SE3: rigid-body transformation (rotation + translation).

use nalgebra::{Matrix3, Matrix4, Rotation3, Unit, UnitQuaternion, Vector3};

/// Tolerance for accepting a 4x4 matrix as a rigid transform.
pub const RIGID_TOLERANCE: f64 = 1e-6;

/// Rigid transformation. Transforms points as `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from an orthonormal rotation matrix and a translation.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Validate a homogeneous matrix and convert it.
    ///
    /// Returns `None` unless every entry is finite, the bottom row is
    /// `[0, 0, 0, 1]` and the rotation block is orthonormal with a positive
    /// determinant (all within [`RIGID_TOLERANCE`]).
    pub fn from_rigid_matrix(mat: &Matrix4<f64>) -> Option<Self> {
        if mat.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let bottom = [mat[(3, 0)], mat[(3, 1)], mat[(3, 2)], mat[(3, 3)] - 1.0];
        if bottom.iter().any(|v| v.abs() > RIGID_TOLERANCE) {
            return None;
        }

        let r = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let orthogonality = (r.transpose() * r - Matrix3::identity()).amax();
        if orthogonality > RIGID_TOLERANCE || r.determinant() <= 0.0 {
            return None;
        }

        let t = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Some(Self::from_rt(r, t))
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Homogeneous 4x4 form `[R | t; 0 0 0 1]`.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Exact rigid inverse `(R^T, -R^T t)`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Axis-angle rotation and translation, the parameterisation used by the
    /// window solver.
    pub fn to_params(&self) -> [f64; 6] {
        let aa = self.rotation.scaled_axis();
        let t = self.translation;
        [aa.x, aa.y, aa.z, t.x, t.y, t.z]
    }

    pub fn from_params(params: &[f64]) -> Self {
        let axis_angle = Vector3::new(params[0], params[1], params[2]);
        let angle = axis_angle.norm();
        let rotation = if angle > 1e-12 {
            UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis_angle / angle), angle)
        } else {
            UnitQuaternion::identity()
        };
        Self {
            rotation,
            translation: Vector3::new(params[3], params[4], params[5]),
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
