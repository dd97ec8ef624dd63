//! Small-angle attitude injection and exponential-map integration.
//!
//! The error state carries one 3-vector per attitude (δθ_iw, δθ_wv, δθ_ci);
//! injecting a correction or a gyro step into the corresponding nominal
//! quaternion is the same right-multiplicative exponential map in both
//! cases, so it lives here once rather than being duplicated in the
//! propagator and the updater.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Exponential map of a small-angle rotation vector `theta` (already scaled
/// by dt where applicable) onto the unit quaternion manifold, using
/// first/second-order closed-form terms for numerical stability near zero.
pub fn exp_map(theta: Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = theta.norm();
    if angle < 1e-9 {
        let half = theta * 0.5;
        return UnitQuaternion::new_normalize(Quaternion::new(1.0, half.x, half.y, half.z));
    }
    let axis = theta / angle;
    UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_unchecked(axis), angle)
}

/// Inject a small-angle error `delta_theta` into `q` via the right-side
/// update `q <- q * exp(1/2 * delta_theta)`, renormalizing afterward.
pub fn inject_right(q: UnitQuaternion<f64>, delta_theta: Vector3<f64>) -> UnitQuaternion<f64> {
    (q * exp_map(delta_theta)).normalize()
}

/// Advance `q` by integrating a constant body-rate `omega` over `dt` using
/// the closed-form quaternion exponential, renormalizing the result. This is
/// the propagator's per-step attitude update.
pub fn integrate_rate(q: UnitQuaternion<f64>, omega: Vector3<f64>, dt: f64) -> UnitQuaternion<f64> {
    inject_right(q, omega * dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exp_map_zero_is_identity() {
        let q = exp_map(Vector3::zeros());
        assert_relative_eq!(q.w, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn integrate_rate_preserves_unit_norm() {
        let q = UnitQuaternion::identity();
        let q2 = integrate_rate(q, Vector3::new(0.4, -0.2, 0.05), 0.01);
        assert_relative_eq!(q2.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn integrate_rate_small_angle_matches_linear_approx() {
        let q = UnitQuaternion::identity();
        let omega = Vector3::new(0.0, 0.0, 1.0);
        let dt = 0.001;
        let q2 = integrate_rate(q, omega, dt);
        // For a tiny yaw step, q.z should be approximately omega*dt/2.
        assert_relative_eq!(q2.k, omega.z * dt / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn inject_right_zero_delta_is_noop() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let q2 = inject_right(q, Vector3::zeros());
        assert_relative_eq!(q2.w, q.w, epsilon = 1e-12);
        assert_relative_eq!(q2.i, q.i, epsilon = 1e-12);
        assert_relative_eq!(q2.j, q.j, epsilon = 1e-12);
        assert_relative_eq!(q2.k, q.k, epsilon = 1e-12);
    }
}
