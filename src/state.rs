//! Nominal state and per-slot record types.

use nalgebra::{UnitQuaternion, Vector3};

use crate::types::{Covariance, ImuSample};

/// The full 25-scalar nominal state the filter estimates: pose, velocity,
/// IMU biases, visual scale, and the world/vision and IMU/camera extrinsics.
#[derive(Clone, Debug)]
pub struct NominalState {
    /// Position in the world frame.
    pub p: Vector3<f64>,
    /// Velocity in the world frame.
    pub v: Vector3<f64>,
    /// Attitude rotating world into the IMU frame.
    pub q_iw: UnitQuaternion<f64>,
    /// Gyro bias.
    pub b_w: Vector3<f64>,
    /// Accelerometer bias.
    pub b_a: Vector3<f64>,
    /// Visual scale factor. Always strictly positive.
    pub l: f64,
    /// World-to-vision rotation.
    pub q_wv: UnitQuaternion<f64>,
    /// IMU-to-camera rotation.
    pub q_ci: UnitQuaternion<f64>,
    /// IMU-to-camera translation.
    pub p_ci: Vector3<f64>,
}

impl NominalState {
    pub fn identity(scale_init: f64) -> Self {
        Self {
            p: Vector3::zeros(),
            v: Vector3::zeros(),
            q_iw: UnitQuaternion::identity(),
            b_w: Vector3::zeros(),
            b_a: Vector3::zeros(),
            l: scale_init,
            q_wv: UnitQuaternion::identity(),
            q_ci: UnitQuaternion::identity(),
            p_ci: Vector3::zeros(),
        }
    }

    /// All three stored quaternions, for invariant checking.
    pub fn quaternions(&self) -> [&UnitQuaternion<f64>; 3] {
        [&self.q_iw, &self.q_wv, &self.q_ci]
    }
}

/// A single-time snapshot: the nominal state, the error-state covariance at
/// that instant, the IMU inputs that produced it, and its slot time.
#[derive(Clone, Debug)]
pub struct StateRecord {
    pub nominal: NominalState,
    pub cov: Covariance,
    /// IMU inputs used to produce this slot (raw gyro/accel, and optionally
    /// the IMU's own attitude estimate used by some aiding sensors).
    pub imu: ImuSample,
    /// Slot time, seconds, monotonic along the buffer's logical order.
    pub t: f64,
}

impl StateRecord {
    pub fn new(nominal: NominalState, cov: Covariance, imu: ImuSample, t: f64) -> Self {
        Self {
            nominal,
            cov,
            imu,
            t,
        }
    }

    /// Checks the per-slot invariants from the data model: unit-norm
    /// quaternions, positive scale, symmetric non-negative-diagonal
    /// covariance. Returns the first violation found, if any.
    pub fn check_invariants(&self, idx: usize) -> Result<(), crate::error::FusionError> {
        use crate::error::FusionError;

        for q in self.nominal.quaternions() {
            let norm = q.norm();
            if (norm - 1.0).abs() > 1e-6 {
                return Err(FusionError::NonUnitQuaternion { idx, norm });
            }
        }
        if self.nominal.l <= 0.0 {
            return Err(FusionError::NonPositiveScale {
                idx,
                value: self.nominal.l,
            });
        }
        if !self.cov.iter().all(|x| x.is_finite()) {
            return Err(FusionError::NumericalFailure { idx });
        }
        let diff = self.cov - self.cov.transpose();
        let asym = diff.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
        if asym > 1e-6 {
            return Err(FusionError::NumericalFailure { idx });
        }
        Ok(())
    }
}
