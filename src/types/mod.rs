pub mod linalg;

pub use linalg::*;

use nalgebra::{UnitQuaternion, Vector3};

/// A single raw IMU sample: gyro rate, accelerometer reading, and optionally
/// a magnetometer reading and the IMU's own internal attitude estimate. Both
/// optional fields may be used by aiding sensor modules as pseudo-measurements
/// or for alignment, but the core itself never inspects them.
#[derive(Clone, Copy, Debug)]
pub struct ImuSample {
    pub t: f64,
    pub w_m: Vector3<f64>,
    pub a_m: Vector3<f64>,
    pub m_m: Option<Vector3<f64>>,
    pub q_m: Option<UnitQuaternion<f64>>,
}

impl ImuSample {
    pub fn new(t: f64, w_m: Vector3<f64>, a_m: Vector3<f64>) -> Self {
        Self {
            t,
            w_m,
            a_m,
            m_m: None,
            q_m: None,
        }
    }
}
