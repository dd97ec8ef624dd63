//! Linear algebra type system for the fusion core.
//!
//! Provides compile-time dimension checking and clean type aliases for the
//! delayed-state error-state Kalman filter. Measurement dimensions (H, r, R)
//! are generic over the caller's sensor since m varies per sensor module;
//! only the fixed 25-dimensional state/error-state types live here.

use nalgebra::{SMatrix, SVector};

/// Dimension of the error state: [δp, δv, δθ_iw, δb_w, δb_a, δL, δθ_wv, δθ_ci, δp_ci].
pub const ERROR_STATE_DIM: usize = 25;

pub type ErrorState = SVector<f64, ERROR_STATE_DIM>;
pub type Covariance = SMatrix<f64, ERROR_STATE_DIM, ERROR_STATE_DIM>;
pub type ProcessMatrix = SMatrix<f64, ERROR_STATE_DIM, ERROR_STATE_DIM>;

/// Measurement Jacobian, correction, and noise types for a sensor with `M`
/// scalar measurements. Sensor modules fix `M` at compile time (e.g. `3` for
/// a position aiding measurement) and build these directly.
pub type MeasurementJacobian<const M: usize> = SMatrix<f64, M, ERROR_STATE_DIM>;
pub type MeasurementNoise<const M: usize> = SMatrix<f64, M, M>;
pub type MeasurementResidual<const M: usize> = SVector<f64, M>;
pub type KalmanGain<const M: usize> = SMatrix<f64, ERROR_STATE_DIM, M>;
pub type InnovationCovariance<const M: usize> = SMatrix<f64, M, M>;
