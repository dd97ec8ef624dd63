//! Error types for the fusion core.
//!
//! Temporal and outlier conditions are ordinary recoverable errors. The one
//! fatal condition described by the filter's lifecycle rules — calling
//! `set_global_start` after the filter has already progressed past its first
//! slot — is not represented here; it aborts the process directly, matching
//! the original lifecycle contract.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    /// A measurement or IMU sample arrived before any IMU input had been seen.
    #[error("no IMU input has been received yet, core has no time base")]
    NotReady,

    /// A measurement timestamped before the configured global start epoch.
    #[error("measurement at t={t} precedes global start t={global_start}")]
    BeforeGlobalStart { t: f64, global_start: f64 },

    /// `nearest` could not find a slot new enough; measurement time is newer
    /// than the newest buffered slot. Caller should back off and retry.
    #[error("measurement at t={t} is newer than the newest buffered slot (t={newest})")]
    TooEarly { t: f64, newest: f64 },

    /// `nearest` could not find a slot old enough; the buffer has wrapped
    /// past the slot that would have matched.
    #[error("measurement at t={t} is older than the oldest retained slot (t={oldest})")]
    TooOld { t: f64, oldest: f64 },

    /// Residual exceeded the sigma-scaled outlier threshold.
    #[error("residual norm {norm} exceeds outlier threshold {threshold}")]
    Outlier { norm: f64, threshold: f64 },

    /// Covariance or state entries became non-finite during an update; the
    /// affected slot was reverted to its pre-update snapshot.
    #[error("non-finite entries detected after update at slot {idx}, reverted")]
    NumericalFailure { idx: usize },

    /// A stored quaternion drifted outside unit-norm tolerance.
    #[error("quaternion at slot {idx} has norm {norm}, outside tolerance")]
    NonUnitQuaternion { idx: usize, norm: f64 },

    /// The visual scale L went non-positive.
    #[error("visual scale L={value} is not positive at slot {idx}")]
    NonPositiveScale { idx: usize, value: f64 },
}
