//! Outlier-rejection and measurement-noise scaling helpers consumed by
//! aiding-sensor call sites before they hand a measurement to
//! [`crate::updater::apply_measurement`].
//!
//! The core's update path is agnostic to sensor type; it is handed an
//! already-built Jacobian/residual/noise triple and a decision whether to
//! apply it. These helpers implement the specific decision a delayed
//! position/attitude sensor (vision pose, GPS) uses: widen the measurement
//! noise when it is implausibly tighter than the state's own uncertainty, and
//! reject a residual that is too large relative to the combined
//! state-plus-measurement spread.

use nalgebra::SVector;

use crate::config::FilterConfig;
use crate::error::FusionError;

/// Widens `measurement_var` up to `state_var / ratio` when the sensor claims
/// a variance far tighter than the state's own uncertainty supports. Guards
/// against a misbehaving sensor driver asserting an unrealistically small
/// covariance and dominating the update.
pub fn variance_adjusted_noise(state_var: f64, measurement_var: f64, ratio: f64) -> f64 {
    if state_var > measurement_var * ratio {
        state_var / ratio
    } else {
        measurement_var
    }
}

/// Rejects a residual whose norm is large relative to the combined
/// state-and-measurement standard deviation, scaled by `sigma_distance_scale`.
/// Returns `Err(FusionError::Outlier)` when the measurement should be
/// dropped, `Ok(())` when it should proceed to `apply_measurement`.
pub fn check_residual_outlier<const M: usize>(
    residual: &SVector<f64, M>,
    state_std_dev: f64,
    measurement_std_dev: f64,
    cfg: &FilterConfig,
) -> Result<(), FusionError> {
    let sigma_distance = cfg.sigma_distance_scale * (state_std_dev + measurement_std_dev);
    let norm = residual.norm();
    if norm > sigma_distance {
        Err(FusionError::Outlier {
            norm,
            threshold: sigma_distance,
        })
    } else {
        Ok(())
    }
}

/// Average of the diagonal covariance entries `[first, first+dim)`, the
/// per-block variance figure the outlier checks above compare against. A
/// thin wrapper kept separate from `check_residual_outlier` since call sites
/// typically pull this straight out of a fetched `StateRecord`'s covariance
/// before deciding whether to even build the full Jacobian.
pub fn diagonal_variance_avg(cov: &crate::types::Covariance, first: usize, dim: usize) -> f64 {
    let mut sum = 0.0;
    for i in first..first + dim {
        sum += cov[(i, i)];
    }
    sum / dim as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Covariance;
    use nalgebra::Vector3;

    #[test]
    fn variance_widened_when_measurement_implausibly_tight() {
        let widened = variance_adjusted_noise(9.0, 0.01, 9.0);
        assert!((widened - 1.0).abs() < 1e-12);
    }

    #[test]
    fn variance_untouched_when_plausible() {
        let kept = variance_adjusted_noise(0.01, 0.04, 9.0);
        assert!((kept - 0.04).abs() < 1e-12);
    }

    #[test]
    fn large_residual_is_flagged_outlier() {
        let cfg = FilterConfig::default();
        let residual = Vector3::new(10.0, 10.0, 10.0);
        let result = check_residual_outlier(&residual, 0.01, 0.01, &cfg);
        assert!(matches!(result, Err(FusionError::Outlier { .. })));
    }

    #[test]
    fn small_residual_passes() {
        let cfg = FilterConfig::default();
        let residual = Vector3::new(0.001, -0.001, 0.0005);
        let result = check_residual_outlier(&residual, 0.05, 0.05, &cfg);
        assert!(result.is_ok());
    }

    #[test]
    fn diagonal_variance_avg_reads_correct_block() {
        let mut cov = Covariance::identity();
        cov[(3, 3)] = 2.0;
        cov[(4, 4)] = 4.0;
        cov[(5, 5)] = 6.0;
        let avg = diagonal_variance_avg(&cov, 3, 3);
        assert!((avg - 4.0).abs() < 1e-12);
    }
}
