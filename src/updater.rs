//! Delayed measurement update: covariance fast-forward, Kalman correction in
//! Joseph form, fuzzy-tracking gate, and forward re-propagation of the mean.

use nalgebra::Vector3;

use crate::config::FilterConfig;
use crate::error::FusionError;
use crate::fuzzy::FuzzyMonitor;
use crate::propagator::{self, idx};
use crate::quaternion::inject_right;
use crate::ring_buffer::RingBuffer;
use crate::types::{KalmanGain, MeasurementJacobian, MeasurementNoise, MeasurementResidual};

/// Observability outcome of a successful update, matching the original
/// tri-state contract. `NoUp` is reserved for completeness with the
/// reference implementation's enum; every update that reaches the end of
/// this module's `apply` without an error produces `GoodUp` or `FuzzyUp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoUp,
    GoodUp,
    FuzzyUp,
}

/// Applies a delayed measurement at `idx_delay`, per §4.3. `cov_consistent_idx`
/// is the caller's current "latest covariance-consistent" cursor; on success
/// it is advanced to `idx_delay` (the fast-forward target) and the caller
/// must also treat every slot after `idx_delay` as covariance-stale again,
/// since this function rewinds the cursor back to `idx_delay` once the mean
/// has been corrected there.
#[allow(clippy::too_many_arguments)]
pub fn apply_measurement<const M: usize>(
    buffer: &mut RingBuffer,
    fuzzy: &mut FuzzyMonitor,
    cov_consistent_idx: &mut usize,
    idx_delay: usize,
    h: MeasurementJacobian<M>,
    r: MeasurementResidual<M>,
    r_noise: MeasurementNoise<M>,
    cfg: &FilterConfig,
) -> Result<UpdateOutcome, FusionError> {
    fast_forward(buffer, cov_consistent_idx, idx_delay, cfg);

    let record = buffer.get(idx_delay).expect("idx_delay must be a written slot");
    let p = record.cov;

    let s = h * p * h.transpose() + r_noise;
    let s_inv = s
        .try_inverse()
        .ok_or(FusionError::NumericalFailure { idx: idx_delay })?;
    let k: KalmanGain<M> = p * h.transpose() * s_inv;
    let correction = k * r;

    let kh = k * h;
    let i_minus_kh = crate::types::Covariance::identity() - kh;
    let mut p_new = i_minus_kh * p * i_minus_kh.transpose() + k * r_noise * k.transpose();
    p_new = 0.5 * (p_new + p_new.transpose());

    if !correction.iter().all(|x| x.is_finite()) || !p_new.iter().all(|x| x.is_finite()) {
        return Err(FusionError::NumericalFailure { idx: idx_delay });
    }

    let pre_update_record = record.clone();
    let mut nominal = pre_update_record.nominal.clone();

    nominal.p += Vector3::new(
        correction[idx::P],
        correction[idx::P + 1],
        correction[idx::P + 2],
    );
    nominal.v += Vector3::new(
        correction[idx::V],
        correction[idx::V + 1],
        correction[idx::V + 2],
    );
    nominal.b_w += Vector3::new(
        correction[idx::B_W],
        correction[idx::B_W + 1],
        correction[idx::B_W + 2],
    );
    nominal.b_a += Vector3::new(
        correction[idx::B_A],
        correction[idx::B_A + 1],
        correction[idx::B_A + 2],
    );
    nominal.l += correction[idx::L];
    nominal.p_ci += Vector3::new(
        correction[idx::P_CI],
        correction[idx::P_CI + 1],
        correction[idx::P_CI + 2],
    );

    let d_theta_iw = Vector3::new(
        correction[idx::THETA_IW],
        correction[idx::THETA_IW + 1],
        correction[idx::THETA_IW + 2],
    );
    nominal.q_iw = inject_right(nominal.q_iw, d_theta_iw);

    let d_theta_ci = Vector3::new(
        correction[idx::THETA_CI],
        correction[idx::THETA_CI + 1],
        correction[idx::THETA_CI + 2],
    );
    nominal.q_ci = inject_right(nominal.q_ci, d_theta_ci);

    let d_theta_wv = Vector3::new(
        correction[idx::THETA_WV],
        correction[idx::THETA_WV + 1],
        correction[idx::THETA_WV + 2],
    );
    let candidate_q_wv = inject_right(nominal.q_wv, d_theta_wv);

    let outcome = if fuzzy.is_fuzzy(&candidate_q_wv, cfg.fuzzy_threshold) {
        // Drift between world and vision frames is judged unobservable;
        // absorb it elsewhere and leave q_wv alone.
        UpdateOutcome::FuzzyUp
    } else {
        nominal.q_wv = candidate_q_wv;
        fuzzy.push(&nominal.q_wv);
        UpdateOutcome::GoodUp
    };

    let mut updated = pre_update_record;
    updated.nominal = nominal;
    updated.cov = p_new;
    updated.check_invariants(idx_delay)?;

    buffer.set(idx_delay, updated);
    *cov_consistent_idx = idx_delay;

    re_propagate_forward(buffer, idx_delay, cfg);

    Ok(outcome)
}

/// Walks covariance forward from `*cov_consistent_idx` to `idx_delay`,
/// re-running the covariance half of the propagation step on each
/// intervening slot using that slot's own stored IMU inputs and dt. Mean is
/// untouched.
fn fast_forward(
    buffer: &mut RingBuffer,
    cov_consistent_idx: &mut usize,
    idx_delay: usize,
    cfg: &FilterConfig,
) {
    let Some(steps) = buffer.distance_to_latest(*cov_consistent_idx) else {
        return;
    };
    let Some(target_steps) = buffer.distance_to_latest(idx_delay) else {
        return;
    };
    // idx_delay must be at or after cov_consistent_idx in logical order,
    // i.e. closer to (or at) the latest slot.
    if target_steps > steps {
        return;
    }

    let mut prev_idx = *cov_consistent_idx;
    let mut cur_idx = RingBuffer::next_idx(prev_idx);
    while buffer.distance_to_latest(cur_idx).unwrap_or(0) >= target_steps && cur_idx != prev_idx {
        let (prev_record, cur_record) = match (buffer.get(prev_idx), buffer.get(cur_idx)) {
            (Some(p), Some(c)) => (p.clone(), c.clone()),
            _ => break,
        };
        let dt = cur_record.t - prev_record.t;
        let new_cov = propagator::propagate_covariance_only(
            &prev_record.cov,
            &prev_record,
            &cur_record.imu,
            cfg,
            dt,
        );
        if let Some(slot) = buffer.get_mut(cur_idx) {
            slot.cov = new_cov;
        }
        if cur_idx == idx_delay {
            break;
        }
        prev_idx = cur_idx;
        cur_idx = RingBuffer::next_idx(cur_idx);
    }
}

/// Re-runs mean propagation from `idx_delay` forward to the latest slot,
/// leaving each slot's stored covariance untouched (it is now stale again,
/// to be caught up by the next fast-forward).
fn re_propagate_forward(buffer: &mut RingBuffer, idx_delay: usize, cfg: &FilterConfig) {
    let Some(mut remaining) = buffer.distance_to_latest(idx_delay) else {
        return;
    };
    let mut prev_idx = idx_delay;
    while remaining > 0 {
        let cur_idx = RingBuffer::next_idx(prev_idx);
        let (prev_record, cur_record) = match (buffer.get(prev_idx), buffer.get(cur_idx)) {
            (Some(p), Some(c)) => (p.clone(), c.clone()),
            _ => break,
        };
        let dt = cur_record.t - prev_record.t;
        let (nominal_new, _, _) =
            propagator::propagate_mean(&prev_record.nominal, &prev_record.imu, &cur_record.imu, cfg, dt);
        if let Some(slot) = buffer.get_mut(cur_idx) {
            slot.nominal = nominal_new;
        }
        prev_idx = cur_idx;
        remaining -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NominalState, StateRecord};
    use crate::types::{Covariance, ImuSample};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, SMatrix, SVector};

    fn seed_buffer(cfg: &FilterConfig, n: usize) -> RingBuffer {
        let mut buffer = RingBuffer::new();
        let mut record = StateRecord::new(
            NominalState::identity(cfg.scale_init),
            Covariance::identity() * 0.1,
            ImuSample::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + 1.0)),
            0.0,
        );
        buffer.append(record.clone());
        for i in 1..n {
            let t = i as f64 * 0.1;
            let sample = ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + 1.0));
            let step = crate::propagator::propagate(&record, sample, cfg, 0.1);
            buffer.append(step.record.clone());
            record = step.record;
        }
        buffer
    }

    #[test]
    fn good_update_shrinks_covariance_and_pulls_position() {
        let cfg = FilterConfig::default();
        let mut buffer = seed_buffer(&cfg, 11); // t = 0.0 .. 1.0 at dt=0.1
        let mut fuzzy = FuzzyMonitor::new();
        let mut cov_consistent_idx = 0usize;
        let idx_delay = buffer.latest_idx().unwrap();

        let pre_trace: f64 = buffer.get(idx_delay).unwrap().cov.diagonal().sum();

        let mut h = SMatrix::<f64, 3, 25>::zeros();
        h[(0, idx::P)] = 1.0;
        h[(1, idx::P + 1)] = 1.0;
        h[(2, idx::P + 2)] = 1.0;
        let z = Vector3::new(0.0, 0.0, 0.4);
        let pre_p = buffer.get(idx_delay).unwrap().nominal.p;
        let r_vec = z - pre_p;
        let r_mat = Matrix3::identity() * 0.01;

        let outcome = apply_measurement(
            &mut buffer,
            &mut fuzzy,
            &mut cov_consistent_idx,
            idx_delay,
            h,
            SVector::<f64, 3>::new(r_vec.x, r_vec.y, r_vec.z),
            r_mat,
            &cfg,
        )
        .unwrap();

        assert_eq!(outcome, UpdateOutcome::GoodUp);
        let post_trace: f64 = buffer.get(idx_delay).unwrap().cov.diagonal().sum();
        assert!(post_trace <= pre_trace + 1e-9);

        let post_p = buffer.get(idx_delay).unwrap().nominal.p;
        assert!((post_p.z - pre_p.z).abs() > 1e-9);
        // Partial pull toward the measurement, not a full snap: z.z < post < pre.z
        assert!(post_p.z > z.z);
        assert!(post_p.z < pre_p.z);
    }

    #[test]
    fn zero_innovation_leaves_mean_unchanged_and_shrinks_covariance() {
        let cfg = FilterConfig::default();
        let mut buffer = seed_buffer(&cfg, 5);
        let mut fuzzy = FuzzyMonitor::new();
        let mut cov_consistent_idx = 0usize;
        let idx_delay = buffer.latest_idx().unwrap();

        let pre_p = buffer.get(idx_delay).unwrap().nominal.p;
        let pre_trace: f64 = buffer.get(idx_delay).unwrap().cov.diagonal().sum();

        let mut h = SMatrix::<f64, 3, 25>::zeros();
        h[(0, idx::P)] = 1.0;
        h[(1, idx::P + 1)] = 1.0;
        h[(2, idx::P + 2)] = 1.0;
        let r_mat = Matrix3::identity() * 0.01;

        apply_measurement(
            &mut buffer,
            &mut fuzzy,
            &mut cov_consistent_idx,
            idx_delay,
            h,
            SVector::<f64, 3>::zeros(),
            r_mat,
            &cfg,
        )
        .unwrap();

        let post_p = buffer.get(idx_delay).unwrap().nominal.p;
        let post_trace: f64 = buffer.get(idx_delay).unwrap().cov.diagonal().sum();
        assert_relative_eq!(post_p.x, pre_p.x, epsilon = 1e-9);
        assert_relative_eq!(post_p.y, pre_p.y, epsilon = 1e-9);
        assert_relative_eq!(post_p.z, pre_p.z, epsilon = 1e-9);
        assert!(post_trace <= pre_trace + 1e-9);
    }
}
