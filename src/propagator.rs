//! IMU-driven strapdown propagation of the nominal state and the
//! discrete-time error-state covariance.

use nalgebra::{Matrix3, Vector3};

use crate::config::FilterConfig;
use crate::quaternion::integrate_rate;
use crate::state::{NominalState, StateRecord};
use crate::types::{Covariance, ImuSample, ProcessMatrix, ERROR_STATE_DIM};

/// Error-state index offsets, matching [δp, δv, δθ_iw, δb_w, δb_a, δL, δθ_wv,
/// δθ_ci, δp_ci].
pub(crate) mod idx {
    pub const P: usize = 0;
    pub const V: usize = 3;
    pub const THETA_IW: usize = 6;
    pub const B_W: usize = 9;
    pub const B_A: usize = 12;
    pub const L: usize = 15;
    pub const THETA_WV: usize = 16;
    pub const THETA_CI: usize = 19;
    pub const P_CI: usize = 22;
}

fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

fn set_block(m: &mut ProcessMatrix, row: usize, col: usize, block: Matrix3<f64>) {
    for r in 0..3 {
        for c in 0..3 {
            m[(row + r, col + c)] = block[(r, c)];
        }
    }
}

/// Result of one propagation step: the new record plus the dt actually used
/// (becomes `last_dt` for the following call when the next sample's dt is
/// out of the sane-step bound).
pub struct PropagationStep {
    pub record: StateRecord,
    pub dt_used: f64,
}

/// Advances `prev` by one IMU sample, per §4.2: dt sanity check,
/// median-of-endpoints mean integration, F_d/Q_d construction, Joseph-adjacent
/// (F P F^T + Q, symmetrized) covariance update.
pub fn propagate(
    prev: &StateRecord,
    sample: ImuSample,
    cfg: &FilterConfig,
    last_dt: f64,
) -> PropagationStep {
    let raw_dt = sample.t - prev.t;
    let dt = if raw_dt <= 0.0 || raw_dt > cfg.max_sane_dt {
        log::warn!(
            "propagator: dt={raw_dt} out of sane bound (0, {}], reusing last_dt={last_dt}",
            cfg.max_sane_dt
        );
        last_dt
    } else {
        raw_dt
    };

    let record = propagate_with_dt(prev, sample, cfg, dt);
    PropagationStep {
        record,
        dt_used: dt,
    }
}

/// The propagation math itself, given an explicit `dt` rather than deriving
/// one from `sample.t - prev.t` and applying the sane-step substitution.
/// Exposed separately so the zero-dt idempotence law can be checked against
/// the integration formulas directly.
pub fn propagate_with_dt(
    prev: &StateRecord,
    sample: ImuSample,
    cfg: &FilterConfig,
    dt: f64,
) -> StateRecord {
    let (nominal_new, r_wi, accel_bar) = propagate_mean(&prev.nominal, &prev.imu, &sample, cfg, dt);

    let f_d = build_f_d(r_wi, accel_bar, dt);
    let q_d = build_q_d(cfg, dt);

    let mut cov_new = f_d * prev.cov * f_d.transpose() + q_d;
    symmetrize(&mut cov_new);

    StateRecord::new(nominal_new, cov_new, sample, prev.t + dt)
}

/// The mean-only half of a propagation step: median-of-endpoints strapdown
/// integration of position, velocity, and attitude. Also returns the
/// midpoint world<-imu rotation and averaged specific force, since the
/// covariance construction needs the same linearization point. Used both by
/// `propagate_with_dt` and by the delayed updater's forward re-propagation
/// pass, which re-runs the mean but leaves covariance untouched.
pub fn propagate_mean(
    prev_nominal: &NominalState,
    prev_imu: &ImuSample,
    sample: &ImuSample,
    cfg: &FilterConfig,
    dt: f64,
) -> (NominalState, Matrix3<f64>, Vector3<f64>) {
    let omega_bar = 0.5 * ((prev_imu.w_m - prev_nominal.b_w) + (sample.w_m - prev_nominal.b_w));
    let accel_bar = 0.5 * ((prev_imu.a_m - prev_nominal.b_a) + (sample.a_m - prev_nominal.b_a));

    let q_mid = integrate_rate(prev_nominal.q_iw, omega_bar, dt * 0.5);
    let q_new = integrate_rate(prev_nominal.q_iw, omega_bar, dt);

    // a_world = R_wi * a_body, R_wi (imu->world) is the transpose of the
    // world->imu rotation matrix built from q_iw.
    let r_wi = q_mid.to_rotation_matrix().into_inner().transpose();
    let a_world = r_wi * accel_bar;
    let a_net = a_world - Vector3::new(0.0, 0.0, cfg.gravity);

    let v_new = prev_nominal.v + a_net * dt;
    let p_new = prev_nominal.p + 0.5 * (prev_nominal.v + v_new) * dt;

    let nominal_new = NominalState {
        p: p_new,
        v: v_new,
        q_iw: q_new,
        b_w: prev_nominal.b_w,
        b_a: prev_nominal.b_a,
        l: prev_nominal.l,
        q_wv: prev_nominal.q_wv,
        q_ci: prev_nominal.q_ci,
        p_ci: prev_nominal.p_ci,
    };

    (nominal_new, r_wi, accel_bar)
}

/// Re-runs only the covariance half of a propagation step, for the delayed
/// updater's fast-forward pass (mean is not touched there).
pub fn propagate_covariance_only(
    cov: &Covariance,
    prev_record: &StateRecord,
    next_sample: &ImuSample,
    cfg: &FilterConfig,
    dt: f64,
) -> Covariance {
    let (_, r_wi, accel_bar) =
        propagate_mean(&prev_record.nominal, &prev_record.imu, next_sample, cfg, dt);

    let f_d = build_f_d(r_wi, accel_bar, dt);
    let q_d = build_q_d(cfg, dt);
    let mut cov_new = f_d * cov * f_d.transpose() + q_d;
    symmetrize(&mut cov_new);
    cov_new
}

fn build_f_d(r_wi: Matrix3<f64>, accel_bar: Vector3<f64>, dt: f64) -> ProcessMatrix {
    let mut f = ProcessMatrix::identity();

    set_block(&mut f, idx::P, idx::V, Matrix3::identity() * dt);
    set_block(&mut f, idx::V, idx::THETA_IW, -r_wi * skew(accel_bar) * dt);
    set_block(&mut f, idx::V, idx::B_A, -r_wi * dt);
    set_block(&mut f, idx::THETA_IW, idx::B_W, -Matrix3::identity() * dt);

    f
}

fn build_q_d(cfg: &FilterConfig, dt: f64) -> ProcessMatrix {
    let mut q = ProcessMatrix::zeros();

    let accel_var = cfg.sigma_accel * cfg.sigma_accel;
    let gyro_var = cfg.sigma_gyro * cfg.sigma_gyro;
    let bw_var = cfg.sigma_bw * cfg.sigma_bw;
    let ba_var = cfg.sigma_ba * cfg.sigma_ba;

    let q_pos = accel_var * dt.powi(3) / 3.0;
    let q_vel = accel_var * dt;
    let q_theta = gyro_var * dt;
    let q_bw = bw_var * dt;
    let q_ba = ba_var * dt;

    for i in 0..3 {
        q[(idx::P + i, idx::P + i)] = q_pos;
        q[(idx::V + i, idx::V + i)] = q_vel;
        q[(idx::THETA_IW + i, idx::THETA_IW + i)] = q_theta;
        q[(idx::B_W + i, idx::B_W + i)] = q_bw;
        q[(idx::B_A + i, idx::B_A + i)] = q_ba;
    }
    // Scale, q_wv, q_ci, p_ci are held constant by the process model (§4.2);
    // no process noise is injected into those blocks.

    q
}

fn symmetrize(cov: &mut Covariance) {
    let sym = 0.5 * (*cov + cov.transpose());
    *cov = sym;
}

pub const STATE_DIM: usize = ERROR_STATE_DIM;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImuSample;
    use approx::assert_relative_eq;

    fn initial_record(a_z: f64) -> StateRecord {
        StateRecord::new(
            NominalState::identity(1.0),
            Covariance::identity() * 1e-6,
            ImuSample::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, a_z)),
            0.0,
        )
    }

    #[test]
    fn stationary_accel_leaves_state_at_rest() {
        let cfg = FilterConfig::default();
        let mut record = initial_record(cfg.gravity);
        let mut last_dt = 0.01;
        for i in 1..=10 {
            let t = i as f64 * 0.01;
            let sample = ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity));
            let step = propagate(&record, sample, &cfg, last_dt);
            last_dt = step.dt_used;
            record = step.record;
        }
        assert_relative_eq!(record.nominal.p.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(record.nominal.p.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(record.nominal.p.z, 0.0, epsilon = 1e-9);
        assert_relative_eq!(record.nominal.v.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn accelerating_upward_matches_kinematics() {
        let cfg = FilterConfig::default();
        let mut record = initial_record(cfg.gravity + 1.0);
        let mut last_dt = 0.01;
        for i in 1..=100 {
            let t = i as f64 * 0.01;
            let sample = ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + 1.0));
            let step = propagate(&record, sample, &cfg, last_dt);
            last_dt = step.dt_used;
            record = step.record;
        }
        assert_relative_eq!(record.nominal.v.z, 1.0, epsilon = 1e-6);
        assert_relative_eq!(record.nominal.p.z, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn zero_dt_is_idempotent() {
        let cfg = FilterConfig::default();
        let record = initial_record(cfg.gravity);
        let sample = ImuSample::new(0.0, Vector3::new(0.2, -0.1, 0.05), Vector3::new(0.1, 0.2, cfg.gravity));
        let next = propagate_with_dt(&record, sample, &cfg, 0.0);
        assert_eq!(next.nominal.p, record.nominal.p);
        assert_eq!(next.nominal.v, record.nominal.v);
        assert_eq!(next.nominal.q_iw, record.nominal.q_iw);
        assert_eq!(next.cov, record.cov);
    }

    #[test]
    fn covariance_stays_symmetric() {
        let cfg = FilterConfig::default();
        let record = initial_record(cfg.gravity);
        let sample = ImuSample::new(0.01, Vector3::new(0.1, -0.2, 0.05), Vector3::new(0.3, 0.1, cfg.gravity));
        let step = propagate(&record, sample, &cfg, 0.01);
        let diff = step.record.cov - step.record.cov.transpose();
        let max_asym = diff.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
        assert!(max_asym < 1e-12);
    }
}
