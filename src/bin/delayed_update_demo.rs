/// Diagnostic: walk through a single delayed position update by hand and
/// print the innovation, gain, and pre/post covariance trace.
///
/// Run this to see why the filter only partially pulls the nominal state
/// toward a delayed measurement instead of snapping to it — the Kalman gain
/// blends the measurement's confidence against the state's own, and with a
/// growing position covariance over the delay window the correction should
/// visibly grow too.
use nalgebra::{SMatrix, SVector, UnitQuaternion, Vector3};

use fusion_core::state::{NominalState, StateRecord};
use fusion_core::types::{Covariance, ImuSample};
use fusion_core::updater;
use fusion_core::{
    fuzzy::FuzzyMonitor,
    propagator,
    ring_buffer::{NearestResult, RingBuffer},
    FilterConfig,
};

fn main() {
    println!("=== Delayed Position Update Demo ===\n");

    let cfg = FilterConfig::default();
    let mut record = StateRecord::new(
        NominalState::identity(cfg.scale_init),
        Covariance::identity() * 0.05,
        ImuSample::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + 0.5)),
        0.0,
    );
    let mut buffer = RingBuffer::new();
    buffer.append(record.clone());

    // Propagate for 2 seconds at 50 Hz; the measurement will be timestamped
    // mid-run, arriving after the buffer has already moved well past it.
    let dt_step = 0.02;
    for i in 1..=100 {
        let t = i as f64 * dt_step;
        let sample = ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + 0.5));
        let step = propagator::propagate(&record, sample, &cfg, dt_step);
        buffer.append(step.record.clone());
        record = step.record;
    }

    let idx_delay = match buffer.nearest(1.0, dt_step) {
        NearestResult::Found(idx) => idx,
        other => {
            println!("unexpected lookup result: {other:?}");
            return;
        }
    };

    let pre = buffer.get(idx_delay).unwrap().clone();
    println!("pre-update slot {idx_delay} at t={:.3}", pre.t);
    println!(
        "  position: ({:.4}, {:.4}, {:.4})",
        pre.nominal.p.x, pre.nominal.p.y, pre.nominal.p.z
    );
    let pre_trace: f64 = pre.cov.diagonal().sum();
    println!("  covariance trace: {pre_trace:.6}");

    let mut h = SMatrix::<f64, 3, 25>::zeros();
    h[(0, 0)] = 1.0;
    h[(1, 1)] = 1.0;
    h[(2, 2)] = 1.0;
    let z = Vector3::new(0.0, 0.0, 0.4); // plausible measured altitude
    let residual_vec = z - pre.nominal.p;
    let residual = SVector::<f64, 3>::new(residual_vec.x, residual_vec.y, residual_vec.z);
    println!(
        "  measurement z=({:.4}, {:.4}, {:.4}), innovation norm={:.4}\n",
        z.x, z.y, z.z, residual.norm()
    );
    let r_noise = SMatrix::<f64, 3, 3>::identity() * 0.01;

    let mut fuzzy = FuzzyMonitor::new();
    let mut cov_consistent_idx = 0usize;
    let outcome = updater::apply_measurement(
        &mut buffer,
        &mut fuzzy,
        &mut cov_consistent_idx,
        idx_delay,
        h,
        residual,
        r_noise,
        &cfg,
    );

    match outcome {
        Ok(outcome) => {
            let post = buffer.get(idx_delay).unwrap();
            let post_trace: f64 = post.cov.diagonal().sum();
            println!("outcome: {outcome:?}");
            println!(
                "  position: ({:.4}, {:.4}, {:.4})",
                post.nominal.p.x, post.nominal.p.y, post.nominal.p.z
            );
            println!("  covariance trace: {post_trace:.6} (was {pre_trace:.6})");

            let latest = buffer.latest().unwrap().1;
            println!(
                "\nlatest slot after forward re-propagation, t={:.3}: p=({:.4}, {:.4}, {:.4})",
                latest.t, latest.nominal.p.x, latest.nominal.p.y, latest.nominal.p.z
            );
        }
        Err(e) => println!("update rejected: {e}"),
    }
}
