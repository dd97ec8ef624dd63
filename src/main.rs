use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::{SMatrix, SVector, UnitQuaternion, Vector3};

use fusion_core::types::{Covariance, ImuSample};
use fusion_core::{Core, FilterConfig, UpdateOutcome};

#[derive(Parser, Debug)]
#[command(name = "fusion_sim")]
#[command(about = "Synthetic IMU feed through the delayed-state fusion core", long_about = None)]
struct Args {
    /// Simulated run duration in seconds.
    #[arg(value_name = "SECONDS", default_value = "5.0")]
    duration: f64,

    /// IMU sample rate in Hz.
    #[arg(long, default_value = "100.0")]
    imu_rate_hz: f64,

    /// Delayed position-update rate in Hz (0 disables aiding updates).
    #[arg(long, default_value = "5.0")]
    update_rate_hz: f64,

    /// Fixed delay, in seconds, applied to each aiding measurement before it
    /// is handed to the core — the scenario this crate exists to exercise.
    #[arg(long, default_value = "0.2")]
    measurement_delay_s: f64,

    /// Standard deviation of the simulated position measurement, meters.
    #[arg(long, default_value = "0.1")]
    measurement_noise_std: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cfg = FilterConfig::default();
    let core = Core::new(cfg.clone());

    let dt = 1.0 / args.imu_rate_hz;
    let first_sample = ImuSample::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity));
    core.initialize(
        Vector3::zeros(),
        Vector3::zeros(),
        UnitQuaternion::identity(),
        Vector3::zeros(),
        Vector3::zeros(),
        cfg.scale_init,
        UnitQuaternion::identity(),
        UnitQuaternion::identity(),
        Vector3::zeros(),
        Covariance::identity() * 0.1,
        first_sample,
    );
    core.set_global_start(0.0)
        .context("set_global_start failed during startup, this should be unreachable")?;

    log::info!(
        "fusion_sim: duration={}s imu_rate={}Hz update_rate={}Hz delay={}s",
        args.duration,
        args.imu_rate_hz,
        args.update_rate_hz,
        args.measurement_delay_s
    );

    let steps = (args.duration * args.imu_rate_hz) as u64;
    let update_every = if args.update_rate_hz > 0.0 {
        (args.imu_rate_hz / args.update_rate_hz).round() as u64
    } else {
        0
    };

    let mut h = SMatrix::<f64, 3, 25>::zeros();
    h[(0, 0)] = 1.0;
    h[(1, 1)] = 1.0;
    h[(2, 2)] = 1.0;
    let r_noise = SMatrix::<f64, 3, 3>::identity()
        * (args.measurement_noise_std * args.measurement_noise_std);

    for i in 1..=steps {
        let t = i as f64 * dt;
        // Synthetic trajectory: gentle constant upward acceleration so the
        // run has something to observe besides noise.
        let a_true = 0.2;
        let sample = ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity + a_true));
        core.feed_imu(sample)?;

        if update_every > 0 && i % update_every == 0 {
            let t_meas = t - args.measurement_delay_s;
            if t_meas < 0.0 {
                continue;
            }
            let true_p_z = 0.5 * a_true * t_meas * t_meas;
            let z = Vector3::new(0.0, 0.0, true_p_z);

            match core.nearest(t_meas, dt) {
                Ok((_, record)) => {
                    let residual = z - record.nominal.p;
                    let r = SVector::<f64, 3>::new(residual.x, residual.y, residual.z);
                    match core.apply_measurement(t_meas, dt, h, r, r_noise) {
                        Ok(UpdateOutcome::GoodUp) => {
                            log::info!("t={t:.3} delayed update at t_meas={t_meas:.3}: GOOD_UP")
                        }
                        Ok(UpdateOutcome::FuzzyUp) => {
                            log::info!("t={t:.3} delayed update at t_meas={t_meas:.3}: FUZZY_UP")
                        }
                        Ok(UpdateOutcome::NoUp) => {}
                        Err(e) => log::warn!("t={t:.3} measurement rejected: {e}"),
                    }
                }
                Err(e) => log::warn!("t={t:.3} could not locate slot for t_meas={t_meas:.3}: {e}"),
            }
        }
    }

    let (_, latest) = core.nearest(steps as f64 * dt, dt)?;
    println!(
        "final position: ({:.4}, {:.4}, {:.4}), velocity z: {:.4}",
        latest.nominal.p.x, latest.nominal.p.y, latest.nominal.p.z, latest.nominal.v.z
    );

    Ok(())
}
