//! The filter core: ring buffer, propagator, and delayed updater behind a
//! single exclusive lock, per §5's concurrency envelope.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use nalgebra::{UnitQuaternion, Vector3};

use crate::config::FilterConfig;
use crate::error::FusionError;
use crate::fuzzy::FuzzyMonitor;
use crate::imu_cache::ImuInputCache;
use crate::propagator;
use crate::ring_buffer::{NearestResult, RingBuffer};
use crate::state::{NominalState, StateRecord};
use crate::types::{Covariance, ImuSample, MeasurementJacobian, MeasurementNoise, MeasurementResidual};
use crate::updater::{self, UpdateOutcome};

struct Inner {
    buffer: RingBuffer,
    imu_cache: ImuInputCache,
    fuzzy: FuzzyMonitor,
    cov_consistent_idx: usize,
    last_dt: f64,
    /// Number of slots written by initialization / the propagator's first
    /// append. `set_global_start` is legal only while this is exactly 1.
    state_count: u64,
    any_imu_seen: bool,
    global_start: Option<f64>,
}

/// The delayed-state filter core. All mutation happens under one mutex,
/// matching §5: the propagator holds it for an entire IMU step, the updater
/// holds it across lookup, fast-forward, update, and re-propagation, and
/// releases it only for the TOO_EARLY retry's sleep.
pub struct Core {
    inner: Mutex<Inner>,
    cfg: FilterConfig,
}

impl Core {
    pub fn new(cfg: FilterConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: RingBuffer::new(),
                imu_cache: ImuInputCache::new(),
                fuzzy: FuzzyMonitor::new(),
                cov_consistent_idx: 0,
                last_dt: 0.01,
                state_count: 0,
                any_imu_seen: false,
                global_start: None,
            }),
            cfg,
        }
    }

    /// Seeds slot 0 from the initial self-calibration estimate and the first
    /// IMU sample. Slot 0's time is a placeholder until `set_global_start`
    /// rewrites it. Legal exactly once, before any other slot is written.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        &self,
        p: Vector3<f64>,
        v: Vector3<f64>,
        q_iw: UnitQuaternion<f64>,
        b_w: Vector3<f64>,
        b_a: Vector3<f64>,
        l: f64,
        q_wv: UnitQuaternion<f64>,
        q_ci: UnitQuaternion<f64>,
        p_ci: Vector3<f64>,
        cov0: Covariance,
        first_imu: ImuSample,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let nominal = NominalState {
            p,
            v,
            q_iw,
            b_w,
            b_a,
            l,
            q_wv,
            q_ci,
            p_ci,
        };
        let record = StateRecord::new(nominal, cov0, first_imu, 0.0);
        inner.buffer.append(record);
        inner.state_count = 1;
        inner.any_imu_seen = true;
        log::info!("core initialized, slot 0 written");
    }

    /// Legal only once, after exactly one slot has been written and at least
    /// one IMU sample has been observed. The "no IMU yet" case is
    /// recoverable; calling this after the filter has already progressed
    /// past its first slot is the one fatal lifecycle violation named in the
    /// error handling design and aborts the process.
    pub fn set_global_start(&self, t: f64) -> Result<(), FusionError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.any_imu_seen {
            log::warn!("set_global_start called before any IMU input arrived");
            return Err(FusionError::NotReady);
        }
        if inner.state_count != 1 {
            log::error!(
                "set_global_start called with state_count={}, fatal lifecycle violation",
                inner.state_count
            );
            std::process::exit(1);
        }
        inner.global_start = Some(t);
        if let Some(slot) = inner.buffer.get_mut(0) {
            slot.t = t;
        }
        log::info!("global start set to t={t}");
        Ok(())
    }

    /// Feeds one IMU sample. Before initialization, samples are collected in
    /// the ring-overwriting IMU-input cache; afterward each sample advances
    /// the propagator by one step.
    pub fn feed_imu(&self, sample: ImuSample) -> Result<(), FusionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.any_imu_seen = true;

        if inner.buffer.is_empty() {
            inner.imu_cache.push(sample);
            return Ok(());
        }

        let (prev_idx, prev) = inner.buffer.latest().expect("buffer non-empty");
        if sample.t < prev.t {
            log::warn!("dropping out-of-order IMU sample at t={}", sample.t);
            return Ok(());
        }
        let prev = prev.clone();

        let step = propagator::propagate(&prev, sample, &self.cfg, inner.last_dt);
        let next_idx = RingBuffer::next_idx(prev_idx);
        step.record.check_invariants(next_idx)?;

        inner.last_dt = step.dt_used;
        inner.buffer.append(step.record);
        inner.state_count += 1;
        log::debug!("propagated IMU step, dt={}", inner.last_dt);
        Ok(())
    }

    /// Read path: locates the buffer slot nearest `t` within `tolerance` and
    /// returns an owned snapshot (never a reference retained across the lock
    /// release).
    pub fn nearest(&self, t: f64, tolerance: f64) -> Result<(usize, StateRecord), FusionError> {
        let inner = self.inner.lock().unwrap();
        match inner.buffer.nearest(t, tolerance) {
            NearestResult::Found(idx) => {
                let record = inner.buffer.get(idx).expect("found index must exist").clone();
                Ok((idx, record))
            }
            NearestResult::TooEarly => {
                let newest = inner.buffer.latest().map(|(_, r)| r.t).unwrap_or(f64::NEG_INFINITY);
                Err(FusionError::TooEarly { t, newest })
            }
            NearestResult::TooOld => {
                let oldest = oldest_retained_time(&inner.buffer).unwrap_or(f64::INFINITY);
                Err(FusionError::TooOld { t, oldest })
            }
        }
    }

    /// Samples from the IMU-input cache bracketing `[t_start, t_end]`, for
    /// aiding sensor modules that need raw pre-alignment samples.
    pub fn imu_cache_between(&self, t_start: f64, t_end: f64) -> Vec<ImuSample> {
        let inner = self.inner.lock().unwrap();
        inner.imu_cache.between(t_start, t_end)
    }

    /// Write path: applies a delayed measurement referenced to `t_meas`. On
    /// `TooEarly` the caller is expected to back off and retry (see
    /// `apply_measurement_with_retry` for the canonical retry loop); this
    /// method itself never sleeps or retries.
    pub fn apply_measurement<const M: usize>(
        &self,
        t_meas: f64,
        tolerance: f64,
        h: MeasurementJacobian<M>,
        r: MeasurementResidual<M>,
        r_noise: MeasurementNoise<M>,
    ) -> Result<UpdateOutcome, FusionError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.buffer.is_empty() {
            return Err(FusionError::NotReady);
        }
        if let Some(global_start) = inner.global_start {
            if t_meas < global_start {
                log::warn!("measurement at t={t_meas} precedes global start t={global_start}");
                return Err(FusionError::BeforeGlobalStart { t: t_meas, global_start });
            }
        }

        let idx_delay = match inner.buffer.nearest(t_meas, tolerance) {
            NearestResult::Found(idx) => idx,
            NearestResult::TooEarly => {
                let newest = inner.buffer.latest().map(|(_, r)| r.t).unwrap_or(f64::NEG_INFINITY);
                log::warn!("measurement at t={t_meas} is TOO_EARLY (newest={newest})");
                return Err(FusionError::TooEarly { t: t_meas, newest });
            }
            NearestResult::TooOld => {
                let oldest = oldest_retained_time(&inner.buffer).unwrap_or(f64::INFINITY);
                log::warn!("measurement at t={t_meas} is TOO_OLD (oldest={oldest})");
                return Err(FusionError::TooOld { t: t_meas, oldest });
            }
        };

        let Inner {
            ref mut buffer,
            ref mut fuzzy,
            ref mut cov_consistent_idx,
            ..
        } = *inner;

        let outcome = updater::apply_measurement(
            buffer,
            fuzzy,
            cov_consistent_idx,
            idx_delay,
            h,
            r,
            r_noise,
            &self.cfg,
        )?;
        match outcome {
            UpdateOutcome::GoodUp => log::info!("measurement applied at idx={idx_delay}: GOOD_UP"),
            UpdateOutcome::FuzzyUp => log::info!("measurement applied at idx={idx_delay}: FUZZY_UP"),
            UpdateOutcome::NoUp => {}
        }
        Ok(outcome)
    }

    /// Retries a TOO_EARLY measurement with the configured backoff, sleeping
    /// outside the lock between attempts, until it resolves or `cancelled`
    /// reports true.
    pub fn apply_measurement_with_retry<const M: usize>(
        &self,
        t_meas: f64,
        tolerance: f64,
        h: MeasurementJacobian<M>,
        r: MeasurementResidual<M>,
        r_noise: MeasurementNoise<M>,
        cancelled: impl Fn() -> bool,
    ) -> Result<UpdateOutcome, FusionError> {
        loop {
            match self.apply_measurement(t_meas, tolerance, h, r, r_noise) {
                Err(FusionError::TooEarly { .. }) if !cancelled() => {
                    thread::sleep(Duration::from_millis(self.cfg.retry_backoff_ms));
                }
                other => return other,
            }
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.cfg
    }
}

fn oldest_retained_time(buffer: &RingBuffer) -> Option<f64> {
    let (latest, _) = buffer.latest()?;
    let mut oldest = latest;
    for step in 1..crate::ring_buffer::CAPACITY {
        let candidate = (latest as isize - step as isize).rem_euclid(crate::ring_buffer::CAPACITY as isize) as usize;
        if buffer.get(candidate).is_some() {
            oldest = candidate;
        } else {
            break;
        }
    }
    buffer.get(oldest).map(|r| r.t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::SMatrix;

    fn make_core() -> Core {
        let cfg = FilterConfig::default();
        let core = Core::new(cfg.clone());
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
            ImuSample::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, cfg.gravity)),
        );
        core
    }

    #[test]
    fn set_global_start_before_imu_is_recoverable_not_fatal() {
        let cfg = FilterConfig::default();
        let core = Core::new(cfg);
        // No IMU has been observed and no slot written: NotReady, not fatal.
        assert_eq!(core.set_global_start(0.0), Err(FusionError::NotReady));
    }

    #[test]
    fn scenario_static_propagation_holds_position() {
        let core = make_core();
        core.set_global_start(0.0).unwrap();
        for i in 1..=10 {
            let t = i as f64 * 0.01;
            core.feed_imu(ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, core.config().gravity)))
                .unwrap();
        }
        let (_, record) = core.nearest(0.1, 0.001).unwrap();
        assert!(record.nominal.p.norm() < 1e-9);
        assert!(record.nominal.v.norm() < 1e-9);
    }

    #[test]
    fn too_early_measurement_is_rejected_without_mutating_state() {
        let core = make_core();
        core.set_global_start(0.0).unwrap();
        core.feed_imu(ImuSample::new(0.01, Vector3::zeros(), Vector3::new(0.0, 0.0, core.config().gravity)))
            .unwrap();

        let h = SMatrix::<f64, 3, 25>::zeros();
        let r = nalgebra::SVector::<f64, 3>::zeros();
        let rn = SMatrix::<f64, 3, 3>::identity();
        let result = core.apply_measurement(100.0, 0.01, h, r, rn);
        assert!(matches!(result, Err(FusionError::TooEarly { .. })));
    }

    #[test]
    fn too_old_measurement_is_rejected_after_wraparound() {
        let core = make_core();
        core.set_global_start(0.0).unwrap();
        for i in 1..=(crate::ring_buffer::CAPACITY + 5) {
            let t = i as f64 * 0.01;
            core.feed_imu(ImuSample::new(t, Vector3::zeros(), Vector3::new(0.0, 0.0, core.config().gravity)))
                .unwrap();
        }
        let h = SMatrix::<f64, 3, 25>::zeros();
        let r = nalgebra::SVector::<f64, 3>::zeros();
        let rn = SMatrix::<f64, 3, 3>::identity();
        let result = core.apply_measurement(0.0, 0.001, h, r, rn);
        assert!(matches!(result, Err(FusionError::TooOld { .. })));
    }
}
