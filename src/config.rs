//! Runtime-tunable parameters for the fusion core.
//!
//! Flat, `Default`-backed configuration struct in the style of the sensor
//! fusion layer this crate descends from. Fields are grouped by the
//! subsystem that consumes them; most are read only at initialization or on
//! reconfiguration and then treated as read-only by the propagator and
//! updater for the remainder of a run.

#[derive(Clone, Debug)]
pub struct FilterConfig {
    // ── Initial self-calibration seeds ──
    pub scale_init: f64,

    // ── Process noise densities (continuous-time, scaled by dt at each step) ──
    pub sigma_gyro: f64,
    pub sigma_accel: f64,
    pub sigma_bw: f64,
    pub sigma_ba: f64,

    // ── Propagator sanity bound ──
    /// Largest dt (seconds) accepted as a genuine IMU step; larger gaps
    /// reuse the previous dt instead of integrating over the full gap.
    pub max_sane_dt: f64,

    // ── Fuzzy-tracking / observability monitor ──
    pub fuzzy_threshold: f64,

    // ── Outlier rejection (consumed by sensor modules, not the core itself) ──
    pub max_state_measurement_variance_ratio: f64,
    pub sigma_distance_scale: f64,

    // ── Concurrency envelope ──
    /// Sleep duration, outside the core lock, before retrying a TOO_EARLY
    /// measurement.
    pub retry_backoff_ms: u64,

    // ── Gravity ──
    pub gravity: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            scale_init: 1.0,

            sigma_gyro: 0.013,
            sigma_accel: 0.083,
            sigma_bw: 0.0013,
            sigma_ba: 0.0083,

            max_sane_dt: 0.1,

            fuzzy_threshold: 0.1,

            max_state_measurement_variance_ratio: 9.0,
            sigma_distance_scale: 3.0,

            retry_backoff_ms: 100,

            gravity: 9.81,
        }
    }
}
