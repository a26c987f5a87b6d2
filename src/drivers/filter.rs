#[allow(unused_imports)]
use micromath::F32Ext;
use thiserror::Error;

use crate::config::{FilterConfig, FilterKind};
use crate::drivers::kalman::KalmanFilter3D;
use crate::fmt::log_debug;
use crate::state::FilteredPose;

// ── Constants ────────────────────────────────────────────────────────────────

/// Lower bound on every stored variance component.
pub const VARIANCE_FLOOR: f32 = 1e-6;
/// Upper bound, keeps a long run of rejected samples from reaching infinity.
pub const VARIANCE_CEILING: f32 = 1e6;
/// Variance growth applied on every rejected sample.
const OUTLIER_VARIANCE_GROWTH: f32 = 1.5;

#[inline]
pub(crate) fn bound_variance(v: f32) -> f32 {
    v.clamp(VARIANCE_FLOOR, VARIANCE_CEILING)
}

#[inline]
fn all_finite(v: &[f32; 3]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[derive(Clone, Copy, Debug, PartialEq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    #[error("filter alpha must be in (0, 1] (got {0})")]
    InvalidAlpha(f32),
}

/// Temporal smoothing of a 3D target position.
///
/// Implementations never panic on bad samples: non-finite measurements are
/// handled as outliers and leave the position estimate untouched.
pub trait PoseFilter {
    fn update(
        &mut self,
        measurement: [f32; 3],
        measurement_variance: [f32; 3],
        timestamp: f32,
    ) -> FilteredPose;

    fn reset(&mut self);

    fn is_initialized(&self) -> bool;
}

// ── Exponential smoother ─────────────────────────────────────────────────────

/// Exponential moving average with Mahalanobis outlier gating and a smoothed
/// finite-difference velocity.
pub struct ExpSmoother {
    alpha: f32,
    outlier_threshold: f32,
    initial_variance: f32,
    state: [f32; 3],
    variance: [f32; 3],
    velocity: [f32; 3],
    last_timestamp: f32,
    initialized: bool,
}

impl ExpSmoother {
    pub fn new(alpha: f32, outlier_threshold: f32, initial_variance: f32) -> Result<Self, FilterError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(FilterError::InvalidAlpha(alpha));
        }
        Ok(Self {
            alpha,
            outlier_threshold,
            initial_variance: bound_variance(initial_variance),
            state: [0.0; 3],
            variance: [0.0; 3],
            velocity: [0.0; 3],
            last_timestamp: 0.0,
            initialized: false,
        })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        Self::new(config.alpha, config.outlier_threshold, config.initial_variance)
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Normalised distance between `measurement` and the current estimate.
    pub fn mahalanobis(&self, measurement: &[f32; 3]) -> f32 {
        let mut d2 = 0.0f32;
        for i in 0..3 {
            let e = measurement[i] - self.state[i];
            d2 += e * e / self.variance[i].max(VARIANCE_FLOOR);
        }
        d2.sqrt()
    }

    fn output(&self, timestamp: f32) -> FilteredPose {
        FilteredPose {
            position: self.state,
            variance: self.variance,
            velocity: self.velocity,
            is_valid: self.initialized,
            timestamp,
        }
    }
}

impl PoseFilter for ExpSmoother {
    fn update(
        &mut self,
        measurement: [f32; 3],
        measurement_variance: [f32; 3],
        timestamp: f32,
    ) -> FilteredPose {
        let finite = all_finite(&measurement) && all_finite(&measurement_variance);

        if !self.initialized {
            if !finite {
                return FilteredPose { timestamp, ..FilteredPose::default() };
            }
            self.state = measurement;
            self.variance = [self.initial_variance; 3];
            self.velocity = [0.0; 3];
            self.last_timestamp = timestamp;
            self.initialized = true;
            return self.output(timestamp);
        }

        if !finite || self.mahalanobis(&measurement) > self.outlier_threshold {
            for v in self.variance.iter_mut() {
                *v = bound_variance(*v * OUTLIER_VARIANCE_GROWTH);
            }
            log_debug!("pose sample rejected at t={}", timestamp);
            return self.output(timestamp);
        }

        let a = self.alpha;
        let dt = timestamp - self.last_timestamp;
        if dt > 0.0 {
            for i in 0..3 {
                let inst = (measurement[i] - self.state[i]) / dt;
                self.velocity[i] = a * inst + (1.0 - a) * self.velocity[i];
            }
        }
        for i in 0..3 {
            self.state[i] = a * measurement[i] + (1.0 - a) * self.state[i];
            self.variance[i] =
                bound_variance(a * measurement_variance[i] + (1.0 - a) * self.variance[i]);
        }
        self.last_timestamp = timestamp;
        self.output(timestamp)
    }

    fn reset(&mut self) {
        self.state = [0.0; 3];
        self.variance = [0.0; 3];
        self.velocity = [0.0; 3];
        self.last_timestamp = 0.0;
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

// ── Config-selected strategy ─────────────────────────────────────────────────

/// Whichever filter the configuration asked for.
pub enum AnyPoseFilter {
    ExpSmooth(ExpSmoother),
    Kalman(KalmanFilter3D),
}

impl AnyPoseFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        Ok(match config.kind {
            FilterKind::ExpSmooth => AnyPoseFilter::ExpSmooth(ExpSmoother::from_config(config)?),
            FilterKind::Kalman => AnyPoseFilter::Kalman(KalmanFilter3D::from_config(config)),
        })
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            AnyPoseFilter::ExpSmooth(_) => FilterKind::ExpSmooth,
            AnyPoseFilter::Kalman(_) => FilterKind::Kalman,
        }
    }
}

impl PoseFilter for AnyPoseFilter {
    fn update(
        &mut self,
        measurement: [f32; 3],
        measurement_variance: [f32; 3],
        timestamp: f32,
    ) -> FilteredPose {
        match self {
            AnyPoseFilter::ExpSmooth(f) => f.update(measurement, measurement_variance, timestamp),
            AnyPoseFilter::Kalman(f) => f.update(measurement, measurement_variance, timestamp),
        }
    }

    fn reset(&mut self) {
        match self {
            AnyPoseFilter::ExpSmooth(f) => f.reset(),
            AnyPoseFilter::Kalman(f) => f.reset(),
        }
    }

    fn is_initialized(&self) -> bool {
        match self {
            AnyPoseFilter::ExpSmooth(f) => f.is_initialized(),
            AnyPoseFilter::Kalman(f) => f.is_initialized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MV: [f32; 3] = [0.1; 3];

    fn smoother(alpha: f32) -> ExpSmoother {
        ExpSmoother::new(alpha, 4.0, 1.0).unwrap()
    }

    #[test]
    fn rejects_alpha_outside_unit_interval() {
        assert_eq!(ExpSmoother::new(0.0, 4.0, 1.0).err(), Some(FilterError::InvalidAlpha(0.0)));
        assert_eq!(ExpSmoother::new(1.5, 4.0, 1.0).err(), Some(FilterError::InvalidAlpha(1.5)));
        assert!(ExpSmoother::new(f32::NAN, 4.0, 1.0).is_err());
        assert!(ExpSmoother::new(1.0, 4.0, 1.0).is_ok());
    }

    #[test]
    fn first_sample_initialises_without_gating() {
        let mut f = smoother(0.35);
        let out = f.update([100.0, -50.0, 3.0], MV, 0.0);
        assert!(out.is_valid);
        assert_eq!(out.position, [100.0, -50.0, 3.0]);
        assert_eq!(out.variance, [1.0; 3]);
        assert_eq!(out.velocity, [0.0; 3]);
    }

    #[test]
    fn half_alpha_lands_on_midpoint() {
        let mut f = smoother(0.5);
        f.update([1.0, 1.0, 1.0], MV, 0.0);
        let out = f.update([3.0, 1.0, 1.0], MV, 1.0);
        assert_relative_eq!(out.position[0], 2.0);
        assert_relative_eq!(out.position[1], 1.0);
        assert_relative_eq!(out.position[2], 1.0);
        // velocity: 0.5 * (3 - 1) / 1
        assert_relative_eq!(out.velocity[0], 1.0);
        assert_relative_eq!(out.variance[0], 0.55, epsilon = 1e-6);
    }

    #[test]
    fn outlier_leaves_position_and_inflates_variance() {
        let mut f = smoother(0.5);
        f.update([0.0, 0.0, 2.0], MV, 0.0);
        let before = f.update([0.1, 0.0, 2.0], MV, 0.1);
        let out = f.update([50.0, 0.0, 2.0], MV, 0.2);
        assert_eq!(out.position, before.position);
        for i in 0..3 {
            assert_relative_eq!(out.variance[i], before.variance[i] * 1.5);
        }
        assert_eq!(out.timestamp, 0.2);
    }

    #[test]
    fn persistent_jump_is_accepted_once_the_gate_widens() {
        let mut f = smoother(0.5);
        f.update([0.0, 0.0, 2.0], MV, 0.0);
        let settled = f.update([0.0, 0.0, 2.0], MV, 0.1);
        assert_relative_eq!(settled.variance[0], 0.55, epsilon = 1e-6);

        // 5 m away: gated until 0.55 * 1.5^n > (5 / 4)^2
        let jump = [5.0, 0.0, 2.0];
        let mut t = 0.1;
        let mut rejected = 0;
        let accepted = loop {
            t += 0.1;
            let out = f.update(jump, MV, t);
            if out.position != settled.position {
                break out;
            }
            rejected += 1;
            assert!(rejected < 20, "jump never accepted");
        };

        assert_eq!(rejected, 3);
        assert_relative_eq!(accepted.position[0], 2.5);
        assert_eq!(accepted.timestamp, t);
    }

    #[test]
    fn variance_growth_saturates_at_ceiling() {
        let mut f = smoother(0.5);
        f.update([0.0; 3], MV, 0.0);
        let mut out = FilteredPose::default();
        for i in 0..100 {
            out = f.update([f32::NAN; 3], MV, i as f32);
        }
        assert_eq!(out.variance, [VARIANCE_CEILING; 3]);
        assert_eq!(out.position, [0.0; 3]);
        assert!(out.is_valid);
    }

    #[test]
    fn non_finite_sample_is_an_outlier() {
        let mut f = smoother(0.5);
        let first = f.update([1.0, 2.0, 3.0], MV, 0.0);
        let out = f.update([f32::NAN, 2.0, 3.0], MV, 0.1);
        assert_eq!(out.position, first.position);
        assert_relative_eq!(out.variance[0], 1.5);

        let out = f.update([1.0, 2.0, 3.0], [f32::INFINITY; 3], 0.2);
        assert_eq!(out.position, first.position);
    }

    #[test]
    fn non_finite_first_sample_stays_invalid() {
        let mut f = smoother(0.5);
        let out = f.update([f32::NAN; 3], MV, 0.0);
        assert!(!out.is_valid);
        assert!(!f.is_initialized());
    }

    #[test]
    fn variance_never_drops_below_floor() {
        let mut f = smoother(1.0);
        f.update([0.0; 3], MV, 0.0);
        let out = f.update([0.0; 3], [0.0; 3], 0.1);
        for v in out.variance {
            assert!(v >= VARIANCE_FLOOR);
        }
    }

    #[test]
    fn repeated_timestamp_skips_velocity_update() {
        let mut f = smoother(0.5);
        f.update([0.0; 3], MV, 1.0);
        let out = f.update([0.5, 0.0, 0.0], MV, 1.0);
        assert_eq!(out.velocity, [0.0; 3]);
        assert_relative_eq!(out.position[0], 0.25);
    }

    #[test]
    fn reset_forgets_state() {
        let mut f = smoother(0.5);
        f.update([1.0; 3], MV, 0.0);
        f.reset();
        assert!(!f.is_initialized());
        let out = f.update([9.0; 3], MV, 5.0);
        assert_eq!(out.position, [9.0; 3]);
    }

    #[test]
    fn config_selects_strategy() {
        let mut cfg = FilterConfig::default();
        assert_eq!(AnyPoseFilter::from_config(&cfg).unwrap().kind(), FilterKind::ExpSmooth);
        cfg.kind = FilterKind::Kalman;
        let mut f = AnyPoseFilter::from_config(&cfg).unwrap();
        assert_eq!(f.kind(), FilterKind::Kalman);
        assert!(f.update([1.0, 0.0, 4.0], MV, 0.0).is_valid);
        assert!(f.is_initialized());
    }
}
