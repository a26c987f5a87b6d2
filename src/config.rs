//! Landing configuration.
//!
//! Every block has defaults that fly a conservative approach on a small
//! multirotor. [`LandingConfig::validate`] is run once at startup, before
//! any component is built from the config.

use thiserror::Error;

use crate::drivers::filter::FilterError;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: f32 },
    #[error("{field} must be within {min}..={max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("abort_landability ({abort}) must be below acquire_confidence ({acquire})")]
    ThresholdOrder { abort: f32, acquire: f32 },
    #[error("consecutive_frames_for_acquire must be at least 1")]
    ZeroAcquireFrames,
    #[error("rate must be positive (got {0} Hz)")]
    InvalidRate(f32),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    // NaN fails this check too.
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn in_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min, max })
    }
}

// ── State machine thresholds ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FsmConfig {
    /// Minimum detector confidence counted towards acquisition.
    pub acquire_confidence: f32,
    /// Lateral error below which descent may start (m).
    pub align_error_m: f32,
    /// Landability score below which the landing is abandoned.
    pub abort_landability: f32,
    pub touchdown_altitude_m: f32,
    /// Pose variance required before leaving ACQUIRE.
    pub max_variance: f32,
    pub consecutive_frames_for_acquire: u32,
    pub target_lost_timeout_s: f32,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            acquire_confidence: 0.70,
            align_error_m: 0.25,
            abort_landability: 0.40,
            touchdown_altitude_m: 0.5,
            max_variance: 0.5,
            consecutive_frames_for_acquire: 5,
            target_lost_timeout_s: 2.0,
        }
    }
}

impl FsmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        in_range("fsm.acquire_confidence", self.acquire_confidence, 0.0, 1.0)?;
        in_range("fsm.abort_landability", self.abort_landability, 0.0, 1.0)?;
        if self.abort_landability >= self.acquire_confidence {
            return Err(ConfigError::ThresholdOrder {
                abort: self.abort_landability,
                acquire: self.acquire_confidence,
            });
        }
        positive("fsm.align_error_m", self.align_error_m)?;
        positive("fsm.touchdown_altitude_m", self.touchdown_altitude_m)?;
        positive("fsm.max_variance", self.max_variance)?;
        positive("fsm.target_lost_timeout_s", self.target_lost_timeout_s)?;
        if self.consecutive_frames_for_acquire == 0 {
            return Err(ConfigError::ZeroAcquireFrames);
        }
        Ok(())
    }
}

// ── Pose filter ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterKind {
    #[default]
    ExpSmooth,
    Kalman,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterConfig {
    pub kind: FilterKind,
    /// Smoothing factor, (0, 1]. Higher trusts new samples more.
    pub alpha: f32,
    /// Mahalanobis distance above which a sample is rejected.
    pub outlier_threshold: f32,
    pub initial_variance: f32,
    pub process_noise: f32,
    pub measurement_noise: f32,
    /// Kalman step used when the timestamps give no usable delta (s).
    pub nominal_dt: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::ExpSmooth,
            alpha: 0.35,
            outlier_threshold: 4.0,
            initial_variance: 1.0,
            process_noise: 0.1,
            measurement_noise: 0.5,
            nominal_dt: 0.05,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(FilterError::InvalidAlpha(self.alpha).into());
        }
        positive("filter.outlier_threshold", self.outlier_threshold)?;
        positive("filter.initial_variance", self.initial_variance)?;
        positive("filter.process_noise", self.process_noise)?;
        positive("filter.measurement_noise", self.measurement_noise)?;
        positive("filter.nominal_dt", self.nominal_dt)
    }
}

// ── Safety limits ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyLimits {
    pub max_lateral_speed_mps: f32,
    /// Positive-down limit; climbing is never limited.
    pub max_descent_speed_mps: f32,
    pub min_safe_altitude_m: f32,
    pub perception_timeout_s: f32,
    pub mavlink_timeout_s: f32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_lateral_speed_mps: 1.5,
            max_descent_speed_mps: 0.7,
            min_safe_altitude_m: 2.0,
            perception_timeout_s: 1.0,
            mavlink_timeout_s: 3.0,
        }
    }
}

impl SafetyLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("safety.max_lateral_speed_mps", self.max_lateral_speed_mps)?;
        positive("safety.max_descent_speed_mps", self.max_descent_speed_mps)?;
        positive("safety.min_safe_altitude_m", self.min_safe_altitude_m)?;
        positive("safety.perception_timeout_s", self.perception_timeout_s)?;
        positive("safety.mavlink_timeout_s", self.mavlink_timeout_s)
    }
}

// ── Guidance ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuidanceConfig {
    pub lateral_gain: f32,
    pub descent_rate_mps: f32,
    pub alignment_threshold_m: f32,
    pub search_radius_m: f32,
    pub search_period_s: f32,
    /// Climb rate used while aborting below the minimum safe altitude.
    pub abort_climb_rate_mps: f32,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            lateral_gain: 0.5,
            descent_rate_mps: 0.3,
            alignment_threshold_m: 0.1,
            search_radius_m: 2.0,
            search_period_s: 10.0,
            abort_climb_rate_mps: 0.5,
        }
    }
}

impl GuidanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("guidance.lateral_gain", self.lateral_gain)?;
        positive("guidance.descent_rate_mps", self.descent_rate_mps)?;
        positive("guidance.alignment_threshold_m", self.alignment_threshold_m)?;
        positive("guidance.search_radius_m", self.search_radius_m)?;
        positive("guidance.search_period_s", self.search_period_s)?;
        positive("guidance.abort_climb_rate_mps", self.abort_climb_rate_mps)
    }
}

// ── Autopilot link ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkConfig {
    pub heartbeat_timeout_s: f32,
    pub heartbeat_send_rate_hz: f32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_s: 3.0,
            heartbeat_send_rate_hz: 1.0,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("link.heartbeat_timeout_s", self.heartbeat_timeout_s)?;
        if !(self.heartbeat_send_rate_hz > 0.0) {
            return Err(ConfigError::InvalidRate(self.heartbeat_send_rate_hz));
        }
        Ok(())
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandingConfig {
    pub fsm: FsmConfig,
    pub filter: FilterConfig,
    pub safety: SafetyLimits,
    pub guidance: GuidanceConfig,
    pub link: LinkConfig,
    pub rates: RateConfig,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateConfig {
    pub control_rate_hz: u32,
    pub landing_target_rate_hz: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            control_rate_hz: 20,
            landing_target_rate_hz: 20,
        }
    }
}

impl LandingConfig {
    /// Checks every block and the cross-field constraints, returning the
    /// first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fsm.validate()?;
        self.filter.validate()?;
        self.safety.validate()?;
        self.guidance.validate()?;
        self.link.validate()?;
        in_range(
            "rates.control_rate_hz",
            self.rates.control_rate_hz as f32,
            1.0,
            100.0,
        )?;
        in_range(
            "rates.landing_target_rate_hz",
            self.rates.landing_target_rate_hz as f32,
            1.0,
            100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(LandingConfig::default().validate(), Ok(()));
    }

    #[test]
    fn abort_landability_must_sit_below_acquire_confidence() {
        let mut cfg = LandingConfig::default();
        cfg.fsm.abort_landability = 0.8;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let mut cfg = LandingConfig::default();
        cfg.filter.alpha = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Filter(FilterError::InvalidAlpha(0.0)))
        );
        cfg.filter.alpha = 1.0;
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn rates_are_bounded() {
        let mut cfg = LandingConfig::default();
        cfg.rates.landing_target_rate_hz = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "rates.landing_target_rate_hz", .. })
        ));
        cfg.rates.landing_target_rate_hz = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_limits_are_rejected() {
        let mut cfg = LandingConfig::default();
        cfg.safety.max_descent_speed_mps = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive {
                field: "safety.max_descent_speed_mps",
                value: 0.0
            })
        );
    }

    #[test]
    fn nan_thresholds_are_rejected() {
        let mut cfg = LandingConfig::default();
        cfg.guidance.lateral_gain = f32::NAN;
        assert!(cfg.validate().is_err());
    }
}
