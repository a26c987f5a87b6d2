#[allow(unused_imports)]
use micromath::F32Ext;
use core::f32::consts::PI;

use crate::config::GuidanceConfig;
use crate::state::GuidanceSetpoint;

/// Fraction of the descent rate used while still outside the alignment
/// threshold.
const UNALIGNED_DESCENT_FACTOR: f32 = 0.3;

/// Proportional lateral guidance towards the target with gated descent, plus
/// an expanding search spiral.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuidanceController {
    lateral_gain: f32,
    descent_rate: f32,
    alignment_threshold_m: f32,
}

impl Default for GuidanceController {
    fn default() -> Self {
        Self::from_config(&GuidanceConfig::default())
    }
}

impl GuidanceController {
    pub fn new(lateral_gain: f32, descent_rate: f32, alignment_threshold_m: f32) -> Self {
        Self {
            lateral_gain,
            descent_rate,
            alignment_threshold_m,
        }
    }

    pub fn from_config(config: &GuidanceConfig) -> Self {
        Self::new(
            config.lateral_gain,
            config.descent_rate_mps,
            config.alignment_threshold_m,
        )
    }

    /// Velocity towards a body-frame target offset.
    ///
    /// `target_z` and `current_altitude` are accepted for interface
    /// stability; the law only uses the horizontal offset.
    pub fn compute_setpoint(
        &self,
        target_x: f32,
        target_y: f32,
        _target_z: f32,
        _current_altitude: f32,
        confidence: f32,
    ) -> GuidanceSetpoint {
        let gain = self.lateral_gain * confidence;
        let lateral_error = target_x.hypot(target_y);

        let vz = if lateral_error > self.alignment_threshold_m {
            self.descent_rate * UNALIGNED_DESCENT_FACTOR
        } else {
            self.descent_rate * confidence
        };

        GuidanceSetpoint {
            vx: -gain * target_x,
            vy: -gain * target_y,
            vz,
            yaw_rate: 0.0,
        }
    }

    /// Lateral correction only, used while the approach holds altitude.
    pub fn compute_hold(&self, target_x: f32, target_y: f32, confidence: f32) -> GuidanceSetpoint {
        GuidanceSetpoint {
            vz: 0.0,
            ..self.compute_setpoint(target_x, target_y, 0.0, 0.0, confidence)
        }
    }

    /// Expanding circle: radius grows linearly to `radius_m` over two
    /// periods and then holds. Horizontal only.
    pub fn compute_search_pattern(&self, time_s: f32, radius_m: f32, period_s: f32) -> GuidanceSetpoint {
        if !(period_s > 0.0) {
            return GuidanceSetpoint::ZERO;
        }
        let omega = 2.0 * PI / period_s;
        let angle = omega * time_s;
        let r = radius_m * (time_s / (2.0 * period_s)).min(1.0);

        GuidanceSetpoint {
            vx: r * angle.cos() * omega,
            vy: r * angle.sin() * omega,
            vz: 0.0,
            yaw_rate: 0.0,
        }
    }

    pub fn lateral_gain(&self) -> f32 {
        self.lateral_gain
    }

    pub fn descent_rate(&self) -> f32 {
        self.descent_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aligned_target_descends_at_scaled_rate() {
        let g = GuidanceController::default();
        let sp = g.compute_setpoint(0.05, 0.0, 5.0, 5.0, 0.8);
        assert_relative_eq!(sp.vx, -0.5 * 0.8 * 0.05);
        assert_eq!(sp.vy, 0.0);
        assert_relative_eq!(sp.vz, 0.3 * 0.8);
        assert_eq!(sp.yaw_rate, 0.0);
    }

    #[test]
    fn unaligned_target_descends_slowly() {
        let g = GuidanceController::default();
        let sp = g.compute_setpoint(1.0, -2.0, 5.0, 5.0, 1.0);
        assert_relative_eq!(sp.vx, -0.5);
        assert_relative_eq!(sp.vy, 1.0);
        assert_relative_eq!(sp.vz, 0.09, epsilon = 1e-6);
    }

    #[test]
    fn zero_confidence_stops_lateral_motion() {
        let g = GuidanceController::new(0.5, 0.3, 0.1);
        let sp = g.compute_setpoint(0.0, 0.05, 3.0, 3.0, 0.0);
        assert_eq!(sp.vx, 0.0);
        assert_eq!(sp.vy, 0.0);
        assert_eq!(sp.vz, 0.0);
    }

    #[test]
    fn hold_keeps_altitude() {
        let g = GuidanceController::default();
        let sp = g.compute_hold(1.0, 0.0, 1.0);
        assert_eq!(sp.vz, 0.0);
        assert_relative_eq!(sp.vx, -0.5);
    }

    #[test]
    fn search_starts_at_rest_and_saturates_radius() {
        let g = GuidanceController::default();
        assert_eq!(g.compute_search_pattern(0.0, 2.0, 10.0), GuidanceSetpoint::ZERO);

        let omega = 2.0 * PI / 10.0;
        let sp = g.compute_search_pattern(25.0, 2.0, 10.0);
        let speed = sp.vx.hypot(sp.vy);
        assert_relative_eq!(speed, 2.0 * omega, epsilon = 1e-4);
        assert_eq!(sp.vz, 0.0);

        let sp = g.compute_search_pattern(10.0, 2.0, 10.0);
        assert_relative_eq!(sp.vx.hypot(sp.vy), 1.0 * omega, epsilon = 1e-4);
    }

    #[test]
    fn search_with_bad_period_is_zero() {
        let g = GuidanceController::default();
        assert_eq!(g.compute_search_pattern(3.0, 2.0, 0.0), GuidanceSetpoint::ZERO);
        assert_eq!(g.compute_search_pattern(3.0, 2.0, f32::NAN), GuidanceSetpoint::ZERO);
    }
}
