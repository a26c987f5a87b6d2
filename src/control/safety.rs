//! Safety supervisor: hard limits, perception and link watchdogs, and
//! confidence-scaled velocity clamping.
//!
//! The supervisor only reports. Turning a violation into an abort is up to
//! the control loop, which folds watchdog timeouts into the link flags it
//! hands the state machine.

use core::fmt;

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::SafetyLimits;
use crate::fmt::log_warn;

/// Landability score below which the zone is reported as critical.
pub const CRITICAL_LANDABILITY: f32 = 0.2;

// ── Violations ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Violation {
    PerceptionTimeout = 0,
    MavlinkTimeout = 1,
    LateralSpeedExceeded = 2,
    DescentSpeedExceeded = 3,
    HumanDetected = 4,
    CriticalLandability = 5,
}

impl Violation {
    pub const ALL: [Violation; 6] = [
        Violation::PerceptionTimeout,
        Violation::MavlinkTimeout,
        Violation::LateralSpeedExceeded,
        Violation::DescentSpeedExceeded,
        Violation::HumanDetected,
        Violation::CriticalLandability,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Violation::PerceptionTimeout => "perception_timeout",
            Violation::MavlinkTimeout => "mavlink_timeout",
            Violation::LateralSpeedExceeded => "lateral_speed_exceeded",
            Violation::DescentSpeedExceeded => "descent_speed_exceeded",
            Violation::HumanDetected => "human_detected",
            Violation::CriticalLandability => "critical_landability",
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of violations found by one check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Violations(u8);

impl Violations {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, v: Violation) {
        self.0 |= v.bit();
    }

    pub const fn contains(&self, v: Violation) -> bool {
        self.0 & v.bit() != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn intersects(&self, other: Violations) -> bool {
        self.0 & other.0 != 0
    }

    /// Members of `self` that are not in `other`.
    pub const fn difference(&self, other: Violations) -> Violations {
        Violations(self.0 & !other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Violation> + '_ {
        Violation::ALL.into_iter().filter(move |v| self.contains(*v))
    }
}

impl FromIterator<Violation> for Violations {
    fn from_iter<I: IntoIterator<Item = Violation>>(iter: I) -> Self {
        let mut set = Violations::empty();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

/// Violations that make continuing the landing unsafe.
fn critical() -> Violations {
    [
        Violation::PerceptionTimeout,
        Violation::MavlinkTimeout,
        Violation::HumanDetected,
    ]
    .into_iter()
    .collect()
}

// ── Check inputs and result ──────────────────────────────────────────────────

/// What the supervisor is told each cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetySample {
    /// A perception frame arrived this cycle.
    pub perception_active: bool,
    /// The autopilot link is alive this cycle.
    pub mavlink_active: bool,
    pub lateral_speed: f32,
    /// Positive down.
    pub descent_speed: f32,
    pub altitude: f32,
    pub landability_score: f32,
    pub human_present: bool,
}

impl Default for SafetySample {
    fn default() -> Self {
        Self {
            perception_active: true,
            mavlink_active: true,
            lateral_speed: 0.0,
            descent_speed: 0.0,
            altitude: 100.0,
            landability_score: 1.0,
            human_present: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyStatus {
    pub is_safe: bool,
    pub violations: Violations,
    /// Violations absent from the previous check. Only these are logged.
    pub new_violations: Violations,
    pub last_perception_s: f32,
    pub last_mavlink_s: f32,
}

// ── Supervisor ───────────────────────────────────────────────────────────────

pub struct SafetySupervisor {
    limits: SafetyLimits,
    last_perception_s: f32,
    last_mavlink_s: f32,
    violations: Violations,
}

impl SafetySupervisor {
    /// Both watchdogs start counting from `now_s`.
    pub fn new(limits: SafetyLimits, now_s: f32) -> Self {
        Self {
            limits,
            last_perception_s: now_s,
            last_mavlink_s: now_s,
            violations: Violations::empty(),
        }
    }

    pub fn check(&mut self, now_s: f32, sample: &SafetySample) -> SafetyStatus {
        if sample.perception_active {
            self.last_perception_s = now_s;
        }
        if sample.mavlink_active {
            self.last_mavlink_s = now_s;
        }

        let l = &self.limits;
        let mut found = Violations::empty();
        if now_s - self.last_perception_s > l.perception_timeout_s {
            found.insert(Violation::PerceptionTimeout);
        }
        if now_s - self.last_mavlink_s > l.mavlink_timeout_s {
            found.insert(Violation::MavlinkTimeout);
        }
        if sample.lateral_speed > l.max_lateral_speed_mps {
            found.insert(Violation::LateralSpeedExceeded);
        }
        if sample.descent_speed > l.max_descent_speed_mps {
            found.insert(Violation::DescentSpeedExceeded);
        }
        if sample.human_present {
            found.insert(Violation::HumanDetected);
        }
        if sample.landability_score < CRITICAL_LANDABILITY {
            found.insert(Violation::CriticalLandability);
        }

        let new_violations = found.difference(self.violations);
        for v in new_violations.iter() {
            log_warn!("safety violation: {}", v.as_str());
        }
        self.violations = found;

        SafetyStatus {
            is_safe: found.is_empty(),
            violations: found,
            new_violations,
            last_perception_s: self.last_perception_s,
            last_mavlink_s: self.last_mavlink_s,
        }
    }

    /// Scales both limits by `confidence` (clamped to [0, 1]) and clamps the
    /// command to them. Lateral components are scaled together so the
    /// direction is kept; climbing (negative `vz`) is never limited.
    /// Non-finite components are zeroed first.
    pub fn clamp_velocity(&self, vx: f32, vy: f32, vz: f32, confidence: f32) -> (f32, f32, f32) {
        let finite_or_zero = |v: f32| if v.is_finite() { v } else { 0.0 };
        let (mut vx, mut vy, mut vz) = (finite_or_zero(vx), finite_or_zero(vy), finite_or_zero(vz));
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };

        let lateral_limit = self.limits.max_lateral_speed_mps * confidence;
        let descent_limit = self.limits.max_descent_speed_mps * confidence;

        let lateral = vx.hypot(vy);
        if lateral > lateral_limit {
            let scale = lateral_limit / lateral;
            vx *= scale;
            vy *= scale;
        }
        if vz > descent_limit {
            vz = descent_limit;
        }
        (vx, vy, vz)
    }

    pub fn should_abort(&self) -> bool {
        self.violations.intersects(critical())
    }

    pub fn violations(&self) -> Violations {
        self.violations
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub fn reset(&mut self, now_s: f32) {
        self.last_perception_s = now_s;
        self.last_mavlink_s = now_s;
        self.violations = Violations::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn supervisor() -> SafetySupervisor {
        SafetySupervisor::new(SafetyLimits::default(), 0.0)
    }

    #[test]
    fn nominal_sample_is_safe() {
        let mut s = supervisor();
        let status = s.check(0.5, &SafetySample::default());
        assert!(status.is_safe);
        assert!(status.violations.is_empty());
        assert_eq!(status.last_perception_s, 0.5);
        assert!(!s.should_abort());
    }

    #[test]
    fn mavlink_watchdog_expires() {
        let mut s = supervisor();
        s.check(10.0, &SafetySample::default());
        let status = s.check(14.0, &SafetySample { mavlink_active: false, ..Default::default() });
        assert!(!status.is_safe);
        assert!(status.violations.contains(Violation::MavlinkTimeout));
        assert_eq!(status.violations.len(), 1);
        assert_eq!(status.last_mavlink_s, 10.0);
        assert!(s.should_abort());
    }

    #[test]
    fn watchdog_boundary_is_exclusive() {
        let mut s = supervisor();
        let quiet = SafetySample { perception_active: false, ..Default::default() };
        assert!(s.check(1.0, &quiet).is_safe);
        assert!(s.check(1.5, &quiet).violations.contains(Violation::PerceptionTimeout));
    }

    #[test]
    fn violation_set_is_recomputed_each_check() {
        let mut s = supervisor();
        let status = s.check(0.1, &SafetySample { human_present: true, ..Default::default() });
        assert!(status.violations.contains(Violation::HumanDetected));
        assert!(s.should_abort());
        let status = s.check(0.2, &SafetySample::default());
        assert!(status.is_safe);
        assert!(!s.should_abort());
    }

    #[test]
    fn persistent_violation_is_new_only_once() {
        let mut s = supervisor();
        let human = SafetySample { human_present: true, ..Default::default() };

        let first = s.check(0.1, &human);
        assert!(first.new_violations.contains(Violation::HumanDetected));

        let again = s.check(0.2, &SafetySample { lateral_speed: 2.0, ..human });
        assert!(again.violations.contains(Violation::HumanDetected));
        assert!(!again.new_violations.contains(Violation::HumanDetected));
        assert!(again.new_violations.contains(Violation::LateralSpeedExceeded));
        assert_eq!(again.new_violations.len(), 1);

        assert!(s.check(0.3, &SafetySample::default()).new_violations.is_empty());
        let back = s.check(0.4, &human);
        assert!(back.new_violations.contains(Violation::HumanDetected));
    }

    #[test]
    fn speed_and_landability_do_not_request_abort() {
        let mut s = supervisor();
        let status = s.check(
            0.1,
            &SafetySample {
                lateral_speed: 2.0,
                descent_speed: 1.0,
                landability_score: 0.1,
                ..Default::default()
            },
        );
        let found: Vec<_> = status.violations.iter().map(Violation::as_str).collect();
        assert_eq!(
            found,
            ["lateral_speed_exceeded", "descent_speed_exceeded", "critical_landability"]
        );
        assert!(!s.should_abort());
    }

    #[test]
    fn clamp_scales_lateral_and_keeps_direction() {
        let s = supervisor();
        let (vx, vy, vz) = s.clamp_velocity(3.0, 4.0, 0.2, 1.0);
        assert_relative_eq!(vx.hypot(vy), 1.5, epsilon = 1e-5);
        assert_relative_eq!(vx / vy, 0.75, epsilon = 1e-5);
        assert_eq!(vz, 0.2);
    }

    #[test]
    fn clamp_respects_confidence() {
        let s = supervisor();
        let (vx, vy, vz) = s.clamp_velocity(2.0, 0.0, 2.0, 0.5);
        assert_relative_eq!(vx, 0.75, epsilon = 1e-6);
        assert_eq!(vy, 0.0);
        assert_relative_eq!(vz, 0.35, epsilon = 1e-6);
        assert_eq!(s.clamp_velocity(1.0, 1.0, 1.0, 0.0), (0.0, 0.0, 0.0));
    }

    #[test]
    fn climb_is_never_clamped() {
        let s = supervisor();
        assert_eq!(s.clamp_velocity(0.0, 0.0, -3.0, 0.1).2, -3.0);
    }

    #[test]
    fn clamp_bound_holds_over_grid() {
        let s = supervisor();
        for i in -10..=10 {
            for j in -10..=10 {
                for c in [0.0, 0.3, 0.7, 1.0] {
                    let (vx, vy, vz) = s.clamp_velocity(i as f32 * 0.7, j as f32 * 0.4, i as f32, c);
                    assert!(vx.hypot(vy) <= 1.5 * c + 1e-5);
                    assert!(vz <= 0.7 * c + 1e-6 || vz < 0.0);
                }
            }
        }
    }

    #[test]
    fn non_finite_commands_are_zeroed() {
        let s = supervisor();
        assert_eq!(s.clamp_velocity(f32::NAN, 0.5, f32::INFINITY, 1.0), (0.0, 0.5, 0.0));
    }

    #[test]
    fn reset_reseeds_watchdogs() {
        let mut s = supervisor();
        let quiet = SafetySample { perception_active: false, mavlink_active: false, ..Default::default() };
        assert!(s.check(5.0, &quiet).violations.contains(Violation::MavlinkTimeout));
        s.reset(5.0);
        assert!(s.violations().is_empty());
        assert!(s.check(5.5, &quiet).is_safe);
        assert_eq!(s.limits().mavlink_timeout_s, 3.0);
    }
}
