//! Per-tick glue between the estimators, the state machine and the guidance
//! law.
//!
//! The guidance law drives the vehicle's offset from the target to zero, so
//! it is handed the negated body-frame target position: a marker ahead of
//! the vehicle is a vehicle offset behind the marker, and the law answers
//! with forward velocity.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::{GuidanceConfig, SafetyLimits};
use crate::control::guidance::GuidanceController;
use crate::control::safety::{SafetySupervisor, Violation, Violations};
use crate::state::{
    FilteredPose, GuidanceSetpoint, LandingState, PerceptionSample, SystemInputs, SystemOutputs,
    VehicleState,
};

/// Everything the loop knows about the world at one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    /// Newest perception frame, possibly from an earlier tick.
    pub frame: PerceptionSample,
    pub pose: FilteredPose,
    /// Filtered target position in the body frame.
    pub target_body: [f32; 3],
    pub vehicle: VehicleState,
    pub mavlink_connected: bool,
    pub camera_connected: bool,
}

impl Observation {
    pub fn lateral_error(&self) -> f32 {
        if self.pose.is_valid {
            self.target_body[0].hypot(self.target_body[1])
        } else {
            f32::INFINITY
        }
    }

    pub fn variance(&self) -> f32 {
        if self.pose.is_valid {
            self.pose.max_variance()
        } else {
            f32::INFINITY
        }
    }

    /// Horizontal offset of the vehicle from the target, body frame.
    pub fn vehicle_offset(&self) -> [f32; 2] {
        [-self.target_body[0], -self.target_body[1]]
    }
}

/// Operator commands for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Commands {
    pub arm: bool,
    pub abort: bool,
}

/// Builds the state machine inputs. Watchdog timeouts found by the
/// supervisor count as lost links.
pub fn fsm_inputs(
    obs: &Observation,
    violations: Violations,
    commands: Commands,
    timestamp: f32,
) -> SystemInputs {
    SystemInputs {
        target_visible: obs.frame.target_visible && obs.pose.is_valid,
        target_confidence: obs.frame.confidence,
        lateral_error_m: obs.lateral_error(),
        altitude_m: obs.vehicle.altitude_m,
        landability_score: obs.frame.landability_score,
        mavlink_connected: obs.mavlink_connected
            && !violations.contains(Violation::MavlinkTimeout),
        camera_connected: obs.camera_connected
            && !violations.contains(Violation::PerceptionTimeout),
        arm_command: commands.arm,
        abort_command: commands.abort,
        human_present: obs.frame.human_present,
        variance: obs.variance(),
        timestamp,
    }
}

/// Chooses the velocity command for the current landing state.
pub struct SetpointPolicy {
    guidance: GuidanceController,
    search_radius_m: f32,
    search_period_s: f32,
    abort_climb_rate_mps: f32,
    min_safe_altitude_m: f32,
    search_started_s: Option<f32>,
}

impl SetpointPolicy {
    pub fn new(guidance: &GuidanceConfig, limits: &SafetyLimits) -> Self {
        Self {
            guidance: GuidanceController::from_config(guidance),
            search_radius_m: guidance.search_radius_m,
            search_period_s: guidance.search_period_s,
            abort_climb_rate_mps: guidance.abort_climb_rate_mps,
            min_safe_altitude_m: limits.min_safe_altitude_m,
            search_started_s: None,
        }
    }

    /// Clamped setpoint for this tick, or `None` once the autopilot owns the
    /// vehicle (failsafe, touchdown).
    pub fn setpoint(
        &mut self,
        out: &SystemOutputs,
        obs: &Observation,
        now_s: f32,
        supervisor: &SafetySupervisor,
    ) -> Option<GuidanceSetpoint> {
        if out.state != LandingState::Search {
            self.search_started_s = None;
        } else if out.state_changed || self.search_started_s.is_none() {
            self.search_started_s = Some(now_s);
        }

        let confidence = obs.frame.confidence;
        let [ex, ey] = obs.vehicle_offset();
        let raw = match out.state {
            LandingState::Failsafe | LandingState::Touchdown => return None,
            LandingState::Search => {
                let t = now_s - self.search_started_s.unwrap_or(now_s);
                self.guidance
                    .compute_search_pattern(t, self.search_radius_m, self.search_period_s)
            }
            LandingState::Acquire | LandingState::Align => {
                self.guidance.compute_hold(ex, ey, confidence)
            }
            LandingState::Descend => self.guidance.compute_setpoint(
                ex,
                ey,
                obs.target_body[2],
                obs.vehicle.altitude_m,
                confidence,
            ),
            LandingState::Abort if obs.vehicle.altitude_m < self.min_safe_altitude_m => {
                GuidanceSetpoint {
                    vz: -self.abort_climb_rate_mps,
                    ..GuidanceSetpoint::ZERO
                }
            }
            LandingState::Init | LandingState::Idle | LandingState::Abort => {
                GuidanceSetpoint::ZERO
            }
        };

        let (vx, vy, vz) = supervisor.clamp_velocity(raw.vx, raw.vy, raw.vz, out.confidence_gain);
        Some(GuidanceSetpoint { vx, vy, vz, yaw_rate: 0.0 })
    }
}
