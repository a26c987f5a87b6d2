//! Kinematic stand-in for the autopilot, the airframe and the perception
//! pipeline, with scripted faults.
//!
//! Positions are local NED relative to the marker, which sits at the origin
//! on the ground. The camera is rendered through the inverse of the same
//! extrinsics the control loop uses, so a perfect measurement maps back to
//! the true body-frame offset.

use anyhow::{Context, Result};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use precland::drivers::frames::{ned_to_body_ned, CameraExtrinsics};
use precland::link::AutopilotHeartbeat;
use precland::state::{PerceptionSample, VehicleState};
use precland::throttle::{BurstLimiter, RateLimiter};

use crate::tasks::Outbound;

// ── Scenario timing (sim seconds) ─────────────────────────────────────────────

const FAULT_AT_S: f32 = 12.0;
const OCCLUSION_START_S: f32 = 9.0;
const OCCLUSION_END_S: f32 = 11.5;
const HUMAN_AT_S: f32 = 10.0;
const POOR_ZONE_LANDABILITY: f32 = 0.3;
const NOMINAL_LANDABILITY: f32 = 0.95;

// ── Vehicle and camera model ──────────────────────────────────────────────────

/// First-order velocity response of the autopilot's velocity controller.
const VELOCITY_TAU_S: f32 = 0.4;
/// The autopilot hovers when setpoints stop for this long.
const SETPOINT_TIMEOUT_S: f32 = 0.5;
const CAMERA_HALF_FOV_RAD: f32 = 0.6;
const MIN_DETECT_ALTITUDE_M: f32 = 0.15;
const MAX_DETECT_RANGE_M: f32 = 20.0;
/// Range at which `noise_std_m` applies; noise scales linearly with range.
const NOISE_REFERENCE_RANGE_M: f32 = 5.0;
const AUTOPILOT_HEARTBEAT_HZ: f32 = 1.0;

/// ArduPilot quadrotor, MAV_STATE_ACTIVE.
pub const AUTOPILOT_HEARTBEAT: AutopilotHeartbeat = AutopilotHeartbeat {
    autopilot: 3,
    vehicle_type: 2,
    system_status: 4,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    Nominal,
    /// A person walks under the vehicle mid-descent.
    HumanIntrusion,
    /// Autopilot heartbeats stop.
    LinkLoss,
    /// The camera stops producing frames.
    CameraDropout,
    /// The marker is hidden for longer than the target-lost timeout.
    Occlusion,
    /// Landability stays below the abort threshold.
    PoorLandingZone,
}

#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    pub scenario: Scenario,
    pub seed: u64,
    pub start_altitude_m: f32,
    /// North, east offset of the vehicle from the marker.
    pub start_offset_ned: [f32; 2],
    pub yaw_rad: f32,
    pub noise_std_m: f32,
    pub camera_fps: f32,
}

/// Counts of what the autopilot side received.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimStats {
    pub setpoints: u32,
    pub landing_targets: u32,
    pub heartbeats: u32,
}

/// Ground truth for the end-of-run report.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimSnapshot {
    pub time_s: f32,
    pub altitude_m: f32,
    pub lateral_offset_m: f32,
    pub stats: SimStats,
}

pub struct SimWorld {
    config: SimConfig,
    camera_from_body: CameraExtrinsics,
    rng: StdRng,
    noise: Normal<f32>,
    camera_pacer: BurstLimiter,
    heartbeat_pacer: RateLimiter,

    position_ned: [f32; 3],
    velocity_ned: [f32; 3],
    command_ned: [f32; 3],
    last_command_s: Option<f32>,
    time_s: f32,
    frame_id: u32,
    stats: SimStats,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Result<Self> {
        let noise = Normal::new(0.0, config.noise_std_m).context("camera noise")?;
        let camera_pacer = BurstLimiter::new(config.camera_fps, 1).context("camera rate")?;
        let heartbeat_pacer =
            RateLimiter::new(AUTOPILOT_HEARTBEAT_HZ).context("autopilot heartbeat rate")?;
        let [north, east] = config.start_offset_ned;

        Ok(Self {
            config,
            camera_from_body: CameraExtrinsics::downward_facing().inverse(),
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            camera_pacer,
            heartbeat_pacer,
            position_ned: [north, east, -config.start_altitude_m.max(0.0)],
            velocity_ned: [0.0; 3],
            command_ned: [0.0; 3],
            last_command_s: None,
            time_s: 0.0,
            frame_id: 0,
            stats: SimStats::default(),
        })
    }

    pub fn time_s(&self) -> f32 {
        self.time_s
    }

    pub fn altitude_m(&self) -> f32 {
        -self.position_ned[2]
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            time_s: self.time_s,
            altitude_m: self.altitude_m(),
            lateral_offset_m: self.position_ned[0].hypot(self.position_ned[1]),
            stats: self.stats,
        }
    }

    /// Feeds one companion message to the simulated autopilot.
    pub fn apply(&mut self, msg: &Outbound) {
        match msg {
            Outbound::Setpoint(sp) => {
                let horizontal = ned_to_body_ned([sp.vx, sp.vy, 0.0], -self.config.yaw_rad);
                self.command_ned = [horizontal[0], horizontal[1], sp.vz];
                self.last_command_s = Some(self.time_s);
                self.stats.setpoints += 1;
            }
            Outbound::LandingTarget { .. } => self.stats.landing_targets += 1,
            Outbound::Heartbeat => self.stats.heartbeats += 1,
        }
    }

    pub fn step(&mut self, dt: f32) {
        self.time_s += dt;

        let stale = self
            .last_command_s
            .map_or(true, |t| self.time_s - t > SETPOINT_TIMEOUT_S);
        let command = if stale { [0.0; 3] } else { self.command_ned };

        let k = (dt / VELOCITY_TAU_S).min(1.0);
        for i in 0..3 {
            self.velocity_ned[i] += (command[i] - self.velocity_ned[i]) * k;
            self.position_ned[i] += self.velocity_ned[i] * dt;
        }

        // On the ground
        if self.position_ned[2] >= 0.0 {
            self.position_ned[2] = 0.0;
            self.velocity_ned = [0.0; 3];
        }
    }

    pub fn vehicle_state(&self) -> VehicleState {
        VehicleState {
            altitude_m: self.altitude_m(),
            lateral_speed_mps: self.velocity_ned[0].hypot(self.velocity_ned[1]),
            descent_speed_mps: self.velocity_ned[2],
            yaw_rad: self.config.yaw_rad,
        }
    }

    pub fn autopilot_alive(&self) -> bool {
        !(self.config.scenario == Scenario::LinkLoss && self.time_s >= FAULT_AT_S)
    }

    pub fn camera_connected(&self) -> bool {
        !(self.config.scenario == Scenario::CameraDropout && self.time_s >= FAULT_AT_S)
    }

    pub fn heartbeat_due(&self) -> bool {
        self.autopilot_alive() && self.heartbeat_pacer.should_run()
    }

    pub fn frame_due(&mut self) -> bool {
        self.camera_connected() && self.camera_pacer.should_run()
    }

    /// Renders one perception frame stamped with `timestamp`.
    pub fn observe(&mut self, timestamp: f32) -> PerceptionSample {
        self.frame_id = self.frame_id.wrapping_add(1);

        let scenario = self.config.scenario;
        let altitude = self.altitude_m();
        let marker_ned = [-self.position_ned[0], -self.position_ned[1], altitude];
        let body = ned_to_body_ned(marker_ned, self.config.yaw_rad);
        let horizontal = body[0].hypot(body[1]);
        let range = horizontal.hypot(altitude);

        let occluded = scenario == Scenario::Occlusion
            && (OCCLUSION_START_S..OCCLUSION_END_S).contains(&self.time_s);
        let in_view = altitude > MIN_DETECT_ALTITUDE_M
            && range < MAX_DETECT_RANGE_M
            && horizontal.atan2(altitude) <= CAMERA_HALF_FOV_RAD;

        let landability_score = if scenario == Scenario::PoorLandingZone {
            POOR_ZONE_LANDABILITY
        } else {
            NOMINAL_LANDABILITY
        };
        let human_present = scenario == Scenario::HumanIntrusion && self.time_s >= HUMAN_AT_S;

        if occluded || !in_view {
            return PerceptionSample {
                frame_id: self.frame_id,
                timestamp,
                target_visible: false,
                confidence: 0.0,
                tvec_cam: None,
                measurement_variance: [1.0; 3],
                landability_score,
                human_present,
            };
        }

        let scale = (range / NOISE_REFERENCE_RANGE_M).max(0.2);
        let mut measured = body;
        for axis in measured.iter_mut() {
            *axis += self.noise.sample(&mut self.rng) * scale;
        }
        let sigma = self.config.noise_std_m * scale;
        let variance = (sigma * sigma).max(1e-6);

        PerceptionSample {
            frame_id: self.frame_id,
            timestamp,
            target_visible: true,
            confidence: (1.0 - 0.02 * range).clamp(0.5, 0.98),
            tvec_cam: Some(self.camera_from_body.transform_point(measured)),
            measurement_variance: [variance; 3],
            landability_score,
            human_present,
        }
    }
}
