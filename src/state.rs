/// Shared state types passed between the perception feed, the landing core
/// and the actuation side.
///
/// All types are `Copy` so they can travel through Embassy channels and be
/// snapshotted once per control tick.

use core::fmt;

// ── Landing state ─────────────────────────────────────────────────────────────

/// Landing phase. `Touchdown`, `Abort` and `Failsafe` are terminal until the
/// state machine is reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LandingState {
    #[default]
    Init,
    Idle,
    Search,
    Acquire,
    Align,
    Descend,
    Touchdown,
    Abort,
    Failsafe,
}

impl LandingState {
    pub const fn label(self) -> &'static str {
        match self {
            LandingState::Init => "INIT",
            LandingState::Idle => "IDLE",
            LandingState::Search => "SEARCH",
            LandingState::Acquire => "ACQUIRE",
            LandingState::Align => "ALIGN",
            LandingState::Descend => "DESCEND",
            LandingState::Touchdown => "TOUCHDOWN",
            LandingState::Abort => "ABORT",
            LandingState::Failsafe => "FAILSAFE",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            LandingState::Touchdown | LandingState::Abort | LandingState::Failsafe
        )
    }

    /// States in which the target estimate is forwarded to the autopilot.
    pub const fn publishes_target(self) -> bool {
        matches!(
            self,
            LandingState::Acquire | LandingState::Align | LandingState::Descend
        )
    }
}

impl fmt::Display for LandingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the landing was abandoned. Persists in the outputs until reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    LinkLost,
    ExternalCommand,
    HumanPresent,
    LowLandability,
}

impl AbortReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            AbortReason::LinkLost => "link_lost",
            AbortReason::ExternalCommand => "external_command",
            AbortReason::HumanPresent => "human_present",
            AbortReason::LowLandability => "low_landability",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── State machine I/O ─────────────────────────────────────────────────────────

/// Snapshot of everything the state machine looks at in one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SystemInputs {
    pub target_visible: bool,
    /// Detector confidence in [0, 1].
    pub target_confidence: f32,
    /// Horizontal distance to the target in metres, infinite when unknown.
    pub lateral_error_m: f32,
    /// Height above ground in metres.
    pub altitude_m: f32,
    pub landability_score: f32,
    pub mavlink_connected: bool,
    pub camera_connected: bool,
    pub arm_command: bool,
    pub abort_command: bool,
    pub human_present: bool,
    /// Scalar pose uncertainty (largest filtered variance component).
    pub variance: f32,
    /// Monotonic seconds, non-decreasing across ticks.
    pub timestamp: f32,
}

impl Default for SystemInputs {
    fn default() -> Self {
        Self {
            target_visible: false,
            target_confidence: 0.0,
            lateral_error_m: f32::INFINITY,
            altitude_m: 100.0,
            landability_score: 1.0,
            mavlink_connected: true,
            camera_connected: true,
            arm_command: false,
            abort_command: false,
            human_present: false,
            variance: 0.0,
            timestamp: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SystemOutputs {
    pub state: LandingState,
    pub publish_landing_target: bool,
    pub abort_reason: Option<AbortReason>,
    /// Multiplier in [0, 1] applied to velocity limits by the driver.
    pub confidence_gain: f32,
    pub state_changed: bool,
}

// ── Perception and vehicle feed ───────────────────────────────────────────────

/// One perception frame as delivered by the detection pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerceptionSample {
    pub frame_id: u32,
    /// Capture time, monotonic seconds.
    pub timestamp: f32,
    pub target_visible: bool,
    pub confidence: f32,
    /// Marker translation in the camera optical frame, metres.
    pub tvec_cam: Option<[f32; 3]>,
    /// Per-axis measurement variance of `tvec_cam`.
    pub measurement_variance: [f32; 3],
    pub landability_score: f32,
    pub human_present: bool,
}

/// Vehicle kinematics reported by the autopilot.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehicleState {
    pub altitude_m: f32,
    pub lateral_speed_mps: f32,
    /// Positive down.
    pub descent_speed_mps: f32,
    pub yaw_rad: f32,
}

// ── Filter and guidance products ──────────────────────────────────────────────

/// Output of a temporal pose filter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FilteredPose {
    pub position: [f32; 3],
    /// Per-axis variance, never below the filter's variance floor.
    pub variance: [f32; 3],
    pub velocity: [f32; 3],
    pub is_valid: bool,
    pub timestamp: f32,
}

impl FilteredPose {
    pub fn max_variance(&self) -> f32 {
        self.variance[0].max(self.variance[1]).max(self.variance[2])
    }
}

/// Velocity command in the body frame (x forward, y right, z down).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GuidanceSetpoint {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw_rate: f32,
}

impl GuidanceSetpoint {
    pub const ZERO: Self = Self { vx: 0.0, vy: 0.0, vz: 0.0, yaw_rate: 0.0 };
}

/// The six LANDING_TARGET scalars derived from a body-frame position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandingTargetFields {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub angle_x: f32,
    pub angle_y: f32,
    pub position_valid: bool,
}
