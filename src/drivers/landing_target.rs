#[allow(unused_imports)]
use micromath::F32Ext;
use embassy_time::Instant;

use crate::config::ConfigError;
use crate::fmt::log_debug;
use crate::state::{GuidanceSetpoint, LandingTargetFields};
use crate::throttle::RateLimiter;

// ── Protocol constants ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MavFrame {
    LocalNed = 1,
    #[default]
    BodyNed = 8,
    BodyFrd = 12,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LandingTargetType {
    LightBeacon = 0,
    RadioBeacon = 1,
    #[default]
    VisionFiducial = 2,
    VisionOther = 3,
}

/// SET_POSITION_TARGET_LOCAL_NED mask that leaves only the velocity
/// fields active.
pub const TYPE_MASK_VELOCITY: u16 = 0b0000_1111_1100_0111;

// ── Message ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LandingTarget {
    pub timestamp_us: u64,
    pub angle_x: f32,
    pub angle_y: f32,
    pub distance_m: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub position_valid: bool,
    pub frame: MavFrame,
    pub target_type: LandingTargetType,
}

impl LandingTarget {
    /// Builds a body-frame message; distance is the norm of the position.
    pub fn from_fields(fields: &LandingTargetFields, timestamp_us: u64) -> Self {
        let distance_m =
            (fields.x * fields.x + fields.y * fields.y + fields.z * fields.z).sqrt();
        Self {
            timestamp_us,
            angle_x: fields.angle_x,
            angle_y: fields.angle_y,
            distance_m,
            x: fields.x,
            y: fields.y,
            z: fields.z,
            position_valid: fields.position_valid,
            frame: MavFrame::BodyNed,
            target_type: LandingTargetType::VisionFiducial,
        }
    }
}

/// Outbound side of the autopilot link. Each call returns whether the
/// message was handed to the link.
pub trait Transport {
    fn send_landing_target(&mut self, target_num: u8, msg: &LandingTarget) -> bool;
    fn send_velocity_setpoint(&mut self, setpoint: &GuidanceSetpoint) -> bool;
    fn send_heartbeat(&mut self) -> bool;
}

// ── Publisher ────────────────────────────────────────────────────────────────

pub struct LandingTargetPublisher {
    limiter: RateLimiter,
    target_num: u8,
    msg_count: u32,
}

impl LandingTargetPublisher {
    pub fn new(rate_hz: f32, target_num: u8) -> Result<Self, ConfigError> {
        Ok(Self {
            limiter: RateLimiter::new(rate_hz)?,
            target_num,
            msg_count: 0,
        })
    }

    pub fn publish<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        msg: &LandingTarget,
        force: bool,
    ) -> bool {
        self.publish_at(transport, msg, force, Instant::now())
    }

    /// Sends `msg` unless the rate limit says otherwise; `force` bypasses
    /// the limiter.
    pub fn publish_at<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        msg: &LandingTarget,
        force: bool,
        now: Instant,
    ) -> bool {
        if !force && !self.limiter.should_run_at(now) {
            return false;
        }
        let sent = transport.send_landing_target(self.target_num, msg);
        if sent {
            self.msg_count = self.msg_count.wrapping_add(1);
            log_debug!(
                "landing_target sent ax={} ay={} d={} n={}",
                msg.angle_x,
                msg.angle_y,
                msg.distance_m,
                self.msg_count
            );
        }
        sent
    }

    pub fn message_count(&self) -> u32 {
        self.msg_count
    }

    pub fn rate_hz(&self) -> f32 {
        self.limiter.rate_hz()
    }

    pub fn reset(&mut self) {
        self.msg_count = 0;
        self.limiter.reset();
    }
}
