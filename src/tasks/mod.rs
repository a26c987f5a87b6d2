pub mod control_loop;
pub mod heartbeat_task;
pub mod sim_task;
pub mod telemetry_task;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::Instant;

use precland::drivers::landing_target::{LandingTarget, Transport};
use precland::state::GuidanceSetpoint;
use precland::telemetry::{TelemetrySample, TelemetrySink};

pub const OUTBOUND_DEPTH: usize = 8;
pub const TELEMETRY_DEPTH: usize = 8;

/// Messages from the companion towards the autopilot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outbound {
    Heartbeat,
    LandingTarget { target_num: u8, msg: LandingTarget },
    Setpoint(GuidanceSetpoint),
}

/// Monotonic seconds since the time driver started.
pub fn now_s() -> f32 {
    Instant::now().as_micros() as f32 / 1_000_000.0
}

// ── Channel adapters ─────────────────────────────────────────────────────────

/// Hands outbound messages to the autopilot side without blocking; a full
/// queue drops the message.
#[derive(Clone, Copy)]
pub struct ChannelTransport {
    tx: Sender<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>,
}

impl ChannelTransport {
    pub fn new(tx: Sender<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send_landing_target(&mut self, target_num: u8, msg: &LandingTarget) -> bool {
        self.tx
            .try_send(Outbound::LandingTarget { target_num, msg: *msg })
            .is_ok()
    }

    fn send_velocity_setpoint(&mut self, setpoint: &GuidanceSetpoint) -> bool {
        self.tx.try_send(Outbound::Setpoint(*setpoint)).is_ok()
    }

    fn send_heartbeat(&mut self) -> bool {
        self.tx.try_send(Outbound::Heartbeat).is_ok()
    }
}

pub struct ChannelSink {
    tx: Sender<'static, CriticalSectionRawMutex, TelemetrySample, TELEMETRY_DEPTH>,
    dropped: u32,
}

impl ChannelSink {
    pub fn new(tx: Sender<'static, CriticalSectionRawMutex, TelemetrySample, TELEMETRY_DEPTH>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&mut self, sample: TelemetrySample) {
        if self.tx.try_send(sample).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }
}
