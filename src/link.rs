//! Autopilot and camera link health.
//!
//! The heartbeat task owns a [`HeartbeatMonitor`] and publishes the result
//! into a shared [`LinkHealth`], which the control loop samples once per
//! tick. A [`CancelToken`] stops the heartbeat task cleanly.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::fmt::{log_info, log_warn};

// ── Shared flags ─────────────────────────────────────────────────────────────

pub struct LinkHealth {
    mavlink: AtomicBool,
    camera: AtomicBool,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHealth {
    /// Both links start down.
    pub const fn new() -> Self {
        Self {
            mavlink: AtomicBool::new(false),
            camera: AtomicBool::new(false),
        }
    }

    pub fn set_mavlink(&self, up: bool) {
        self.mavlink.store(up, Ordering::Release);
    }

    pub fn set_camera(&self, up: bool) {
        self.camera.store(up, Ordering::Release);
    }

    pub fn mavlink_connected(&self) -> bool {
        self.mavlink.load(Ordering::Acquire)
    }

    pub fn camera_connected(&self) -> bool {
        self.camera.load(Ordering::Acquire)
    }

    pub fn all_connected(&self) -> bool {
        self.mavlink_connected() && self.camera_connected()
    }
}

// ── Heartbeat monitor ────────────────────────────────────────────────────────

/// Fields of an autopilot HEARTBEAT the companion cares about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutopilotHeartbeat {
    pub autopilot: u8,
    pub vehicle_type: u8,
    pub system_status: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    Connected(AutopilotHeartbeat),
    Lost,
}

/// Connection state from received heartbeats. All times are caller-supplied
/// monotonic seconds.
pub struct HeartbeatMonitor {
    timeout_s: f32,
    last_recv_s: Option<f32>,
    connected: bool,
    info: Option<AutopilotHeartbeat>,
}

impl HeartbeatMonitor {
    pub fn new(timeout_s: f32) -> Self {
        Self {
            timeout_s,
            last_recv_s: None,
            connected: false,
            info: None,
        }
    }

    /// Records a heartbeat. Returns `Connected` on the rising edge.
    pub fn on_heartbeat(&mut self, now_s: f32, hb: AutopilotHeartbeat) -> Option<LinkEvent> {
        self.last_recv_s = Some(now_s);
        self.info = Some(hb);
        if self.connected {
            return None;
        }
        self.connected = true;
        log_info!("autopilot connected: autopilot={} type={}", hb.autopilot, hb.vehicle_type);
        Some(LinkEvent::Connected(hb))
    }

    /// Checks the timeout. Returns `Lost` on the falling edge.
    pub fn poll(&mut self, now_s: f32) -> Option<LinkEvent> {
        let last = self.last_recv_s?;
        if self.connected && now_s - last > self.timeout_s {
            self.connected = false;
            log_warn!("autopilot heartbeat lost after {} s", now_s - last);
            return Some(LinkEvent::Lost);
        }
        None
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Seconds since the last heartbeat, infinite if none was ever seen.
    pub fn last_heartbeat_age_s(&self, now_s: f32) -> f32 {
        match self.last_recv_s {
            Some(t) => now_s - t,
            None => f32::INFINITY,
        }
    }

    pub fn autopilot_info(&self) -> Option<AutopilotHeartbeat> {
        self.info
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// One-shot stop request for a long-running task. Supports a single waiter.
pub struct CancelToken {
    cancelled: AtomicBool,
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            signal: Signal::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.signal.signal(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.signal.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    const HB: AutopilotHeartbeat = AutopilotHeartbeat {
        autopilot: 3,
        vehicle_type: 2,
        system_status: 4,
    };

    #[test]
    fn connects_on_first_heartbeat_only() {
        let mut m = HeartbeatMonitor::new(3.0);
        assert!(!m.is_connected());
        assert_eq!(m.last_heartbeat_age_s(1.0), f32::INFINITY);
        assert_eq!(m.on_heartbeat(1.0, HB), Some(LinkEvent::Connected(HB)));
        assert_eq!(m.on_heartbeat(2.0, HB), None);
        assert!(m.is_connected());
        assert_eq!(m.autopilot_info(), Some(HB));
        assert_eq!(m.last_heartbeat_age_s(2.5), 0.5);
    }

    #[test]
    fn reports_loss_once_after_timeout() {
        let mut m = HeartbeatMonitor::new(3.0);
        assert_eq!(m.poll(100.0), None);
        m.on_heartbeat(10.0, HB);
        assert_eq!(m.poll(13.0), None);
        assert_eq!(m.poll(13.5), Some(LinkEvent::Lost));
        assert_eq!(m.poll(20.0), None);
        assert!(!m.is_connected());
        assert_eq!(m.on_heartbeat(21.0, HB), Some(LinkEvent::Connected(HB)));
    }

    #[test]
    fn link_health_flags() {
        let h = LinkHealth::new();
        assert!(!h.all_connected());
        h.set_mavlink(true);
        assert!(!h.all_connected());
        h.set_camera(true);
        assert!(h.all_connected());
        h.set_mavlink(false);
        assert!(!h.mavlink_connected());
        assert!(h.camera_connected());
    }

    #[test]
    fn cancel_token_resolves_after_cancel() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        block_on(token.cancelled());
        // A second wait returns straight away.
        block_on(token.cancelled());
    }
}
