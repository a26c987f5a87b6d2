use embassy_executor::task;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};
use tracing::debug;

use precland::link::{AutopilotHeartbeat, LinkHealth};
use precland::state::{PerceptionSample, VehicleState};

use crate::sim::{SimSnapshot, SimWorld, AUTOPILOT_HEARTBEAT};

use super::{now_s, Outbound, OUTBOUND_DEPTH};

/// Vehicle model step rate; the camera runs at its own rate inside it.
const SIM_HZ: u64 = 50;

/// Simulated autopilot, airframe and camera.
#[task]
pub async fn sim_task(
    mut world: SimWorld,
    link: &'static LinkHealth,
    perception: &'static Signal<CriticalSectionRawMutex, PerceptionSample>,
    vehicle: &'static Signal<CriticalSectionRawMutex, VehicleState>,
    heartbeat_tx: Sender<'static, CriticalSectionRawMutex, AutopilotHeartbeat, 1>,
    outbound_rx: Receiver<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>,
    truth: &'static Signal<CriticalSectionRawMutex, SimSnapshot>,
) {
    let mut ticker = Ticker::every(Duration::from_hz(SIM_HZ));
    let mut last = Instant::now();
    let mut camera_was_up = false;

    loop {
        ticker.next().await;

        let now = Instant::now();
        let dt = (now - last).as_micros() as f32 / 1_000_000.0;
        let dt = dt.clamp(0.001, 0.1);
        last = now;

        // ── A. Companion -> autopilot ─────────────────────────────────────────
        while let Ok(msg) = outbound_rx.try_receive() {
            world.apply(&msg);
        }

        // ── B. Physics ────────────────────────────────────────────────────────
        world.step(dt);
        vehicle.signal(world.vehicle_state());

        // ── C. Autopilot heartbeat ────────────────────────────────────────────
        if world.heartbeat_due() {
            let _ = heartbeat_tx.try_send(AUTOPILOT_HEARTBEAT);
        }

        // ── D. Camera ─────────────────────────────────────────────────────────
        let camera_up = world.camera_connected();
        if camera_up != camera_was_up {
            debug!("camera {} at t={:.1}", if camera_up { "up" } else { "down" }, world.time_s());
            camera_was_up = camera_up;
        }
        link.set_camera(camera_up);
        if world.frame_due() {
            perception.signal(world.observe(now_s()));
        }

        truth.signal(world.snapshot());
    }
}
