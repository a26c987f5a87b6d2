use embassy_executor::task;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use tracing::{error, info, warn};

use precland::config::{ConfigError, LandingConfig};
use precland::control::fsm::LandingFsm;
use precland::control::policy::{fsm_inputs, Commands, Observation, SetpointPolicy};
use precland::control::safety::{SafetySample, SafetySupervisor};
use precland::drivers::filter::{AnyPoseFilter, PoseFilter};
use precland::drivers::frames::{body_to_mavlink_fields, cam_to_body, CameraExtrinsics};
use precland::drivers::landing_target::{LandingTarget, LandingTargetPublisher, Transport};
use precland::link::LinkHealth;
use precland::state::{AbortReason, FilteredPose, LandingState, PerceptionSample, VehicleState};
use precland::telemetry::{TelemetrySample, TelemetrySink};

use super::{now_s, ChannelSink, ChannelTransport, Outbound, OUTBOUND_DEPTH, TELEMETRY_DEPTH};

/// Keep commanding after a terminal state so the abort climb and the final
/// LANDING_TARGET burst reach the autopilot.
const TERMINAL_HOLD_S: f32 = 2.0;
const LINK_WAIT_POLL_MS: u64 = 50;

pub struct ControlLoopConfig {
    /// Seconds after link-up before the arm command is asserted.
    pub arm_delay_s: f32,
    pub abort_at_s: Option<f32>,
    pub max_duration_s: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct MissionReport {
    pub final_state: LandingState,
    pub abort_reason: Option<AbortReason>,
    pub elapsed_s: f32,
    pub ticks: u32,
    pub landing_targets_sent: u32,
    pub telemetry_dropped: u32,
    pub timed_out: bool,
}

impl MissionReport {
    fn setup_failed() -> Self {
        Self {
            final_state: LandingState::Failsafe,
            abort_reason: None,
            elapsed_s: 0.0,
            ticks: 0,
            landing_targets_sent: 0,
            telemetry_dropped: 0,
            timed_out: false,
        }
    }

    /// 0 on touchdown, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.final_state {
            LandingState::Touchdown => 0,
            _ => 1,
        }
    }
}

fn build_estimators(
    config: &LandingConfig,
) -> Result<(AnyPoseFilter, LandingTargetPublisher), ConfigError> {
    let filter = AnyPoseFilter::from_config(&config.filter)?;
    let publisher = LandingTargetPublisher::new(config.rates.landing_target_rate_hz as f32, 0)?;
    Ok((filter, publisher))
}

// ── Task ─────────────────────────────────────────────────────────────────────

#[task]
pub async fn control_loop_task(
    config: &'static LandingConfig,
    loop_config: ControlLoopConfig,
    link: &'static LinkHealth,
    perception: &'static Signal<CriticalSectionRawMutex, PerceptionSample>,
    vehicle: &'static Signal<CriticalSectionRawMutex, VehicleState>,
    outbound_tx: Sender<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>,
    telemetry_tx: Sender<'static, CriticalSectionRawMutex, TelemetrySample, TELEMETRY_DEPTH>,
    done: &'static Signal<CriticalSectionRawMutex, MissionReport>,
) {
    let (mut filter, mut publisher) = match build_estimators(config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("control loop setup failed: {e}");
            done.signal(MissionReport::setup_failed());
            return;
        }
    };
    let mut fsm = LandingFsm::new(config.fsm);
    let mut policy = SetpointPolicy::new(&config.guidance, &config.safety);
    let extrinsics = CameraExtrinsics::downward_facing();
    let mut transport = ChannelTransport::new(outbound_tx);
    let mut sink = ChannelSink::new(telemetry_tx);

    // ── Wait for both links before the first decision ─────────────────────────
    info!("waiting for autopilot heartbeat and camera");
    while !link.all_connected() {
        Timer::after(Duration::from_millis(LINK_WAIT_POLL_MS)).await;
    }
    info!("links up, control loop at {} Hz", config.rates.control_rate_hz);

    let start_s = now_s();
    let mut supervisor = SafetySupervisor::new(config.safety, start_s);

    let mut ticker = Ticker::every(Duration::from_hz(config.rates.control_rate_hz as u64));

    // Local cached data
    let mut latest = PerceptionSample {
        landability_score: 1.0,
        ..Default::default()
    };
    let mut state = VehicleState::default();
    let mut pose = FilteredPose::default();
    let mut terminal_since_s: Option<f32> = None;
    let mut ticks: u32 = 0;
    let mut was_abort_requested = false;

    loop {
        ticker.next().await;
        ticks = ticks.wrapping_add(1);
        let now = now_s();
        let elapsed = now - start_s;

        // ── A. Latest perception and vehicle state ────────────────────────────
        let fresh = perception.try_take();
        if let Some(frame) = fresh {
            latest = frame;
        }
        if let Some(v) = vehicle.try_take() {
            state = v;
        }

        // ── B. Pose filter ────────────────────────────────────────────────────
        if let Some(frame) = fresh {
            if let (true, Some(tvec)) = (frame.target_visible, frame.tvec_cam) {
                pose = filter.update(tvec, frame.measurement_variance, frame.timestamp);
            }
        }
        let obs = Observation {
            frame: latest,
            pose,
            target_body: cam_to_body(pose.position, &extrinsics),
            vehicle: state,
            mavlink_connected: link.mavlink_connected(),
            camera_connected: link.camera_connected(),
        };

        // ── C. Safety supervisor ──────────────────────────────────────────────
        let status = supervisor.check(
            now,
            &SafetySample {
                perception_active: fresh.is_some(),
                mavlink_active: obs.mavlink_connected,
                lateral_speed: state.lateral_speed_mps,
                descent_speed: state.descent_speed_mps,
                altitude: state.altitude_m,
                landability_score: latest.landability_score,
                human_present: latest.human_present,
            },
        );
        let abort_requested = supervisor.should_abort();
        if abort_requested && !was_abort_requested && !fsm.state().is_terminal() {
            warn!("supervisor requests abort in {}", fsm.state());
        }
        was_abort_requested = abort_requested;

        // ── D. State machine ──────────────────────────────────────────────────
        let commands = Commands {
            arm: elapsed >= loop_config.arm_delay_s,
            abort: loop_config.abort_at_s.is_some_and(|t| elapsed >= t),
        };
        let out = fsm.tick(&fsm_inputs(&obs, status.violations, commands, elapsed));
        if out.state_changed {
            match out.abort_reason {
                Some(reason) => info!("state -> {} ({reason})", out.state),
                None => info!("state -> {}", out.state),
            }
        }

        // ── E. Guidance ───────────────────────────────────────────────────────
        if let Some(setpoint) = policy.setpoint(&out, &obs, elapsed, &supervisor) {
            transport.send_velocity_setpoint(&setpoint);
        }

        // ── F. LANDING_TARGET ─────────────────────────────────────────────────
        if out.publish_landing_target && pose.is_valid {
            let fields = body_to_mavlink_fields(obs.target_body);
            let msg = LandingTarget::from_fields(&fields, Instant::now().as_micros());
            publisher.publish(&mut transport, &msg, out.state_changed);
        }

        // ── G. Telemetry ──────────────────────────────────────────────────────
        sink.record(TelemetrySample {
            timestamp_s: elapsed,
            frame_id: latest.frame_id,
            latency_ms: ((now - latest.timestamp) * 1000.0).max(0.0),
            target_confidence: latest.confidence,
            pose: pose.is_valid.then_some(obs.target_body),
            variance: obs.variance(),
            landability_score: latest.landability_score,
            state: out.state,
        });

        // ── H. Termination ────────────────────────────────────────────────────
        if out.state.is_terminal() && terminal_since_s.is_none() {
            terminal_since_s = Some(elapsed);
        }
        let hold_done = terminal_since_s.is_some_and(|t| elapsed - t >= TERMINAL_HOLD_S);
        let timed_out = elapsed >= loop_config.max_duration_s;
        if hold_done || timed_out {
            done.signal(MissionReport {
                final_state: out.state,
                abort_reason: out.abort_reason,
                elapsed_s: elapsed,
                ticks,
                landing_targets_sent: publisher.message_count(),
                telemetry_dropped: sink.dropped(),
                timed_out: timed_out && !out.state.is_terminal(),
            });
            return;
        }
    }
}
