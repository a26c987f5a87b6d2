//! Precision-landing companion.
//!
//! Runs the landing core at its control rate against a simulated autopilot,
//! airframe and camera. Exits 0 on touchdown, 1 on any other outcome and 2
//! on a configuration error.

mod cli;
mod sim;
mod tasks;

use anyhow::Result;
use clap::Parser;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use precland::config::LandingConfig;
use precland::link::{AutopilotHeartbeat, CancelToken, LinkHealth};
use precland::params::{self, AutopilotKind};
use precland::state::{PerceptionSample, VehicleState};
use precland::telemetry::TelemetrySample;

use crate::cli::Args;
use crate::sim::{SimSnapshot, SimWorld};
use crate::tasks::control_loop::{control_loop_task, ControlLoopConfig, MissionReport};
use crate::tasks::heartbeat_task::heartbeat_task;
use crate::tasks::sim_task::sim_task;
use crate::tasks::telemetry_task::telemetry_task;
use crate::tasks::{Outbound, OUTBOUND_DEPTH, TELEMETRY_DEPTH};

// ── Shared link state ─────────────────────────────────────────────────────────
static LINK_HEALTH: LinkHealth = LinkHealth::new();

// ── Latest-value feeds ────────────────────────────────────────────────────────
//  The control loop only ever wants the newest frame and vehicle state.
static PERCEPTION: Signal<CriticalSectionRawMutex, PerceptionSample> = Signal::new();
static VEHICLE: Signal<CriticalSectionRawMutex, VehicleState> = Signal::new();
static SIM_TRUTH: Signal<CriticalSectionRawMutex, SimSnapshot> = Signal::new();

// ── Inter-task channels ───────────────────────────────────────────────────────
static AUTOPILOT_HB_CHAN: Channel<CriticalSectionRawMutex, AutopilotHeartbeat, 1> = Channel::new();
static OUTBOUND_CHAN: Channel<CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH> = Channel::new();
static TELEMETRY_CHAN: Channel<CriticalSectionRawMutex, TelemetrySample, TELEMETRY_DEPTH> =
    Channel::new();

// ── Lifecycle ─────────────────────────────────────────────────────────────────
static HEARTBEAT_CANCEL: CancelToken = CancelToken::new();
static HEARTBEAT_STOPPED: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static MISSION_DONE: Signal<CriticalSectionRawMutex, MissionReport> = Signal::new();

static CONFIG: StaticCell<LandingConfig> = StaticCell::new();

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_params(kind: AutopilotKind) {
    let profile = params::profile(kind);
    println!("# {} ({})", profile.description, profile.name);
    for (id, value) in profile.parameters {
        println!("{id:<16} {value}");
    }
}

fn setup(args: &Args) -> Result<(LandingConfig, ControlLoopConfig, SimWorld)> {
    let config = args.landing_config()?;
    let world = SimWorld::new(args.sim_config()?)?;
    Ok((config, args.control_loop_config(), world))
}

fn log_report(report: &MissionReport, truth: Option<SimSnapshot>) {
    match report.abort_reason {
        Some(reason) => info!(
            "mission ended in {} ({reason}) after {:.1} s",
            report.final_state, report.elapsed_s
        ),
        None => info!("mission ended in {} after {:.1} s", report.final_state, report.elapsed_s),
    }
    if report.timed_out {
        warn!("time limit reached before the landing finished");
    }
    info!(
        "{} control ticks, {} LANDING_TARGET messages",
        report.ticks, report.landing_targets_sent
    );
    if report.telemetry_dropped > 0 {
        warn!("{} telemetry samples dropped", report.telemetry_dropped);
    }
    if let Some(t) = truth {
        info!(
            "sim t={:.1} s: vehicle at {:.2} m altitude, {:.2} m from the marker ({} setpoints, {} LANDING_TARGET, {} heartbeats received)",
            t.time_s,
            t.altitude_m,
            t.lateral_offset_m,
            t.stats.setpoints,
            t.stats.landing_targets,
            t.stats.heartbeats
        );
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. CLI and logging
    let args = Args::parse();
    init_tracing(&args.log_level);

    if let Some(autopilot) = args.print_params {
        print_params(autopilot.into());
        std::process::exit(0);
    }

    // 2. Configuration
    let (config, loop_config, world) = match setup(&args) {
        Ok(parts) => parts,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(2);
        }
    };
    info!(
        "scenario {:?}, filter {:?}, start altitude {:.1} m",
        args.scenario, config.filter.kind, args.start_altitude
    );
    let config: &'static LandingConfig = CONFIG.init(config);

    // 3. Spawn all tasks
    spawner
        .spawn(heartbeat_task(
            config.link,
            &LINK_HEALTH,
            AUTOPILOT_HB_CHAN.receiver(),
            OUTBOUND_CHAN.sender(),
            &HEARTBEAT_CANCEL,
            &HEARTBEAT_STOPPED,
        ))
        .unwrap();

    spawner
        .spawn(sim_task(
            world,
            &LINK_HEALTH,
            &PERCEPTION,
            &VEHICLE,
            AUTOPILOT_HB_CHAN.sender(),
            OUTBOUND_CHAN.receiver(),
            &SIM_TRUTH,
        ))
        .unwrap();

    spawner
        .spawn(telemetry_task(TELEMETRY_CHAN.receiver()))
        .unwrap();

    spawner
        .spawn(control_loop_task(
            config,
            loop_config,
            &LINK_HEALTH,
            &PERCEPTION,
            &VEHICLE,
            OUTBOUND_CHAN.sender(),
            TELEMETRY_CHAN.sender(),
            &MISSION_DONE,
        ))
        .unwrap();

    // 4. Wait for the mission, then stop the heartbeat cleanly
    let report = MISSION_DONE.wait().await;
    HEARTBEAT_CANCEL.cancel();
    HEARTBEAT_STOPPED.wait().await;

    log_report(&report, SIM_TRUTH.try_take());
    std::process::exit(report.exit_code());
}
