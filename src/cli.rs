//! Command line for the companion binary.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use precland::config::{FilterKind, LandingConfig};
use precland::params::AutopilotKind;

use crate::sim::{Scenario, SimConfig};
use crate::tasks::control_loop::ControlLoopConfig;

#[derive(Parser, Debug)]
#[command(name = "precland-controller")]
#[command(about = "Vision-guided precision landing companion, run against a simulated vehicle")]
#[command(version)]
pub struct Args {
    /// Scripted fault scenario
    #[arg(short, long, value_enum, default_value = "nominal")]
    pub scenario: Scenario,

    /// Temporal pose filter
    #[arg(short, long, value_enum, default_value = "exp-smooth")]
    pub filter: FilterArg,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the recommended autopilot parameters and exit
    #[arg(long, value_enum)]
    pub print_params: Option<AutopilotArg>,

    // ── Mission ───────────────────────────────────────────────
    /// Seconds after link-up before the operator arms the landing
    #[arg(long, default_value_t = 1.0)]
    pub arm_delay: f32,

    /// Send an operator abort this many seconds after link-up
    #[arg(long)]
    pub abort_at: Option<f32>,

    #[arg(long, default_value_t = 120.0)]
    pub max_duration: f32,

    // ── Landing core ──────────────────────────────────────────
    #[arg(long, default_value_t = 20)]
    pub control_rate: u32,

    #[arg(long, default_value_t = 20)]
    pub landing_target_rate: u32,

    #[arg(long, default_value_t = 5)]
    pub acquire_frames: u32,

    #[arg(long, default_value_t = 0.35)]
    pub alpha: f32,

    #[arg(long, default_value_t = 1.5)]
    pub max_lateral_speed: f32,

    #[arg(long, default_value_t = 0.7)]
    pub max_descent_speed: f32,

    // ── Simulation ────────────────────────────────────────────
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 8.0)]
    pub start_altitude: f32,

    /// Initial north offset from the marker (m)
    #[arg(long, default_value_t = 1.5)]
    pub start_north: f32,

    /// Initial east offset from the marker (m)
    #[arg(long, default_value_t = -1.0)]
    pub start_east: f32,

    #[arg(long, default_value_t = 0.0)]
    pub yaw_deg: f32,

    /// Camera position noise at 5 m range (m, 1 sigma)
    #[arg(long, default_value_t = 0.03)]
    pub noise_std: f32,

    #[arg(long, default_value_t = 30.0)]
    pub camera_fps: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FilterArg {
    ExpSmooth,
    Kalman,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AutopilotArg {
    Ardupilot,
    Px4,
}

impl From<AutopilotArg> for AutopilotKind {
    fn from(a: AutopilotArg) -> Self {
        match a {
            AutopilotArg::Ardupilot => AutopilotKind::ArduPilot,
            AutopilotArg::Px4 => AutopilotKind::Px4,
        }
    }
}

impl Args {
    /// Defaults with the command-line overrides applied, validated.
    pub fn landing_config(&self) -> Result<LandingConfig> {
        let mut config = LandingConfig::default();
        config.filter.kind = match self.filter {
            FilterArg::ExpSmooth => FilterKind::ExpSmooth,
            FilterArg::Kalman => FilterKind::Kalman,
        };
        config.filter.alpha = self.alpha;
        config.fsm.consecutive_frames_for_acquire = self.acquire_frames;
        config.safety.max_lateral_speed_mps = self.max_lateral_speed;
        config.safety.max_descent_speed_mps = self.max_descent_speed;
        config.rates.control_rate_hz = self.control_rate;
        config.rates.landing_target_rate_hz = self.landing_target_rate;

        config
            .validate()
            .context("invalid landing configuration")?;
        Ok(config)
    }

    pub fn control_loop_config(&self) -> ControlLoopConfig {
        ControlLoopConfig {
            arm_delay_s: self.arm_delay,
            abort_at_s: self.abort_at,
            max_duration_s: self.max_duration,
        }
    }

    pub fn sim_config(&self) -> Result<SimConfig> {
        if !(self.camera_fps > 0.0) {
            anyhow::bail!("camera fps must be positive (got {})", self.camera_fps);
        }
        Ok(SimConfig {
            scenario: self.scenario,
            seed: self.seed,
            start_altitude_m: self.start_altitude,
            start_offset_ned: [self.start_north, self.start_east],
            yaw_rad: self.yaw_deg.to_radians(),
            noise_std_m: self.noise_std.max(0.0),
            camera_fps: self.camera_fps,
        })
    }
}
