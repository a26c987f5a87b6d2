//! Precision-landing decision and control core.
//!
//! The library holds everything that runs inside the landing control loop:
//! the landing state machine, the safety supervisor, the temporal pose
//! filters and the guidance law, plus the frame conversions and outbound
//! message plumbing around them. It builds without `std` so the same core
//! can run on a flight controller; the `std` feature adds `tracing` output
//! and the host companion binary.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub(crate) mod fmt;

pub mod config;
pub mod control;
pub mod drivers;
pub mod link;
pub mod params;
pub mod state;
pub mod telemetry;
pub mod throttle;

pub use config::{ConfigError, LandingConfig};
pub use control::fsm::LandingFsm;
pub use control::guidance::GuidanceController;
pub use control::safety::SafetySupervisor;
pub use drivers::filter::{AnyPoseFilter, ExpSmoother, PoseFilter};
pub use drivers::kalman::KalmanFilter3D;
pub use state::{
    AbortReason, FilteredPose, GuidanceSetpoint, LandingState, SystemInputs, SystemOutputs,
};
