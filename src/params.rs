//! Recommended autopilot parameters for companion-computer precision
//! landing.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutopilotKind {
    ArduPilot,
    Px4,
}

impl fmt::Display for AutopilotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AutopilotKind::ArduPilot => "ardupilot",
            AutopilotKind::Px4 => "px4",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("unknown autopilot, expected `ardupilot` or `px4`")]
pub struct UnknownAutopilot;

impl FromStr for AutopilotKind {
    type Err = UnknownAutopilot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ardupilot") {
            Ok(AutopilotKind::ArduPilot)
        } else if s.eq_ignore_ascii_case("px4") {
            Ok(AutopilotKind::Px4)
        } else {
            Err(UnknownAutopilot)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterProfile {
    pub name: &'static str,
    pub autopilot: AutopilotKind,
    pub description: &'static str,
    /// (PARAM_SET id, value) pairs.
    pub parameters: &'static [(&'static str, f32)],
}

pub const ARDUPILOT_PRECISION_LANDING: ParameterProfile = ParameterProfile {
    name: "ardupilot_precland",
    autopilot: AutopilotKind::ArduPilot,
    description: "ArduPilot Copter precision landing from a companion computer",
    parameters: &[
        ("PLND_ENABLED", 1.0),
        ("PLND_TYPE", 1.0),         // companion computer
        ("PLND_EST_TYPE", 0.0),     // raw sensor
        ("PLND_LAG", 0.02),         // s
        ("PLND_XY_DIST_MAX", 4.0),  // m
        ("PLND_STRICT", 1.0),
        ("PLND_TIMEOUT", 4.0),      // s
        ("PLND_RET_MAX", 4.0),
        ("PLND_OPTIONS", 0.0),
        ("LAND_SPEED", 40.0),       // cm/s
        ("LAND_SPEED_HIGH", 100.0), // cm/s
    ],
};

pub const PX4_PRECISION_LANDING: ParameterProfile = ParameterProfile {
    name: "px4_precland",
    autopilot: AutopilotKind::Px4,
    description: "PX4 precision landing",
    parameters: &[
        ("PLD_BTOUT", 5.0),      // s
        ("PLD_HACC_RAD", 0.25),  // m
        ("PLD_FAPPR_ALT", 10.0), // m
        ("PLD_SRCH_ALT", 15.0),  // m
        ("PLD_SRCH_TOUT", 10.0), // s
        ("RTL_LAND_DELAY", 0.0),
        ("MPC_LAND_SPEED", 0.7), // m/s
        ("MPC_LAND_ALT1", 10.0), // m
        ("MPC_LAND_ALT2", 5.0),  // m
    ],
};

pub const fn profile(kind: AutopilotKind) -> &'static ParameterProfile {
    match kind {
        AutopilotKind::ArduPilot => &ARDUPILOT_PRECISION_LANDING,
        AutopilotKind::Px4 => &PX4_PRECISION_LANDING,
    }
}
