//! Landing state machine.
//!
//! One [`LandingFsm::tick`] per control cycle. The machine is a pure
//! function of its own state and the inputs it is handed: it performs no
//! I/O and reads no clock, so replaying an input sequence after `reset()`
//! reproduces the same outputs.
//!
//! Safety rules are evaluated before any progression rule:
//! 1. a lost autopilot or camera link sends the machine to FAILSAFE,
//! 2. an external abort command sends it to ABORT,
//! 3. a human in the landing area sends it to ABORT unless it has not
//!    started the approach yet (INIT, IDLE).
//!
//! TOUCHDOWN, ABORT and FAILSAFE are absorbing; only `reset()` leaves them.

use crate::config::FsmConfig;
use crate::fmt::{log_info, log_warn};
use crate::state::{AbortReason, LandingState, SystemInputs, SystemOutputs};

// ── Output gains ─────────────────────────────────────────────────────────────

const SEARCH_CONFIDENCE_GAIN: f32 = 0.5;
const ACQUIRE_CONFIDENCE_GAIN: f32 = 0.7;

pub struct LandingFsm {
    config: FsmConfig,
    state: LandingState,
    prev_state: LandingState,
    consecutive_detections: u32,
    /// Timestamp of the first tick without the target while aligned or
    /// descending.
    target_lost_since: Option<f32>,
    abort_reason: Option<AbortReason>,
}

impl LandingFsm {
    pub fn new(config: FsmConfig) -> Self {
        Self {
            config,
            state: LandingState::Init,
            prev_state: LandingState::Init,
            consecutive_detections: 0,
            target_lost_since: None,
            abort_reason: None,
        }
    }

    pub fn state(&self) -> LandingState {
        self.state
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.state = LandingState::Init;
        self.prev_state = LandingState::Init;
        self.consecutive_detections = 0;
        self.target_lost_since = None;
        self.abort_reason = None;
    }

    pub fn tick(&mut self, inputs: &SystemInputs) -> SystemOutputs {
        self.prev_state = self.state;

        if self.state.is_terminal() {
            return self.outputs();
        }

        if !inputs.mavlink_connected || !inputs.camera_connected {
            self.abort(LandingState::Failsafe, AbortReason::LinkLost);
            return self.outputs();
        }

        if inputs.abort_command {
            self.abort(LandingState::Abort, AbortReason::ExternalCommand);
            return self.outputs();
        }

        if inputs.human_present
            && !matches!(self.state, LandingState::Init | LandingState::Idle)
        {
            self.abort(LandingState::Abort, AbortReason::HumanPresent);
            return self.outputs();
        }

        match self.state {
            LandingState::Init => self.handle_init(inputs),
            LandingState::Idle => self.handle_idle(inputs),
            LandingState::Search => self.handle_search(inputs),
            LandingState::Acquire => self.handle_acquire(inputs),
            LandingState::Align => self.handle_align(inputs),
            LandingState::Descend => self.handle_descend(inputs),
            LandingState::Touchdown | LandingState::Abort | LandingState::Failsafe => {}
        }

        self.outputs()
    }

    // ── State handlers ───────────────────────────────────────────────────────

    fn handle_init(&mut self, inputs: &SystemInputs) {
        // Links are already known to be up here.
        if inputs.mavlink_connected && inputs.camera_connected {
            self.transition_to(LandingState::Idle);
        }
    }

    fn handle_idle(&mut self, inputs: &SystemInputs) {
        if !inputs.arm_command {
            return;
        }
        if inputs.target_visible {
            self.transition_to(LandingState::Acquire);
        } else {
            self.transition_to(LandingState::Search);
        }
    }

    fn handle_search(&mut self, inputs: &SystemInputs) {
        if inputs.target_visible && inputs.target_confidence >= self.config.acquire_confidence {
            self.consecutive_detections += 1;
            if self.consecutive_detections >= self.config.consecutive_frames_for_acquire {
                self.transition_to(LandingState::Acquire);
            }
        } else {
            self.consecutive_detections = 0;
        }
    }

    fn handle_acquire(&mut self, inputs: &SystemInputs) {
        if !inputs.target_visible {
            self.transition_to(LandingState::Search);
        } else if inputs.landability_score < self.config.abort_landability {
            self.abort(LandingState::Abort, AbortReason::LowLandability);
        } else if inputs.variance < self.config.max_variance {
            self.transition_to(LandingState::Align);
        }
    }

    fn handle_align(&mut self, inputs: &SystemInputs) {
        if !inputs.target_visible {
            self.handle_target_lost(inputs.timestamp);
        } else {
            self.target_lost_since = None;
            if inputs.landability_score < self.config.abort_landability {
                self.abort(LandingState::Abort, AbortReason::LowLandability);
            } else if inputs.lateral_error_m <= self.config.align_error_m {
                self.transition_to(LandingState::Descend);
            }
        }
    }

    fn handle_descend(&mut self, inputs: &SystemInputs) {
        if !inputs.target_visible {
            self.handle_target_lost(inputs.timestamp);
        } else {
            self.target_lost_since = None;
            if inputs.landability_score < self.config.abort_landability {
                self.abort(LandingState::Abort, AbortReason::LowLandability);
            } else if inputs.altitude_m <= self.config.touchdown_altitude_m {
                self.transition_to(LandingState::Touchdown);
            }
        }
    }

    fn handle_target_lost(&mut self, now: f32) {
        match self.target_lost_since {
            None => self.target_lost_since = Some(now),
            Some(since) if now - since > self.config.target_lost_timeout_s => {
                log_warn!("target lost for more than {} s, searching", self.config.target_lost_timeout_s);
                self.transition_to(LandingState::Search);
            }
            Some(_) => {}
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn transition_to(&mut self, next: LandingState) {
        if next == self.state {
            return;
        }
        log_info!("fsm transition {} -> {}", self.state.label(), next.label());
        self.state = next;
        self.consecutive_detections = 0;
        self.target_lost_since = None;
    }

    fn abort(&mut self, next: LandingState, reason: AbortReason) {
        if self.abort_reason.is_none() {
            log_warn!("landing abandoned: {}", reason.as_str());
            self.abort_reason = Some(reason);
        }
        self.transition_to(next);
    }

    fn outputs(&self) -> SystemOutputs {
        let confidence_gain = match self.state {
            LandingState::Search => SEARCH_CONFIDENCE_GAIN,
            LandingState::Acquire => ACQUIRE_CONFIDENCE_GAIN,
            _ => 1.0,
        };
        SystemOutputs {
            state: self.state,
            publish_landing_target: self.state.publishes_target(),
            abort_reason: self.abort_reason,
            confidence_gain,
            state_changed: self.state != self.prev_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm() -> LandingFsm {
        LandingFsm::new(FsmConfig::default())
    }

    fn good() -> SystemInputs {
        SystemInputs {
            target_visible: true,
            target_confidence: 0.9,
            lateral_error_m: 0.1,
            altitude_m: 10.0,
            landability_score: 0.9,
            arm_command: true,
            variance: 0.1,
            ..SystemInputs::default()
        }
    }

    /// Drives a fresh machine into `target` with well-behaved inputs.
    fn drive_to(target: LandingState) -> LandingFsm {
        let mut f = fsm();
        let mut t = 0.0;
        while f.state() != target {
            let mut inp = good();
            inp.timestamp = t;
            if target == LandingState::Search {
                inp.target_visible = false;
            }
            if target == LandingState::Touchdown && f.state() == LandingState::Descend {
                inp.altitude_m = 0.3;
            }
            f.tick(&inp);
            t += 0.05;
            assert!(t < 10.0, "never reached {:?}", target);
        }
        f
    }

    #[test]
    fn nominal_sequence_reaches_descend_in_four_ticks() {
        let mut f = fsm();
        let inp = good();
        assert_eq!(f.tick(&inp).state, LandingState::Idle);
        assert_eq!(f.tick(&inp).state, LandingState::Acquire);
        assert_eq!(f.tick(&inp).state, LandingState::Align);
        let out = f.tick(&inp);
        assert_eq!(out.state, LandingState::Descend);
        assert!(out.publish_landing_target);
        assert!(out.state_changed);
        assert_eq!(out.confidence_gain, 1.0);
        assert_eq!(out.abort_reason, None);
    }

    #[test]
    fn search_needs_consecutive_confident_frames() {
        let mut f = LandingFsm::new(FsmConfig {
            consecutive_frames_for_acquire: 3,
            ..FsmConfig::default()
        });
        let mut inp = SystemInputs { arm_command: true, ..SystemInputs::default() };
        f.tick(&inp);
        let out = f.tick(&inp);
        assert_eq!(out.state, LandingState::Search);
        assert_eq!(out.confidence_gain, 0.5);
        assert!(!out.publish_landing_target);

        inp.target_visible = true;
        inp.target_confidence = 0.9;
        assert_eq!(f.tick(&inp).state, LandingState::Search);
        assert_eq!(f.tick(&inp).state, LandingState::Search);
        let out = f.tick(&inp);
        assert_eq!(out.state, LandingState::Acquire);
        assert_eq!(out.confidence_gain, 0.7);
    }

    #[test]
    fn search_counter_resets_on_weak_frame() {
        let mut f = LandingFsm::new(FsmConfig {
            consecutive_frames_for_acquire: 3,
            ..FsmConfig::default()
        });
        let mut inp = SystemInputs { arm_command: true, ..SystemInputs::default() };
        f.tick(&inp);
        f.tick(&inp);
        inp.target_visible = true;
        inp.target_confidence = 0.9;
        f.tick(&inp);
        f.tick(&inp);
        inp.target_confidence = 0.5;
        f.tick(&inp);
        inp.target_confidence = 0.9;
        f.tick(&inp);
        f.tick(&inp);
        assert_eq!(f.state(), LandingState::Search);
        assert_eq!(f.tick(&inp).state, LandingState::Acquire);
    }

    #[test]
    fn init_waits_for_links_then_idles_until_armed() {
        let mut f = fsm();
        let idle = SystemInputs::default();
        assert_eq!(f.tick(&idle).state, LandingState::Idle);
        assert_eq!(f.tick(&idle).state, LandingState::Idle);
        assert!(!f.tick(&idle).state_changed);
    }

    #[test]
    fn link_loss_overrides_everything() {
        for state in [
            LandingState::Init,
            LandingState::Idle,
            LandingState::Search,
            LandingState::Acquire,
            LandingState::Align,
            LandingState::Descend,
        ] {
            for camera in [true, false] {
                let mut f = drive_to(state);
                let inp = SystemInputs {
                    mavlink_connected: camera,
                    camera_connected: !camera,
                    abort_command: true,
                    human_present: true,
                    ..good()
                };
                let out = f.tick(&inp);
                assert_eq!(out.state, LandingState::Failsafe, "from {:?}", state);
                assert_eq!(out.abort_reason, Some(AbortReason::LinkLost));
            }
        }
    }

    #[test]
    fn external_abort_beats_human_presence() {
        let mut f = drive_to(LandingState::Align);
        let out = f.tick(&SystemInputs { abort_command: true, human_present: true, ..good() });
        assert_eq!(out.state, LandingState::Abort);
        assert_eq!(out.abort_reason, Some(AbortReason::ExternalCommand));
    }

    #[test]
    fn external_abort_applies_before_arming() {
        let mut f = drive_to(LandingState::Idle);
        let out = f.tick(&SystemInputs { abort_command: true, ..SystemInputs::default() });
        assert_eq!(out.state, LandingState::Abort);
    }

    #[test]
    fn human_aborts_active_phases_only() {
        for state in [
            LandingState::Search,
            LandingState::Acquire,
            LandingState::Align,
            LandingState::Descend,
        ] {
            let mut f = drive_to(state);
            let out = f.tick(&SystemInputs { human_present: true, ..good() });
            assert_eq!(out.state, LandingState::Abort, "from {:?}", state);
            assert_eq!(out.abort_reason, Some(AbortReason::HumanPresent));
            assert!(!out.publish_landing_target);
        }

        let mut f = drive_to(LandingState::Idle);
        let out = f.tick(&SystemInputs { human_present: true, ..SystemInputs::default() });
        assert_eq!(out.state, LandingState::Idle);
    }

    #[test]
    fn low_landability_aborts_during_approach() {
        for state in [LandingState::Acquire, LandingState::Align, LandingState::Descend] {
            let mut f = drive_to(state);
            let out = f.tick(&SystemInputs { landability_score: 0.2, ..good() });
            assert_eq!(out.state, LandingState::Abort, "from {:?}", state);
            assert_eq!(out.abort_reason, Some(AbortReason::LowLandability));
        }
    }

    #[test]
    fn acquire_waits_for_variance_and_falls_back_without_target() {
        let mut f = drive_to(LandingState::Acquire);
        let out = f.tick(&SystemInputs { variance: 0.8, ..good() });
        assert_eq!(out.state, LandingState::Acquire);
        let out = f.tick(&SystemInputs { target_visible: false, ..good() });
        assert_eq!(out.state, LandingState::Search);
    }

    #[test]
    fn align_holds_until_lateral_error_small() {
        let mut f = drive_to(LandingState::Align);
        assert_eq!(
            f.tick(&SystemInputs { lateral_error_m: 0.6, ..good() }).state,
            LandingState::Align
        );
        assert_eq!(
            f.tick(&SystemInputs { lateral_error_m: 0.25, ..good() }).state,
            LandingState::Descend
        );
    }

    #[test]
    fn target_lost_timeout_returns_to_search() {
        let mut f = drive_to(LandingState::Descend);
        let lost = |t: f32| SystemInputs { target_visible: false, timestamp: t, ..good() };
        assert_eq!(f.tick(&lost(10.0)).state, LandingState::Descend);
        assert_eq!(f.tick(&lost(11.0)).state, LandingState::Descend);
        assert_eq!(f.tick(&lost(12.0)).state, LandingState::Descend);
        assert_eq!(f.tick(&lost(12.1)).state, LandingState::Search);
    }

    #[test]
    fn reappearing_target_clears_lost_timer() {
        let mut f = drive_to(LandingState::Align);
        let mut inp = SystemInputs { target_visible: false, lateral_error_m: 1.0, ..good() };
        inp.timestamp = 10.0;
        f.tick(&inp);
        inp.timestamp = 11.5;
        inp.target_visible = true;
        f.tick(&inp);
        inp.target_visible = false;
        inp.timestamp = 12.5;
        assert_eq!(f.tick(&inp).state, LandingState::Align);
        inp.timestamp = 14.0;
        assert_eq!(f.tick(&inp).state, LandingState::Align);
        inp.timestamp = 14.6;
        assert_eq!(f.tick(&inp).state, LandingState::Search);
    }

    #[test]
    fn touchdown_at_low_altitude() {
        let mut f = drive_to(LandingState::Descend);
        assert_eq!(
            f.tick(&SystemInputs { altitude_m: 0.5, ..good() }).state,
            LandingState::Touchdown
        );
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let nasty = [
            SystemInputs { mavlink_connected: false, ..good() },
            SystemInputs { abort_command: true, ..good() },
            SystemInputs { human_present: true, ..good() },
            good(),
            SystemInputs::default(),
        ];
        for state in [LandingState::Touchdown, LandingState::Abort, LandingState::Failsafe] {
            let mut f = match state {
                LandingState::Touchdown => drive_to(state),
                LandingState::Abort => {
                    let mut f = drive_to(LandingState::Search);
                    f.tick(&SystemInputs { abort_command: true, ..good() });
                    f
                }
                _ => {
                    let mut f = fsm();
                    f.tick(&SystemInputs { camera_connected: false, ..good() });
                    f
                }
            };
            assert_eq!(f.state(), state);
            let reason = f.abort_reason();
            for inp in &nasty {
                let out = f.tick(inp);
                assert_eq!(out.state, state);
                assert_eq!(out.abort_reason, reason);
                assert!(!out.state_changed);
            }
        }
    }

    #[test]
    fn reset_returns_to_init_and_clears_reason() {
        let mut f = drive_to(LandingState::Descend);
        f.tick(&SystemInputs { human_present: true, ..good() });
        assert_eq!(f.abort_reason(), Some(AbortReason::HumanPresent));
        f.reset();
        assert_eq!(f.state(), LandingState::Init);
        assert_eq!(f.abort_reason(), None);
        assert_eq!(f.tick(&good()).state, LandingState::Idle);
    }

    #[test]
    fn replay_after_reset_is_identical() {
        let script: Vec<SystemInputs> = (0..60)
            .map(|i| {
                let t = i as f32 * 0.05;
                SystemInputs {
                    target_visible: i % 7 != 3,
                    target_confidence: if i % 5 == 0 { 0.5 } else { 0.85 },
                    lateral_error_m: 1.0 / (1.0 + t),
                    altitude_m: 10.0 - t * 3.0,
                    variance: 0.6 - t * 0.1,
                    timestamp: t,
                    arm_command: i > 2,
                    ..SystemInputs::default()
                }
            })
            .collect();

        let mut f = fsm();
        let first: Vec<SystemOutputs> = script.iter().map(|i| f.tick(i)).collect();
        f.reset();
        let second: Vec<SystemOutputs> = script.iter().map(|i| f.tick(i)).collect();
        assert_eq!(first, second);
    }
}
