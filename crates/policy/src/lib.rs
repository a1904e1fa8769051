//! The tick-driven turn-taking control loop ("frontal cortex") and its
//! four user-turn-off policy variants.
//!
//! [`FrontalCortex`] owns the shared tick sequence (§4.5); each variant
//! supplies only [`TurnOffPolicy::trigger_user_turn_off`] (§4.6). Plugging
//! in a fake [`duet_turn::Predictor`] and [`duet_dm::DialogManager`] makes
//! the whole loop deterministically testable against literal timestamps.

mod variants;

pub use variants::{BaselineAsr, BaselineVad, Eot, Prediction};

use duet_cns::{Cns, DialogState, Speaker};
use duet_dm::DialogManager;

/// Configuration surface named in §6: thresholds and durations, all in
/// milliseconds where the spec uses seconds (`fallback_duration`,
/// `no_input_duration`) to match the engine's `now_ms: i64` convention.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub loop_time_ms: i64,
    pub fallback_duration_ms: i64,
    pub no_input_duration_ms: i64,
    /// Shared threshold for both `interruption_ratio` and `repeat_ratio`
    /// (spec.md's Open Questions resolution: one value unless
    /// configuration distinguishes them).
    pub interruption_ratio: f32,
    pub trp_threshold: f32,
    pub speak_first: bool,
    pub no_rank: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            loop_time_ms: 50,
            fallback_duration_ms: 700,
            no_input_duration_ms: 5_000,
            interruption_ratio: 0.8,
            trp_threshold: 0.1,
            speak_first: true,
            no_rank: true,
        }
    }
}

/// Who held the floor on the last tick, per `update_dialog_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSpeaker {
    User,
    Agent,
    Both,
}

/// One user-turn-off trigger, the only thing that differs between the
/// four policy variants (§4.6). `now_ms` is the tick's wall-clock
/// timestamp; implementations must not read a clock themselves so tests
/// can replay literal histories.
pub trait TurnOffPolicy {
    /// Returns true if the user turn should end (and, if so, has already
    /// finalized it via `cns.finalize_user`).
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool;
}

/// The shared control loop. Generic over the turn-off policy so the four
/// variants reuse every other rule (fallback, interruption, retrigger,
/// dialog-state reconciliation, termination) unchanged.
pub struct FrontalCortex<P: TurnOffPolicy> {
    cns: std::sync::Arc<Cns>,
    dm: Box<dyn DialogManager>,
    policy: P,
    config: PolicyConfig,
    dialog_ended: bool,
    last_speaker: Option<LastSpeaker>,
}

impl<P: TurnOffPolicy> FrontalCortex<P> {
    pub fn new(cns: std::sync::Arc<Cns>, dm: Box<dyn DialogManager>, policy: P, config: PolicyConfig) -> Self {
        Self {
            cns,
            dm,
            policy,
            config,
            dialog_ended: false,
            last_speaker: None,
        }
    }

    pub fn dialog_ended(&self) -> bool {
        self.dialog_ended
    }

    /// `speak_first`: the agent opens the dialog before any user turn,
    /// querying the DM with empty context.
    pub fn start(&mut self, now_ms: i64) {
        if self.config.speak_first {
            let (text, ended, _) = self.dm.get_response(&[], self.config.no_rank);
            self.dialog_ended = ended;
            self.cns.init_agent_turn(now_ms, text);
        }
    }

    /// §4.5 step 1.
    fn trigger_user_turn_on(&self, now_ms: i64) {
        if !self.cns.user_turn_active() && self.cns.vad_ipu_active() && self.cns.asr_active() {
            self.cns.init_user_turn(now_ms, None);
        }
    }

    /// §4.5 step 3 / §4.7. Priority: repeat > DM (no_rank or ranked).
    fn get_response_and_speak(&mut self, now_ms: i64) {
        if self.cns.take_ask_question_again() {
            let planned = self.cns.with_agent(|a| a.planned_utterance.clone());
            self.cns.init_agent_turn(now_ms, planned);
            return;
        }

        let (mut context, last_speaker) = self.cns.dialog_text();
        if last_speaker != Some(Speaker::User) {
            let current = self.cns.with_user(|u| {
                if !u.utterance.is_empty() {
                    u.utterance.clone()
                } else {
                    u.prel_utterance.clone()
                }
            });
            if !current.is_empty() {
                context.push(current);
            }
        }

        let (planned_utterance, ended, _metadata) = self.dm.get_response(&context, self.config.no_rank);
        self.dialog_ended = self.dialog_ended || ended;
        self.cns.init_agent_turn(now_ms, planned_utterance);
    }

    /// §4.5 step 4.
    fn fallback_inactivity(&mut self, now_ms: i64) {
        if self.cns.vad_turn_active() || self.cns.agent_turn_active() {
            return;
        }

        let user_silence = now_ms - self.cns.vad_turn_off_last().unwrap_or_else(|| self.cns.start_time_ms());
        let agent_silence = now_ms - self.cns.agent_turn_off_last().unwrap_or_else(|| self.cns.start_time_ms());
        let idle = user_silence.max(agent_silence);

        let last_speaker_fires = idle >= self.config.fallback_duration_ms
            && matches!(self.last_speaker, Some(LastSpeaker::User) | Some(LastSpeaker::Both));
        let no_input_fires = idle >= self.config.no_input_duration_ms;

        if last_speaker_fires || no_input_fires {
            self.get_response_and_speak(now_ms);
            self.cns.with_user_mut(|u| u.fallback = true);
            self.cns.finalize_user(now_ms);
        }
    }

    /// §4.5 step 5: derive one of the four dialog states and push it if
    /// it changed since the last tick.
    fn update_dialog_state(&mut self, now_ms: i64) -> Option<DialogState> {
        let user_active = self.cns.user_turn_active();
        let agent_active = self.cns.agent_turn_active();

        let (state, speaker) = if agent_active && user_active {
            (DialogState::BothActive, Some(LastSpeaker::Both))
        } else if user_active {
            (DialogState::OnlyUser, Some(LastSpeaker::User))
        } else if agent_active {
            (DialogState::OnlyAgent, Some(LastSpeaker::Agent))
        } else {
            (DialogState::BothInactive, self.last_speaker)
        };
        self.last_speaker = speaker;

        self.cns.push_dialog_state_if_changed(state, now_ms)
    }

    fn is_interrupted(&self) -> bool {
        self.cns.with_agent(|a| a.completion) <= self.config.interruption_ratio
    }

    fn should_repeat(&self) {
        let completion = self.cns.with_agent(|a| a.completion);
        self.cns.set_ask_question_again(completion <= self.config.interruption_ratio);
    }

    /// §4.5 step 6 / "Retrigger semantics".
    fn retrigger_user_turn(&self) {
        let agent_utterance_empty = self.cns.with_agent(|a| a.utterance.is_empty());
        let rewritten = if agent_utterance_empty {
            DialogState::OnlyUser
        } else {
            DialogState::BothActive
        };
        self.cns.rewrite_last_two_dialog_states(rewritten);

        if let Some(resumed) = self.cns.pop_last_user_turn() {
            self.cns.init_user_turn(resumed.start_time_ms, Some(resumed));
        }
    }

    fn check_termination(&mut self) {
        if self.cns.with_user(|u| u.mentions_goodbye()) {
            self.dialog_ended = true;
        }
    }

    /// One 50ms tick (§4.5). Returns `true` once `dialog_ended` — callers
    /// should stop ticking.
    pub fn tick(&mut self, now_ms: i64) -> bool {
        self.trigger_user_turn_on(now_ms);

        if self.policy.trigger_user_turn_off(&self.cns, now_ms) {
            self.check_termination();
            self.get_response_and_speak(now_ms);
        }

        self.fallback_inactivity(now_ms);

        if self.update_dialog_state(now_ms) == Some(DialogState::BothActive) && self.is_interrupted() {
            self.should_repeat();
            self.cns.stop_speech(now_ms, true);
            self.retrigger_user_turn();
        }

        self.dialog_ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_dm::CannedDm;

    fn cns() -> std::sync::Arc<Cns> {
        let (tx, _rx) = duet_iu::channel(8, duet_iu::Backpressure::Blocking);
        std::sync::Arc::new(Cns::new(0, tx))
    }

    struct AlwaysOff;
    impl TurnOffPolicy for AlwaysOff {
        fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
            if cns.user_turn_active() {
                cns.finalize_user(now_ms);
                true
            } else {
                false
            }
        }
    }

    struct NeverOff;
    impl TurnOffPolicy for NeverOff {
        fn trigger_user_turn_off(&mut self, _cns: &Cns, _now_ms: i64) -> bool {
            false
        }
    }

    #[test]
    fn speak_first_opens_dialog_with_dm_response() {
        let cns = cns();
        let mut fc = FrontalCortex::new(
            cns.clone(),
            Box::new(CannedDm::new("hello there")),
            NeverOff,
            PolicyConfig::default(),
        );
        fc.start(0);
        assert!(cns.agent_turn_active());
        assert_eq!(cns.with_agent(|a| a.planned_utterance.clone()), "hello there");
    }

    #[test]
    fn fallback_fires_after_mutual_silence_when_last_speaker_was_user() {
        let cns = cns();
        cns.vad_callback(duet_iu::VadKind::Turn, true, 0);
        cns.vad_callback(duet_iu::VadKind::Turn, false, 0);
        let mut fc = FrontalCortex::new(
            cns.clone(),
            Box::new(CannedDm::new("fallback response")),
            NeverOff,
            PolicyConfig {
                fallback_duration_ms: 700,
                ..PolicyConfig::default()
            },
        );
        fc.last_speaker = Some(LastSpeaker::User);
        fc.tick(800);
        assert!(cns.agent_turn_active());
        assert_eq!(cns.with_agent(|a| a.planned_utterance.clone()), "fallback response");
    }

    #[test]
    fn fallback_does_not_fire_before_duration_elapses() {
        let cns = cns();
        let mut fc = FrontalCortex::new(
            cns.clone(),
            Box::new(CannedDm::new("too early")),
            NeverOff,
            PolicyConfig::default(),
        );
        fc.last_speaker = Some(LastSpeaker::User);
        fc.tick(100);
        assert!(!cns.agent_turn_active());
    }

    #[test]
    fn interruption_triggers_repeat_stop_and_retrigger() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.with_user_mut(|u| u.utterance = "keep talking".into());
        cns.init_agent_turn(0, "tell me more about your weekend plans");

        let mut fc = FrontalCortex::new(
            cns.clone(),
            Box::new(CannedDm::new("unused")),
            NeverOff,
            PolicyConfig::default(),
        );
        fc.tick(50);

        assert!(!cns.agent_turn_active());
        assert!(cns.user_turn_active());
        assert_eq!(cns.with_user(|u| u.utterance.clone()), "keep talking");
    }

    #[test]
    fn goodbye_utterance_ends_dialog() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.with_user_mut(|u| u.utterance = "ok goodbye".into());

        let mut fc = FrontalCortex::new(cns.clone(), Box::new(CannedDm::new("bye")), AlwaysOff, PolicyConfig::default());
        let ended = fc.tick(100);
        assert!(ended);
    }
}
