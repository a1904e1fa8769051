//! The CNS orchestrator: atomic activity flags read lock-free, a short
//! critical section for swapping in/out the active user/agent state, and a
//! single mutex guarding memory, matching the concurrency model in which
//! CNS state is mutated only by its own worker and by VAD event callbacks.
//!
//! `current_user`/`current_agent` always hold the most recently created
//! turn, live or just-finalized — they are overwritten (not cleared) by
//! the next `init_*_turn`, so `trigger_user_turn_off`'s "repeat last
//! utterance" and `retrigger_user_turn`'s "was the agent silent" checks
//! can read them in the same tick they were finalized.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use duet_iu::{Iu, IuHeader, IuProducer, TrpSample, VadKind};
use serde::Serialize;

use crate::memory::{Memory, Speaker};
use crate::state::{AgentState, UserState};

/// One of the four reconciled dialog states (§4.5 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogState {
    OnlyUser,
    OnlyAgent,
    BothActive,
    BothInactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct DialogStateEvent {
    pub state: DialogState,
    pub time_ms: i64,
}

/// Edge timelines recorded for the session recorder and for
/// `fallback_inactivity`'s silence computation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Timelines {
    pub vad_turn_on: Vec<i64>,
    pub vad_turn_off: Vec<i64>,
    pub vad_ipu_on: Vec<i64>,
    pub vad_ipu_off: Vec<i64>,
    pub vad_fast_on: Vec<i64>,
    pub vad_fast_off: Vec<i64>,
    pub asr_on: Vec<i64>,
    pub asr_off: Vec<i64>,
    pub agent_turn_on: Vec<i64>,
    pub agent_turn_off: Vec<i64>,
    pub agent_interrupted: Vec<i64>,
}

struct Flags {
    vad_turn_active: AtomicBool,
    vad_ipu_active: AtomicBool,
    vad_fast_active: AtomicBool,
    asr_active: AtomicBool,
    user_turn_active: AtomicBool,
    agent_turn_active: AtomicBool,
    ask_question_again: AtomicBool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            vad_turn_active: AtomicBool::new(false),
            vad_ipu_active: AtomicBool::new(false),
            vad_fast_active: AtomicBool::new(false),
            asr_active: AtomicBool::new(false),
            user_turn_active: AtomicBool::new(false),
            agent_turn_active: AtomicBool::new(false),
            ask_question_again: AtomicBool::new(false),
        }
    }
}

pub struct Cns {
    start_time_ms: AtomicI64,
    flags: Flags,
    current_user: Mutex<UserState>,
    current_agent: Mutex<AgentState>,
    memory: Mutex<Memory>,
    timelines: Mutex<Timelines>,
    dialog_states: Mutex<Vec<DialogStateEvent>>,
    dispatch: duet_iu::QueueSender<Iu>,
    producer: IuProducer,
}

impl Cns {
    /// `dispatch` receives every `TextRequestIU` this CNS emits
    /// (`init_agent_turn`/`stop_speech`); wire it to the TTS pipeline's
    /// inbound queue. Must be built with [`duet_iu::Backpressure::Blocking`]
    /// so a dispatch request is never silently dropped (§5).
    pub fn new(start_time_ms: i64, dispatch: duet_iu::QueueSender<Iu>) -> Self {
        Self {
            start_time_ms: AtomicI64::new(start_time_ms),
            flags: Flags::default(),
            current_user: Mutex::new(UserState::new(start_time_ms)),
            current_agent: Mutex::new(AgentState::new(start_time_ms, String::new())),
            memory: Mutex::new(Memory::new(start_time_ms)),
            timelines: Mutex::new(Timelines::default()),
            dialog_states: Mutex::new(vec![DialogStateEvent {
                state: DialogState::BothInactive,
                time_ms: start_time_ms,
            }]),
            dispatch,
            producer: IuProducer::new("cns"),
        }
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms.load(Ordering::Relaxed)
    }

    // --- lock-free activity reads ---

    pub fn vad_turn_active(&self) -> bool {
        self.flags.vad_turn_active.load(Ordering::Acquire)
    }

    pub fn vad_ipu_active(&self) -> bool {
        self.flags.vad_ipu_active.load(Ordering::Acquire)
    }

    pub fn vad_fast_active(&self) -> bool {
        self.flags.vad_fast_active.load(Ordering::Acquire)
    }

    pub fn asr_active(&self) -> bool {
        self.flags.asr_active.load(Ordering::Acquire)
    }

    pub fn user_turn_active(&self) -> bool {
        self.flags.user_turn_active.load(Ordering::Acquire)
    }

    pub fn agent_turn_active(&self) -> bool {
        self.flags.agent_turn_active.load(Ordering::Acquire)
    }

    pub fn take_ask_question_again(&self) -> bool {
        self.flags.ask_question_again.swap(false, Ordering::AcqRel)
    }

    pub fn set_ask_question_again(&self, value: bool) {
        self.flags.ask_question_again.store(value, Ordering::Release);
    }

    // --- user turn lifecycle ---

    /// Create a new user turn, or (on retrigger) reinstate one popped back
    /// out of memory. Swaps out `current_user` in a short critical
    /// section.
    pub fn init_user_turn(&self, now_ms: i64, resume: Option<UserState>) {
        let state = resume.unwrap_or_else(|| UserState::new(now_ms));
        *self.current_user.lock().expect("current_user poisoned") = state;
        self.flags.user_turn_active.store(true, Ordering::Release);
    }

    /// Stamp end time, push a copy into memory, clear the active flag.
    /// `current_user` keeps holding this turn (readable, just no longer
    /// "active") until the next `init_user_turn` overwrites it.
    pub fn finalize_user(&self, now_ms: i64) {
        let finalized = {
            let mut guard = self.current_user.lock().expect("current_user poisoned");
            guard.end_time_ms = Some(now_ms);
            guard.clone()
        };
        self.flags.user_turn_active.store(false, Ordering::Release);
        self.memory
            .lock()
            .expect("memory poisoned")
            .turns_user
            .push(finalized);
    }

    pub fn with_user<R>(&self, f: impl FnOnce(&UserState) -> R) -> R {
        f(&self.current_user.lock().expect("current_user poisoned"))
    }

    pub fn with_user_mut<R>(&self, f: impl FnOnce(&mut UserState) -> R) -> R {
        f(&mut self.current_user.lock().expect("current_user poisoned"))
    }

    /// Pop the most recently finalized user turn back out of memory, for
    /// `retrigger_user_turn`.
    pub fn pop_last_user_turn(&self) -> Option<UserState> {
        self.memory.lock().expect("memory poisoned").turns_user.pop()
    }

    // --- agent turn lifecycle ---

    pub fn init_agent_turn(&self, now_ms: i64, text: impl Into<String>) {
        let text = text.into();
        let state = AgentState::new(now_ms, text.clone());
        *self.current_agent.lock().expect("current_agent poisoned") = state;
        self.flags.agent_turn_active.store(true, Ordering::Release);
        self.timelines
            .lock()
            .expect("timelines poisoned")
            .agent_turn_on
            .push(now_ms);
        self.emit(now_ms, text, true);
    }

    /// Abort (or gracefully stop) current speech. `finalize` additionally
    /// finalizes the agent turn immediately.
    pub fn stop_speech(&self, now_ms: i64, finalize: bool) {
        self.emit(now_ms, String::new(), false);
        self.current_agent
            .lock()
            .expect("current_agent poisoned")
            .interrupted = true;
        if finalize {
            self.finalize_agent(now_ms);
        }
    }

    fn finalize_agent(&self, now_ms: i64) {
        let finalized = {
            let mut guard = self.current_agent.lock().expect("current_agent poisoned");
            guard.end_time_ms = Some(now_ms);
            guard.clone()
        };
        self.flags.agent_turn_active.store(false, Ordering::Release);
        {
            let mut timelines = self.timelines.lock().expect("timelines poisoned");
            timelines.agent_turn_off.push(now_ms);
            if finalized.interrupted {
                timelines.agent_interrupted.push(now_ms);
            }
        }
        self.memory
            .lock()
            .expect("memory poisoned")
            .turns_agent
            .push(finalized);
    }

    pub fn with_agent<R>(&self, f: impl FnOnce(&AgentState) -> R) -> R {
        f(&self.current_agent.lock().expect("current_agent poisoned"))
    }

    fn with_agent_mut<R>(&self, f: impl FnOnce(&mut AgentState) -> R) -> R {
        f(&mut self.current_agent.lock().expect("current_agent poisoned"))
    }

    fn emit(&self, now_ms: i64, payload: String, dispatch: bool) {
        let header: IuHeader = self.producer.header(now_ms, None);
        let iu = Iu::TextRequest {
            header,
            payload,
            dispatch,
        };
        if !self.dispatch.blocking_send(iu) {
            tracing::debug!("dispatch channel closed, TextRequestIU dropped");
        }
    }

    // --- edge handling ---

    pub fn vad_callback(&self, kind: VadKind, active: bool, now_ms: i64) {
        let flag = match kind {
            VadKind::Turn => &self.flags.vad_turn_active,
            VadKind::Ipu => &self.flags.vad_ipu_active,
            VadKind::Fast => &self.flags.vad_fast_active,
        };
        flag.store(active, Ordering::Release);

        let mut timelines = self.timelines.lock().expect("timelines poisoned");
        let (on, off) = match kind {
            VadKind::Turn => (&mut timelines.vad_turn_on, &mut timelines.vad_turn_off),
            VadKind::Ipu => (&mut timelines.vad_ipu_on, &mut timelines.vad_ipu_off),
            VadKind::Fast => (&mut timelines.vad_fast_on, &mut timelines.vad_fast_off),
        };
        if active {
            on.push(now_ms);
        } else {
            off.push(now_ms);
        }
    }

    pub fn asr_onset(&self, now_ms: i64) {
        if !self.flags.asr_active.swap(true, Ordering::AcqRel) {
            self.timelines
                .lock()
                .expect("timelines poisoned")
                .asr_on
                .push(now_ms);
        }
    }

    /// Apply one `AsrIU`. `text` is the incremental delta since the last
    /// update, not the running hypothesis; `prel_utterance` is rebuilt from
    /// the last committed `utterance` plus this delta each call.
    pub fn asr_update(&self, now_ms: i64, text: &str, is_final: bool) {
        self.asr_onset(now_ms);

        self.with_user_mut(|user| {
            user.prel_utterance = user.utterance.clone() + text;
            if is_final {
                user.utterance = user.prel_utterance.clone();
            }
        });

        if is_final {
            self.flags.asr_active.store(false, Ordering::Release);
            self.timelines
                .lock()
                .expect("timelines poisoned")
                .asr_off
                .push(now_ms);
        }
    }

    /// Record one predictor query result against the current user turn.
    pub fn record_trp(&self, trp: f32, utterance: String, time_ms: i64, prediction_time_ms: i64) {
        self.with_user_mut(|user| {
            user.all_trps.push(TrpSample {
                trp,
                utterance,
                time_ms,
                prediction_time_ms,
            });
        });
    }

    /// Apply one `DispatchProgressIU`.
    pub fn dispatch_progress(&self, now_ms: i64, completion: f32, completion_words: String) {
        let should_finalize = self.with_agent_mut(|agent| {
            agent.completion = completion;
            agent.utterance = completion_words;
            completion >= 1.0
        });
        if should_finalize {
            self.finalize_agent(now_ms);
        }
    }

    // --- dialog state reconciliation ---

    pub fn dialog_states_len(&self) -> usize {
        self.dialog_states.lock().expect("dialog_states poisoned").len()
    }

    pub fn last_dialog_state(&self) -> DialogState {
        self.dialog_states
            .lock()
            .expect("dialog_states poisoned")
            .last()
            .expect("dialog_states always has a seed entry")
            .state
    }

    /// Push a new dialog-state event if it differs from the last one.
    /// Returns the new state if it changed.
    pub fn push_dialog_state_if_changed(&self, state: DialogState, now_ms: i64) -> Option<DialogState> {
        let mut events = self.dialog_states.lock().expect("dialog_states poisoned");
        if events.last().map(|e| e.state) == Some(state) {
            return None;
        }
        events.push(DialogStateEvent {
            state,
            time_ms: now_ms,
        });
        Some(state)
    }

    /// Rewrite the last two dialog-state events in place, as
    /// `retrigger_user_turn` does.
    pub fn rewrite_last_two_dialog_states(&self, state: DialogState) {
        let mut events = self.dialog_states.lock().expect("dialog_states poisoned");
        let len = events.len();
        if len >= 1 {
            events[len - 1].state = state;
        }
        if len >= 2 {
            events[len - 2].state = state;
        }
    }

    pub fn dialog_states_snapshot(&self) -> Vec<DialogStateEvent> {
        self.dialog_states.lock().expect("dialog_states poisoned").clone()
    }

    // --- timelines / memory access for fallback + recorder ---

    pub fn vad_turn_off_last(&self) -> Option<i64> {
        self.timelines
            .lock()
            .expect("timelines poisoned")
            .vad_turn_off
            .last()
            .copied()
    }

    pub fn agent_turn_off_last(&self) -> Option<i64> {
        self.timelines
            .lock()
            .expect("timelines poisoned")
            .agent_turn_off
            .last()
            .copied()
    }

    pub fn timelines_snapshot(&self) -> Timelines {
        self.timelines.lock().expect("timelines poisoned").clone()
    }

    pub fn dialog_text(&self) -> (Vec<String>, Option<Speaker>) {
        self.memory.lock().expect("memory poisoned").dialog_text()
    }

    pub fn with_memory<R>(&self, f: impl FnOnce(&Memory) -> R) -> R {
        f(&self.memory.lock().expect("memory poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cns() -> (Cns, duet_iu::QueueReceiver<Iu>) {
        let (tx, rx) = duet_iu::channel(8, duet_iu::Backpressure::Blocking);
        (Cns::new(0, tx), rx)
    }

    #[test]
    fn init_and_finalize_user_turn_round_trips_through_memory() {
        let (cns, _rx) = cns();
        cns.init_user_turn(100, None);
        assert!(cns.user_turn_active());
        cns.with_user_mut(|u| u.utterance = "hello".into());
        cns.finalize_user(600);
        assert!(!cns.user_turn_active());
        let (dialog, _) = cns.dialog_text();
        assert_eq!(dialog, vec!["hello".to_string()]);
    }

    #[test]
    fn current_user_stays_readable_after_finalize() {
        let (cns, _rx) = cns();
        cns.init_user_turn(0, None);
        cns.with_user_mut(|u| u.utterance = "bye now".into());
        cns.finalize_user(500);
        assert_eq!(cns.with_user(|u| u.utterance.clone()), "bye now");
    }

    #[test]
    fn init_agent_turn_emits_dispatch_request() {
        let (cns, mut rx) = cns();
        cns.init_agent_turn(0, "hi there");
        let iu = rx.try_recv().expect("text request emitted");
        match iu {
            Iu::TextRequest { payload, dispatch, .. } => {
                assert_eq!(payload, "hi there");
                assert!(dispatch);
            }
            other => panic!("unexpected IU {other:?}"),
        }
    }

    #[test]
    fn stop_speech_emits_abort_and_marks_interrupted() {
        let (cns, mut rx) = cns();
        cns.init_agent_turn(0, "hi there");
        let _ = rx.try_recv().unwrap();
        cns.stop_speech(100, true);
        let iu = rx.try_recv().expect("abort emitted");
        match iu {
            Iu::TextRequest { dispatch, .. } => assert!(!dispatch),
            other => panic!("unexpected IU {other:?}"),
        }
        assert!(!cns.agent_turn_active());
    }

    #[test]
    fn dispatch_progress_finalizes_agent_on_completion() {
        let (cns, _rx) = cns();
        cns.init_agent_turn(0, "hello world");
        cns.dispatch_progress(50, 0.5, "hello".into());
        assert!(cns.agent_turn_active());
        cns.dispatch_progress(100, 1.0, "hello world".into());
        assert!(!cns.agent_turn_active());
    }

    #[test]
    fn vad_callback_updates_flag_and_timeline() {
        let (cns, _rx) = cns();
        cns.vad_callback(VadKind::Ipu, true, 100);
        assert!(cns.vad_ipu_active());
        cns.vad_callback(VadKind::Ipu, false, 200);
        assert!(!cns.vad_ipu_active());
        let timelines = cns.timelines_snapshot();
        assert_eq!(timelines.vad_ipu_on, vec![100]);
        assert_eq!(timelines.vad_ipu_off, vec![200]);
    }

    #[test]
    fn asr_final_commits_utterance_and_clears_active_flag() {
        let (cns, _rx) = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(100, "hello", false);
        assert!(cns.asr_active());
        cns.asr_update(200, "hello there", true);
        assert!(!cns.asr_active());
        assert_eq!(cns.with_user(|u| u.utterance.clone()), "hello there");
    }

    #[test]
    fn dialog_state_push_is_noop_when_unchanged() {
        let (cns, _rx) = cns();
        assert_eq!(
            cns.push_dialog_state_if_changed(DialogState::BothInactive, 10),
            None
        );
        assert_eq!(
            cns.push_dialog_state_if_changed(DialogState::OnlyUser, 20),
            Some(DialogState::OnlyUser)
        );
    }

    #[test]
    fn retrigger_rewrites_last_two_dialog_states() {
        let (cns, _rx) = cns();
        cns.push_dialog_state_if_changed(DialogState::OnlyUser, 10);
        cns.push_dialog_state_if_changed(DialogState::BothActive, 20);
        cns.rewrite_last_two_dialog_states(DialogState::OnlyUser);
        let events = cns.dialog_states_snapshot();
        assert!(events[events.len() - 1].state == DialogState::OnlyUser);
        assert!(events[events.len() - 2].state == DialogState::OnlyUser);
    }
}
