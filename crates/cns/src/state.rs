//! Per-turn state owned by the CNS while a turn is active, and transferred
//! into `Memory` by value on finalization.

use duet_iu::TrpSample;
use serde::Serialize;

/// One user turn. Created on user-turn-onset, mutated by ASR updates and
/// predictor queries, finalized on user-turn-offset. Remains readable
/// after finalization until the next turn overwrites it: `CNS` tracks
/// liveness separately via `user_turn_active`.
#[derive(Debug, Clone, Serialize)]
pub struct UserState {
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    /// Committed text, set when ASR reports `final`.
    pub utterance: String,
    /// Live/running hypothesis, updated on every ASR partial.
    pub prel_utterance: String,
    /// Utterance text at the moment an `eot`/`prediction` variant ended
    /// the turn early.
    pub utterance_at_eot: Option<String>,
    pub trp_at_eot: Option<f32>,
    pub all_trps: Vec<TrpSample>,
    /// Set when this turn was finalized by `fallback_inactivity` rather
    /// than by a turn-off trigger.
    pub fallback: bool,
}

impl UserState {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            end_time_ms: None,
            utterance: String::new(),
            prel_utterance: String::new(),
            utterance_at_eot: None,
            trp_at_eot: None,
            all_trps: Vec::new(),
            fallback: false,
        }
    }

    /// The text to use when this turn's content is needed: the committed
    /// utterance if ASR finalized, else the live hypothesis.
    pub fn best_text(&self) -> &str {
        if !self.utterance.is_empty() {
            &self.utterance
        } else {
            &self.prel_utterance
        }
    }

    pub fn mentions_goodbye(&self) -> bool {
        let text = self.utterance.to_lowercase();
        text.contains("goodbye") || text.contains("bye")
    }
}

/// One agent turn. Created when the policy requests speech, mutated by
/// dispatch-progress updates, finalized on completion or interruption.
/// Remains readable after finalization until the next turn overwrites it.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub planned_utterance: String,
    /// Word-aligned prefix of `planned_utterance` actually dispatched so
    /// far; equals `planned_utterance` once `completion >= 1`.
    pub utterance: String,
    pub completion: f32,
    pub interrupted: bool,
}

impl AgentState {
    pub fn new(start_time_ms: i64, planned_utterance: String) -> Self {
        Self {
            start_time_ms,
            end_time_ms: None,
            planned_utterance,
            utterance: String::new(),
            completion: 0.0,
            interrupted: false,
        }
    }
}
