//! The four `trigger_user_turn_off` implementations (§4.6). Each owns
//! just enough state to dedup repeated predictor queries; everything
//! else is shared by [`crate::FrontalCortex`].

use duet_cns::Cns;
use duet_turn::Predictor;

use crate::TurnOffPolicy;

fn clean_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Off iff the user turn is active, the IPU detector has dropped, and ASR
/// is idle: waits for a committed ASR final before yielding the floor.
#[derive(Default)]
pub struct BaselineAsr;

impl TurnOffPolicy for BaselineAsr {
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
        if cns.user_turn_active() && !cns.vad_ipu_active() && !cns.asr_active() {
            cns.finalize_user(now_ms);
            true
        } else {
            false
        }
    }
}

/// Off iff the user turn is active and the IPU detector has dropped,
/// ignoring ASR activity entirely.
#[derive(Default)]
pub struct BaselineVad;

impl TurnOffPolicy for BaselineVad {
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
        if cns.user_turn_active() && !cns.vad_ipu_active() {
            cns.finalize_user(now_ms);
            true
        } else {
            false
        }
    }
}

/// Queries the remote `trp` endpoint once ASR has also gone idle. Dedups
/// by the last queried (committed) utterance, matching
/// `retico/agent/policies/eot.py`'s `last_current_utterance` guard (the
/// dedup itself is not spelled out in spec.md §4.6's `eot` bullet, but is
/// present in the original and does not conflict with anything spec.md
/// states there).
pub struct Eot {
    predictor: Box<dyn Predictor>,
    trp_threshold: f32,
    last_current_utterance: Option<String>,
}

impl Eot {
    pub fn new(predictor: Box<dyn Predictor>, trp_threshold: f32) -> Self {
        Self {
            predictor,
            trp_threshold,
            last_current_utterance: None,
        }
    }
}

impl TurnOffPolicy for Eot {
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
        if !cns.user_turn_active() || cns.vad_ipu_active() || cns.asr_active() {
            return false;
        }

        let current_utt = clean_whitespace(&cns.with_user(|u| u.utterance.clone()));
        if Some(&current_utt) == self.last_current_utterance.as_ref() {
            return false;
        }
        self.last_current_utterance = Some(current_utt.clone());

        let mut context = cns.dialog_text().0;
        context.push(current_utt.clone());
        let outcome = self.predictor.query(&context);
        cns.record_trp(outcome.trp, current_utt.clone(), now_ms, outcome.prediction_time_ms);

        if outcome.trp >= self.trp_threshold {
            cns.with_user_mut(|u| {
                u.trp_at_eot = Some(outcome.trp);
                u.utterance_at_eot = Some(current_utt);
            });
            cns.finalize_user(now_ms);
            true
        } else {
            false
        }
    }
}

/// Queries the remote `prediction` endpoint over the *preliminary*
/// (non-final) ASR hypothesis, so it can fire before ASR final and yield
/// an earlier response onset (§4.6). Does not gate on `asr_active`.
pub struct Prediction {
    predictor: Box<dyn Predictor>,
    trp_threshold: f32,
    last_current_utterance: String,
}

impl Prediction {
    pub fn new(predictor: Box<dyn Predictor>, trp_threshold: f32) -> Self {
        Self {
            predictor,
            trp_threshold,
            last_current_utterance: String::new(),
        }
    }
}

impl TurnOffPolicy for Prediction {
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
        if !cns.user_turn_active() || cns.vad_ipu_active() {
            return false;
        }

        let current_utt = clean_whitespace(&cns.with_user(|u| u.prel_utterance.clone()));
        if current_utt.is_empty() || current_utt == self.last_current_utterance {
            return false;
        }
        self.last_current_utterance = current_utt.clone();

        let mut context = cns.dialog_text().0;
        context.push(current_utt.clone());
        let outcome = self.predictor.query(&context);
        cns.record_trp(outcome.trp, current_utt.clone(), now_ms, outcome.prediction_time_ms);

        if outcome.trp >= self.trp_threshold {
            cns.with_user_mut(|u| {
                u.trp_at_eot = Some(outcome.trp);
                u.utterance_at_eot = Some(current_utt);
            });
            cns.finalize_user(now_ms);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_turn::FixedPredictor;

    fn cns() -> Cns {
        let (tx, _rx) = duet_iu::channel(8, duet_iu::Backpressure::Blocking);
        Cns::new(0, tx)
    }

    #[test]
    fn baseline_asr_waits_for_asr_idle() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "hi", false);
        let mut policy = BaselineAsr;
        assert!(!policy.trigger_user_turn_off(&cns, 20));
        cns.asr_update(30, "hi", true);
        assert!(policy.trigger_user_turn_off(&cns, 40));
        assert!(!cns.user_turn_active());
    }

    #[test]
    fn baseline_vad_ignores_asr_activity() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "hi", false);
        let mut policy = BaselineVad;
        assert!(policy.trigger_user_turn_off(&cns, 20));
    }

    #[test]
    fn eot_fires_above_threshold_and_dedups_repeat_queries() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "so I", true);
        let mut policy = Eot::new(Box::new(FixedPredictor::new(0.85)), 0.1);
        assert!(policy.trigger_user_turn_off(&cns, 20));
        assert_eq!(cns.with_user(|u| u.trp_at_eot), Some(0.85));
    }

    #[test]
    fn eot_below_threshold_does_not_finalize() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "so I", true);
        let mut policy = Eot::new(Box::new(FixedPredictor::new(0.0)), 0.1);
        assert!(!policy.trigger_user_turn_off(&cns, 20));
        assert!(cns.user_turn_active());
    }

    #[test]
    fn prediction_fires_on_preliminary_utterance_before_asr_final() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "I want pizza", false);
        let mut policy = Prediction::new(Box::new(FixedPredictor::new(0.95)), 0.1);
        assert!(policy.trigger_user_turn_off(&cns, 20));
        assert!(!cns.user_turn_active());
        assert!(cns.asr_active());
    }

    #[test]
    fn prediction_skips_duplicate_preliminary_query() {
        let cns = cns();
        cns.init_user_turn(0, None);
        cns.asr_update(10, "I want", false);
        let mut policy = Prediction::new(Box::new(FixedPredictor::new(0.0)), 0.1);
        assert!(!policy.trigger_user_turn_off(&cns, 20));
        assert!(!policy.trigger_user_turn_off(&cns, 21));
        assert_eq!(cns.with_user(|u| u.all_trps.len()), 1);
    }
}
