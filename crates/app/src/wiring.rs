//! Assembles a [`FrontalCortex`] from [`Config`], hiding the four
//! `TurnOffPolicy` variants behind one runtime-selectable type so
//! `main` doesn't need to be generic over the policy.

use std::sync::Arc;
use std::time::Duration;

use duet_cns::Cns;
use duet_dm::{DialogManager, ScriptedDm};
use duet_policy::{BaselineAsr, BaselineVad, Eot, FrontalCortex, PolicyConfig, Prediction, TurnOffPolicy};
use duet_turn::{HttpPredictor, Predictor};
use duet_vad::{DetectorConfig, FrameClassifierConfig, VadAggregatorConfig};

use crate::config::{Config, PolicyKind};

/// One concrete type wrapping all four `trigger_user_turn_off`
/// implementations, dispatching via `match` so `FrontalCortex<AnyPolicy>`
/// has a single monomorphization regardless of which policy a run picked.
pub enum AnyPolicy {
    BaselineAsr(BaselineAsr),
    BaselineVad(BaselineVad),
    Eot(Eot),
    Prediction(Prediction),
}

impl TurnOffPolicy for AnyPolicy {
    fn trigger_user_turn_off(&mut self, cns: &Cns, now_ms: i64) -> bool {
        match self {
            AnyPolicy::BaselineAsr(policy) => policy.trigger_user_turn_off(cns, now_ms),
            AnyPolicy::BaselineVad(policy) => policy.trigger_user_turn_off(cns, now_ms),
            AnyPolicy::Eot(policy) => policy.trigger_user_turn_off(cns, now_ms),
            AnyPolicy::Prediction(policy) => policy.trigger_user_turn_off(cns, now_ms),
        }
    }
}

fn build_predictor(config: &Config) -> Box<dyn Predictor> {
    let timeout: Duration = config.predictor_timeout();
    match config.policy {
        PolicyKind::Eot => Box::new(HttpPredictor::eot(&config.predictor_url, timeout)),
        PolicyKind::Prediction => Box::new(HttpPredictor::prediction(&config.predictor_url, timeout)),
        PolicyKind::Baseline | PolicyKind::Baselinevad => Box::new(duet_turn::FixedPredictor::new(0.0)),
    }
}

fn build_policy(config: &Config) -> AnyPolicy {
    match config.policy {
        PolicyKind::Baseline => AnyPolicy::BaselineAsr(BaselineAsr),
        PolicyKind::Baselinevad => AnyPolicy::BaselineVad(BaselineVad),
        PolicyKind::Eot => AnyPolicy::Eot(Eot::new(build_predictor(config), config.trp_threshold)),
        PolicyKind::Prediction => {
            AnyPolicy::Prediction(Prediction::new(build_predictor(config), config.trp_threshold))
        }
    }
}

fn build_policy_config(config: &Config) -> PolicyConfig {
    PolicyConfig {
        loop_time_ms: config.loop_time_ms,
        fallback_duration_ms: config.fallback_duration_ms,
        no_input_duration_ms: config.no_input_duration_ms,
        interruption_ratio: config.interruption_ratio,
        trp_threshold: config.trp_threshold,
        speak_first: config.speak_first,
        no_rank: config.no_rank,
    }
}

/// Build the dialog manager driving this run. `ScriptedDm` is the only
/// one selected today; `duet_dm::CannedDm` remains available to callers
/// who want a fixed-response fallback, since no ranking/generation
/// backend is in scope.
fn build_dialog_manager() -> Box<dyn DialogManager> {
    Box::new(ScriptedDm::default())
}

/// Construct a fully wired policy loop ready to `tick()`.
pub fn build_frontal_cortex(cns: Arc<Cns>, config: &Config) -> FrontalCortex<AnyPolicy> {
    FrontalCortex::new(cns, build_dialog_manager(), build_policy(config), build_policy_config(config))
}

/// Build the `FrameClassifier` + `VadAggregator` configuration for the
/// audio pipeline from the run's flat config surface (§4.2/§4.3).
pub fn build_vad_configs(config: &Config) -> (FrameClassifierConfig, VadAggregatorConfig) {
    let classifier = FrameClassifierConfig {
        sample_rate: config.sample_rate,
        frame_ms: config.chunk_time_ms,
        aggressiveness: config.vad_aggressiveness,
    };
    let aggregator = VadAggregatorConfig {
        frame_ms: config.chunk_time_ms,
        prob_thresh: config.vad_prob_thresh,
        turn: DetectorConfig {
            onset_ms: config.vad_onset_time_ms,
            offset_ms: config.vad_turn_offset_time_ms,
        },
        ipu: DetectorConfig {
            onset_ms: config.vad_onset_time_ms,
            offset_ms: config.vad_ipu_offset_time_ms,
        },
        fast: DetectorConfig {
            onset_ms: config.vad_onset_time_ms,
            offset_ms: config.vad_fast_offset_time_ms,
        },
    };
    (classifier, aggregator)
}
