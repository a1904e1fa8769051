//! Session recorder (§4.8): serializes CNS memory and edge timelines to a
//! single structured JSON document on shutdown, following
//! `retico/agent/CNS.py::save`'s shape (turns, six edge timelines,
//! `agent_interrupted`, `dialog_states`, all time-normalized to session
//! start) rather than a SQLite repository, since the spec calls for one
//! file per run.

use std::fs;
use std::path::Path;

use duet_cns::{Cns, DialogState};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write session file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, Serialize)]
#[serde(tag = "speaker", rename_all = "snake_case")]
pub enum TurnRecord {
    User {
        start_time_ms: i64,
        end_time_ms: Option<i64>,
        utterance: String,
        utterance_at_eot: Option<String>,
        trp_at_eot: Option<f32>,
        all_trps: Vec<duet_iu::TrpSample>,
        fallback: bool,
    },
    Agent {
        start_time_ms: i64,
        end_time_ms: Option<i64>,
        planned_utterance: String,
        utterance: String,
        completion: f32,
        interrupted: bool,
    },
}

impl TurnRecord {
    fn start_time_ms(&self) -> i64 {
        match self {
            TurnRecord::User { start_time_ms, .. } | TurnRecord::Agent { start_time_ms, .. } => *start_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DialogStateRecord {
    pub state: DialogState,
    pub time_ms: i64,
}

/// A complete, serializable snapshot of one dialog session.
#[derive(Debug, Serialize)]
pub struct SessionRecord {
    pub turns: Vec<TurnRecord>,
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
    pub dialog_states: Vec<DialogStateRecord>,
    pub hyperparameters: serde_json::Value,
}

impl SessionRecord {
    /// Build a session record from live CNS state, normalizing every
    /// timestamp to the session's `start_time_ms`. `hyperparameters` is
    /// the run's resolved configuration, opaque to this crate.
    pub fn capture(cns: &Cns, hyperparameters: serde_json::Value) -> Self {
        let start = cns.start_time_ms();
        let timelines = cns.timelines_snapshot();
        let normalize = |times: &[i64]| times.iter().map(|t| t - start).collect::<Vec<_>>();

        let mut turns: Vec<TurnRecord> = cns.with_memory(|memory| {
            let user_turns = memory.turns_user.iter().map(|u| TurnRecord::User {
                start_time_ms: u.start_time_ms - start,
                end_time_ms: u.end_time_ms.map(|t| t - start),
                utterance: u.utterance.clone(),
                utterance_at_eot: u.utterance_at_eot.clone(),
                trp_at_eot: u.trp_at_eot,
                all_trps: u.all_trps.clone(),
                fallback: u.fallback,
            });
            let agent_turns = memory.turns_agent.iter().map(|a| TurnRecord::Agent {
                start_time_ms: a.start_time_ms - start,
                end_time_ms: a.end_time_ms.map(|t| t - start),
                planned_utterance: a.planned_utterance.clone(),
                utterance: a.utterance.clone(),
                completion: a.completion,
                interrupted: a.interrupted,
            });
            user_turns.chain(agent_turns).collect()
        });
        turns.sort_by_key(TurnRecord::start_time_ms);

        // Drop the synthetic seed entry pushed at `Cns::new` time, as
        // `CNS.py::save` skips `dialog_states[0]`.
        let dialog_states = cns
            .dialog_states_snapshot()
            .into_iter()
            .skip(1)
            .map(|event| DialogStateRecord {
                state: event.state,
                time_ms: event.time_ms - start,
            })
            .collect();

        Self {
            turns,
            vad_turn_on: normalize(&timelines.vad_turn_on),
            vad_turn_off: normalize(&timelines.vad_turn_off),
            vad_ipu_on: normalize(&timelines.vad_ipu_on),
            vad_ipu_off: normalize(&timelines.vad_ipu_off),
            vad_fast_on: normalize(&timelines.vad_fast_on),
            vad_fast_off: normalize(&timelines.vad_fast_off),
            asr_on: normalize(&timelines.asr_on),
            asr_off: normalize(&timelines.asr_off),
            agent_turn_on: normalize(&timelines.agent_turn_on),
            agent_turn_off: normalize(&timelines.agent_turn_off),
            agent_interrupted: normalize(&timelines.agent_interrupted),
            dialog_states,
            hyperparameters,
        }
    }

    /// Write this record as pretty JSON to `path`, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| RecorderError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| RecorderError::Write {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "saved session recording");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cns() -> Cns {
        let (tx, _rx) = duet_iu::channel(8, duet_iu::Backpressure::Blocking);
        Cns::new(1_000, tx)
    }

    #[test]
    fn capture_normalizes_timestamps_to_session_start() {
        let cns = cns();
        cns.init_user_turn(1_000, None);
        cns.with_user_mut(|u| u.utterance = "hi".into());
        cns.finalize_user(1_500);

        let record = SessionRecord::capture(&cns, serde_json::json!({}));
        assert_eq!(record.turns.len(), 1);
        match &record.turns[0] {
            TurnRecord::User { start_time_ms, end_time_ms, .. } => {
                assert_eq!(*start_time_ms, 0);
                assert_eq!(*end_time_ms, Some(500));
            }
            other => panic!("expected a user turn, got {other:?}"),
        }
    }

    #[test]
    fn capture_drops_synthetic_seed_dialog_state() {
        let cns = cns();
        cns.push_dialog_state_if_changed(DialogState::OnlyUser, 1_200);
        let record = SessionRecord::capture(&cns, serde_json::json!({}));
        assert_eq!(record.dialog_states.len(), 1);
        assert_eq!(record.dialog_states[0].time_ms, 200);
    }

    #[test]
    fn save_writes_pretty_json_to_disk() {
        let cns = cns();
        let record = SessionRecord::capture(&cns, serde_json::json!({"policy": "eot"}));
        let dir = std::env::temp_dir().join(format!("duet-recorder-test-{}", std::process::id()));
        let path = dir.join("session.json");
        record.save(&path).expect("save succeeds");
        let contents = fs::read_to_string(&path).expect("file exists");
        assert!(contents.contains("\"hyperparameters\""));
        let _ = fs::remove_dir_all(&dir);
    }
}
