//! Run configuration: the spec.md §6 "Configuration surface", loadable
//! from an optional TOML file and overridable by CLI flags, following
//! the settings-struct-plus-clap pattern used by `Coldaine-ColdVox`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported VAD frame duration: {0}ms (must be 10, 20, or 30)")]
    InvalidFrameDuration(u32),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which `trigger_user_turn_off` implementation drives the policy loop.
/// Token spelling (`baseline`, `baselinevad`) matches spec.md §6 exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Baseline,
    Baselinevad,
    Eot,
    Prediction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyKind,

    // Hearing / audio contract (§6).
    pub chunk_time_ms: u32,
    pub sample_rate: u32,
    pub bytes_per_sample: u8,

    // VAD aggregator (§4.3).
    pub vad_onset_time_ms: u32,
    pub vad_ipu_offset_time_ms: u32,
    pub vad_turn_offset_time_ms: u32,
    pub vad_fast_offset_time_ms: u32,
    pub vad_prob_thresh: f32,
    pub vad_aggressiveness: u8,

    // Policy loop (§4.5, §4.6).
    pub loop_time_ms: i64,
    pub fallback_duration_ms: i64,
    pub no_input_duration_ms: i64,
    pub interruption_ratio: f32,
    pub repeat_ratio: f32,
    pub trp_threshold: f32,
    pub speak_first: bool,
    pub no_rank: bool,

    // Remote predictor (§6), used by `eot`/`prediction`.
    pub predictor_url: String,
    pub predictor_timeout_ms: u64,

    // Ambient.
    pub session_output_path: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Baseline,
            chunk_time_ms: 20,
            sample_rate: 16_000,
            bytes_per_sample: 2,
            vad_onset_time_ms: 200,
            vad_ipu_offset_time_ms: 200,
            vad_turn_offset_time_ms: 750,
            vad_fast_offset_time_ms: 100,
            vad_prob_thresh: 0.9,
            vad_aggressiveness: 2,
            loop_time_ms: 50,
            fallback_duration_ms: 700,
            no_input_duration_ms: 5_000,
            interruption_ratio: 0.8,
            repeat_ratio: 0.8,
            trp_threshold: 0.1,
            speak_first: true,
            no_rank: true,
            predictor_url: "http://localhost:5001".to_string(),
            predictor_timeout_ms: 150,
            session_output_path: "session.json".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.chunk_time_ms, 10 | 20 | 30) {
            return Err(ConfigError::InvalidFrameDuration(self.chunk_time_ms));
        }
        Ok(())
    }

    pub fn predictor_timeout(&self) -> Duration {
        Duration::from_millis(self.predictor_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommended_values() {
        let config = Config::default();
        assert_eq!(config.vad_onset_time_ms, 200);
        assert_eq!(config.vad_ipu_offset_time_ms, 200);
        assert_eq!(config.vad_turn_offset_time_ms, 750);
        assert_eq!(config.vad_fast_offset_time_ms, 100);
        assert_eq!(config.interruption_ratio, 0.8);
        assert_eq!(config.repeat_ratio, 0.8);
        assert_eq!(config.trp_threshold, 0.1);
    }

    #[test]
    fn validate_rejects_unsupported_frame_duration() {
        let mut config = Config::default();
        config.chunk_time_ms = 15;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrameDuration(15))));
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("duet-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("duet.toml");
        std::fs::write(&path, "policy = \"eot\"\ntrp_threshold = 0.3\n").unwrap();

        let config = Config::load(&path).expect("loads");
        assert_eq!(config.policy, PolicyKind::Eot);
        assert_eq!(config.trp_threshold, 0.3);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
