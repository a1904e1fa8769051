//! Stateless per-frame speech/non-speech classification.

use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::{Result, VadError};

/// Configuration for one [`FrameClassifier`]. Frame duration must be one of
/// 10/20/30 ms; anything else is a configuration error raised at setup,
/// never at runtime.
#[derive(Debug, Clone, Copy)]
pub struct FrameClassifierConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    /// Aggressiveness mode, 0 (least aggressive) to 3 (most aggressive).
    pub aggressiveness: u8,
}

impl Default for FrameClassifierConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 20,
            aggressiveness: 2,
        }
    }
}

fn mode_from_aggressiveness(level: u8) -> Result<VadMode> {
    match level {
        0 => Ok(VadMode::Quality),
        1 => Ok(VadMode::LowBitrate),
        2 => Ok(VadMode::Aggressive),
        3 => Ok(VadMode::VeryAggressive),
        other => Err(VadError::InvalidAggressiveness(other)),
    }
}

fn sample_rate_enum(rate: u32) -> SampleRate {
    match rate {
        8_000 => SampleRate::Rate8kHz,
        16_000 => SampleRate::Rate16kHz,
        32_000 => SampleRate::Rate32kHz,
        _ => SampleRate::Rate48kHz,
    }
}

/// Wraps an off-the-shelf energy/GMM voice-activity detector. Consumes
/// whole frames of 16-bit PCM and emits one boolean per frame. No
/// buffering: every call is independent of the last.
pub struct FrameClassifier {
    vad: Vad,
    config: FrameClassifierConfig,
}

impl FrameClassifier {
    pub fn new(config: FrameClassifierConfig) -> Result<Self> {
        if !matches!(config.frame_ms, 10 | 20 | 30) {
            return Err(VadError::UnsupportedFrameDuration(config.frame_ms));
        }
        let mode = mode_from_aggressiveness(config.aggressiveness)?;
        let mut vad = Vad::new_with_rate_and_mode(sample_rate_enum(config.sample_rate), mode);
        vad.set_mode(mode);
        Ok(Self { vad, config })
    }

    pub fn config(&self) -> FrameClassifierConfig {
        self.config
    }

    /// Classify one frame of 16-bit mono PCM samples. `samples.len()` must
    /// match `sample_rate * frame_ms / 1000`; the underlying detector
    /// rejects frames of the wrong length.
    pub fn classify(&mut self, samples: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(samples)
            .map_err(|_| VadError::Classifier("frame rejected by detector".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_frame_duration() {
        let config = FrameClassifierConfig {
            frame_ms: 25,
            ..Default::default()
        };
        let result = FrameClassifier::new(config);
        assert!(matches!(result, Err(VadError::UnsupportedFrameDuration(25))));
    }

    #[test]
    fn rejects_out_of_range_aggressiveness() {
        let config = FrameClassifierConfig {
            aggressiveness: 4,
            ..Default::default()
        };
        let result = FrameClassifier::new(config);
        assert!(matches!(result, Err(VadError::InvalidAggressiveness(4))));
    }

    #[test]
    fn classifies_silence_as_non_speech() {
        let mut classifier = FrameClassifier::new(FrameClassifierConfig::default()).unwrap();
        let frame = vec![0i16; 320]; // 20ms at 16kHz
        let is_speaking = classifier.classify(&frame).unwrap();
        assert!(!is_speaking);
    }
}
