//! Per-frame voice-activity classification and the three-detector
//! hysteresis aggregator built on top of it.

mod aggregator;
mod frame;

pub use aggregator::{DetectorConfig, VadAggregator, VadAggregatorConfig, VadEdge};
pub use frame::{FrameClassifier, FrameClassifierConfig};

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("unsupported frame duration {0}ms, must be 10, 20 or 30ms")]
    UnsupportedFrameDuration(u32),
    #[error("aggressiveness {0} out of range 0..=3")]
    InvalidAggressiveness(u8),
    #[error("frame classifier error: {0}")]
    Classifier(String),
}

pub type Result<T> = std::result::Result<T, VadError>;
