//! Top-level error type composing every subsystem's own error enum,
//! following `coldvox-foundation::error::ColdVoxError`'s shape.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum DuetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vad(#[from] duet_vad::VadError),

    #[error(transparent)]
    Recorder(#[from] duet_recorder::RecorderError),

    #[error("predictor request failed: {0}")]
    Predictor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, DuetError>;
