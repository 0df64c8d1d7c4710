//! Named failure conditions of the train/serve protocol

use std::path::PathBuf;
use thiserror::Error;

/// Domain errors surfaced through `anyhow` so callers can `downcast_ref` them.
#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("artifact missing: {name} (expected at {})", path.display())]
    ArtifactMissing { name: &'static str, path: PathBuf },

    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt artifact {name}: {reason}")]
    CorruptArtifact { name: &'static str, reason: String },

    #[error("unknown model variant: {0}")]
    UnknownModel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl ChurnError {
    /// Artifact failures halt the serving process; everything else is per request.
    pub fn is_fatal_for_process(&self) -> bool {
        matches!(
            self,
            ChurnError::ArtifactMissing { .. } | ChurnError::CorruptArtifact { .. }
        )
    }
}
