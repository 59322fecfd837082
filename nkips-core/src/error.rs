//! Core error types.

use nkips_protocol::Level;
use thiserror::Error;

/// Errors from routing state and label handling.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("level not configured: {level}")]
    LevelNotConfigured { level: Level },

    #[error("destination out of range: {destination} (outputs 1..={outputs})")]
    DestinationOutOfRange { destination: u16, outputs: u16 },

    // A field named `source` would be taken for the error source.
    #[error("source out of range: {id} (inputs 1..={inputs})")]
    SourceOutOfRange { id: u16, inputs: u16 },

    #[error("invalid label row {line}: {reason}")]
    InvalidLabelRow { line: usize, reason: String },

    #[error("invalid {kind} id: {id} (ids are 1-based)")]
    InvalidPortId { kind: &'static str, id: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns whether the error was caused by caller input.
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, CoreError::Io(_))
    }

    /// Returns a short error code for CLI and log output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::LevelNotConfigured { .. } => "LEVEL_NOT_CONFIGURED",
            CoreError::DestinationOutOfRange { .. } => "OUT_OF_RANGE",
            CoreError::SourceOutOfRange { .. } => "OUT_OF_RANGE",
            CoreError::InvalidLabelRow { .. } => "BAD_LABELS",
            CoreError::InvalidPortId { .. } => "BAD_REQUEST",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}
