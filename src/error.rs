//! Error taxonomy for the processing pipeline.
//!
//! Every per-room failure is contained inside that room's cycle. Callers that
//! need to tell an unknown room apart from a failed cycle match on
//! `PipelineError`; an empty cache is not an error and surfaces as `None`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The room id is not part of the registry.
    #[error("unknown room '{0}'")]
    UnknownRoom(String),

    /// The backing video source could not be opened.
    #[error("video source for room '{room_id}' unavailable: {reason}")]
    SourceUnavailable { room_id: String, reason: String },

    /// A frame handed to the cycle is malformed.
    #[error("malformed frame for room '{room_id}': {reason}")]
    DecodeFailure { room_id: String, reason: String },

    /// The detector errored, panicked, overran its budget or returned garbage.
    #[error("detector failed for room '{room_id}': {reason}")]
    DetectorFailure { room_id: String, reason: String },

    /// The room is mid-cycle and did not free up within the wait bound.
    #[error("room '{0}' is busy processing")]
    Busy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::UnknownRoom(id) | Self::Busy(id) => Some(id),
            Self::SourceUnavailable { room_id, .. }
            | Self::DecodeFailure { room_id, .. }
            | Self::DetectorFailure { room_id, .. } => Some(room_id),
            Self::InvalidConfig(_) => None,
        }
    }

    pub(crate) fn detector(room_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::DetectorFailure {
            room_id: room_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(room_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::DecodeFailure {
            room_id: room_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
