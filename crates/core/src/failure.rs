//! Failure taxonomy for stitching jobs.
//!
//! Every kind is fatal to the job. The kind decides the HTTP-equivalent
//! status the caller sees: bad input is a client error, everything that
//! points at the pipeline itself is a server error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User-facing message for a semantic stitching failure.
pub const INSUFFICIENT_OVERLAP_MESSAGE: &str =
    "Could not stitch panorama. The images may not have enough overlap or shared features.";

/// Suggested remedy attached to [`FailureKind::InsufficientOverlap`].
pub const INSUFFICIENT_OVERLAP_DETAIL: &str =
    "Try using images with more overlap or that show the same scene from different angles.";

/// Why a job ended in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// No sources supplied, or none of them produced a usable image.
    InvalidInput,
    /// The local staging directory could not be created.
    WorkspaceUnavailable,
    /// The connectivity probe against the compute host failed.
    RemoteUnreachable,
    /// Directory creation, upload, verification or download failed.
    TransferFailed,
    /// The engine crashed, timed out or exited non-zero.
    EngineExecutionFailed,
    /// The engine ran but reported that the images cannot be stitched.
    InsufficientOverlap,
    /// Stitching finished but no plausible output file exists.
    OutputNotFound,
    /// The job was cancelled before it reached a terminal state.
    Cancelled,
    /// A pipeline invariant was violated (e.g. completion without a result).
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl FailureKind {
    pub const ALL: [FailureKind; 9] = [
        Self::InvalidInput,
        Self::WorkspaceUnavailable,
        Self::RemoteUnreachable,
        Self::TransferFailed,
        Self::EngineExecutionFailed,
        Self::InsufficientOverlap,
        Self::OutputNotFound,
        Self::Cancelled,
        Self::Internal,
    ];

    /// HTTP-equivalent status code.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::InsufficientOverlap => 422,
            // Client closed request.
            Self::Cancelled => 499,
            Self::WorkspaceUnavailable
            | Self::RemoteUnreachable
            | Self::TransferFailed
            | Self::EngineExecutionFailed
            | Self::OutputNotFound
            | Self::Internal => 500,
        }
    }

    /// Whether the failure reflects the caller's input rather than the pipeline.
    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Stable machine-readable code, also the persisted representation.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::WorkspaceUnavailable => "WORKSPACE_UNAVAILABLE",
            Self::RemoteUnreachable => "REMOTE_UNREACHABLE",
            Self::TransferFailed => "TRANSFER_FAILED",
            Self::EngineExecutionFailed => "ENGINE_EXECUTION_FAILED",
            Self::InsufficientOverlap => "INSUFFICIENT_OVERLAP",
            Self::OutputNotFound => "OUTPUT_NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == s)
            .ok_or_else(|| format!("Unknown failure kind '{s}'"))
    }
}

/// A typed, fatal job failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Optional remedy or extra context shown to the caller.
    pub detail: Option<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn workspace(message: impl Into<String>) -> Self {
        Self::new(FailureKind::WorkspaceUnavailable, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RemoteUnreachable, message)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransferFailed, message)
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(FailureKind::EngineExecutionFailed, message)
    }

    pub fn insufficient_overlap() -> Self {
        Self::new(FailureKind::InsufficientOverlap, INSUFFICIENT_OVERLAP_MESSAGE)
            .with_detail(INSUFFICIENT_OVERLAP_DETAIL)
    }

    pub fn output_not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::OutputNotFound, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(FailureKind::InvalidInput.http_status(), 400);
        assert_eq!(FailureKind::InsufficientOverlap.http_status(), 422);
        assert_eq!(FailureKind::RemoteUnreachable.http_status(), 500);
        assert_eq!(FailureKind::TransferFailed.http_status(), 500);
        assert_eq!(FailureKind::EngineExecutionFailed.http_status(), 500);
        assert_eq!(FailureKind::OutputNotFound.http_status(), 500);
    }

    #[test]
    fn only_input_related_kinds_are_client_errors() {
        let client: Vec<_> = FailureKind::ALL
            .into_iter()
            .filter(|k| k.is_client_error())
            .collect();
        assert_eq!(
            client,
            [
                FailureKind::InvalidInput,
                FailureKind::InsufficientOverlap,
                FailureKind::Cancelled
            ]
        );
    }

    #[test]
    fn codes_parse_back() {
        for kind in FailureKind::ALL {
            assert_eq!(kind.code().parse::<FailureKind>(), Ok(kind));
        }
        assert!("NOPE".parse::<FailureKind>().is_err());
    }

    #[test]
    fn insufficient_overlap_carries_detail() {
        let failure = JobFailure::insufficient_overlap();
        assert_eq!(failure.kind, FailureKind::InsufficientOverlap);
        assert_eq!(failure.to_string(), INSUFFICIENT_OVERLAP_MESSAGE);
        assert_eq!(failure.detail.as_deref(), Some(INSUFFICIENT_OVERLAP_DETAIL));
    }
}
