//! Stitching job model and its linear state machine.
//!
//! A job moves strictly forward through [`JobState`]; the only other edge
//! is into `Failed`, which is reachable from every non-terminal state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::failure::JobFailure;
use crate::naming;
use crate::trace::DebugTrace;
use crate::types::{JobId, Timestamp};

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Staged,
    Connected,
    Uploaded,
    ProjectCreated,
    Stitched,
    OutputResolved,
    Retrieved,
    Complete,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 10] = [
        Self::Created,
        Self::Staged,
        Self::Connected,
        Self::Uploaded,
        Self::ProjectCreated,
        Self::Stitched,
        Self::OutputResolved,
        Self::Retrieved,
        Self::Complete,
        Self::Failed,
    ];

    /// The single legal forward transition, `None` for terminal states.
    pub fn successor(self) -> Option<JobState> {
        match self {
            Self::Created => Some(Self::Staged),
            Self::Staged => Some(Self::Connected),
            Self::Connected => Some(Self::Uploaded),
            Self::Uploaded => Some(Self::ProjectCreated),
            Self::ProjectCreated => Some(Self::Stitched),
            Self::Stitched => Some(Self::OutputResolved),
            Self::OutputResolved => Some(Self::Retrieved),
            Self::Retrieved => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Staged => "STAGED",
            Self::Connected => "CONNECTED",
            Self::Uploaded => "UPLOADED",
            Self::ProjectCreated => "PROJECT_CREATED",
            Self::Stitched => "STITCHED",
            Self::OutputResolved => "OUTPUT_RESOLVED",
            Self::Retrieved => "RETRIEVED",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Unknown job state '{s}'"))
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Human-readable panorama name; sanitized into the project name.
    #[serde(default)]
    pub panorama_name: Option<String>,
    /// Ordered logical image references.
    #[serde(default)]
    pub source_refs: Vec<String>,
}

/// One end-to-end stitching request.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    human_name: String,
    project_name: String,
    source_refs: Vec<String>,
    local_dir: PathBuf,
    remote_dir: String,
    state: JobState,
    trace: DebugTrace,
    result_ref: Option<String>,
    thumbnail_ref: Option<String>,
    failure: Option<JobFailure>,
    created_at: Timestamp,
}

impl Job {
    /// Create a job in the `Created` state with a fresh id.
    ///
    /// Directory paths are derived here but nothing is touched on disk.
    pub fn new(request: JobRequest, staging_root: &Path, remote_root: &str) -> Self {
        Self::with_id(uuid::Uuid::new_v4(), request, staging_root, remote_root)
    }

    pub fn with_id(
        id: JobId,
        request: JobRequest,
        staging_root: &Path,
        remote_root: &str,
    ) -> Self {
        let human_name = request
            .panorama_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| naming::default_human_name(id));
        let project_name = naming::project_name(&human_name, id);

        Self {
            id,
            project_name,
            human_name,
            source_refs: request.source_refs,
            local_dir: staging_root.join(id.to_string()),
            remote_dir: format!("{}/{id}", remote_root.trim_end_matches('/')),
            state: JobState::Created,
            trace: DebugTrace::new(id),
            result_ref: None,
            thumbnail_ref: None,
            failure: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn human_name(&self) -> &str {
        &self.human_name
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn source_refs(&self) -> &[String] {
        &self.source_refs
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn remote_dir(&self) -> &str {
        &self.remote_dir
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn trace(&self) -> &DebugTrace {
        &self.trace
    }

    pub fn result_ref(&self) -> Option<&str> {
        self.result_ref.as_deref()
    }

    pub fn thumbnail_ref(&self) -> Option<&str> {
        self.thumbnail_ref.as_deref()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Move to `next`, which must be the successor of the current state.
    ///
    /// `Complete` is only reachable through [`Job::complete`].
    pub fn advance(&mut self, next: JobState) -> Result<(), CoreError> {
        if next == JobState::Complete || self.state.successor() != Some(next) {
            return Err(CoreError::Conflict(format!(
                "Illegal job transition {} -> {next}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record the preview of the retrieved panorama. Only valid in `Retrieved`.
    pub fn attach_thumbnail(&mut self, thumbnail_ref: String) -> Result<(), CoreError> {
        if self.state != JobState::Retrieved {
            return Err(CoreError::Conflict(format!(
                "Cannot attach a thumbnail in state {}",
                self.state
            )));
        }
        self.thumbnail_ref = Some(thumbnail_ref);
        Ok(())
    }

    /// Finish successfully. Requires state `Retrieved` and a non-empty reference.
    pub fn complete(&mut self, result_ref: String) -> Result<(), CoreError> {
        if self.state != JobState::Retrieved {
            return Err(CoreError::Conflict(format!(
                "Illegal job transition {} -> {}",
                self.state,
                JobState::Complete
            )));
        }
        if result_ref.trim().is_empty() {
            return Err(CoreError::Validation(
                "A completed job must carry a result reference".into(),
            ));
        }
        self.result_ref = Some(result_ref);
        self.state = JobState::Complete;
        Ok(())
    }

    /// Terminate with `failure`. Allowed from every non-terminal state.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), CoreError> {
        if self.state.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job already finished in state {}",
                self.state
            )));
        }
        self.failure = Some(failure);
        self.state = JobState::Failed;
        Ok(())
    }
}
