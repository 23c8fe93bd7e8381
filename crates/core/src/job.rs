//! Job and script records, their status enums, and string round-tripping.
//!
//! Statuses are persisted as their snake_case names (`awaiting_feedback`,
//! `revision_needed`, ...). The transition rules live in [`crate::lifecycle`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Reason recorded when the user quits during feedback.
pub const USER_ABORTED_REASON: &str = "user aborted";

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`JobRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Researching,
    Scripting,
    AwaitingFeedback,
    Approved,
    Rendering,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        Self::Created,
        Self::Researching,
        Self::Scripting,
        Self::AwaitingFeedback,
        Self::Approved,
        Self::Rendering,
        Self::Completed,
        Self::Failed,
    ];

    /// Persisted name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Researching => "researching",
            Self::Scripting => "scripting",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Approved => "approved",
            Self::Rendering => "rendering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

/// Review status of a [`ScriptRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Pending,
    Approved,
    RevisionNeeded,
}

impl ScriptStatus {
    /// Persisted name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::RevisionNeeded => "revision_needed",
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "revision_needed" => Ok(Self::RevisionNeeded),
            other => Err(CoreError::Validation(format!(
                "Unknown script status '{other}'"
            ))),
        }
    }
}

/// Narrative variant of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFactor {
    LongForm,
    ShortForm,
}

impl FormFactor {
    /// Persisted name, also used as the form-factor directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongForm => "long_form",
            Self::ShortForm => "short_form",
        }
    }

    /// Parse a comma-separated list such as `"long_form,short_form"`.
    ///
    /// Duplicates are collapsed; an empty list is rejected.
    pub fn parse_list(s: &str) -> Result<Vec<FormFactor>, CoreError> {
        let mut forms: Vec<FormFactor> = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let form = part.parse::<FormFactor>()?;
            if !forms.contains(&form) {
                forms.push(form);
            }
        }
        if forms.is_empty() {
            return Err(CoreError::Validation(
                "At least one form factor is required".to_string(),
            ));
        }
        Ok(forms)
    }

    /// Inverse of [`FormFactor::parse_list`].
    pub fn join_list(forms: &[FormFactor]) -> String {
        forms
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for FormFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormFactor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long_form" => Ok(Self::LongForm),
            "short_form" => Ok(Self::ShortForm),
            other => Err(CoreError::Validation(format!(
                "Unknown form factor '{other}'. Must be one of: long_form, short_form"
            ))),
        }
    }
}

/// Why a job ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The user quit during feedback. Never retried.
    UserAborted,
    /// A production run failed (drop threshold, render, encode). The job may
    /// be re-rendered as a new run.
    RunFailed,
    /// Research or scripting failed.
    StageFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserAborted => "user_aborted",
            Self::RunFailed => "run_failed",
            Self::StageFailed => "stage_failed",
        }
    }
}

impl FromStr for FailureKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_aborted" => Ok(Self::UserAborted),
            "run_failed" => Ok(Self::RunFailed),
            "stage_failed" => Ok(Self::StageFailed),
            other => Err(CoreError::Validation(format!(
                "Unknown failure kind '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One production run for a topic.
///
/// `version` is the optimistic-concurrency counter: a commit succeeds only if
/// the stored version still equals the version this record was loaded at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: DbId,
    pub topic: String,
    pub research_summary: Option<String>,
    pub status: JobStatus,
    /// Form factors that must each have an approved script before rendering.
    pub required_forms: Vec<FormFactor>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One narrative variant of a job.
///
/// The narration text never changes within a revision. A `revise` decision
/// discards it (`narration = None`) and the next narration bumps `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: DbId,
    pub job_id: DbId,
    pub form_factor: FormFactor,
    pub narration: Option<String>,
    pub status: ScriptStatus,
    pub revision_notes: Option<String>,
    pub revision: i32,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Append-only log entry for a feedback decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub script_id: DbId,
    pub decision: String,
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub topic: String,
    pub required_forms: Vec<FormFactor>,
}

/// Input for creating a script slot.
#[derive(Debug, Clone)]
pub struct NewScript {
    pub job_id: DbId,
    pub form_factor: FormFactor,
}

/// A set of record updates that must be applied atomically.
///
/// Each record carries the version it was loaded at. Stores reject the whole
/// commit with [`CoreError::Conflict`] if any version is stale.
#[derive(Debug, Clone, Default)]
pub struct StateCommit {
    pub job: Option<JobRecord>,
    pub scripts: Vec<ScriptRecord>,
    pub feedback: Option<FeedbackEntry>,
}
