//! Job/script state machine.
//!
//! ```text
//! created -> researching -> scripting -> awaiting_feedback -> approved -> rendering -> completed
//!                              ^                |
//!                              +--- revise -----+
//! any non-terminal state -> failed
//! failed (run failure only) -> rendering
//! ```
//!
//! Scripts move `pending -> approved` or `pending -> revision_needed -> pending`.
//! Every function here mutates records in memory only; callers persist the
//! result through [`crate::store::JobStore::commit`], which rejects stale
//! versions.

use crate::error::CoreError;
use crate::feedback::FeedbackDecision;
use crate::job::{
    FailureKind, FormFactor, JobRecord, JobStatus, ScriptRecord, ScriptStatus,
    USER_ABORTED_REASON,
};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

impl JobStatus {
    /// `completed` and `failed` accept no further ordinary transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> to` is an edge of the job lifecycle.
    ///
    /// The `failed -> rendering` retry edge is not listed here because it
    /// depends on the failure kind; see [`retry_rendering`].
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Created, Researching)
            | (Researching, Scripting)
            | (Scripting, AwaitingFeedback)
            | (AwaitingFeedback, Approved)
            | (AwaitingFeedback, Scripting)
            | (Approved, Rendering)
            | (Rendering, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Move a job to `to`, rejecting edges outside the lifecycle.
pub fn transition_job(job: &mut JobRecord, to: JobStatus, now: Timestamp) -> Result<(), CoreError> {
    if !job.status.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            entity: "job",
            from: job.status.to_string(),
            to: to.to_string(),
        });
    }
    job.status = to;
    job.updated_at = now;
    Ok(())
}

/// Mark a job failed with a human-readable reason.
pub fn fail_job(
    job: &mut JobRecord,
    kind: FailureKind,
    reason: impl Into<String>,
    now: Timestamp,
) -> Result<(), CoreError> {
    transition_job(job, JobStatus::Failed, now)?;
    job.failure_kind = Some(kind);
    job.failure_reason = Some(reason.into());
    Ok(())
}

/// Re-enter `rendering` after a failed production run.
///
/// Only jobs failed with [`FailureKind::RunFailed`] qualify; a user abort is
/// final.
pub fn retry_rendering(job: &mut JobRecord, now: Timestamp) -> Result<(), CoreError> {
    if job.status != JobStatus::Failed || job.failure_kind != Some(FailureKind::RunFailed) {
        return Err(CoreError::InvalidTransition {
            entity: "job",
            from: job.status.to_string(),
            to: JobStatus::Rendering.to_string(),
        });
    }
    job.status = JobStatus::Rendering;
    job.failure_kind = None;
    job.failure_reason = None;
    job.updated_at = now;
    Ok(())
}

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

/// Attach a freshly generated narration to a script slot.
///
/// Allowed while the job is `scripting` and the script either has no text
/// yet or is waiting for a revision. Bumps `revision`.
pub fn apply_narration(
    job: &JobRecord,
    script: &mut ScriptRecord,
    text: &str,
    now: Timestamp,
) -> Result<(), CoreError> {
    if job.status != JobStatus::Scripting {
        return Err(CoreError::Validation(format!(
            "Job {} is '{}'; narration can only be attached while scripting",
            job.id, job.status
        )));
    }
    let needs_text = match script.status {
        ScriptStatus::RevisionNeeded => true,
        ScriptStatus::Pending => script.narration.is_none(),
        ScriptStatus::Approved => false,
    };
    if !needs_text {
        return Err(CoreError::Validation(format!(
            "Script {} ({}) already has a narration for revision {}",
            script.id, script.status, script.revision
        )));
    }
    if text.trim().is_empty() {
        return Err(CoreError::Validation(
            "Narration text must not be empty".to_string(),
        ));
    }
    script.narration = Some(text.to_string());
    script.status = ScriptStatus::Pending;
    script.revision += 1;
    script.updated_at = now;
    Ok(())
}

/// Find the script for a required form factor.
fn script_for<'a>(scripts: &'a [ScriptRecord], form: FormFactor) -> Option<&'a ScriptRecord> {
    scripts.iter().find(|s| s.form_factor == form)
}

/// True when every required form has narration and none awaits revision.
pub fn all_scripts_drafted(job: &JobRecord, scripts: &[ScriptRecord]) -> bool {
    job.required_forms.iter().all(|form| {
        script_for(scripts, *form).is_some_and(|s| {
            s.narration.is_some() && s.status != ScriptStatus::RevisionNeeded
        })
    })
}

/// True when every required form has an approved script.
pub fn ready_for_assembly(job: &JobRecord, scripts: &[ScriptRecord]) -> bool {
    job.required_forms.iter().all(|form| {
        script_for(scripts, *form).is_some_and(|s| s.status == ScriptStatus::Approved)
    })
}

/// Advance `scripting -> awaiting_feedback` once all drafts exist.
///
/// Returns `true` if the job moved.
pub fn advance_to_feedback(
    job: &mut JobRecord,
    scripts: &[ScriptRecord],
    now: Timestamp,
) -> Result<bool, CoreError> {
    if job.status != JobStatus::Scripting || !all_scripts_drafted(job, scripts) {
        return Ok(false);
    }
    transition_job(job, JobStatus::AwaitingFeedback, now)?;
    // Scripts approved before a sibling's revision keep their approval.
    if ready_for_assembly(job, scripts) {
        transition_job(job, JobStatus::Approved, now)?;
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// Result of applying one feedback decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The script was approved; `job_approved` is set when it was the last one.
    Approved { job_approved: bool },
    /// The script needs a new narration; the job is back in `scripting`.
    RevisionRequested,
    /// The reviewer quit; the job is `failed`.
    Aborted,
}

/// Apply a feedback decision to `script_id`.
///
/// `quit` is accepted in any non-terminal state so a reviewer can stop a
/// render in flight. Approve and revise are accepted while the job is
/// `awaiting_feedback`, or `scripting` because a sibling script is being
/// revised. The job only reaches `approved` from `awaiting_feedback`.
pub fn apply_feedback(
    job: &mut JobRecord,
    scripts: &mut [ScriptRecord],
    script_id: DbId,
    decision: &FeedbackDecision,
    now: Timestamp,
) -> Result<FeedbackOutcome, CoreError> {
    let idx = scripts
        .iter()
        .position(|s| s.id == script_id && s.job_id == job.id)
        .ok_or(CoreError::NotFound {
            entity: "script",
            id: script_id,
        })?;

    let notes = match decision {
        FeedbackDecision::Quit => {
            fail_job(job, FailureKind::UserAborted, USER_ABORTED_REASON, now)?;
            return Ok(FeedbackOutcome::Aborted);
        }
        FeedbackDecision::Approve => None,
        FeedbackDecision::Revise { notes } => Some(notes.as_str()),
    };

    if !matches!(job.status, JobStatus::AwaitingFeedback | JobStatus::Scripting) {
        return Err(CoreError::Validation(format!(
            "Job {} is '{}'; feedback is not accepted",
            job.id, job.status
        )));
    }

    let script = &mut scripts[idx];
    if script.status != ScriptStatus::Pending || script.narration.is_none() {
        let to = match notes {
            Some(_) => ScriptStatus::RevisionNeeded,
            None => ScriptStatus::Approved,
        };
        return Err(CoreError::InvalidTransition {
            entity: "script",
            from: script.status.to_string(),
            to: to.to_string(),
        });
    }

    match notes {
        None => {
            script.status = ScriptStatus::Approved;
            script.updated_at = now;

            let job_approved =
                job.status == JobStatus::AwaitingFeedback && ready_for_assembly(job, scripts);
            if job_approved {
                transition_job(job, JobStatus::Approved, now)?;
            }
            Ok(FeedbackOutcome::Approved { job_approved })
        }
        Some(notes) => {
            if notes.trim().is_empty() {
                return Err(CoreError::Validation(
                    "A revise decision requires non-empty revision notes".to_string(),
                ));
            }
            script.status = ScriptStatus::RevisionNeeded;
            script.revision_notes = Some(notes.to_string());
            script.narration = None;
            script.updated_at = now;

            if job.status == JobStatus::AwaitingFeedback {
                transition_job(job, JobStatus::Scripting, now)?;
            }
            Ok(FeedbackOutcome::RevisionRequested)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
