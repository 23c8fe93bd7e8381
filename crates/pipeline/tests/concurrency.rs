//! Lifecycle writes racing each other on the same job.
//!
//! A [`GatedStore`] holds both callers at the commit so each has loaded
//! the job before either writes.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{FakeNarrator, FakeVisuals, GatedStore, Harness};
use storyreel_core::error::CoreError;
use storyreel_core::feedback::FeedbackDecision;
use storyreel_core::job::{FormFactor, JobRecord, JobStatus, ScriptRecord};
use storyreel_core::lifecycle::FeedbackOutcome;

fn harness() -> (Arc<GatedStore>, Harness) {
    let store = Arc::new(GatedStore::new());
    let h = Harness::with_store(store.clone(), FakeNarrator::default(), FakeVisuals::default());
    (store, h)
}

/// A two-form job in `scripting` with no narration yet.
async fn scripting_job(h: &Harness) -> JobRecord {
    let (job, _) = h
        .lifecycle
        .create_job(
            "Tides of the north sea",
            &[FormFactor::LongForm, FormFactor::ShortForm],
        )
        .await
        .unwrap();
    h.lifecycle.begin_research(job.id).await.unwrap();
    h.lifecycle
        .record_research(job.id, "Storm surges.")
        .await
        .unwrap()
}

/// A two-form job awaiting feedback on both drafts.
async fn drafted_job(h: &Harness) -> (JobRecord, ScriptRecord, ScriptRecord) {
    let job = scripting_job(h).await;
    let (_, long) = h
        .lifecycle
        .provide_narration(job.id, FormFactor::LongForm, "The tide comes in. It goes out.")
        .await
        .unwrap();
    let (job, short) = h
        .lifecycle
        .provide_narration(job.id, FormFactor::ShortForm, "Water rises.")
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::AwaitingFeedback);
    (job, long, short)
}

// -- submit_feedback --

#[tokio::test]
async fn concurrent_approvals_never_strand_the_job() {
    let (store, h) = harness();
    let (job, long, short) = drafted_job(&h).await;

    store.hold_commits(2);
    let approve = FeedbackDecision::Approve;
    let (first, second) = tokio::join!(
        h.lifecycle.submit_feedback(long.id, &approve),
        h.lifecycle.submit_feedback(short.id, &approve),
    );

    let loser = match (first, second) {
        (Ok(_), Err(e)) => {
            assert_matches!(e, CoreError::Conflict(_));
            short.id
        }
        (Err(e), Ok(_)) => {
            assert_matches!(e, CoreError::Conflict(_));
            long.id
        }
        other => panic!("expected exactly one conflict, got {other:?}"),
    };

    let outcome = h.lifecycle.submit_feedback(loser, &approve).await.unwrap();
    assert_eq!(outcome, FeedbackOutcome::Approved { job_approved: true });
    let job = h.store.load_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Approved);
}

#[tokio::test]
async fn approval_racing_a_revision_request_conflicts() {
    let (store, h) = harness();
    let (job, long, short) = drafted_job(&h).await;

    store.hold_commits(2);
    let approve = FeedbackDecision::Approve;
    let revise = FeedbackDecision::Revise {
        notes: "Mention the moon.".to_string(),
    };
    let (approved, revised) = tokio::join!(
        h.lifecycle.submit_feedback(long.id, &approve),
        h.lifecycle.submit_feedback(short.id, &revise),
    );
    assert_eq!(
        [approved.is_err(), revised.is_err()].iter().filter(|e| **e).count(),
        1
    );

    let job = h.store.load_job(job.id).await.unwrap();
    assert_ne!(job.status, JobStatus::Approved);
}

// -- provide_narration --

#[tokio::test]
async fn concurrent_narrations_advance_the_job() {
    let (store, h) = harness();
    let job = scripting_job(&h).await;

    store.hold_commits(2);
    let (long, short) = tokio::join!(
        h.lifecycle
            .provide_narration(job.id, FormFactor::LongForm, "Gulls circle the pier."),
        h.lifecycle
            .provide_narration(job.id, FormFactor::ShortForm, "Gulls."),
    );

    let (loser, text) = match (long, short) {
        (Ok(_), Err(e)) => {
            assert_matches!(e, CoreError::Conflict(_));
            (FormFactor::ShortForm, "Gulls.")
        }
        (Err(e), Ok(_)) => {
            assert_matches!(e, CoreError::Conflict(_));
            (FormFactor::LongForm, "Gulls circle the pier.")
        }
        other => panic!("expected exactly one conflict, got {other:?}"),
    };

    let (job, _) = h
        .lifecycle
        .provide_narration(job.id, loser, text)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::AwaitingFeedback);
    let stored = h.store.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::AwaitingFeedback);
}
