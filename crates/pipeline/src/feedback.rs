//! Reviewer feedback sources.
//!
//! A [`FeedbackSource`] produces one decision per drafted script. The studio
//! waits at most the configured timeout and treats silence as `approve`.

use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::feedback::FeedbackDecision;
use storyreel_core::job::FormFactor;
use storyreel_core::types::DbId;
use tokio::sync::{mpsc, Mutex};

/// What the reviewer is asked about.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRequest {
    pub job_id: DbId,
    pub script_id: DbId,
    pub form_factor: FormFactor,
    pub topic: String,
    pub narration: String,
    pub revision: i32,
}

#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Ask for a decision. `None` means no answer (closed input, EOF).
    async fn request(&self, request: &FeedbackRequest) -> Option<FeedbackDecision>;
}

/// Wait for a decision, defaulting to `approve` after `timeout` or when the
/// source has nothing to say.
pub async fn collect_with_timeout(
    source: &dyn FeedbackSource,
    request: &FeedbackRequest,
    timeout: Duration,
) -> FeedbackDecision {
    match tokio::time::timeout(timeout, source.request(request)).await {
        Ok(Some(decision)) => decision,
        Ok(None) => {
            tracing::info!(
                script_id = request.script_id,
                "No feedback provided, approving",
            );
            FeedbackDecision::Approve
        }
        Err(_) => {
            tracing::info!(
                script_id = request.script_id,
                timeout_secs = timeout.as_secs_f64(),
                "Feedback timed out, approving",
            );
            FeedbackDecision::Approve
        }
    }
}

/// Approves every script without asking. Used for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl FeedbackSource for AutoApprove {
    async fn request(&self, _request: &FeedbackRequest) -> Option<FeedbackDecision> {
        Some(FeedbackDecision::Approve)
    }
}

/// Decisions pushed in from elsewhere: a terminal reader, a test, an API.
pub struct ChannelFeedback {
    rx: Mutex<mpsc::Receiver<FeedbackDecision>>,
}

impl ChannelFeedback {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<FeedbackDecision>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { rx: Mutex::new(rx) }, tx)
    }
}

#[async_trait]
impl FeedbackSource for ChannelFeedback {
    async fn request(&self, request: &FeedbackRequest) -> Option<FeedbackDecision> {
        tracing::debug!(
            script_id = request.script_id,
            form_factor = %request.form_factor,
            "Waiting for feedback",
        );
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FeedbackRequest {
        FeedbackRequest {
            job_id: 1,
            script_id: 2,
            form_factor: FormFactor::ShortForm,
            topic: "Bees".to_string(),
            narration: "Bees dance.".to_string(),
            revision: 1,
        }
    }

    struct Silent;

    #[async_trait]
    impl FeedbackSource for Silent {
        async fn request(&self, _request: &FeedbackRequest) -> Option<FeedbackDecision> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn silence_defaults_to_approve() {
        let decision = collect_with_timeout(&Silent, &request(), Duration::from_millis(20)).await;
        assert_eq!(decision, FeedbackDecision::Approve);
    }

    #[tokio::test]
    async fn channel_delivers_decisions_in_order() {
        let (source, tx) = ChannelFeedback::new(4);
        tx.send(FeedbackDecision::revise("more bees").unwrap())
            .await
            .unwrap();
        tx.send(FeedbackDecision::Quit).await.unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(
            collect_with_timeout(&source, &request(), timeout).await,
            FeedbackDecision::revise("more bees").unwrap()
        );
        assert_eq!(
            collect_with_timeout(&source, &request(), timeout).await,
            FeedbackDecision::Quit
        );
    }

    #[tokio::test]
    async fn closed_channel_approves() {
        let (source, tx) = ChannelFeedback::new(1);
        drop(tx);
        let decision = collect_with_timeout(&source, &request(), Duration::from_secs(1)).await;
        assert_eq!(decision, FeedbackDecision::Approve);
    }
}
