use storyreel_core::error::CoreError;
use storyreel_core::ffmpeg::FfmpegError;
use storyreel_core::outcome::OutcomeTally;

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Network or rate-limit failure; retried with backoff.
    #[error("Transient service failure: {0}")]
    Transient(String),

    /// Permanent for this scene; triggers the placeholder or drop policy.
    #[error("Asset unavailable: {0}")]
    AssetUnavailable(String),

    #[error("Narration synthesis failed: {0}")]
    Synthesis(String),

    #[error("Motion render failed: {0}")]
    Render(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Map a media toolchain failure onto a render error.
    pub fn render(err: FfmpegError) -> Self {
        match err {
            FfmpegError::IoError(e) => Self::Io(e),
            other => Self::Render(other.to_string()),
        }
    }

    /// Map a media toolchain failure onto an encode error.
    pub fn encode(err: FfmpegError) -> Self {
        match err {
            FfmpegError::IoError(e) => Self::Io(e),
            other => Self::Encode(other.to_string()),
        }
    }
}

/// Failure of a production run or lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    State(#[from] CoreError),

    /// Too many scenes dropped to produce a trustworthy video.
    #[error("Run aborted: {reason}")]
    Aborted { reason: String, tally: OutcomeTally },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    /// A content stage (research, narration writing) failed.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl PipelineError {
    /// Outcome counts to preserve on the failed run, when known.
    pub fn tally(&self) -> Option<OutcomeTally> {
        match self {
            Self::Aborted { tally, .. } => Some(*tally),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(ServiceError::Transient("429".into()).is_transient());
        assert!(!ServiceError::AssetUnavailable("none".into()).is_transient());
        assert!(!ServiceError::Cancelled.is_transient());
    }

    #[test]
    fn toolchain_failures_keep_their_category() {
        let err = ServiceError::render(FfmpegError::ParseError("bad".into()));
        assert!(matches!(err, ServiceError::Render(_)));
        let err = ServiceError::encode(FfmpegError::ExecutionFailed {
            exit_code: Some(1),
            stderr: "boom".into(),
        });
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn aborted_exposes_tally() {
        let tally = OutcomeTally {
            full: 3,
            degraded: 0,
            dropped: 2,
        };
        let err = PipelineError::Aborted {
            reason: "too many drops".into(),
            tally,
        };
        assert_eq!(err.tally(), Some(tally));
        assert_eq!(PipelineError::Cancelled.tally(), None);
    }
}
