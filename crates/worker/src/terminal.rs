//! Interactive feedback from the terminal.
//!
//! Prints each narration and reads one reply line from stdin:
//!
//! ```text
//! a | approve            approve the script
//! r <notes> | revise <notes>   ask for a rewrite
//! q | quit               abandon the job
//! ```
//!
//! An empty line approves. Unreadable replies are re-prompted.

use async_trait::async_trait;
use storyreel_core::error::CoreError;
use storyreel_core::feedback::{
    FeedbackDecision, DECISION_APPROVE, DECISION_QUIT, DECISION_REVISE,
};
use storyreel_pipeline::feedback::{FeedbackRequest, FeedbackSource};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub struct TerminalFeedback {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalFeedback {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for TerminalFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackSource for TerminalFeedback {
    async fn request(&self, request: &FeedbackRequest) -> Option<FeedbackDecision> {
        println!();
        println!(
            "=== {} script for '{}' (revision {}) ===",
            request.form_factor, request.topic, request.revision
        );
        println!("{}", request.narration);
        println!("[a]pprove, [r]evise <notes>, [q]uit:");

        let mut lines = self.lines.lock().await;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read feedback from stdin");
                    return None;
                }
            };
            match parse_reply(&line) {
                Ok(decision) => return Some(decision),
                Err(e) => println!("{e}"),
            }
        }
    }
}

/// Parse one reply line.
pub fn parse_reply(line: &str) -> Result<FeedbackDecision, CoreError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, Some(rest.trim())),
        None => (line, None),
    };
    let word = word.to_lowercase();
    let decision = match word.as_str() {
        "a" => DECISION_APPROVE,
        "r" => DECISION_REVISE,
        "q" => DECISION_QUIT,
        other => other,
    };
    FeedbackDecision::parse(decision, rest)
}
