//! Subprocess-backed collaborators.
//!
//! Each collaborator is an external program that receives one JSON request
//! on stdin and answers with one JSON object on stdout. Exit code
//! [`EXIT_TEMPFAIL`] and timeouts are reported as transient so the caller
//! retries them; any other non-zero exit is permanent for the request.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use storyreel_core::error::CoreError;
use storyreel_core::ffmpeg;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::ServiceError;
use crate::providers::{
    AudioClip, ContentWriter, NarrationRequest, NarrationSynthesizer, PromptEnhancer,
    VisualProvider,
};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Exit code a collaborator uses to ask for a retry (`EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

/// Default wall-clock limit per invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Stderr excerpt kept in error messages.
const STDERR_EXCERPT_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// A program plus fixed arguments, parsed from a configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Split `line` on whitespace; the first word is the program.
    pub fn parse(line: &str, timeout: Duration) -> Result<Self, CoreError> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| CoreError::Validation("Command must not be empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            timeout,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Captured result of one invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub parsed_output: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Spawn the command, pipe `input` to stdin as JSON, capture output, and
/// enforce the configured timeout.
pub async fn run_command(
    spec: &CommandSpec,
    input: &serde_json::Value,
) -> Result<CommandOutput, CommandError> {
    let mut cmd = spec.command();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = serde_json::to_vec(input).unwrap_or_default();
        // The program may close stdin early.
        let _ = stdin.write_all(&bytes).await;
        drop(stdin);
    }

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    // On timeout `child` is dropped here and killed.
    match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
            let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
            let parsed_output = serde_json::from_str(stdout.trim()).ok();
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
                parsed_output,
            })
        }
        Ok(Err(e)) => Err(CommandError::IoError(e)),
        Err(_elapsed) => Err(CommandError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Run `spec` and decode its JSON reply.
///
/// `permanent` builds the error for non-retryable failures.
async fn call<T>(
    spec: &CommandSpec,
    input: serde_json::Value,
    permanent: fn(String) -> ServiceError,
) -> Result<T, ServiceError>
where
    T: for<'de> Deserialize<'de>,
{
    let output = match run_command(spec, &input).await {
        Ok(output) => output,
        Err(CommandError::Timeout { elapsed_ms }) => {
            return Err(ServiceError::Transient(format!(
                "{} timed out after {elapsed_ms}ms",
                spec.program
            )))
        }
        // A missing binary will not appear on retry.
        Err(CommandError::IoError(e)) => {
            return Err(permanent(format!("failed to run {}: {e}", spec.program)))
        }
    };

    tracing::debug!(
        program = %spec.program,
        exit_code = output.exit_code,
        duration_ms = output.duration_ms,
        "Collaborator finished",
    );

    if output.exit_code != 0 {
        let message = format!(
            "{} exited with {}: {}",
            spec.program,
            output.exit_code,
            excerpt(&output.stderr)
        );
        return Err(if output.exit_code == EXIT_TEMPFAIL {
            ServiceError::Transient(message)
        } else {
            permanent(message)
        });
    }

    let value = output.parsed_output.ok_or_else(|| {
        permanent(format!(
            "{} did not print a JSON object: {}",
            spec.program,
            excerpt(&output.stdout)
        ))
    })?;
    serde_json::from_value(value)
        .map_err(|e| permanent(format!("unexpected reply from {}: {e}", spec.program)))
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Deserialize)]
struct PathReply {
    /// Defaults to the requested output path.
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct TextReply {
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptReply {
    prompt: String,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Narration synthesis through an external program.
///
/// Request: `{"text": ..., "output": ...}`. The clip's duration is measured
/// with ffprobe afterwards; the program's own estimate is never trusted.
#[derive(Debug, Clone)]
pub struct CommandNarrator {
    spec: CommandSpec,
}

impl CommandNarrator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl NarrationSynthesizer for CommandNarrator {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<AudioClip, ServiceError> {
        let reply: PathReply = call(
            &self.spec,
            json!({ "text": text, "output": path_str(output) }),
            ServiceError::Synthesis,
        )
        .await?;
        let path = reply.path.unwrap_or_else(|| output.to_path_buf());
        let duration = ffmpeg::probe_duration(&path)
            .await
            .map_err(|e| ServiceError::Synthesis(format!("unreadable narration clip: {e}")))?;
        if duration.is_zero() {
            return Err(ServiceError::Synthesis(
                "narration clip has zero duration".to_string(),
            ));
        }
        Ok(AudioClip { path, duration })
    }
}

/// Image synthesis and stock search through one external program.
///
/// Request: `{"mode": "image"|"stock", "query": ..., "output": ...}`.
#[derive(Debug, Clone)]
pub struct CommandVisuals {
    spec: CommandSpec,
}

impl CommandVisuals {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    async fn fetch(&self, mode: &str, query: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        let reply: PathReply = call(
            &self.spec,
            json!({ "mode": mode, "query": query, "output": path_str(output) }),
            ServiceError::AssetUnavailable,
        )
        .await?;
        let path = reply.path.unwrap_or_else(|| output.to_path_buf());
        if !tokio::fs::try_exists(&path).await? {
            return Err(ServiceError::AssetUnavailable(format!(
                "{} reported {} but it does not exist",
                self.spec.program,
                path.display()
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl VisualProvider for CommandVisuals {
    async fn synthesize_image(&self, prompt: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        self.fetch("image", prompt, output).await
    }

    async fn search_footage(&self, cue: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        self.fetch("stock", cue, output).await
    }
}

/// Request: `{"sentence": ...}`, reply `{"prompt": ...}`.
#[derive(Debug, Clone)]
pub struct CommandEnhancer {
    spec: CommandSpec,
}

impl CommandEnhancer {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl PromptEnhancer for CommandEnhancer {
    async fn enhance(&self, sentence: &str) -> Result<String, ServiceError> {
        let reply: PromptReply = call(
            &self.spec,
            json!({ "sentence": sentence }),
            ServiceError::AssetUnavailable,
        )
        .await?;
        Ok(reply.prompt)
    }
}

/// Research and narration writing.
///
/// Requests carry a `task` of `research` or `narration`; replies are
/// `{"text": ...}`.
#[derive(Debug, Clone)]
pub struct CommandWriter {
    spec: CommandSpec,
}

impl CommandWriter {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl ContentWriter for CommandWriter {
    async fn research(&self, topic: &str) -> Result<String, ServiceError> {
        let reply: TextReply = call(
            &self.spec,
            json!({ "task": "research", "topic": topic }),
            ServiceError::AssetUnavailable,
        )
        .await?;
        Ok(reply.text)
    }

    async fn write_narration(&self, request: &NarrationRequest<'_>) -> Result<String, ServiceError> {
        let reply: TextReply = call(
            &self.spec,
            json!({
                "task": "narration",
                "topic": request.topic,
                "research": request.research,
                "form_factor": request.form_factor.as_str(),
                "revision_notes": request.revision_notes,
            }),
            ServiceError::AssetUnavailable,
        )
        .await?;
        Ok(reply.text)
    }
}
