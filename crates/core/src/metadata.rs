//! Run metadata schema, serialization helpers, and the human-readable summary.
//!
//! Every production run writes `metadata/project_metadata.json` (the audit
//! record consumed by external reporting) and `metadata/project_summary.txt`.
//! Dropped and degraded scenes are always listed, even for successful runs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cost::CostSummary;
use crate::error::CoreError;
use crate::job::FormFactor;
use crate::layout::{ArtifactRole, RunLayout, TEMP_DIR};
use crate::outcome::{OutcomeTally, SceneOutcome};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current schema version for run metadata files.
pub const RUN_SCHEMA_VERSION: &str = "1.0";

/// File type identifier for run metadata.
pub const FILE_TYPE_RUN: &str = "production_run";

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Status of a production run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!("Unknown run status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Run metadata schema
// ---------------------------------------------------------------------------

/// Top-level structure for `project_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub schema_version: String,
    pub file_type: String,
    pub job_id: DbId,
    pub script_id: DbId,
    pub script_revision: i32,
    pub project_name: String,
    pub topic: String,
    pub form_factor: FormFactor,
    pub run_timestamp: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Full/degraded/dropped counts.
    pub counts: OutcomeTally,

    /// Sum of surviving scene durations, in microseconds.
    pub total_duration_us: u64,

    /// One entry per scene cue, in order, including dropped scenes.
    pub scenes: Vec<SceneRecord>,

    /// Every promoted artifact.
    pub artifacts: Vec<ArtifactRecord>,

    /// Role name to directory, relative to the run root.
    pub project_structure: BTreeMap<String, String>,

    pub costs: CostSummary,

    /// Run timestamp whose scene artifacts were reused, for re-assembly runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reused_from: Option<String>,

    /// ISO 8601 timestamp of when the run started.
    pub created_at: String,

    /// ISO 8601 timestamp of when the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

/// Per-scene audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneRecord {
    pub index: usize,
    /// Sentence text; `None` for pause scenes.
    pub text: Option<String>,
    pub outcome: SceneOutcome,
    /// Measured narration duration, in microseconds.
    pub duration_us: Option<u64>,
    /// Relative artifact paths keyed by role.
    pub audio: Option<String>,
    pub image: Option<String>,
    pub clip: Option<String>,
    /// Placeholder kind used for degraded scenes (`color:black`, `previous_frame`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Last error for degraded or dropped scenes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One promoted file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    pub role: ArtifactRole,
    pub scene_index: Option<usize>,
    pub filename: String,
    /// Path relative to the run root.
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: String,
}

impl RunMetadata {
    /// Start a metadata record for a freshly opened run.
    pub fn begin(
        layout: &RunLayout,
        job_id: DbId,
        script_id: DbId,
        script_revision: i32,
        topic: &str,
        created_at: String,
    ) -> Self {
        Self {
            schema_version: RUN_SCHEMA_VERSION.to_string(),
            file_type: FILE_TYPE_RUN.to_string(),
            job_id,
            script_id,
            script_revision,
            project_name: layout.project().to_string(),
            topic: topic.to_string(),
            form_factor: layout.form_factor(),
            run_timestamp: layout.run_timestamp().to_string(),
            status: RunStatus::Running,
            failure_reason: None,
            counts: OutcomeTally::default(),
            total_duration_us: 0,
            scenes: Vec::new(),
            artifacts: Vec::new(),
            project_structure: project_structure(),
            costs: CostSummary::default(),
            reused_from: None,
            created_at,
            finished_at: None,
        }
    }

    /// Artifacts recorded for one scene.
    pub fn scene_artifacts(&self, index: usize) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts
            .iter()
            .filter(move |a| a.scene_index == Some(index))
    }

    /// Total bytes across all recorded artifacts.
    pub fn total_size_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }
}

/// Role directory names relative to the run root.
pub fn project_structure() -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = ArtifactRole::ALL
        .into_iter()
        .map(|role| (role.as_str().to_string(), role.dir_name().to_string()))
        .collect();
    map.insert(TEMP_DIR.to_string(), TEMP_DIR.to_string());
    map
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize any metadata struct to pretty-printed JSON (2-space indent).
pub fn serialize_metadata<T: Serialize>(metadata: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(metadata)
}

/// Parse a `project_metadata.json` document.
pub fn parse_run_metadata(json: &str) -> Result<RunMetadata, CoreError> {
    let meta: RunMetadata = serde_json::from_str(json)
        .map_err(|e| CoreError::Validation(format!("Invalid run metadata: {e}")))?;
    if meta.schema_version != RUN_SCHEMA_VERSION {
        return Err(CoreError::Validation(format!(
            "Unsupported run metadata schema version '{}'",
            meta.schema_version
        )));
    }
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Format a byte count as `512 B`, `1.5 KB`, `3.2 MB`, ...
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Render `project_summary.txt`.
pub fn render_summary(meta: &RunMetadata) -> String {
    let mut out = String::new();
    let secs = meta.total_duration_us as f64 / 1_000_000.0;

    let _ = writeln!(out, "Project: {}", meta.project_name);
    let _ = writeln!(out, "Topic: {}", meta.topic);
    let _ = writeln!(out, "Form factor: {}", meta.form_factor);
    let _ = writeln!(out, "Run: {}", meta.run_timestamp);
    let _ = writeln!(out, "Status: {}", meta.status.as_str());
    if let Some(reason) = &meta.failure_reason {
        let _ = writeln!(out, "Failure: {reason}");
    }
    if let Some(from) = &meta.reused_from {
        let _ = writeln!(out, "Scenes reused from run: {from}");
    }
    let _ = writeln!(
        out,
        "Scenes: {} total, {} full, {} degraded, {} dropped",
        meta.counts.total(),
        meta.counts.full,
        meta.counts.degraded,
        meta.counts.dropped
    );
    let _ = writeln!(out, "Duration: {secs:.3}s");
    let _ = writeln!(out, "Estimated cost: {:.4}", meta.costs.total);

    let flagged: Vec<&SceneRecord> = meta
        .scenes
        .iter()
        .filter(|s| s.outcome != SceneOutcome::Full)
        .collect();
    if !flagged.is_empty() {
        let _ = writeln!(out, "\nDegraded / dropped scenes:");
        for scene in flagged {
            let _ = writeln!(
                out,
                "  scene {:02} [{}] {}",
                scene.index + 1,
                scene.outcome.as_str(),
                scene.error.as_deref().unwrap_or("-")
            );
        }
    }

    let _ = writeln!(
        out,
        "\nFiles ({}, {}):",
        meta.artifacts.len(),
        format_size(meta.total_size_bytes())
    );
    for role in ArtifactRole::ALL {
        let files: Vec<&ArtifactRecord> =
            meta.artifacts.iter().filter(|a| a.role == role).collect();
        if files.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  {}/", role.dir_name());
        for file in files {
            let _ = writeln!(
                out,
                "    {} ({})",
                file.filename,
                format_size(file.size_bytes)
            );
        }
    }
    out
}
