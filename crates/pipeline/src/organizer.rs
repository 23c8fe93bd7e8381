//! Artifact organizer.
//!
//! Owns the on-disk layout of production runs:
//!
//! ```text
//! <output_root>/<project>/<form_factor>/<run_timestamp>/
//!     audio/ images/ video_clips/ final_video/ metadata/ temp/
//! ```
//!
//! Run directories are claimed with an exclusive `create_dir`, so two runs
//! never share one. Promoted artifacts are write-once and fingerprinted
//! with SHA-256 as they land.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use storyreel_core::cost::CostLedger;
use storyreel_core::hashing::sha256_file;
use storyreel_core::job::FormFactor;
use storyreel_core::layout::{ArtifactRole, RunLayout};
use storyreel_core::metadata::{
    parse_run_metadata, render_summary, serialize_metadata, ArtifactRecord, RunMetadata,
};
use storyreel_core::naming;
use storyreel_core::types::Timestamp;

use crate::error::PipelineError;

/// Collision suffixes tried before giving up on a run timestamp.
const MAX_RUN_DIR_ATTEMPTS: u32 = 100;

// ---------------------------------------------------------------------------
// Production run
// ---------------------------------------------------------------------------

/// One open production run: its directory, its metadata document, and its
/// usage ledger. Only the task that opened it writes to it.
#[derive(Debug, Clone)]
pub struct ProductionRun {
    layout: RunLayout,
    pub metadata: RunMetadata,
    pub ledger: CostLedger,
}

impl ProductionRun {
    pub fn new(layout: RunLayout, metadata: RunMetadata) -> Self {
        Self {
            layout,
            metadata,
            ledger: CostLedger::default(),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }
}

/// One file found on disk under a run's role directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub role: ArtifactRole,
    pub filename: String,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Organizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArtifactOrganizer {
    output_root: PathBuf,
}

impl ArtifactOrganizer {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Claim a fresh run directory and create its role directories.
    ///
    /// A second run started within the same second gets a `_2`, `_3`, ...
    /// suffix instead of reusing the directory.
    pub async fn open_run(
        &self,
        project: &str,
        form_factor: FormFactor,
        at: Timestamp,
    ) -> Result<RunLayout, PipelineError> {
        let timestamp = naming::run_timestamp(at);
        let parent = storyreel_core::layout::form_factor_dir(&self.output_root, project, form_factor);
        tokio::fs::create_dir_all(&parent).await?;

        for attempt in 1..=MAX_RUN_DIR_ATTEMPTS {
            let dir_name = naming::run_dir_name(&timestamp, attempt);
            let layout = RunLayout::new(&self.output_root, project, form_factor, &dir_name);
            match tokio::fs::create_dir(layout.root()).await {
                Ok(()) => {
                    for dir in layout.all_dirs() {
                        tokio::fs::create_dir_all(&dir).await?;
                    }
                    tracing::info!(
                        project,
                        form_factor = %form_factor,
                        run_dir = %layout.root().display(),
                        "Production run directory created",
                    );
                    return Ok(layout);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(PipelineError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free run directory for timestamp {timestamp} under {}", parent.display()),
        )))
    }

    /// Move `source` into the run under `role` and record it.
    pub async fn promote(
        &self,
        run: &mut ProductionRun,
        role: ArtifactRole,
        scene_index: Option<usize>,
        source: &Path,
        filename: &str,
    ) -> Result<PathBuf, PipelineError> {
        let dest = self.claim_destination(run, role, filename).await?;
        if tokio::fs::rename(source, &dest).await.is_err() {
            // Cross-device moves fall back to copy + delete.
            tokio::fs::copy(source, &dest).await?;
            tokio::fs::remove_file(source).await?;
        }
        self.record(run, role, scene_index, dest).await
    }

    /// Copy `source` (usually an artifact of an earlier run) into the run
    /// under `role` and record it. The source is left untouched.
    pub async fn import(
        &self,
        run: &mut ProductionRun,
        role: ArtifactRole,
        scene_index: Option<usize>,
        source: &Path,
        filename: &str,
    ) -> Result<PathBuf, PipelineError> {
        let dest = self.claim_destination(run, role, filename).await?;
        tokio::fs::copy(source, &dest).await?;
        self.record(run, role, scene_index, dest).await
    }

    async fn claim_destination(
        &self,
        run: &ProductionRun,
        role: ArtifactRole,
        filename: &str,
    ) -> Result<PathBuf, PipelineError> {
        let dest = run.layout.artifact_path(role, filename);
        if tokio::fs::try_exists(&dest).await? {
            return Err(PipelineError::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists; artifacts are write-once", dest.display()),
            )));
        }
        Ok(dest)
    }

    async fn record(
        &self,
        run: &mut ProductionRun,
        role: ArtifactRole,
        scene_index: Option<usize>,
        dest: PathBuf,
    ) -> Result<PathBuf, PipelineError> {
        let (sha256, size_bytes) = sha256_file(&dest).await?;
        let filename = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = run
            .layout
            .relative(&dest)
            .unwrap_or_else(|| filename.clone());

        tracing::debug!(role = %role, path = %path, size_bytes, "Artifact promoted");
        run.metadata.artifacts.push(ArtifactRecord {
            role,
            scene_index,
            filename,
            path,
            size_bytes,
            sha256,
            created_at: Utc::now().to_rfc3339(),
        });
        Ok(dest)
    }

    /// Write `project_metadata.json`, replacing any earlier version atomically.
    pub async fn write_metadata(&self, run: &ProductionRun) -> Result<(), PipelineError> {
        let json = serialize_metadata(&run.metadata)?;
        let path = run.layout.metadata_path();
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    /// Write the human-readable `project_summary.txt`.
    pub async fn write_summary(&self, run: &ProductionRun) -> Result<(), PipelineError> {
        tokio::fs::write(run.layout.summary_path(), render_summary(&run.metadata)).await?;
        Ok(())
    }

    /// Read the metadata document of an existing run directory.
    pub async fn load_metadata(&self, run_dir: &Path) -> Result<RunMetadata, PipelineError> {
        let path = run_dir
            .join(ArtifactRole::Metadata.dir_name())
            .join(storyreel_core::layout::METADATA_FILENAME);
        let json = tokio::fs::read_to_string(&path).await?;
        Ok(parse_run_metadata(&json)?)
    }

    /// Best-effort removal of the run's `temp/` directory.
    pub async fn cleanup_temp(&self, layout: &RunLayout) {
        match tokio::fs::remove_dir_all(layout.temp_dir()).await {
            Ok(()) => tracing::debug!(run_dir = %layout.root().display(), "Temp artifacts removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                run_dir = %layout.root().display(),
                error = %e,
                "Failed to remove temp artifacts",
            ),
        }
    }

    /// Files currently present under each role directory, sorted by name.
    pub async fn inventory(&self, layout: &RunLayout) -> Result<Vec<InventoryEntry>, PipelineError> {
        let mut entries = Vec::new();
        for role in ArtifactRole::ALL {
            let dir = layout.role_dir(role);
            let mut read = match tokio::fs::read_dir(&dir).await {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let mut files = Vec::new();
            while let Some(entry) = read.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_file() {
                    files.push(InventoryEntry {
                        role,
                        filename: entry.file_name().to_string_lossy().into_owned(),
                        size_bytes: meta.len(),
                    });
                }
            }
            files.sort_by(|a, b| a.filename.cmp(&b.filename));
            entries.extend(files);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    async fn open(organizer: &ArtifactOrganizer) -> ProductionRun {
        let layout = organizer
            .open_run("deep_sea_vents", FormFactor::LongForm, at())
            .await
            .unwrap();
        let metadata = RunMetadata::begin(&layout, 1, 2, 1, "Deep sea vents", at().to_rfc3339());
        ProductionRun::new(layout, metadata)
    }

    #[tokio::test]
    async fn open_run_creates_every_role_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let organizer = ArtifactOrganizer::new(tmp.path());
        let run = open(&organizer).await;
        assert!(run.layout().root().ends_with("deep_sea_vents/long_form/20240309_140507"));
        for dir in run.layout().all_dirs() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }

    #[tokio::test]
    async fn promote_moves_and_fingerprints() {
        let tmp = tempfile::tempdir().unwrap();
        let organizer = ArtifactOrganizer::new(tmp.path());
        let mut run = open(&organizer).await;

        let source = run.layout().temp_path("scene_01_hello.wav");
        tokio::fs::write(&source, b"abc").await.unwrap();
        let dest = organizer
            .promote(&mut run, ArtifactRole::Audio, Some(0), &source, "scene_01_hello.wav")
            .await
            .unwrap();

        assert!(!source.exists());
        assert!(dest.exists());
        let record = &run.metadata.artifacts[0];
        assert_eq!(record.path, "audio/scene_01_hello.wav");
        assert_eq!(record.size_bytes, 3);
        assert_eq!(
            record.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn promote_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let organizer = ArtifactOrganizer::new(tmp.path());
        let mut run = open(&organizer).await;

        let first = run.layout().temp_path("first.wav");
        tokio::fs::write(&first, b"a").await.unwrap();
        organizer
            .promote(&mut run, ArtifactRole::Audio, None, &first, "a.wav")
            .await
            .unwrap();

        let second = run.layout().temp_path("second.wav");
        tokio::fs::write(&second, b"b").await.unwrap();
        let result = organizer
            .promote(&mut run, ArtifactRole::Audio, None, &second, "a.wav")
            .await;
        assert!(result.is_err());
        assert!(second.exists());
        assert_eq!(run.metadata.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn metadata_round_trips_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let organizer = ArtifactOrganizer::new(tmp.path());
        let run = open(&organizer).await;
        organizer.write_metadata(&run).await.unwrap();
        organizer.write_summary(&run).await.unwrap();

        let loaded = organizer.load_metadata(run.layout().root()).await.unwrap();
        assert_eq!(loaded, run.metadata);
        assert!(run.layout().summary_path().exists());
    }

    #[tokio::test]
    async fn cleanup_and_inventory() {
        let tmp = tempfile::tempdir().unwrap();
        let organizer = ArtifactOrganizer::new(tmp.path());
        let mut run = open(&organizer).await;
        let source = run.layout().temp_path("x.png");
        tokio::fs::write(&source, b"png").await.unwrap();
        organizer
            .promote(&mut run, ArtifactRole::Image, Some(0), &source, "scene_01_x.png")
            .await
            .unwrap();

        organizer.cleanup_temp(run.layout()).await;
        assert!(!run.layout().temp_dir().exists());
        // A second cleanup is a no-op.
        organizer.cleanup_temp(run.layout()).await;

        let inventory = organizer.inventory(run.layout()).await.unwrap();
        assert_eq!(
            inventory,
            vec![InventoryEntry {
                role: ArtifactRole::Image,
                filename: "scene_01_x.png".into(),
                size_bytes: 3,
            }]
        );
    }
}
