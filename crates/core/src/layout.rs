//! Run directory layout.
//!
//! ```text
//! <output_root>/<project>/<form_factor>/<run_timestamp>/
//!     images/  audio/  video_clips/  final_video/  metadata/  temp/
//! ```
//!
//! The role directory names are part of the on-disk contract consumed by
//! external tooling.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::FormFactor;

/// Scratch directory inside a run, cleared after a successful run.
pub const TEMP_DIR: &str = "temp";

/// Machine-readable run record inside `metadata/`.
pub const METADATA_FILENAME: &str = "project_metadata.json";

/// Human-readable run summary inside `metadata/`.
pub const SUMMARY_FILENAME: &str = "project_summary.txt";

/// Logical role of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Audio,
    Image,
    Clip,
    Final,
    Metadata,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 5] = [
        Self::Image,
        Self::Audio,
        Self::Clip,
        Self::Final,
        Self::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Clip => "clip",
            Self::Final => "final",
            Self::Metadata => "metadata",
        }
    }

    /// Directory name under the run root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "images",
            Self::Clip => "video_clips",
            Self::Final => "final_video",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown artifact role '{s}'")))
    }
}

/// Directory that holds every run of one project's form factor.
pub fn form_factor_dir(output_root: &Path, project: &str, form_factor: FormFactor) -> PathBuf {
    output_root.join(project).join(form_factor.as_str())
}

/// Resolved paths of one production run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
    project: String,
    form_factor: FormFactor,
    run_timestamp: String,
}

impl RunLayout {
    /// `run_dir_name` is the claimed directory name (timestamp plus optional
    /// collision suffix).
    pub fn new(
        output_root: &Path,
        project: &str,
        form_factor: FormFactor,
        run_dir_name: &str,
    ) -> Self {
        Self {
            root: form_factor_dir(output_root, project, form_factor).join(run_dir_name),
            project: project.to_string(),
            form_factor,
            run_timestamp: run_dir_name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn form_factor(&self) -> FormFactor {
        self.form_factor
    }

    pub fn run_timestamp(&self) -> &str {
        &self.run_timestamp
    }

    pub fn role_dir(&self, role: ArtifactRole) -> PathBuf {
        self.root.join(role.dir_name())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn artifact_path(&self, role: ArtifactRole, filename: &str) -> PathBuf {
        self.role_dir(role).join(filename)
    }

    pub fn temp_path(&self, filename: &str) -> PathBuf {
        self.temp_dir().join(filename)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.artifact_path(ArtifactRole::Metadata, METADATA_FILENAME)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.artifact_path(ArtifactRole::Metadata, SUMMARY_FILENAME)
    }

    /// Every directory a run owns, role directories first.
    pub fn all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = ArtifactRole::ALL
            .into_iter()
            .map(|role| self.role_dir(role))
            .collect();
        dirs.push(self.temp_dir());
        dirs
    }

    /// `path` relative to the run root, `/`-separated.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RunLayout {
        RunLayout::new(
            Path::new("output"),
            "deep_sea_vents",
            FormFactor::LongForm,
            "20240309_140507",
        )
    }

    #[test]
    fn run_root_shape() {
        assert_eq!(
            layout().root(),
            Path::new("output/deep_sea_vents/long_form/20240309_140507")
        );
    }

    #[test]
    fn role_directories() {
        let l = layout();
        assert!(l.role_dir(ArtifactRole::Image).ends_with("images"));
        assert!(l.role_dir(ArtifactRole::Clip).ends_with("video_clips"));
        assert!(l.role_dir(ArtifactRole::Final).ends_with("final_video"));
        assert!(l.metadata_path().ends_with("metadata/project_metadata.json"));
        assert!(l.summary_path().ends_with("metadata/project_summary.txt"));
    }

    #[test]
    fn all_dirs_includes_temp() {
        let dirs = layout().all_dirs();
        assert_eq!(dirs.len(), 6);
        assert!(dirs.last().unwrap().ends_with("temp"));
    }

    #[test]
    fn relative_paths() {
        let l = layout();
        let p = l.artifact_path(ArtifactRole::Audio, "scene_01_hello.wav");
        assert_eq!(l.relative(&p).as_deref(), Some("audio/scene_01_hello.wav"));
        assert_eq!(l.relative(Path::new("/elsewhere/file")), None);
    }

    #[test]
    fn role_names_round_trip() {
        for role in ArtifactRole::ALL {
            assert_eq!(role.as_str().parse::<ArtifactRole>().unwrap(), role);
        }
    }
}
