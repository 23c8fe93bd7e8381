//! Production engine: scene synchronization, assembly, artifact
//! organization, and the job lifecycle controller that drives them.

pub mod assembly;
pub mod command;
pub mod error;
pub mod feedback;
pub mod lifecycle;
pub mod organizer;
pub mod providers;
pub mod retry;
pub mod runner;
pub mod studio;
pub mod synchronizer;
pub mod toolchain;

pub use assembly::{AssemblyConfig, AssemblyEngine};
pub use error::{PipelineError, ServiceError};
pub use lifecycle::Lifecycle;
pub use organizer::{ArtifactOrganizer, ProductionRun};
pub use runner::ProductionRunner;
pub use studio::Studio;
pub use synchronizer::{SceneSynchronizer, SyncConfig, SyncReport};
