//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that accept
//! `&SqlitePool` as the first argument. Versioned updates take a
//! `&mut SqliteConnection` so they can run inside a caller's transaction.

pub mod feedback_repo;
pub mod job_repo;
pub mod production_run_repo;
pub mod script_repo;

pub use feedback_repo::FeedbackRepo;
pub use job_repo::JobRepo;
pub use production_run_repo::ProductionRunRepo;
pub use script_repo::ScriptRepo;
