pub mod assembly;
pub mod cost;
pub mod error;
pub mod feedback;
pub mod ffmpeg;
pub mod hashing;
pub mod job;
pub mod layout;
pub mod lifecycle;
pub mod metadata;
pub mod naming;
pub mod outcome;
pub mod segmentation;
pub mod store;
pub mod types;
