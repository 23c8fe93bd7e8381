//! Row structs and their conversions into core records.
//!
//! Each submodule contains a `FromRow` struct matching the table row and a
//! `TryFrom` into the corresponding `storyreel_core` record, which parses the
//! TEXT status columns.

pub mod feedback;
pub mod job;
pub mod production_run;
pub mod script;
