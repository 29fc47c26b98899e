//! This crate is a thin wrapper around the various crates needed for
//! observability instrumentation, ensuring that the same versions
//! are used across all other crates in this workspace.

pub use tracing;
