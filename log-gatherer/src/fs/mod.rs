//! Local filesystem helpers for the collected-log tree.

pub mod walker;

pub use walker::{walk_collected, CollectedFile, TRANSFER_SCRATCH_DIR};
