//! Error types for the cherry-pick pipeline.
//!
//! This module defines a unified error enumeration used across the pick state
//! machine, the diff model, the subprocess adapters, and the LLM repair path.
//! It integrates with `thiserror` to provide rich `Display` implementations
//! and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - The first two variants are stage-transition signals consumed inside the
//!   pipeline and are never surfaced to callers on their own.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the pick pipeline.
///
/// - One variant per terminal outcome of the pick state machine, plus
///   I/O and subprocess wrappers.
/// - Implements `std::error::Error` via `thiserror`.
pub enum PickError {
    /// Native cherry-pick conflicted. Internal: drives the patch stage.
    #[error("native cherry-pick of `{0}` did not apply cleanly")]
    CleanCherryPickFailed(String),

    /// Patch stage left at least one reject. Internal: drives the LLM stage.
    #[error("patch tool left {0} hunk(s) rejected")]
    PatchRejected(usize),

    /// Patch stage failed structurally (malformed diff, unlocatable deletion).
    #[error("patch stage is unresolvable: {0}")]
    PatchUnresolvable(String),

    /// The commit conflicts on a binary file; binary hunks are never repaired.
    #[error("commit `{0}` conflicts on a binary file")]
    BinaryConflict(String),

    /// LLM transport failed after bounded retries.
    #[error("LLM transport unavailable after {attempts} attempt(s): {reason}")]
    LlmUnavailable { attempts: u32, reason: String },

    /// Model response was missing a heading, a code block, or was malformed.
    #[error("LLM response could not be parsed: {0}")]
    LlmParseFailed(String),

    /// Model emitted the configured refusal phrase.
    #[error("LLM declined to repair the hunk")]
    LlmRefused,

    /// Validation command exited non-zero; the pick was rolled back.
    #[error("validation command `{command}` exited with status {status}")]
    ValidationFailed {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },

    /// Recursive dependency picks exceeded the configured depth.
    #[error("dependency picks exceeded the depth limit of {0}")]
    DependencyLimit(u32),

    /// Cooperative cancellation; the working tree was rolled back.
    #[error("pick was cancelled")]
    Cancelled,

    /// The pick refused to start on a dirty tree.
    #[error("working tree is not clean; refusing to pick")]
    WorkingTreeDirty,

    /// The commit's diff is empty after path rewriting.
    #[error("diff of `{0}` is empty after path rewriting")]
    EmptyDiff(String),

    /// Rollback itself failed; the working tree may be inconsistent.
    #[error("rollback failed, working tree may be inconsistent: {0}")]
    RollbackFailed(String),

    /// Unified diff text the parser does not accept.
    #[error("malformed unified diff: {0}")]
    MalformedDiff(String),

    /// A git subprocess exited non-zero outside an expected conflict.
    #[error("`git {command}` failed with status {status}: {stderr}")]
    Git {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A subprocess exceeded its per-operation timeout and was killed.
    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Invalid configuration (e.g. an unsorted or empty fuzz ladder).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from the working tree or the cache file.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl PickError {
    /// Process exit code for the CLI, per the pipeline's exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            PickError::PatchRejected(_)
            | PickError::PatchUnresolvable(_)
            | PickError::BinaryConflict(_) => 2,
            PickError::LlmUnavailable { .. }
            | PickError::LlmParseFailed(_)
            | PickError::LlmRefused => 3,
            PickError::ValidationFailed { .. } => 4,
            PickError::RollbackFailed(_) => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(PickError::PatchRejected(1).exit_code(), 2);
        assert_eq!(PickError::LlmRefused.exit_code(), 3);
        assert_eq!(
            PickError::ValidationFailed {
                command: "make".into(),
                status: 2,
                stdout: String::new(),
                stderr: String::new(),
            }
            .exit_code(),
            4
        );
        assert_eq!(PickError::RollbackFailed("reset".into()).exit_code(), 5);
        assert_eq!(PickError::WorkingTreeDirty.exit_code(), 1);
    }
}
