//! Path rewriting for cross-codebase picks.
//!
//! Rewrites `old_path`/`new_path` on every [`FileChange`] together with the
//! paths embedded in `diff --git`, `---`/`+++`, and rename/copy header lines,
//! so the emitted diff references only destination-codebase names. File
//! contents are never touched.

use crate::diff::{CommitDiff, FileChange};

/// Ordered `(old_prefix, new_prefix)` rules; the first matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct PathRewriter {
    rules: Vec<(String, String)>,
}

impl PathRewriter {
    pub fn new(rules: Vec<(String, String)>) -> Self {
        Self { rules }
    }

    /// With no rules configured the rewriter is the identity.
    pub fn is_identity(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite a single path. Returns the input unchanged when no rule
    /// matches.
    pub fn rewrite_path(&self, path: &str) -> String {
        for (old_prefix, new_prefix) in &self.rules {
            if let Some(rest) = path.strip_prefix(old_prefix.as_str()) {
                return format!("{new_prefix}{rest}");
            }
        }
        path.to_string()
    }

    /// Rewrite every path referenced by the diff, in place.
    pub fn rewrite(&self, diff: &mut CommitDiff) {
        if self.is_identity() {
            return;
        }
        for file in &mut diff.files {
            self.rewrite_file(file);
        }
    }

    fn rewrite_file(&self, file: &mut FileChange) {
        file.old_path = file.old_path.as_deref().map(|p| self.rewrite_path(p));
        file.new_path = file.new_path.as_deref().map(|p| self.rewrite_path(p));

        for line in &mut file.header_lines {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                if let Some(rewritten) = self.rewrite_git_line(rest) {
                    *line = format!("diff --git {rewritten}");
                }
            } else if let Some(rest) = line.strip_prefix("--- a/") {
                *line = format!("--- a/{}", self.rewrite_path(rest));
            } else if let Some(rest) = line.strip_prefix("+++ b/") {
                *line = format!("+++ b/{}", self.rewrite_path(rest));
            } else if let Some(rest) = line.strip_prefix("rename from ") {
                *line = format!("rename from {}", self.rewrite_path(rest));
            } else if let Some(rest) = line.strip_prefix("rename to ") {
                *line = format!("rename to {}", self.rewrite_path(rest));
            } else if let Some(rest) = line.strip_prefix("copy from ") {
                *line = format!("copy from {}", self.rewrite_path(rest));
            } else if let Some(rest) = line.strip_prefix("copy to ") {
                *line = format!("copy to {}", self.rewrite_path(rest));
            }
        }
    }

    fn rewrite_git_line(&self, rest: &str) -> Option<String> {
        let split_at = rest.rfind(" b/")?;
        let a_side = rest[..split_at].strip_prefix("a/")?;
        let b_side = &rest[split_at + 3..];
        Some(format!(
            "a/{} b/{}",
            self.rewrite_path(a_side),
            self.rewrite_path(b_side)
        ))
    }
}
