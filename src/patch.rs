//! Adapter around the external fuzzy patch applicator.
//!
//! The adapter is a thin transaction: it feeds an emitted unified diff to the
//! tool at one fuzz level, lets it apply every hunk it can, and turns the
//! `.rej` sidecars the tool leaves behind into typed [`Reject`] values with a
//! best-guess target region in the destination file. Escalating through the
//! fuzz ladder is the pipeline's job; each level runs against a tree the
//! pipeline has restored to pristine.

use std::{fs, path::Path, process::Command, time::Duration};

use similar::{Algorithm, TextDiff};

use crate::{
    config::PatchConfig,
    diff::{CommitDiff, DiffHunk},
    errors::PickError,
    utils::{CancelFlag, CommandOutput, run_with_input},
};

/// A hunk the patch tool could not place.
///
/// Consumed at most once by the repair engine.
#[derive(Debug, Clone)]
pub struct Reject {
    /// Destination path of the file the hunk belongs to.
    pub path: String,
    pub hunk: DiffHunk,
    /// Best-guess target region in the destination file, 1-based inclusive.
    pub target_start: usize,
    pub target_end: usize,
    /// Similarity of the guessed region to the hunk's old side, 0.0..=1.0.
    pub similarity: f32,
}

/// Outcome of one patch-tool invocation at a single fuzz level.
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub fuzz: u32,
    pub fully_applied: bool,
    pub applied_hunks: usize,
    pub rejects: Vec<Reject>,
    pub output: CommandOutput,
}

/// Shell around the external `patch` binary.
pub struct PatchTool {
    config: PatchConfig,
    timeout: Duration,
    cancel: CancelFlag,
}

impl PatchTool {
    pub fn new(
        config: PatchConfig,
        timeout: Duration,
        cancel: CancelFlag,
    ) -> Result<Self, PickError> {
        config.validate()?;
        Ok(Self {
            config,
            timeout,
            cancel,
        })
    }

    pub fn fuzz_ladder(&self) -> &[u32] {
        &self.config.fuzz_ladder
    }

    /// Apply `diff` inside `workdir` at the given fuzz level.
    ///
    /// Exit status 2 from the tool means the diff itself is unusable and maps
    /// to [`PickError::PatchUnresolvable`]; status 1 means some hunks were
    /// rejected, which is data for the caller, not an error.
    pub fn apply(
        &self,
        diff: &CommitDiff,
        workdir: &Path,
        fuzz: u32,
    ) -> Result<PatchResult, PickError> {
        let targets: Vec<String> = diff
            .files
            .iter()
            .filter(|f| !f.hunks.is_empty())
            .map(|f| f.path().to_string())
            .collect();
        for path in &targets {
            // Stale sidecars from an earlier attempt would be misread as
            // fresh rejects.
            let _ = fs::remove_file(workdir.join(format!("{path}.rej")));
        }

        let mut command = Command::new(&self.config.program);
        command
            .current_dir(workdir)
            .arg(format!("-p{}", self.config.strip))
            .arg(format!("--fuzz={fuzz}"))
            .arg("--force")
            .arg("--no-backup-if-mismatch")
            .arg("--reject-format=unified");

        let output = run_with_input(
            command,
            Some(diff.emit().into_bytes()),
            self.timeout,
            &self.cancel,
        )?;
        tracing::debug!(
            "{} exited {} at fuzz={fuzz}",
            self.config.program,
            output.status
        );

        if output.status > 1 || output.status < 0 {
            return Err(PickError::PatchUnresolvable(format!(
                "{} exited {}: {}",
                self.config.program,
                output.status,
                output.stderr.trim_end()
            )));
        }

        let mut rejects = Vec::new();
        for path in &targets {
            let reject_file = workdir.join(format!("{path}.rej"));
            if !reject_file.exists() {
                continue;
            }
            let reject_text = fs::read_to_string(&reject_file)?;
            fs::remove_file(&reject_file)?;
            rejects.extend(parse_rejects(path, &reject_text, workdir)?);
        }

        let total = diff.total_hunks();
        Ok(PatchResult {
            fuzz,
            fully_applied: rejects.is_empty() && output.success(),
            applied_hunks: total - rejects.len().min(total),
            rejects,
            output,
        })
    }
}

/// Parse a `.rej` sidecar (unified format) into [`Reject`]s, locating each
/// hunk's most plausible region in the current destination file.
fn parse_rejects(path: &str, reject_text: &str, workdir: &Path) -> Result<Vec<Reject>, PickError> {
    let parsed = CommitDiff::parse(reject_text)?;
    let dest_text = fs::read_to_string(workdir.join(path)).unwrap_or_default();
    let dest_lines: Vec<&str> = dest_text.lines().collect();

    let mut rejects = Vec::new();
    for file in parsed.files {
        for hunk in file.hunks {
            let (target_start, target_end, similarity) = locate_target(&dest_lines, &hunk);
            tracing::debug!(
                "reject in {path} @@ -{},{} guessed at {target_start}..{target_end} \
                 (similarity {similarity:.2})",
                hunk.old_start,
                hunk.old_count,
            );
            rejects.push(Reject {
                path: path.to_string(),
                hunk,
                target_start,
                target_end,
                similarity,
            });
        }
    }
    // File order is the caller's; within a file, ascending old_start.
    rejects.sort_by_key(|r| r.hunk.old_start);
    Ok(rejects)
}

/// Slide the hunk's old side over the destination and keep the closest
/// window. Pure-addition hunks anchor at their declared position.
fn locate_target(dest_lines: &[&str], hunk: &DiffHunk) -> (usize, usize, f32) {
    let needle = hunk.old_lines();
    if needle.is_empty() {
        let start = hunk.old_start.max(1).min(dest_lines.len().max(1));
        return (start, start, 1.0);
    }
    if dest_lines.is_empty() {
        return (1, 1, 0.0);
    }

    let span = needle.len().min(dest_lines.len());
    let mut best_start = 0usize;
    let mut best_ratio = -1.0f32;
    for start in 0..=dest_lines.len() - span {
        let window = &dest_lines[start..start + span];
        let ratio = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_slices(&needle, window)
            .ratio();
        if ratio > best_ratio {
            best_ratio = ratio;
            best_start = start;
        }
        if (best_ratio - 1.0).abs() < f32::EPSILON {
            break;
        }
    }

    (best_start + 1, best_start + span, best_ratio)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::diff::DiffLine;

    fn hunk(lines: Vec<DiffLine>) -> DiffHunk {
        let old_count = lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Context(_) | DiffLine::Removed(_)))
            .count();
        let new_count = lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Context(_) | DiffLine::Added(_)))
            .count();
        DiffHunk {
            old_start: 1,
            old_count,
            new_start: 1,
            new_count,
            header_context: String::new(),
            lines,
        }
    }

    #[test]
    fn locates_an_exact_region() {
        let dest = vec!["a", "b", "c", "d", "e"];
        let h = hunk(vec![
            DiffLine::Context("c".into()),
            DiffLine::Removed("d".into()),
            DiffLine::Added("D".into()),
        ]);
        let (start, end, similarity) = locate_target(&dest, &h);
        assert_eq!((start, end), (3, 4));
        assert!(similarity > 0.99);
    }

    #[test]
    fn locates_a_drifted_region() {
        let dest = vec!["x", "y", "helper_v2()", "body", "tail"];
        let h = hunk(vec![
            DiffLine::Context("helper()".into()),
            DiffLine::Removed("body".into()),
        ]);
        let (start, end, similarity) = locate_target(&dest, &h);
        assert_eq!((start, end), (3, 4));
        assert!(similarity > 0.3 && similarity < 1.0);
    }

    #[test]
    fn missing_deletion_scores_low() {
        let dest = vec!["entirely", "unrelated", "content"];
        let h = hunk(vec![
            DiffLine::Removed("delete me".into()),
            DiffLine::Removed("and me".into()),
        ]);
        let (_, _, similarity) = locate_target(&dest, &h);
        assert!(similarity < 0.5);
    }

    #[test]
    fn parses_reject_sidecar_text() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("foo.c"), "one\ntwo\nthree\n").unwrap();
        let text = "\
--- foo.c
+++ foo.c
@@ -2,2 +2,2 @@
 two
-old three
+new three
";
        let rejects = parse_rejects("foo.c", text, tmp.path()).unwrap();
        assert_eq!(rejects.len(), 1);
        assert_eq!(rejects[0].path, "foo.c");
        assert_eq!(rejects[0].target_start, 2);
        assert_eq!(rejects[0].target_end, 3);
    }

    fn patch_available() -> bool {
        Command::new("patch")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn applies_a_clean_diff_on_disk() {
        if !patch_available() {
            eprintln!("patch binary not found, skipping");
            return;
        }
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let diff = CommitDiff::parse(
            "\
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,3 @@
 one
-two
+TWO
 three
",
        )
        .unwrap();

        let tool = PatchTool::new(
            PatchConfig::default(),
            Duration::from_secs(30),
            CancelFlag::new(),
        )
        .unwrap();
        let result = tool.apply(&diff, tmp.path(), 0).unwrap();
        assert!(result.fully_applied);
        assert!(result.rejects.is_empty());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "one\nTWO\nthree\n"
        );
    }

    #[test]
    fn reports_rejected_hunks_as_data() {
        if !patch_available() {
            eprintln!("patch binary not found, skipping");
            return;
        }
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "completely\ndifferent\nfile\n").unwrap();
        let diff = CommitDiff::parse(
            "\
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,3 @@
 one
-two
+TWO
 three
",
        )
        .unwrap();

        let tool = PatchTool::new(
            PatchConfig::default(),
            Duration::from_secs(30),
            CancelFlag::new(),
        )
        .unwrap();
        let result = tool.apply(&diff, tmp.path(), 0).unwrap();
        assert!(!result.fully_applied);
        assert_eq!(result.rejects.len(), 1);
        // The sidecar is consumed, not left behind.
        assert!(!tmp.path().join("f.txt.rej").exists());
    }
}
