//! Subprocess adapter around the `git` binary.
//!
//! Every external call returns a small tagged record carrying exit status and
//! captured streams instead of stringly-typed flow; conflicts are data, not
//! errors, because the pipeline treats them as a stage transition.

use std::{
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use crate::{
    errors::PickError,
    utils::{CancelFlag, CommandOutput, run_with_input, run_with_timeout},
};

/// Identity and message of one commit as loaded from the repository.
///
/// Immutable once loaded; the pipeline only ever appends annotations to a
/// copy of `message` when reconstructing the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full hex object id.
    pub id: String,
    /// `Name <email>` of the author.
    pub author: String,
    /// Raw commit message, verbatim.
    pub message: String,
    /// Parent ids, in order.
    pub parents: Vec<String>,
}

impl CommitInfo {
    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Outcome of one `git cherry-pick` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickStatus {
    Applied,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct CherryPickResult {
    pub status: CherryPickStatus,
    pub output: CommandOutput,
}

/// Shell around the `git` binary rooted at one working tree.
pub struct GitBackend {
    repo_dir: PathBuf,
    timeout: Duration,
    cancel: CancelFlag,
}

impl GitBackend {
    pub fn new(repo_dir: impl Into<PathBuf>, timeout: Duration, cancel: CancelFlag) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout,
            cancel,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.repo_dir
    }

    /// A clone of this backend that ignores the cancellation flag.
    ///
    /// Rollback must still be able to restore the tree after a cancel; with
    /// the shared flag set, every ordinary call would refuse to start.
    pub fn ignoring_cancel(&self) -> GitBackend {
        GitBackend {
            repo_dir: self.repo_dir.clone(),
            timeout: self.timeout,
            cancel: CancelFlag::new(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_dir).args(args);
        cmd
    }

    /// Run git and return the captured output regardless of exit status.
    fn git(&self, args: &[&str]) -> Result<CommandOutput, PickError> {
        run_with_timeout(self.command(args), self.timeout, &self.cancel)
    }

    /// Run git and fail on a non-zero exit.
    fn git_ok(&self, args: &[&str]) -> Result<CommandOutput, PickError> {
        let out = self.git(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(PickError::Git {
                command: args.join(" "),
                status: out.status,
                stderr: out.stderr.trim_end().to_string(),
            })
        }
    }

    fn git_with_input(&self, args: &[&str], input: &str) -> Result<CommandOutput, PickError> {
        let out = run_with_input(
            self.command(args),
            Some(input.as_bytes().to_vec()),
            self.timeout,
            &self.cancel,
        )?;
        if out.success() {
            Ok(out)
        } else {
            Err(PickError::Git {
                command: args.join(" "),
                status: out.status,
                stderr: out.stderr.trim_end().to_string(),
            })
        }
    }

    /// True when `git status --porcelain` reports nothing.
    pub fn is_clean(&self) -> Result<bool, PickError> {
        let out = self.git_ok(&["status", "--porcelain"])?;
        Ok(out.stdout.trim().is_empty())
    }

    pub fn current_head(&self) -> Result<String, PickError> {
        let out = self.git_ok(&["rev-parse", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    /// Resolve any commit-ish to a full object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, PickError> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.git_ok(&["rev-parse", "--verify", &spec])?;
        Ok(out.stdout.trim().to_string())
    }

    /// Load id, author, parents, and verbatim message of a commit.
    pub fn commit_info(&self, rev: &str) -> Result<CommitInfo, PickError> {
        let out = self.git_ok(&[
            "show",
            "--no-patch",
            "--format=%H%x00%an <%ae>%x00%P%x00%B",
            rev,
        ])?;
        let mut parts = out.stdout.splitn(4, '\0');
        let id = parts.next().unwrap_or_default().trim().to_string();
        let author = parts.next().unwrap_or_default().to_string();
        let parents: Vec<String> = parts
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let message = parts
            .next()
            .ok_or_else(|| PickError::Git {
                command: format!("show {rev}"),
                status: 0,
                stderr: "unparsable commit format output".to_string(),
            })?
            .to_string();
        // git terminates the whole show output with one newline, which lands
        // inside the NUL-delimited %B field.
        let message = message
            .strip_suffix('\n')
            .unwrap_or(message.as_str())
            .to_string();
        Ok(CommitInfo {
            id,
            author,
            message,
            parents,
        })
    }

    /// Unified diff of one commit against a parent.
    ///
    /// `mainline` selects the parent for merge commits, 1-based as in
    /// `git cherry-pick -m`; `None` diffs against the first parent (or the
    /// empty tree for a root commit).
    pub fn diff_tree(&self, commit: &str, mainline: Option<u32>) -> Result<String, PickError> {
        let out = match mainline {
            Some(parent) => {
                let base = format!("{commit}^{parent}");
                self.git_ok(&["diff", "--no-color", "--find-renames", &base, commit])?
            }
            None => self.git_ok(&[
                "diff-tree",
                "--patch",
                "--no-commit-id",
                "--no-color",
                "--find-renames",
                "--root",
                commit,
            ])?,
        };
        Ok(out.stdout)
    }

    /// Attempt a native cherry-pick. Exit code 1 is a conflict (the driver
    /// for the patch stage); any other failure is a hard git error.
    ///
    /// Origin and sign-off trailers are not delegated to git: the pipeline
    /// owns message construction so annotation order stays uniform across
    /// all three stages.
    pub fn cherry_pick(
        &self,
        commit: &str,
        mainline: Option<u32>,
    ) -> Result<CherryPickResult, PickError> {
        let mut args: Vec<String> = vec!["cherry-pick".to_string()];
        if let Some(parent) = mainline {
            args.push("-m".to_string());
            args.push(parent.to_string());
        }
        args.push(commit.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.git(&arg_refs)?;
        let status = if output.success() {
            CherryPickStatus::Applied
        } else if output.status == 1 {
            tracing::debug!("cherry-pick of {commit} conflicted");
            CherryPickStatus::Conflict
        } else {
            return Err(PickError::Git {
                command: arg_refs.join(" "),
                status: output.status,
                stderr: output.stderr.trim_end().to_string(),
            });
        };
        Ok(CherryPickResult { status, output })
    }

    /// Abort a cherry-pick in progress; quietly a no-op when none is.
    pub fn abort_cherry_pick(&self) -> Result<(), PickError> {
        let out = self.git(&["cherry-pick", "--abort"])?;
        if !out.success() {
            tracing::debug!("cherry-pick --abort: {}", out.stderr.trim_end());
        }
        Ok(())
    }

    pub fn reset_hard(&self, rev: &str) -> Result<(), PickError> {
        self.git_ok(&["reset", "--hard", rev])?;
        Ok(())
    }

    /// Remove untracked files and directories.
    pub fn clean_untracked(&self) -> Result<(), PickError> {
        self.git_ok(&["clean", "-fd"])?;
        Ok(())
    }

    /// `(id, subject)` of commits reachable from `tip` but not from `base`,
    /// oldest first.
    pub fn log_between(&self, base: &str, tip: &str) -> Result<Vec<(String, String)>, PickError> {
        let range = format!("{base}..{tip}");
        let out = self.git_ok(&["log", "--reverse", "--format=%H%x00%s", &range])?;
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| {
                let (id, subject) = line.split_once('\0')?;
                Some((id.to_string(), subject.to_string()))
            })
            .collect())
    }

    /// Contents of `path` at `rev`, or `None` when absent at that revision.
    pub fn blob_at(&self, rev: &str, path: &str) -> Result<Option<String>, PickError> {
        let spec = format!("{rev}:{path}");
        let out = self.git(&["show", &spec])?;
        if out.success() {
            Ok(Some(out.stdout))
        } else {
            Ok(None)
        }
    }

    /// Stage every change in the tree (`git add -A`).
    ///
    /// The pipeline owns the tree and starts from a clean state, so whole
    /// tree staging is exact; a pathspec would trip over renames whose old
    /// side matches nothing.
    pub fn add_all(&self) -> Result<(), PickError> {
        self.git_ok(&["add", "-A"])?;
        Ok(())
    }

    /// Create a commit from the index with an explicit author, message fed
    /// via stdin so no shell quoting can mangle it.
    pub fn commit(&self, message: &str, author: Option<&str>) -> Result<String, PickError> {
        let author_arg = author.map(|a| format!("--author={a}"));
        let mut args = vec!["commit", "--allow-empty-message", "-F", "-"];
        if let Some(author_arg) = author_arg.as_deref() {
            args.push(author_arg);
        }
        self.git_with_input(&args, message)?;
        self.current_head()
    }

    /// Replace the message of the commit at HEAD, keeping its author.
    pub fn amend_message(&self, message: &str) -> Result<(), PickError> {
        self.git_with_input(&["commit", "--amend", "--allow-empty-message", "-F", "-"], message)?;
        Ok(())
    }

    /// `Name <email>` of the configured committer, for sign-off trailers.
    pub fn committer_ident(&self) -> Result<String, PickError> {
        let out = self.git_ok(&["var", "GIT_COMMITTER_IDENT"])?;
        let raw = out.stdout.trim();
        // "Name <email> timestamp tz" -> "Name <email>"
        let ident = raw
            .rfind('>')
            .map(|end| raw[..=end].to_string())
            .unwrap_or_else(|| raw.to_string());
        Ok(ident)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.name", "Test"]);
        git(dir, &["config", "user.email", "test@example.com"]);
    }

    fn backend(dir: &Path) -> GitBackend {
        GitBackend::new(dir, Duration::from_secs(30), CancelFlag::new())
    }

    #[test]
    fn reads_commit_info_and_head() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("a.txt"), "one\n").unwrap();
        git(tmp.path(), &["add", "."]);
        git(tmp.path(), &["commit", "-q", "-m", "first commit\n\nwith a body"]);

        let backend = backend(tmp.path());
        let head = backend.current_head().unwrap();
        let info = backend.commit_info("HEAD").unwrap();
        assert_eq!(info.id, head);
        assert_eq!(info.author, "Test <test@example.com>");
        assert_eq!(info.subject(), "first commit");
        assert!(info.message.ends_with("with a body"));
        assert!(info.parents.is_empty());
        assert!(backend.is_clean().unwrap());
    }

    #[test]
    fn cherry_pick_reports_conflicts_as_data() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        let file = tmp.path().join("f.txt");
        fs::write(&file, "base\n").unwrap();
        git(tmp.path(), &["add", "."]);
        git(tmp.path(), &["commit", "-q", "-m", "base"]);

        git(tmp.path(), &["checkout", "-q", "-b", "feature"]);
        fs::write(&file, "feature change\n").unwrap();
        git(tmp.path(), &["commit", "-q", "-am", "feature"]);
        let feature = backend(tmp.path()).current_head().unwrap();

        git(tmp.path(), &["checkout", "-q", "main"]);
        fs::write(&file, "diverged\n").unwrap();
        git(tmp.path(), &["commit", "-q", "-am", "diverge"]);

        let backend = backend(tmp.path());
        let result = backend.cherry_pick(&feature, None).unwrap();
        assert_eq!(result.status, CherryPickStatus::Conflict);
        backend.abort_cherry_pick().unwrap();
        assert!(backend.is_clean().unwrap());
    }

    #[test]
    fn blob_at_distinguishes_missing_files() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("present.txt"), "hello\n").unwrap();
        git(tmp.path(), &["add", "."]);
        git(tmp.path(), &["commit", "-q", "-m", "add"]);

        let backend = backend(tmp.path());
        assert_eq!(
            backend.blob_at("HEAD", "present.txt").unwrap().as_deref(),
            Some("hello\n")
        );
        assert_eq!(backend.blob_at("HEAD", "absent.txt").unwrap(), None);
    }

    #[test]
    fn diff_tree_emits_a_parseable_patch() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("f.txt"), "one\ntwo\n").unwrap();
        git(tmp.path(), &["add", "."]);
        git(tmp.path(), &["commit", "-q", "-m", "base"]);
        fs::write(tmp.path().join("f.txt"), "one\nchanged\n").unwrap();
        git(tmp.path(), &["commit", "-q", "-am", "change"]);

        let backend = backend(tmp.path());
        let text = backend.diff_tree("HEAD", None).unwrap();
        let diff = crate::diff::CommitDiff::parse(&text).unwrap();
        assert_eq!(diff.files.len(), 1);
        assert_eq!(diff.files[0].path(), "f.txt");
        assert_eq!(diff.emit(), text);
    }
}
