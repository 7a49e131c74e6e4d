//! Unified diff model: parse `git diff` output into typed per-file changes
//! and hunks, and emit it back losslessly. Parse-then-emit is a fixed point
//! on every diff the parser accepts, which is what lets the path rewriter
//! and the patch-tool adapter hand the same bytes around without drift.

pub mod rewrite;

use std::fmt::Write;

use crate::errors::PickError;

/// One line of a hunk body, tagged by its diff marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
    /// `\ No newline at end of file`; counts toward neither side.
    NoNewline,
}

/// A contiguous block of changes within one file.
///
/// Immutable once parsed; downstream stages read the tagged lines instead of
/// re-parsing raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Text following the closing `@@` of the header, without leading space.
    pub header_context: String,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Reconstruct the `@@ -a,b +c,d @@ ctx` header the way git prints it
    /// (a count of exactly 1 is elided).
    pub fn header_line(&self) -> String {
        let mut header = String::from("@@ -");
        write_range(&mut header, self.old_start, self.old_count);
        header.push_str(" +");
        write_range(&mut header, self.new_start, self.new_count);
        header.push_str(" @@");
        if !self.header_context.is_empty() {
            header.push(' ');
            header.push_str(&self.header_context);
        }
        header
    }

    /// Old-side lines (context plus removed), in order.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                DiffLine::Context(s) | DiffLine::Removed(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// New-side lines (context plus added), in order.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                DiffLine::Context(s) | DiffLine::Added(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when the hunk only removes lines.
    pub fn is_pure_deletion(&self) -> bool {
        self.lines.iter().any(|l| matches!(l, DiffLine::Removed(_)))
            && !self.lines.iter().any(|l| matches!(l, DiffLine::Added(_)))
    }

    /// The hunk as unified diff text, header included.
    pub fn to_text(&self) -> String {
        let mut out = self.header_line();
        out.push('\n');
        for line in &self.lines {
            match line {
                DiffLine::Context(s) => {
                    out.push(' ');
                    out.push_str(s);
                }
                DiffLine::Added(s) => {
                    out.push('+');
                    out.push_str(s);
                }
                DiffLine::Removed(s) => {
                    out.push('-');
                    out.push_str(s);
                }
                DiffLine::NoNewline => out.push_str("\\ No newline at end of file"),
            }
            out.push('\n');
        }
        out
    }
}

fn write_range(out: &mut String, start: usize, count: usize) {
    if count == 1 {
        let _ = write!(out, "{start}");
    } else {
        let _ = write!(out, "{start},{count}");
    }
}

/// All changes to one file within a commit's diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path on the old side; `None` for an added file.
    pub old_path: Option<String>,
    /// Path on the new side; `None` for a deleted file.
    pub new_path: Option<String>,
    /// Raw header lines (from `diff --git` through `+++`, or the binary
    /// notice), kept verbatim so emission is lossless.
    pub header_lines: Vec<String>,
    pub binary: bool,
    pub hunks: Vec<DiffHunk>,
}

impl FileChange {
    /// The destination-facing path of this change.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    pub fn is_rename(&self) -> bool {
        match (&self.old_path, &self.new_path) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        }
    }

    /// Rename or mode change with no content hunks.
    pub fn is_metadata_only(&self) -> bool {
        self.hunks.is_empty() && !self.binary
    }

    /// True when the header declares a mode change.
    pub fn has_mode_change(&self) -> bool {
        self.header_lines.iter().any(|l| {
            l.starts_with("old mode ")
                || l.starts_with("new mode ")
                || l.starts_with("new file mode ")
        })
    }

    /// File mode declared for the new side, if any.
    pub fn new_mode(&self) -> Option<&str> {
        self.header_lines.iter().find_map(|l| {
            l.strip_prefix("new mode ")
                .or_else(|| l.strip_prefix("new file mode "))
        })
    }
}

/// A parsed multi-file unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitDiff {
    pub files: Vec<FileChange>,
}

impl CommitDiff {
    /// Parse `git diff` / `git diff-tree -p` output.
    ///
    /// Accepts multi-file diffs, renames with and without content, mode-only
    /// changes, added and deleted files, binary notices, and bare `---`/`+++`
    /// fragments (the shape of unified reject files).
    pub fn parse(text: &str) -> Result<CommitDiff, PickError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut files = Vec::new();
        let mut pos = 0;

        while pos < lines.len() {
            let line = lines[pos];
            if line.starts_with("diff --git ") || line.starts_with("--- ") {
                let (file, next) = parse_file(&lines, pos)?;
                files.push(file);
                pos = next;
            } else {
                // Preamble such as `git show` commit headers; skip to the
                // first file marker.
                pos += 1;
            }
        }

        Ok(CommitDiff { files })
    }

    /// Emit the diff as text. For any diff accepted by [`CommitDiff::parse`]
    /// this reproduces the input bytes.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            for header in &file.header_lines {
                out.push_str(header);
                out.push('\n');
            }
            for hunk in &file.hunks {
                out.push_str(&hunk.to_text());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn has_binary(&self) -> bool {
        self.files.iter().any(|f| f.binary)
    }

    pub fn total_hunks(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }

    /// True when no file carries content hunks (pure rename/mode commits).
    pub fn is_metadata_only(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.is_metadata_only())
    }
}

/// Parse one file section starting at `start`; returns the change and the
/// index of the first line after it.
fn parse_file(lines: &[&str], start: usize) -> Result<(FileChange, usize), PickError> {
    let mut header_lines = Vec::new();
    let mut old_path = None;
    let mut new_path = None;
    let mut rename_from = None;
    let mut rename_to = None;
    let mut binary = false;
    let mut pos = start;

    // `diff --git a/X b/Y` paths are a fallback for header-only changes;
    // `---`/`+++` lines win when present.
    let mut git_paths: Option<(String, String)> = None;

    while pos < lines.len() {
        let line = lines[pos];
        if line.starts_with("@@ ") {
            break;
        }
        if pos != start && line.starts_with("diff --git ") {
            break;
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            git_paths = split_git_paths(rest);
        } else if let Some(rest) = line.strip_prefix("--- ") {
            old_path = strip_diff_path(rest);
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_path = strip_diff_path(rest);
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            rename_from = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            rename_to = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("copy from ") {
            rename_from = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("copy to ") {
            rename_to = Some(rest.to_string());
        } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
            binary = true;
        }

        header_lines.push(line.to_string());
        pos += 1;
    }

    // Binary payload lines (and anything else before the next file) belong to
    // this file's verbatim headers.
    if binary {
        while pos < lines.len() && !lines[pos].starts_with("diff --git ") {
            header_lines.push(lines[pos].to_string());
            pos += 1;
        }
    }

    let mut hunks = Vec::new();
    while pos < lines.len() && lines[pos].starts_with("@@ ") {
        let (hunk, next) = parse_hunk(lines, pos)?;
        hunks.push(hunk);
        pos = next;
    }

    if old_path.is_none() && new_path.is_none() {
        // Header-only section: rename/copy/mode-only changes carry paths in
        // their extended headers or the `diff --git` line.
        old_path = rename_from.clone();
        new_path = rename_to.clone();
        if old_path.is_none() && new_path.is_none() {
            match git_paths {
                Some((a, b)) => {
                    old_path = Some(a);
                    new_path = Some(b);
                }
                None => {
                    return Err(PickError::MalformedDiff(format!(
                        "file section at line {} has no paths",
                        start + 1
                    )));
                }
            }
        }
    }

    Ok((
        FileChange {
            old_path,
            new_path,
            header_lines,
            binary,
            hunks,
        },
        pos,
    ))
}

/// Parse one hunk starting at the `@@` header line.
fn parse_hunk(lines: &[&str], start: usize) -> Result<(DiffHunk, usize), PickError> {
    let header = lines[start];
    let (old_start, old_count, new_start, new_count, header_context) = parse_hunk_header(header)
        .ok_or_else(|| PickError::MalformedDiff(format!("bad hunk header `{header}`")))?;

    let mut body = Vec::new();
    let mut remaining_old = old_count;
    let mut remaining_new = new_count;
    let mut pos = start + 1;

    while remaining_old > 0 || remaining_new > 0 {
        let line = lines.get(pos).ok_or_else(|| {
            PickError::MalformedDiff(format!("hunk `{header}` is truncated"))
        })?;
        match line.as_bytes().first() {
            Some(b' ') => {
                remaining_old = checked_dec(remaining_old, header)?;
                remaining_new = checked_dec(remaining_new, header)?;
                body.push(DiffLine::Context(line[1..].to_string()));
            }
            Some(b'-') => {
                remaining_old = checked_dec(remaining_old, header)?;
                body.push(DiffLine::Removed(line[1..].to_string()));
            }
            Some(b'+') => {
                remaining_new = checked_dec(remaining_new, header)?;
                body.push(DiffLine::Added(line[1..].to_string()));
            }
            Some(b'\\') => body.push(DiffLine::NoNewline),
            _ => {
                return Err(PickError::MalformedDiff(format!(
                    "unexpected line `{line}` inside hunk `{header}`"
                )));
            }
        }
        pos += 1;
    }

    // A trailing no-newline marker follows the last counted line.
    if lines.get(pos).is_some_and(|l| l.starts_with('\\')) {
        body.push(DiffLine::NoNewline);
        pos += 1;
    }

    Ok((
        DiffHunk {
            old_start,
            old_count,
            new_start,
            new_count,
            header_context,
            lines: body,
        },
        pos,
    ))
}

fn checked_dec(value: usize, header: &str) -> Result<usize, PickError> {
    value.checked_sub(1).ok_or_else(|| {
        PickError::MalformedDiff(format!("hunk `{header}` has more lines than its counts"))
    })
}

/// Parse `@@ -a[,b] +c[,d] @@[ context]`.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize, String)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, rest) = rest.split_once(" @@")?;
    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;
    let header_context = rest.strip_prefix(' ').unwrap_or(rest).to_string();
    Some((old_start, old_count, new_start, new_count, header_context))
}

fn parse_range(part: &str) -> Option<(usize, usize)> {
    match part.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((part.parse().ok()?, 1)),
    }
}

/// Strip the `a/`/`b/` prefix from a `---`/`+++` path; `/dev/null` means the
/// file does not exist on that side. Timestamps after a tab are dropped.
fn strip_diff_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw);
    if raw == "/dev/null" {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_string())
}

/// Split the `a/X b/Y` remainder of a `diff --git` line. Paths containing
/// ` b/` are ambiguous here; the `---`/`+++` headers take precedence when
/// they exist.
fn split_git_paths(rest: &str) -> Option<(String, String)> {
    let split_at = rest.rfind(" b/")?;
    let a_side = rest[..split_at].strip_prefix("a/")?;
    let b_side = &rest[split_at + 3..];
    Some((a_side.to_string(), b_side.to_string()))
}
