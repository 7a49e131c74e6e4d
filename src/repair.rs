//! Turns one rejected hunk into a verified edit of the destination file.
//!
//! The engine extracts the enclosing section from three revisions (the
//! commit's parent, the commit itself, and the destination working tree),
//! composes the repair prompt, resolves it through the cache-fronted LLM
//! client, and splices the parsed snippet over the destination section. The
//! edit is verified by re-reading the file and re-running the extractor over
//! the spliced range. Any failure leaves the reject unresolved; partial LLM
//! successes are never committed.

use std::fs;

use crate::{
    config::SectionConfig,
    errors::PickError,
    llm::{
        LlmClient,
        prompt::PromptSlots,
        response::parse_reply,
    },
    patch::Reject,
    section::{SectionExtractor, splice_lines},
    vcs::{CommitInfo, GitBackend},
};

/// Source-side coordinates of the pick, fixed for all rejects of one commit.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    pub commit: &'a CommitInfo,
    /// The parent revision the hunks were authored against (mainline-aware);
    /// `None` for a root commit.
    pub parent_rev: Option<&'a str>,
}

/// A resolved reject, for the pipeline's bookkeeping.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub path: String,
    /// The model's CHANGE SUMMARY line(s).
    pub summary: String,
}

pub struct RepairEngine<'a> {
    git: &'a GitBackend,
    llm: &'a LlmClient,
    extractor: SectionExtractor,
}

impl<'a> RepairEngine<'a> {
    pub fn new(git: &'a GitBackend, llm: &'a LlmClient, section_config: SectionConfig) -> Self {
        Self {
            git,
            llm,
            extractor: SectionExtractor::new(section_config),
        }
    }

    /// Repair one reject in place.
    ///
    /// `source_old_path`/`source_new_path` are the commit's own (pre-rewrite)
    /// paths for the file, used to read source context; `reject.path` is the
    /// destination path being edited.
    pub fn repair(
        &self,
        reject: &Reject,
        ctx: RepairContext<'_>,
        source_old_path: Option<&str>,
        source_new_path: Option<&str>,
    ) -> Result<RepairOutcome, PickError> {
        let dest_file = self.git.workdir().join(&reject.path);
        let dest_content = fs::read_to_string(&dest_file).map_err(|e| {
            PickError::PatchUnresolvable(format!(
                "destination file `{}` is unreadable: {e}",
                reject.path
            ))
        })?;

        let dest_section = self.extractor.extract(
            &reject.path,
            "worktree",
            &dest_content,
            reject.target_start,
            reject.target_end,
        );

        let hunk = &reject.hunk;
        let source_before = self.revision_section(
            ctx.parent_rev,
            source_old_path,
            hunk.old_start,
            hunk.old_start + hunk.old_count.saturating_sub(1),
        )?;
        let source_after = self.revision_section(
            Some(&ctx.commit.id),
            source_new_path,
            hunk.new_start,
            hunk.new_start + hunk.new_count.saturating_sub(1),
        )?;

        let reject_text = hunk.to_text();
        let slots = PromptSlots {
            commit_message: &ctx.commit.message,
            source_before: &source_before,
            source_after: &source_after,
            destination: &dest_section.text,
            reject_hunk: &reject_text,
        };
        let marker = slots.boundary_marker();
        let prompt = slots.render();

        tracing::debug!(
            "repairing {} lines {}..{} of {}",
            hunk.old_count,
            dest_section.start_line,
            dest_section.end_line,
            reject.path
        );
        let response = self.llm.query(&prompt)?;
        let reply = parse_reply(&response, &marker)?;

        let patched = splice_lines(
            &dest_content,
            dest_section.start_line,
            dest_section.end_line,
            &reply.snippet,
        );
        fs::write(&dest_file, &patched)?;

        self.verify(&reject.path, dest_section.start_line, &reply.snippet)?;

        Ok(RepairOutcome {
            path: reject.path.clone(),
            summary: reply.summary,
        })
    }

    /// Section of `path` at `rev` spanning the given lines, or empty when the
    /// file does not exist there (added files have no source-before side).
    fn revision_section(
        &self,
        rev: Option<&str>,
        path: Option<&str>,
        start: usize,
        end: usize,
    ) -> Result<String, PickError> {
        let (Some(rev), Some(path)) = (rev, path) else {
            return Ok(String::new());
        };
        match self.git.blob_at(rev, path)? {
            Some(content) => {
                let section = self.extractor.extract(path, rev, &content, start, end);
                Ok(section.text)
            }
            None => Ok(String::new()),
        }
    }

    /// Re-read the spliced file and confirm the section around the edit
    /// still parses and covers the replacement.
    fn verify(&self, path: &str, start_line: usize, snippet: &str) -> Result<(), PickError> {
        let content = fs::read_to_string(self.git.workdir().join(path))?;
        let snippet_lines = snippet.lines().count().max(1);
        let end_line = start_line + snippet_lines - 1;
        let section = self
            .extractor
            .extract(path, "worktree", &content, start_line, end_line);
        if section.start_line > start_line || section.end_line < end_line {
            return Err(PickError::LlmParseFailed(format!(
                "repaired section of `{path}` no longer parses around lines \
                 {start_line}..{end_line}"
            )));
        }
        Ok(())
    }
}

/// Identifier tokens referenced by a reject that the destination file does
/// not contain. Feeds the dependency-pick search.
pub fn unresolved_symbols(reject: &Reject, dest_content: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for line in reject.hunk.new_lines() {
        for token in identifier_tokens(line) {
            if token.len() >= 3
                && !dest_content.contains(&token)
                && !symbols.contains(&token)
            {
                symbols.push(token);
            }
        }
    }
    symbols
}

fn identifier_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in line.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c);
        } else if !current.is_empty() {
            if !current.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.is_empty() && !current.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffHunk, DiffLine};

    fn reject_with_lines(lines: Vec<DiffLine>) -> Reject {
        Reject {
            path: "f.c".to_string(),
            hunk: DiffHunk {
                old_start: 1,
                old_count: 1,
                new_start: 1,
                new_count: 2,
                header_context: String::new(),
                lines,
            },
            target_start: 1,
            target_end: 1,
            similarity: 0.8,
        }
    }

    #[test]
    fn unresolved_symbols_ignores_known_identifiers() {
        let reject = reject_with_lines(vec![
            DiffLine::Context("existing_helper();".into()),
            DiffLine::Added("brand_new_helper(42);".into()),
        ]);
        let symbols = unresolved_symbols(&reject, "void existing_helper(void);\n");
        assert_eq!(symbols, vec!["brand_new_helper".to_string()]);
    }

    #[test]
    fn numeric_tokens_are_not_symbols() {
        let reject = reject_with_lines(vec![DiffLine::Added("x = 12345 + 0xff;".into())]);
        let symbols = unresolved_symbols(&reject, "");
        assert_eq!(symbols, Vec::<String>::new());
    }
}
