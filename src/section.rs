//! Enclosing-section extraction for LLM context.
//!
//! Language-agnostic heuristics: walk upward from the target range to the
//! nearest minimally-indented line matching a configured section-start
//! pattern (function-like, class-like, top-level declarations), then downward
//! to the line before the next section start at that indentation. When no
//! structure is found, a bounded fixed-width window is returned instead, so
//! extraction is total.

use crate::config::SectionConfig;

/// An enclosing code unit used as LLM context.
///
/// `text` is the exact bytes of lines `start_line..=end_line` of `path` at
/// `revision`; line numbers are 1-based and inclusive, and the section always
/// contains the requested target range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub path: String,
    pub revision: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

pub struct SectionExtractor {
    config: SectionConfig,
}

impl SectionExtractor {
    pub fn new(config: SectionConfig) -> Self {
        Self { config }
    }

    /// Extract the smallest section of `content` spanning
    /// `target_start..=target_end` (1-based line numbers).
    pub fn extract(
        &self,
        path: &str,
        revision: &str,
        content: &str,
        target_start: usize,
        target_end: usize,
    ) -> Section {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let line_count = lines.len().max(1);
        let target_start = target_start.clamp(1, line_count);
        let target_end = target_end.clamp(target_start, line_count);

        let (start, end) = match self.section_bounds(&lines, target_start, target_end) {
            Some(bounds) => bounds,
            None => self.window_bounds(line_count, target_start, target_end),
        };

        let text: String = lines
            .get(start - 1..end)
            .unwrap_or_default()
            .concat();

        Section {
            path: path.to_string(),
            revision: revision.to_string(),
            start_line: start,
            end_line: end,
            text,
        }
    }

    /// Locate section boundaries, or `None` when the file shows no structure
    /// the patterns recognize above the target.
    fn section_bounds(
        &self,
        lines: &[&str],
        target_start: usize,
        target_end: usize,
    ) -> Option<(usize, usize)> {
        let base_indent = lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| indent_of(l))
            .min()?;

        let start = (1..=target_start)
            .rev()
            .find(|&n| self.is_section_start(lines[n - 1], base_indent))?;

        let mut end = lines.len();
        for n in (start + 1)..=lines.len() {
            if self.is_section_start(lines[n - 1], base_indent) {
                end = n - 1;
                break;
            }
        }

        // The section must always contain the target range.
        Some((start.min(target_start), end.max(target_end)))
    }

    fn window_bounds(
        &self,
        line_count: usize,
        target_start: usize,
        target_end: usize,
    ) -> (usize, usize) {
        let window = self.config.fallback_window;
        let start = target_start.saturating_sub(window).max(1);
        let end = (target_end + window).min(line_count);
        (start, end)
    }

    fn is_section_start(&self, line: &str, base_indent: usize) -> bool {
        if indent_of(line) != base_indent {
            return false;
        }
        let trimmed = line.trim_start();
        if trimmed.trim().is_empty() {
            return false;
        }
        self.config
            .start_patterns
            .iter()
            .any(|p| trimmed.starts_with(p.as_str()))
    }
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Replace lines `start..=end` (1-based, inclusive) of `content` with
/// `replacement`, preserving the bytes of everything outside the range.
pub fn splice_lines(content: &str, start: usize, end: usize, replacement: &str) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let start = start.clamp(1, lines.len().max(1));
    let end = end.clamp(start, lines.len().max(1));

    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&lines.get(..start - 1).unwrap_or_default().concat());
    out.push_str(replacement);
    if !replacement.is_empty() && !replacement.ends_with('\n') && end < lines.len() {
        out.push('\n');
    }
    out.push_str(&lines.get(end..).unwrap_or_default().concat());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SectionExtractor {
        SectionExtractor::new(SectionConfig::default())
    }

    const C_FILE: &str = "\
#include <stdio.h>

static int helper(int x)
{
    return x + 1;
}

int main(void)
{
    int v = helper(41);
    printf(\"%d\\n\", v);
    return 0;
}
";

    #[test]
    fn finds_the_enclosing_function() {
        let section = extractor().extract("main.c", "HEAD", C_FILE, 10, 10);
        assert_eq!(section.start_line, 8);
        assert_eq!(section.end_line, 13);
        assert!(section.text.starts_with("int main(void)"));
        assert!(section.text.ends_with("}\n"));
    }

    #[test]
    fn section_stops_before_the_next_start() {
        let section = extractor().extract("main.c", "HEAD", C_FILE, 5, 5);
        assert_eq!(section.start_line, 3);
        // Ends on the blank line before `int main`.
        assert_eq!(section.end_line, 7);
        assert!(section.text.contains("return x + 1;"));
        assert!(!section.text.contains("int main"));
    }

    #[test]
    fn target_at_line_one_is_contained() {
        let section = extractor().extract("main.c", "HEAD", C_FILE, 1, 1);
        assert!(section.start_line <= 1);
        assert!(section.end_line >= 1);
        assert!(section.text.contains("#include <stdio.h>"));
    }

    #[test]
    fn target_at_end_of_file_is_contained() {
        let last = C_FILE.lines().count();
        let section = extractor().extract("main.c", "HEAD", C_FILE, last, last);
        assert!(section.start_line <= last);
        assert_eq!(section.end_line, last);
    }

    #[test]
    fn structureless_file_falls_back_to_a_window() {
        let content = (1..=100)
            .map(|n| format!("line {n}\n"))
            .collect::<String>();
        let section = extractor().extract("data.txt", "HEAD", &content, 50, 51);
        assert_eq!(section.start_line, 30);
        assert_eq!(section.end_line, 71);
        assert!(section.text.starts_with("line 30\n"));
    }

    #[test]
    fn exact_bytes_are_preserved() {
        let content = "fn one() {\n\tbody\n}\n";
        let section = extractor().extract("f.rs", "worktree", content, 2, 2);
        assert_eq!(section.text, content);
    }

    #[test]
    fn splice_replaces_an_inner_range() {
        let content = "a\nb\nc\nd\n";
        assert_eq!(splice_lines(content, 2, 3, "X\nY\n"), "a\nX\nY\nd\n");
    }

    #[test]
    fn splice_into_empty_content() {
        assert_eq!(splice_lines("", 1, 1, "new\n"), "new\n");
    }

    #[test]
    fn splice_at_the_boundaries() {
        let content = "a\nb\nc\n";
        assert_eq!(splice_lines(content, 1, 1, "Z\n"), "Z\nb\nc\n");
        assert_eq!(splice_lines(content, 3, 3, "Z\n"), "a\nb\nZ\n");
        // Replacement without a trailing newline gets one when content
        // follows it.
        assert_eq!(splice_lines(content, 1, 1, "Z"), "Z\nb\nc\n");
    }
}
