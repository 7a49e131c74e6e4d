//! Parser for the model's three-section markdown response.
//!
//! The accepted shape is rigid: the three mandatory headings in order, and
//! exactly one fenced code block under `ADAPTED CODE SNIPPET`. Responses
//! containing the boundary marker, the refusal phrase, extra fenced blocks in
//! the snippet section, or an empty snippet are rejected outright rather than
//! salvaged.

use crate::{
    errors::PickError,
    llm::prompt::{HEADING_EXPLANATION, HEADING_SNIPPET, HEADING_SUMMARY, REFUSAL_PHRASE},
};

/// A successfully parsed repair response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReply {
    pub explanation: String,
    pub summary: String,
    /// Contents of the single fenced block, fences stripped.
    pub snippet: String,
}

/// Parse a raw model response, enforcing the prompt contract.
pub fn parse_reply(response: &str, boundary_marker: &str) -> Result<RepairReply, PickError> {
    if response.contains(REFUSAL_PHRASE) {
        return Err(PickError::LlmRefused);
    }
    if !boundary_marker.is_empty() && response.contains(boundary_marker) {
        return Err(PickError::LlmParseFailed(
            "response echoes the boundary marker".to_string(),
        ));
    }

    let explanation = section_body(response, HEADING_EXPLANATION)?;
    let summary = section_body(response, HEADING_SUMMARY)?;
    let snippet_section = section_body(response, HEADING_SNIPPET)?;

    let snippet = single_fenced_block(&snippet_section)?;
    if snippet.trim().is_empty() {
        return Err(PickError::LlmParseFailed(
            "adapted code snippet is empty".to_string(),
        ));
    }

    Ok(RepairReply {
        explanation: explanation.trim().to_string(),
        summary: summary.trim().to_string(),
        snippet,
    })
}

/// Text between `heading` and the next heading (or end of response).
fn section_body(response: &str, heading: &str) -> Result<String, PickError> {
    let lines: Vec<&str> = response.lines().collect();
    let start = lines
        .iter()
        .position(|l| is_heading(l, heading))
        .ok_or_else(|| {
            PickError::LlmParseFailed(format!("missing required heading `{heading}`"))
        })?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_any_heading(l))
        .map(|off| start + 1 + off)
        .unwrap_or(lines.len());
    Ok(lines[start + 1..end].join("\n"))
}

fn is_heading(line: &str, heading: &str) -> bool {
    let trimmed = line.trim_start_matches('#').trim();
    trimmed == heading
}

fn is_any_heading(line: &str) -> bool {
    [HEADING_EXPLANATION, HEADING_SUMMARY, HEADING_SNIPPET]
        .iter()
        .any(|h| is_heading(line, h))
}

/// Extract the contents of exactly one ``` fence from `section`.
fn single_fenced_block(section: &str) -> Result<String, PickError> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in section.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(body) => blocks.push(format!("{}\n", body.join("\n"))),
                None => current = Some(Vec::new()),
            }
        } else if let Some(body) = current.as_mut() {
            body.push(line);
        }
    }

    if current.is_some() {
        return Err(PickError::LlmParseFailed(
            "unterminated code fence in snippet section".to_string(),
        ));
    }
    match blocks.len() {
        0 => Err(PickError::LlmParseFailed(
            "snippet section contains no fenced code block".to_string(),
        )),
        1 => Ok(blocks.remove(0)),
        n => Err(PickError::LlmParseFailed(format!(
            "snippet section contains {n} fenced code blocks, expected exactly one"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "\
## EXPLANATION
The helper was renamed in the destination.

## CHANGE SUMMARY
Apply the guard using the renamed helper.

## ADAPTED CODE SNIPPET
```c
int read_input(void)
{
    guard();
    return 0;
}
```
";

    #[test]
    fn parses_a_well_formed_reply() {
        let reply = parse_reply(GOOD, "deadbeef").unwrap();
        assert!(reply.explanation.contains("renamed"));
        assert!(reply.summary.contains("guard"));
        assert!(reply.snippet.starts_with("int read_input(void)"));
        assert!(reply.snippet.ends_with("}\n"));
        assert!(!reply.snippet.contains("```"));
    }

    #[test]
    fn bare_headings_without_hashes_are_accepted() {
        let response = GOOD.replace("## ", "");
        assert!(parse_reply(&response, "m").is_ok());
    }

    #[test]
    fn refusal_phrase_is_a_distinct_error() {
        let err = parse_reply("Failed to generate patched code", "m").unwrap_err();
        assert!(matches!(err, PickError::LlmRefused));
    }

    #[test]
    fn echoed_marker_is_rejected() {
        let response = format!("{GOOD}\nmarker-xyz");
        let err = parse_reply(&response, "marker-xyz").unwrap_err();
        assert!(matches!(err, PickError::LlmParseFailed(_)));
    }

    #[test]
    fn missing_heading_is_rejected() {
        let response = GOOD.replace("## CHANGE SUMMARY\n", "");
        let err = parse_reply(&response, "m").unwrap_err();
        assert!(matches!(err, PickError::LlmParseFailed(_)));
    }

    #[test]
    fn multiple_fences_in_the_snippet_section_are_rejected() {
        let response = format!("{GOOD}```\nsecond block\n```\n");
        let err = parse_reply(&response, "m").unwrap_err();
        assert!(matches!(err, PickError::LlmParseFailed(_)));
    }

    #[test]
    fn empty_snippet_is_rejected() {
        let response = "\
## EXPLANATION
x
## CHANGE SUMMARY
y
## ADAPTED CODE SNIPPET
```
```
";
        let err = parse_reply(response, "m").unwrap_err();
        assert!(matches!(err, PickError::LlmParseFailed(_)));
    }
}
