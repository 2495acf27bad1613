//! Edit proposal model and extraction from free-form model output.

use serde::{Deserialize, Serialize};

/// Replace lines `start_line..=end_line` (1-based) of `file_path` with
/// `new_content`. Empty `new_content` deletes the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditProposal {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub new_content: String,
    #[serde(default)]
    pub reasoning: String,
}

impl EditProposal {
    /// Replacement lines, without terminators.
    #[must_use]
    pub fn new_lines(&self) -> Vec<&str> {
        self.new_content.lines().collect()
    }

    /// Lines the file gains (positive) or loses (negative) once applied.
    #[must_use]
    pub fn line_delta(&self) -> isize {
        let replaced = self.end_line.saturating_sub(self.start_line) + 1;
        line_count_delta(replaced, self.new_content.lines().count())
    }
}

fn line_count_delta(removed: usize, added: usize) -> isize {
    let removed = isize::try_from(removed).unwrap_or(isize::MAX);
    let added = isize::try_from(added).unwrap_or(isize::MAX);
    added - removed
}

#[derive(Deserialize)]
struct ChangeSet {
    changes: Vec<serde_json::Value>,
}

/// Extract edit proposals from a model reply.
///
/// The reply may wrap the JSON in prose or code fences. The first
/// brace-balanced object carrying a `changes` array wins; entries that do not
/// deserialize are skipped. A reply without such an object yields nothing.
#[must_use]
pub fn parse_proposals(raw: &str) -> Vec<EditProposal> {
    for (start, _) in raw.match_indices('{') {
        let Some(end) = matching_brace(raw, start) else {
            continue;
        };
        let Ok(set) = serde_json::from_str::<ChangeSet>(&raw[start..=end]) else {
            continue;
        };

        return set
            .changes
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| match serde_json::from_value(entry) {
                Ok(proposal) => Some(proposal),
                Err(e) => {
                    tracing::warn!(index = i, "skipping malformed change entry: {e}");
                    None
                }
            })
            .collect();
    }

    tracing::debug!("no changes object found in model reply");
    Vec::new()
}

/// Byte index of the `}` closing the `{` at `open`, skipping braces inside
/// JSON string literals.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[open..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}
