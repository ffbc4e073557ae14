//! Commit-message parser (spec §4.2).
//!
//! The footer rules here are load-bearing (spec §9 "Footers vs headers") and
//! must be reproduced exactly: a footer paragraph is the *last* paragraph of
//! the message, separated from whatever precedes it by a blank line, and
//! every line in it must match `key: value` with `key` in `[A-Za-z0-9-]+`
//! immediately followed by `: ` — not just `:`, which is what keeps a
//! trailing bare URL line (`https://...`, colon immediately followed by
//! `//`, no space) from being mistaken for a footer.

use std::sync::OnceLock;

use regex::Regex;

fn footer_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9-]+): (.*)$").unwrap())
}

/// An ordered `key -> value` map preserving first-occurrence position while
/// later duplicate keys overwrite the value (spec §4.2 `footers`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footers {
    order: Vec<String>,
    values: std::collections::HashMap<String, String>,
}

impl Footers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.values[k].as_str()))
    }
}

impl FromIterator<(String, String)> for Footers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut f = Footers::new();
        for (k, v) in iter {
            f.insert(k, v);
        }
        f
    }
}

/// Lines of `msg`, split on `\n`, with a trailing empty element (produced
/// when `msg` ends in `\n`) dropped. Returns whether `msg` had a trailing
/// newline, since callers reconstructing text need to know.
fn lines_no_trailing_newline(msg: &str) -> (Vec<&str>, bool) {
    let had_trailing_newline = msg.ends_with('\n');
    let mut lines: Vec<&str> = msg.split('\n').collect();
    if had_trailing_newline {
        lines.pop();
    }
    (lines, had_trailing_newline)
}

/// Group `lines` into maximal runs of non-empty lines, returning
/// `(start, end)` index pairs (`end` exclusive).
fn paragraph_spans(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].is_empty() {
            i += 1;
            continue;
        }
        let start = i;
        while i < lines.len() && !lines[i].is_empty() {
            i += 1;
        }
        spans.push((start, i));
    }
    spans
}

/// Split `msg` into `(subject, body)`: the subject is the first paragraph
/// with interior newlines collapsed to single spaces; the body (if present)
/// is everything after the following blank line, minus a trailing newline.
pub fn subject_body(msg: &str) -> (String, Option<String>) {
    let (lines, _) = lines_no_trailing_newline(msg);
    let blank_idx = lines.iter().position(|l| l.is_empty());
    let subject_end = blank_idx.unwrap_or(lines.len());
    let subject = lines[..subject_end].join(" ");

    let body = blank_idx.and_then(|idx| {
        let body_start = idx + 1;
        if body_start >= lines.len() {
            None
        } else {
            Some(lines[body_start..].join("\n"))
        }
    });

    (subject, body)
}

/// Find the footer paragraph, if one exists: the last paragraph, provided
/// there are at least two paragraphs (a footer block is always "separated
/// from the body by a blank line", so a subject-only message has none) and
/// every line in that paragraph matches `key: value`.
fn find_footer_span(lines: &[&str]) -> Option<(usize, usize)> {
    let spans = paragraph_spans(lines);
    if spans.len() < 2 {
        return None;
    }
    let &(start, end) = spans.last().unwrap();
    let all_match = lines[start..end]
        .iter()
        .all(|l| footer_line_re().is_match(l));
    all_match.then_some((start, end))
}

/// Extract the trailing footer block, if any (spec §4.2 `footers`).
pub fn footers(msg: &str) -> Footers {
    let (lines, _) = lines_no_trailing_newline(msg);
    let Some((start, end)) = find_footer_span(&lines) else {
        return Footers::new();
    };

    let mut result = Footers::new();
    for line in &lines[start..end] {
        let caps = footer_line_re().captures(line).unwrap();
        result.insert(caps[1].to_string(), caps[2].to_string());
    }
    result
}

/// Remove the trailing footer paragraph (and the blank line(s) preceding
/// it), preserving subject/body. If there is no footer paragraph, `msg` is
/// returned unchanged.
pub fn trim_footers(msg: &str) -> String {
    let (lines, had_trailing_newline) = lines_no_trailing_newline(msg);
    let Some((footer_start, _)) = find_footer_span(&lines) else {
        return msg.to_string();
    };

    let mut blank_gap_start = footer_start;
    while blank_gap_start > 0 && lines[blank_gap_start - 1].is_empty() {
        blank_gap_start -= 1;
    }

    let _ = had_trailing_newline;
    lines[..blank_gap_start].join("\n")
}

/// Remove any trailing footer paragraph, ensure a blank line, then append
/// `k: v` lines in `footers`' insertion order (spec §4.2 `add_footers`). The
/// subject is never touched, even if it happens to look like a footer line
/// itself.
pub fn add_footers(msg: &str, footers: &Footers) -> String {
    let trimmed = trim_footers(msg);
    if footers.is_empty() {
        return trimmed;
    }

    let footer_block = footers
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n");

    if trimmed.is_empty() {
        format!("{footer_block}\n")
    } else {
        format!("{trimmed}\n\n{footer_block}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_only_no_body() {
        let (subject, body) = subject_body("Fix the thing");
        assert_eq!(subject, "Fix the thing");
        assert_eq!(body, None);
    }

    #[test]
    fn multiline_subject_collapses_to_spaces() {
        let (subject, body) = subject_body("Fix\nthe\nthing\n\nDetails here.\n");
        assert_eq!(subject, "Fix the thing");
        assert_eq!(body.as_deref(), Some("Details here."));
    }

    #[test]
    fn footers_extracts_trailing_block() {
        let msg = "Subject line\n\nBody line 1\nBody line 2\n\ncommit-id: abc12345\nReviewed-by: Someone\n";
        let f = footers(msg);
        assert_eq!(f.get("commit-id"), Some("abc12345"));
        assert_eq!(f.get("Reviewed-by"), Some("Someone"));
        assert_eq!(f.iter().collect::<Vec<_>>(), vec![
            ("commit-id", "abc12345"),
            ("Reviewed-by", "Someone"),
        ]);
    }

    #[test]
    fn later_duplicate_key_replaces_earlier_value_keeps_position() {
        let msg = "Subject\n\ncommit-id: first\nother: x\ncommit-id: second\n";
        let f = footers(msg);
        assert_eq!(f.get("commit-id"), Some("second"));
        assert_eq!(
            f.iter().collect::<Vec<_>>(),
            vec![("commit-id", "second"), ("other", "x")]
        );
    }

    #[test]
    fn trailing_url_alone_is_not_a_footer_block() {
        let msg = "Subject\n\nSee https://example.com/foo for details\n";
        let f = footers(msg);
        assert!(f.is_empty());
    }

    #[test]
    fn subject_only_message_has_no_footers() {
        // A single paragraph, even one shaped like `key: value`, is the
        // subject, not a footer block (it isn't separated from a body).
        let f = footers("Market Explorer: add initial scaffolding");
        assert!(f.is_empty());
    }

    #[test]
    fn trim_footers_is_noop_without_footer_block() {
        let msg = "Subject\n\nJust a body paragraph.\n";
        assert_eq!(trim_footers(msg), msg);
    }

    #[test]
    fn trim_footers_removes_block_and_blank_line() {
        let msg = "Subject\n\nBody.\n\ncommit-id: abc\n";
        assert_eq!(trim_footers(msg), "Subject\n\nBody.");
    }

    #[test]
    fn add_footers_round_trips_with_trim_and_footers() {
        let msg = "Subject line\n\nBody line 1\nBody line 2\n\ncommit-id: abc12345\n";
        let trimmed = trim_footers(msg);
        let f = footers(msg);
        assert_eq!(add_footers(&trimmed, &f), msg);
    }

    #[test]
    fn add_footers_on_message_without_existing_footers() {
        let msg = "Subject\n\nBody.";
        let mut f = Footers::new();
        f.insert("commit-id", "deadbeef");
        assert_eq!(add_footers(msg, &f), "Subject\n\nBody.\n\ncommit-id: deadbeef\n");
    }

    #[test]
    fn add_footers_replaces_existing_block_rather_than_duplicating() {
        let msg = "Subject\n\nBody.\n\ncommit-id: old\n";
        let mut f = Footers::new();
        f.insert("commit-id", "new");
        assert_eq!(add_footers(msg, &f), "Subject\n\nBody.\n\ncommit-id: new\n");
    }
}
