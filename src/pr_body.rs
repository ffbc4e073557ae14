//! PR-body builder (spec §4.5): the generated region of each PR description,
//! rewritten twice during a push — once before PRs exist (stack list keyed
//! by commit-id) and once after (keyed by PR number).

use crate::message::subject_body;
use crate::model::Commit;

/// Delimits the generated region. Everything above this line in an existing
/// PR body is user content and is preserved verbatim across rewrites.
pub const START_MARKER: &str = "<!-- jaspr start -->";

const MANUAL_MERGE_WARNING: &str =
    "\n⚠️ Do not merge this PR manually from the forge UI; use `jaspr merge` \
     so dependent PRs in the stack are rebased correctly.\n";

/// One row of the rendered stack list: a PR number (if assigned yet) and
/// whether it is the commit this body belongs to.
pub struct StackRow<'a> {
    pub commit_id: &'a str,
    /// `None` before the first pass has created PRs.
    pub number: Option<u64>,
    pub is_self: bool,
    /// Revision-history head refs for this commit's branch, oldest first,
    /// e.g. `["jaspr/main/abc_01", "jaspr/main/abc_02"]`, alongside the live
    /// head ref. Empty when no revision exists yet.
    pub history_refs: Vec<String>,
}

/// Everything the builder needs beyond the commit itself: host/owner/repo
/// for compare links, and the HEAD-first stack rows.
pub struct PrBodyInputs<'a> {
    pub commit: &'a Commit,
    pub host: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
    pub rows_head_first: &'a [StackRow<'a>],
}

/// Build the full generated region for one PR (spec §4.5 items 1-4).
pub fn build(inputs: &PrBodyInputs) -> String {
    let (subject, body) = subject_body(&inputs.commit.full_message);
    let mut out = String::new();
    out.push_str(&format!("### {subject}\n"));
    if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
        out.push('\n');
        out.push_str(body.trim_end());
        out.push('\n');
    }

    out.push_str("\n**Stack**:\n");
    for row in inputs.rows_head_first {
        let number_text = row
            .number
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| format!("`{}`", row.commit_id));
        let marker = if row.is_self { " \u{2B05}" } else { "" };
        out.push_str(&format!("- {number_text}{marker}\n"));

        if let Some(links) = compare_links(inputs.host, inputs.owner, inputs.repo, &row.history_refs) {
            out.push_str(&format!("  - {links}\n"));
        }
    }

    out.push_str(MANUAL_MERGE_WARNING);
    out
}

/// Render `[<old>..<new>](.../compare/<old>..<new>)` links joining successive
/// pairs from the revision chain, newest-pair-first. Given
/// `[headRef, headRef_01, headRef_02]` (oldest-to-newest is the caller's job
/// to pass in reverse), the pairs compared are
/// `(headRef_02, headRef), (headRef_01, headRef_02)` — i.e. "highest to
/// lowest" per spec §4.5 item 3: current live ref first, then each
/// progressively older snapshot.
fn compare_links(host: &str, owner: &str, repo: &str, refs_oldest_first: &[String]) -> Option<String> {
    if refs_oldest_first.len() < 2 {
        return None;
    }
    let mut pairs: Vec<(String, String)> = refs_oldest_first
        .windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect();
    pairs.reverse();
    Some(
        pairs
            .into_iter()
            .map(|(old, new)| {
                format!("[{old}..{new}](https://{host}/{owner}/{repo}/compare/{old}..{new})")
            })
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Rewrite a PR body: keep everything above [`START_MARKER`] verbatim
/// (absent on a brand-new PR, in which case there is nothing to preserve),
/// replace everything from the marker onward with the freshly built
/// generated region.
pub fn rewrite(existing_body: &str, generated: &str) -> String {
    let preserved = existing_body
        .find(START_MARKER)
        .map(|idx| existing_body[..idx].trim_end())
        .unwrap_or("");

    if preserved.is_empty() {
        format!("{START_MARKER}\n{generated}")
    } else {
        format!("{preserved}\n\n{START_MARKER}\n{generated}")
    }
}

/// Construct the HEAD-first stack rows for one pass of the builder (spec
/// §4.6 step 11: "first pass" before PR numbers exist, "second pass" with
/// them populated). `numbers` maps commit_id -> assigned PR number; absent
/// entries render as a bare commit-id placeholder.
pub fn build_rows<'a>(
    stack_head_first: &[&'a Commit],
    self_commit_id: &str,
    numbers: &std::collections::HashMap<String, u64>,
    history_refs_by_id: &std::collections::HashMap<String, Vec<String>>,
) -> Vec<StackRow<'a>> {
    stack_head_first
        .iter()
        .map(|c| {
            let id = c.id_or_empty();
            StackRow {
                commit_id: id,
                number: numbers.get(id).copied(),
                is_self: id == self_commit_id,
                history_refs: history_refs_by_id.get(id).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

/// Draft detection shared by push (for the `is_draft` flag) and status (for
/// the Ready-for-review flag): a commit whose subject matches
/// `^(draft|wip)\b` is marked draft at push time (spec §4.4 item 4).
pub fn is_draft_subject(subject: &str) -> bool {
    crate::re!(r"(?i)^(draft|wip)\b").is_match(subject)
}
