//! Status engine (spec §4.4): computes, per commit, the six status flags
//! and renders them as a fixed-key glyph table, HEAD-first.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::model::{CheckState, Commit, PullRequest, Stack};
use crate::refs;

/// The six glyphs the table is built from. `Unknown` is the renderer's
/// catch-all for "a flag's prerequisite forge data could not be determined
/// at all" (as opposed to [`Glyph::Dash`], used when the prerequisite object
/// — e.g. a PR — simply doesn't exist). The spec's prose documents, per
/// flag, only the glyphs that flag can actually take; `Unknown` is reserved
/// for forge responses that are present but unclassifiable (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Yes,
    No,
    Pending,
    Unknown,
    Dash,
    Problem,
}

impl fmt::Display for Glyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ch = match self {
            Glyph::Yes => '\u{2705}',     // ✅
            Glyph::No => '\u{274C}',      // ❌
            Glyph::Pending => '\u{231B}', // ⌛
            Glyph::Unknown => '\u{2753}', // ❓
            Glyph::Dash => '\u{3458}',    // ㄧ
            Glyph::Problem => '\u{2757}', // ❗
        };
        write!(f, "{ch}")
    }
}

#[derive(Debug, Clone)]
pub struct CommitStatus {
    pub hash: String,
    pub subject: String,
    pub commit_id: Option<String>,
    pub pushed: Glyph,
    pub pr_exists: Glyph,
    pub checks: Glyph,
    pub ready_for_review: Glyph,
    pub approved: Glyph,
    pub stack_check: Glyph,
    pub pr_number: Option<u64>,
}

fn all_five_ok(row: &CommitStatus) -> bool {
    row.pushed == Glyph::Yes
        && row.pr_exists == Glyph::Yes
        && row.checks == Glyph::Yes
        && row.ready_for_review == Glyph::Yes
        && row.approved == Glyph::Yes
}

/// Inputs needed to compute status, independent of how the caller fetched
/// them (a real `GitClient`/`ForgeClient` pair, or in-memory test fakes).
pub struct StatusInputs<'a> {
    pub stack: &'a Stack,
    pub prefix: &'a str,
    pub target: &'a str,
    /// Live (non-revision) per-commit branch hashes, `commit_id -> hash`.
    pub live_branches: &'a HashMap<String, String>,
    /// PRs already filtered to this target via [`refs::filter_prs_for_target`].
    pub prs: &'a [PullRequest],
    /// How many commits `local_ref` is behind `<remote>/<target>`.
    pub behind_by: usize,
}

pub fn compute(inputs: &StatusInputs) -> Vec<CommitStatus> {
    let duplicate_ids: HashSet<&str> = inputs
        .stack
        .duplicate_ids()
        .iter()
        .map(|d| d.commit_id.as_str())
        .collect::<Vec<_>>()
        .into_iter()
        .collect();
    // Re-derive as owned set keyed by commit id string for cheap lookups.
    let duplicate_ids: HashSet<String> = duplicate_ids.iter().map(|s| s.to_string()).collect();

    let mut rows = Vec::with_capacity(inputs.stack.len());
    let mut all_ok_so_far = inputs.behind_by == 0;

    for commit in &inputs.stack.commits {
        let commit_id = commit.id.clone();

        let pushed = match &commit_id {
            Some(id) if duplicate_ids.contains(id) => Glyph::Problem,
            Some(id) => match inputs.live_branches.get(id) {
                Some(remote_hash) if *remote_hash == commit.hash => Glyph::Yes,
                Some(_) => Glyph::Problem,
                None => Glyph::Dash,
            },
            None => Glyph::Dash,
        };

        let pr = commit_id
            .as_deref()
            .and_then(|id| inputs.prs.iter().find(|pr| pr.commit_id.as_deref() == Some(id)));

        let pr_exists = if pr.is_some() { Glyph::Yes } else { Glyph::Dash };

        // An unrecognized check-suite state (`checks == None` despite a PR
        // existing) is left as Dash, not Pending: spec §9 Open Questions is
        // explicit that "unknown" must not be promoted to pending.
        let checks = match pr.and_then(|pr| pr.checks) {
            Some(CheckState::Success) => Glyph::Yes,
            Some(CheckState::Failure) => Glyph::No,
            Some(CheckState::Pending) => Glyph::Pending,
            None => Glyph::Dash,
        };

        let ready_for_review = match pr {
            Some(pr) if !pr.is_draft => Glyph::Yes,
            _ => Glyph::Dash,
        };

        let approved = match pr.and_then(|pr| pr.approved) {
            Some(true) => Glyph::Yes,
            Some(false) => Glyph::No,
            _ => Glyph::Dash,
        };

        let mut row = CommitStatus {
            hash: commit.hash.clone(),
            subject: commit.short_subject.clone(),
            commit_id,
            pushed,
            pr_exists,
            checks,
            ready_for_review,
            approved,
            stack_check: Glyph::Dash,
            pr_number: pr.and_then(|pr| pr.number),
        };

        row.stack_check = if inputs.behind_by > 0 {
            Glyph::Dash
        } else if all_ok_so_far {
            Glyph::Yes
        } else {
            Glyph::Dash
        };

        all_ok_so_far = all_ok_so_far && all_five_ok(&row);
        rows.push(row);
    }

    rows
}

const KEY_HEADER: &str = "\
Legend: ✅ good   ❌ failing   ⌛ pending   ❓ unknown   ㄧ n/a   ❗ problem
Columns: Pushed | PR | Checks | Ready | Approved | Stack
--------------------------------------------------------------------
";

/// Information about the single named stack that owns this stack, if any
/// (spec §4.4: "the stack is owned by exactly one NamedStackRef").
pub struct NamedStackOwnership {
    pub stack_name: String,
    pub ahead: usize,
    pub behind: usize,
}

pub struct Warnings<'a> {
    pub remote: &'a str,
    pub target: &'a str,
    pub behind_by: usize,
    pub duplicates: &'a [crate::error::DuplicateId],
    pub ownership: Option<&'a NamedStackOwnership>,
}

/// Render the status table HEAD-first with the fixed key header, followed
/// by any warnings (spec §4.4).
pub fn render(rows: &[CommitStatus], warnings: &Warnings) -> String {
    let mut out = String::new();
    out.push_str(KEY_HEADER);

    for row in rows.iter().rev() {
        let pr_col = row
            .pr_number
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{} {} {} {} {} {}  {}  {}\n",
            row.pushed,
            row.pr_exists,
            row.checks,
            row.ready_for_review,
            row.approved,
            row.stack_check,
            pr_col,
            row.subject,
        ));
    }

    if warnings.behind_by > 0 {
        out.push_str(&format!(
            "\nWarning: local branch is {} commit(s) behind {}/{}. Run `git rebase {}/{}`.\n",
            warnings.behind_by, warnings.remote, warnings.target, warnings.remote, warnings.target
        ));
    }

    if !warnings.duplicates.is_empty() {
        out.push_str("\nDuplicate commit-id(s) found; amend the affected commits:\n");
        for dup in warnings.duplicates {
            out.push_str(&format!(
                "  - {}: {} commits share this id\n",
                dup.commit_id,
                dup.hashes.len()
            ));
        }
    }

    if let Some(ownership) = warnings.ownership {
        out.push_str(&format!(
            "\nStack: {} (ahead {}, behind {})\n",
            ownership.stack_name, ownership.ahead, ownership.behind
        ));
    }

    out
}

/// Build the `live_branches` map this module expects, from a flat remote
/// branch-name -> hash mapping (as `GitClient::get_remote_branches_by_id`
/// returns) scoped to `prefix`/`target`, revision-history branches excluded.
pub fn live_branches_for_target(
    remote_branches: &HashMap<String, String>,
    prefix: &str,
    target: &str,
) -> HashMap<String, String> {
    remote_branches
        .iter()
        .filter_map(|(name, hash)| {
            let r = refs::parse_branch(name, prefix)?;
            (r.target == target && r.rev_num.is_none()).then_some((r.commit_id, hash.clone()))
        })
        .collect()
}
