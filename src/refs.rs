//! Ref encoder (spec §4.1): the three remote-ref schemes this tool writes —
//! per-commit branches, their revision-history snapshots, and named-stack
//! pointers.

use crate::model::{NamedStackRef, RemoteRef};

/// `prefix/target/commit_id` or `prefix/target/commit_id_NN`.
pub fn encode_branch(prefix: &str, target: &str, commit_id: &str, rev_num: Option<u32>) -> String {
    match rev_num {
        None => format!("{prefix}/{target}/{commit_id}"),
        Some(n) => format!("{prefix}/{target}/{commit_id}_{n:02}"),
    }
}

/// Inverse of [`encode_branch`]. Succeeds only when `name` begins with
/// `prefix/`. The segment after the last `/` splits on the final `_` into
/// `(commit_id, rev_num)`; if the suffix after the last `_` is not exactly
/// two ASCII digits, the whole segment is the commit id and `rev_num` is
/// `None`. This is deliberately ambiguous for a commit id that itself ends
/// in `_NN`: such an id only round-trips when it was never given a revision
/// number (spec §4.1 edge cases).
pub fn parse_branch(name: &str, prefix: &str) -> Option<RemoteRef> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('/')?;
    let (target, segment) = rest.rsplit_once('/')?;
    if target.is_empty() || segment.is_empty() {
        return None;
    }

    let (commit_id, rev_num) = match segment.rsplit_once('_') {
        Some((id, suffix)) if is_two_digit(suffix) && !id.is_empty() => {
            (id.to_string(), Some(suffix.parse::<u32>().unwrap()))
        }
        _ => (segment.to_string(), None),
    };

    Some(RemoteRef {
        target: target.to_string(),
        commit_id,
        rev_num,
    })
}

fn is_two_digit(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit())
}

/// `named_prefix/target/stack_name`. `stack_name` may itself contain `/`.
pub fn encode_named(named_prefix: &str, target: &str, stack_name: &str) -> String {
    format!("{named_prefix}/{target}/{stack_name}")
}

/// Inverse of [`encode_named`]. The `target` is the first segment after the
/// prefix; everything after that (which may contain further `/`) is the
/// stack name.
pub fn parse_named(name: &str, named_prefix: &str) -> Option<NamedStackRef> {
    let rest = name.strip_prefix(named_prefix)?.strip_prefix('/')?;
    let (target, stack_name) = rest.split_once('/')?;
    if target.is_empty() || stack_name.is_empty() {
        return None;
    }
    Some(NamedStackRef {
        target: target.to_string(),
        stack_name: stack_name.to_string(),
    })
}

/// Whether a PR belongs to the reconciliation chain for `target`: its
/// `head_ref` must decode (under `prefix`) to `target`, and its `base_ref`
/// must be either `target` itself or a per-commit branch for the same
/// target. PRs that fail this — e.g. manually opened against another branch
/// — are invisible to push, status, and clean alike (spec §4.6 step 5, §8).
pub fn is_pr_for_target(pr: &crate::model::PullRequest, prefix: &str, target: &str) -> bool {
    let head_target = parse_branch(&pr.head_ref, prefix).map(|r| r.target);
    if head_target.as_deref() != Some(target) {
        return false;
    }
    if pr.base_ref == target {
        return true;
    }
    parse_branch(&pr.base_ref, prefix)
        .map(|r| r.target == target)
        .unwrap_or(false)
}

/// Filter `prs` down to those [`is_pr_for_target`] accepts.
pub fn filter_prs_for_target<'a>(
    prs: &'a [crate::model::PullRequest],
    prefix: &str,
    target: &str,
) -> Vec<&'a crate::model::PullRequest> {
    prs.iter()
        .filter(|pr| is_pr_for_target(pr, prefix, target))
        .collect()
}
