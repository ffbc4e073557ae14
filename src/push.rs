//! Push reconciler (spec §4.6): the algorithm that maps a local commit
//! sequence onto per-commit branches, a named-stack pointer, and forge PRs.

use std::collections::HashMap;

use rand::Rng;
use regex::RegexBuilder;

use crate::config::Settings;
use crate::error::{JasprError, Result};
use crate::forge::ForgeClient;
use crate::git::{GitClient, RefSpec};
use crate::model::{Commit, PullRequest, Stack};
use crate::pr_body::{self, PrBodyInputs};
use crate::refs;

pub struct PushInputs<'a> {
    pub local_ref: &'a str,
    pub target_ref: &'a str,
    pub stack_name_override: Option<&'a str>,
    pub count: Option<i64>,
    pub host: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
}

#[derive(Debug)]
pub struct PushOutcome {
    pub stack_name: String,
    pub pushed_branches: Vec<String>,
    pub revision_history_branches: Vec<String>,
    pub created_prs: Vec<PullRequest>,
    pub updated_prs: Vec<PullRequest>,
}

/// 8 random lowercase hex characters, the commit-id stamped by step 2 when a
/// commit reaches the reconciler with no `commit-id:` footer yet.
pub fn random_commit_id(rng: &mut impl Rng) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdef";
    (0..8)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// The caller-provided decision point for spec §4.6 step 13: given the PRs
/// that would be abandoned by this push, return whether to proceed anyway.
pub type AbandonmentPrompt<'a> = dyn FnMut(&[PullRequest]) -> bool + 'a;

/// Run the full push algorithm. Returns `Ok(None)` when the stack is empty
/// either before or after the don't-push filter (spec §4.6 step 3: "Empty
/// result → exit cleanly", not an error).
#[allow(clippy::too_many_arguments)]
pub fn push<G: GitClient, F: ForgeClient + Sync>(
    git: &G,
    forge: &F,
    settings: &Settings,
    rng: &mut impl Rng,
    inputs: &PushInputs,
    on_abandon: &mut AbandonmentPrompt<'_>,
) -> Result<Option<PushOutcome>> {
    if !git.is_working_directory_clean()? {
        return Err(JasprError::DirtyWorkingTree);
    }
    git.fetch(&settings.remote, true)?;

    // Step 1: compute and slice the stack.
    let raw = git.get_local_commit_stack(&settings.remote, inputs.local_ref, inputs.target_ref)?;
    let sliced = crate::model::slice_by_count(raw, inputs.count)?;
    if sliced.is_empty() {
        return Ok(None);
    }

    // Step 2: stamp missing commit ids by resetting to the first gap and
    // replaying the rest via cherry-pick.
    let stamped = stamp_missing_ids(git, rng, inputs.target_ref, &settings.remote, sliced)?;

    // Step 3: don't-push filter.
    let filtered = apply_dont_push_filter(&stamped, &settings.dont_push_pattern)?;
    if filtered.is_empty() {
        return Ok(None);
    }

    // Step 4: refuse on duplicate commit ids.
    let stack = Stack::new(filtered);
    let dups = stack.duplicate_ids();
    if !dups.is_empty() {
        return Err(JasprError::DuplicateCommitIds(dups));
    }

    // Step 5: fetch and filter current PRs.
    let all_prs = forge.get_pull_requests(None)?;
    let target_prs: Vec<PullRequest> = refs::filter_prs_for_target(&all_prs, &settings.branch_prefix, inputs.target_ref)
        .into_iter()
        .cloned()
        .collect();
    let prs_by_commit_id: HashMap<&str, &PullRequest> = target_prs
        .iter()
        .filter_map(|pr| pr.commit_id.as_deref().map(|id| (id, pr)))
        .collect();

    // Step 6: reorder prelude — point any PR whose base is about to change
    // at the target branch first, so no push ever empties a base..head range.
    let expected_bases = expected_base_refs(&stack, &settings.branch_prefix, inputs.target_ref);
    for (commit_id, expected_base) in &expected_bases {
        if let Some(pr) = prs_by_commit_id.get(commit_id.as_str()) {
            if pr.base_ref != *expected_base && pr.base_ref != inputs.target_ref {
                let mut temp = (*pr).clone();
                temp.base_ref = inputs.target_ref.to_string();
                forge.update_pull_request(&temp)?;
            }
        }
    }

    // Steps 7-8: find out-of-date branches and plan revision-history writes.
    let remote_branches = git.get_remote_branches_by_id(&settings.remote)?;
    let live_now = crate::status::live_branches_for_target(
        &remote_branches,
        &settings.branch_prefix,
        inputs.target_ref,
    );
    let mut revision_refspecs = Vec::new();
    let mut lease_expectations = HashMap::new();
    let mut branch_refspecs = Vec::new();
    let mut pushed_branches = Vec::new();

    for c in &stack.commits {
        let id = c.id_or_empty();
        let branch = refs::encode_branch(&settings.branch_prefix, inputs.target_ref, id, None);
        match live_now.get(id) {
            Some(old_hash) if *old_hash != c.hash => {
                let next_nn = next_revision_number(&remote_branches, &settings.branch_prefix, inputs.target_ref, id);
                let history_branch =
                    refs::encode_branch(&settings.branch_prefix, inputs.target_ref, id, Some(next_nn));
                revision_refspecs.push(RefSpec::update(old_hash.clone(), history_branch.clone()));
                lease_expectations.insert(history_branch, None);
                branch_refspecs.push(RefSpec::force_update(c.hash.clone(), branch.clone()));
                pushed_branches.push(branch);
            }
            Some(_) => {} // already up to date, nothing to push
            None => {
                branch_refspecs.push(RefSpec::force_update(c.hash.clone(), branch.clone()));
                pushed_branches.push(branch);
            }
        }
    }

    // Step 9: resolve the effective stack name.
    let named_refs = named_refs_for_target(git, &settings.remote, &settings.named_branch_prefix, inputs.target_ref)?;
    let new_ids: std::collections::HashSet<&str> =
        stack.commits.iter().map(|c| c.id_or_empty()).collect();
    let existing_owner = find_owning_named_stack(git, &settings.remote, inputs.target_ref, &named_refs, &new_ids)?;

    let stack_name = match inputs.stack_name_override {
        Some(name) => name.to_string(),
        None => match &existing_owner {
            Some((name, _)) => name.clone(),
            None => {
                let head_subject = stack.head().map(|c| c.short_subject.as_str()).unwrap_or("");
                let named_refs = named_refs.clone();
                crate::stack_name::unique_name(
                    inputs.target_ref,
                    head_subject,
                    16,
                    rng,
                    |target, candidate| named_refs.iter().any(|(n, t)| n == candidate && t == target),
                )?
            }
        },
    };

    let named_branch = refs::encode_named(&settings.named_branch_prefix, inputs.target_ref, &stack_name);
    let head_hash = stack.head().expect("non-empty stack").hash.clone();
    branch_refspecs.push(RefSpec::force_update(head_hash, named_branch));

    // Step 13: abandonment check, run before any mutation (spec: "before
    // step 10 commits to the push").
    if let Some((_, old_named_ref)) = &existing_owner {
        let old_ids = reachable_commit_ids(git, &settings.remote, inputs.target_ref, old_named_ref)?;
        let dropped: Vec<String> = old_ids.difference(&new_ids.iter().map(|s| s.to_string()).collect()).cloned().collect();
        if !dropped.is_empty() {
            let dropped_prs = forge.get_pull_requests_by_id(Some(&dropped))?;
            if !dropped_prs.is_empty() && !on_abandon(&dropped_prs) {
                return Err(JasprError::AbandonmentDeclined(dropped_prs.len()));
            }
        }
    }

    // Step 10: one atomic push, lease-constrained on the revision-history
    // refs only (they must not already exist).
    let mut all_refspecs = revision_refspecs;
    all_refspecs.extend(branch_refspecs);
    git.push_with_lease(&all_refspecs, &settings.remote, &lease_expectations)?;

    // Step 11: build first-pass PR bodies (no PR numbers yet).
    let rows_no_numbers: Vec<Commit> = stack.commits.clone();
    let refs_head_first: Vec<&Commit> = rows_no_numbers.iter().rev().collect();

    let mut created = Vec::new();
    let mut updated = Vec::new();

    for (prev, current) in stack.pairs() {
        let id = current.id_or_empty();
        let base_ref = prev
            .map(|p| refs::encode_branch(&settings.branch_prefix, inputs.target_ref, p.id_or_empty(), None))
            .unwrap_or_else(|| inputs.target_ref.to_string());
        let head_ref = refs::encode_branch(&settings.branch_prefix, inputs.target_ref, id, None);
        let (title, _) = crate::message::subject_body(&current.full_message);
        let is_draft = pr_body::is_draft_subject(&title);

        let rows = pr_body::build_rows(&refs_head_first, id, &HashMap::new(), &HashMap::new());
        let body = pr_body::build(&PrBodyInputs {
            commit: current,
            host: inputs.host,
            owner: inputs.owner,
            repo: inputs.repo,
            rows_head_first: &rows,
        });
        let existing_body = prs_by_commit_id.get(id).map(|pr| pr.body.as_str()).unwrap_or("");
        let body = pr_body::rewrite(existing_body, &body);

        match prs_by_commit_id.get(id) {
            Some(existing) => {
                if existing.base_ref != base_ref || existing.title != title || existing.body != body {
                    let mut updated_pr = (*existing).clone();
                    updated_pr.base_ref = base_ref;
                    updated_pr.title = title;
                    updated_pr.body = body;
                    updated_pr.is_draft = is_draft;
                    forge.update_pull_request(&updated_pr)?;
                    updated.push(updated_pr);
                }
            }
            None => {
                let pr = PullRequest {
                    forge_id: None,
                    commit_id: Some(id.to_string()),
                    number: None,
                    head_ref,
                    base_ref,
                    title,
                    body,
                    checks: None,
                    approved: None,
                    is_draft,
                    permalink: None,
                };
                created.push(forge.create_pull_request(&pr)?);
            }
        }
    }

    // Step 14: second pass, now that every PR has a number. Every kept or
    // created PR is rewritten, not just the ones whose base/title changed in
    // step 12 — the stack list in its body references *other* PRs' numbers,
    // which were unknown during the first pass no matter what.
    let mut prs_by_id: HashMap<String, PullRequest> = prs_by_commit_id
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).clone()))
        .collect();
    for pr in updated.iter().chain(created.iter()) {
        if let Some(id) = &pr.commit_id {
            prs_by_id.insert(id.clone(), pr.clone());
        }
    }
    let numbers: HashMap<String, u64> = prs_by_id
        .iter()
        .filter_map(|(id, pr)| pr.number.map(|n| (id.clone(), n)))
        .collect();

    let final_updates: Vec<PullRequest> = stack
        .commits
        .iter()
        .filter_map(|c| {
            let id = c.id_or_empty().to_string();
            let mut pr = prs_by_id.get(&id)?.clone();
            let rows = pr_body::build_rows(&refs_head_first, &id, &numbers, &HashMap::new());
            let generated = pr_body::build(&PrBodyInputs {
                commit: c,
                host: inputs.host,
                owner: inputs.owner,
                repo: inputs.repo,
                rows_head_first: &rows,
            });
            let rewritten = pr_body::rewrite(&pr.body, &generated);
            pr.body = rewritten;
            Some(pr)
        })
        .collect();

    // Second-pass body updates are independent of one another (spec §5);
    // a bounded parallel join is correct here.
    use rayon::prelude::*;
    let results: Vec<Result<()>> = final_updates.par_iter().map(|pr| forge.update_pull_request(pr)).collect();
    for r in results {
        r?;
    }

    Ok(Some(PushOutcome {
        stack_name,
        pushed_branches,
        revision_history_branches: lease_expectations.into_keys().collect(),
        created_prs: created,
        updated_prs: updated,
    }))
}

fn stamp_missing_ids<G: GitClient>(
    git: &G,
    rng: &mut impl Rng,
    target_ref: &str,
    remote: &str,
    stack: Vec<Commit>,
) -> Result<Vec<Commit>> {
    let Some(idx) = stack.iter().position(|c| c.id.is_none()) else {
        return Ok(stack);
    };

    let reset_point = if idx == 0 {
        format!("{remote}/{target_ref}")
    } else {
        stack[idx - 1].hash.clone()
    };
    git.reset(&reset_point)?;

    let mut rebuilt = stack[..idx].to_vec();
    for c in &stack[idx..] {
        let picked = git.cherry_pick(&c.hash, Some(&c.author), Some(&c.committer))?;
        let final_commit = if picked.id.is_none() {
            let id = random_commit_id(rng);
            git.set_commit_id(&id, Some(&picked.author), Some(&picked.committer))?
        } else {
            picked
        };
        rebuilt.push(final_commit);
    }
    Ok(rebuilt)
}

/// Drop the lowest-indexed commit matching the don't-push regex and
/// everything above it (spec §4.6 step 3).
/// Shared with `merge` and `automerge`, which apply the same filter before
/// checking mergeability.
pub(crate) fn apply_dont_push_filter(stack: &[Commit], pattern: &str) -> Result<Vec<Commit>> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| JasprError::Git(format!("invalid don't-push pattern: {e}")))?;
    match stack.iter().position(|c| re.is_match(&c.short_subject)) {
        Some(idx) => {
            if idx < stack.len() {
                log::info!(
                    "don't-push filter excludes {} commit(s) from {}",
                    stack.len() - idx,
                    stack[idx].hash
                );
            }
            Ok(stack[..idx].to_vec())
        }
        None => Ok(stack.to_vec()),
    }
}

/// Stricter than [`apply_dont_push_filter`]: also drops every commit from
/// the first one whose existing PR is `is_draft` upward (spec §4.8 step 1,
/// used only by auto-merge — an ordinary `push`/`merge` still reconciles a
/// draft PR, it just can't be auto-merged while it stays one).
pub(crate) fn apply_draft_filter(stack: &[Commit], prs_by_commit_id: &HashMap<&str, &PullRequest>) -> Vec<Commit> {
    match stack
        .iter()
        .position(|c| prs_by_commit_id.get(c.id_or_empty()).is_some_and(|pr| pr.is_draft))
    {
        Some(idx) => {
            if idx < stack.len() {
                log::info!(
                    "auto-merge draft filter excludes {} commit(s) from {}",
                    stack.len() - idx,
                    stack[idx].hash
                );
            }
            stack[..idx].to_vec()
        }
        None => stack.to_vec(),
    }
}

fn expected_base_refs(stack: &Stack, prefix: &str, target: &str) -> HashMap<String, String> {
    stack
        .pairs()
        .map(|(prev, current)| {
            let base = prev
                .map(|p| refs::encode_branch(prefix, target, p.id_or_empty(), None))
                .unwrap_or_else(|| target.to_string());
            (current.id_or_empty().to_string(), base)
        })
        .collect()
}

fn next_revision_number(
    remote_branches: &HashMap<String, String>,
    prefix: &str,
    target: &str,
    commit_id: &str,
) -> u32 {
    remote_branches
        .keys()
        .filter_map(|name| refs::parse_branch(name, prefix))
        .filter(|r| r.target == target && r.commit_id == commit_id)
        .filter_map(|r| r.rev_num)
        .max()
        .map(|n| n + 1)
        .unwrap_or(1)
}

fn named_refs_for_target<G: GitClient>(
    git: &G,
    remote: &str,
    named_prefix: &str,
    target: &str,
) -> Result<Vec<(String, String)>> {
    Ok(git
        .get_remote_branches(remote)?
        .into_iter()
        .filter_map(|name| {
            let decoded = refs::parse_named(&name, named_prefix)?;
            (decoded.target == target).then_some((decoded.stack_name, name))
        })
        .collect())
}

/// Resolve the unique named stack (if any) that already owns one of
/// `new_ids`, per spec §9: "a commit-id is owned by a named stack iff it
/// appears in exactly that one stack's target..stack range" — ambiguity (two
/// named stacks both owning an id) surfaces as no ownership, not a guess.
fn find_owning_named_stack<G: GitClient>(
    git: &G,
    remote: &str,
    target: &str,
    named_refs: &[(String, String)],
    new_ids: &std::collections::HashSet<&str>,
) -> Result<Option<(String, String)>> {
    let mut owners = Vec::new();
    for (name, branch) in named_refs {
        let ids = reachable_commit_ids(git, remote, target, branch)?;
        if new_ids.iter().any(|id| ids.contains(*id)) {
            owners.push((name.clone(), branch.clone()));
        }
    }
    Ok(match owners.len() {
        1 => Some(owners.into_iter().next().unwrap()),
        _ => None,
    })
}

fn reachable_commit_ids<G: GitClient>(
    git: &G,
    remote: &str,
    target: &str,
    named_branch: &str,
) -> Result<std::collections::HashSet<String>> {
    let since = format!("{remote}/{target}");
    let until = format!("{remote}/{named_branch}");
    Ok(git
        .log_range(&since, &until)?
        .into_iter()
        .filter_map(|c| c.id)
        .collect())
}
