//! Merge engine (spec §4.7): validate mergeability, push the stack head to
//! the target branch, rebase dependent PRs onto it, then delete the merged
//! per-commit branches and their revision-history siblings.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{JasprError, Result};
use crate::forge::ForgeClient;
use crate::git::{GitClient, RefSpec};
use crate::model::{PullRequest, Stack};
use crate::push::apply_dont_push_filter;
use crate::refs;

pub struct MergeInputs<'a> {
    pub local_ref: &'a str,
    pub target_ref: &'a str,
    pub count: Option<i64>,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub merged_commit_ids: Vec<String>,
    pub rebased_prs: Vec<PullRequest>,
    pub deleted_branches: Vec<String>,
}

const BRANCH_DELETE_RETRIES: u32 = 3;
const BRANCH_DELETE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long to wait after pushing the merge commit before deleting branches,
/// giving the forge time to observe the merged PRs (spec §4.7 step 7).
const MERGE_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub fn merge<G: GitClient, F: ForgeClient>(
    git: &G,
    forge: &F,
    settings: &Settings,
    inputs: &MergeInputs,
) -> Result<MergeOutcome> {
    // Step 1: fetch, refuse if local_ref is behind target.
    git.fetch(&settings.remote, true)?;
    let remote_target = format!("{}/{}", settings.remote, inputs.target_ref);
    let behind = git.log_range(inputs.local_ref, &remote_target)?;
    if !behind.is_empty() {
        return Err(JasprError::StackBehindTarget {
            remote: settings.remote.clone(),
            target: inputs.target_ref.to_string(),
            behind_by: behind.len(),
        });
    }

    // Step 2: compute the stack, apply the don't-push filter, and refuse
    // unless every surviving commit is mergeable.
    let raw = git.get_local_commit_stack(&settings.remote, inputs.local_ref, inputs.target_ref)?;
    let sliced = crate::model::slice_by_count(raw, inputs.count)?;
    let filtered = apply_dont_push_filter(&sliced, &settings.dont_push_pattern)?;
    if filtered.is_empty() {
        return Err(JasprError::EmptyStack);
    }
    let stack = Stack::new(filtered);

    let all_prs = forge.get_pull_requests(None)?;
    let target_prs: Vec<PullRequest> =
        refs::filter_prs_for_target(&all_prs, &settings.branch_prefix, inputs.target_ref)
            .into_iter()
            .cloned()
            .collect();

    let remote_branches = git.get_remote_branches_by_id(&settings.remote)?;
    let live_now = crate::status::live_branches_for_target(
        &remote_branches,
        &settings.branch_prefix,
        inputs.target_ref,
    );

    let mut prs_by_id_owned = std::collections::HashMap::new();
    for pr in &target_prs {
        if let Some(id) = &pr.commit_id {
            prs_by_id_owned.insert(id.clone(), pr.clone());
        }
    }

    for c in &stack.commits {
        let id = c.id_or_empty();
        let not_mergeable = |reason: &str| JasprError::NotMergeable {
            hash: c.hash.clone(),
            subject: c.short_subject.clone(),
            reason: reason.to_string(),
        };

        let pushed = live_now.get(id).is_some_and(|h| *h == c.hash);
        if !pushed {
            return Err(not_mergeable("commit has not been pushed to its per-commit branch"));
        }

        match prs_by_id_owned.get(id) {
            None => return Err(not_mergeable("no open pull request for this commit")),
            Some(pr) if !pr.is_mergeable() => {
                return Err(not_mergeable(
                    "pull request is a draft, not approved, or checks are not passing",
                ));
            }
            Some(_) => {}
        }
    }

    // Step 3: ensure the head PR's base_ref is the target branch.
    let head = stack.head().expect("non-empty stack, checked above");
    let head_id = head.id_or_empty();
    let head_pr = prs_by_id_owned
        .get(head_id)
        .cloned()
        .expect("mergeability check above guarantees a PR for the head commit");
    if head_pr.base_ref != inputs.target_ref {
        let mut retargeted = head_pr.clone();
        retargeted.base_ref = inputs.target_ref.to_string();
        forge.update_pull_request(&retargeted)?;
    }

    // Step 4: atomically push the stack head to the target branch.
    git.push(
        &[RefSpec::update(head.hash.clone(), inputs.target_ref.to_string())],
        &settings.remote,
    )?;

    // Step 5: rebase PRs whose base is any merged per-commit branch onto the
    // target directly.
    let merged_ids: HashSet<&str> = stack.commits.iter().map(|c| c.id_or_empty()).collect();
    let merged_branches: HashSet<String> = merged_ids
        .iter()
        .map(|id| refs::encode_branch(&settings.branch_prefix, inputs.target_ref, id, None))
        .collect();

    let mut rebased = Vec::new();
    for pr in &all_prs {
        let is_dependent = pr
            .commit_id
            .as_deref()
            .is_none_or(|id| !merged_ids.contains(id));
        if is_dependent && merged_branches.contains(&pr.base_ref) {
            let mut updated = pr.clone();
            updated.base_ref = inputs.target_ref.to_string();
            forge.update_pull_request(&updated)?;
            rebased.push(updated);
        }
    }

    // Step 6: let the forge settle merged PRs into the closed state.
    forge.auto_close_prs()?;

    // Step 7: after a short delay, force-delete the merged per-commit
    // branches and their revision-history siblings, retrying on failure.
    thread::sleep(MERGE_SETTLE_DELAY);
    let mut to_delete: Vec<String> = merged_ids
        .iter()
        .map(|id| refs::encode_branch(&settings.branch_prefix, inputs.target_ref, id, None))
        .collect();
    for name in remote_branches.keys() {
        if let Some(r) = refs::parse_branch(name, &settings.branch_prefix) {
            if r.target == inputs.target_ref && r.rev_num.is_some() && merged_ids.contains(r.commit_id.as_str()) {
                to_delete.push(name.clone());
            }
        }
    }

    delete_branches_with_retry(git, &settings.remote, &to_delete)?;

    Ok(MergeOutcome {
        merged_commit_ids: merged_ids.into_iter().map(str::to_string).collect(),
        rebased_prs: rebased,
        deleted_branches: to_delete,
    })
}

fn delete_branches_with_retry<G: GitClient>(git: &G, remote: &str, branches: &[String]) -> Result<()> {
    if branches.is_empty() {
        return Ok(());
    }
    let refspecs: Vec<RefSpec> = branches.iter().cloned().map(RefSpec::delete).collect();
    let mut attempt = 0;
    loop {
        match git.push(&refspecs, remote) {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < BRANCH_DELETE_RETRIES => {
                attempt += 1;
                log::warn!(
                    "branch delete failed (attempt {attempt}/{BRANCH_DELETE_RETRIES}): {e}"
                );
                thread::sleep(BRANCH_DELETE_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}
