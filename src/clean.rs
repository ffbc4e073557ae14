//! Clean planner (spec §4.9): computes the orphaned, empty-named-stack, and
//! abandoned branch sets and deletes them in a single push.

use std::collections::HashSet;

use crate::config::Settings;
use crate::error::Result;
use crate::forge::ForgeClient;
use crate::git::{GitClient, RefSpec};
use crate::model::{Ident, PullRequest};
use crate::refs;

pub struct CleanInputs {
    pub clean_abandoned_prs: bool,
    pub clean_all_commits: bool,
}

#[derive(Debug, Default)]
pub struct CleanOutcome {
    pub orphaned: Vec<String>,
    pub empty_named: Vec<String>,
    pub abandoned: Vec<String>,
    pub closed_prs: Vec<PullRequest>,
}

impl CleanOutcome {
    fn deleted_branches(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .orphaned
            .iter()
            .chain(&self.empty_named)
            .chain(&self.abandoned)
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

pub fn clean<G: GitClient, F: ForgeClient>(
    git: &G,
    forge: &F,
    settings: &Settings,
    inputs: &CleanInputs,
) -> Result<CleanOutcome> {
    git.fetch(&settings.remote, true)?;

    let plan = compute_plan(git, forge, settings, inputs)?;

    let plan = if inputs.clean_abandoned_prs && !plan.abandoned.is_empty() {
        let all_prs = forge.get_pull_requests(None)?;
        let mut closed = Vec::new();
        for branch in &plan.abandoned {
            let Some(r) = refs::parse_branch(branch, &settings.branch_prefix) else {
                continue;
            };
            if let Some(pr) = all_prs
                .iter()
                .find(|pr| pr.commit_id.as_deref() == Some(r.commit_id.as_str()))
            {
                forge.close_pull_request(pr)?;
                closed.push(pr.clone());
            }
        }

        // Closing those PRs may have just orphaned the same branches (or
        // others); recompute rather than trust the pre-close snapshot (spec
        // §4.9: "first close those PRs... then recompute the plan").
        let mut recomputed = compute_plan(git, forge, settings, inputs)?;
        let abandoned_set: HashSet<&String> = plan.abandoned.iter().collect();
        recomputed.orphaned.retain(|b| !abandoned_set.contains(b));
        recomputed.abandoned = plan.abandoned;
        recomputed.closed_prs = closed;
        recomputed
    } else {
        plan
    };

    let to_delete = plan.deleted_branches();
    if !to_delete.is_empty() {
        let refspecs: Vec<RefSpec> = to_delete.into_iter().map(RefSpec::delete).collect();
        git.push(&refspecs, &settings.remote)?;
    }

    Ok(plan)
}

fn compute_plan<G: GitClient, F: ForgeClient>(
    git: &G,
    forge: &F,
    settings: &Settings,
    inputs: &CleanInputs,
) -> Result<CleanOutcome> {
    let remote_branches = git.get_remote_branches_by_id(&settings.remote)?;
    let all_prs = forge.get_pull_requests(None)?;

    let has_open_pr = |commit_id: &str, target: &str| -> bool {
        all_prs.iter().any(|pr| {
            pr.commit_id.as_deref() == Some(commit_id) && refs::is_pr_for_target(pr, &settings.branch_prefix, target)
        })
    };

    let named_refs: Vec<(String, crate::model::NamedStackRef)> = remote_branches
        .keys()
        .filter_map(|name| refs::parse_named(name, &settings.named_branch_prefix).map(|r| (name.clone(), r)))
        .collect();

    let mut orphaned = Vec::new();
    for (name, hash) in &remote_branches {
        let Some(r) = refs::parse_branch(name, &settings.branch_prefix) else {
            continue;
        };
        let _ = hash;
        if !has_open_pr(&r.commit_id, &r.target) {
            orphaned.push(name.clone());
        }
    }

    let mut empty_named = Vec::new();
    for (name, named) in &named_refs {
        let since = format!("{}/{}", settings.remote, named.target);
        let until = format!("{}/{}", settings.remote, name);
        if git.log_range(&since, &until)?.is_empty() {
            empty_named.push(name.clone());
        }
    }

    let mut abandoned = Vec::new();
    if inputs.clean_abandoned_prs {
        // `reachable[target]` = commit-ids reachable from any NamedStackRef's
        // `target..named` range for that target.
        let mut reachable: std::collections::HashMap<String, HashSet<String>> = std::collections::HashMap::new();
        for (name, named) in &named_refs {
            let since = format!("{}/{}", settings.remote, named.target);
            let until = format!("{}/{}", settings.remote, name);
            let ids: HashSet<String> = git.log_range(&since, &until)?.into_iter().filter_map(|c| c.id).collect();
            reachable.entry(named.target.clone()).or_default().extend(ids);
        }

        for name in remote_branches.keys() {
            let Some(r) = refs::parse_branch(name, &settings.branch_prefix) else {
                continue;
            };
            if r.rev_num.is_some() {
                continue; // revision-history siblings aren't independently abandoned
            }
            if !has_open_pr(&r.commit_id, &r.target) {
                continue;
            }
            let reachable_for_target = reachable.get(&r.target);
            let is_reachable = reachable_for_target.is_some_and(|ids| ids.contains(&r.commit_id));
            if !is_reachable {
                abandoned.push(name.clone());
            }
        }
    }

    if !inputs.clean_all_commits {
        let me = git.current_user_ident()?;
        orphaned = filter_by_author(git, &remote_branches, orphaned, &me)?;
        abandoned = filter_by_author(git, &remote_branches, abandoned, &me)?;
    }

    Ok(CleanOutcome {
        orphaned,
        empty_named,
        abandoned,
        closed_prs: Vec::new(),
    })
}

/// Keep only branches whose remote tip's *author* (not committer — rebase
/// and amend change the committer, spec §9 "Authorship in clean") matches
/// `me`.
fn filter_by_author<G: GitClient>(
    git: &G,
    remote_branches: &std::collections::HashMap<String, String>,
    branches: Vec<String>,
    me: &Ident,
) -> Result<Vec<String>> {
    if branches.is_empty() {
        return Ok(branches);
    }
    let hashes: Vec<String> = branches
        .iter()
        .map(|b| remote_branches.get(b).cloned().unwrap_or_default())
        .collect();
    let commits = git.get_commits(&hashes)?;
    let by_hash: std::collections::HashMap<&str, &crate::model::Commit> =
        commits.iter().map(|c| (c.hash.as_str(), c)).collect();

    Ok(branches
        .into_iter()
        .zip(hashes)
        .filter(|(_, hash)| by_hash.get(hash.as_str()).is_some_and(|c| c.author == *me))
        .map(|(branch, _)| branch)
        .collect())
}
