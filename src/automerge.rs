//! Auto-merge loop (spec §4.8): poll a stack's status until every commit is
//! mergeable, then merge it, all from a disposable scratch clone so the
//! caller's working directory is never touched until the final merge.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{JasprError, Result};
use crate::forge::ForgeClient;
use crate::git::GitClient;
use crate::merge::{self, MergeInputs, MergeOutcome};
use crate::model::{PullRequest, Stack, slice_by_count};
use crate::push::{apply_dont_push_filter, apply_draft_filter};
use crate::refs;
use crate::status::{self, CommitStatus, Glyph, StatusInputs};
use crate::cmd;
use crate::util::CommandExt as _;

pub struct AutoMergeInputs<'a> {
    pub local_ref: &'a str,
    pub target_ref: &'a str,
    pub count: Option<i64>,
}

fn row_is_mergeable(row: &CommitStatus) -> bool {
    row.pushed == Glyph::Yes
        && row.pr_exists == Glyph::Yes
        && row.checks == Glyph::Yes
        && row.ready_for_review == Glyph::Yes
        && row.approved == Glyph::Yes
}

fn row_is_definitively_blocked(row: &CommitStatus) -> bool {
    row.checks == Glyph::No || row.approved == Glyph::No
}

/// Poll `scratch_git` until the stack is fully mergeable, then invoke the
/// actual merge against `origin_git` (spec §4.8 steps 1-4). Generic over
/// `GitClient`/`ForgeClient` so the polling logic is testable without a real
/// clone; [`run_in_scratch_clone`] supplies the real-git wiring.
#[allow(clippy::too_many_arguments)]
pub fn auto_merge_loop<G: GitClient, F: ForgeClient>(
    scratch_git: &G,
    origin_git: &G,
    forge: &F,
    settings: &Settings,
    inputs: &AutoMergeInputs,
    max_attempts: u32,
    poll_interval: Duration,
    mut on_tick: impl FnMut(&[CommitStatus], u32),
    mut sleep: impl FnMut(Duration),
) -> Result<MergeOutcome> {
    let mut attempt = 0u32;
    loop {
        scratch_git.fetch(&settings.remote, true)?;

        let remote_target = format!("{}/{}", settings.remote, inputs.target_ref);
        let behind = scratch_git.log_range(inputs.local_ref, &remote_target)?;
        if !behind.is_empty() {
            return Err(JasprError::StackBehindTarget {
                remote: settings.remote.clone(),
                target: inputs.target_ref.to_string(),
                behind_by: behind.len(),
            });
        }

        let raw = scratch_git.get_local_commit_stack(&settings.remote, inputs.local_ref, inputs.target_ref)?;
        let sliced = slice_by_count(raw, inputs.count)?;
        let dont_push_filtered = apply_dont_push_filter(&sliced, &settings.dont_push_pattern)?;
        if dont_push_filtered.is_empty() {
            return Err(JasprError::EmptyStack);
        }

        let all_prs = forge.get_pull_requests(None)?;
        let target_prs: Vec<PullRequest> =
            refs::filter_prs_for_target(&all_prs, &settings.branch_prefix, inputs.target_ref)
                .into_iter()
                .cloned()
                .collect();
        let prs_by_commit_id: std::collections::HashMap<&str, &PullRequest> = target_prs
            .iter()
            .filter_map(|pr| pr.commit_id.as_deref().map(|id| (id, pr)))
            .collect();

        let draft_filtered = apply_draft_filter(&dont_push_filtered, &prs_by_commit_id);
        if draft_filtered.len() < dont_push_filtered.len() {
            let blocked = &dont_push_filtered[draft_filtered.len()];
            return Err(JasprError::NotMergeable {
                hash: blocked.hash.clone(),
                subject: blocked.short_subject.clone(),
                reason: "its pull request is a draft; auto-merge will not wait for it to be marked ready for review".to_string(),
            });
        }
        let stack = Stack::new(draft_filtered);

        let remote_branches = scratch_git.get_remote_branches_by_id(&settings.remote)?;
        let live_now = status::live_branches_for_target(&remote_branches, &settings.branch_prefix, inputs.target_ref);

        let rows = status::compute(&StatusInputs {
            stack: &stack,
            prefix: &settings.branch_prefix,
            target: inputs.target_ref,
            live_branches: &live_now,
            prs: &target_prs,
            behind_by: 0,
        });

        if rows.iter().all(row_is_mergeable) {
            let outcome = merge::merge(
                origin_git,
                forge,
                settings,
                &MergeInputs {
                    local_ref: inputs.local_ref,
                    target_ref: inputs.target_ref,
                    count: inputs.count,
                },
            )?;
            origin_git.fetch(&settings.remote, true)?;
            return Ok(outcome);
        }

        if let Some(blocked) = rows.iter().find(|r| row_is_definitively_blocked(r)) {
            return Err(JasprError::NotMergeable {
                hash: blocked.hash.clone(),
                subject: blocked.subject.clone(),
                reason: "checks failed or review was not approved; auto-merge will not recover from this without a new push".to_string(),
            });
        }

        on_tick(&rows, attempt);

        attempt += 1;
        if attempt >= max_attempts {
            let head = rows.last();
            return Err(JasprError::NotMergeable {
                hash: head.map(|r| r.hash.clone()).unwrap_or_default(),
                subject: head.map(|r| r.subject.clone()).unwrap_or_default(),
                reason: format!("exceeded {max_attempts} polling attempt(s) waiting for checks/review"),
            });
        }
        sleep(poll_interval);
    }
}

/// Run the auto-merge loop from a disposable scratch clone of `remote_uri`,
/// per spec §9: "Auto-merge operates on a clone... Implementations MUST add
/// the user's working directory as a second remote to ensure unpushed
/// commits are visible in the clone." `original_root` is added as that
/// second remote (named `local-origin`) so `local_ref` resolves there even
/// when it hasn't been pushed. On success the scratch directory is removed;
/// on failure it's left on disk and its path logged, for postmortem.
pub fn run_in_scratch_clone<F: ForgeClient>(
    original_root: &Path,
    remote_uri: &str,
    forge: &F,
    settings: &Settings,
    inputs: &AutoMergeInputs,
    max_attempts: u32,
    poll_interval: Duration,
    mut on_tick: impl FnMut(&[CommitStatus], u32),
    mut sleep: impl FnMut(Duration),
) -> Result<MergeOutcome> {
    let scratch = tempfile::Builder::new()
        .prefix("jaspr-automerge-")
        .tempdir()
        .map_err(|e| JasprError::CloneFailed(e.to_string()))?;

    let clone_status = cmd!("git", "clone", remote_uri, scratch.path().display())
        .stderr(Stdio::piped())
        .unwrap_output();
    if !clone_status.status.success() {
        let path = scratch.into_path();
        return Err(JasprError::CloneFailed(format!(
            "git clone failed ({}); scratch workspace retained at {}",
            String::from_utf8_lossy(&clone_status.stderr),
            path.display()
        )));
    }

    let scratch_root: PathBuf = scratch.path().to_path_buf();
    let second_remote = "local-origin";

    let remote_add = cmd!(
        "git -C",
        scratch_root.display(),
        "remote",
        "add",
        second_remote,
        original_root.display()
    )
    .stderr(Stdio::piped())
    .unwrap_output();
    if !remote_add.status.success() {
        let path = scratch.into_path();
        return Err(JasprError::CloneFailed(format!(
            "failed to add {second_remote} remote ({}); scratch workspace retained at {}",
            String::from_utf8_lossy(&remote_add.stderr),
            path.display()
        )));
    }

    let fetch_local = cmd!("git -C", scratch_root.display(), "fetch", second_remote)
        .stderr(Stdio::piped())
        .unwrap_output();
    if !fetch_local.status.success() {
        let path = scratch.into_path();
        return Err(JasprError::CloneFailed(format!(
            "failed to fetch {second_remote} ({}); scratch workspace retained at {}",
            String::from_utf8_lossy(&fetch_local.stderr),
            path.display()
        )));
    }

    let scratch_git = crate::git::RealGitClient::open(&scratch_root)?;
    let origin_git = crate::git::RealGitClient::open(original_root)?;

    let scratch_local_ref = format!("{second_remote}/{}", inputs.local_ref);
    let scratch_inputs = AutoMergeInputs {
        local_ref: &scratch_local_ref,
        target_ref: inputs.target_ref,
        count: inputs.count,
    };

    let result = auto_merge_loop(
        &scratch_git,
        &origin_git,
        forge,
        settings,
        &scratch_inputs,
        max_attempts,
        poll_interval,
        &mut on_tick,
        &mut sleep,
    );

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let path = scratch.into_path();
            log::warn!("auto-merge failed; scratch workspace retained at {}", path.display());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckState, Commit, Ident};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Clone)]
    struct FakeGit {
        commits: RefCell<Vec<Commit>>,
        branches: RefCell<HashMap<String, String>>,
        behind: RefCell<usize>,
        fetches: RefCell<u32>,
    }

    impl FakeGit {
        fn new(commits: Vec<Commit>, branches: HashMap<String, String>) -> Self {
            Self {
                commits: RefCell::new(commits),
                branches: RefCell::new(branches),
                behind: RefCell::new(0),
                fetches: RefCell::new(0),
            }
        }
    }

    impl GitClient for FakeGit {
        fn fetch(&self, _: &str, _: bool) -> Result<()> {
            *self.fetches.borrow_mut() += 1;
            Ok(())
        }
        fn log(&self, _: &str, _: Option<usize>) -> Result<Vec<Commit>> {
            Ok(vec![])
        }
        fn log_all(&self) -> Result<Vec<Commit>> {
            Ok(vec![])
        }
        fn log_range(&self, _: &str, _: &str) -> Result<Vec<Commit>> {
            let behind = *self.behind.borrow();
            Ok((0..behind)
                .map(|i| test_commit(&format!("behind{i}"), None))
                .collect())
        }
        fn get_parents(&self, _: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn reflog(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn is_working_directory_clean(&self) -> Result<bool> {
            Ok(true)
        }
        fn is_head_detached(&self) -> Result<bool> {
            Ok(false)
        }
        fn get_current_branch_name(&self) -> Result<Option<String>> {
            Ok(Some("main".to_string()))
        }
        fn get_local_commit_stack(&self, _: &str, _: &str, _: &str) -> Result<Vec<Commit>> {
            Ok(self.commits.borrow().clone())
        }
        fn ref_exists(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn get_branch_names(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn get_remote_branches(&self, _: &str) -> Result<Vec<String>> {
            Ok(self.branches.borrow().keys().cloned().collect())
        }
        fn get_remote_branches_by_id(&self, _: &str) -> Result<HashMap<String, String>> {
            Ok(self.branches.borrow().clone())
        }
        fn reset(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn branch(&self, _: &str, _: Option<&str>, _: bool) -> Result<()> {
            Ok(())
        }
        fn checkout(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn delete_branches(&self, names: &[String], _: bool) -> Result<()> {
            let mut branches = self.branches.borrow_mut();
            for n in names {
                branches.retain(|_, v| v != n);
            }
            Ok(())
        }
        fn add(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn commit(
            &self,
            _: Option<&str>,
            _: Option<&crate::message::Footers>,
            _: Option<&Ident>,
            _: Option<&Ident>,
            _: bool,
        ) -> Result<Commit> {
            unimplemented!()
        }
        fn cherry_pick(&self, _: &str, _: Option<&Ident>, _: Option<&Ident>) -> Result<Commit> {
            unimplemented!()
        }
        fn set_commit_id(&self, _: &str, _: Option<&Ident>, _: Option<&Ident>) -> Result<Commit> {
            unimplemented!()
        }
        fn push(&self, _: &[crate::git::RefSpec], _: &str) -> Result<()> {
            Ok(())
        }
        fn push_with_lease(
            &self,
            _: &[crate::git::RefSpec],
            _: &str,
            _: &HashMap<String, Option<String>>,
        ) -> Result<()> {
            Ok(())
        }
        fn get_remote_uri_or_null(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn get_upstream_branch(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn set_upstream_branch(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn get_upstream_branch_name(&self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn set_upstream_branch_for_local_branch(&self, _: &str, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }
        fn get_config_value(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn set_config_value(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn get_commits(&self, _: &[String]) -> Result<Vec<Commit>> {
            Ok(vec![])
        }
        fn get_short_messages(&self, _: &[String]) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }
    }

    struct FakeForge {
        prs: RefCell<Vec<PullRequest>>,
        closed: RefCell<Vec<String>>,
    }

    impl FakeForge {
        fn new(prs: Vec<PullRequest>) -> Self {
            Self {
                prs: RefCell::new(prs),
                closed: RefCell::new(vec![]),
            }
        }
    }

    impl ForgeClient for FakeForge {
        fn get_pull_requests(&self, _: Option<&crate::forge::CommitFilter>) -> Result<Vec<PullRequest>> {
            Ok(self.prs.borrow().clone())
        }
        fn get_pull_requests_by_id(&self, _: Option<&[String]>) -> Result<Vec<PullRequest>> {
            Ok(self.prs.borrow().clone())
        }
        fn get_pull_requests_by_head_ref(&self, _: &str) -> Result<Vec<PullRequest>> {
            Ok(vec![])
        }
        fn create_pull_request(&self, pr: &PullRequest) -> Result<PullRequest> {
            self.prs.borrow_mut().push(pr.clone());
            Ok(pr.clone())
        }
        fn update_pull_request(&self, pr: &PullRequest) -> Result<()> {
            let mut prs = self.prs.borrow_mut();
            if let Some(existing) = prs.iter_mut().find(|p| p.commit_id == pr.commit_id) {
                *existing = pr.clone();
            }
            Ok(())
        }
        fn close_pull_request(&self, pr: &PullRequest) -> Result<()> {
            self.closed.borrow_mut().push(pr.head_ref.clone());
            self.prs.borrow_mut().retain(|p| p.head_ref != pr.head_ref);
            Ok(())
        }
        fn approve_pull_request(&self, _: &PullRequest) -> Result<()> {
            Ok(())
        }
    }

    fn test_commit(id: &str, hash: Option<&str>) -> Commit {
        let ident = Ident {
            name: "Dev".to_string(),
            email: "dev@example.com".to_string(),
        };
        Commit {
            hash: hash.unwrap_or(id).to_string(),
            short_subject: format!("commit {id}"),
            full_message: format!("commit {id}\n\ncommit-id: {id}"),
            id: Some(id.to_string()),
            author: ident.clone(),
            committer: ident,
            author_date: "2024-01-01T00:00:00Z".to_string(),
            commit_date: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn mergeable_pr(id: &str, head: &str) -> PullRequest {
        PullRequest {
            forge_id: Some(format!("pr-{id}")),
            commit_id: Some(id.to_string()),
            number: Some(1),
            head_ref: head.to_string(),
            base_ref: "main".to_string(),
            title: format!("commit {id}"),
            body: String::new(),
            checks: Some(CheckState::Success),
            approved: Some(true),
            is_draft: false,
            permalink: None,
        }
    }

    #[test]
    fn merges_immediately_when_stack_is_already_mergeable() {
        let settings = Settings::default();
        let commit = test_commit("aaa11111", None);
        let branch = refs::encode_branch(&settings.branch_prefix, "main", "aaa11111", None);
        let scratch = FakeGit::new(vec![commit.clone()], HashMap::from([(branch.clone(), "aaa11111".to_string())]));
        let origin = FakeGit::new(vec![commit], HashMap::from([(branch.clone(), "aaa11111".to_string())]));
        let forge = FakeForge::new(vec![mergeable_pr("aaa11111", &branch)]);

        let mut ticks = 0;
        let mut sleeps = 0;
        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            10,
            Duration::from_millis(1),
            |_, _| ticks += 1,
            |_| sleeps += 1,
        );

        assert!(result.is_ok());
        assert_eq!(sleeps, 0);
        assert_eq!(ticks, 0);
    }

    #[test]
    fn exits_immediately_on_failed_checks_without_waiting() {
        let settings = Settings::default();
        let commit = test_commit("bbb22222", None);
        let branch = refs::encode_branch(&settings.branch_prefix, "main", "bbb22222", None);
        let scratch = FakeGit::new(vec![commit.clone()], HashMap::from([(branch.clone(), "bbb22222".to_string())]));
        let origin = FakeGit::new(vec![commit], HashMap::from([(branch.clone(), "bbb22222".to_string())]));
        let mut pr = mergeable_pr("bbb22222", &branch);
        pr.checks = Some(CheckState::Failure);
        let forge = FakeForge::new(vec![pr]);

        let mut sleeps = 0;
        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            10,
            Duration::from_millis(1),
            |_, _| {},
            |_| sleeps += 1,
        );

        assert!(matches!(result, Err(JasprError::NotMergeable { .. })));
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn waits_while_checks_are_pending_then_merges() {
        let settings = Settings::default();
        let commit = test_commit("ccc33333", None);
        let branch = refs::encode_branch(&settings.branch_prefix, "main", "ccc33333", None);
        let scratch = FakeGit::new(vec![commit.clone()], HashMap::from([(branch.clone(), "ccc33333".to_string())]));
        let origin = FakeGit::new(vec![commit], HashMap::from([(branch.clone(), "ccc33333".to_string())]));
        let mut pr = mergeable_pr("ccc33333", &branch);
        pr.checks = Some(CheckState::Pending);
        let forge = FakeForge::new(vec![pr.clone()]);

        // Flip to success after the first poll, simulating CI finishing.
        let mut attempts_seen = 0;

        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            10,
            Duration::from_millis(1),
            |_, _| {},
            |_| {
                attempts_seen += 1;
                let mut prs = forge.prs.borrow_mut();
                prs[0].checks = Some(CheckState::Success);
            },
        );

        assert!(result.is_ok());
        assert_eq!(attempts_seen, 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let settings = Settings::default();
        let commit = test_commit("ddd44444", None);
        let branch = refs::encode_branch(&settings.branch_prefix, "main", "ddd44444", None);
        let scratch = FakeGit::new(vec![commit.clone()], HashMap::from([(branch.clone(), "ddd44444".to_string())]));
        let origin = FakeGit::new(vec![commit], HashMap::from([(branch.clone(), "ddd44444".to_string())]));
        let mut pr = mergeable_pr("ddd44444", &branch);
        pr.checks = Some(CheckState::Pending);
        let forge = FakeForge::new(vec![pr]);

        let mut sleeps = 0;
        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            3,
            Duration::from_millis(1),
            |_, _| {},
            |_| sleeps += 1,
        );

        assert!(matches!(result, Err(JasprError::NotMergeable { .. })));
        assert_eq!(sleeps, 3);
    }

    #[test]
    fn refuses_promptly_when_a_commits_pr_is_draft_instead_of_polling() {
        let settings = Settings::default();
        let commit = test_commit("eee55555", None);
        let branch = refs::encode_branch(&settings.branch_prefix, "main", "eee55555", None);
        let scratch = FakeGit::new(vec![commit.clone()], HashMap::from([(branch.clone(), "eee55555".to_string())]));
        let origin = FakeGit::new(vec![commit], HashMap::from([(branch.clone(), "eee55555".to_string())]));
        let mut pr = mergeable_pr("eee55555", &branch);
        pr.is_draft = true;
        pr.checks = Some(CheckState::Pending);
        let forge = FakeForge::new(vec![pr]);

        let mut sleeps = 0;
        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            240,
            Duration::from_millis(1),
            |_, _| {},
            |_| sleeps += 1,
        );

        assert!(matches!(result, Err(JasprError::NotMergeable { .. })));
        assert_eq!(sleeps, 0, "a draft PR should fail fast, not enter the poll loop");
    }

    #[test]
    fn refuses_when_local_ref_is_behind_target() {
        let settings = Settings::default();
        let scratch = FakeGit::new(vec![], HashMap::new());
        *scratch.behind.borrow_mut() = 2;
        let origin = FakeGit::new(vec![], HashMap::new());
        let forge = FakeForge::new(vec![]);

        let result = auto_merge_loop(
            &scratch,
            &origin,
            &forge,
            &settings,
            &AutoMergeInputs {
                local_ref: "HEAD",
                target_ref: "main",
                count: None,
            },
            3,
            Duration::from_millis(1),
            |_, _| {},
            |_| {},
        );

        assert!(matches!(result, Err(JasprError::StackBehindTarget { .. })));
    }
}
