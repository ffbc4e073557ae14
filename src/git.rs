//! `GitClient` (spec §6.1): the interface the engine consumes for all git
//! plumbing, plus a real implementation blending `gix` (read-side queries,
//! where its plumbing is both fast and sufficient) with shelling out to the
//! `git` binary (mutating operations: push, cherry-pick, branch, commit —
//! the operations `gix` either doesn't cover or where matching real git's
//! exact behavior, including hooks and config semantics, matters more than
//! avoiding a subprocess).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::{JasprError, Result};
use crate::model::{Commit, Ident};
use crate::util::CommandExt as _;
use crate::{cmd, re};

/// One side of a push: `local` is the value being pushed (a commit-ish, or
/// `""`/`"+"`-prefixed for force semantics, or empty for a delete); `remote`
/// is the destination ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub local: String,
    pub remote: String,
}

impl RefSpec {
    pub fn update(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    pub fn force_update(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: format!("+{}", local.into()),
            remote: remote.into(),
        }
    }

    pub fn delete(remote: impl Into<String>) -> Self {
        Self {
            local: String::new(),
            remote: remote.into(),
        }
    }

    fn as_arg(&self) -> String {
        if self.local.is_empty() {
            format!(":{}", self.remote)
        } else {
            format!("{}:{}", self.local, self.remote)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState<'a> {
    Attached(&'a str),
    Detached,
}

/// The contract the stack-reconciliation engine needs from git (spec §6.1).
/// Any implementation satisfying this trait is acceptable; the engine never
/// assumes anything beyond it.
pub trait GitClient {
    fn fetch(&self, remote: &str, prune: bool) -> Result<()>;

    fn log(&self, rev: &str, n: Option<usize>) -> Result<Vec<Commit>>;
    fn log_all(&self) -> Result<Vec<Commit>>;
    /// `since..until`; fails if either ref doesn't exist.
    fn log_range(&self, since: &str, until: &str) -> Result<Vec<Commit>>;
    fn get_parents(&self, commit: &str) -> Result<Vec<String>>;
    fn reflog(&self) -> Result<Vec<String>>;

    fn is_working_directory_clean(&self) -> Result<bool>;
    fn is_head_detached(&self) -> Result<bool>;
    fn get_current_branch_name(&self) -> Result<Option<String>>;

    /// `logRange(<remote>/<target_ref>..<local_ref>)`, base-to-head order.
    fn get_local_commit_stack(
        &self,
        remote: &str,
        local_ref: &str,
        target_ref: &str,
    ) -> Result<Vec<Commit>> {
        self.log_range(&format!("{remote}/{target_ref}"), local_ref)
    }

    fn ref_exists(&self, r#ref: &str) -> Result<bool>;
    fn get_branch_names(&self) -> Result<Vec<String>>;
    /// Remote-tracking branch short names, excluding `HEAD`.
    fn get_remote_branches(&self, remote: &str) -> Result<Vec<String>>;
    /// Remote-tracking branch short name -> tip hash.
    fn get_remote_branches_by_id(&self, remote: &str) -> Result<HashMap<String, String>>;

    fn reset(&self, r#ref: &str) -> Result<()>;
    fn branch(&self, name: &str, start: Option<&str>, force: bool) -> Result<()>;
    fn checkout(&self, r#ref: &str) -> Result<()>;
    fn delete_branches(&self, names: &[String], force: bool) -> Result<()>;

    fn add(&self, pattern: &str) -> Result<()>;
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        message: Option<&str>,
        footers: Option<&crate::message::Footers>,
        author: Option<&Ident>,
        committer: Option<&Ident>,
        amend: bool,
    ) -> Result<Commit>;
    fn cherry_pick(
        &self,
        commit: &str,
        author: Option<&Ident>,
        committer: Option<&Ident>,
    ) -> Result<Commit>;
    /// Amend HEAD with a `commit-id:` footer (generating a new id if one
    /// isn't supplied) and a bumped commit timestamp.
    fn set_commit_id(
        &self,
        id: &str,
        author: Option<&Ident>,
        committer: Option<&Ident>,
    ) -> Result<Commit>;

    fn push(&self, refspecs: &[RefSpec], remote: &str) -> Result<()>;
    /// `expected_ref_values[remote_ref] == None` means "must not exist".
    /// Fails with [`JasprError::RevisionHistoryLeaseViolation`] when the
    /// remote doesn't match expectations — the signal a caller uses to
    /// detect a lost race writing a revision-history branch.
    fn push_with_lease(
        &self,
        refspecs: &[RefSpec],
        remote: &str,
        expected_ref_values: &HashMap<String, Option<String>>,
    ) -> Result<()>;

    fn get_remote_uri_or_null(&self, remote: &str) -> Result<Option<String>>;
    fn get_upstream_branch(&self, remote: &str) -> Result<Option<String>>;
    fn set_upstream_branch(&self, remote: &str, name: &str) -> Result<()>;
    fn get_upstream_branch_name(&self, local_branch: &str, remote: &str) -> Result<Option<String>>;
    fn set_upstream_branch_for_local_branch(
        &self,
        local_branch: &str,
        remote: &str,
        ref_or_null: Option<&str>,
    ) -> Result<()>;

    fn get_config_value(&self, key: &str) -> Result<Option<String>>;
    fn set_config_value(&self, key: &str, value: &str) -> Result<()>;

    fn get_commits(&self, refs: &[String]) -> Result<Vec<Commit>>;
    fn get_short_messages(&self, refs: &[String]) -> Result<HashMap<String, String>>;

    /// The ident (`user.name <user.email>`) used to author commits on this
    /// machine, used by the clean planner's author filter (spec §4.9).
    fn current_user_ident(&self) -> Result<Ident> {
        let name = self
            .get_config_value("user.name")?
            .unwrap_or_else(|| "unknown".to_string());
        let email = self
            .get_config_value("user.email")?
            .unwrap_or_else(|| "unknown@localhost".to_string());
        Ok(Ident { name, email })
    }
}

re!(commit_id_footer_re, r"(?m)^commit-id: ([0-9a-f]+)$");

/// Resolve the nearest enclosing git directory from `start`, supporting
/// worktrees: a directory is a valid working directory if either `.git` is
/// itself a directory, or a file beginning with `gitdir:` (spec §6.1).
pub fn find_nearest_git_dir(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let dot_git = d.join(".git");
        if dot_git.is_dir() {
            return Some(dot_git);
        }
        if dot_git.is_file() {
            if let Ok(contents) = std::fs::read_to_string(&dot_git) {
                if let Some(path) = contents.trim().strip_prefix("gitdir: ") {
                    let resolved = d.join(path);
                    return Some(resolved);
                }
            }
        }
        dir = d.parent();
    }
    None
}

/// A `GitClient` backed by a real repository: `gix` for read-only queries,
/// the `git` binary (via [`cmd!`]) for anything that mutates refs, the
/// index, or the working tree.
pub struct RealGitClient {
    root: PathBuf,
}

impl RealGitClient {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        find_nearest_git_dir(path).ok_or_else(|| {
            JasprError::Git(format!("no git directory found above {}", path.display()))
        })?;
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<gix::Repository> {
        gix::open(&self.root).map_err(|e| JasprError::Git(e.to_string()))
    }

    fn git(&self) -> std::process::Command {
        let mut c = cmd!("git");
        c.current_dir(&self.root);
        c
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let out = self
            .git()
            .args(args)
            .stderr(Stdio::piped())
            .unwrap_output();
        if !out.status.success() {
            return Err(JasprError::Git(format!(
                "git {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        Ok(crate::util::to_trimmed_string_lossy(&out.stdout))
    }

    fn commit_from_gix(c: gix::Commit<'_>) -> Result<Commit> {
        let hash = c.id.to_string();
        let message = c
            .message()
            .map_err(|e| JasprError::Git(e.to_string()))?;
        let short_subject = core::str::from_utf8(message.title)
            .map_err(|e| JasprError::Git(e.to_string()))?
            .to_string();
        let full_message = String::from_utf8_lossy(&c.message_raw_sloppy()).to_string();
        let id = commit_id_footer_re()
            .captures(&full_message)
            .map(|caps| caps[1].to_string());

        let author = c.author().map_err(|e| JasprError::Git(e.to_string()))?;
        let committer = c
            .committer()
            .map_err(|e| JasprError::Git(e.to_string()))?;

        Ok(Commit {
            hash,
            short_subject,
            full_message,
            id,
            author: Ident {
                name: author.name.to_string(),
                email: author.email.to_string(),
            },
            committer: Ident {
                name: committer.name.to_string(),
                email: committer.email.to_string(),
            },
            author_date: author.time.seconds.to_string(),
            commit_date: committer.time.seconds.to_string(),
        })
    }
}

impl GitClient for RealGitClient {
    fn fetch(&self, remote: &str, prune: bool) -> Result<()> {
        let mut args = vec!["fetch", remote];
        if prune {
            args.push("--prune");
        }
        self.run(&args)?;
        Ok(())
    }

    fn log(&self, rev: &str, n: Option<usize>) -> Result<Vec<Commit>> {
        let repo = self.repo()?;
        let head = repo
            .rev_parse_single(rev)
            .map_err(|e| JasprError::Git(e.to_string()))?;
        let mut commits = Vec::new();
        for info in repo
            .rev_walk([head])
            .all()
            .map_err(|e| JasprError::Git(e.to_string()))?
        {
            let info = info.map_err(|e| JasprError::Git(e.to_string()))?;
            let c = info.object().map_err(|e| JasprError::Git(e.to_string()))?;
            commits.push(Self::commit_from_gix(c)?);
            if n.is_some_and(|n| commits.len() >= n) {
                break;
            }
        }
        Ok(commits)
    }

    fn log_all(&self) -> Result<Vec<Commit>> {
        self.log("HEAD", None)
    }

    fn log_range(&self, since: &str, until: &str) -> Result<Vec<Commit>> {
        let repo = self.repo()?;
        let since_id = repo
            .rev_parse_single(since)
            .map_err(|_| JasprError::Git(format!("unknown ref: {since}")))?;
        let until_id = repo
            .rev_parse_single(until)
            .map_err(|_| JasprError::Git(format!("unknown ref: {until}")))?;

        let mut commits = Vec::new();
        for info in repo
            .rev_walk([until_id])
            .all()
            .map_err(|e| JasprError::Git(e.to_string()))?
        {
            let info = info.map_err(|e| JasprError::Git(e.to_string()))?;
            if info.id == since_id {
                break;
            }
            let c = info.object().map_err(|e| JasprError::Git(e.to_string()))?;
            commits.push(Self::commit_from_gix(c)?);
        }
        commits.reverse();
        Ok(commits)
    }

    fn get_parents(&self, commit: &str) -> Result<Vec<String>> {
        let out = self.run(&["rev-list", "--parents", "-n", "1", commit])?;
        Ok(out
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect())
    }

    fn reflog(&self) -> Result<Vec<String>> {
        let out = self.run(&["reflog", "show", "--format=%H"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn is_working_directory_clean(&self) -> Result<bool> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(out.is_empty())
    }

    fn is_head_detached(&self) -> Result<bool> {
        Ok(self.get_current_branch_name()?.is_none())
    }

    fn get_current_branch_name(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        let head = repo.head().map_err(|e| JasprError::Git(e.to_string()))?;
        Ok(head
            .try_into_referent()
            .map(|r| r.name().shorten().to_string()))
    }

    fn ref_exists(&self, r#ref: &str) -> Result<bool> {
        Ok(self
            .git()
            .args(["rev-parse", "--verify", "--quiet", r#ref])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .unwrap_status()
            .success())
    }

    fn get_branch_names(&self) -> Result<Vec<String>> {
        let out = self.run(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn get_remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        let pattern = format!("refs/remotes/{remote}");
        let out = self.run(&["for-each-ref", "--format=%(refname:short)", &pattern])?;
        let prefix = format!("{remote}/");
        Ok(out
            .lines()
            .filter_map(|l| l.strip_prefix(&prefix))
            .filter(|name| *name != "HEAD")
            .map(str::to_string)
            .collect())
    }

    fn get_remote_branches_by_id(&self, remote: &str) -> Result<HashMap<String, String>> {
        let pattern = format!("refs/remotes/{remote}");
        let out = self.run(&[
            "for-each-ref",
            "--format=%(refname:short) %(objectname)",
            &pattern,
        ])?;
        let prefix = format!("{remote}/");
        let mut map = HashMap::new();
        for line in out.lines() {
            if let Some((name, hash)) = line.split_once(' ') {
                if let Some(short) = name.strip_prefix(&prefix) {
                    if short != "HEAD" {
                        map.insert(short.to_string(), hash.to_string());
                    }
                }
            }
        }
        Ok(map)
    }

    fn reset(&self, r#ref: &str) -> Result<()> {
        self.run(&["reset", "--hard", r#ref])?;
        Ok(())
    }

    fn branch(&self, name: &str, start: Option<&str>, force: bool) -> Result<()> {
        let mut args = vec!["branch".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());
        if let Some(start) = start {
            args.push(start.to_string());
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args_ref)?;
        Ok(())
    }

    fn checkout(&self, r#ref: &str) -> Result<()> {
        self.run(&["checkout", r#ref])?;
        Ok(())
    }

    fn delete_branches(&self, names: &[String], force: bool) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let flag = if force { "-D" } else { "-d" };
        let mut args = vec!["branch".to_string(), flag.to_string()];
        args.extend(names.iter().cloned());
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args_ref)?;
        Ok(())
    }

    fn add(&self, pattern: &str) -> Result<()> {
        self.run(&["add", pattern])?;
        Ok(())
    }

    fn commit(
        &self,
        message: Option<&str>,
        footers: Option<&crate::message::Footers>,
        author: Option<&Ident>,
        committer: Option<&Ident>,
        amend: bool,
    ) -> Result<Commit> {
        let mut args: Vec<String> = vec!["commit".to_string()];
        if amend {
            args.push("--amend".to_string());
        }

        let message = message.map(str::to_string).unwrap_or_default();
        let message = match footers {
            Some(f) if !f.is_empty() => crate::message::add_footers(&message, f),
            _ => message,
        };
        args.push("-m".to_string());
        args.push(message);

        if let Some(a) = author {
            args.push(format!("--author={} <{}>", a.name, a.email));
        }

        let mut command = self.git();
        command.args(&args);
        if let Some(c) = committer {
            command.env("GIT_COMMITTER_NAME", &c.name);
            command.env("GIT_COMMITTER_EMAIL", &c.email);
        }
        let out = command.stderr(Stdio::piped()).unwrap_output();
        if !out.status.success() {
            return Err(JasprError::Git(String::from_utf8_lossy(&out.stderr).to_string()));
        }

        self.head_commit()
    }

    fn cherry_pick(
        &self,
        commit: &str,
        author: Option<&Ident>,
        committer: Option<&Ident>,
    ) -> Result<Commit> {
        let mut command = self.git();
        command.args(["cherry-pick", commit]);
        if let Some(c) = committer {
            command.env("GIT_COMMITTER_NAME", &c.name);
            command.env("GIT_COMMITTER_EMAIL", &c.email);
        }
        let _ = author;
        let out = command.stderr(Stdio::piped()).unwrap_output();
        if !out.status.success() {
            return Err(JasprError::Git(String::from_utf8_lossy(&out.stderr).to_string()));
        }
        self.head_commit()
    }

    fn set_commit_id(
        &self,
        id: &str,
        author: Option<&Ident>,
        committer: Option<&Ident>,
    ) -> Result<Commit> {
        let head = self.head_commit()?;
        let mut footers = crate::message::footers(&head.full_message);
        footers.insert("commit-id", id);
        let (subject, body) = crate::message::subject_body(&head.full_message);
        let message = match body {
            Some(b) => format!("{subject}\n\n{b}"),
            None => subject,
        };
        self.commit(Some(&message), Some(&footers), author, committer, true)
    }

    fn push(&self, refspecs: &[RefSpec], remote: &str) -> Result<()> {
        if refspecs.is_empty() {
            return Ok(());
        }
        let mut args = vec!["push".to_string(), "--atomic".to_string(), remote.to_string()];
        args.extend(refspecs.iter().map(RefSpec::as_arg));
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args_ref).map_err(|e| JasprError::PushRejected(e.to_string()))?;
        Ok(())
    }

    fn push_with_lease(
        &self,
        refspecs: &[RefSpec],
        remote: &str,
        expected_ref_values: &HashMap<String, Option<String>>,
    ) -> Result<()> {
        if refspecs.is_empty() {
            return Ok(());
        }
        let mut args = vec!["push".to_string(), "--atomic".to_string()];
        for (r#ref, expected) in expected_ref_values {
            match expected {
                None => args.push(format!("--force-with-lease={ref}:")),
                Some(hash) => args.push(format!("--force-with-lease={ref}:{hash}")),
            }
        }
        args.push(remote.to_string());
        args.extend(refspecs.iter().map(RefSpec::as_arg));
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args_ref).map_err(|_| {
            let names = expected_ref_values.keys().cloned().collect::<Vec<_>>().join(", ");
            JasprError::RevisionHistoryLeaseViolation(names)
        })?;
        Ok(())
    }

    fn get_remote_uri_or_null(&self, remote: &str) -> Result<Option<String>> {
        self.get_config_value(&format!("remote.{remote}.url"))
    }

    fn get_upstream_branch(&self, remote: &str) -> Result<Option<String>> {
        let branch = self.get_current_branch_name()?;
        match branch {
            Some(b) => self.get_upstream_branch_name(&b, remote),
            None => Err(JasprError::DetachedHead),
        }
    }

    fn set_upstream_branch(&self, remote: &str, name: &str) -> Result<()> {
        let branch = self
            .get_current_branch_name()?
            .ok_or(JasprError::DetachedHead)?;
        self.set_upstream_branch_for_local_branch(&branch, remote, Some(name))
    }

    fn get_upstream_branch_name(&self, local_branch: &str, remote: &str) -> Result<Option<String>> {
        let _ = remote;
        self.get_config_value(&format!("branch.{local_branch}.merge"))
    }

    fn set_upstream_branch_for_local_branch(
        &self,
        local_branch: &str,
        remote: &str,
        ref_or_null: Option<&str>,
    ) -> Result<()> {
        match ref_or_null {
            Some(r#ref) => {
                self.set_config_value(&format!("branch.{local_branch}.remote"), remote)?;
                self.set_config_value(&format!("branch.{local_branch}.merge"), r#ref)?;
            }
            None => {
                let _ = self.run(&["config", "--unset", &format!("branch.{local_branch}.remote")]);
                let _ = self.run(&["config", "--unset", &format!("branch.{local_branch}.merge")]);
            }
        }
        Ok(())
    }

    fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        let out = self
            .git()
            .args(["config", "--get", key])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .unwrap_output();
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(crate::util::to_trimmed_string_lossy(&out.stdout)))
    }

    fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", key, value])?;
        Ok(())
    }

    fn get_commits(&self, refs: &[String]) -> Result<Vec<Commit>> {
        refs.iter().map(|r| self.head_commit_at(r)).collect()
    }

    fn get_short_messages(&self, refs: &[String]) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for r in refs {
            let subject = self.run(&["log", "-1", "--format=%s", r])?;
            map.insert(r.clone(), subject);
        }
        Ok(map)
    }
}

impl RealGitClient {
    fn head_commit(&self) -> Result<Commit> {
        self.head_commit_at("HEAD")
    }

    fn head_commit_at(&self, r#ref: &str) -> Result<Commit> {
        let repo = self.repo()?;
        let id = repo
            .rev_parse_single(r#ref)
            .map_err(|e| JasprError::Git(e.to_string()))?;
        let commit = id.object().map_err(|e| JasprError::Git(e.to_string()))?;
        let commit = commit
            .try_into_commit()
            .map_err(|e| JasprError::Git(e.to_string()))?;
        Self::commit_from_gix(commit)
    }
}
