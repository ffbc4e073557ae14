//! Core data model (spec §3): `Commit`, `RemoteRef`, `NamedStackRef`,
//! `PullRequest`, and the `Stack` they compose into.

use std::fmt;

/// A single local commit, with its stack-stable id if one has been stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub short_subject: String,
    pub full_message: String,
    pub id: Option<String>,
    pub author: Ident,
    pub committer: Ident,
    pub author_date: String,
    pub commit_date: String,
}

impl Commit {
    /// The commit-id, panicking-free accessor for code that has already
    /// checked `id.is_some()` (e.g. after the push reconciler's stamping
    /// pass). Returns `""` for commits that still lack one.
    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub email: String,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A decoded per-commit remote branch (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    pub target: String,
    pub commit_id: String,
    /// `None` for the live branch; `Some(n)` for a revision-history snapshot
    /// (`..._NN`), `n` starting at 1.
    pub rev_num: Option<u32>,
}

/// A decoded named-stack pointer (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedStackRef {
    pub target: String,
    pub stack_name: String,
}

/// A PR's aggregated check-suite state (spec §4.4, §6.2). `Pending` is a
/// real, distinct forge state (checks still running); it is not the same as
/// an unrecognized/unclassifiable state, which is represented by `checks`
/// being `None` altogether (spec §9 Open Questions: unknown check-state is
/// "empty", never promoted to pending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Success,
    Failure,
    Pending,
}

/// Domain view of a forge pull/merge request (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub forge_id: Option<String>,
    pub commit_id: Option<String>,
    pub number: Option<u64>,
    pub head_ref: String,
    pub base_ref: String,
    pub title: String,
    pub body: String,
    pub checks: Option<CheckState>,
    pub approved: Option<bool>,
    pub is_draft: bool,
    pub permalink: Option<String>,
}

impl PullRequest {
    pub fn is_mergeable(&self) -> bool {
        self.checks == Some(CheckState::Success) && !self.is_draft && self.approved == Some(true)
    }
}

/// An ordered stack of commits, base (oldest) first, head (newest) last.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    pub commits: Vec<Commit>,
}

impl Stack {
    pub fn new(commits: Vec<Commit>) -> Self {
        Self { commits }
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn head(&self) -> Option<&Commit> {
        self.commits.last()
    }

    pub fn base(&self) -> Option<&Commit> {
        self.commits.first()
    }

    /// Iterate `(prev, current)` pairs base-to-head; `prev` is `None` for the
    /// first commit (whose PR base is the target branch, not another
    /// per-commit branch).
    pub fn pairs(&self) -> impl Iterator<Item = (Option<&Commit>, &Commit)> {
        self.commits.iter().enumerate().map(move |(i, c)| {
            let prev = if i == 0 { None } else { Some(&self.commits[i - 1]) };
            (prev, c)
        })
    }

    /// Render HEAD-first, as the status engine and PR-body builder do.
    pub fn head_first(&self) -> impl Iterator<Item = &Commit> {
        self.commits.iter().rev()
    }

    /// Find commit-ids that appear more than once in this stack (spec §3
    /// invariants: "Two commits sharing an `id` is a bug the user must
    /// fix").
    pub fn duplicate_ids(&self) -> Vec<crate::error::DuplicateId> {
        use std::collections::HashMap;
        let mut by_id: HashMap<&str, Vec<&str>> = HashMap::new();
        for c in &self.commits {
            if let Some(id) = c.id.as_deref() {
                by_id.entry(id).or_default().push(&c.hash);
            }
        }
        by_id
            .into_iter()
            .filter(|(_, hashes)| hashes.len() > 1)
            .map(|(id, hashes)| crate::error::DuplicateId {
                commit_id: id.to_string(),
                hashes: hashes.into_iter().map(str::to_string).collect(),
            })
            .collect()
    }
}

/// Apply the `--count N` slicing rule (spec §4.6 step 1): positive N keeps
/// the first N commits (base-most); negative N drops the last `|N|`
/// (head-most); zero or out-of-range is an error.
pub fn slice_by_count(
    mut stack: Vec<Commit>,
    count: Option<i64>,
) -> crate::error::Result<Vec<Commit>> {
    let Some(count) = count else {
        return Ok(stack);
    };
    let len = stack.len() as i64;
    if count == 0 {
        return Err(crate::error::JasprError::CountOutOfRange {
            count,
            stack_len: stack.len(),
        });
    }
    if count > 0 {
        if count > len {
            return Err(crate::error::JasprError::CountOutOfRange {
                count,
                stack_len: stack.len(),
            });
        }
        stack.truncate(count as usize);
    } else {
        let drop = -count;
        if drop >= len {
            return Err(crate::error::JasprError::CountOutOfRange {
                count,
                stack_len: stack.len(),
            });
        }
        let keep = (len - drop) as usize;
        stack.truncate(keep);
    }
    Ok(stack)
}
