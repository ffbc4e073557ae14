//! Error taxonomy for the stack-reconciliation engine (spec §7).
//!
//! Every engine-facing function returns `Result<T, JasprError>`. The CLI
//! boundary (`cli`/`main`) wraps these in `eyre::Result` for human-readable
//! context chains; this enum stays a closed, matchable sum type so the
//! engine itself never needs string-sniffing to tell error kinds apart.

use thiserror::Error;

/// A commit id duplicated within a single stack (spec §3 invariants, §7
/// Integrity errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub commit_id: String,
    pub hashes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum JasprError {
    // --- Precondition errors (user-correctable) ---
    #[error("working tree is not clean; commit or stash your changes first")]
    DirtyWorkingTree,

    #[error("HEAD is detached; checkout a branch first")]
    DetachedHead,

    #[error("duplicate commit-id(s) found in stack: {}", format_duplicates(.0))]
    DuplicateCommitIds(Vec<DuplicateId>),

    #[error("stack is empty after applying the don't-push filter")]
    EmptyStack,

    #[error("commit {hash} ({subject:?}) is not mergeable: {reason}")]
    NotMergeable {
        hash: String,
        subject: String,
        reason: String,
    },

    #[error(
        "local ref is behind {remote}/{target} by {behind_by} commit(s); run `git rebase {remote}/{target}`"
    )]
    StackBehindTarget {
        remote: String,
        target: String,
        behind_by: usize,
    },

    #[error("--count {count} is out of range for a stack of {stack_len} commit(s)")]
    CountOutOfRange { count: i64, stack_len: usize },

    #[error("no named stack `{0}` found")]
    UnknownNamedStack(String),

    #[error("a local branch named `{0}` already exists and tracks a different ref")]
    NamedStackCheckoutConflict(String),

    #[error("a named stack called `{0}` already exists for target `{1}`")]
    NamedStackNameCollision(String, String),

    #[error("could not generate a unique stack name after {attempts} attempts")]
    StackNameExhausted { attempts: u32 },

    #[error("push aborted: the caller declined to abandon {0} pull request(s)")]
    AbandonmentDeclined(usize),

    // --- Integrity errors ---
    #[error("more than one open PR exists for commit-id {commit_id}: #{}", pr_numbers.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", #"))]
    DuplicatePullRequest {
        commit_id: String,
        pr_numbers: Vec<u64>,
    },

    // --- Forge errors ---
    #[error("forge rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("forge error: {0}")]
    Forge(String),

    // --- Push errors ---
    #[error("lease violation writing revision-history branch `{0}`: it already exists")]
    RevisionHistoryLeaseViolation(String),

    #[error("push rejected: {0}")]
    PushRejected(String),

    // --- Infrastructure errors ---
    #[error("git command failed: {0}")]
    Git(String),

    #[error("failed to clone scratch workspace: {0}")]
    CloneFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_duplicates(dups: &[DuplicateId]) -> String {
    dups.iter()
        .map(|d| format!("{} ({} commits)", d.commit_id, d.hashes.len()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, JasprError>;
