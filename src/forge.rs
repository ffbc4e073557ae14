//! `ForgeClient` (spec §6.2): the interface the engine consumes for all
//! review-request mutation, plus a real implementation speaking GitHub's
//! GraphQL API through `octocrab`.
//!
//! The trait's methods are synchronous — every other part of the engine
//! (push reconciler, merge engine, clean planner) is written as ordinary
//! blocking Rust, matching the rest of this codebase's style. [`RealForge`]
//! owns a small `tokio` runtime internally and blocks on it per call; this
//! keeps the async-only `octocrab` client out of the engine's signatures
//! entirely.

use std::sync::OnceLock;
use std::time::Duration;

use octocrab::Octocrab;

use crate::error::{JasprError, Result};
use crate::model::{CheckState, PullRequest};

/// Narrows `getPullRequests` to those whose `head_ref` is in the given set,
/// when the caller already knows which commit-ids it cares about.
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    pub commit_ids: Option<Vec<String>>,
}

pub trait ForgeClient {
    fn get_pull_requests(&self, filter: Option<&CommitFilter>) -> Result<Vec<PullRequest>>;
    fn get_pull_requests_by_id(&self, ids: Option<&[String]>) -> Result<Vec<PullRequest>>;
    fn get_pull_requests_by_head_ref(&self, head: &str) -> Result<Vec<PullRequest>>;

    fn create_pull_request(&self, pr: &PullRequest) -> Result<PullRequest>;
    /// Updates `base_ref`, `title`, `body` by `forge_id`.
    fn update_pull_request(&self, pr: &PullRequest) -> Result<()>;
    fn close_pull_request(&self, pr: &PullRequest) -> Result<()>;
    fn approve_pull_request(&self, pr: &PullRequest) -> Result<()>;

    /// No-op against a real forge (GitHub closes/merges PRs on its own once
    /// their head ref is gone or merged); the in-process test fake uses this
    /// to make that transition deterministic (spec §9 Open Questions).
    fn auto_close_prs(&self) -> Result<()> {
        Ok(())
    }
}

/// Retry policy for the forge's "submitted too quickly" rate limit (spec §5
/// Rate-limit discipline): up to 4 attempts, waiting 0s / 60s / 90s / 120s.
const RETRY_DELAYS_SECS: &[u64] = &[0, 60, 90, 120];

fn with_rate_limit_retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last_err = None;
    for (attempt, &delay) in RETRY_DELAYS_SECS.iter().enumerate() {
        if delay > 0 {
            std::thread::sleep(Duration::from_secs(delay));
        }
        match f() {
            Ok(v) => return Ok(v),
            Err(JasprError::Forge(msg)) if is_rate_limited(&msg) => {
                log::warn!(
                    "forge rate-limited us (attempt {}/{}): {msg}",
                    attempt + 1,
                    RETRY_DELAYS_SECS.len()
                );
                last_err = Some(JasprError::Forge(msg));
            }
            Err(other) => return Err(other),
        }
    }
    Err(JasprError::RateLimitExceeded {
        attempts: RETRY_DELAYS_SECS.len() as u32,
    })
    .inspect_err(|_| {
        if let Some(e) = last_err {
            log::error!("final rate-limit error: {e}");
        }
    })
}

fn is_rate_limited(msg: &str) -> bool {
    msg.to_lowercase().contains("submitted too quickly")
}

/// GitHub-backed `ForgeClient`. The repository's GraphQL node id is resolved
/// lazily on first use and cached for the client's lifetime (spec §9: "a
/// mutable process-wide repository id cache... model it as an owned
/// once-initialized cell").
pub struct RealForge {
    client: Octocrab,
    owner: String,
    repo: String,
    repo_node_id: OnceLock<String>,
    runtime: tokio::runtime::Runtime,
}

impl RealForge {
    pub fn new(client: Octocrab, owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| JasprError::Forge(e.to_string()))?;
        Ok(Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            repo_node_id: OnceLock::new(),
            runtime,
        })
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn repo_node_id(&self) -> Result<&str> {
        if let Some(id) = self.repo_node_id.get() {
            return Ok(id);
        }
        let query = format!(
            r#"query {{ repository(owner: "{}", name: "{}") {{ id }} }}"#,
            self.owner, self.repo
        );
        let response: serde_json::Value = self
            .block_on(self.client.graphql(&serde_json::json!({ "query": query })))
            .map_err(|e| JasprError::Forge(e.to_string()))?;
        let id = response["data"]["repository"]["id"]
            .as_str()
            .ok_or_else(|| JasprError::Forge("missing repository id in GraphQL response".into()))?
            .to_string();
        Ok(self.repo_node_id.get_or_init(|| id))
    }

    /// Joins each open PR's aggregate check-suite state and review decision
    /// by number, via the GraphQL fields the REST `pulls/list` response
    /// doesn't carry (spec §6.2). Keyed by PR number; a PR missing from the
    /// map (e.g. one with no commits yet) is left `checks: None, approved:
    /// None` by the caller, same as an unrecognized state string.
    fn fetch_check_and_review_state(&self) -> Result<std::collections::HashMap<u64, (Option<String>, Option<String>)>> {
        let query = format!(
            r#"query {{
                repository(owner: "{}", name: "{}") {{
                    pullRequests(states: OPEN, first: 100) {{
                        nodes {{
                            number
                            reviewDecision
                            commits(last: 1) {{
                                nodes {{
                                    commit {{
                                        statusCheckRollup {{ state }}
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}"#,
            self.owner, self.repo
        );
        let response: serde_json::Value = self
            .block_on(self.client.graphql(&serde_json::json!({ "query": query })))
            .map_err(|e| JasprError::Forge(e.to_string()))?;

        let nodes = response["data"]["repository"]["pullRequests"]["nodes"]
            .as_array()
            .ok_or_else(|| JasprError::Forge("missing pull requests in GraphQL response".into()))?;

        let mut result = std::collections::HashMap::new();
        for node in nodes {
            let Some(number) = node["number"].as_u64() else { continue };
            let review_decision = node["reviewDecision"].as_str().map(str::to_string);
            let check_state = node["commits"]["nodes"][0]["commit"]["statusCheckRollup"]["state"]
                .as_str()
                .map(str::to_string);
            result.insert(number, (check_state, review_decision));
        }
        Ok(result)
    }
}

impl ForgeClient for RealForge {
    fn get_pull_requests(&self, filter: Option<&CommitFilter>) -> Result<Vec<PullRequest>> {
        with_rate_limit_retry(|| {
            let page = self
                .block_on(
                    self.client
                        .pulls(&self.owner, &self.repo)
                        .list()
                        .state(octocrab::params::State::Open)
                        .per_page(100)
                        .send(),
                )
                .map_err(|e| JasprError::Forge(e.to_string()))?;

            let mut prs: Vec<PullRequest> = page.items.into_iter().map(From::from).collect();

            let review_state = self.fetch_check_and_review_state()?;
            for pr in &mut prs {
                if let Some(number) = pr.number {
                    if let Some((check_state, review_decision)) = review_state.get(&number) {
                        pr.checks = check_state.as_deref().and_then(map_check_state);
                        pr.approved = review_decision.as_deref().and_then(map_review_decision);
                    }
                }
            }

            if let Some(CommitFilter {
                commit_ids: Some(ids),
            }) = filter
            {
                prs.retain(|pr| {
                    ids.iter()
                        .any(|id| pr.commit_id.as_deref() == Some(id.as_str()))
                });
            }
            Ok(prs)
        })
    }

    fn get_pull_requests_by_id(&self, ids: Option<&[String]>) -> Result<Vec<PullRequest>> {
        let all = self.get_pull_requests(None)?;
        Ok(match ids {
            None => all,
            Some(ids) => all
                .into_iter()
                .filter(|pr| pr.forge_id.as_deref().is_some_and(|id| ids.iter().any(|i| i == id)))
                .collect(),
        })
    }

    fn get_pull_requests_by_head_ref(&self, head: &str) -> Result<Vec<PullRequest>> {
        Ok(self
            .get_pull_requests(None)?
            .into_iter()
            .filter(|pr| pr.head_ref == head)
            .collect())
    }

    fn create_pull_request(&self, pr: &PullRequest) -> Result<PullRequest> {
        with_rate_limit_retry(|| {
            let created = self
                .block_on(
                    self.client
                        .pulls(&self.owner, &self.repo)
                        .create(&pr.title, &pr.head_ref, &pr.base_ref)
                        .body(&pr.body)
                        .draft(pr.is_draft)
                        .send(),
                )
                .map_err(|e| JasprError::Forge(e.to_string()))?;
            Ok(PullRequest {
                commit_id: pr.commit_id.clone(),
                ..PullRequest::from(created)
            })
        })
    }

    fn update_pull_request(&self, pr: &PullRequest) -> Result<()> {
        with_rate_limit_retry(|| {
            let number = pr
                .number
                .ok_or_else(|| JasprError::Forge("cannot update a PR with no number".into()))?;
            self.block_on(
                self.client
                    .pulls(&self.owner, &self.repo)
                    .update(number)
                    .title(&pr.title)
                    .body(&pr.body)
                    .base(&pr.base_ref)
                    .send(),
            )
            .map_err(|e| JasprError::Forge(e.to_string()))?;
            Ok(())
        })
    }

    fn close_pull_request(&self, pr: &PullRequest) -> Result<()> {
        with_rate_limit_retry(|| {
            let number = pr
                .number
                .ok_or_else(|| JasprError::Forge("cannot close a PR with no number".into()))?;
            self.block_on(
                self.client
                    .pulls(&self.owner, &self.repo)
                    .update(number)
                    .state(octocrab::params::pulls::State::Closed)
                    .send(),
            )
            .map_err(|e| JasprError::Forge(e.to_string()))?;
            Ok(())
        })
    }

    fn approve_pull_request(&self, pr: &PullRequest) -> Result<()> {
        with_rate_limit_retry(|| {
            let number = pr
                .number
                .ok_or_else(|| JasprError::Forge("cannot approve a PR with no number".into()))?;
            self.block_on(
                self.client
                    .pulls(&self.owner, &self.repo)
                    .reviews(number)
                    .create()
                    .event(octocrab::params::pulls::ReviewEvent::Approve)
                    .send(),
            )
            .map_err(|e| JasprError::Forge(e.to_string()))?;
            Ok(())
        })
    }
}

impl From<octocrab::models::pulls::PullRequest> for PullRequest {
    // The REST `pulls/list` response has no check-suite or review-decision
    // fields; `get_pull_requests` joins those in afterward via
    // `fetch_check_and_review_state`, so both start unset here.
    fn from(p: octocrab::models::pulls::PullRequest) -> Self {
        PullRequest {
            forge_id: p.node_id.clone(),
            commit_id: None,
            number: Some(p.number),
            head_ref: p.head.ref_field,
            base_ref: p.base.ref_field,
            title: p.title.unwrap_or_default(),
            body: p.body.unwrap_or_default(),
            checks: None,
            approved: None,
            is_draft: p.draft.unwrap_or(false),
            permalink: p.html_url.map(|u| u.to_string()),
        }
    }
}

/// Map a forge aggregate check-suite state to the tri-state the status
/// engine renders (spec §6.2, §4.4): `SUCCESS -> Success`,
/// `FAILURE|ERROR -> Failure`, `PENDING -> Pending`, anything else -> `None`
/// ("unknown", rendered as empty, never promoted to pending — spec §9 Open
/// Questions).
pub fn map_check_state(state: &str) -> Option<CheckState> {
    match state {
        "SUCCESS" => Some(CheckState::Success),
        "FAILURE" | "ERROR" => Some(CheckState::Failure),
        "PENDING" => Some(CheckState::Pending),
        _ => None,
    }
}

/// Map a forge review-decision to the tri-state the status engine renders:
/// `APPROVED -> true`, `CHANGES_REQUESTED -> false`, anything else -> `None`.
pub fn map_review_decision(decision: &str) -> Option<bool> {
    match decision {
        "APPROVED" => Some(true),
        "CHANGES_REQUESTED" => Some(false),
        _ => None,
    }
}
