//! Ambient configuration layer (SPEC_FULL §B.3): CLI flag > `git config
//! jaspr.<key>` > built-in default, resolved once per invocation into a
//! small typed settings struct.

use crate::error::Result;
use crate::git::GitClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub remote: String,
    pub branch_prefix: String,
    pub named_branch_prefix: String,
    pub dont_push_pattern: String,
    pub auto_merge_poll_seconds: u64,
    pub auto_merge_max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch_prefix: "jaspr".to_string(),
            named_branch_prefix: "jaspr-named".to_string(),
            dont_push_pattern: r"^(dont-push|wip|draft)\b.*".to_string(),
            auto_merge_poll_seconds: 15,
            auto_merge_max_attempts: 240,
        }
    }
}

/// CLI-flag overrides; any field left `None` falls through to `git config`
/// then the built-in default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub remote: Option<String>,
    pub branch_prefix: Option<String>,
    pub named_branch_prefix: Option<String>,
    pub dont_push_pattern: Option<String>,
    pub auto_merge_poll_seconds: Option<u64>,
    pub auto_merge_max_attempts: Option<u32>,
}

fn resolve_string(
    git: &impl GitClient,
    flag: Option<String>,
    key: &str,
    default: String,
) -> Result<String> {
    if let Some(v) = flag {
        return Ok(v);
    }
    Ok(git.get_config_value(key)?.unwrap_or(default))
}

fn resolve_parsed<T: std::str::FromStr>(
    git: &impl GitClient,
    flag: Option<T>,
    key: &str,
    default: T,
) -> Result<T> {
    if let Some(v) = flag {
        return Ok(v);
    }
    Ok(git
        .get_config_value(key)?
        .and_then(|s| s.parse().ok())
        .unwrap_or(default))
}

/// Resolve settings for this invocation, reading `git config jaspr.<key>`
/// for any field `overrides` didn't supply (SPEC_FULL §B.3).
pub fn resolve(git: &impl GitClient, overrides: Overrides) -> Result<Settings> {
    let defaults = Settings::default();
    Ok(Settings {
        remote: resolve_string(git, overrides.remote, "jaspr.remote", defaults.remote)?,
        branch_prefix: resolve_string(
            git,
            overrides.branch_prefix,
            "jaspr.branchPrefix",
            defaults.branch_prefix,
        )?,
        named_branch_prefix: resolve_string(
            git,
            overrides.named_branch_prefix,
            "jaspr.namedBranchPrefix",
            defaults.named_branch_prefix,
        )?,
        dont_push_pattern: resolve_string(
            git,
            overrides.dont_push_pattern,
            "jaspr.dontPushPattern",
            defaults.dont_push_pattern,
        )?,
        auto_merge_poll_seconds: resolve_parsed(
            git,
            overrides.auto_merge_poll_seconds,
            "jaspr.autoMergePollSeconds",
            defaults.auto_merge_poll_seconds,
        )?,
        auto_merge_max_attempts: resolve_parsed(
            git,
            overrides.auto_merge_max_attempts,
            "jaspr.autoMergeMaxAttempts",
            defaults.auto_merge_max_attempts,
        )?,
    })
}

/// Persist the resolved remote/target as `jaspr.*` config (used by `jaspr
/// init`, SPEC_FULL §C).
pub fn persist_init_defaults(git: &impl GitClient, remote: &str, target: &str) -> Result<()> {
    git.set_config_value("jaspr.remote", remote)?;
    git.set_config_value("jaspr.target", target)?;
    Ok(())
}
