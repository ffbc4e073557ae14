//! Command-line surface (spec §6.3: "implementation out of scope", wired up
//! here only as the ambient driver the engine modules need to be runnable).
//! Argument parsing, help text and logging setup follow the same
//! `clap`/`eyre`/`color-eyre`/`env_logger` stack the rest of this crate
//! already pulls in; none of the decision logic lives here.

use std::env;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::{Context as _, Result, bail, eyre};
use owo_colors::OwoColorize;

use crate::automerge::{self, AutoMergeInputs};
use crate::clean::{self, CleanInputs};
use crate::config::{self, Overrides, Settings};
use crate::git::{GitClient, RealGitClient};
use crate::merge::{self, MergeInputs};
use crate::model::Stack;
use crate::named_stack;
use crate::push::{self, PushInputs};
use crate::re;
use crate::refs;
use crate::status::{self, NamedStackOwnership, StatusInputs, Warnings};

#[derive(Parser)]
#[command(name = "jaspr", version, about = "Stacked pull requests for GitHub: one PR per commit, kept in sync")]
pub struct Cli {
    /// Remote to reconcile against (default: `jaspr.remote` config, else `origin`).
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Target branch to stack against (default: `jaspr.target` config).
    #[arg(long, global = true)]
    target: Option<String>,

    /// `trace`, `debug`, `info`, `warn`, or `error`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Limit the operation to the first/last N commits of the stack; a
    /// negative value drops the last `|N|` (spec §4.6 step 1).
    #[arg(long, global = true, allow_hyphen_values = true)]
    count: Option<i64>,

    /// Explicit named-stack name, overriding the auto-generated one.
    #[arg(long, global = true)]
    stack_name: Option<String>,

    /// Local ref to reconcile (default: `HEAD`).
    #[arg(long, global = true, default_value = "HEAD")]
    local_ref: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the stack's status table against the forge.
    Status,

    /// Map the local commit stack onto per-commit branches, a named-stack
    /// pointer, and forge PRs.
    Push,

    /// Merge a fully-mergeable stack against the target branch.
    Merge,

    /// Poll until the stack is mergeable, then merge it, from a disposable
    /// scratch clone.
    AutoMerge {
        /// Override `jaspr.autoMergePollSeconds`.
        #[arg(long)]
        poll_seconds: Option<u64>,
        /// Override `jaspr.autoMergeMaxAttempts`.
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Delete branches orphaned, emptied, or abandoned by previous pushes.
    Clean {
        /// Also close the PRs of abandoned commits before deleting branches.
        #[arg(long)]
        clean_abandoned_prs: bool,
        /// Don't filter by author; clean every matching branch.
        #[arg(long)]
        clean_all_commits: bool,
    },

    /// Record this repository's default remote/target and install the
    /// commit-id hook.
    Init,

    /// Install the `commit-msg` shim that stamps `commit-id:` footers.
    InstallCommitIdHook {
        /// Overwrite an existing unmanaged hook.
        #[arg(long)]
        force: bool,
        /// Allow installing outside the repository (a shared/global hooks path).
        #[arg(long)]
        allow_global: bool,
    },

    /// Named-stack management (spec §4.10).
    #[command(subcommand)]
    Stack(StackCommand),

    /// Invoked by the installed git hook shim; not a user-facing command.
    #[command(subcommand, hide = true)]
    Hook(HookCommand),
}

#[derive(Subcommand)]
enum StackCommand {
    /// List named stacks, optionally scoped to one target.
    List,
    /// Checkout a named stack as a local branch.
    Checkout { name: String },
    /// Rename a named stack.
    Rename { old_name: String, new_name: String },
    /// Delete a named stack's pointer.
    Delete { name: String },
}

#[derive(Subcommand)]
enum HookCommand {
    #[command(name = "commit-msg")]
    CommitMsg(CommitMsgArgs),
}

#[derive(Args)]
struct CommitMsgArgs {
    msg_file: PathBuf,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // The hook subcommand runs before a repo/forge context is needed (and
    // must stay fast: it's on the hot path of every `git commit`).
    if let Command::Hook(HookCommand::CommitMsg(args)) = &cli.command {
        return crate::hooks::run_commit_msg_hook(&args.msg_file);
    }

    let repo_root = env::current_dir().wrap_err("failed to resolve current directory")?;
    let git = RealGitClient::open(&repo_root)?;

    let overrides = Overrides {
        remote: cli.remote.clone(),
        ..Default::default()
    };
    let settings = config::resolve(&git, overrides)?;
    let target = resolve_target(&git, &settings, cli.target.as_deref())?;

    let result = match &cli.command {
        Command::Status => run_status(&git, &settings, &cli.local_ref, &target),
        Command::Push => run_push(&git, &settings, &cli, &target),
        Command::Merge => run_merge(&git, &settings, &cli, &target),
        Command::AutoMerge { poll_seconds, max_attempts } => {
            run_auto_merge(&repo_root, &settings, &cli, &target, *poll_seconds, *max_attempts)
        }
        Command::Clean { clean_abandoned_prs, clean_all_commits } => {
            run_clean(&git, &settings, *clean_abandoned_prs, *clean_all_commits)
        }
        Command::Init => run_init(&git, &settings, &target),
        Command::InstallCommitIdHook { force, allow_global } => {
            crate::hooks::install(&repo_root, *force, *allow_global)
        }
        Command::Stack(cmd) => run_stack(&git, &settings, &target, cmd),
        Command::Hook(_) => unreachable!("handled above"),
    };

    if result.is_ok() {
        maybe_print_tip();
    }
    result
}

/// Show one not-yet-seen tip, at most once per machine per tip (§6.4). Never
/// lets a tips-file problem affect the command's own exit status.
fn maybe_print_tip() {
    let mut tracker = crate::tips::TipTracker::load();
    if let Some(text) = tracker.next_unseen() {
        eprintln!("{}", text.dimmed());
        tracker.save();
    }
}

fn init_logging(level: &str) {
    color_eyre::install().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_target(git: &impl GitClient, settings: &Settings, flag: Option<&str>) -> Result<String> {
    if let Some(t) = flag {
        return Ok(t.to_string());
    }
    if let Some(t) = git.get_config_value("jaspr.target")? {
        return Ok(t);
    }
    bail!("no target branch configured; pass --target or run `jaspr init --target <branch>`")
}

/// Parse `owner`/`repo` out of an `origin`-style remote URL
/// (`git@host:owner/repo.git` or `https://host/owner/repo(.git)?`).
fn parse_remote_owner_repo(uri: &str) -> Result<(String, String, String)> {
    let caps = re!(r"(?:git@|https://)([^:/]+)[:/]([^/]+)/([^/]+?)(?:\.git)?/?$")
        .captures(uri)
        .ok_or_else(|| eyre!("could not parse owner/repo from remote URL: {uri}"))?;
    Ok((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()))
}

fn forge_context(git: &impl GitClient, settings: &Settings) -> Result<(String, String, String)> {
    let uri = git
        .get_remote_uri_or_null(&settings.remote)?
        .ok_or_else(|| eyre!("remote `{}` has no URL configured", settings.remote))?;
    parse_remote_owner_repo(&uri)
}

fn build_forge(owner: &str, repo: &str) -> Result<crate::forge::RealForge> {
    let token = env::var("GITHUB_TOKEN").wrap_err("GITHUB_TOKEN must be set to talk to the forge")?;
    let client = octocrab::Octocrab::builder()
        .personal_token(token)
        .build()
        .wrap_err("failed to build GitHub client")?;
    crate::forge::RealForge::new(client, owner, repo).map_err(Into::into)
}

fn load_stack(git: &impl GitClient, settings: &Settings, local_ref: &str, target: &str, count: Option<i64>) -> Result<(Stack, usize)> {
    git.fetch(&settings.remote, true)?;
    let remote_target = format!("{}/{target}", settings.remote);
    let behind = git.log_range(local_ref, &remote_target)?.len();
    let raw = git.get_local_commit_stack(&settings.remote, local_ref, target)?;
    let sliced = crate::model::slice_by_count(raw, count)?;
    Ok((Stack::new(sliced), behind))
}

fn run_status(git: &impl GitClient, settings: &Settings, local_ref: &str, target: &str) -> Result<()> {
    let (_, owner, repo) = forge_context(git, settings)?;
    let forge = build_forge(&owner, &repo)?;

    let (stack, behind_by) = load_stack(git, settings, local_ref, target, None)?;
    let duplicates = stack.duplicate_ids();

    let all_prs = forge.get_pull_requests(None)?;
    let target_prs: Vec<_> = refs::filter_prs_for_target(&all_prs, &settings.branch_prefix, target)
        .into_iter()
        .cloned()
        .collect();
    let remote_branches = git.get_remote_branches_by_id(&settings.remote)?;
    let live_branches = status::live_branches_for_target(&remote_branches, &settings.branch_prefix, target);

    let rows = status::compute(&StatusInputs {
        stack: &stack,
        prefix: &settings.branch_prefix,
        target,
        live_branches: &live_branches,
        prs: &target_prs,
        behind_by,
    });

    let ownership = find_ownership(git, settings, target, &stack)?;
    let table = status::render(
        &rows,
        &Warnings {
            remote: &settings.remote,
            target,
            behind_by,
            duplicates: &duplicates,
            ownership: ownership.as_ref(),
        },
    );
    print!("{table}");
    Ok(())
}

/// Best-effort named-stack ownership lookup for the status footer: the
/// single `NamedStackRef` (if any) whose `target..tip` range contains every
/// id in `stack` (spec §4.4).
fn find_ownership(git: &impl GitClient, settings: &Settings, target: &str, stack: &Stack) -> Result<Option<NamedStackOwnership>> {
    let ids: std::collections::HashSet<&str> = stack.commits.iter().map(|c| c.id_or_empty()).collect();
    let listings = named_stack::list(git, settings, Some(target))?;
    let remote_target = format!("{}/{target}", settings.remote);
    for listing in listings {
        let remote_branch = format!("{}/{}", settings.remote, listing.branch);
        let Ok(reachable) = git.log_range(&remote_target, &remote_branch) else { continue };
        let reachable_ids: std::collections::HashSet<&str> = reachable.iter().filter_map(|c| c.id.as_deref()).collect();
        if ids.iter().all(|id| reachable_ids.contains(id)) {
            let ahead = stack.commits.iter().filter(|c| !reachable_ids.contains(c.id_or_empty())).count();
            let behind = reachable.len().saturating_sub(stack.len());
            return Ok(Some(NamedStackOwnership { stack_name: listing.stack_name, ahead, behind }));
        }
    }
    Ok(None)
}

fn run_push(git: &impl GitClient, settings: &Settings, cli: &Cli, target: &str) -> Result<()> {
    let (host, owner, repo) = forge_context(git, settings)?;
    let forge = build_forge(&owner, &repo)?;
    let mut rng = rand::rng();

    let inputs = PushInputs {
        local_ref: &cli.local_ref,
        target_ref: target,
        stack_name_override: cli.stack_name.as_deref(),
        count: cli.count,
        host: &host,
        owner: &owner,
        repo: &repo,
    };

    let outcome = push::push(git, &forge, settings, &mut rng, &inputs, &mut |abandoned| {
        eprintln!(
            "{} this push would abandon {} pull request(s); continuing will leave them open with no tracking branch.",
            "warning:".yellow(),
            abandoned.len()
        );
        true
    })?;

    match outcome {
        None => println!("nothing to push"),
        Some(o) => {
            println!("stack `{}`: {} branch(es) pushed, {} PR(s) created, {} PR(s) updated", o.stack_name, o.pushed_branches.len(), o.created_prs.len(), o.updated_prs.len());
        }
    }
    Ok(())
}

fn run_merge(git: &impl GitClient, settings: &Settings, cli: &Cli, target: &str) -> Result<()> {
    let (_, owner, repo) = forge_context(git, settings)?;
    let forge = build_forge(&owner, &repo)?;

    let outcome = merge::merge(
        git,
        &forge,
        settings,
        &MergeInputs { local_ref: &cli.local_ref, target_ref: target, count: cli.count },
    )?;
    println!(
        "merged {} commit(s), rebased {} PR(s), deleted {} branch(es)",
        outcome.merged_commit_ids.len(),
        outcome.rebased_prs.len(),
        outcome.deleted_branches.len()
    );
    Ok(())
}

fn run_auto_merge(
    repo_root: &std::path::Path,
    settings: &Settings,
    cli: &Cli,
    target: &str,
    poll_seconds: Option<u64>,
    max_attempts: Option<u32>,
) -> Result<()> {
    let git = RealGitClient::open(repo_root)?;
    let (_, owner, repo) = forge_context(&git, settings)?;
    let forge = build_forge(&owner, &repo)?;
    let remote_uri = git
        .get_remote_uri_or_null(&settings.remote)?
        .ok_or_else(|| eyre!("remote `{}` has no URL configured", settings.remote))?;

    let poll_interval = std::time::Duration::from_secs(poll_seconds.unwrap_or(settings.auto_merge_poll_seconds));
    let max_attempts = max_attempts.unwrap_or(settings.auto_merge_max_attempts);

    let outcome = automerge::run_in_scratch_clone(
        repo_root,
        &remote_uri,
        &forge,
        settings,
        &AutoMergeInputs { local_ref: &cli.local_ref, target_ref: target, count: cli.count },
        max_attempts,
        poll_interval,
        |rows, attempt| {
            let mergeable = rows.iter().filter(|r| r.checks == crate::status::Glyph::Yes).count();
            log::info!("auto-merge attempt {attempt}: {mergeable}/{} commit(s) checks-green", rows.len());
        },
        std::thread::sleep,
    )?;
    println!(
        "merged {} commit(s), rebased {} PR(s), deleted {} branch(es)",
        outcome.merged_commit_ids.len(),
        outcome.rebased_prs.len(),
        outcome.deleted_branches.len()
    );
    Ok(())
}

fn run_clean(git: &impl GitClient, settings: &Settings, clean_abandoned_prs: bool, clean_all_commits: bool) -> Result<()> {
    let (_, owner, repo) = forge_context(git, settings)?;
    let forge = build_forge(&owner, &repo)?;

    let outcome = clean::clean(git, &forge, settings, &CleanInputs { clean_abandoned_prs, clean_all_commits })?;
    println!(
        "deleted {} orphaned, {} empty-named, {} abandoned branch(es); closed {} PR(s)",
        outcome.orphaned.len(),
        outcome.empty_named.len(),
        outcome.abandoned.len(),
        outcome.closed_prs.len()
    );
    Ok(())
}

fn run_init(git: &impl GitClient, settings: &Settings, target: &str) -> Result<()> {
    config::persist_init_defaults(git, &settings.remote, target)?;
    println!(
        "configured jaspr.remote={} jaspr.target={}",
        settings.remote.green(),
        target.green()
    );
    Ok(())
}

fn run_stack(git: &impl GitClient, settings: &Settings, target: &str, cmd: &StackCommand) -> Result<()> {
    match cmd {
        StackCommand::List => {
            let listings = named_stack::list(git, settings, Some(target))?;
            if listings.is_empty() {
                println!("no named stacks for target `{target}`");
            }
            for l in listings {
                println!("{}  ({})", l.stack_name, l.branch);
            }
        }
        StackCommand::Checkout { name } => {
            let branch = named_stack::checkout(git, settings, target, name)?;
            println!("checked out `{branch}`");
        }
        StackCommand::Rename { old_name, new_name } => {
            named_stack::rename(git, settings, target, old_name, new_name)?;
            println!("renamed `{old_name}` to `{new_name}`");
        }
        StackCommand::Delete { name } => {
            named_stack::delete(git, settings, target, name)?;
            println!("deleted named stack `{name}`");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_remote_url() {
        let (host, owner, repo) = parse_remote_owner_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!((host.as_str(), owner.as_str(), repo.as_str()), ("github.com", "acme", "widgets"));
    }

    #[test]
    fn parses_ssh_remote_url() {
        let (host, owner, repo) = parse_remote_owner_repo("git@github.com:acme/widgets.git").unwrap();
        assert_eq!((host.as_str(), owner.as_str(), repo.as_str()), ("github.com", "acme", "widgets"));
    }

    #[test]
    fn parses_url_without_dot_git_suffix() {
        let (_, owner, repo) = parse_remote_owner_repo("https://github.com/acme/widgets").unwrap();
        assert_eq!((owner.as_str(), repo.as_str()), ("acme", "widgets"));
    }
}
