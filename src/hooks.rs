//! The `commit-msg` hook and its installer (SPEC_FULL §C, spec §4.2/§4.6 step
//! 2): stamps a `commit-id:` footer on every commit as it's made, so the push
//! reconciler never has to stop mid-stack to mint one.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use eyre::{Result, WrapErr, bail};
use owo_colors::OwoColorize;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::message::{self, Footers};
use crate::push::random_commit_id;
use crate::util::CommandExt as _;
use crate::{cmd, git::find_nearest_git_dir};

const HOOK_NAME: &str = "commit-msg";
const PROLOGUE: &str = "# jaspr-installer: managed";
const SHIM_TEMPLATE: &str = "#!/bin/sh
# jaspr-installer: managed
# This hook is managed by jaspr. Manual edits may be overwritten by
# `jaspr install-commit-id-hook`.

jaspr hook commit-msg \"$@\"
";

/// Install the `commit-msg` shim into the repository's hooks directory.
/// Refuses to clobber a hook it didn't write unless `force` is set, and
/// refuses to install outside the repository unless `allow_global` is set
/// (spec §6.3; mirrors the same security check as other hook installers in
/// this ecosystem).
pub fn install(repo_root: &Path, force: bool, allow_global: bool) -> Result<()> {
    let hooks_dir = resolve_hooks_dir(repo_root, allow_global)?;
    fs::create_dir_all(&hooks_dir)
        .wrap_err_with(|| format!("failed to create hooks directory: {}", hooks_dir.display()))?;

    let hook_path = hooks_dir.join(HOOK_NAME);
    if hook_path.exists() && !force {
        let content = fs::read_to_string(&hook_path)
            .wrap_err_with(|| format!("failed to read existing hook: {}", hook_path.display()))?;
        if !content.contains(PROLOGUE) {
            bail!(
                "refusing to overwrite unmanaged hook at {}; use --force to overwrite it",
                hook_path.display()
            );
        }
    }

    fs::write(&hook_path, SHIM_TEMPLATE)
        .wrap_err_with(|| format!("failed to write hook: {}", hook_path.display()))?;

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&hook_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&hook_path, perms)?;
    }

    log::info!("installed {}", HOOK_NAME.green());
    Ok(())
}

fn resolve_hooks_dir(repo_root: &Path, allow_global: bool) -> Result<PathBuf> {
    let git_dir = find_nearest_git_dir(repo_root)
        .ok_or_else(|| eyre::eyre!("no git directory found above {}", repo_root.display()))?;

    let configured = cmd!("git -C", repo_root.display(), "config --get core.hooksPath")
        .stderr(Stdio::piped())
        .unwrap_output();
    if !configured.status.success() {
        return Ok(git_dir.join("hooks"));
    }
    let configured = PathBuf::from(crate::util::to_trimmed_string_lossy(&configured.stdout));

    let root = repo_root.canonicalize().unwrap_or_else(|_| repo_root.to_path_buf());
    let abs_hooks = if configured.is_absolute() {
        configured
    } else {
        repo_root.join(configured)
    };
    let abs_hooks = abs_hooks.canonicalize().unwrap_or(abs_hooks);

    if !abs_hooks.starts_with(&root) {
        if allow_global {
            log::warn!(
                "installing to an external hooks path (allowed by --allow-global): {}",
                abs_hooks.display()
            );
        } else {
            bail!(
                "by default jaspr will not install to an external/global hooks path: {}\nuse --allow-global to override",
                abs_hooks.display()
            );
        }
    }

    Ok(abs_hooks)
}

/// Run the `commit-msg` hook body against a message file: stamp a
/// `commit-id:` footer unless one is already present, or the commit is a
/// `squash!`/`fixup!` marker that will be folded away before it ever reaches
/// the reconciler.
pub fn run_commit_msg_hook(msg_file: &Path) -> Result<()> {
    let content = fs::read_to_string(msg_file)
        .wrap_err_with(|| format!("failed to read commit message file: {}", msg_file.display()))?;

    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with("squash! ") || first_line.starts_with("fixup! ") {
        return Ok(());
    }

    let mut footers = message::footers(&content);
    if footers.get("commit-id").is_some() {
        return Ok(());
    }

    let id = random_commit_id(&mut rand::rng());
    footers.insert("commit-id", id);
    let stamped = add_footers_preserving_order(&content, &footers);

    fs::write(msg_file, stamped)
        .wrap_err_with(|| format!("failed to write commit message file: {}", msg_file.display()))?;
    Ok(())
}

fn add_footers_preserving_order(content: &str, footers: &Footers) -> String {
    message::add_footers(content, footers)
}
