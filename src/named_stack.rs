//! Named-stack operations (spec §4.10): list, checkout, rename and delete on
//! `NamedStackRef` pointers.

use crate::config::Settings;
use crate::error::{JasprError, Result};
use crate::git::{GitClient, RefSpec};
use crate::refs;

/// One named stack as seen on the remote: its decoded target/name plus the
/// branch it's encoded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStackListing {
    pub branch: String,
    pub target: String,
    pub stack_name: String,
}

/// Enumerate NamedStackRefs, optionally scoped to one target, sorted by
/// stack name (spec §4.10 "List").
pub fn list<G: GitClient>(git: &G, settings: &Settings, target: Option<&str>) -> Result<Vec<NamedStackListing>> {
    let mut out: Vec<NamedStackListing> = git
        .get_remote_branches(&settings.remote)?
        .into_iter()
        .filter_map(|name| {
            let r = refs::parse_named(&name, &settings.named_branch_prefix)?;
            if target.is_some_and(|t| t != r.target) {
                return None;
            }
            Some(NamedStackListing {
                branch: name,
                target: r.target,
                stack_name: r.stack_name,
            })
        })
        .collect();
    out.sort_by(|a, b| a.stack_name.cmp(&b.stack_name));
    Ok(out)
}

fn find<G: GitClient>(git: &G, settings: &Settings, target: &str, stack_name: &str) -> Result<NamedStackListing> {
    list(git, settings, Some(target))?
        .into_iter()
        .find(|l| l.stack_name == stack_name)
        .ok_or_else(|| JasprError::UnknownNamedStack(stack_name.to_string()))
}

/// Checkout the named stack as a local branch (spec §4.10 "Checkout"): reuse
/// a same-named local branch only if its upstream already matches the
/// NamedStackRef, otherwise create a fresh tracking branch.
pub fn checkout<G: GitClient>(git: &G, settings: &Settings, target: &str, stack_name: &str) -> Result<String> {
    let found = find(git, settings, target, stack_name)?;
    let remote_ref = format!("{}/{}", settings.remote, found.branch);

    if git.get_branch_names()?.iter().any(|b| b == stack_name) {
        let prior_head = git.get_current_branch_name()?;
        git.checkout(stack_name)?;
        let upstream = git.get_upstream_branch_name(stack_name, &settings.remote)?;
        if upstream.as_deref() != Some(found.branch.as_str()) {
            if let Some(prior) = prior_head {
                git.checkout(&prior)?;
            }
            return Err(JasprError::NamedStackCheckoutConflict(stack_name.to_string()));
        }
    } else {
        git.branch(stack_name, Some(&remote_ref), false)?;
        git.checkout(stack_name)?;
        git.set_upstream_branch_for_local_branch(stack_name, &settings.remote, Some(&found.branch))?;
    }

    Ok(stack_name.to_string())
}

/// Rename a named stack: atomically push the old tip under the new name and
/// delete the old one, then repoint any local branch tracking it (spec
/// §4.10 "Rename").
pub fn rename<G: GitClient>(
    git: &G,
    settings: &Settings,
    target: &str,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let listing = list(git, settings, Some(target))?;
    if !listing.iter().any(|l| l.stack_name == old_name) {
        return Err(JasprError::UnknownNamedStack(old_name.to_string()));
    }
    if listing.iter().any(|l| l.stack_name == new_name) {
        return Err(JasprError::NamedStackNameCollision(
            new_name.to_string(),
            target.to_string(),
        ));
    }

    let old_branch = refs::encode_named(&settings.named_branch_prefix, target, old_name);
    let new_branch = refs::encode_named(&settings.named_branch_prefix, target, new_name);
    let remote_old = format!("{}/{}", settings.remote, old_branch);

    git.push(
        &[
            RefSpec::force_update(remote_old, new_branch.clone()),
            RefSpec::delete(old_branch.clone()),
        ],
        &settings.remote,
    )?;

    for local in git.get_branch_names()? {
        if git.get_upstream_branch_name(&local, &settings.remote)?.as_deref() == Some(old_branch.as_str()) {
            git.set_upstream_branch_for_local_branch(&local, &settings.remote, Some(&new_branch))?;
        }
    }

    Ok(())
}

/// Delete a named stack: force-delete its pointer and unset (never delete)
/// the upstream of any local branch that tracked it (spec §4.10 "Delete").
pub fn delete<G: GitClient>(git: &G, settings: &Settings, target: &str, stack_name: &str) -> Result<()> {
    let found = find(git, settings, target, stack_name)?;

    git.push(&[RefSpec::delete(found.branch.clone())], &settings.remote)?;

    for local in git.get_branch_names()? {
        if git.get_upstream_branch_name(&local, &settings.remote)?.as_deref() == Some(found.branch.as_str()) {
            git.set_upstream_branch_for_local_branch(&local, &settings.remote, None)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Commit, Ident};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeGit {
        remote_branches: RefCell<HashMap<String, String>>,
        local_branches: RefCell<Vec<String>>,
        current_branch: RefCell<String>,
        upstreams: RefCell<HashMap<String, String>>,
    }

    impl FakeGit {
        fn new() -> Self {
            Self {
                remote_branches: RefCell::new(HashMap::new()),
                local_branches: RefCell::new(vec!["main".to_string()]),
                current_branch: RefCell::new("main".to_string()),
                upstreams: RefCell::new(HashMap::new()),
            }
        }
    }

    impl GitClient for FakeGit {
        fn fetch(&self, _: &str, _: bool) -> Result<()> {
            Ok(())
        }
        fn log(&self, _: &str, _: Option<usize>) -> Result<Vec<Commit>> {
            Ok(vec![])
        }
        fn log_all(&self) -> Result<Vec<Commit>> {
            Ok(vec![])
        }
        fn log_range(&self, _: &str, _: &str) -> Result<Vec<Commit>> {
            Ok(vec![])
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
            Ok(Some(self.current_branch.borrow().clone()))
        }
        fn ref_exists(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn get_branch_names(&self) -> Result<Vec<String>> {
            Ok(self.local_branches.borrow().clone())
        }
        fn get_remote_branches(&self, _: &str) -> Result<Vec<String>> {
            Ok(self.remote_branches.borrow().keys().cloned().collect())
        }
        fn get_remote_branches_by_id(&self, _: &str) -> Result<HashMap<String, String>> {
            Ok(self.remote_branches.borrow().clone())
        }
        fn reset(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn branch(&self, name: &str, _: Option<&str>, _: bool) -> Result<()> {
            self.local_branches.borrow_mut().push(name.to_string());
            Ok(())
        }
        fn checkout(&self, r#ref: &str) -> Result<()> {
            *self.current_branch.borrow_mut() = r#ref.to_string();
            Ok(())
        }
        fn delete_branches(&self, _: &[String], _: bool) -> Result<()> {
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
        fn push(&self, refspecs: &[RefSpec], _: &str) -> Result<()> {
            let mut branches = self.remote_branches.borrow_mut();
            for spec in refspecs {
                if spec.local.is_empty() {
                    branches.remove(&spec.remote);
                } else {
                    let local = spec.local.trim_start_matches('+');
                    let resolved = local
                        .strip_prefix("origin/")
                        .and_then(|b| branches.get(b).cloned())
                        .unwrap_or_else(|| local.to_string());
                    branches.insert(spec.remote.clone(), resolved);
                }
            }
            Ok(())
        }
        fn push_with_lease(
            &self,
            refspecs: &[RefSpec],
            remote: &str,
            _: &HashMap<String, Option<String>>,
        ) -> Result<()> {
            self.push(refspecs, remote)
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
        fn get_upstream_branch_name(&self, local_branch: &str, _: &str) -> Result<Option<String>> {
            Ok(self.upstreams.borrow().get(local_branch).cloned())
        }
        fn set_upstream_branch_for_local_branch(
            &self,
            local_branch: &str,
            _: &str,
            ref_or_null: Option<&str>,
        ) -> Result<()> {
            let mut upstreams = self.upstreams.borrow_mut();
            match ref_or_null {
                Some(r) => {
                    upstreams.insert(local_branch.to_string(), r.to_string());
                }
                None => {
                    upstreams.remove(local_branch);
                }
            }
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

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn list_filters_by_target_and_sorts_by_name() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/zeta".to_string(), "h1".to_string());
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/alpha".to_string(), "h2".to_string());
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/release/beta".to_string(), "h3".to_string());

        let settings = settings();
        let listed = list(&git, &settings, Some("main")).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].stack_name, "alpha");
        assert_eq!(listed[1].stack_name, "zeta");
    }

    #[test]
    fn checkout_creates_tracking_branch_when_none_exists() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/feature".to_string(), "h1".to_string());

        let settings = settings();
        checkout(&git, &settings, "main", "feature").unwrap();

        assert!(git.local_branches.borrow().contains(&"feature".to_string()));
        assert_eq!(*git.current_branch.borrow(), "feature");
        assert_eq!(
            git.upstreams.borrow().get("feature").cloned(),
            Some("jaspr-named/main/feature".to_string())
        );
    }

    #[test]
    fn checkout_conflict_restores_prior_head() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/feature".to_string(), "h1".to_string());
        git.local_branches.borrow_mut().push("feature".to_string());
        // Upstream points elsewhere, simulating an unrelated local branch of
        // the same name.
        git.upstreams
            .borrow_mut()
            .insert("feature".to_string(), "some/other/ref".to_string());

        let settings = settings();
        let err = checkout(&git, &settings, "main", "feature").unwrap_err();
        assert!(matches!(err, JasprError::NamedStackCheckoutConflict(_)));
        assert_eq!(*git.current_branch.borrow(), "main");
    }

    #[test]
    fn rename_repoints_tracking_local_branches() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/old".to_string(), "h1".to_string());
        git.local_branches.borrow_mut().push("old".to_string());
        git.upstreams
            .borrow_mut()
            .insert("old".to_string(), "jaspr-named/main/old".to_string());

        let settings = settings();
        rename(&git, &settings, "main", "old", "new").unwrap();

        assert!(!git.remote_branches.borrow().contains_key("jaspr-named/main/old"));
        assert!(git.remote_branches.borrow().contains_key("jaspr-named/main/new"));
        assert_eq!(
            git.upstreams.borrow().get("old").cloned(),
            Some("jaspr-named/main/new".to_string())
        );
    }

    #[test]
    fn rename_refuses_on_name_collision() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/old".to_string(), "h1".to_string());
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/new".to_string(), "h2".to_string());

        let settings = settings();
        let err = rename(&git, &settings, "main", "old", "new").unwrap_err();
        assert!(matches!(err, JasprError::NamedStackNameCollision(..)));
    }

    #[test]
    fn delete_unsets_upstream_without_deleting_local_branch() {
        let git = FakeGit::new();
        git.remote_branches
            .borrow_mut()
            .insert("jaspr-named/main/feature".to_string(), "h1".to_string());
        git.local_branches.borrow_mut().push("feature".to_string());
        git.upstreams
            .borrow_mut()
            .insert("feature".to_string(), "jaspr-named/main/feature".to_string());

        let settings = settings();
        delete(&git, &settings, "main", "feature").unwrap();

        assert!(!git.remote_branches.borrow().contains_key("jaspr-named/main/feature"));
        assert!(git.local_branches.borrow().contains(&"feature".to_string()));
        assert!(git.upstreams.borrow().get("feature").is_none());
    }

    #[test]
    fn delete_unknown_stack_errors() {
        let git = FakeGit::new();
        let settings = settings();
        let err = delete(&git, &settings, "main", "nope").unwrap_err();
        assert!(matches!(err, JasprError::UnknownNamedStack(_)));
    }
}
