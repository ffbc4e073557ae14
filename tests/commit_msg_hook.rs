//! End-to-end coverage for the parts of jaspr that a real git repo and a
//! real installed hook are needed to exercise: everything forge-facing is
//! already covered by the in-process `Fake`-based unit tests in each engine
//! module, so this file sticks to the filesystem/process surface.

use std::fs;
use std::process::Command;

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use tempfile::TempDir;

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir.path())
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "Test User"]);
    dir
}

#[test]
fn install_commit_id_hook_writes_executable_shim() {
    let repo = init_repo();

    AssertCommand::cargo_bin("jaspr")
        .unwrap()
        .current_dir(repo.path())
        .arg("install-commit-id-hook")
        .assert()
        .success();

    let hook_path = repo.path().join(".git/hooks/commit-msg");
    let content = fs::read_to_string(&hook_path).unwrap();
    assert!(content.contains("jaspr hook commit-msg"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&hook_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "hook shim should be executable");
    }
}

#[test]
fn install_commit_id_hook_refuses_to_clobber_unmanaged_hook_without_force() {
    let repo = init_repo();
    let hooks_dir = repo.path().join(".git/hooks");
    fs::create_dir_all(&hooks_dir).unwrap();
    fs::write(hooks_dir.join("commit-msg"), "#!/bin/sh\necho custom\n").unwrap();

    AssertCommand::cargo_bin("jaspr")
        .unwrap()
        .current_dir(repo.path())
        .arg("install-commit-id-hook")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite"));

    let content = fs::read_to_string(hooks_dir.join("commit-msg")).unwrap();
    assert_eq!(content, "#!/bin/sh\necho custom\n");

    AssertCommand::cargo_bin("jaspr")
        .unwrap()
        .current_dir(repo.path())
        .args(["install-commit-id-hook", "--force"])
        .assert()
        .success();

    let content = fs::read_to_string(hooks_dir.join("commit-msg")).unwrap();
    assert!(content.contains("jaspr hook commit-msg"));
}

#[test]
fn commit_made_through_installed_hook_gets_a_commit_id_footer() {
    let repo = init_repo();

    AssertCommand::cargo_bin("jaspr")
        .unwrap()
        .current_dir(repo.path())
        .arg("install-commit-id-hook")
        .assert()
        .success();

    fs::write(repo.path().join("file.txt"), "hello\n").unwrap();
    let status = Command::new("git")
        .args(["add", "."])
        .current_dir(repo.path())
        .status()
        .unwrap();
    assert!(status.success());

    let status = Command::new("git")
        .args(["commit", "-q", "-m", "Add a file"])
        .current_dir(repo.path())
        .status()
        .unwrap();
    assert!(status.success());

    let output = Command::new("git")
        .args(["log", "-1", "--format=%B"])
        .current_dir(repo.path())
        .output()
        .unwrap();
    let message = String::from_utf8_lossy(&output.stdout);
    assert!(
        message.contains("commit-id:"),
        "commit message should have a commit-id footer stamped by the hook: {message}"
    );
}
