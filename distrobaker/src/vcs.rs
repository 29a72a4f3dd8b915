//! Version-control mirroring (C3): clone, fetch, merge-or-pull, push.
//!
//! Shells out to the system `git` binary via [`std::process::Command`],
//! matching the teacher's process-based git integration
//! (`shipper::git`) rather than linking `git2`, which the whole example
//! pack avoids.

use std::env;
use std::io::Write as _;
use std::path::Path;
use std::process::Command;

use rand::Rng;

use crate::config::GitConfig;
use crate::error::{DistroBakerError, ErrorContext};
use crate::retry::{with_retry, Reporter};
use crate::types::Namespace;

fn git_program() -> String {
    env::var("DISTROBAKER_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new(git_program())
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

fn rev_exists(dir: &Path, rev: &str) -> bool {
    run_git(dir, &["rev-parse", "--quiet", rev, "--"]).is_ok()
}

/// Clones `link` at `git_ref` into `dir` under the remote name `origin`.
/// Retried `retries` times.
pub fn clone_destination(
    ns: Namespace,
    component: &str,
    link: &str,
    git_ref: &str,
    dir: &Path,
    retries: u32,
    reporter: &mut dyn Reporter,
) -> Result<(), DistroBakerError> {
    with_retry(
        retries,
        reporter,
        &format!("clone {ns}/{component}"),
        |_| run_git(dir, &["clone", link, "--branch", git_ref, "."]),
    )
    .map_err(|e| {
        DistroBakerError::remote_fetch(
            ErrorContext::new(ns.as_str(), component),
            format!("exhausted cloning attempts: {e}"),
        )
    })?;
    Ok(())
}

/// Adds `link` as remote `source` and fetches `git_ref` (or all refs/tags
/// when no ref is known), retried `retries` times.
pub fn fetch_upstream(
    ns: Namespace,
    component: &str,
    link: &str,
    git_ref: Option<&str>,
    dir: &Path,
    retries: u32,
    reporter: &mut dyn Reporter,
) -> Result<(), DistroBakerError> {
    run_git(dir, &["remote", "add", "source", link]).map_err(|e| {
        DistroBakerError::remote_fetch(ErrorContext::new(ns.as_str(), component), e)
    })?;
    with_retry(retries, reporter, &format!("fetch {ns}/{component}"), |_| {
        match git_ref {
            Some(r) => run_git(dir, &["fetch", "--tags", "source", r]),
            None => run_git(dir, &["fetch", "--tags", "--all"]),
        }
    })
    .map_err(|e| {
        DistroBakerError::remote_fetch(
            ErrorContext::new(ns.as_str(), component),
            format!("exhausted upstream fetching attempts: {e}"),
        )
    })?;
    Ok(())
}

/// Sets the local commit identity from `git.author`/`git.email`.
pub fn configure_identity(
    ns: Namespace,
    component: &str,
    dir: &Path,
    git: &GitConfig,
) -> Result<(), DistroBakerError> {
    run_git(dir, &["config", "user.name", &git.author])
        .and_then(|_| run_git(dir, &["config", "user.email", &git.email]))
        .map_err(|e| DistroBakerError::remote_fetch(ErrorContext::new(ns.as_str(), component), e))?;
    Ok(())
}

fn random_branch_name() -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::rng();
    (0..16)
        .map(|_| {
            let idx = rng.random_range(0..LETTERS.len());
            LETTERS[idx] as char
        })
        .collect()
}

/// Strategy A: merge with unrelated histories allowed, squashed onto the
/// destination ref. Does not push.
pub fn sync_merge(
    ns: Namespace,
    component: &str,
    dir: &Path,
    build_ref: &str,
    source_link: &str,
    dest_ref: &str,
    git: &GitConfig,
    retries: u32,
) -> Result<(), DistroBakerError> {
    let ctx = || ErrorContext::new(ns.as_str(), component);

    let mut bname = None;
    for _ in 0..retries.max(1) {
        let candidate = random_branch_name();
        if !rev_exists(dir, &candidate) {
            bname = Some(candidate);
            break;
        }
    }
    let bname = bname.ok_or_else(|| {
        DistroBakerError::merge_conflict(ctx(), "exhausted attempts finding an unused branch name")
    })?;

    let mut bref = None;
    for candidate in [format!("source/{build_ref}"), build_ref.to_string()] {
        if rev_exists(dir, &candidate) {
            bref = Some(candidate);
            break;
        }
    }
    let bref = bref.ok_or_else(|| {
        DistroBakerError::merge_conflict(ctx(), "cannot locate build branch reference")
    })?;

    let actor = format!("{} <{}>", git.author, git.email);
    let run = |args: &[&str]| run_git(dir, args).map_err(|e| DistroBakerError::merge_conflict(ctx(), e));

    run(&["checkout", &bref])?;
    run(&["switch", "-c", &bname])?;
    run(&[
        "merge",
        "--allow-unrelated-histories",
        "--no-commit",
        "-s",
        "ours",
        dest_ref,
    ])?;
    run(&[
        "commit",
        "--author",
        &actor,
        "--allow-empty",
        "-m",
        "Temporary working tree merge",
    ])?;
    run(&["checkout", dest_ref])?;
    run(&["merge", "--no-commit", "--squash", &bname])?;

    let msg = format!("{}\nSource: {}#{}", git.message, source_link, build_ref);
    let mut msgfile = tempfile::Builder::new()
        .prefix(&format!("msg-{}-{component}-", ns.as_str()))
        .tempfile()
        .map_err(|e| DistroBakerError::merge_conflict(ctx(), e.to_string()))?;
    msgfile
        .write_all(msg.as_bytes())
        .map_err(|e| DistroBakerError::merge_conflict(ctx(), e.to_string()))?;
    msgfile
        .flush()
        .map_err(|e| DistroBakerError::merge_conflict(ctx(), e.to_string()))?;
    let msgpath = msgfile.path().to_string_lossy().to_string();
    run(&["commit", "--author", &actor, "--allow-empty", "-F", &msgpath])?;

    Ok(())
}

/// Strategy B: fast-forward-only pull from `source`. A non-fast-forward
/// situation surfaces as [`DistroBakerError::MergeConflict`], a
/// per-component, not a dispatcher-fatal, failure.
pub fn sync_pull(
    ns: Namespace,
    component: &str,
    dir: &Path,
    build_ref: &str,
) -> Result<(), DistroBakerError> {
    run_git(dir, &["pull", "--ff-only", "--tags", "source", build_ref]).map_err(|e| {
        DistroBakerError::merge_conflict(ErrorContext::new(ns.as_str(), component), e)
    })?;
    Ok(())
}

/// Pushes `dest_ref` (with tags) to `origin`, `--dry-run` when `dry_run`.
pub fn push(
    ns: Namespace,
    component: &str,
    dir: &Path,
    dest_ref: &str,
    dry_run: bool,
    retries: u32,
    reporter: &mut dyn Reporter,
) -> Result<(), DistroBakerError> {
    with_retry(retries, reporter, &format!("push {ns}/{component}"), |_| {
        if dry_run {
            run_git(
                dir,
                &["push", "--dry-run", "--tags", "--set-upstream", "origin", dest_ref],
            )
        } else {
            run_git(dir, &["push", "--tags", "--set-upstream", "origin", dest_ref])
        }
    })
    .map_err(|e| {
        DistroBakerError::remote_fetch(
            ErrorContext::new(ns.as_str(), component),
            format!("exhausted pushing attempts: {e}"),
        )
    })?;
    Ok(())
}

/// Returns the current `HEAD` commit SHA.
pub fn head_sha(dir: &Path) -> Result<String, DistroBakerError> {
    run_git(dir, &["rev-parse", "HEAD"])
        .map_err(|e| DistroBakerError::remote_fetch(ErrorContext::default(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use serial_test::serial;
    use tempfile::tempdir;

    fn write_fake_git(bin_dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = bin_dir.join("git");
        fs::write(&path, script).expect("write fake git");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    struct CollectingReporter;
    impl Reporter for CollectingReporter {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, _msg: &str) {}
        fn error(&mut self, _msg: &str) {}
    }

    #[test]
    #[serial]
    fn clone_destination_retries_then_fails() {
        let td = tempdir().unwrap();
        let bin = td.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let fake = write_fake_git(&bin, "#!/usr/bin/env sh\nexit 1\n");
        temp_env::with_var("DISTROBAKER_GIT_BIN", Some(fake.to_str().unwrap()), || {
            let dir = tempdir().unwrap();
            let mut reporter = CollectingReporter;
            let result = clone_destination(
                Namespace::Rpms,
                "foo",
                "https://example.com/foo.git",
                "main",
                dir.path(),
                2,
                &mut reporter,
            );
            assert!(result.is_err());
        });
    }

    #[test]
    #[serial]
    fn fetch_upstream_succeeds_with_fake_git() {
        let td = tempdir().unwrap();
        let bin = td.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let fake = write_fake_git(&bin, "#!/usr/bin/env sh\nexit 0\n");
        temp_env::with_var("DISTROBAKER_GIT_BIN", Some(fake.to_str().unwrap()), || {
            let dir = tempdir().unwrap();
            let mut reporter = CollectingReporter;
            let result = fetch_upstream(
                Namespace::Rpms,
                "foo",
                "https://example.com/foo.git",
                Some("main"),
                dir.path(),
                1,
                &mut reporter,
            );
            assert!(result.is_ok());
        });
    }

    #[test]
    fn random_branch_name_is_sixteen_ascii_letters() {
        let name = random_branch_name();
        assert_eq!(name.len(), 16);
        assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
    }
}
