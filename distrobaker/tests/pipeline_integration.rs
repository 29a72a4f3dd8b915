//! Exercises [`distrobaker::pipeline::sync_repo`] end to end against a fake
//! `git` binary, the same substitution [`distrobaker::vcs`]'s own unit tests
//! use, without a real repository or build system.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use distrobaker::config::{Config, RawDocument};
use distrobaker::pipeline::{self, SyncRequest};
use distrobaker::retry::{NullReporter, Reporter};
use distrobaker::types::Namespace;
use distrobaker::Engine;
use serial_test::serial;
use tempfile::tempdir;

fn write_fake_git(bin_dir: &Path, script: &str) -> PathBuf {
    let path = bin_dir.join("git");
    fs::write(&path, script).expect("write fake git");
    let mut perms = fs::metadata(&path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn sample_config(merge: bool) -> Config {
    let doc: RawDocument = serde_yaml::from_str(&format!(
        r#"
configuration:
  source:
    scm: "https://src.example.com"
    cache: {{url: "https://cache.example.com", cgi: "/lookaside", path: "/sources"}}
    profile: "https://koji-src.example.com"
  destination:
    scm: "https://dst.example.com"
    cache: {{url: "https://dcache.example.com", cgi: "/lookaside", path: "/sources"}}
    profile: "https://koji-dst.example.com"
  trigger: {{rpms: "rpms-trigger", modules: "modules-trigger"}}
  build: {{prefix: "distro", target: "distro-target", platform: "platform:f40", scratch: false}}
  git: {{author: "Bot", email: "bot@example.com", message: "Sync"}}
  control: {{build: false, merge: {merge}, strict: false}}
  defaults:
    cache: {{source: "%(component)s", destination: "%(component)s"}}
    rpms: {{source: "%(component)s", destination: "%(component)s"}}
    modules: {{source: "%(component)s", destination: "%(component)s"}}
"#
    ))
    .unwrap();
    Config::from_raw(doc, &mut NullReporter).unwrap()
}

/// A `git` stand-in that succeeds at every subcommand and, for `rev-parse`,
/// prints a fixed SHA; no working tree content is ever produced, so both
/// manifests read back empty and the lookaside step is skipped entirely.
const FAKE_GIT_SUCCEED: &str = "#!/usr/bin/env sh\ncase \"$1\" in\n  rev-parse) echo deadbeefcafef00d ;;\n  *) exit 0 ;;\nesac\n";

#[test]
#[serial]
fn sync_repo_with_custom_scmurl_pushes_and_reports_dest_ref() {
    let td = tempdir().unwrap();
    let bin = td.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let fake = write_fake_git(&bin, FAKE_GIT_SUCCEED);

    temp_env::with_var("DISTROBAKER_GIT_BIN", Some(fake.to_str().unwrap()), || {
        let engine = Engine::new(sample_config(false), false, 1);
        let mut reporter = NullReporter;

        let dest = pipeline::sync_repo(
            &engine,
            Namespace::Rpms,
            "foo",
            SyncRequest {
                nvr: None,
                gitdir: None,
                cmodule: None,
                scmurl: Some("https://custom.example.com/rpms/foo#main"),
                bcache: None,
            },
            &mut reporter,
        )
        .expect("sync_repo should succeed against the fake git binary");

        assert_eq!(dest, "https://dst.example.com/rpms/foo#deadbeefcafef00d");
    });
}

#[test]
#[serial]
fn sync_repo_is_excluded_before_touching_git() {
    let td = tempdir().unwrap();
    let bin = td.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    // Any invocation of this binary fails the test: an excluded component
    // must never reach the VCS step.
    let fake = write_fake_git(&bin, "#!/usr/bin/env sh\nexit 17\n");

    temp_env::with_var("DISTROBAKER_GIT_BIN", Some(fake.to_str().unwrap()), || {
        let doc: RawDocument = serde_yaml::from_str(
            r#"
configuration:
  source:
    scm: "https://src.example.com"
    cache: {url: "https://cache.example.com", cgi: "/lookaside", path: "/sources"}
    profile: "https://koji-src.example.com"
  destination:
    scm: "https://dst.example.com"
    cache: {url: "https://dcache.example.com", cgi: "/lookaside", path: "/sources"}
    profile: "https://koji-dst.example.com"
  trigger: {rpms: "rpms-trigger", modules: "modules-trigger"}
  build: {prefix: "distro", target: "distro-target", platform: "platform:f40", scratch: false}
  git: {author: "Bot", email: "bot@example.com", message: "Sync"}
  control: {build: false, merge: false, strict: false, exclude: {rpms: ["foo"], modules: []}}
  defaults:
    cache: {source: "%(component)s", destination: "%(component)s"}
    rpms: {source: "%(component)s", destination: "%(component)s"}
    modules: {source: "%(component)s", destination: "%(component)s"}
"#,
        )
        .unwrap();
        let config = Config::from_raw(doc, &mut NullReporter).unwrap();
        let engine = Engine::new(config, false, 1);
        let mut reporter = NullReporter;

        let err = pipeline::sync_repo(
            &engine,
            Namespace::Rpms,
            "foo",
            SyncRequest {
                scmurl: Some("https://custom.example.com/rpms/foo#main"),
                ..Default::default()
            },
            &mut reporter,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            distrobaker::error::DistroBakerError::Unsupported { .. }
        ));
    });
}

#[test]
fn null_reporter_is_callable() {
    let mut reporter = NullReporter;
    reporter.info("info");
    reporter.warn("warn");
    reporter.error("error");
}
