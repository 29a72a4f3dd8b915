//! # distrobaker
//!
//! A one-way synchronizer between two distribution build ecosystems.
//!
//! DistroBaker mirrors a component's source tree, its lookaside blobs, and
//! (optionally) submits a rebuild against a destination build system,
//! driven either by a single tagging event or a bulk sweep over the
//! latest tagged builds in both ecosystems.
//!
//! ## Pipeline
//!
//! 1. [`dispatcher::handle_event`] / [`dispatcher::sweep`] route a tagging
//!    event or the full component set through namespace and filter rules.
//! 2. [`pipeline::sync_repo`] orchestrates, for one component, a VCS mirror
//!    ([`vcs`]) followed by lookaside reconciliation ([`lookaside`]).
//! 3. [`module::sync_module_components`] recurses into a modular build's
//!    constituent packages before the parent pushes.
//! 4. [`buildsys`] submits the resulting build once the sync succeeds.
//!
//! Configuration ([`config`]) is loaded once and swapped atomically on
//! reload; a failed reload never disturbs the config already in effect.

pub mod buildsys;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lookaside;
pub mod module;
pub mod pipeline;
pub mod retry;
pub mod types;
pub mod vcs;

use std::sync::Mutex;

use crate::buildsys::{CachedSession, Credentials, KojiLikeClient, MbsClient};
use crate::config::{Config, RawDocument};
use crate::error::DistroBakerError;
use crate::retry::Reporter;

/// Which side of the sync a build-system session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Destination,
}

/// The process-wide state described in the data model: the currently
/// loaded [`Config`] plus the engine-level toggles (dry-run, retry count)
/// and the at-most-two build-system session cache.
///
/// Configuration is swapped atomically on [`Engine::reload_config`]; a
/// failed reload leaves the previously loaded config, and therefore every
/// in-flight `resolve()` caller, untouched. Session initialization and
/// refresh are guarded so they're mutually exclusive per role even when
/// callers process components concurrently.
pub struct Engine {
    config: Config,
    dry_run: bool,
    retry: u32,
    source_session: Mutex<Option<CachedSession>>,
    destination_session: Mutex<Option<CachedSession>>,
    destination_credentials: Credentials,
}

impl Engine {
    pub fn new(config: Config, dry_run: bool, retry: u32) -> Self {
        Engine {
            config,
            dry_run,
            retry,
            source_session: Mutex::new(None),
            destination_session: Mutex::new(None),
            destination_credentials: Credentials::default(),
        }
    }

    /// Attaches the destination build-system credentials used to
    /// authenticate every destination session created from here on; an
    /// already-cached session is not retroactively re-authenticated.
    pub fn set_destination_credentials(&mut self, credentials: Credentials) {
        self.destination_credentials = credentials;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn set_retry(&mut self, retry: u32) {
        self.retry = retry;
    }

    /// Validates `raw` and, only on success, atomically replaces the
    /// currently loaded config. On failure the config in effect is left
    /// completely unchanged.
    pub fn reload_config(
        &mut self,
        raw: RawDocument,
        reporter: &mut dyn Reporter,
    ) -> Result<(), DistroBakerError> {
        let config = Config::from_raw(raw, reporter)?;
        self.config = config;
        Ok(())
    }

    /// Returns the cached koji-like session for `role`, lazily
    /// (re)creating it when absent or aged past 3550 seconds. Destination
    /// sessions log out of the stale session before re-authenticating;
    /// source sessions are anonymous and simply re-created.
    pub fn buildsys_session(&self, role: Role) -> Result<(), DistroBakerError> {
        let (mutex, ecosystem) = match role {
            Role::Source => (&self.source_session, &self.config.source),
            Role::Destination => (&self.destination_session, &self.config.destination),
        };
        let mut guard = mutex.lock().expect("session cache mutex poisoned");
        let needs_refresh = match &*guard {
            Some(session) => session.is_stale(),
            None => true,
        };
        if needs_refresh {
            let mut client = KojiLikeClient::new(ecosystem.profile.clone())?;
            if matches!(role, Role::Destination) {
                client = client.with_credentials(self.destination_credentials.clone());
            }
            *guard = Some(CachedSession::new(client));
        }
        Ok(())
    }

    /// Runs `f` with a freshly validated session client for `role`.
    pub fn with_session<T>(
        &self,
        role: Role,
        f: impl FnOnce(&KojiLikeClient) -> Result<T, DistroBakerError>,
    ) -> Result<T, DistroBakerError> {
        self.buildsys_session(role)?;
        let mutex = match role {
            Role::Source => &self.source_session,
            Role::Destination => &self.destination_session,
        };
        let guard = mutex.lock().expect("session cache mutex poisoned");
        let session = guard.as_ref().expect("session was just initialized");
        f(session.client())
    }

    /// Builds an MBS client for the destination, if configured.
    pub fn mbs_client(&self) -> Result<MbsClient, DistroBakerError> {
        let mbs = self.config.destination.mbs.clone().ok_or_else(|| {
            DistroBakerError::config("destination.mbs", "missing")
        })?;
        MbsClient::new(mbs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NullReporter;

    fn sample_config() -> Config {
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
    mbs: {auth_method: "kerberos", api_url: "https://mbs.example.com"}
  trigger: {rpms: "rpms-trigger", modules: "modules-trigger"}
  build: {prefix: "distro", target: "distro-target", platform: "platform:f40", scratch: false}
  git: {author: "Bot", email: "bot@example.com", message: "Sync"}
  control: {build: true, merge: true, strict: false}
  defaults:
    cache: {source: "%(component)s", destination: "%(component)s"}
    rpms: {source: "%(component)s", destination: "%(component)s"}
    modules: {source: "%(component)s", destination: "%(component)s"}
"#,
        )
        .unwrap();
        Config::from_raw(doc, &mut NullReporter).unwrap()
    }

    #[test]
    fn reload_preserves_previous_config_on_failure() {
        let mut engine = Engine::new(sample_config(), false, 3);
        let original_platform = engine.config().build.platform.clone();

        let bad_doc: RawDocument = serde_yaml::from_str("configuration: {}").unwrap();
        let err = engine.reload_config(bad_doc, &mut NullReporter).unwrap_err();
        assert!(matches!(err, DistroBakerError::Config { .. }));
        assert_eq!(engine.config().build.platform, original_platform);
    }

    #[test]
    fn dry_run_toggle_is_mutable() {
        let mut engine = Engine::new(sample_config(), false, 3);
        assert!(!engine.dry_run());
        engine.set_dry_run(true);
        assert!(engine.dry_run());
    }
}
