//! The typed, validated configuration model (C1).
//!
//! Loading happens in two passes: the raw YAML document deserializes into
//! [`RawConfig`], whose fields are all optional, and [`Config::from_raw`]
//! walks it once, producing a [`DistroBakerError::Config`] naming the
//! dotted path of the first missing or invalid key. A config that loads
//! clean is frozen into an immutable [`Config`] and is never partially
//! applied — a validation failure never mutates the config already in
//! effect (see `Engine::reload`).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::DistroBakerError;
use crate::retry::Reporter;
use crate::types::{ModuleCoord, Namespace, ScmRef};

fn cfg_err(path: &str, message: impl Into<String>) -> DistroBakerError {
    DistroBakerError::config(path, message)
}

fn required<'a, T>(
    value: &'a Option<T>,
    path: &str,
) -> Result<&'a T, DistroBakerError> {
    value.as_ref().ok_or_else(|| cfg_err(path, "missing"))
}

// ---------------------------------------------------------------------
// Raw (pre-validation) document shape, matching distrobaker.yaml 1:1.
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct RawDocument {
    pub configuration: Option<RawConfiguration>,
    pub components: Option<RawComponents>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawConfiguration {
    pub source: Option<RawEcosystem>,
    pub destination: Option<RawEcosystem>,
    pub trigger: Option<RawTrigger>,
    pub build: Option<RawBuild>,
    pub git: Option<RawGit>,
    pub control: Option<RawControl>,
    pub defaults: Option<RawDefaults>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawEcosystem {
    pub scm: Option<String>,
    pub cache: Option<RawCache>,
    pub profile: Option<String>,
    pub mbs: Option<RawMbs>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCache {
    pub url: Option<String>,
    pub cgi: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMbs {
    pub auth_method: Option<String>,
    pub api_url: Option<String>,
    pub oidc_id_provider: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
    pub oidc_scopes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTrigger {
    pub rpms: Option<String>,
    pub modules: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawBuild {
    pub prefix: Option<String>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub scratch: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGit {
    pub author: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawControl {
    pub build: Option<bool>,
    pub merge: Option<bool>,
    pub strict: Option<bool>,
    pub exclude: Option<RawExclude>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawExclude {
    pub rpms: Option<BTreeSet<String>>,
    pub modules: Option<BTreeSet<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawDefaults {
    pub cache: Option<RawSourceDestPair>,
    pub rpms: Option<RawSourceDestPair>,
    pub modules: Option<RawModulesDefaults>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSourceDestPair {
    pub source: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawModulesDefaults {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub rpms: Option<RawSourceDestPair>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawComponents {
    pub rpms: Option<BTreeMap<String, Option<RawComponentOverride>>>,
    pub modules: Option<BTreeMap<String, Option<RawModuleOverride>>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawComponentOverride {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub cache: Option<RawSourceDestPair>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawModuleOverride {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub cache: Option<RawSourceDestPair>,
    pub rpms: Option<BTreeMap<String, Option<RawComponentOverride>>>,
}

// ---------------------------------------------------------------------
// Validated, frozen configuration.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbsAuthMethod {
    Kerberos,
    Oidc,
}

#[derive(Debug, Clone)]
pub struct MbsConfig {
    pub auth_method: MbsAuthMethod,
    pub api_url: String,
    pub oidc_id_provider: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
    pub oidc_scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub cgi: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct EcosystemConfig {
    pub scm: String,
    pub cache: CacheConfig,
    pub profile: String,
    pub mbs: Option<MbsConfig>,
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub rpms: String,
    pub modules: String,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub prefix: String,
    pub target: String,
    pub platform: ModuleCoord,
    pub scratch: bool,
}

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub author: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExcludeConfig {
    pub rpms: BTreeSet<String>,
    pub modules: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub build: bool,
    pub merge: bool,
    pub strict: bool,
    pub exclude: ExcludeConfig,
}

impl ControlConfig {
    /// Whether `component` is listed in `control.exclude[ns]`.
    pub fn is_excluded(&self, ns: Namespace, component: &str) -> bool {
        match ns {
            Namespace::Rpms => self.exclude.rpms.contains(component),
            Namespace::Modules => self.exclude.modules.contains(component),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceDestPair {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub struct ModulesDefaults {
    pub source: String,
    pub destination: String,
    pub rpms: SourceDestPair,
}

#[derive(Debug, Clone)]
pub struct DefaultsConfig {
    pub cache: SourceDestPair,
    pub rpms: SourceDestPair,
    pub modules: ModulesDefaults,
}

/// A fully expanded `source`/`destination` pair for one component, plus
/// its lookaside cache names. Expanded once at load time from either
/// `components[ns][p]` or `defaults[ns]`.
#[derive(Debug, Clone)]
pub struct ComponentEntry {
    pub source: String,
    pub destination: String,
    pub cache_source: String,
    pub cache_destination: String,
    /// Present only for modules: per-subcomponent overrides for `rpms`.
    pub rpms: BTreeMap<String, SourceDestPair>,
}

#[derive(Debug, Clone, Default)]
pub struct ComponentsConfig {
    pub rpms: BTreeMap<String, ComponentEntry>,
    pub modules: BTreeMap<String, ComponentEntry>,
}

/// A fully resolved set of SCM/cache coordinates for one component sync.
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub source_scm: ScmRef,
    pub dest_scm: ScmRef,
    pub source_cache_name: String,
    pub dest_cache_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: EcosystemConfig,
    pub destination: EcosystemConfig,
    pub trigger: TriggerConfig,
    pub build: BuildConfig,
    pub git: GitConfig,
    pub control: ControlConfig,
    pub defaults: DefaultsConfig,
    pub components: ComponentsConfig,
}

fn pct(template: &str, component: &str, stream: &str, name: &str, git_ref: &str) -> String {
    template
        .replace("%(component)s", component)
        .replace("%(stream)s", stream)
        .replace("%(name)s", name)
        .replace("%(ref)s", git_ref)
}

impl Config {
    /// Validates a [`RawDocument`] into a frozen [`Config`]. Returns the
    /// first failing dotted path encountered, matching the original
    /// loader's fail-on-first-missing-key behavior.
    pub fn from_raw(doc: RawDocument, reporter: &mut dyn Reporter) -> Result<Self, DistroBakerError> {
        let cnf = required(&doc.configuration, "configuration")?;

        let source_raw = required(&cnf.source, "source")?;
        let source = Self::validate_ecosystem(source_raw, "source", reporter)?;

        let destination_raw = required(&cnf.destination, "destination")?;
        let destination = Self::validate_ecosystem(destination_raw, "destination", reporter)?;

        let trigger_raw = required(&cnf.trigger, "trigger")?;
        let trigger = TriggerConfig {
            rpms: required(&trigger_raw.rpms, "trigger.rpms")?.clone(),
            modules: required(&trigger_raw.modules, "trigger.modules")?.clone(),
        };

        let build_raw = required(&cnf.build, "build")?;
        let platform_str = required(&build_raw.platform, "build.platform")?;
        if !platform_str.contains(':') {
            return Err(cfg_err(
                "build.platform",
                "must be in name:stream format",
            ));
        }
        let build = BuildConfig {
            prefix: required(&build_raw.prefix, "build.prefix")?.clone(),
            target: required(&build_raw.target, "build.target")?.clone(),
            platform: ModuleCoord::parse(platform_str),
            scratch: build_raw.scratch.unwrap_or_else(|| {
                reporter.warn("build.scratch not defined, assuming false");
                false
            }),
        };

        let git_raw = required(&cnf.git, "git")?;
        let git = GitConfig {
            author: required(&git_raw.author, "git.author")?.clone(),
            email: required(&git_raw.email, "git.email")?.clone(),
            message: required(&git_raw.message, "git.message")?.clone(),
        };

        let control_raw = required(&cnf.control, "control")?;
        let mut exclude = ExcludeConfig::default();
        if let Some(e) = &control_raw.exclude {
            if let Some(rpms) = &e.rpms {
                exclude.rpms = rpms.clone();
            }
            if let Some(modules) = &e.modules {
                exclude.modules = modules.clone();
            }
        }
        for (ns, set) in [("rpms", &exclude.rpms), ("modules", &exclude.modules)] {
            if set.is_empty() {
                reporter.info(&format!("Not excluding any components from the {ns} namespace."));
            } else {
                reporter.info(&format!(
                    "Excluding {} component(s) from the {ns} namespace.",
                    set.len()
                ));
            }
        }
        let control = ControlConfig {
            build: *required(&control_raw.build, "control.build")?,
            merge: *required(&control_raw.merge, "control.merge")?,
            strict: *required(&control_raw.strict, "control.strict")?,
            exclude,
        };

        let defaults_raw = required(&cnf.defaults, "defaults")?;
        let cache_raw = required(&defaults_raw.cache, "defaults.cache")?;
        let cache = SourceDestPair {
            source: required(&cache_raw.source, "defaults.cache.source")?.clone(),
            destination: required(&cache_raw.destination, "defaults.cache.destination")?.clone(),
        };
        let rpms_raw = required(&defaults_raw.rpms, "defaults.rpms")?;
        let rpms = SourceDestPair {
            source: required(&rpms_raw.source, "defaults.rpms.source")?.clone(),
            destination: required(&rpms_raw.destination, "defaults.rpms.destination")?.clone(),
        };
        let modules_raw = defaults_raw.modules.as_ref();
        let modules_source = modules_raw
            .and_then(|m| m.source.clone())
            .ok_or_else(|| cfg_err("defaults.modules.source", "missing"))?;
        let modules_destination = modules_raw
            .and_then(|m| m.destination.clone())
            .ok_or_else(|| cfg_err("defaults.modules.destination", "missing"))?;
        // Module-constituent rpms defaults fall back to defaults.rpms.* per
        // key, independently for source and destination.
        let sub_rpms_raw = modules_raw.and_then(|m| m.rpms.as_ref());
        let sub_source = match sub_rpms_raw.and_then(|r| r.source.clone()) {
            Some(v) => v,
            None => {
                reporter.warn(
                    "defaults.modules.rpms.source not defined, using value from defaults.rpms.source",
                );
                rpms.source.clone()
            }
        };
        let sub_destination = match sub_rpms_raw.and_then(|r| r.destination.clone()) {
            Some(v) => v,
            None => {
                reporter.warn(
                    "defaults.modules.rpms.destination not defined, using value from defaults.rpms.destination",
                );
                rpms.destination.clone()
            }
        };
        let defaults = DefaultsConfig {
            cache,
            rpms,
            modules: ModulesDefaults {
                source: modules_source,
                destination: modules_destination,
                rpms: SourceDestPair {
                    source: sub_source,
                    destination: sub_destination,
                },
            },
        };

        let components = Self::expand_components(doc.components, &defaults, reporter)?;

        if control.strict
            && components.rpms.is_empty()
            && components.modules.is_empty()
        {
            reporter.warn("No components configured while running in the strict mode. Nothing to do.");
        }

        Ok(Config {
            source,
            destination,
            trigger,
            build,
            git,
            control,
            defaults,
            components,
        })
    }

    fn validate_ecosystem(
        raw: &RawEcosystem,
        key: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<EcosystemConfig, DistroBakerError> {
        let scm = required(&raw.scm, &format!("{key}.scm"))?.clone();
        let cache_raw = required(&raw.cache, &format!("{key}.cache"))?;
        let cache = CacheConfig {
            url: required(&cache_raw.url, &format!("{key}.cache.url"))?.clone(),
            cgi: required(&cache_raw.cgi, &format!("{key}.cache.cgi"))?.clone(),
            path: required(&cache_raw.path, &format!("{key}.cache.path"))?.clone(),
        };
        let profile = required(&raw.profile, &format!("{key}.profile"))?.clone();

        let mbs = match (&raw.mbs, key) {
            (Some(_), "source") => {
                reporter.warn(&format!("{key}.mbs is extraneous, ignoring."));
                None
            }
            (Some(mbs_raw), "destination") => {
                let auth_str =
                    required(&mbs_raw.auth_method, &format!("{key}.mbs.auth_method"))?;
                let auth_method = match auth_str.as_str() {
                    "oidc" => MbsAuthMethod::Oidc,
                    "kerberos" => MbsAuthMethod::Kerberos,
                    other => {
                        return Err(cfg_err(
                            &format!("{key}.mbs.auth_method"),
                            format!("{other} is unsupported"),
                        ));
                    }
                };
                let api_url = required(&mbs_raw.api_url, &format!("{key}.mbs.api_url"))?.clone();
                let (oidc_id_provider, oidc_client_id, oidc_client_secret, oidc_scopes) =
                    if auth_method == MbsAuthMethod::Oidc {
                        (
                            Some(
                                required(
                                    &mbs_raw.oidc_id_provider,
                                    &format!("{key}.mbs.oidc_id_provider"),
                                )?
                                .clone(),
                            ),
                            Some(
                                required(
                                    &mbs_raw.oidc_client_id,
                                    &format!("{key}.mbs.oidc_client_id"),
                                )?
                                .clone(),
                            ),
                            Some(
                                required(
                                    &mbs_raw.oidc_client_secret,
                                    &format!("{key}.mbs.oidc_client_secret"),
                                )?
                                .clone(),
                            ),
                            Some(
                                required(
                                    &mbs_raw.oidc_scopes,
                                    &format!("{key}.mbs.oidc_scopes"),
                                )?
                                .clone(),
                            ),
                        )
                    } else {
                        (None, None, None, None)
                    };
                Some(MbsConfig {
                    auth_method,
                    api_url,
                    oidc_id_provider,
                    oidc_client_id,
                    oidc_client_secret,
                    oidc_scopes,
                })
            }
            (None, "destination") => {
                return Err(cfg_err(&format!("{key}.mbs"), "missing"));
            }
            _ => None,
        };

        Ok(EcosystemConfig {
            scm,
            cache,
            profile,
            mbs,
        })
    }

    fn expand_components(
        raw: Option<RawComponents>,
        defaults: &DefaultsConfig,
        reporter: &mut dyn Reporter,
    ) -> Result<ComponentsConfig, DistroBakerError> {
        let mut out = ComponentsConfig::default();
        let Some(raw) = raw else {
            return Ok(out);
        };

        if let Some(rpms) = raw.rpms {
            for (name, ov) in rpms {
                let ov = ov.unwrap_or_default();
                let mut entry = Self::expand_default_entry(&defaults.rpms, &defaults.cache, &name, "");
                if let Some(src) = ov.source {
                    entry.source = src;
                }
                if let Some(dst) = ov.destination {
                    entry.destination = dst;
                }
                if let Some(cache) = ov.cache {
                    if let Some(src) = cache.source {
                        entry.cache_source = src;
                    }
                    if let Some(dst) = cache.destination {
                        entry.cache_destination = dst;
                    }
                }
                out.rpms.insert(name, entry);
            }
            reporter.info(&format!("Found {} configured component(s) in the rpms namespace.", out.rpms.len()));
        }

        if let Some(modules) = raw.modules {
            for (name, ov) in modules {
                let ov = ov.unwrap_or_default();
                let coord = ModuleCoord::parse(&name);
                let mut entry = Self::expand_default_entry(
                    &SourceDestPair {
                        source: defaults.modules.source.clone(),
                        destination: defaults.modules.destination.clone(),
                    },
                    &defaults.cache,
                    &coord.name,
                    &coord.stream,
                );
                if let Some(src) = ov.source {
                    entry.source = src;
                }
                if let Some(dst) = ov.destination {
                    entry.destination = dst;
                }
                if let Some(cache) = ov.cache {
                    if let Some(src) = cache.source {
                        entry.cache_source = src;
                    }
                    if let Some(dst) = cache.destination {
                        entry.cache_destination = dst;
                    }
                }
                if let Some(sub_rpms) = ov.rpms {
                    for (sub_name, sub_ov) in sub_rpms {
                        let sub_ov = sub_ov.unwrap_or_default();
                        let source = sub_ov.source.unwrap_or_else(|| {
                            pct(
                                &defaults.modules.rpms.source,
                                &sub_name,
                                &coord.stream,
                                &coord.name,
                                "%(ref)s",
                            )
                        });
                        let destination = sub_ov.destination.unwrap_or_else(|| {
                            pct(
                                &defaults.modules.rpms.destination,
                                &sub_name,
                                &coord.stream,
                                &coord.name,
                                "%(ref)s",
                            )
                        });
                        entry.rpms.insert(sub_name, SourceDestPair { source, destination });
                    }
                }
                out.modules.insert(name, entry);
            }
            reporter.info(&format!("Found {} configured component(s) in the modules namespace.", out.modules.len()));
        }

        Ok(out)
    }

    fn expand_default_entry(
        pair: &SourceDestPair,
        cache: &SourceDestPair,
        component: &str,
        stream: &str,
    ) -> ComponentEntry {
        ComponentEntry {
            source: pct(&pair.source, component, stream, "", ""),
            destination: pct(&pair.destination, component, stream, "", ""),
            cache_source: pct(&cache.source, component, stream, "", ""),
            cache_destination: pct(&cache.destination, component, stream, "", ""),
            rpms: BTreeMap::new(),
        }
    }

    /// Resolves `{sourceSCM, destSCM, sourceCacheName, destCacheName}` for a
    /// plain `rpms`/`modules` component, preferring an explicit entry in
    /// `components[ns]` over the namespace defaults.
    pub fn resolve(&self, ns: Namespace, component: &str) -> ResolvedComponent {
        let (component_name, stream) = match ns {
            Namespace::Modules => {
                let coord = ModuleCoord::parse(component);
                (coord.name, coord.stream)
            }
            Namespace::Rpms => (component.to_string(), String::new()),
        };

        let table = match ns {
            Namespace::Rpms => &self.components.rpms,
            Namespace::Modules => &self.components.modules,
        };

        let (source, destination, cache_source, cache_destination) =
            if let Some(entry) = table.get(component) {
                (
                    entry.source.clone(),
                    entry.destination.clone(),
                    entry.cache_source.clone(),
                    entry.cache_destination.clone(),
                )
            } else {
                let defaults_pair = match ns {
                    Namespace::Rpms => &self.defaults.rpms,
                    Namespace::Modules => &SourceDestPair {
                        source: self.defaults.modules.source.clone(),
                        destination: self.defaults.modules.destination.clone(),
                    },
                };
                (
                    pct(&defaults_pair.source, &component_name, &stream, "", ""),
                    pct(&defaults_pair.destination, &component_name, &stream, "", ""),
                    pct(&self.defaults.cache.source, &component_name, &stream, "", ""),
                    pct(
                        &self.defaults.cache.destination,
                        &component_name,
                        &stream,
                        "",
                        "",
                    ),
                )
            };

        let source_link = format!("{}/{}/{}", self.source.scm, ns.as_str(), source);
        let dest_link = format!("{}/{}/{}", self.destination.scm, ns.as_str(), destination);
        let mut dest_scm = ScmRef::parse(&dest_link);
        if dest_scm.git_ref.is_none() {
            dest_scm.git_ref = Some("master".to_string());
        }

        ResolvedComponent {
            source_scm: ScmRef::parse(&source_link),
            dest_scm,
            source_cache_name: cache_source,
            dest_cache_name: cache_destination,
        }
    }

    /// Whether `component` has an explicit entry in `components[ns]`
    /// (used by the strict-mode filter, separate from [`ControlConfig::is_excluded`]).
    pub fn has_component_entry(&self, ns: Namespace, component: &str) -> bool {
        match ns {
            Namespace::Rpms => self.components.rpms.contains_key(component),
            Namespace::Modules => self.components.modules.contains_key(component),
        }
    }

    /// The component name to build: `component` itself, unless an explicit
    /// `components[ns][component]` entry overrides the destination, in
    /// which case the last path segment of that override's SCMURL wins.
    pub fn build_component_name(&self, ns: Namespace, component: &str) -> String {
        let table = match ns {
            Namespace::Rpms => &self.components.rpms,
            Namespace::Modules => &self.components.modules,
        };
        match table.get(component) {
            Some(entry) => {
                let link = format!("{}/{}/{}", self.destination.scm, ns.as_str(), entry.destination);
                ScmRef::parse(&link)
                    .component
                    .unwrap_or_else(|| component.to_string())
            }
            None => component.to_string(),
        }
    }

    /// Resolves the source/destination SCM for a module's RPM constituent,
    /// substituting `%(ref)s` with the module build's ref.
    pub fn resolve_module_subcomponent(
        &self,
        module: &ModuleCoord,
        sub: &str,
        build_ref: &str,
    ) -> ResolvedComponent {
        let (mut csrc, mut cdst) = if let Some(entry) = self.components.modules.get(&module.to_string()) {
            if let Some(pair) = entry.rpms.get(sub) {
                (pair.source.clone(), pair.destination.clone())
            } else {
                (
                    self.defaults.modules.rpms.source.clone(),
                    self.defaults.modules.rpms.destination.clone(),
                )
            }
        } else {
            (
                self.defaults.modules.rpms.source.clone(),
                self.defaults.modules.rpms.destination.clone(),
            )
        };
        if !csrc.contains('#') {
            csrc.push_str("#%(ref)s");
        }
        if !cdst.contains('#') {
            cdst.push_str("#%(ref)s");
        }
        let csrc = pct(&csrc, sub, &module.stream, &module.name, build_ref);
        let cdst = pct(&cdst, sub, &module.stream, &module.name, build_ref);

        let source_link = format!("{}/rpms/{}", self.source.scm, csrc);
        let dest_link = format!("{}/rpms/{}", self.destination.scm, cdst);
        let mut dest_scm = ScmRef::parse(&dest_link);
        if dest_scm.git_ref.is_none() {
            dest_scm.git_ref = Some("master".to_string());
        }

        let cache_source = pct(&self.defaults.cache.source, sub, &module.stream, &module.name, build_ref);
        let cache_destination = pct(
            &self.defaults.cache.destination,
            sub,
            &module.stream,
            &module.name,
            build_ref,
        );

        ResolvedComponent {
            source_scm: ScmRef::parse(&source_link),
            dest_scm,
            source_cache_name: cache_source,
            dest_cache_name: cache_destination,
        }
    }
}

/// Materializes a configuration document's remote VCS checkout into a local
/// directory. The mechanism (how a clone happens) is injected so this crate
/// never hard-codes a transport for "load the config from a repo" — only
/// the schema and validation in [`Config::from_raw`] are in scope here.
pub trait Cloner {
    fn clone_and_checkout(
        &self,
        url: &str,
        git_ref: &str,
        dest: &std::path::Path,
    ) -> Result<(), DistroBakerError>;
}

/// Clones `url`@`git_ref` via `cloner` into a scratch directory and parses
/// `filename` within it as a [`RawDocument`]. Does not validate; pass the
/// result to [`Config::from_raw`].
pub fn load(
    cloner: &dyn Cloner,
    url: &str,
    git_ref: &str,
    filename: &str,
) -> Result<RawDocument, DistroBakerError> {
    let tempdir = tempfile::Builder::new()
        .prefix("distrobaker-config-")
        .tempdir()
        .map_err(|e| cfg_err(filename, e.to_string()))?;
    cloner.clone_and_checkout(url, git_ref, tempdir.path())?;
    let body = std::fs::read_to_string(tempdir.path().join(filename))
        .map_err(|e| cfg_err(filename, format!("cannot read {filename}: {e}")))?;
    serde_yaml::from_str(&body).map_err(|e| cfg_err(filename, format!("cannot parse {filename}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NullReporter;

    fn sample_yaml() -> &'static str {
        r#"
configuration:
  source:
    scm: "https://src.example.com"
    cache: {url: "https://cache.example.com", cgi: "/lookaside", path: "/sources"}
    profile: "srcprofile"
  destination:
    scm: "https://dst.example.com"
    cache: {url: "https://dcache.example.com", cgi: "/lookaside", path: "/sources"}
    profile: "dstprofile"
    mbs:
      auth_method: "kerberos"
      api_url: "https://mbs.example.com"
  trigger: {rpms: "rpms-trigger", modules: "modules-trigger"}
  build: {prefix: "distro", target: "distro-target", platform: "platform:f40", scratch: false}
  git: {author: "Bot", email: "bot@example.com", message: "Sync"}
  control:
    build: true
    merge: true
    strict: false
    exclude: {rpms: [], modules: []}
  defaults:
    cache: {source: "%(component)s", destination: "%(component)s"}
    rpms: {source: "%(component)s", destination: "%(component)s"}
    modules:
      source: "%(component)s"
      destination: "%(component)s"
components:
  rpms:
    foo: {}
"#
    }

    #[test]
    fn loads_minimal_valid_config() {
        let doc: RawDocument = serde_yaml::from_str(sample_yaml()).unwrap();
        let mut reporter = NullReporter;
        let config = Config::from_raw(doc, &mut reporter).unwrap();
        assert_eq!(config.build.platform.name, "platform");
        assert_eq!(config.build.platform.stream, "f40");
        assert_eq!(config.components.rpms.len(), 1);
    }

    #[test]
    fn missing_platform_reports_dotted_path() {
        let mut doc: RawDocument = serde_yaml::from_str(sample_yaml()).unwrap();
        doc.configuration.as_mut().unwrap().build.as_mut().unwrap().platform = None;
        let mut reporter = NullReporter;
        let err = Config::from_raw(doc, &mut reporter).unwrap_err();
        match err {
            DistroBakerError::Config { path, .. } => assert_eq!(path, "build.platform"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn source_mbs_is_warned_and_dropped() {
        let mut doc: RawDocument = serde_yaml::from_str(sample_yaml()).unwrap();
        doc.configuration.as_mut().unwrap().source.as_mut().unwrap().mbs = Some(RawMbs {
            auth_method: Some("kerberos".into()),
            api_url: Some("https://x".into()),
            ..Default::default()
        });
        let mut reporter = NullReporter;
        let config = Config::from_raw(doc, &mut reporter).unwrap();
        assert!(config.source.mbs.is_none());
    }

    #[test]
    fn resolve_falls_back_to_defaults_when_unconfigured() {
        let doc: RawDocument = serde_yaml::from_str(sample_yaml()).unwrap();
        let mut reporter = NullReporter;
        let config = Config::from_raw(doc, &mut reporter).unwrap();
        let resolved = config.resolve(Namespace::Rpms, "bar");
        assert_eq!(resolved.source_scm.link, "https://src.example.com/rpms/bar");
    }

    #[test]
    fn module_subcomponent_substitutes_ref() {
        let doc: RawDocument = serde_yaml::from_str(sample_yaml()).unwrap();
        let mut reporter = NullReporter;
        let config = Config::from_raw(doc, &mut reporter).unwrap();
        let module = ModuleCoord::parse("mymod:1.0");
        let resolved = config.resolve_module_subcomponent(&module, "sub", "feature-branch");
        assert_eq!(resolved.source_scm.git_ref.as_deref(), Some("feature-branch"));
    }
}
