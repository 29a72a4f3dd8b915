//! The per-component synchronization pipeline (C5, `sync_repo`).
//!
//! Orchestrates [`crate::vcs`] and [`crate::lookaside`] for one component,
//! resolving its build coordinate (from an explicit NVR, an explicit
//! `scmurl`, or the latest tagged build) before mirroring and reconciling.
//! Module recursion ([`crate::module`]) is invoked in the middle of the
//! pipeline, between the VCS sync and the push, exactly as in `spec.md`
//! §4.5 step 8.

use std::fs;
use std::path::Path;

use crate::buildsys::BuildSystemClient;
use crate::config::ResolvedComponent;
use crate::error::{DistroBakerError, ErrorContext};
use crate::lookaside::LookasideClient;
use crate::module;
use crate::retry::Reporter;
use crate::types::{BuildInfo, ModuleCoord, Namespace, ScmRef, SourceManifest};
use crate::{Engine, Role};

/// Inputs to [`sync_repo`], mirroring the optional parameters of the
/// original `sync_repo(comp, ns, nvr, gitdir, cmodule, scmurl, bcache)`.
#[derive(Debug, Default)]
pub struct SyncRequest<'a> {
    pub nvr: Option<&'a str>,
    /// A pre-existing working directory to reuse, pushed by the caller
    /// rather than by this pipeline (the module-expansion path).
    pub gitdir: Option<&'a Path>,
    /// Set when syncing an RPM component that is a constituent of a module.
    pub cmodule: Option<&'a ModuleCoord>,
    /// A custom source SCMURL, used instead of a trigger-tag lookup. Must
    /// be set if and only if `cmodule` is set.
    pub scmurl: Option<&'a str>,
    /// A custom source lookaside cache URL.
    pub bcache: Option<&'a str>,
}

/// Reads `<dir>/sources`, treating a missing file as an empty manifest.
fn read_manifest(dir: &Path) -> Result<SourceManifest, DistroBakerError> {
    match fs::read_to_string(dir.join("sources")) {
        Ok(body) => SourceManifest::parse(&body),
        Err(_) => Ok(SourceManifest::empty()),
    }
}

/// Looks up the latest tagged NVR for `component` in `ns`'s trigger tag.
/// For modules, since `listTagged(tag, latest=true)` only dedupes by name,
/// not by `name:stream`, every tagged build is scanned and the last one
/// matching the requested stream wins (matching the source system's
/// oldest-first tagged-build ordering).
pub fn latest_build_for_tag(
    engine: &Engine,
    ns: Namespace,
    component: &str,
    reporter: &mut dyn Reporter,
) -> Result<Option<String>, DistroBakerError> {
    match ns {
        Namespace::Rpms => engine.with_session(Role::Source, |client| {
            let tagged = client.list_tagged(&engine.config().trigger.rpms, Some(component), true)?;
            Ok(tagged.into_iter().next().map(|b| b.nvr))
        }),
        Namespace::Modules => {
            let coord = ModuleCoord::parse(component);
            let tagged = engine.with_session(Role::Source, |client| {
                client.list_tagged(&engine.config().trigger.modules, None, false)
            })?;
            let mut latest = None;
            for tagged_build in tagged {
                match get_build_info(engine, &tagged_build.nvr) {
                    Ok(info) if info.name.is_some() && info.stream.is_some() => {
                        if info.name.as_deref() == Some(coord.name.as_str())
                            && info.stream.as_deref() == Some(coord.stream.as_str())
                        {
                            latest = Some(tagged_build.nvr);
                        }
                    }
                    _ => reporter.warn(&format!(
                        "Could not get module info for {}, skipping.",
                        tagged_build.nvr
                    )),
                }
            }
            Ok(latest)
        }
    }
}

/// Fetches the source build-system record for `nvr` and extracts
/// `{scmurl, name?, stream?, modulemd?}`.
pub fn get_build_info(engine: &Engine, nvr: &str) -> Result<BuildInfo, DistroBakerError> {
    engine.with_session(Role::Source, |client| {
        client.get_build(nvr)?.into_build_info(nvr)
    })
}

/// Runs the full C5 pipeline for one component, returning the destination
/// `link#ref` it pushed to (or, when `req.gitdir` was supplied, the
/// `link#ref` the caller should push).
pub fn sync_repo(
    engine: &Engine,
    ns: Namespace,
    component: &str,
    req: SyncRequest<'_>,
    reporter: &mut dyn Reporter,
) -> Result<String, DistroBakerError> {
    let ctx = || ErrorContext::new(ns.as_str(), component);

    if engine.config().control.is_excluded(ns, component) {
        reporter.error(&format!(
            "The component {ns}/{component} is excluded from sync, aborting."
        ));
        return Err(DistroBakerError::unsupported(
            ctx(),
            "component excluded from sync",
        ));
    }
    reporter.info(&format!("Synchronizing SCM for {ns}/{component}."));

    // Step 2: resolve the build coordinate.
    let (bscmurl, bmmd, resolved_nvr): (String, Option<String>, Option<String>) =
        if let Some(scmurl) = req.scmurl {
            (scmurl.to_string(), None, req.nvr.map(str::to_string))
        } else {
            let nvr = match req.nvr {
                Some(n) => n.to_string(),
                None => latest_build_for_tag(engine, ns, component, reporter)?.ok_or_else(|| {
                    reporter.error(&format!(
                        "NVR not specified and no builds for {ns}/{component} could be found, skipping."
                    ));
                    DistroBakerError::build_system(ctx(), "no tagged builds found")
                })?,
            };
            let info = get_build_info(engine, &nvr)?;
            (info.scmurl, info.modulemd, Some(nvr))
        };

    let mut bscm = ScmRef::parse(&bscmurl);
    if bscm.git_ref.is_none() {
        bscm.git_ref = Some("master".to_string());
    }
    let build_ref = bscm.git_ref.clone().expect("defaulted above");

    if req.scmurl.is_some() {
        // Preserved verbatim per DESIGN.md: this never matches in practice
        // (kept because spec.md says not to guess intent).
        if bscm.link != engine.config().source.scm {
            reporter.warn(&format!(
                "The custom source SCM URL for {ns}/{component} ({}) doesn't match configuration ({}), ignoring.",
                bscm.link,
                engine.config().source.scm
            ));
        }
    }

    if req.cmodule.is_some() && ns == Namespace::Modules {
        reporter.error(&format!(
            "Synchronizing module subcomponent ({ns}/{component}) of a module is not yet supported."
        ));
        return Err(DistroBakerError::unsupported(
            ctx(),
            "module-of-modules subcomponent sync is not supported",
        ));
    }

    // Step 3: compute URLs.
    let resolved: ResolvedComponent = match req.cmodule {
        Some(module) => engine
            .config()
            .resolve_module_subcomponent(module, component, &build_ref),
        None => engine.config().resolve(ns, component),
    };

    // Step 4/5-9: prepare the working directory and run the rest of the
    // pipeline inside it. A caller-supplied directory is reused without a
    // push (the module-expansion path); otherwise a scoped temp directory
    // is created and cleaned up once this call returns.
    match req.gitdir {
        Some(dir) => run_pipeline(
            engine,
            ns,
            component,
            &build_ref,
            resolved_nvr.as_deref(),
            req.bcache,
            &resolved,
            dir,
            false,
            bmmd,
            reporter,
        ),
        None => {
            let tempdir = tempfile::Builder::new()
                .prefix(&format!("repo-{}-{component}-", ns.as_str()))
                .tempdir()
                .map_err(|e| DistroBakerError::remote_fetch(ctx(), e.to_string()))?;
            run_pipeline(
                engine,
                ns,
                component,
                &build_ref,
                resolved_nvr.as_deref(),
                req.bcache,
                &resolved,
                tempdir.path(),
                true,
                bmmd,
                reporter,
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    engine: &Engine,
    ns: Namespace,
    component: &str,
    build_ref: &str,
    nvr: Option<&str>,
    bcache: Option<&str>,
    resolved: &ResolvedComponent,
    gitdir: &Path,
    push_repo: bool,
    bmmd: Option<String>,
    reporter: &mut dyn Reporter,
) -> Result<String, DistroBakerError> {
    let retries = engine.retry();
    let dry_run = engine.dry_run();

    crate::vcs::clone_destination(
        ns,
        component,
        &resolved.dest_scm.link,
        resolved.dest_scm.git_ref.as_deref().unwrap_or("master"),
        gitdir,
        retries,
        reporter,
    )?;
    crate::vcs::fetch_upstream(
        ns,
        component,
        &resolved.source_scm.link,
        resolved.source_scm.git_ref.as_deref(),
        gitdir,
        retries,
        reporter,
    )?;
    crate::vcs::configure_identity(ns, component, gitdir, &engine.config().git)?;

    reporter.info(&format!("Gathering destination files for {ns}/{component}."));
    let dsrc = read_manifest(gitdir)?;

    let dest_ref = resolved
        .dest_scm
        .git_ref
        .clone()
        .unwrap_or_else(|| "master".to_string());
    if engine.config().control.merge {
        crate::vcs::sync_merge(
            ns,
            component,
            gitdir,
            build_ref,
            &resolved.source_scm.link,
            &dest_ref,
            &engine.config().git,
            retries,
        )?;
    } else {
        crate::vcs::sync_pull(ns, component, gitdir, build_ref)?;
    }

    reporter.info(&format!("Gathering source files for {ns}/{component}."));
    let ssrc = read_manifest(gitdir)?;

    let missing = ssrc.difference(&dsrc);
    if missing.is_empty() {
        reporter.info(&format!("Source files for {ns}/{component} are up-to-date."));
    } else {
        reporter.info(&format!("Source files for {ns}/{component} differ."));
        if let Some(custom) = bcache {
            if custom != resolved.source_cache_name {
                reporter.warn(&format!(
                    "Custom source cache {custom} for {ns}/{component} differs from the configured {}, using it anyway.",
                    resolved.source_cache_name
                ));
            }
        }
        let source_cache_name = bcache.unwrap_or(&resolved.source_cache_name);
        let source_cache = LookasideClient::new(engine.config().source.cache.clone())?;
        let dest_cache = LookasideClient::new(engine.config().destination.cache.clone())?;
        crate::lookaside::sync_cache(
            ns,
            component,
            &missing,
            &source_cache,
            &dest_cache,
            source_cache_name,
            &resolved.dest_cache_name,
            retries,
            dry_run,
            reporter,
        )?;
    }

    reporter.info(&format!("Component {ns}/{component} successfully synchronized."));

    if ns == Namespace::Modules {
        let module = ModuleCoord::parse(component);
        let module_nvr = nvr
            .map(str::to_string)
            .unwrap_or_else(|| format!("{component}:{build_ref}"));
        module::sync_module_components(engine, &module, &module_nvr, bmmd, reporter).map_err(
            |e| {
                reporter.error(&format!(
                    "Failed to sync module components for {ns}/{component}, skipping."
                ));
                e
            },
        )?;
    }

    if push_repo {
        crate::vcs::push(ns, component, gitdir, &dest_ref, dry_run, retries, reporter)?;
        let sha = crate::vcs::head_sha(gitdir)?;
        reporter.info(&format!("Successfully synchronized {ns}/{component}."));
        Ok(format!("{}#{}", resolved.dest_scm.link, sha))
    } else {
        reporter.info(&format!(
            "Successfully synchronized {ns}/{component} without push"
        ));
        Ok(format!("{}#{}", resolved.dest_scm.link, dest_ref))
    }
}
