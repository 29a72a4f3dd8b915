//! Module expansion (C6): recursively synchronizes a modular build's
//! constituent RPM components before the parent module repository pushes.
//!
//! The modulemd document is interpreted as a module-stream v2 structure
//! (`document: modulemd`, `version: 2`), the only shape this synchronizer
//! understands; any other shape is a [`DistroBakerError::ModuleMetadata`].

use std::collections::BTreeMap;

use serde::Deserialize;
use tempfile::TempDir;

use crate::buildsys::BuildSystemClient;
use crate::error::{DistroBakerError, ErrorContext};
use crate::pipeline::{self, SyncRequest};
use crate::retry::Reporter;
use crate::types::{ModuleCoord, Namespace};
use crate::{Engine, Role};

#[derive(Debug, Deserialize)]
struct RawModulemd {
    document: String,
    version: u32,
    data: RawModulemdData,
}

#[derive(Debug, Default, Deserialize)]
struct RawModulemdData {
    components: Option<RawComponents>,
}

#[derive(Debug, Default, Deserialize)]
struct RawComponents {
    rpms: Option<BTreeMap<String, RawRpmComponent>>,
    modules: Option<BTreeMap<String, RawModuleComponent>>,
}

#[derive(Debug, Deserialize)]
struct RawRpmComponent {
    repository: String,
    cache: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModuleComponent {
    repository: String,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

/// The subset of a module-stream v2 document this synchronizer consumes:
/// its declared RPM and module component lists.
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    pub rpm_components: BTreeMap<String, RpmComponentSpec>,
    pub module_components: BTreeMap<String, ModuleComponentSpec>,
}

#[derive(Debug, Clone)]
pub struct RpmComponentSpec {
    pub repository: String,
    pub cache: Option<String>,
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModuleComponentSpec {
    pub repository: String,
    pub git_ref: Option<String>,
}

impl ModuleMetadata {
    /// Parses `modulemd`, rejecting anything that isn't a
    /// `document: modulemd, version: 2` structure.
    pub fn parse(modulemd: &str, nvr: &str) -> Result<Self, DistroBakerError> {
        let raw: RawModulemd = serde_yaml::from_str(modulemd).map_err(|e| {
            DistroBakerError::module_metadata(
                ErrorContext::default().with_nvr(nvr),
                format!("unable to parse module metadata: {e}"),
            )
        })?;
        if raw.document != "modulemd" || raw.version != 2 {
            return Err(DistroBakerError::module_metadata(
                ErrorContext::default().with_nvr(nvr),
                format!(
                    "unsupported module metadata shape: document={}, version={}",
                    raw.document, raw.version
                ),
            ));
        }
        let components = raw.data.components.unwrap_or_default();
        Ok(ModuleMetadata {
            rpm_components: components
                .rpms
                .unwrap_or_default()
                .into_iter()
                .map(|(name, c)| {
                    (
                        name,
                        RpmComponentSpec {
                            repository: c.repository,
                            cache: c.cache,
                            git_ref: c.git_ref,
                        },
                    )
                })
                .collect(),
            module_components: components
                .modules
                .unwrap_or_default()
                .into_iter()
                .map(|(name, c)| {
                    (
                        name,
                        ModuleComponentSpec {
                            repository: c.repository,
                            git_ref: c.git_ref,
                        },
                    )
                })
                .collect(),
        })
    }
}

/// Synchronizes every RPM constituent of a module, then pushes every
/// synchronized repository (parent included, by the caller) atomically:
/// only once every constituent's [`pipeline::sync_repo`] call has
/// succeeded without pushing are the deferred working directories pushed,
/// in order, stopping at the first failure.
///
/// Module-of-modules expansion is not yet implemented: a non-empty
/// `module_components` list logs an error and returns `Ok(())` without
/// pushing anything synchronized so far, matching the original tool's
/// "aborting" log line that nonetheless reports success (flagged, not
/// silently fixed — see `DESIGN.md` Open Question 2).
pub fn sync_module_components(
    engine: &Engine,
    module: &ModuleCoord,
    nvr: &str,
    modulemd: Option<String>,
    reporter: &mut dyn Reporter,
) -> Result<(), DistroBakerError> {
    let ctx = || ErrorContext::new("modules", module.to_string()).with_nvr(nvr);

    let modulemd = match modulemd {
        Some(m) => m,
        None => {
            reporter.info(&format!("Retrieving modulemd for module {module}: {nvr}"));
            let record = engine.with_session(Role::Source, |client| client.get_build(nvr))?;
            record
                .extra
                .and_then(|e| e.typeinfo)
                .and_then(|t| t.module)
                .map(|m| m.modulemd_str)
                .ok_or_else(|| {
                    DistroBakerError::module_metadata(ctx(), "cannot retrieve module info")
                })?
        }
    };

    let meta = ModuleMetadata::parse(&modulemd, nvr)?;
    reporter.info(&format!(
        "Module {module} has {} RPM component(s)",
        meta.rpm_components.len()
    ));

    let mut pending: Vec<(Namespace, String, TempDir, String)> = Vec::new();

    for (name, spec) in &meta.rpm_components {
        let tempdir = tempfile::Builder::new()
            .prefix(&format!("mcrepo-{module}-rpms-{name}-"))
            .tempdir()
            .map_err(|e| DistroBakerError::remote_fetch(ctx(), e.to_string()))?;
        let scmurl = match &spec.git_ref {
            Some(r) => format!("{}#{r}", spec.repository),
            None => spec.repository.clone(),
        };
        let dest = pipeline::sync_repo(
            engine,
            Namespace::Rpms,
            name,
            SyncRequest {
                nvr: None,
                gitdir: Some(tempdir.path()),
                cmodule: Some(module),
                scmurl: Some(&scmurl),
                bcache: spec.cache.as_deref(),
            },
            reporter,
        )
        .map_err(|e| {
            reporter.error(&format!(
                "Synchronization of component rpms/{name} failed, aborting module sync."
            ));
            e
        })?;
        pending.push((Namespace::Rpms, name.clone(), tempdir, dest));
    }

    if !meta.module_components.is_empty() {
        reporter.error(&format!(
            "Module {module}: synchronization not yet implemented for {} module component(s), aborting.",
            meta.module_components.len()
        ));
        return Ok(());
    }

    for (ns, name, tempdir, dest) in pending {
        let dest_scm = crate::types::ScmRef::parse(&dest);
        let dest_ref = dest_scm.git_ref.as_deref().unwrap_or("master");
        crate::vcs::push(
            ns,
            &name,
            tempdir.path(),
            dest_ref,
            engine.dry_run(),
            engine.retry(),
            reporter,
        )
        .map_err(|e| {
            reporter.error(&format!(
                "Module {module}: failed to push component {ns}/{name}, skipping."
            ));
            e
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
document: modulemd
version: 2
data:
  components:
    rpms:
      foo:
        repository: "https://example.com/rpms/foo"
        cache: "https://cache.example.com"
        ref: "main"
      bar:
        repository: "https://example.com/rpms/bar"
"#;

    #[test]
    fn parses_rpm_components() {
        let meta = ModuleMetadata::parse(SAMPLE, "mod-1-1").unwrap();
        assert_eq!(meta.rpm_components.len(), 2);
        assert!(meta.module_components.is_empty());
        assert_eq!(
            meta.rpm_components["foo"].git_ref.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn rejects_non_modulemd_document() {
        let err = ModuleMetadata::parse("document: other\nversion: 2\ndata: {}", "mod-1-1")
            .unwrap_err();
        assert!(matches!(err, DistroBakerError::ModuleMetadata { .. }));
    }

    #[test]
    fn rejects_wrong_version() {
        let err = ModuleMetadata::parse("document: modulemd\nversion: 1\ndata: {}", "mod-1-1")
            .unwrap_err();
        assert!(matches!(err, DistroBakerError::ModuleMetadata { .. }));
    }
}
