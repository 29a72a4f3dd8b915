//! Event routing (C7): turns a single tagging event or a bulk component
//! sweep into [`crate::pipeline::sync_repo`] and [`crate::buildsys::submit_build`]
//! calls, applying the namespace, strict-mode, and exclude filters along
//! the way.

use std::collections::BTreeMap;

use crate::buildsys::{self, BuildSystemClient};
use crate::error::DistroBakerError;
use crate::pipeline::{self, SyncRequest};
use crate::retry::Reporter;
use crate::types::{ComponentRecord, Namespace, ScmRef};
use crate::{Engine, Role};

/// A Koji-shaped tagging event, as read from a message topic.
#[derive(Debug, Clone)]
pub struct TaggingEvent {
    pub topic: String,
    pub name: String,
    pub version: String,
    pub release: String,
    pub tag: String,
}

/// Tallies what a [`sweep`] call did with the component set it was handed.
/// `processed` is every component reaching a sync attempt, regardless of
/// whether the sync succeeded; `skipped` is everything filtered out by
/// strict mode or an exclude list before a sync was ever attempted.
/// `module_lookup_failures` counts modules whose build info couldn't be
/// retrieved while building the latest-tagged-modules map, so a caller can
/// tell "nothing to do" apart from "the lookup itself failed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub processed: usize,
    pub skipped: usize,
    pub module_lookup_failures: usize,
}

/// Handles one tagging event: resolves its namespace, applies the strict
/// and exclude filters, synchronizes, and (if configured) submits a build.
/// Every failure past message parsing is logged and swallowed rather than
/// propagated, since a failed trigger must not crash the dispatcher: the
/// next event is independent.
pub fn handle_event(engine: &Engine, event: &TaggingEvent, reporter: &mut dyn Reporter) {
    if !event.topic.ends_with("buildsys.tag") {
        reporter.warn(&format!("Unable to handle {} topics, ignoring.", event.topic));
        return;
    }

    let nvr = format!("{}-{}-{}", event.name, event.version, event.release);
    reporter.info(&format!(
        "Tagging event for {}, tag {} received.",
        event.name, event.tag
    ));

    let config = engine.config();
    let (ns, component) = if event.tag == config.trigger.rpms {
        (Namespace::Rpms, event.name.clone())
    } else if event.tag == config.trigger.modules {
        let info = match pipeline::get_build_info(engine, &nvr) {
            Ok(info) if info.name.is_some() && info.stream.is_some() => info,
            _ => {
                reporter.error(&format!(
                    "Could not retrieve module build info for {nvr}, skipping."
                ));
                return;
            }
        };
        let name = info.name.clone().expect("checked above");
        let stream = info.stream.clone().expect("checked above");
        let bcomp = format!("{name}:{stream}");
        if event.name != bcomp {
            reporter.info(&format!("Using unmangled component name: {bcomp}"));
        }
        let scm_comp = strip_scm_suffix(
            ScmRef::parse(&info.scmurl)
                .component
                .as_deref()
                .unwrap_or(""),
        );
        if name != scm_comp {
            reporter.info(&format!(
                "Module name {name} does not match SCM component name {scm_comp}, skipping."
            ));
            return;
        }
        (Namespace::Modules, bcomp)
    } else {
        reporter.info("Message tag not configured as a trigger, ignoring.");
        return;
    };

    if config.control.strict && !config.has_component_entry(ns, &component) {
        reporter.info(&format!(
            "Component {ns}/{component} not configured for sync and the strict mode is enabled, ignoring."
        ));
        return;
    }
    if config.control.is_excluded(ns, &component) {
        reporter.info(&format!(
            "The {ns}/{component} component is excluded from sync, skipping."
        ));
        return;
    }

    reporter.info(&format!("Handling trigger for {ns}/{component}, tag {}.", event.tag));
    match pipeline::sync_repo(
        engine,
        ns,
        &component,
        SyncRequest {
            nvr: Some(&nvr),
            ..Default::default()
        },
        reporter,
    ) {
        Ok(dest) => submit_if_enabled(engine, ns, &component, &dest, reporter),
        Err(e) => reporter.error(&format!(
            "Synchronization of {ns}/{component} failed, aborting trigger: {e}"
        )),
    }
}

/// Processes `compset`; an empty set is filled in from the latest tagged
/// builds in both trigger tags, matching the "no components selected"
/// fallback of a bulk sweep.
pub fn sweep(
    engine: &Engine,
    mut compset: Vec<ComponentRecord>,
    reporter: &mut dyn Reporter,
) -> Result<SweepSummary, DistroBakerError> {
    let config = engine.config();

    let tagged_modules = engine.with_session(Role::Source, |client| {
        client.list_tagged(&config.trigger.modules, None, false)
    })?;
    let mut latest: BTreeMap<String, String> = BTreeMap::new();
    let mut module_lookup_failures = 0;
    for build in tagged_modules {
        match pipeline::get_build_info(engine, &build.nvr) {
            Ok(info) if info.name.is_some() && info.stream.is_some() => {
                let coord = format!("{}:{}", info.name.unwrap(), info.stream.unwrap());
                latest.insert(coord, build.nvr);
            }
            _ => {
                module_lookup_failures += 1;
                reporter.error(&format!(
                    "Could not get module info for {}, skipping.",
                    build.nvr
                ));
            }
        }
    }

    if compset.is_empty() {
        reporter.info("No components selected, gathering components from triggers.");
        let tagged_rpms = engine.with_session(Role::Source, |client| {
            client.list_tagged(&config.trigger.rpms, None, true)
        })?;
        for build in tagged_rpms {
            if let Some(name) = build.package_name {
                compset.push(ComponentRecord {
                    namespace: Namespace::Rpms,
                    component: name,
                });
            }
        }
        for coord in latest.keys() {
            compset.push(ComponentRecord {
                namespace: Namespace::Modules,
                component: coord.clone(),
            });
        }
    }
    reporter.info(&format!("Processing {} component(s).", compset.len()));

    compset.sort_by(|a, b| {
        a.namespace
            .as_str()
            .to_lowercase()
            .cmp(&b.namespace.as_str().to_lowercase())
            .then_with(|| a.component.to_lowercase().cmp(&b.component.to_lowercase()))
    });

    let total = compset.len();
    let mut processed = 0;
    for rec in &compset {
        let ns = rec.namespace;
        let component = rec.component.as_str();
        reporter.info(&format!("Processing {ns}/{component}."));

        if config.control.is_excluded(ns, component) {
            reporter.info(&format!(
                "The {ns}/{component} component is excluded from sync, skipping."
            ));
            continue;
        }
        if config.control.strict && !config.has_component_entry(ns, component) {
            reporter.info(&format!(
                "The {ns}/{component} component not configured while the strict mode is enabled, ignoring."
            ));
            continue;
        }

        let nvr = latest.get(component).cloned();
        match pipeline::sync_repo(
            engine,
            ns,
            component,
            SyncRequest {
                nvr: nvr.as_deref(),
                ..Default::default()
            },
            reporter,
        ) {
            Ok(dest) => submit_if_enabled(engine, ns, component, &dest, reporter),
            Err(e) => reporter.error(&format!("Synchronization of {ns}/{component} failed: {e}")),
        }
        reporter.info(&format!("Done processing {ns}/{component}."));
        processed += 1;
    }

    let skipped = total - processed;
    reporter.info(&format!(
        "Synchronized {processed} component(s), {skipped} skipped."
    ));
    Ok(SweepSummary {
        processed,
        skipped,
        module_lookup_failures,
    })
}

fn submit_if_enabled(
    engine: &Engine,
    ns: Namespace,
    component: &str,
    dest: &str,
    reporter: &mut dyn Reporter,
) {
    if !engine.config().control.build {
        reporter.info(&format!(
            "Builds are disabled, no build attempted for {ns}/{component}, trigger processed."
        ));
        return;
    }
    let dest_scm = ScmRef::parse(dest);
    let dest_ref = dest_scm.ref_or("master");
    match buildsys::submit_build(engine, ns, component, &dest_ref, reporter) {
        Ok(task) => reporter.info(&format!(
            "Build submission of {ns}/{component} complete, task {task}, trigger processed."
        )),
        Err(e) => reporter.error(&format!(
            "Build submission of {ns}/{component} failed, aborting trigger: {e}"
        )),
    }
}

/// Strips a trailing `.git` and/or `?` from an SCM path component, as a
/// module's SCM URL sometimes carries the generated `*-devel` suffix.
fn strip_scm_suffix(component: &str) -> String {
    component
        .trim_end_matches('?')
        .trim_end_matches(".git")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RawDocument};
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
  trigger: {rpms: "rpms-trigger", modules: "modules-trigger"}
  build: {prefix: "distro", target: "distro-target", platform: "platform:f40", scratch: false}
  git: {author: "Bot", email: "bot@example.com", message: "Sync"}
  control: {build: false, merge: true, strict: true}
  defaults:
    cache: {source: "%(component)s", destination: "%(component)s"}
    rpms: {source: "%(component)s", destination: "%(component)s"}
    modules: {source: "%(component)s", destination: "%(component)s"}
components:
  rpms:
    foo: {}
"#,
        )
        .unwrap();
        Config::from_raw(doc, &mut NullReporter).unwrap()
    }

    #[test]
    fn handle_event_ignores_unrelated_topics() {
        let engine = Engine::new(sample_config(), true, 1);
        let event = TaggingEvent {
            topic: "org.example.other.event".into(),
            name: "foo".into(),
            version: "1".into(),
            release: "1".into(),
            tag: "rpms-trigger".into(),
        };
        // Should not panic and should not attempt any network I/O.
        handle_event(&engine, &event, &mut NullReporter);
    }

    #[test]
    fn handle_event_strict_mode_skips_unconfigured_component() {
        let engine = Engine::new(sample_config(), true, 1);
        let event = TaggingEvent {
            topic: "org.example.buildsys.tag".into(),
            name: "notconfigured".into(),
            version: "1".into(),
            release: "1".into(),
            tag: "rpms-trigger".into(),
        };
        handle_event(&engine, &event, &mut NullReporter);
    }

    #[test]
    fn strip_scm_suffix_removes_git_and_query() {
        assert_eq!(strip_scm_suffix("foo-devel.git?"), "foo-devel");
        assert_eq!(strip_scm_suffix("foo"), "foo");
    }

    #[test]
    fn sweep_summary_default_is_zeroed() {
        let summary = SweepSummary::default();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.module_lookup_failures, 0);
    }
}
