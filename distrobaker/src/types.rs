//! Core value types shared across the synchronization pipeline.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::DistroBakerError;

/// A version-control URL decomposed into link, ref, and (when derivable) a
/// `namespace/component` pair.
///
/// Parsed from strings of the form `link#ref`. When no `#ref` suffix is
/// present, `git_ref` is `None` — callers that need a default (`master`)
/// apply it explicitly, since not every caller wants the same default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmRef {
    pub link: String,
    pub git_ref: Option<String>,
    pub namespace: Option<String>,
    pub component: Option<String>,
}

impl ScmRef {
    /// Parses `link#ref` into a [`ScmRef`], extracting `namespace` and
    /// `component` from the last two path segments of `link` when present.
    pub fn parse(scmurl: &str) -> Self {
        let (link, git_ref) = match scmurl.split_once('#') {
            Some((link, r)) => (link.to_string(), Some(r.to_string())),
            None => (scmurl.to_string(), None),
        };
        let segments: Vec<&str> = link
            .trim_end_matches('/')
            .rsplitn(3, '/')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let (namespace, component) = if segments.len() >= 2 {
            (
                Some(segments[segments.len() - 2].to_string()),
                Some(segments[segments.len() - 1].to_string()),
            )
        } else {
            (None, None)
        };
        ScmRef {
            link,
            git_ref,
            namespace,
            component,
        }
    }

    /// Returns the ref, or `default` when none was present in the URL.
    pub fn ref_or(&self, default: &str) -> String {
        self.git_ref.clone().unwrap_or_else(|| default.to_string())
    }
}

impl fmt::Display for ScmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.git_ref {
            Some(r) => write!(f, "{}#{}", self.link, r),
            None => write!(f, "{}", self.link),
        }
    }
}

/// A `name:stream` module coordinate. `stream` defaults to `master` when the
/// suffix is missing or empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleCoord {
    pub name: String,
    pub stream: String,
}

impl ModuleCoord {
    pub fn parse(coord: &str) -> Self {
        match coord.split_once(':') {
            Some((name, stream)) if !stream.is_empty() => ModuleCoord {
                name: name.to_string(),
                stream: stream.to_string(),
            },
            _ => ModuleCoord {
                name: coord.split(':').next().unwrap_or(coord).to_string(),
                stream: "master".to_string(),
            },
        }
    }
}

impl fmt::Display for ModuleCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.stream)
    }
}

/// The hash family used by a [`SourceEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashType {
    Md5,
    Sha512,
}

impl HashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Md5 => "md5",
            HashType::Sha512 => "sha512",
        }
    }

    /// Deduces the hash family purely from hex-digest length, as the
    /// original `sources` file format carries no explicit type tag on the
    /// md5 line.
    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(HashType::Md5),
            128 => Some(HashType::Sha512),
            _ => None,
        }
    }
}

/// One entry of a component's `sources` lookaside manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceEntry {
    pub filename: String,
    pub hash: String,
    pub hashtype: HashType,
}

/// The parsed `sources` file for one component's working tree: a set of
/// [`SourceEntry`] values, order-independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceManifest {
    pub entries: BTreeSet<SourceEntry>,
}

impl SourceManifest {
    pub fn empty() -> Self {
        SourceManifest::default()
    }

    /// Parses a `sources` file body. Two line shapes are accepted per
    /// entry: `"<md5>  <file>"` and `"SHA512 (<file>) = <hex128>"`. Blank
    /// lines are skipped; any other non-empty line is a parse failure.
    pub fn parse(body: &str) -> Result<Self, DistroBakerError> {
        let mut entries = BTreeSet::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("SHA512 (") {
                let (filename, hash) = rest
                    .split_once(") = ")
                    .ok_or_else(|| DistroBakerError::manifest_parse(line))?;
                if hash.len() != 128 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(DistroBakerError::manifest_parse(line));
                }
                entries.insert(SourceEntry {
                    filename: filename.to_string(),
                    hash: hash.to_string(),
                    hashtype: HashType::Sha512,
                });
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let hash = parts.next().unwrap_or_default();
            let filename = parts.next().map(str::trim).unwrap_or_default();
            if filename.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DistroBakerError::manifest_parse(line));
            }
            let hashtype = HashType::from_hex_len(hash.len())
                .ok_or_else(|| DistroBakerError::manifest_parse(line))?;
            entries.insert(SourceEntry {
                filename: filename.to_string(),
                hash: hash.to_string(),
                hashtype,
            });
        }
        Ok(SourceManifest { entries })
    }

    /// Emits a canonical textual form: one `"<md5>  <file>"` line per md5
    /// entry and one `"SHA512 (<file>) = <hex128>"` line per sha512 entry,
    /// sorted by filename then hash type, so parse → serialize round-trips.
    pub fn to_canonical_string(&self) -> String {
        let mut sorted: Vec<&SourceEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.filename.cmp(&b.filename).then(a.hashtype.cmp(&b.hashtype)));
        let mut out = String::new();
        for entry in sorted {
            match entry.hashtype {
                HashType::Md5 => out.push_str(&format!("{}  {}\n", entry.hash, entry.filename)),
                HashType::Sha512 => {
                    out.push_str(&format!("SHA512 ({}) = {}\n", entry.filename, entry.hash))
                }
            }
        }
        out
    }

    /// Set difference: entries present in `self` but absent from `other`,
    /// by filename+hash+hashtype.
    pub fn difference(&self, other: &SourceManifest) -> BTreeSet<SourceEntry> {
        self.entries.difference(&other.entries).cloned().collect()
    }
}

/// A namespace a component may live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Rpms,
    Modules,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Rpms => "rpms",
            Namespace::Modules => "modules",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A build record as returned by a build-system query.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub scmurl: String,
    pub name: Option<String>,
    pub stream: Option<String>,
    pub modulemd: Option<String>,
}

/// A `"<namespace>/<component>"` record as consumed by sweep input sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub namespace: Namespace,
    pub component: String,
}

impl ComponentRecord {
    /// Parses a `"rpms/<component>"` or `"modules/<component>"` record.
    pub fn parse(record: &str) -> Option<Self> {
        let (ns, component) = record.split_once('/')?;
        let namespace = match ns {
            "rpms" => Namespace::Rpms,
            "modules" => Namespace::Modules,
            _ => return None,
        };
        if component.is_empty() {
            return None;
        }
        Some(ComponentRecord {
            namespace,
            component: component.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scmref_roundtrips_with_ref() {
        let parsed = ScmRef::parse("https://example.com/rpms/foo#main");
        assert_eq!(parsed.to_string(), "https://example.com/rpms/foo#main");
        assert_eq!(parsed.namespace.as_deref(), Some("rpms"));
        assert_eq!(parsed.component.as_deref(), Some("foo"));
    }

    #[test]
    fn scmref_omits_fragment_when_absent() {
        let parsed = ScmRef::parse("https://example.com/rpms/foo");
        assert_eq!(parsed.to_string(), "https://example.com/rpms/foo");
        assert!(parsed.git_ref.is_none());
    }

    #[test]
    fn module_coord_defaults_stream() {
        assert_eq!(
            ModuleCoord::parse("mymod"),
            ModuleCoord {
                name: "mymod".into(),
                stream: "master".into()
            }
        );
        assert_eq!(
            ModuleCoord::parse("mymod:"),
            ModuleCoord {
                name: "mymod".into(),
                stream: "master".into()
            }
        );
        assert_eq!(
            ModuleCoord::parse("mymod:1.0"),
            ModuleCoord {
                name: "mymod".into(),
                stream: "1.0".into()
            }
        );
    }

    #[test]
    fn manifest_parses_both_line_shapes() {
        let body = "d41d8cd98f00b204e9800998ecf8427e  foo.tar.gz\n\
                     SHA512 (bar.tar.gz) = 0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd\n";
        let manifest = SourceManifest::parse(body).unwrap();
        assert_eq!(manifest.entries.len(), 2);
    }

    #[test]
    fn manifest_missing_file_is_empty_set() {
        let manifest = SourceManifest::parse("").unwrap();
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn manifest_rejects_garbage_line() {
        assert!(SourceManifest::parse("not a valid line at all").is_err());
    }

    #[test]
    fn manifest_roundtrips_through_canonical_serializer() {
        let body = "d41d8cd98f00b204e9800998ecf8427e  foo.tar.gz\n";
        let manifest = SourceManifest::parse(body).unwrap();
        let serialized = manifest.to_canonical_string();
        let reparsed = SourceManifest::parse(&serialized).unwrap();
        assert_eq!(manifest, reparsed);
    }

    #[test]
    fn component_record_parses_namespace() {
        let rec = ComponentRecord::parse("rpms/foo").unwrap();
        assert_eq!(rec.namespace, Namespace::Rpms);
        assert_eq!(rec.component, "foo");
        assert!(ComponentRecord::parse("weird/foo").is_none());
    }

    proptest::proptest! {
        /// Testable property 6: for every `link#ref` input, `<link>#<ref>`
        /// serialization round-trips exactly; a bare `<link>` omits the
        /// fragment.
        #[test]
        fn scmref_roundtrip_prop(
            link in "[a-zA-Z0-9:/.]{1,40}",
            git_ref in proptest::option::of("[a-zA-Z0-9._/-]{1,20}"),
        ) {
            let input = match &git_ref {
                Some(r) => format!("{link}#{r}"),
                None => link.clone(),
            };
            let parsed = ScmRef::parse(&input);
            proptest::prop_assert_eq!(parsed.to_string(), input);
            proptest::prop_assert_eq!(parsed.git_ref.is_some(), git_ref.is_some());
        }

        /// Testable property 5: every round-trip of a `sources` file through
        /// the parser and the canonical serializer yields an equal set.
        #[test]
        fn manifest_roundtrip_prop(
            filenames in proptest::collection::vec("[a-z][a-z0-9_.-]{0,20}", 0..8),
        ) {
            let mut body = String::new();
            for (i, name) in filenames.iter().enumerate() {
                if i % 2 == 0 {
                    body.push_str(&format!("{}  {name}\n", "a".repeat(32)));
                } else {
                    body.push_str(&format!("SHA512 ({name}) = {}\n", "b".repeat(128)));
                }
            }
            let manifest = SourceManifest::parse(&body).unwrap();
            let serialized = manifest.to_canonical_string();
            let reparsed = SourceManifest::parse(&serialized).unwrap();
            proptest::prop_assert_eq!(manifest, reparsed);
        }
    }
}
