//! Lookaside blob cache reconciliation (C4).
//!
//! Diffs a component's source and destination `sources` manifests and
//! mirrors any blob present in the source cache but missing from the
//! destination, verifying hashes on the way through, in the teacher's
//! `reqwest::blocking` HTTP-client idiom (`shipper::registry::RegistryClient`).

use std::io::Write;
use std::path::Path;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use sha2::{Digest, Sha512};

use crate::config::CacheConfig;
use crate::error::{DistroBakerError, ErrorContext};
use crate::retry::{with_retry, Reporter};
use crate::types::{HashType, Namespace, SourceEntry};

/// An HTTP client bound to one lookaside cache endpoint.
#[derive(Debug, Clone)]
pub struct LookasideClient {
    cache: CacheConfig,
    http: Client,
}

impl LookasideClient {
    pub fn new(cache: CacheConfig) -> Result<Self, DistroBakerError> {
        let http = Client::builder()
            .user_agent(format!("distrobaker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
            })?;
        Ok(LookasideClient { cache, http })
    }

    fn blob_path(&self, namespace: Namespace, cache_name: &str, filename: &str) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.cache.url.trim_end_matches('/'),
            self.cache.cgi,
            namespace.as_str(),
            cache_name,
            filename,
        )
    }

    /// Probes for the existence of `filename` with the declared hash.
    pub fn remote_file_exists(
        &self,
        namespace: Namespace,
        cache_name: &str,
        entry: &SourceEntry,
    ) -> Result<bool, DistroBakerError> {
        let url = format!(
            "{}?{}hash={}",
            self.blob_path(namespace, cache_name, &entry.filename),
            match entry.hashtype {
                HashType::Md5 => "",
                HashType::Sha512 => "hashtype=sha512&",
            },
            entry.hash,
        );
        let resp = self.http.head(&url).send().map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(DistroBakerError::cache_reconcile(
                ErrorContext::default(),
                format!("unexpected status probing {url}: {s}"),
            )),
        }
    }

    /// Downloads `filename` into `dest`, verifying its hash.
    pub fn download(
        &self,
        namespace: Namespace,
        cache_name: &str,
        entry: &SourceEntry,
        dest: &Path,
    ) -> Result<(), DistroBakerError> {
        let url = self.blob_path(namespace, cache_name, &entry.filename);
        let mut resp = self.http.get(&url).send().map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        if resp.status() != StatusCode::OK {
            return Err(DistroBakerError::cache_reconcile(
                ErrorContext::default(),
                format!("unexpected status downloading {url}: {}", resp.status()),
            ));
        }
        let mut body = Vec::new();
        resp.copy_to(&mut body).map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        verify_hash(&body, entry)?;
        let mut file = std::fs::File::create(dest).map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        file.write_all(&body).map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        Ok(())
    }

    /// Uploads the file at `path` as `filename` with the declared hash.
    pub fn upload(
        &self,
        namespace: Namespace,
        cache_name: &str,
        entry: &SourceEntry,
        path: &Path,
    ) -> Result<(), DistroBakerError> {
        let url = self.blob_path(namespace, cache_name, &entry.filename);
        let body = std::fs::read(path).map_err(|e| {
            DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
        })?;
        let resp = self
            .http
            .post(&url)
            .query(&[("hash", entry.hash.as_str())])
            .body(body)
            .send()
            .map_err(|e| {
                DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string())
            })?;
        if !resp.status().is_success() {
            return Err(DistroBakerError::cache_reconcile(
                ErrorContext::default(),
                format!("unexpected status uploading {url}: {}", resp.status()),
            ));
        }
        Ok(())
    }
}

fn verify_hash(body: &[u8], entry: &SourceEntry) -> Result<(), DistroBakerError> {
    let digest = match entry.hashtype {
        HashType::Md5 => {
            let mut hasher = md5::Md5::new();
            hasher.update(body);
            hex::encode(hasher.finalize())
        }
        HashType::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(body);
            hex::encode(hasher.finalize())
        }
    };
    if digest != entry.hash {
        return Err(DistroBakerError::cache_reconcile(
            ErrorContext::default(),
            format!(
                "hash mismatch for {}: expected {}, got {digest}",
                entry.filename, entry.hash
            ),
        ));
    }
    Ok(())
}

/// What happened to one entry during [`sync_cache`]'s retried attempt,
/// reported through `reporter` only after `with_retry` returns, since the
/// attempt closure must not itself hold a second mutable borrow of the
/// `reporter` already borrowed for the `with_retry` call.
enum CacheOutcome {
    AlreadyPresent,
    DryRunSkipped,
    Uploaded,
}

/// Reconciles every entry of `missing` (already computed as
/// `sourceManifest - destinationManifest`) between the source and
/// destination caches. A custom source-cache URL is accepted but only
/// warned about when it diverges from the configured source cache, per
/// the compatibility placeholder inherited from the original tool.
#[allow(clippy::too_many_arguments)]
pub fn sync_cache(
    namespace: Namespace,
    component: &str,
    missing: &std::collections::BTreeSet<SourceEntry>,
    source: &LookasideClient,
    destination: &LookasideClient,
    source_cache_name: &str,
    dest_cache_name: &str,
    retries: u32,
    dry_run: bool,
    reporter: &mut dyn Reporter,
) -> Result<usize, DistroBakerError> {
    let tempdir = tempfile::Builder::new()
        .prefix(&format!("cache-{}-{component}-", namespace.as_str()))
        .tempdir()
        .map_err(|e| DistroBakerError::cache_reconcile(ErrorContext::default(), e.to_string()))?;

    for entry in missing {
        let dest_path = tempdir.path().join(&entry.filename);
        let outcome = with_retry(
            retries,
            reporter,
            &format!("cache sync {}/{}", namespace, entry.filename),
            |_| -> Result<CacheOutcome, DistroBakerError> {
                if destination.remote_file_exists(namespace, dest_cache_name, entry)? {
                    return Ok(CacheOutcome::AlreadyPresent);
                }
                source.download(namespace, source_cache_name, entry, &dest_path)?;
                if dry_run {
                    Ok(CacheOutcome::DryRunSkipped)
                } else {
                    destination.upload(namespace, dest_cache_name, entry, &dest_path)?;
                    Ok(CacheOutcome::Uploaded)
                }
            },
        )
        .map_err(|_| {
            DistroBakerError::cache_reconcile(
                ErrorContext::new(namespace.as_str(), component),
                format!("exhausted attempts synchronizing {}", entry.filename),
            )
        })?;

        match outcome {
            CacheOutcome::AlreadyPresent => reporter.info(&format!(
                "File {} for {namespace}/{component} already uploaded, skipping.",
                entry.filename
            )),
            CacheOutcome::DryRunSkipped => reporter.info(&format!(
                "Running in dry run mode, not uploading {} for {namespace}/{component}.",
                entry.filename
            )),
            CacheOutcome::Uploaded => {}
        }
    }
    Ok(missing.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Response, Server};

    /// Spawns a one-shot fake lookaside server: HEAD requests get `head_status`,
    /// GET requests get the given body with 200. Shuts down after one request.
    fn spawn_fake_cache(head_status: u16, body: &'static [u8]) -> String {
        let server = Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}", server.server_addr());
        thread::spawn(move || {
            if let Ok(Some(req)) = server.recv_timeout(std::time::Duration::from_secs(5)) {
                if req.method() == &tiny_http::Method::Head {
                    let _ = req.respond(Response::empty(head_status));
                } else {
                    let _ = req.respond(Response::from_data(body));
                }
            }
        });
        url
    }

    #[test]
    fn remote_file_exists_reports_found() {
        let url = spawn_fake_cache(200, b"");
        let client = LookasideClient::new(CacheConfig {
            url,
            cgi: "/lookaside".into(),
            path: "/sources".into(),
        })
        .unwrap();
        let entry = SourceEntry {
            filename: "foo.tar.gz".into(),
            hash: "0".repeat(32),
            hashtype: HashType::Md5,
        };
        assert!(client
            .remote_file_exists(Namespace::Rpms, "foo", &entry)
            .unwrap());
    }

    #[test]
    fn remote_file_exists_reports_missing() {
        let url = spawn_fake_cache(404, b"");
        let client = LookasideClient::new(CacheConfig {
            url,
            cgi: "/lookaside".into(),
            path: "/sources".into(),
        })
        .unwrap();
        let entry = SourceEntry {
            filename: "foo.tar.gz".into(),
            hash: "0".repeat(32),
            hashtype: HashType::Md5,
        };
        assert!(!client
            .remote_file_exists(Namespace::Rpms, "foo", &entry)
            .unwrap());
    }

    #[test]
    fn download_rejects_hash_mismatch() {
        let url = spawn_fake_cache(200, b"actual body");
        let client = LookasideClient::new(CacheConfig {
            url,
            cgi: "/lookaside".into(),
            path: "/sources".into(),
        })
        .unwrap();
        let entry = SourceEntry {
            filename: "foo.tar.gz".into(),
            hash: "0".repeat(32),
            hashtype: HashType::Md5,
        };
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("foo.tar.gz");
        let err = client
            .download(Namespace::Rpms, "foo", &entry, &dest)
            .unwrap_err();
        assert!(matches!(err, DistroBakerError::CacheReconcile { .. }));
    }

    #[test]
    fn verify_hash_detects_mismatch() {
        let entry = SourceEntry {
            filename: "foo.tar.gz".into(),
            hash: "0".repeat(32),
            hashtype: HashType::Md5,
        };
        assert!(verify_hash(b"hello world", &entry).is_err());
    }

    #[test]
    fn verify_hash_accepts_matching_md5() {
        let mut hasher = md5::Md5::new();
        hasher.update(b"hello world");
        let digest = hex::encode(hasher.finalize());
        let entry = SourceEntry {
            filename: "foo.tar.gz".into(),
            hash: digest,
            hashtype: HashType::Md5,
        };
        assert!(verify_hash(b"hello world", &entry).is_ok());
    }

    #[test]
    fn blob_path_round_trips_cache_name_and_filename() {
        let client = LookasideClient::new(CacheConfig {
            url: "https://cache.example.com".into(),
            cgi: "/lookaside".into(),
            path: "/sources".into(),
        })
        .unwrap();
        let path = client.blob_path(Namespace::Rpms, "foo", "foo-1.0.tar.gz");
        assert_eq!(
            path,
            "https://cache.example.com/lookaside/rpms/foo/foo-1.0.tar.gz"
        );
    }
}
