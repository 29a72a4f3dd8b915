//! Build-system client pool (C2): session caching, NVR/tag queries, and
//! build submission for both the flat (RPC) and modular (MBS HTTP) cases.
//!
//! Source and destination expose the same query surface behind one
//! [`BuildSystemClient`] trait; submission surfaces differ by namespace
//! (flat vs. modular) rather than by role, so call sites never branch on
//! which side of the sync they're talking to.

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{MbsAuthMethod, MbsConfig};
use crate::error::{DistroBakerError, ErrorContext};
use crate::retry::Reporter;
use crate::types::{BuildInfo, ModuleCoord, Namespace};
use crate::{Engine, Role};

/// A tagged build as returned by `listTagged`. `package_name` is only
/// populated (and only needed) when listing every latest build in a tag
/// without a package filter, as the sweep does to seed its component set.
#[derive(Debug, Clone, Deserialize)]
pub struct TaggedBuild {
    pub nvr: String,
    pub package_name: Option<String>,
}

/// The query surface shared by both source and destination build systems.
pub trait BuildSystemClient {
    fn list_tagged(
        &self,
        tag: &str,
        package: Option<&str>,
        latest: bool,
    ) -> Result<Vec<TaggedBuild>, DistroBakerError>;

    fn get_build(&self, nvr: &str) -> Result<RawBuildRecord, DistroBakerError>;

    /// Flat (RPM) build submission. Only meaningful for a destination
    /// session; returns the task id, or `0` in dry-run.
    fn submit_flat_build(
        &self,
        scmurl: &str,
        target: &str,
        scratch: bool,
        dry_run: bool,
    ) -> Result<u64, DistroBakerError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildRecord {
    pub source: Option<String>,
    pub extra: Option<RawBuildExtra>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildExtra {
    pub typeinfo: Option<RawTypeInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTypeInfo {
    pub module: Option<RawModuleInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawModuleInfo {
    pub name: String,
    pub stream: String,
    pub modulemd_str: String,
}

impl RawBuildRecord {
    /// Extracts `{scmurl, name?, stream?, modulemd?}` from a build record.
    /// Missing `source` is an error; missing module extras on a non-module
    /// build is normal (not an error).
    pub fn into_build_info(self, nvr: &str) -> Result<BuildInfo, DistroBakerError> {
        let scmurl = self.source.ok_or_else(|| {
            DistroBakerError::build_system(
                ErrorContext::default().with_nvr(nvr),
                "cannot find any SCMURL associated with this build",
            )
        })?;
        let module = self.extra.and_then(|e| e.typeinfo).and_then(|t| t.module);
        Ok(BuildInfo {
            scmurl,
            name: module.as_ref().map(|m| m.name.clone()),
            stream: module.as_ref().map(|m| m.stream.clone()),
            modulemd: module.map(|m| m.modulemd_str),
        })
    }
}

/// Build-system credentials, supplied by the caller rather than read from a
/// credentials file by this crate (out of scope, per the data model notes):
/// a Kerberos principal/keytab pair, a bearer token, or both left unset for
/// an anonymous (source) session.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub principal: Option<String>,
    pub keytab: Option<String>,
    pub token: Option<String>,
}

/// A JSON-RPC-over-HTTP client for a Koji-shaped build system, one per
/// role (source is anonymous; destination authenticates).
#[derive(Debug, Clone)]
pub struct KojiLikeClient {
    base_url: String,
    http: Client,
    credentials: Credentials,
}

impl KojiLikeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DistroBakerError> {
        let http = Client::builder()
            .user_agent(format!("distrobaker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DistroBakerError::build_system(ErrorContext::default(), e.to_string()))?;
        Ok(KojiLikeClient {
            base_url: base_url.into(),
            http,
            credentials: Credentials::default(),
        })
    }

    /// Attaches credentials for subsequent calls (the Kerberos principal is
    /// carried for diagnostics; only a bearer token is actually sent, since
    /// Kerberos auth is negotiated by the transport, not this client).
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, DistroBakerError> {
        let mut request = self
            .http
            .post(format!("{}/rpc", self.base_url.trim_end_matches('/')))
            .json(&json!({ "method": method, "params": params }));
        if let Some(token) = &self.credentials.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .map_err(|e| DistroBakerError::build_system(ErrorContext::default(), e.to_string()))?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(DistroBakerError::auth(
                ErrorContext::default(),
                format!("{method} rejected by the build system"),
            ));
        }
        if !resp.status().is_success() {
            return Err(DistroBakerError::build_system(
                ErrorContext::default(),
                format!("{method} failed with status {}", resp.status()),
            ));
        }
        #[derive(Deserialize)]
        struct Envelope {
            result: serde_json::Value,
        }
        let envelope: Envelope = resp
            .json()
            .map_err(|e| DistroBakerError::build_system(ErrorContext::default(), e.to_string()))?;
        Ok(envelope.result)
    }
}

impl BuildSystemClient for KojiLikeClient {
    fn list_tagged(
        &self,
        tag: &str,
        package: Option<&str>,
        latest: bool,
    ) -> Result<Vec<TaggedBuild>, DistroBakerError> {
        let result = self.call(
            "listTagged",
            json!({ "tag": tag, "package": package, "latest": latest }),
        )?;
        serde_json::from_value(result)
            .map_err(|e| DistroBakerError::build_system(ErrorContext::default(), e.to_string()))
    }

    fn get_build(&self, nvr: &str) -> Result<RawBuildRecord, DistroBakerError> {
        let result = self.call("getBuild", json!({ "nvr": nvr }))?;
        serde_json::from_value(result).map_err(|e| {
            DistroBakerError::build_system(ErrorContext::default().with_nvr(nvr), e.to_string())
        })
    }

    fn submit_flat_build(
        &self,
        scmurl: &str,
        target: &str,
        scratch: bool,
        dry_run: bool,
    ) -> Result<u64, DistroBakerError> {
        if dry_run {
            return Ok(0);
        }
        let result = self.call(
            "build",
            json!({ "scmurl": scmurl, "target": target, "opts": { "scratch": scratch } }),
        )?;
        result.as_u64().ok_or_else(|| {
            DistroBakerError::build_submit(ErrorContext::default(), "build call returned no task id")
        })
    }
}

/// A session-caching wrapper: re-creates the underlying client when its age
/// exceeds 3550 seconds, matching the "slightly less than an hour, to be
/// safe" comment in the original tool.
pub struct CachedSession {
    client: KojiLikeClient,
    created_at: Instant,
}

const SESSION_MAX_AGE: Duration = Duration::from_secs(3550);

impl CachedSession {
    pub fn is_stale(&self) -> bool {
        self.created_at.elapsed() >= SESSION_MAX_AGE
    }

    pub fn client(&self) -> &KojiLikeClient {
        &self.client
    }

    pub fn new(client: KojiLikeClient) -> Self {
        CachedSession {
            client,
            created_at: Instant::now(),
        }
    }
}

/// Submits modular builds to the MBS HTTP API, encapsulating the
/// kerberos/oidc auth branching so call sites never see it.
#[derive(Debug, Clone)]
pub struct MbsClient {
    config: MbsConfig,
    http: Client,
}

#[derive(Debug, Serialize)]
struct ModuleBuildRequest<'a> {
    scmurl: &'a str,
    branch: &'a str,
    buildrequire_overrides: serde_json::Value,
    scratch: bool,
}

#[derive(Debug, Deserialize)]
struct ModuleBuildResponseSingle {
    id: u64,
}

/// The token endpoint's client-credentials-grant response; only the bearer
/// token itself is of interest here.
#[derive(Debug, Deserialize)]
struct OidcTokenResponse {
    access_token: String,
}

impl MbsClient {
    pub fn new(config: MbsConfig) -> Result<Self, DistroBakerError> {
        let http = Client::builder()
            .user_agent(format!("distrobaker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DistroBakerError::build_system(ErrorContext::default(), e.to_string()))?;
        Ok(MbsClient { config, http })
    }

    /// Exchanges the configured OIDC client credentials for a bearer token
    /// against `oidc_id_provider`, per spec.md §4.2 ("bearer token obtained
    /// from the configured identity provider using the listed scopes and
    /// client credentials").
    fn fetch_oidc_token(&self) -> Result<String, DistroBakerError> {
        let provider = self.config.oidc_id_provider.as_deref().ok_or_else(|| {
            DistroBakerError::auth(ErrorContext::default(), "oidc_id_provider not configured")
        })?;
        let client_id = self.config.oidc_client_id.as_deref().ok_or_else(|| {
            DistroBakerError::auth(ErrorContext::default(), "oidc_client_id not configured")
        })?;
        let client_secret = self.config.oidc_client_secret.as_deref().ok_or_else(|| {
            DistroBakerError::auth(ErrorContext::default(), "oidc_client_secret not configured")
        })?;
        let scope = self
            .config
            .oidc_scopes
            .as_deref()
            .unwrap_or(&[])
            .join(" ");

        let resp = self
            .http
            .post(provider)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", &scope),
            ])
            .send()
            .map_err(|e| DistroBakerError::auth(ErrorContext::default(), e.to_string()))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(DistroBakerError::auth(
                ErrorContext::default(),
                "OIDC identity provider rejected the configured client credentials",
            ));
        }
        if !resp.status().is_success() {
            return Err(DistroBakerError::auth(
                ErrorContext::default(),
                format!("OIDC token request failed with status {}", resp.status()),
            ));
        }
        let token: OidcTokenResponse = resp
            .json()
            .map_err(|e| DistroBakerError::auth(ErrorContext::default(), e.to_string()))?;
        Ok(token.access_token)
    }

    /// `POST <api_url>/module-builds/` with the configured auth method.
    /// `401` becomes [`DistroBakerError::Auth`]; any other non-2xx becomes
    /// [`DistroBakerError::BuildSubmit`] carrying the response body.
    pub fn submit_modular_build(
        &self,
        scmurl: &str,
        stream: &str,
        platform_name: &str,
        platform_stream: &str,
        scratch: bool,
        dry_run: bool,
    ) -> Result<u64, DistroBakerError> {
        if dry_run {
            return Ok(0);
        }
        let body = ModuleBuildRequest {
            scmurl,
            branch: stream,
            buildrequire_overrides: json!({ platform_name: [platform_stream] }),
            scratch,
        };
        let url = format!(
            "{}/module-builds/",
            self.config.api_url.trim_end_matches('/')
        );
        let request = self.http.post(&url).json(&body);
        let request = match self.config.auth_method {
            MbsAuthMethod::Kerberos => request,
            MbsAuthMethod::Oidc => request.bearer_auth(self.fetch_oidc_token()?),
        };
        let resp = request
            .send()
            .map_err(|e| DistroBakerError::build_submit(ErrorContext::default(), e.to_string()))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(DistroBakerError::auth(
                ErrorContext::default(),
                format!(
                    "MBS authentication failed using auth_method {:?}",
                    self.config.auth_method
                ),
            ));
        }
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DistroBakerError::build_submit(
                ErrorContext::default(),
                format!("request failed: {body}"),
            ));
        }

        let value: serde_json::Value = resp
            .json()
            .map_err(|e| DistroBakerError::build_submit(ErrorContext::default(), e.to_string()))?;
        let record = match &value {
            serde_json::Value::Array(arr) => arr.first().cloned().ok_or_else(|| {
                DistroBakerError::build_submit(ErrorContext::default(), "empty response array")
            })?,
            other => other.clone(),
        };
        let parsed: ModuleBuildResponseSingle = serde_json::from_value(record)
            .map_err(|e| DistroBakerError::build_submit(ErrorContext::default(), e.to_string()))?;
        Ok(parsed.id)
    }
}

/// Submits a build for `component` at `dest_ref`, dispatching to the flat
/// (RPM) or modular (MBS) build surface by `ns`. The build SCMURL is the
/// configured prefix joined with the build component name, which is
/// `component` itself unless an explicit `components[ns][component]` entry
/// overrides it.
pub fn submit_build(
    engine: &Engine,
    ns: Namespace,
    component: &str,
    dest_ref: &str,
    reporter: &mut dyn Reporter,
) -> Result<u64, DistroBakerError> {
    let config = engine.config();
    let buildcomp = config.build_component_name(ns, component);
    match ns {
        Namespace::Rpms => {
            let scmurl = format!("{}/rpms/{buildcomp}#{dest_ref}", config.build.prefix);
            reporter.info(&format!(
                "Submitting build for {ns}/{component} ({scmurl})."
            ));
            engine.with_session(Role::Destination, |client| {
                client.submit_flat_build(
                    &scmurl,
                    &config.build.target,
                    config.build.scratch,
                    engine.dry_run(),
                )
            })
        }
        Namespace::Modules => {
            let ms = ModuleCoord::parse(&buildcomp);
            let scmurl = format!("{}/modules/{}#{dest_ref}", config.build.prefix, ms.name);
            reporter.info(&format!(
                "Submitting build for {ns}/{component} ({scmurl})."
            ));
            let mbs = engine.mbs_client()?;
            mbs.submit_modular_build(
                &scmurl,
                &ms.stream,
                &config.build.platform.name,
                &config.build.platform.stream,
                config.build.scratch,
                engine.dry_run(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_record_requires_source() {
        let record = RawBuildRecord {
            source: None,
            extra: None,
        };
        assert!(record.into_build_info("pkg-1-1").is_err());
    }

    #[test]
    fn build_record_without_module_extras_is_normal() {
        let record = RawBuildRecord {
            source: Some("https://example.com/foo#main".into()),
            extra: None,
        };
        let info = record.into_build_info("pkg-1-1").unwrap();
        assert!(info.name.is_none());
        assert!(info.modulemd.is_none());
    }

    #[test]
    fn build_record_extracts_module_extras() {
        let record = RawBuildRecord {
            source: Some("https://example.com/mymod#stream".into()),
            extra: Some(RawBuildExtra {
                typeinfo: Some(RawTypeInfo {
                    module: Some(RawModuleInfo {
                        name: "mymod".into(),
                        stream: "1.0".into(),
                        modulemd_str: "document: modulemd".into(),
                    }),
                }),
            }),
        };
        let info = record.into_build_info("mymod-1-1").unwrap();
        assert_eq!(info.name.as_deref(), Some("mymod"));
        assert_eq!(info.stream.as_deref(), Some("1.0"));
    }

    #[test]
    fn session_is_stale_after_max_age() {
        let client = KojiLikeClient::new("https://koji.example.com").unwrap();
        let mut session = CachedSession::new(client);
        assert!(!session.is_stale());
        session.created_at = Instant::now() - SESSION_MAX_AGE - Duration::from_secs(1);
        assert!(session.is_stale());
    }

    #[test]
    fn dry_run_flat_build_returns_zero_without_network() {
        let client = KojiLikeClient::new("https://koji.invalid.example").unwrap();
        let task = client
            .submit_flat_build("https://example.com/foo#main", "target", false, true)
            .unwrap();
        assert_eq!(task, 0);
    }
}
