//! Error taxonomy for the synchronization engine.
//!
//! Every variant carries enough context — namespace, component, and NVR
//! when known — that a caller can emit the structured log record the
//! dispatcher's contract requires without reconstructing it from scratch.

use thiserror::Error;

/// Context threaded through an error: which component, in which namespace,
/// building which NVR (if one is known yet).
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub namespace: Option<String>,
    pub component: Option<String>,
    pub nvr: Option<String>,
}

impl ErrorContext {
    pub fn new(namespace: impl Into<String>, component: impl Into<String>) -> Self {
        ErrorContext {
            namespace: Some(namespace.into()),
            component: Some(component.into()),
            nvr: None,
        }
    }

    pub fn with_nvr(mut self, nvr: impl Into<String>) -> Self {
        self.nvr = Some(nvr.into());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "namespace={} component={} nvr={}",
            self.namespace.as_deref().unwrap_or("-"),
            self.component.as_deref().unwrap_or("-"),
            self.nvr.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Error)]
pub enum DistroBakerError {
    #[error("configuration error at {path}: {message}")]
    Config { path: String, message: String },

    #[error("remote fetch failed ({ctx}): {message}")]
    RemoteFetch { ctx: ErrorContext, message: String },

    #[error("merge conflict ({ctx}): {message}")]
    MergeConflict { ctx: ErrorContext, message: String },

    #[error("unparseable sources manifest line: {line}")]
    ManifestParse { line: String },

    #[error("cache reconciliation failed ({ctx}): {message}")]
    CacheReconcile { ctx: ErrorContext, message: String },

    #[error("build system error ({ctx}): {message}")]
    BuildSystem { ctx: ErrorContext, message: String },

    #[error("authentication rejected ({ctx}): {message}")]
    Auth { ctx: ErrorContext, message: String },

    #[error("build submission rejected ({ctx}): {message}")]
    BuildSubmit { ctx: ErrorContext, message: String },

    #[error("unexpected module metadata ({ctx}): {message}")]
    ModuleMetadata { ctx: ErrorContext, message: String },

    #[error("unsupported operation ({ctx}): {message}")]
    Unsupported { ctx: ErrorContext, message: String },
}

impl DistroBakerError {
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        DistroBakerError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn manifest_parse(line: impl Into<String>) -> Self {
        DistroBakerError::ManifestParse { line: line.into() }
    }

    pub fn remote_fetch(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::RemoteFetch {
            ctx,
            message: message.into(),
        }
    }

    pub fn merge_conflict(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::MergeConflict {
            ctx,
            message: message.into(),
        }
    }

    pub fn cache_reconcile(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::CacheReconcile {
            ctx,
            message: message.into(),
        }
    }

    pub fn build_system(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::BuildSystem {
            ctx,
            message: message.into(),
        }
    }

    pub fn auth(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::Auth {
            ctx,
            message: message.into(),
        }
    }

    pub fn build_submit(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::BuildSubmit {
            ctx,
            message: message.into(),
        }
    }

    pub fn module_metadata(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::ModuleMetadata {
            ctx,
            message: message.into(),
        }
    }

    pub fn unsupported(ctx: ErrorContext, message: impl Into<String>) -> Self {
        DistroBakerError::Unsupported {
            ctx,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DistroBakerError>;
