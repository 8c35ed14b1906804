//! Typed error hierarchy for the grading service.
//!
//! Three top-level enums cover the three places errors surface:
//! - `WebhookError`: synchronous rejections returned to the webhook caller
//! - `GradeError`: background pipeline failures, only ever logged
//! - `ConfigError`: startup validation failures

use std::path::PathBuf;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use grader_common::ReportError;
use thiserror::Error;

/// Errors that reject an inbound webhook before any work is scheduled.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("{repo} is not allowed")]
    RepositoryNotAllowed { repo: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl WebhookError {
    /// Missing signature and malformed payloads are client errors (400),
    /// a bad signature is 401 and a repository outside the allow-list is 403.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::RepositoryNotAllowed { .. } => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Pipeline stage a failure belongs to, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Verified,
    Authorized,
    Fetched,
    Executed,
    Parsed,
    Cleaned,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Verified => "verified",
            Stage::Authorized => "authorized",
            Stage::Fetched => "fetched",
            Stage::Executed => "executed",
            Stage::Parsed => "parsed",
            Stage::Cleaned => "cleaned",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of a background grading run.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("fetching {url} timed out after {seconds}s")]
    FetchTimedOut { url: String, seconds: u64 },

    #[error("failed to start sandbox runtime '{runtime}': {source}")]
    SandboxUnavailable {
        runtime: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox {container} exited with code {code:?}: {stderr}")]
    Execution {
        container: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("sandbox {container} exceeded time limit ({seconds}s)")]
    SandboxTimedOut { container: String, seconds: u64 },

    #[error("sandbox {container} was killed for exceeding its resource limits (memory {memory})")]
    ResourceExhausted { container: String, memory: String },

    #[error("sandbox finished without writing a grade report at {path}")]
    MissingReport { path: PathBuf },

    #[error("grade report at {path} is not valid: {source}")]
    InvalidReport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("run cancelled by shutdown during the {stage} stage")]
    Cancelled { stage: Stage },

    #[error("failed to clean up {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GradeError {
    /// Short machine-readable failure kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GradeError::Workspace { .. } | GradeError::Fetch { .. } | GradeError::FetchTimedOut { .. } => {
                "fetch"
            }
            GradeError::SandboxUnavailable { .. } | GradeError::Execution { .. } => "execution",
            GradeError::SandboxTimedOut { .. } => "timeout",
            GradeError::ResourceExhausted { .. } => "resource_limit",
            GradeError::MissingReport { .. } => "missing_report",
            GradeError::InvalidReport { .. } => "invalid_report",
            GradeError::Cancelled { .. } => "cancelled",
            GradeError::Cleanup { .. } => "cleanup",
        }
    }

    /// The stage that failed to complete.
    pub fn stage(&self) -> Stage {
        match self {
            GradeError::Workspace { .. } | GradeError::Fetch { .. } | GradeError::FetchTimedOut { .. } => {
                Stage::Fetched
            }
            GradeError::SandboxUnavailable { .. }
            | GradeError::Execution { .. }
            | GradeError::SandboxTimedOut { .. }
            | GradeError::ResourceExhausted { .. } => Stage::Executed,
            GradeError::MissingReport { .. } | GradeError::InvalidReport { .. } => Stage::Parsed,
            GradeError::Cancelled { stage } => *stage,
            GradeError::Cleanup { .. } => Stage::Cleaned,
        }
    }
}

impl From<ReportError> for GradeError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Missing { path } => GradeError::MissingReport { path },
            ReportError::Invalid { path, source } => GradeError::InvalidReport { path, source },
            ReportError::Io { path, source } => GradeError::Workspace { path, source },
        }
    }
}

/// Startup configuration failures. The server refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("webhook secret must not be empty (set GRADER_SECRET)")]
    EmptySecret,

    #[error("webhook secret is not a usable HMAC key")]
    InvalidSecret,

    #[error("repository allow-list must not be empty (set GRADER_ALLOWED_REPOS)")]
    EmptyAllowList,

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
