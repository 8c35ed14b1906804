//! Inbound webhook deliveries and the push payload parsed from them.

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::Deserialize;

use super::signature::SIGNATURE_HEADER;
use crate::errors::WebhookError;

/// Header naming the delivery's event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Number of commit-hash characters used in workspace names.
pub const SHORT_COMMIT_LEN: usize = 8;

/// Accepted lengths of a full commit hash (SHA-1, SHA-256).
const FULL_COMMIT_LENS: [usize; 2] = [40, 64];

/// One webhook delivery, exactly as received.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    event_type: Option<String>,
    body: Bytes,
    headers: HeaderMap,
}

impl InboundEvent {
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        let event_type = headers
            .get(EVENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string());
        Self {
            event_type,
            body,
            headers,
        }
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn is_push(&self) -> bool {
        self.event_type() == Some("push")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signature(&self) -> Option<&str> {
        self.headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
    }
}

#[derive(Deserialize)]
struct PushPayload {
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Deserialize)]
struct RepositoryPayload {
    full_name: String,
    clone_url: String,
    owner: OwnerPayload,
}

#[derive(Deserialize)]
struct OwnerPayload {
    login: String,
}

/// The fields of a push delivery the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub repository: String,
    pub owner: String,
    pub clone_url: String,
    pub commit: String,
    /// The push removed a branch; there is no tree to grade.
    pub deleted: bool,
}

impl PushNotification {
    /// Parse a push body. The owner and commit end up in a filesystem path,
    /// so both are checked for characters that could escape it.
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let payload: PushPayload =
            serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let owner = payload.repository.owner.login.trim().to_string();
        if owner.is_empty()
            || !owner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(WebhookError::InvalidPayload(format!(
                "invalid owner login '{}'",
                owner
            )));
        }

        let commit = payload.after.trim().to_ascii_lowercase();
        if !FULL_COMMIT_LENS.contains(&commit.len()) || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WebhookError::InvalidPayload(format!(
                "invalid commit hash '{}'",
                payload.after
            )));
        }

        let clone_url = payload.repository.clone_url.trim().to_string();
        if clone_url.is_empty() {
            return Err(WebhookError::InvalidPayload("empty clone_url".to_string()));
        }

        let deleted = payload.deleted || commit.chars().all(|c| c == '0');
        Ok(Self {
            repository: payload.repository.full_name,
            owner,
            clone_url,
            commit,
            deleted,
        })
    }

    pub fn short_commit(&self) -> &str {
        &self.commit[..SHORT_COMMIT_LEN]
    }
}
