//! API request and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::Message;
use crate::session::{Session, Trace};

/// Body of `POST /api/sessions/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

/// Body of `PUT /api/sessions/{id}/credential`.
#[derive(Clone, Deserialize)]
pub struct CredentialRequest {
    /// Blank clears the stored key.
    #[serde(default)]
    pub api_key: String,
}

// Keep the key out of logs.
impl std::fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Everything the page needs to replay a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub messages: Vec<Message>,
    /// Keyed by the ordinal of the assistant message they belong to.
    pub traces: BTreeMap<u64, Trace>,
    pub has_api_key: bool,
}

impl SessionSnapshot {
    pub fn new(session: &Session, has_api_key: bool) -> Self {
        Self {
            id: session.id,
            messages: session.history().all().to_vec(),
            traces: session.traces().clone(),
            has_api_key,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
