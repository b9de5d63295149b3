//! Request journal collaborator.
//!
//! The host persists opened requests and the responses sent for them.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ResponseCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    Write(String),
}

/// HTTP-level facts about an inbound request, as far as the host knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestInfo {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// An authenticated, decoded request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub partner: String,
    pub partner_id: i64,
    pub user_id: i64,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub http: HttpRequestInfo,
    pub body: serde_json::Value,
}

/// The status returned for a journaled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub request_id: Uuid,
    pub partner: String,
    pub code: ResponseCode,
    pub detail: String,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait RequestJournal: Send + Sync {
    async fn save_request(&self, record: &RequestRecord) -> Result<(), JournalError>;
    async fn save_response(&self, record: &ResponseRecord) -> Result<(), JournalError>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopJournal;

#[async_trait]
impl RequestJournal for NoopJournal {
    async fn save_request(&self, _record: &RequestRecord) -> Result<(), JournalError> {
        Ok(())
    }

    async fn save_response(&self, _record: &ResponseRecord) -> Result<(), JournalError> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    requests: Mutex<Vec<RequestRecord>>,
    responses: Mutex<Vec<ResponseRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn responses(&self) -> Vec<ResponseRecord> {
        self.responses
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RequestJournal for MemoryJournal {
    async fn save_request(&self, record: &RequestRecord) -> Result<(), JournalError> {
        self.requests
            .lock()
            .map_err(|_| JournalError::Write("request journal poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    async fn save_response(&self, record: &ResponseRecord) -> Result<(), JournalError> {
        self.responses
            .lock()
            .map_err(|_| JournalError::Write("response journal poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}
