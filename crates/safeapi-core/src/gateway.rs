//! Gateway orchestration for partner requests.
//!
//! Resolves the partner, opens the inbound envelope, decodes the body and
//! journals it; seals outbound bodies and reports status in the response
//! wire shape partners expect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use safeapi_crypto::{open_envelope, seal_envelope, Envelope, EnvelopeError, RsaKey};

use crate::audit::{AuditLogger, FileAuditLogWriter, SecurityEvent};
use crate::config::{ConfigError, GatewayConfig};
use crate::directory::{PartnerIdentity, PartnerKeyDirectory, PartnerSource};
use crate::error::{ResponseCode, SecurityError};
use crate::journal::{HttpRequestInfo, RequestJournal, RequestRecord, ResponseRecord};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    #[serde(rename = "Code")]
    pub code: ResponseCode,
    #[serde(rename = "Detail")]
    pub detail: String,
}

impl From<ResponseCode> for ResponseStatus {
    fn from(code: ResponseCode) -> Self {
        Self {
            code,
            detail: code.detail().to_string(),
        }
    }
}

/// `{"Data": <Envelope>|null, "Status": {"Code": ..., "Detail": ...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeResponse {
    #[serde(rename = "Data")]
    pub data: Option<Envelope>,
    #[serde(rename = "Status")]
    pub status: ResponseStatus,
}

impl SafeResponse {
    pub fn ok(envelope: Envelope) -> Self {
        Self {
            data: Some(envelope),
            status: ResponseCode::Ok.into(),
        }
    }

    pub fn status(code: ResponseCode) -> Self {
        Self {
            data: None,
            status: code.into(),
        }
    }

    /// Public form of an error; only the mapped code is exposed.
    pub fn failure(error: &SecurityError) -> Self {
        Self::status(error.response_code())
    }
}

/// Body of the "check" probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckProbe {
    #[serde(rename = "Data", default)]
    pub data: Option<String>,
    /// Base64 SubjectPublicKeyInfo to seal to; the gateway's own key when absent.
    #[serde(rename = "PublicKey", default)]
    pub public_key: Option<String>,
}

/// An authenticated request ready for business processing.
#[derive(Debug, Clone)]
pub struct OpenedRequest<T> {
    pub request_id: Uuid,
    pub partner: Arc<PartnerIdentity>,
    pub received_at: DateTime<Utc>,
    pub body: T,
}

// ============================================================================
// Gateway Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Envelopes opened and journaled
    pub opened: AtomicU64,
    /// Response envelopes sealed
    pub sealed: AtomicU64,
    pub signature_failures: AtomicU64,
    /// Wrapped key or payload could not be decrypted
    pub decryption_failures: AtomicU64,
    pub lookup_failures: AtomicU64,
    pub payload_failures: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            sealed: self.sealed.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            payload_failures: self.payload_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.opened.store(0, Ordering::Relaxed);
        self.sealed.store(0, Ordering::Relaxed);
        self.signature_failures.store(0, Ordering::Relaxed);
        self.decryption_failures.store(0, Ordering::Relaxed);
        self.lookup_failures.store(0, Ordering::Relaxed);
        self.payload_failures.store(0, Ordering::Relaxed);
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStatsSnapshot {
    pub opened: u64,
    pub sealed: u64,
    pub signature_failures: u64,
    pub decryption_failures: u64,
    pub lookup_failures: u64,
    pub payload_failures: u64,
}

// ============================================================================
// Gateway
// ============================================================================

pub struct SafeGateway {
    local_key: RsaKey,
    directory: Arc<PartnerKeyDirectory>,
    journal: Arc<dyn RequestJournal>,
    audit: Option<Arc<AuditLogger>>,
    stats: Arc<GatewayStats>,
}

impl SafeGateway {
    /// `local_key` must hold both halves: the private half opens requests
    /// and signs responses, the public half serves the check probe.
    pub fn new(
        local_key: RsaKey,
        directory: Arc<PartnerKeyDirectory>,
        journal: Arc<dyn RequestJournal>,
    ) -> Self {
        Self {
            local_key,
            directory,
            journal,
            audit: None,
            stats: Arc::new(GatewayStats::new()),
        }
    }

    /// Build a gateway from validated configuration.
    ///
    /// Applies the local key pair, the partner cache TTL, the default
    /// partner digest and, when `audit.log_path` is set, a JSON-lines audit
    /// log signed with the local key.
    pub fn from_config(
        config: &GatewayConfig,
        source: Arc<dyn PartnerSource>,
        journal: Arc<dyn RequestJournal>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let local_key = config.local_key()?;
        let directory = PartnerKeyDirectory::with_ttl(source, config.partner_cache_ttl())
            .with_default_digest(config.digest()?);

        let audit = config.audit.log_path.as_ref().map(|path| {
            let writer = FileAuditLogWriter::new(path.clone());
            Arc::new(AuditLogger::new(&local_key, Box::new(writer)))
        });

        let mut gateway = Self::new(local_key, Arc::new(directory), journal);
        gateway.audit = audit;
        debug!(
            ttl_seconds = config.directory.cache_ttl_seconds,
            audit = gateway.audit.is_some(),
            "gateway configured"
        );
        Ok(gateway)
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    pub fn directory(&self) -> &Arc<PartnerKeyDirectory> {
        &self.directory
    }

    fn audit(&self, event: SecurityEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(event) {
                warn!(error = %e, "audit log write failed");
            }
        }
    }

    /// Authenticate and decode an inbound envelope from `username`.
    ///
    /// The request is journaled before it is returned; a journal failure
    /// fails the request.
    pub async fn open_request<T>(
        &self,
        username: &str,
        envelope: &Envelope,
    ) -> Result<OpenedRequest<T>, SecurityError>
    where
        T: DeserializeOwned,
    {
        self.open_request_with(username, envelope, HttpRequestInfo::default())
            .await
    }

    /// [`open_request`](Self::open_request), journaling `http` alongside the body.
    pub async fn open_request_with<T>(
        &self,
        username: &str,
        envelope: &Envelope,
        http: HttpRequestInfo,
    ) -> Result<OpenedRequest<T>, SecurityError>
    where
        T: DeserializeOwned,
    {
        let partner = self.directory.lookup(username).await.map_err(|e| {
            warn!(partner = %username, error = %e, "partner lookup failed");
            GatewayStats::inc(&self.stats.lookup_failures);
            self.audit(SecurityEvent::PartnerLookupFailed {
                partner: username.to_string(),
                reason: e.to_string(),
            });
            SecurityError::from(e)
        })?;

        let plaintext = Zeroizing::new(
            open_envelope(envelope, &self.local_key, &partner.key).map_err(|e| {
                match &e {
                    EnvelopeError::SignatureInvalid => {
                        warn!(partner = %username, "signature verification failed");
                        GatewayStats::inc(&self.stats.signature_failures);
                        self.audit(SecurityEvent::SignatureRejected {
                            partner: username.to_string(),
                        });
                    }
                    EnvelopeError::EnvelopeCorrupt | EnvelopeError::SymmetricDecrypt => {
                        warn!(partner = %username, error = %e, "envelope decryption failed");
                        GatewayStats::inc(&self.stats.decryption_failures);
                        self.audit(SecurityEvent::EnvelopeCorrupt {
                            partner: username.to_string(),
                        });
                    }
                    _ => {
                        warn!(partner = %username, error = %e, "envelope rejected");
                    }
                }
                SecurityError::from(e)
            })?,
        );

        let (value, body) = decode_body::<T>(&plaintext).map_err(|reason| {
            warn!(partner = %username, reason = %reason, "payload rejected");
            GatewayStats::inc(&self.stats.payload_failures);
            self.audit(SecurityEvent::PayloadRejected {
                partner: username.to_string(),
                reason: reason.clone(),
            });
            SecurityError::PayloadInvalid(reason)
        })?;

        let opened = OpenedRequest {
            request_id: Uuid::new_v4(),
            partner,
            received_at: Utc::now(),
            body,
        };

        self.journal
            .save_request(&RequestRecord {
                request_id: opened.request_id,
                partner: opened.partner.username.clone(),
                partner_id: opened.partner.partner_id,
                user_id: opened.partner.id,
                received_at: opened.received_at,
                http,
                body: value,
            })
            .await?;

        GatewayStats::inc(&self.stats.opened);
        debug!(partner = %username, request_id = %opened.request_id, "envelope opened");
        self.audit(SecurityEvent::EnvelopeOpened {
            partner: username.to_string(),
            request_id: opened.request_id.to_string(),
        });
        Ok(opened)
    }

    /// JSON-encode `body` and seal it for `partner`.
    pub fn seal_response<R>(
        &self,
        partner: &PartnerIdentity,
        body: &R,
    ) -> Result<Envelope, SecurityError>
    where
        R: Serialize + ?Sized,
    {
        let json = Zeroizing::new(
            serde_json::to_vec(body).map_err(|e| SecurityError::Internal(e.to_string()))?,
        );
        let envelope = seal_envelope(&json, &self.local_key, &partner.key)?;

        GatewayStats::inc(&self.stats.sealed);
        debug!(partner = %partner.username, "response sealed");
        self.audit(SecurityEvent::EnvelopeSealed {
            partner: partner.username.clone(),
        });
        Ok(envelope)
    }

    /// Build the response for an opened request and journal its status.
    ///
    /// Journal failures are logged and swallowed; the partner still gets
    /// the response.
    pub async fn respond<T, R>(
        &self,
        opened: &OpenedRequest<T>,
        outcome: Result<R, SecurityError>,
    ) -> SafeResponse
    where
        R: Serialize,
    {
        let response = match outcome.and_then(|body| self.seal_response(&opened.partner, &body)) {
            Ok(envelope) => SafeResponse::ok(envelope),
            Err(e) => {
                warn!(partner = %opened.partner.username, request_id = %opened.request_id, error = %e, "request failed");
                SafeResponse::failure(&e)
            }
        };
        self.journal_response(opened, response).await
    }

    /// Respond with a bare status (no body) and journal it.
    pub async fn respond_status<T>(
        &self,
        opened: &OpenedRequest<T>,
        code: ResponseCode,
    ) -> SafeResponse {
        self.journal_response(opened, SafeResponse::status(code)).await
    }

    async fn journal_response<T>(
        &self,
        opened: &OpenedRequest<T>,
        response: SafeResponse,
    ) -> SafeResponse {
        let record = ResponseRecord {
            request_id: opened.request_id,
            partner: opened.partner.username.clone(),
            code: response.status.code,
            detail: response.status.detail.clone(),
            sent_at: Utc::now(),
        };
        if let Err(e) = self.journal.save_response(&record).await {
            warn!(request_id = %opened.request_id, error = %e, "failed to journal response");
        }
        response
    }

    /// Connectivity probe.
    ///
    /// With data, the data is sealed to the supplied public key (or the
    /// gateway's own) so a partner can test its decryption path. Without
    /// data, an empty OK.
    pub fn check(&self, probe: &CheckProbe) -> SafeResponse {
        let data = match probe.data.as_deref() {
            Some(data) if !data.is_empty() => data,
            _ => return SafeResponse::status(ResponseCode::Ok),
        };

        let recipient = match probe.public_key.as_deref().map(str::trim) {
            Some(blob) if !blob.is_empty() => {
                match RsaKey::from_public_blob(blob, self.local_key.digest()) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(error = %e, "check probe carried a malformed public key");
                        return SafeResponse::failure(&e.into());
                    }
                }
            }
            _ => self.local_key.public_only(),
        };

        let sealed = serde_json::to_vec(data)
            .map_err(|e| SecurityError::Internal(e.to_string()))
            .and_then(|json| Ok(seal_envelope(&json, &self.local_key, &recipient)?));
        match sealed {
            Ok(envelope) => SafeResponse::ok(envelope),
            Err(e) => {
                warn!(error = %e, "check probe could not be sealed");
                SafeResponse::failure(&e)
            }
        }
    }
}

/// Decode a plaintext body as JSON, keeping the raw value for the journal.
fn decode_body<T: DeserializeOwned>(plaintext: &[u8]) -> Result<(serde_json::Value, T), String> {
    let value: serde_json::Value = serde_json::from_slice(plaintext).map_err(|e| e.to_string())?;
    let body = T::deserialize(&value).map_err(|e| e.to_string())?;
    Ok((value, body))
}

// ============================================================================
// Tests
// ============================================================================
