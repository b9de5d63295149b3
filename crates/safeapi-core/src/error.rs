//! Request-level error taxonomy and the public status codes it maps to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use safeapi_crypto::{EnvelopeError, KeyBlobError};

use crate::directory::DirectoryError;
use crate::journal::JournalError;

/// Status code reported to partners.
///
/// Cryptographic failures all collapse to `SecurityValidationFailed` so a
/// partner cannot tell a bad signature from a corrupt wrapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    Warning,
    SecurityValidationFailed,
    PermissionDenied,
    InvalidRequest,
    ServiceUnavailable,
    InternalError,
}

impl ResponseCode {
    /// Human-readable detail text.
    pub fn detail(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Warning => "completed with warnings",
            ResponseCode::SecurityValidationFailed => "security validation failed",
            ResponseCode::PermissionDenied => "permission denied",
            ResponseCode::InvalidRequest => "invalid request",
            ResponseCode::ServiceUnavailable => "service unavailable",
            ResponseCode::InternalError => "internal error",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ResponseCode::Ok | ResponseCode::Warning)
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.detail())
    }
}

/// Security-related errors for one request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("wrapped key could not be recovered")]
    EnvelopeCorrupt,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("payload decryption failed")]
    SymmetricDecrypt,

    #[error("payload does not match the expected request: {0}")]
    PayloadInvalid(String),

    #[error("unknown partner: {username}")]
    UnknownPartner { username: String },

    #[error("no public key on file for partner {username}")]
    PartnerKeyMissing { username: String },

    #[error("partner directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("audit log error: {0}")]
    AuditError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SecurityError {
    /// The code a partner sees for this error.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            SecurityError::MalformedKey(_)
            | SecurityError::KeyUnavailable(_)
            | SecurityError::EnvelopeCorrupt
            | SecurityError::SignatureInvalid
            | SecurityError::SymmetricDecrypt => ResponseCode::SecurityValidationFailed,
            SecurityError::PayloadInvalid(_) => ResponseCode::InvalidRequest,
            SecurityError::UnknownPartner { .. } | SecurityError::PartnerKeyMissing { .. } => {
                ResponseCode::PermissionDenied
            }
            SecurityError::DirectoryUnavailable(_) => ResponseCode::ServiceUnavailable,
            SecurityError::Journal(_)
            | SecurityError::AuditError(_)
            | SecurityError::Internal(_) => ResponseCode::InternalError,
        }
    }

    /// Authentication failures that are worth a security log line.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            SecurityError::EnvelopeCorrupt
                | SecurityError::SignatureInvalid
                | SecurityError::SymmetricDecrypt
        )
    }
}

impl From<KeyBlobError> for SecurityError {
    fn from(e: KeyBlobError) -> Self {
        SecurityError::MalformedKey(e.to_string())
    }
}

impl From<EnvelopeError> for SecurityError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::KeyUnavailable(half) => SecurityError::KeyUnavailable(half.to_string()),
            EnvelopeError::EnvelopeCorrupt => SecurityError::EnvelopeCorrupt,
            EnvelopeError::SignatureInvalid => SecurityError::SignatureInvalid,
            EnvelopeError::SymmetricDecrypt => SecurityError::SymmetricDecrypt,
            EnvelopeError::MessageTooLong { .. }
            | EnvelopeError::SessionKey(_)
            | EnvelopeError::EncryptFailed
            | EnvelopeError::SigningFailed => SecurityError::Internal(e.to_string()),
        }
    }
}

impl From<DirectoryError> for SecurityError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::UnknownPartner(username) => SecurityError::UnknownPartner { username },
            DirectoryError::MissingPublicKey(username) => {
                SecurityError::PartnerKeyMissing { username }
            }
            DirectoryError::MalformedKey { source, .. } => source.into(),
            DirectoryError::Unavailable(reason) => SecurityError::DirectoryUnavailable(reason),
        }
    }
}

impl From<JournalError> for SecurityError {
    fn from(e: JournalError) -> Self {
        SecurityError::Journal(e.to_string())
    }
}
