//! Audit logging with RSA-signed entries.
//!
//! Each entry is signed with the local key (SHA-256, PKCS#1 v1.5) over its
//! JSON form with an empty signature field.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use safeapi_crypto::{DigestMode, RsaKey};

use crate::error::SecurityError;

/// Security event types for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Envelope authenticated and decoded
    EnvelopeOpened {
        partner: String,
        request_id: String,
    },
    /// Response envelope produced
    EnvelopeSealed {
        partner: String,
    },
    /// Signature over the session key did not verify
    SignatureRejected {
        partner: String,
    },
    /// Wrapped key or payload could not be decrypted
    EnvelopeCorrupt {
        partner: String,
    },
    /// Decrypted body did not match the request type
    PayloadRejected {
        partner: String,
        reason: String,
    },
    /// Partner could not be resolved
    PartnerLookupFailed {
        partner: String,
        reason: String,
    },
}

impl SecurityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SecurityEvent::EnvelopeOpened { .. } => "envelope_opened",
            SecurityEvent::EnvelopeSealed { .. } => "envelope_sealed",
            SecurityEvent::SignatureRejected { .. } => "signature_rejected",
            SecurityEvent::EnvelopeCorrupt { .. } => "envelope_corrupt",
            SecurityEvent::PayloadRejected { .. } => "payload_rejected",
            SecurityEvent::PartnerLookupFailed { .. } => "partner_lookup_failed",
        }
    }

    /// The partner the event concerns.
    pub fn actor(&self) -> Option<String> {
        match self {
            SecurityEvent::EnvelopeOpened { partner, .. }
            | SecurityEvent::EnvelopeSealed { partner }
            | SecurityEvent::SignatureRejected { partner }
            | SecurityEvent::EnvelopeCorrupt { partner }
            | SecurityEvent::PayloadRejected { partner, .. }
            | SecurityEvent::PartnerLookupFailed { partner, .. } => Some(partner.clone()),
        }
    }

    pub fn target(&self) -> Option<String> {
        match self {
            SecurityEvent::EnvelopeOpened { request_id, .. } => Some(request_id.clone()),
            _ => None,
        }
    }

    pub fn details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::json!({}))
    }
}

/// Audit log entry with signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub details: serde_json::Value,
    /// Base64 RSA signature.
    #[serde(default)]
    pub signature: String,
}

impl AuditEntry {
    /// Canonical bytes for signing: the entry with an empty signature.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut entry = self.clone();
        entry.signature = String::new();
        serde_json::to_vec(&entry).unwrap_or_else(|_| b"{}".to_vec())
    }
}

/// Trait for writing audit log entries.
pub trait AuditLogWriter: Send + Sync {
    fn write(&self, entry: &AuditEntry) -> Result<(), SecurityError>;
}

/// JSON-lines file writer.
pub struct FileAuditLogWriter {
    path: PathBuf,
}

impl FileAuditLogWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLogWriter for FileAuditLogWriter {
    fn write(&self, entry: &AuditEntry) -> Result<(), SecurityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SecurityError::AuditError(format!("Failed to create log directory: {}", e))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SecurityError::AuditError(format!("Failed to open log file: {}", e)))?;

        let entry_json = serde_json::to_string(entry)
            .map_err(|e| SecurityError::AuditError(format!("Failed to serialize entry: {}", e)))?;

        writeln!(file, "{}", entry_json)
            .map_err(|e| SecurityError::AuditError(format!("Failed to write entry: {}", e)))?;

        Ok(())
    }
}

/// Read back a JSON-lines audit log. Blank lines are skipped.
pub fn read_log(path: &Path) -> Result<Vec<AuditEntry>, SecurityError> {
    let file = std::fs::File::open(path)
        .map_err(|e| SecurityError::AuditError(format!("Failed to open log file: {}", e)))?;
    let mut entries = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.map_err(|e| SecurityError::AuditError(format!("Failed to read log: {}", e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            SecurityError::AuditError(format!("Malformed entry on line {}: {}", n + 1, e))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Keeps entries in memory.
#[derive(Default)]
pub struct MemoryAuditLogWriter {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditLogWriter for MemoryAuditLogWriter {
    fn write(&self, entry: &AuditEntry) -> Result<(), SecurityError> {
        self.entries
            .lock()
            .map_err(|_| SecurityError::AuditError("audit buffer poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }
}

impl<W: AuditLogWriter + ?Sized> AuditLogWriter for std::sync::Arc<W> {
    fn write(&self, entry: &AuditEntry) -> Result<(), SecurityError> {
        (**self).write(entry)
    }
}

/// Audit logger signing with the local RSA key.
pub struct AuditLogger {
    signing_key: RsaKey,
    log_writer: Box<dyn AuditLogWriter>,
}

impl AuditLogger {
    /// Entries are always signed with SHA-256, whatever digest `key` carries.
    pub fn new(key: &RsaKey, log_writer: Box<dyn AuditLogWriter>) -> Self {
        Self {
            signing_key: RsaKey::new(key.material().clone(), DigestMode::Sha256),
            log_writer,
        }
    }

    /// Sign and write a security event.
    pub fn log(&self, event: SecurityEvent) -> Result<AuditEntry, SecurityError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            actor: event.actor(),
            target: event.target(),
            details: event.details(),
            signature: String::new(),
        };

        let signature = self
            .signing_key
            .sign(&entry.to_canonical_bytes())
            .map_err(|e| SecurityError::AuditError(format!("Failed to sign entry: {}", e)))?;

        let signed_entry = AuditEntry {
            signature: BASE64.encode(signature),
            ..entry
        };

        self.log_writer.write(&signed_entry)?;
        Ok(signed_entry)
    }

    /// Verify audit log integrity with the public half of the signing key.
    pub fn verify_log(&self, entries: &[AuditEntry]) -> Result<(), SecurityError> {
        let verifying_key = self.signing_key.public_only();

        for entry in entries {
            let signature = BASE64.decode(entry.signature.as_bytes()).map_err(|_| {
                SecurityError::AuditError(format!("Entry {} has a malformed signature", entry.id))
            })?;

            let valid = verifying_key
                .verify(&entry.to_canonical_bytes(), &signature)
                .map_err(|e| SecurityError::AuditError(e.to_string()))?;
            if !valid {
                return Err(SecurityError::AuditError(format!(
                    "Signature verification failed for entry {}",
                    entry.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safeapi_crypto::test_keys;
    use std::sync::Arc;

    fn logger() -> (Arc<MemoryAuditLogWriter>, AuditLogger) {
        let writer = Arc::new(MemoryAuditLogWriter::new());
        let key = test_keys::server_pair(DigestMode::Sha1);
        let logger = AuditLogger::new(&key, Box::new(writer.clone()));
        (writer, logger)
    }

    #[test]
    fn test_audit_logging_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("audit").join("safeapi.jsonl");

        let writer = Box::new(FileAuditLogWriter::new(log_path.clone()));
        let logger = AuditLogger::new(&test_keys::server_pair(DigestMode::Sha256), writer);

        logger
            .log(SecurityEvent::SignatureRejected {
                partner: "acme".to_string(),
            })
            .unwrap();
        logger
            .log(SecurityEvent::EnvelopeSealed {
                partner: "acme".to_string(),
            })
            .unwrap();

        let entries = read_log(&log_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "signature_rejected");
        assert!(logger.verify_log(&entries).is_ok());
    }

    #[test]
    fn test_audit_verification() {
        let (writer, logger) = logger();
        let written = logger
            .log(SecurityEvent::EnvelopeOpened {
                partner: "acme".to_string(),
                request_id: "req-1".to_string(),
            })
            .unwrap();

        let entries = writer.entries();
        assert_eq!(entries, vec![written]);
        assert_eq!(entries[0].actor.as_deref(), Some("acme"));
        assert_eq!(entries[0].target.as_deref(), Some("req-1"));
        assert!(logger.verify_log(&entries).is_ok());
    }

    #[test]
    fn test_tampered_entry_fails_verification() {
        let (writer, logger) = logger();
        logger
            .log(SecurityEvent::PayloadRejected {
                partner: "acme".to_string(),
                reason: "missing field".to_string(),
            })
            .unwrap();

        let mut entries = writer.entries();
        entries[0].actor = Some("globex".to_string());
        assert!(matches!(
            logger.verify_log(&entries),
            Err(SecurityError::AuditError(_))
        ));
    }

    #[test]
    fn test_entry_signed_by_other_key_fails() {
        let (_, logger) = logger();
        let other = AuditLogger::new(
            &test_keys::stranger_pair(DigestMode::Sha256),
            Box::new(MemoryAuditLogWriter::new()),
        );
        let entry = other
            .log(SecurityEvent::EnvelopeCorrupt {
                partner: "acme".to_string(),
            })
            .unwrap();

        assert!(logger.verify_log(&[entry]).is_err());
    }

    #[test]
    fn test_public_only_key_cannot_sign() {
        let logger = AuditLogger::new(
            &test_keys::server_public(DigestMode::Sha256),
            Box::new(MemoryAuditLogWriter::new()),
        );
        assert!(matches!(
            logger.log(SecurityEvent::EnvelopeSealed {
                partner: "acme".to_string()
            }),
            Err(SecurityError::AuditError(_))
        ));
    }

    #[test]
    fn test_event_metadata() {
        let event = SecurityEvent::PartnerLookupFailed {
            partner: "ghost".to_string(),
            reason: "unknown partner".to_string(),
        };
        assert_eq!(event.event_type(), "partner_lookup_failed");
        assert_eq!(event.actor().as_deref(), Some("ghost"));
        assert_eq!(event.target(), None);
        assert_eq!(
            event.details()["PartnerLookupFailed"]["reason"],
            "unknown partner"
        );
    }
}
