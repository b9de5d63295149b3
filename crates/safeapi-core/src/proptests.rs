//! Property-based tests for the gateway error surface and audit log.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use safeapi_crypto::{test_keys, DigestMode, EnvelopeError, KeyHalf};

    use crate::audit::{AuditLogger, MemoryAuditLogWriter, SecurityEvent};
    use crate::error::{ResponseCode, SecurityError};
    use crate::gateway::SafeResponse;

    fn crypto_error() -> impl Strategy<Value = EnvelopeError> {
        prop_oneof![
            Just(EnvelopeError::EnvelopeCorrupt),
            Just(EnvelopeError::SignatureInvalid),
            Just(EnvelopeError::SymmetricDecrypt),
            Just(EnvelopeError::KeyUnavailable(KeyHalf::Private)),
            Just(EnvelopeError::KeyUnavailable(KeyHalf::Public)),
        ]
    }

    fn response_code() -> impl Strategy<Value = ResponseCode> {
        prop_oneof![
            Just(ResponseCode::Ok),
            Just(ResponseCode::Warning),
            Just(ResponseCode::SecurityValidationFailed),
            Just(ResponseCode::PermissionDenied),
            Just(ResponseCode::InvalidRequest),
            Just(ResponseCode::ServiceUnavailable),
            Just(ResponseCode::InternalError),
        ]
    }

    // Opening failures are indistinguishable on the wire.
    proptest! {
        #[test]
        fn property_open_failures_collapse(err in crypto_error()) {
            let response = SafeResponse::failure(&SecurityError::from(err));
            prop_assert_eq!(response.status.code, ResponseCode::SecurityValidationFailed);
            prop_assert_eq!(response.status.detail, "security validation failed");
            prop_assert!(response.data.is_none());
        }
    }

    proptest! {
        #[test]
        fn property_response_status_round_trip(code in response_code()) {
            let json = serde_json::to_string(&SafeResponse::status(code)).unwrap();
            let back: SafeResponse = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.status.code, code);
            prop_assert_eq!(back.status.detail, code.detail());
        }
    }

    // Any change to a signed entry's details invalidates it.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn property_audit_tamper_detected(
            partner in "[a-z]{1,12}",
            reason in ".{0,40}",
            forged in ".{0,40}",
        ) {
            let writer = Arc::new(MemoryAuditLogWriter::new());
            let logger = AuditLogger::new(
                &test_keys::server_pair(DigestMode::Sha1),
                Box::new(writer.clone()),
            );
            logger
                .log(SecurityEvent::PayloadRejected {
                    partner: partner.clone(),
                    reason: reason.clone(),
                })
                .unwrap();

            let mut entries = writer.entries();
            prop_assert!(logger.verify_log(&entries).is_ok());

            if forged != reason {
                entries[0].details = serde_json::json!({
                    "PayloadRejected": { "partner": partner, "reason": forged }
                });
                prop_assert!(logger.verify_log(&entries).is_err());
            }
        }
    }
}
