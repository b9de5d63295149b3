#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::envelope::{open_envelope, seal_envelope};
    use crate::hash::DigestMode;
    use crate::keyblob::{decode_private_key, decode_public_key};
    use crate::session_crypto::SessionKey;
    use crate::test_keys;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        // Envelope round trip in both directions.
        #[test]
        fn test_envelope_round_trip(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            server_sends in any::<bool>(),
            legacy in any::<bool>()
        ) {
            let digest = if legacy { DigestMode::Sha1 } else { DigestMode::Sha256 };
            let server = test_keys::server_pair(digest);
            let partner = test_keys::partner_pair(digest);
            let (a, b) = if server_sends { (&server, &partner) } else { (&partner, &server) };

            let env = seal_envelope(&payload, a, &b.public_only()).unwrap();
            let opened = open_envelope(&env, b, &a.public_only()).unwrap();
            prop_assert_eq!(opened, payload);
        }

        // Any single flipped signature bit fails authentication.
        #[test]
        fn test_signature_bit_flip(byte in 0usize..256, bit in 0u8..8) {
            use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

            let server = test_keys::server_pair(DigestMode::Sha256);
            let partner = test_keys::partner_pair(DigestMode::Sha256);
            let mut env = seal_envelope(b"{\"ping\":1}", &server, &partner.public_only()).unwrap();

            let mut sig = BASE64.decode(&env.signature).unwrap();
            sig[byte] ^= 1 << bit;
            env.signature = BASE64.encode(sig);

            prop_assert_eq!(
                open_envelope(&env, &partner, &server.public_only()).unwrap_err(),
                crate::envelope::EnvelopeError::SignatureInvalid
            );
        }
    }

    proptest! {
        #[test]
        fn test_session_key_round_trip(plaintext in any::<Vec<u8>>()) {
            let key = SessionKey::generate().unwrap();
            let restored = SessionKey::deserialize(&key.serialize().unwrap()).unwrap();
            let ct = key.encrypt(&plaintext).unwrap();
            prop_assert_eq!(ct.len() % 8, 0);
            prop_assert_eq!(restored.decrypt(&ct).unwrap(), plaintext);
        }

        // The key decoders reject arbitrary input without panicking.
        #[test]
        fn test_decoders_never_panic(bytes in any::<Vec<u8>>()) {
            let _ = decode_private_key(&bytes);
            let _ = decode_public_key(&bytes);
        }

        #[test]
        fn test_decoders_never_panic_on_sequence_prefix(
            marker in prop_oneof![Just(0x81u8), Just(0x82u8)],
            tail in proptest::collection::vec(any::<u8>(), 0..64)
        ) {
            let mut bytes = vec![0x30, marker];
            bytes.extend_from_slice(&tail);
            let _ = decode_private_key(&bytes);
            let _ = decode_public_key(&bytes);
        }
    }
}
