//! Fixed RSA fixtures for tests.
//!
//! Three 2048-bit pairs ("server", "partner", "stranger") and one 512-bit
//! pair ("tiny") whose capacity is too small to carry a session key.
//! Private blobs are PKCS#1 DER, public blobs SubjectPublicKeyInfo DER,
//! both base64.

use crate::asymmetric::RsaKey;
use crate::hash::DigestMode;

pub const SERVER_PRIVATE: &str = include_str!("../testdata/server.key.b64");
pub const SERVER_PUBLIC: &str = include_str!("../testdata/server.pub.b64");
pub const PARTNER_PRIVATE: &str = include_str!("../testdata/partner.key.b64");
pub const PARTNER_PUBLIC: &str = include_str!("../testdata/partner.pub.b64");
pub const STRANGER_PRIVATE: &str = include_str!("../testdata/stranger.key.b64");
pub const STRANGER_PUBLIC: &str = include_str!("../testdata/stranger.pub.b64");
pub const TINY_PRIVATE: &str = include_str!("../testdata/tiny.key.b64");
/// Uses a short-form outer length, so `parse_public_key` rejects it.
pub const TINY_PUBLIC: &str = include_str!("../testdata/tiny.pub.b64");

fn pair(private: &str, public: &str, digest: DigestMode) -> RsaKey {
    match RsaKey::from_blobs(private, public, digest) {
        Ok(key) => key,
        Err(e) => panic!("fixture key pair failed to parse: {e}"),
    }
}

fn public(blob: &str, digest: DigestMode) -> RsaKey {
    match RsaKey::from_public_blob(blob, digest) {
        Ok(key) => key,
        Err(e) => panic!("fixture public key failed to parse: {e}"),
    }
}

pub fn server_pair(digest: DigestMode) -> RsaKey {
    pair(SERVER_PRIVATE, SERVER_PUBLIC, digest)
}

pub fn server_public(digest: DigestMode) -> RsaKey {
    public(SERVER_PUBLIC, digest)
}

pub fn partner_pair(digest: DigestMode) -> RsaKey {
    pair(PARTNER_PRIVATE, PARTNER_PUBLIC, digest)
}

pub fn partner_public(digest: DigestMode) -> RsaKey {
    public(PARTNER_PUBLIC, digest)
}

pub fn stranger_pair(digest: DigestMode) -> RsaKey {
    pair(STRANGER_PRIVATE, STRANGER_PUBLIC, digest)
}

pub fn stranger_public(digest: DigestMode) -> RsaKey {
    public(STRANGER_PUBLIC, digest)
}

/// Public half of the 512-bit key, derived from its private blob.
pub fn tiny_public(digest: DigestMode) -> RsaKey {
    match RsaKey::from_private_blob(TINY_PRIVATE, digest) {
        Ok(key) => key.public_only(),
        Err(e) => panic!("fixture private key failed to parse: {e}"),
    }
}
