//! RSA sign/verify/encrypt/decrypt with PKCS#1 v1.5 padding.
//!
//! Key material is carried together with the digest used for signatures,
//! so a partner on the legacy SHA-1 scheme and one on SHA-256 can be
//! served by the same code path.

use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::hash::DigestMode;
use crate::keyblob::{parse_private_key, parse_public_key, KeyBlobError};

/// PKCS#1 v1.5 encryption padding overhead in bytes.
pub const PKCS1_V15_OVERHEAD: usize = 11;

/// Which half of a key pair an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHalf {
    Private,
    Public,
}

impl std::fmt::Display for KeyHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyHalf::Private => write!(f, "private"),
            KeyHalf::Public => write!(f, "public"),
        }
    }
}

/// Error type for RSA operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AsymmetricError {
    #[error("{0} key not available")]
    KeyUnavailable(KeyHalf),
    #[error("message of {len} bytes exceeds key capacity of {max} bytes")]
    MessageTooLong { len: usize, max: usize },
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("signing failed")]
    SigningFailed,
}

/// Parsed RSA key material. Never mutated after construction.
///
/// `PrivateOnly` deliberately does not expose its embedded public
/// components: operations needing the public half require `PublicOnly`
/// or `KeyPair`.
#[derive(Clone)]
pub enum KeyMaterial {
    PublicOnly(RsaPublicKey),
    PrivateOnly(RsaPrivateKey),
    KeyPair {
        private: RsaPrivateKey,
        public: RsaPublicKey,
    },
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            KeyMaterial::PublicOnly(_) => "PublicOnly",
            KeyMaterial::PrivateOnly(_) => "PrivateOnly",
            KeyMaterial::KeyPair { .. } => "KeyPair",
        };
        f.debug_struct("KeyMaterial")
            .field("kind", &kind)
            .field("modulus_bits", &(self.modulus_len() * 8))
            .finish()
    }
}

impl KeyMaterial {
    /// Combine a private-only and a public-only value into a key pair.
    pub fn pair(private: KeyMaterial, public: KeyMaterial) -> Result<Self, KeyBlobError> {
        let private = match private {
            KeyMaterial::PrivateOnly(k) | KeyMaterial::KeyPair { private: k, .. } => k,
            KeyMaterial::PublicOnly(_) => return Err(KeyBlobError::KeyPairMismatch),
        };
        let public = match public {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => k,
            KeyMaterial::PrivateOnly(_) => return Err(KeyBlobError::KeyPairMismatch),
        };
        if private.n() != public.n() || private.e() != public.e() {
            return Err(KeyBlobError::KeyPairMismatch);
        }
        Ok(KeyMaterial::KeyPair { private, public })
    }

    /// Public-only material derived from whatever this value holds.
    pub fn public_half(&self) -> KeyMaterial {
        match self {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => {
                KeyMaterial::PublicOnly(k.clone())
            }
            KeyMaterial::PrivateOnly(k) => KeyMaterial::PublicOnly(k.to_public_key()),
        }
    }

    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        match self {
            KeyMaterial::PrivateOnly(k) | KeyMaterial::KeyPair { private: k, .. } => Some(k),
            KeyMaterial::PublicOnly(_) => None,
        }
    }

    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        match self {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => Some(k),
            KeyMaterial::PrivateOnly(_) => None,
        }
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        match self {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => k.size(),
            KeyMaterial::PrivateOnly(k) => k.size(),
        }
    }

    /// Big-endian modulus bytes.
    pub fn modulus(&self) -> Vec<u8> {
        match self {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => {
                k.n().to_bytes_be()
            }
            KeyMaterial::PrivateOnly(k) => k.n().to_bytes_be(),
        }
    }

    /// Big-endian public exponent bytes.
    pub fn exponent(&self) -> Vec<u8> {
        match self {
            KeyMaterial::PublicOnly(k) | KeyMaterial::KeyPair { public: k, .. } => {
                k.e().to_bytes_be()
            }
            KeyMaterial::PrivateOnly(k) => k.e().to_bytes_be(),
        }
    }
}

/// RSA key material plus the digest used for signatures.
#[derive(Debug, Clone)]
pub struct RsaKey {
    material: KeyMaterial,
    digest: DigestMode,
}

impl RsaKey {
    pub fn new(material: KeyMaterial, digest: DigestMode) -> Self {
        Self { material, digest }
    }

    /// Private-only key from a base64 PKCS#1 blob.
    pub fn from_private_blob(blob: &str, digest: DigestMode) -> Result<Self, KeyBlobError> {
        Ok(Self::new(parse_private_key(blob)?, digest))
    }

    /// Public-only key from a base64 SubjectPublicKeyInfo blob.
    pub fn from_public_blob(blob: &str, digest: DigestMode) -> Result<Self, KeyBlobError> {
        Ok(Self::new(parse_public_key(blob)?, digest))
    }

    /// Full key pair from both blobs; the halves must match.
    pub fn from_blobs(
        private_blob: &str,
        public_blob: &str,
        digest: DigestMode,
    ) -> Result<Self, KeyBlobError> {
        let material =
            KeyMaterial::pair(parse_private_key(private_blob)?, parse_public_key(public_blob)?)?;
        Ok(Self::new(material, digest))
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn digest(&self) -> DigestMode {
        self.digest
    }

    /// The public half, keeping the digest mode.
    pub fn public_only(&self) -> RsaKey {
        Self::new(self.material.public_half(), self.digest)
    }

    /// Largest plaintext `encrypt` accepts.
    pub fn max_plaintext_len(&self) -> usize {
        self.material
            .modulus_len()
            .saturating_sub(PKCS1_V15_OVERHEAD)
    }

    fn private(&self) -> Result<&RsaPrivateKey, AsymmetricError> {
        self.material
            .private_key()
            .ok_or(AsymmetricError::KeyUnavailable(KeyHalf::Private))
    }

    fn public(&self) -> Result<&RsaPublicKey, AsymmetricError> {
        self.material
            .public_key()
            .ok_or(AsymmetricError::KeyUnavailable(KeyHalf::Public))
    }

    /// Hash `data` with the configured digest and sign it (PKCS#1 v1.5).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AsymmetricError> {
        let key = self.private()?;
        let hashed = self.digest.hash(data);
        key.sign_with_rng(&mut OsRng, self.digest.pkcs1v15_scheme(), &hashed)
            .map_err(|_| AsymmetricError::SigningFailed)
    }

    /// Check a PKCS#1 v1.5 signature. A mismatch is `Ok(false)`, never an error.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, AsymmetricError> {
        let key = self.public()?;
        let hashed = self.digest.hash(data);
        Ok(key
            .verify(self.digest.pkcs1v15_scheme(), &hashed, signature)
            .is_ok())
    }

    /// PKCS#1 v1.5 encryption under the public key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AsymmetricError> {
        let key = self.public()?;
        let max = self.max_plaintext_len();
        if plaintext.len() > max {
            return Err(AsymmetricError::MessageTooLong {
                len: plaintext.len(),
                max,
            });
        }
        key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|_| AsymmetricError::EncryptionFailed)
    }

    /// PKCS#1 v1.5 decryption under the private key.
    ///
    /// Blinded. Every failure collapses into `DecryptionFailed` so callers
    /// cannot tell which padding check tripped.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, AsymmetricError> {
        let key = self.private()?;
        key.decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| AsymmetricError::DecryptionFailed)
    }
}
