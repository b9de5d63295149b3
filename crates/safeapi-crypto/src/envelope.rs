//! Hybrid RSA + triple-DES envelope.
//!
//! Seal: fresh session key, encrypt payload, wrap the serialized key for the
//! recipient, sign the serialized key with the sender key.
//!
//! Open: unwrap the key, verify the signature BEFORE touching the payload,
//! then decrypt. The signature covers the serialized session key only; the
//! payload ciphertext is not signed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::asymmetric::{AsymmetricError, KeyHalf, RsaKey};
use crate::session_crypto::{SessionCryptoError, SessionKey};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("{0} key not available")]
    KeyUnavailable(KeyHalf),
    #[error("session key text of {len} bytes exceeds recipient capacity of {max} bytes")]
    MessageTooLong { len: usize, max: usize },
    #[error("session key error: {0}")]
    SessionKey(SessionCryptoError),
    #[error("encryption failed")]
    EncryptFailed,
    #[error("signing failed")]
    SigningFailed,
    #[error("wrapped key could not be recovered")]
    EnvelopeCorrupt,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("payload decryption failed")]
    SymmetricDecrypt,
}

impl From<AsymmetricError> for EnvelopeError {
    fn from(e: AsymmetricError) -> Self {
        match e {
            AsymmetricError::KeyUnavailable(half) => EnvelopeError::KeyUnavailable(half),
            AsymmetricError::MessageTooLong { len, max } => {
                EnvelopeError::MessageTooLong { len, max }
            }
            AsymmetricError::EncryptionFailed => EnvelopeError::EncryptFailed,
            AsymmetricError::SigningFailed => EnvelopeError::SigningFailed,
            AsymmetricError::DecryptionFailed => EnvelopeError::EnvelopeCorrupt,
        }
    }
}

/// Wire form of a protected message body. All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Payload encrypted under the session key.
    #[serde(rename = "Data")]
    pub data: String,
    /// Signature over the serialized session key.
    #[serde(rename = "Signature")]
    pub signature: String,
    /// Serialized session key wrapped under the recipient public key.
    #[serde(rename = "Des")]
    pub des: String,
}

/// Seal `plaintext` for `recipient` (public half needed), signed by `sender`
/// (private half needed).
pub fn seal_envelope(
    plaintext: &[u8],
    sender: &RsaKey,
    recipient: &RsaKey,
) -> Result<Envelope, EnvelopeError> {
    let session = SessionKey::generate().map_err(EnvelopeError::SessionKey)?;
    let ciphertext = session.encrypt(plaintext).map_err(EnvelopeError::SessionKey)?;
    let key_text = session.serialize().map_err(EnvelopeError::SessionKey)?;

    let wrapped = recipient.encrypt(key_text.as_bytes())?;
    let signature = sender.sign(key_text.as_bytes())?;

    if cfg!(debug_assertions) && sender.material().public_key().is_some() {
        debug_assert_eq!(
            sender.verify(key_text.as_bytes(), &signature),
            Ok(true),
            "fresh signature failed self-verification"
        );
    }

    Ok(Envelope {
        data: BASE64.encode(ciphertext),
        signature: BASE64.encode(signature),
        des: BASE64.encode(wrapped),
    })
}

/// Open an envelope addressed to `recipient` (private half needed) and
/// authenticate it against `sender` (public half needed).
pub fn open_envelope(
    envelope: &Envelope,
    recipient: &RsaKey,
    sender: &RsaKey,
) -> Result<Vec<u8>, EnvelopeError> {
    let wrapped = BASE64
        .decode(envelope.des.as_bytes())
        .map_err(|_| EnvelopeError::EnvelopeCorrupt)?;
    let key_bytes = Zeroizing::new(recipient.decrypt(&wrapped)?);
    let key_text = std::str::from_utf8(&key_bytes).map_err(|_| EnvelopeError::EnvelopeCorrupt)?;

    let signature = BASE64
        .decode(envelope.signature.as_bytes())
        .map_err(|_| EnvelopeError::SignatureInvalid)?;
    if !sender.verify(key_text.as_bytes(), &signature)? {
        return Err(EnvelopeError::SignatureInvalid);
    }

    let session = SessionKey::deserialize(key_text).map_err(|_| EnvelopeError::EnvelopeCorrupt)?;
    let ciphertext = BASE64
        .decode(envelope.data.as_bytes())
        .map_err(|_| EnvelopeError::SymmetricDecrypt)?;
    session
        .decrypt(&ciphertext)
        .map_err(|_| EnvelopeError::SymmetricDecrypt)
}
