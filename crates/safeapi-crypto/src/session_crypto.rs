//! Per-envelope session keys.
//!
//! A `SessionKey` is a triple-DES key plus CBC initialization vector. It
//! travels inside the envelope as a small JSON object with two base64
//! fields, wrapped under the recipient's RSA key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::{TdesEde2, TdesEde3};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Three-key triple-DES key length.
pub const THREE_KEY_LEN: usize = 24;
/// Two-key triple-DES key length.
pub const TWO_KEY_LEN: usize = 16;
/// DES block and IV length.
pub const BLOCK_LEN: usize = 8;

/// Error type for session crypto operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionCryptoError {
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("invalid IV length: {0} bytes")]
    InvalidIvLength(usize),
    #[error("degenerate key: sub-keys repeat")]
    DegenerateKey,
    #[error("malformed session key text: {0}")]
    MalformedKeyText(String),
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("RNG failed")]
    RngError,
}

#[derive(Serialize, Deserialize)]
struct SessionKeyText {
    #[serde(rename = "Key", alias = "key")]
    key: String,
    #[serde(rename = "Vector", alias = "vector")]
    vector: String,
}

impl Drop for SessionKeyText {
    fn drop(&mut self) {
        self.key.zeroize();
        self.vector.zeroize();
    }
}

/// Triple-DES key and IV for one envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: Vec<u8>,
    iv: [u8; BLOCK_LEN],
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

// Parity bits are ignored by DES, so sub-keys are compared without them.
fn same_subkey(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b).all(|(x, y)| x & 0xFE == y & 0xFE)
}

fn is_degenerate(key: &[u8]) -> bool {
    let k1 = &key[..BLOCK_LEN];
    let k2 = &key[BLOCK_LEN..2 * BLOCK_LEN];
    if same_subkey(k1, k2) {
        return true;
    }
    if key.len() == THREE_KEY_LEN {
        let k3 = &key[2 * BLOCK_LEN..];
        return same_subkey(k2, k3) || same_subkey(k1, k3);
    }
    false
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, SessionCryptoError> {
    let cipher = E::new_from_slices(key, iv)
        .map_err(|_| SessionCryptoError::InvalidKeyLength(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SessionCryptoError> {
    let cipher = D::new_from_slices(key, iv)
        .map_err(|_| SessionCryptoError::InvalidKeyLength(key.len()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SessionCryptoError::DecryptionFailed)
}

impl SessionKey {
    /// Fresh random three-key session key with distinct sub-keys.
    pub fn generate() -> Result<Self, SessionCryptoError> {
        let mut key = vec![0u8; THREE_KEY_LEN];
        let mut iv = [0u8; BLOCK_LEN];
        loop {
            getrandom::getrandom(&mut key).map_err(|_| SessionCryptoError::RngError)?;
            if !is_degenerate(&key) {
                break;
            }
        }
        getrandom::getrandom(&mut iv).map_err(|_| SessionCryptoError::RngError)?;
        Ok(Self { key, iv })
    }

    /// Build from explicit key and IV. Accepts two-key (16 byte) and
    /// three-key (24 byte) triple-DES keys.
    pub fn from_parts(key: &[u8], iv: &[u8]) -> Result<Self, SessionCryptoError> {
        if key.len() != THREE_KEY_LEN && key.len() != TWO_KEY_LEN {
            return Err(SessionCryptoError::InvalidKeyLength(key.len()));
        }
        let iv: [u8; BLOCK_LEN] = iv
            .try_into()
            .map_err(|_| SessionCryptoError::InvalidIvLength(iv.len()))?;
        if is_degenerate(key) {
            return Err(SessionCryptoError::DegenerateKey);
        }
        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; BLOCK_LEN] {
        &self.iv
    }

    /// `{"Key":"<base64>","Vector":"<base64>"}`
    pub fn serialize(&self) -> Result<Zeroizing<String>, SessionCryptoError> {
        let text = SessionKeyText {
            key: BASE64.encode(&self.key),
            vector: BASE64.encode(self.iv),
        };
        serde_json::to_string(&text)
            .map(Zeroizing::new)
            .map_err(|e| SessionCryptoError::MalformedKeyText(e.to_string()))
    }

    pub fn deserialize(text: &str) -> Result<Self, SessionCryptoError> {
        let parsed: SessionKeyText = serde_json::from_str(text)
            .map_err(|e| SessionCryptoError::MalformedKeyText(e.to_string()))?;
        let key = Zeroizing::new(
            BASE64
                .decode(parsed.key.as_bytes())
                .map_err(|_| SessionCryptoError::MalformedKeyText("Key is not base64".into()))?,
        );
        let iv = BASE64
            .decode(parsed.vector.as_bytes())
            .map_err(|_| SessionCryptoError::MalformedKeyText("Vector is not base64".into()))?;
        Self::from_parts(&key, &iv)
    }

    /// CBC encryption with PKCS#7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionCryptoError> {
        match self.key.len() {
            THREE_KEY_LEN => cbc_encrypt::<cbc::Encryptor<TdesEde3>>(&self.key, &self.iv, plaintext),
            TWO_KEY_LEN => cbc_encrypt::<cbc::Encryptor<TdesEde2>>(&self.key, &self.iv, plaintext),
            n => Err(SessionCryptoError::InvalidKeyLength(n)),
        }
    }

    /// CBC decryption; bad padding fails with `DecryptionFailed`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionCryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(SessionCryptoError::InvalidCiphertextLength(ciphertext.len()));
        }
        match self.key.len() {
            THREE_KEY_LEN => cbc_decrypt::<cbc::Decryptor<TdesEde3>>(&self.key, &self.iv, ciphertext),
            TWO_KEY_LEN => cbc_decrypt::<cbc::Decryptor<TdesEde2>>(&self.key, &self.iv, ciphertext),
            n => Err(SessionCryptoError::InvalidKeyLength(n)),
        }
    }
}
