//! Key blob codec.
//!
//! Decodes base64 RSA key blobs without a generic ASN.1 parser. Two shapes
//! are understood, both as emitted by OpenSSL:
//!
//! - a PKCS#1 `RSAPrivateKey` (`-traditional` DER),
//! - an X.509 `SubjectPublicKeyInfo` wrapping a PKCS#1 `RSAPublicKey`.
//!
//! The reader walks tag and length bytes in a fixed order. Any byte that
//! does not match the expected layout aborts decoding; there is no attempt
//! at recovery.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::asymmetric::KeyMaterial;
use crate::utils::constant_time_compare;

/// `AlgorithmIdentifier` for rsaEncryption (1.2.840.113549.1.1.1) with NULL parameters.
pub const RSA_ENCRYPTION_ALGORITHM: [u8; 15] = [
    0x30, 0x0D, 0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01, 0x05, 0x00,
];

const TAG_INTEGER: u8 = 0x02;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_SEQUENCE: u8 = 0x30;

const LENGTH_ONE_BYTE: u8 = 0x81;
const LENGTH_TWO_BYTES: u8 = 0x82;

/// Error type for key blob decoding. Every variant means the key is malformed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KeyBlobError {
    #[error("key blob is empty")]
    Empty,
    #[error("key blob is not valid base64")]
    InvalidBase64,
    #[error("unexpected end of key data at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("unexpected tag at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { offset: usize, expected: u8, found: u8 },
    #[error("unsupported length encoding {marker:#04x} at offset {offset}")]
    UnsupportedLength { offset: usize, marker: u8 },
    #[error("declared length {declared} exceeds the {available} bytes available")]
    Truncated { declared: usize, available: usize },
    #[error("unsupported private key version")]
    UnsupportedVersion,
    #[error("algorithm identifier is not rsaEncryption")]
    AlgorithmMismatch,
    #[error("bit string declares {0} unused bits")]
    UnusedBits(u8),
    #[error("integer field {0} is empty")]
    EmptyInteger(&'static str),
    #[error("key components rejected: {0}")]
    InvalidComponents(String),
    #[error("private and public key do not share a modulus")]
    KeyPairMismatch,
}

/// Raw public key fields, big-endian, guard byte removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyParams {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

/// Raw PKCS#1 private key fields, big-endian, guard bytes removed.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyParams {
    pub modulus: Vec<u8>,
    pub public_exponent: Vec<u8>,
    pub private_exponent: Vec<u8>,
    pub prime1: Vec<u8>,
    pub prime2: Vec<u8>,
    pub exponent1: Vec<u8>,
    pub exponent2: Vec<u8>,
    pub coefficient: Vec<u8>,
}

impl std::fmt::Debug for PrivateKeyParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyParams")
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("public_exponent", &self.public_exponent)
            .finish_non_exhaustive()
    }
}

impl PrivateKeyParams {
    /// The public half of these parameters.
    pub fn public(&self) -> PublicKeyParams {
        PublicKeyParams {
            modulus: self.modulus.clone(),
            exponent: self.public_exponent.clone(),
        }
    }

    /// Build a validated RSA private key.
    ///
    /// The stored CRT values must agree with the primes and the private
    /// exponent.
    pub fn to_private_key(&self) -> Result<RsaPrivateKey, KeyBlobError> {
        let key = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.public_exponent),
            BigUint::from_bytes_be(&self.private_exponent),
            vec![
                BigUint::from_bytes_be(&self.prime1),
                BigUint::from_bytes_be(&self.prime2),
            ],
        )
        .map_err(|e| KeyBlobError::InvalidComponents(e.to_string()))?;

        key.validate()
            .map_err(|e| KeyBlobError::InvalidComponents(e.to_string()))?;
        self.check_crt()?;
        Ok(key)
    }

    /// `exponent1 = d mod (p-1)`, `exponent2 = d mod (q-1)`, `coefficient * q = 1 mod p`.
    fn check_crt(&self) -> Result<(), KeyBlobError> {
        let one = BigUint::from(1u8);
        let d = BigUint::from_bytes_be(&self.private_exponent);
        let p = BigUint::from_bytes_be(&self.prime1);
        let q = BigUint::from_bytes_be(&self.prime2);
        let dp = BigUint::from_bytes_be(&self.exponent1);
        let dq = BigUint::from_bytes_be(&self.exponent2);
        let qinv = BigUint::from_bytes_be(&self.coefficient);

        if p <= one || q <= one {
            return Err(KeyBlobError::InvalidComponents("prime out of range".into()));
        }
        if dp != &d % (&p - &one) {
            return Err(KeyBlobError::InvalidComponents("exponent1 does not match".into()));
        }
        if dq != &d % (&q - &one) {
            return Err(KeyBlobError::InvalidComponents("exponent2 does not match".into()));
        }
        if qinv >= p || (&qinv * &q) % &p != one {
            return Err(KeyBlobError::InvalidComponents("coefficient does not match".into()));
        }
        Ok(())
    }
}

impl PublicKeyParams {
    /// Build an RSA public key; size and exponent bounds are enforced by `rsa`.
    pub fn to_public_key(&self) -> Result<RsaPublicKey, KeyBlobError> {
        RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent),
        )
        .map_err(|e| KeyBlobError::InvalidComponents(e.to_string()))
    }
}

/// Sequential reader over DER bytes.
struct DerReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn peek_u8(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn read_u8(&mut self) -> Result<u8, KeyBlobError> {
        let b = self
            .peek_u8()
            .ok_or(KeyBlobError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], KeyBlobError> {
        if len > self.remaining() {
            return Err(KeyBlobError::UnexpectedEof {
                offset: self.bytes.len(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), KeyBlobError> {
        let offset = self.pos;
        let found = self.read_u8()?;
        if found != expected {
            return Err(KeyBlobError::UnexpectedTag {
                offset,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Length octets in long form only (`0x81 len` or `0x82 hi lo`).
    ///
    /// RSA keys of useful size always need the long form for their
    /// outer containers, so a short form here is treated as malformed.
    fn read_long_length(&mut self) -> Result<usize, KeyBlobError> {
        let offset = self.pos;
        match self.read_u8()? {
            LENGTH_ONE_BYTE => Ok(self.read_u8()? as usize),
            LENGTH_TWO_BYTES => {
                let hi = self.read_u8()? as usize;
                let lo = self.read_u8()? as usize;
                Ok((hi << 8) | lo)
            }
            marker => Err(KeyBlobError::UnsupportedLength { offset, marker }),
        }
    }

    /// Length octets in short form (`<= 0x7F`) or the two long forms.
    fn read_length(&mut self) -> Result<usize, KeyBlobError> {
        match self.peek_u8() {
            Some(b) if b <= 0x7F => {
                self.pos += 1;
                Ok(b as usize)
            }
            _ => self.read_long_length(),
        }
    }

    /// Container header: tag, long-form length, and a bounds check
    /// against what is left in the buffer.
    fn read_container(&mut self, tag: u8) -> Result<usize, KeyBlobError> {
        self.expect_tag(tag)?;
        let declared = self.read_long_length()?;
        if declared > self.remaining() {
            return Err(KeyBlobError::Truncated {
                declared,
                available: self.remaining(),
            });
        }
        Ok(declared)
    }

    /// INTEGER value with at most one leading 0x00 sign guard removed.
    fn read_integer(&mut self, field: &'static str) -> Result<&'a [u8], KeyBlobError> {
        self.expect_tag(TAG_INTEGER)?;
        let mut len = self.read_length()?;
        if len == 0 {
            return Err(KeyBlobError::EmptyInteger(field));
        }
        if len > 1 && self.peek_u8() == Some(0x00) {
            self.pos += 1;
            len -= 1;
        }
        self.read_bytes(len)
    }
}

/// Decode the DER bytes of a PKCS#1 `RSAPrivateKey`.
pub fn decode_private_key(der: &[u8]) -> Result<PrivateKeyParams, KeyBlobError> {
    let mut r = DerReader::new(der);
    r.read_container(TAG_SEQUENCE)?;

    // version INTEGER (length 1) followed by its value 0: two-prime form only
    let version = r.read_bytes(2)?;
    if version != [TAG_INTEGER, 0x01] {
        return Err(KeyBlobError::UnsupportedVersion);
    }
    if r.read_u8()? != 0x00 {
        return Err(KeyBlobError::UnsupportedVersion);
    }

    Ok(PrivateKeyParams {
        modulus: r.read_integer("modulus")?.to_vec(),
        public_exponent: r.read_integer("publicExponent")?.to_vec(),
        private_exponent: r.read_integer("privateExponent")?.to_vec(),
        prime1: r.read_integer("prime1")?.to_vec(),
        prime2: r.read_integer("prime2")?.to_vec(),
        exponent1: r.read_integer("exponent1")?.to_vec(),
        exponent2: r.read_integer("exponent2")?.to_vec(),
        coefficient: r.read_integer("coefficient")?.to_vec(),
    })
}

/// Decode the DER bytes of a `SubjectPublicKeyInfo` holding an RSA key.
pub fn decode_public_key(der: &[u8]) -> Result<PublicKeyParams, KeyBlobError> {
    let mut r = DerReader::new(der);
    r.read_container(TAG_SEQUENCE)?;

    let algorithm = r.read_bytes(RSA_ENCRYPTION_ALGORITHM.len())?;
    if !constant_time_compare(algorithm, &RSA_ENCRYPTION_ALGORITHM) {
        return Err(KeyBlobError::AlgorithmMismatch);
    }

    r.read_container(TAG_BIT_STRING)?;
    let unused_bits = r.read_u8()?;
    if unused_bits != 0 {
        return Err(KeyBlobError::UnusedBits(unused_bits));
    }

    r.read_container(TAG_SEQUENCE)?;
    Ok(PublicKeyParams {
        modulus: r.read_integer("modulus")?.to_vec(),
        exponent: r.read_integer("publicExponent")?.to_vec(),
    })
}

/// Strip an optional PEM armor and all whitespace, then base64-decode.
pub fn decode_blob(blob: &str) -> Result<Zeroizing<Vec<u8>>, KeyBlobError> {
    let body: Zeroizing<String> = Zeroizing::new(
        blob.lines()
            .filter(|line| !line.trim_start().starts_with("-----"))
            .flat_map(|line| line.chars())
            .filter(|c| !c.is_ascii_whitespace())
            .collect(),
    );
    if body.is_empty() {
        return Err(KeyBlobError::Empty);
    }
    BASE64
        .decode(body.as_bytes())
        .map(Zeroizing::new)
        .map_err(|_| KeyBlobError::InvalidBase64)
}

/// Parse a base64 PKCS#1 private key blob into private-only key material.
pub fn parse_private_key(blob: &str) -> Result<KeyMaterial, KeyBlobError> {
    let der = decode_blob(blob)?;
    let params = decode_private_key(&der)?;
    Ok(KeyMaterial::PrivateOnly(params.to_private_key()?))
}

/// Parse a base64 `SubjectPublicKeyInfo` blob into public-only key material.
pub fn parse_public_key(blob: &str) -> Result<KeyMaterial, KeyBlobError> {
    let der = decode_blob(blob)?;
    let params = decode_public_key(&der)?;
    Ok(KeyMaterial::PublicOnly(params.to_public_key()?))
}
