#![forbid(unsafe_code)]

pub mod hash;
pub mod keyblob;
pub mod asymmetric;

pub mod session_crypto;
pub mod envelope;

pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_keys;

#[cfg(test)]
mod proptests;

pub use asymmetric::{AsymmetricError, KeyHalf, KeyMaterial, RsaKey};
pub use envelope::{open_envelope, seal_envelope, Envelope, EnvelopeError};
pub use hash::DigestMode;
pub use keyblob::{parse_private_key, parse_public_key, KeyBlobError};
pub use session_crypto::{SessionCryptoError, SessionKey};
