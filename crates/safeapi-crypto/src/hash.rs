use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut h = Sha1::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// Digest used for RSA signatures.
///
/// Partners identify these by the legacy scheme names `RSA` (SHA-1) and
/// `RSA2` (SHA-256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMode {
    Sha1,
    #[default]
    Sha256,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown digest mode: {0}")]
pub struct UnknownDigestMode(pub String);

impl DigestMode {
    /// Legacy scheme name.
    pub fn scheme_name(self) -> &'static str {
        match self {
            DigestMode::Sha1 => "RSA",
            DigestMode::Sha256 => "RSA2",
        }
    }

    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestMode::Sha1 => sha1(data).to_vec(),
            DigestMode::Sha256 => sha256(data).to_vec(),
        }
    }

    pub(crate) fn pkcs1v15_scheme(self) -> Pkcs1v15Sign {
        match self {
            DigestMode::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            DigestMode::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        }
    }
}

impl std::str::FromStr for DigestMode {
    type Err = UnknownDigestMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" | "rsa" => Ok(DigestMode::Sha1),
            "sha256" | "sha-256" | "rsa2" => Ok(DigestMode::Sha256),
            _ => Err(UnknownDigestMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for DigestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestMode::Sha1 => write!(f, "sha1"),
            DigestMode::Sha256 => write!(f, "sha256"),
        }
    }
}
