//! Gateway configuration.
//!
//! Loaded from an optional TOML file named by `SAFEAPI_CONFIG`, then
//! overridden by `SAFEAPI_*` environment variables.
//!
//! ```toml
//! [keys]
//! private_key_path = "/etc/safeapi/server.key"   # or private_key = "<base64>"
//! public_key_path = "/etc/safeapi/server.pub"    # or public_key = "<base64>"
//! digest = "sha256"                              # "sha256" | "sha1" | "RSA2" | "RSA"
//!
//! [directory]
//! cache_ttl_seconds = 86400
//!
//! [audit]
//! log_path = "/var/log/safeapi/audit.jsonl"
//!
//! [logging]
//! level = "warn"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use safeapi_crypto::{DigestMode, KeyBlobError, RsaKey};

use crate::directory::DEFAULT_PARTNER_TTL;

pub const ENV_CONFIG: &str = "SAFEAPI_CONFIG";
pub const ENV_PRIVATE_KEY: &str = "SAFEAPI_PRIVATE_KEY";
pub const ENV_PUBLIC_KEY: &str = "SAFEAPI_PUBLIC_KEY";
pub const ENV_PRIVATE_KEY_PATH: &str = "SAFEAPI_PRIVATE_KEY_PATH";
pub const ENV_PUBLIC_KEY_PATH: &str = "SAFEAPI_PUBLIC_KEY_PATH";
pub const ENV_DIGEST: &str = "SAFEAPI_DIGEST";
pub const ENV_PARTNER_CACHE_TTL: &str = "SAFEAPI_PARTNER_CACHE_TTL_SECONDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Local key rejected: {0}")]
    Key(#[from] KeyBlobError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local key pair source. Inline blobs win over paths.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    #[serde(default = "default_digest")]
    pub digest: String,
}

fn default_digest() -> String {
    "sha256".to_string()
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            public_key: None,
            private_key_path: None,
            public_key_path: None,
            digest: default_digest(),
        }
    }
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key.is_some())
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("digest", &self.digest)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_PARTNER_TTL.as_secs()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines audit log; no audit log when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    /// Load from `SAFEAPI_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load using `env` in place of the process environment.
    pub fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match env(ENV_CONFIG) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `SAFEAPI_*` overrides.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(blob) = env(ENV_PRIVATE_KEY) {
            self.keys.private_key = Some(blob);
        }
        if let Some(blob) = env(ENV_PUBLIC_KEY) {
            self.keys.public_key = Some(blob);
        }
        if let Some(path) = env(ENV_PRIVATE_KEY_PATH) {
            self.keys.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env(ENV_PUBLIC_KEY_PATH) {
            self.keys.public_key_path = Some(PathBuf::from(path));
        }
        if let Some(digest) = env(ENV_DIGEST) {
            self.keys.digest = digest;
        }
        if let Some(ttl) = env(ENV_PARTNER_CACHE_TTL) {
            self.directory.cache_ttl_seconds = ttl.trim().parse().map_err(|e| {
                ConfigError::Invalid(format!("Invalid {}: {}", ENV_PARTNER_CACHE_TTL, e))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.private_key.is_none() && self.keys.private_key_path.is_none() {
            return Err(ConfigError::Invalid(
                "a private key (inline or path) is required".to_string(),
            ));
        }

        if self.keys.public_key.is_none() && self.keys.public_key_path.is_none() {
            return Err(ConfigError::Invalid(
                "a public key (inline or path) is required".to_string(),
            ));
        }

        if self.directory.cache_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "cache_ttl_seconds must be > 0".to_string(),
            ));
        }

        self.digest()?;

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    pub fn digest(&self) -> Result<DigestMode, ConfigError> {
        self.keys
            .digest
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{}", e)))
    }

    pub fn partner_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.directory.cache_ttl_seconds)
    }

    /// The local `(private_blob, public_blob)` pair.
    pub fn load_local_key_pair(&self) -> Result<(Zeroizing<String>, String), ConfigError> {
        let private = match (&self.keys.private_key, &self.keys.private_key_path) {
            (Some(blob), _) => Zeroizing::new(blob.clone()),
            (None, Some(path)) => Zeroizing::new(std::fs::read_to_string(path)?),
            (None, None) => {
                return Err(ConfigError::Invalid("no private key configured".to_string()))
            }
        };
        let public = match (&self.keys.public_key, &self.keys.public_key_path) {
            (Some(blob), _) => blob.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => {
                return Err(ConfigError::Invalid("no public key configured".to_string()))
            }
        };
        Ok((private, public))
    }

    /// Parse the local pair; both halves must share one modulus.
    pub fn local_key(&self) -> Result<RsaKey, ConfigError> {
        let (private, public) = self.load_local_key_pair()?;
        Ok(RsaKey::from_blobs(&private, &public, self.digest()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use safeapi_crypto::test_keys;

    fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.keys.digest, "sha256");
        assert_eq!(config.directory.cache_ttl_seconds, 86_400);
        assert_eq!(config.logging.level, "warn");
        assert!(config.audit.log_path.is_none());
        // No keys configured.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_env_only() {
        let config = GatewayConfig::load_with(env_from(&[
            (ENV_PRIVATE_KEY, test_keys::SERVER_PRIVATE),
            (ENV_PUBLIC_KEY, test_keys::SERVER_PUBLIC),
            (ENV_DIGEST, "RSA"),
            (ENV_PARTNER_CACHE_TTL, "600"),
        ]))
        .unwrap();

        assert_eq!(config.digest().unwrap(), DigestMode::Sha1);
        assert_eq!(config.partner_cache_ttl(), Duration::from_secs(600));

        let key = config.local_key().unwrap();
        assert_eq!(key.digest(), DigestMode::Sha1);
        assert!(key.material().private_key().is_some());
        assert!(key.material().public_key().is_some());
    }

    #[test]
    fn test_toml_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("server.key");
        let public_path = dir.path().join("server.pub");
        std::fs::write(&private_path, test_keys::SERVER_PRIVATE).unwrap();
        std::fs::write(&public_path, test_keys::SERVER_PUBLIC).unwrap();

        let config_path = dir.path().join("safeapi.toml");
        std::fs::write(
            &config_path,
            format!(
                "[keys]\nprivate_key_path = {:?}\npublic_key_path = {:?}\ndigest = \"RSA2\"\n\n[directory]\ncache_ttl_seconds = 120\n\n[logging]\nlevel = \"info\"\n",
                private_path, public_path
            ),
        )
        .unwrap();

        let config = GatewayConfig::load_with(env_from(&[
            (ENV_CONFIG, config_path.to_str().unwrap()),
            (ENV_PARTNER_CACHE_TTL, "30"),
        ]))
        .unwrap();

        assert_eq!(config.directory.cache_ttl_seconds, 30);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.digest().unwrap(), DigestMode::Sha256);

        let (private, public) = config.load_local_key_pair().unwrap();
        assert_eq!(private.as_str(), test_keys::SERVER_PRIVATE);
        assert_eq!(public, test_keys::SERVER_PUBLIC);
        assert!(config.local_key().is_ok());
    }

    #[test]
    fn test_inline_blob_wins_over_path() {
        let mut config = GatewayConfig::default();
        config.keys.private_key = Some(test_keys::PARTNER_PRIVATE.to_string());
        config.keys.private_key_path = Some(PathBuf::from("/nonexistent/server.key"));
        config.keys.public_key = Some(test_keys::PARTNER_PUBLIC.to_string());

        let (private, _) = config.load_local_key_pair().unwrap();
        assert_eq!(private.as_str(), test_keys::PARTNER_PRIVATE);
    }

    #[test]
    fn test_validation_failures() {
        let base = [
            (ENV_PRIVATE_KEY, test_keys::SERVER_PRIVATE),
            (ENV_PUBLIC_KEY, test_keys::SERVER_PUBLIC),
        ];

        let mut vars = base.to_vec();
        vars.push((ENV_PARTNER_CACHE_TTL, "0"));
        assert!(matches!(
            GatewayConfig::load_with(env_from(&vars)),
            Err(ConfigError::Invalid(_))
        ));

        let mut vars = base.to_vec();
        vars.push((ENV_PARTNER_CACHE_TTL, "a day"));
        assert!(matches!(
            GatewayConfig::load_with(env_from(&vars)),
            Err(ConfigError::Invalid(_))
        ));

        let mut vars = base.to_vec();
        vars.push((ENV_DIGEST, "md5"));
        assert!(matches!(
            GatewayConfig::load_with(env_from(&vars)),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            GatewayConfig::load_with(env_from(&base[..1])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let config = GatewayConfig::load_with(env_from(&[
            (ENV_PRIVATE_KEY, test_keys::SERVER_PRIVATE),
            (ENV_PUBLIC_KEY, test_keys::PARTNER_PUBLIC),
        ]))
        .unwrap();
        assert!(matches!(
            config.local_key(),
            Err(ConfigError::Key(KeyBlobError::KeyPairMismatch))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            GatewayConfig::load_with(env_from(&[(ENV_CONFIG, "/nonexistent/safeapi.toml")])),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let mut config = GatewayConfig::default();
        config.keys.private_key = Some(test_keys::SERVER_PRIVATE.to_string());
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(test_keys::SERVER_PRIVATE.trim()));
    }
}
