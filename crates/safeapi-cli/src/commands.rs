//! Command implementations

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

use safeapi_core::config::ConfigError;
use safeapi_core::gateway::CheckProbe;
use safeapi_core::{GatewayConfig, NoopJournal, SafeGateway, StaticPartnerSource};
use safeapi_crypto::hash::sha256;
use safeapi_crypto::{
    open_envelope, parse_private_key, parse_public_key, seal_envelope, Envelope, EnvelopeError,
    KeyBlobError, KeyMaterial, RsaKey,
};

use crate::cli::{InspectKeyArgs, OpenArgs, SealArgs};
use crate::output::{ConfigReport, KeyInfo, OutputFormatter};
use crate::ExitCode;

const ROUND_TRIP_PROBE: &str = "safeapi check-config";

/// Load configuration from `path` (or `SAFEAPI_CONFIG`) plus the environment.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let env = |name: &str| std::env::var(name).ok();
    match path {
        Some(path) => {
            let mut config = GatewayConfig::from_file(path)?;
            config.apply_env(env)?;
            config.validate()?;
            Ok(config)
        }
        None => GatewayConfig::load_with(env),
    }
}

/// A key argument is a path when such a file exists, otherwise an inline blob.
pub fn read_key_arg(arg: &str) -> anyhow::Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        std::fs::read_to_string(path).with_context(|| format!("reading key file {}", path.display()))
    } else {
        Ok(arg.to_string())
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))
    }
}

pub fn seal(formatter: &OutputFormatter, config: Option<&Path>, args: &SealArgs) -> anyhow::Result<String> {
    let config = load_config(config)?;
    let local = config.local_key()?;
    let recipient = RsaKey::from_public_blob(&read_key_arg(&args.recipient_public)?, config.digest()?)
        .context("parsing recipient public key")?;

    let plaintext = Zeroizing::new(read_input(&args.input)?);
    formatter.progress(&format!("Sealing {} bytes", plaintext.len()));
    let envelope = seal_envelope(&plaintext, &local, &recipient)?;
    info!(bytes = plaintext.len(), "payload sealed");

    let text = serde_json::to_string_pretty(&envelope)?;
    Ok(formatter.format_text(&text, &envelope, "seal"))
}

#[derive(Serialize)]
struct OpenedOutput {
    /// Base64 of the recovered plaintext
    plaintext: String,
    len: usize,
}

pub fn open(formatter: &OutputFormatter, config: Option<&Path>, args: &OpenArgs) -> anyhow::Result<String> {
    let config = load_config(config)?;
    let local = config.local_key()?;
    let sender = RsaKey::from_public_blob(&read_key_arg(&args.sender_public)?, config.digest()?)
        .context("parsing sender public key")?;

    let raw = read_input(&args.input)?;
    let envelope: Envelope = serde_json::from_slice(&raw).context("parsing envelope JSON")?;
    let plaintext = Zeroizing::new(open_envelope(&envelope, &local, &sender)?);
    info!(bytes = plaintext.len(), "envelope opened");

    let output = OpenedOutput {
        plaintext: BASE64.encode(plaintext.as_slice()),
        len: plaintext.len(),
    };
    Ok(formatter.format_text(&String::from_utf8_lossy(&plaintext), &output, "open"))
}

/// Describe parsed key material.
pub fn key_info(material: &KeyMaterial) -> KeyInfo {
    let modulus = material.modulus();
    let modulus_bits = match modulus.iter().position(|b| *b != 0) {
        Some(i) => (modulus.len() - i) * 8 - modulus[i].leading_zeros() as usize,
        None => 0,
    };
    KeyInfo {
        kind: if material.private_key().is_some() { "private" } else { "public" }.to_string(),
        modulus_bits,
        max_plaintext_len: material.modulus_len().saturating_sub(11),
        exponent: hex::encode(material.exponent()),
        fingerprint: hex::encode(sha256(&modulus)),
    }
}

pub fn inspect_key(formatter: &OutputFormatter, args: &InspectKeyArgs) -> anyhow::Result<String> {
    let blob = Zeroizing::new(read_key_arg(&args.key)?);
    let material = if args.private {
        parse_private_key(&blob)?
    } else {
        parse_public_key(&blob)?
    };
    Ok(formatter.format_key_info(&key_info(&material)))
}

pub fn check_config(formatter: &OutputFormatter, config: Option<&Path>) -> anyhow::Result<String> {
    let config = load_config(config)?;
    formatter.progress("Configuration is valid; building gateway");
    let gateway = SafeGateway::from_config(
        &config,
        Arc::new(StaticPartnerSource::default()),
        Arc::new(NoopJournal),
    )?;
    let key = config.local_key()?;

    // The check probe without a public key seals to the gateway itself.
    let probe = CheckProbe {
        data: Some(ROUND_TRIP_PROBE.to_string()),
        public_key: None,
    };
    let response = gateway.check(&probe);
    let envelope = response
        .data
        .ok_or_else(|| anyhow::anyhow!("check probe failed: {}", response.status.detail))?;
    let opened = open_envelope(&envelope, &key, &key.public_only())?;
    let round_trip = serde_json::from_slice::<String>(&opened)? == ROUND_TRIP_PROBE;

    let info = key_info(key.material());
    let report = ConfigReport {
        digest: key.digest().to_string(),
        modulus_bits: info.modulus_bits,
        fingerprint: info.fingerprint,
        partner_cache_ttl_seconds: gateway.directory().ttl().as_secs(),
        audit_log: config.audit.log_path.as_ref().map(|p| p.display().to_string()),
        round_trip,
    };
    if !round_trip {
        anyhow::bail!("seal/open round trip returned different bytes");
    }
    Ok(formatter.format_config_report(&report))
}

/// Map a command failure to a process exit code.
pub fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<EnvelopeError>() {
            return match e {
                EnvelopeError::EnvelopeCorrupt
                | EnvelopeError::SignatureInvalid
                | EnvelopeError::SymmetricDecrypt => ExitCode::AuthenticationFailed,
                _ => ExitCode::GeneralError,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCode::ConfigError;
        }
        if cause.downcast_ref::<KeyBlobError>().is_some()
            || cause.downcast_ref::<serde_json::Error>().is_some()
            || cause.downcast_ref::<std::io::Error>().is_some()
        {
            return ExitCode::InvalidInput;
        }
    }
    ExitCode::GeneralError
}
