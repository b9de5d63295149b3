//! Output formatting for CLI results
//!
//! Three formats:
//! - Table: human-readable tables (default)
//! - JSON: structured output for scripting
//! - Quiet: exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error_with_command(message: &str, command: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

/// Facts about a parsed key blob.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyInfo {
    pub kind: String,
    pub modulus_bits: usize,
    /// Largest plaintext one PKCS#1 v1.5 block can carry
    pub max_plaintext_len: usize,
    pub exponent: String,
    /// SHA-256 of the modulus, hex
    pub fingerprint: String,
}

/// Result of `check-config`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigReport {
    pub digest: String,
    pub modulus_bits: usize,
    pub fingerprint: String,
    pub partner_cache_ttl_seconds: u64,
    pub audit_log: Option<String>,
    pub round_trip: bool,
}

pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_key_info(&self, info: &KeyInfo) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Property", "Value"]);
                table.add_row(vec!["Kind", info.kind.as_str()]);
                table.add_row(vec!["Modulus bits".to_string(), info.modulus_bits.to_string()]);
                table.add_row(vec![
                    "Max plaintext".to_string(),
                    format!("{} bytes", info.max_plaintext_len),
                ]);
                table.add_row(vec!["Exponent", info.exponent.as_str()]);
                table.add_row(vec!["Fingerprint", info.fingerprint.as_str()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(info, "inspect-key"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_config_report(&self, report: &ConfigReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Setting", "Value"]);
                table.add_row(vec!["Digest", report.digest.as_str()]);
                table.add_row(vec!["Modulus bits".to_string(), report.modulus_bits.to_string()]);
                table.add_row(vec!["Fingerprint", report.fingerprint.as_str()]);
                table.add_row(vec![
                    "Partner cache TTL".to_string(),
                    format!("{}s", report.partner_cache_ttl_seconds),
                ]);
                table.add_row(vec![
                    "Audit log",
                    report.audit_log.as_deref().unwrap_or("(disabled)"),
                ]);
                table.add_row(vec!["Seal/open round trip", if report.round_trip { "ok" } else { "FAILED" }]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(report, "check-config"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Wrap a command result; table output is the raw text.
    pub fn format_text<T: Serialize>(&self, text: &str, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Table => text.to_string(),
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_error(&self, message: &str, command: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {message}"),
            OutputFormat::Json => serde_json::to_string_pretty(&JsonResponse::error_with_command(message, command))
                .unwrap_or_else(|_| format!("{{\"success\":false,\"error\":\"{message}\"}}")),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress line on stderr, verbose table mode only.
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("{message}");
        }
    }

    fn to_json_response<T: Serialize>(&self, data: &T, command: &str) -> String {
        serde_json::to_string_pretty(&JsonResponse::success_with_command(data, command))
            .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{e}\"}}"))
    }
}
