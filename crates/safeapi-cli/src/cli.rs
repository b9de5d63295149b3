//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::output::{OutputFormat, OutputFormatter};
use crate::ExitCode;

/// Safe API operator CLI
#[derive(Parser, Debug)]
#[command(name = "safeapi")]
#[command(version, about = "Seal, open and inspect RSA + 3DES partner envelopes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path (overrides SAFEAPI_CONFIG)
    #[arg(long, global = true, env = "SAFEAPI_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seal a payload for a recipient with the configured local key
    Seal(SealArgs),
    /// Open an envelope from a sender with the configured local key
    Open(OpenArgs),
    /// Parse a key blob and print its parameters
    InspectKey(InspectKeyArgs),
    /// Validate configuration and run a seal/open round trip
    CheckConfig,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Seal(_) => "seal",
            Commands::Open(_) => "open",
            Commands::InspectKey(_) => "inspect-key",
            Commands::CheckConfig => "check-config",
        }
    }
}

#[derive(Args, Debug)]
pub struct SealArgs {
    /// Recipient public key: a file path or an inline base64 blob
    #[arg(long)]
    pub recipient_public: String,

    /// Payload file ("-" for stdin)
    #[arg(long, default_value = "-")]
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    /// Sender public key: a file path or an inline base64 blob
    #[arg(long)]
    pub sender_public: String,

    /// Envelope JSON file ("-" for stdin)
    #[arg(long, default_value = "-")]
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct InspectKeyArgs {
    /// Key file path or inline base64 blob
    pub key: String,

    /// Parse as a PKCS#1 private key
    #[arg(long, conflicts_with = "public")]
    pub private: bool,

    /// Parse as a SubjectPublicKeyInfo public key (default)
    #[arg(long)]
    pub public: bool,
}

impl Cli {
    /// Run the command, print its output and map the outcome to an exit code.
    pub fn execute(self) -> ExitCode {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        let name = self.command.name();

        let result = match &self.command {
            Commands::Seal(args) => commands::seal(&formatter, self.config.as_deref(), args),
            Commands::Open(args) => commands::open(&formatter, self.config.as_deref(), args),
            Commands::InspectKey(args) => commands::inspect_key(&formatter, args),
            Commands::CheckConfig => commands::check_config(&formatter, self.config.as_deref()),
        };

        match result {
            Ok(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
                ExitCode::Success
            }
            Err(e) => {
                let code = commands::exit_code_for(&e);
                tracing::debug!(command = name, error = ?e, "command failed");
                let message = format!("{e:#}");
                if formatter.format() == OutputFormat::Json {
                    println!("{}", formatter.format_error(&message, name));
                } else if !formatter.is_quiet() {
                    eprintln!("{}", formatter.format_error(&message, name));
                }
                code
            }
        }
    }

    /// Log filter directive from the flags, falling back to `configured`.
    pub fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            configured
        }
    }
}
