//! Safe API operator CLI
//!
//! - Seal a payload for a partner
//! - Open a partner's envelope
//! - Inspect key blobs
//! - Check the local configuration

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::Cli;
pub use output::{OutputFormat, OutputFormatter};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Authentication failed (envelope did not open)
/// - 3: Invalid input (bad key blob, envelope JSON or file)
/// - 4: Configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    InvalidInput = 3,
    ConfigError = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::ConfigError => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::GeneralError), 1);
        assert_eq!(i32::from(ExitCode::AuthenticationFailed), 2);
        assert_eq!(i32::from(ExitCode::InvalidInput), 3);
        assert_eq!(i32::from(ExitCode::ConfigError), 4);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::AuthenticationFailed.name(), "AUTH_FAILED");
        assert_eq!(ExitCode::ConfigError.name(), "CONFIG_ERROR");
    }
}
