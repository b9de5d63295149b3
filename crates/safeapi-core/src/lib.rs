#![forbid(unsafe_code)]

//! Safe API gateway core
//!
//! Host-side pieces around the RSA + 3DES envelope:
//! - Partner key directory with a TTL cache
//! - Gateway orchestration (open, journal, seal, respond)
//! - Public status codes for request errors
//! - Signed audit log
//! - Configuration loading

pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod journal;

#[cfg(test)]
mod proptests;

pub use config::{ConfigError, GatewayConfig};
pub use directory::{
    DirectoryError, PartnerIdentity, PartnerKeyDirectory, PartnerRecord, PartnerSource,
    StaticPartnerSource,
};
pub use error::{ResponseCode, SecurityError};
pub use gateway::{CheckProbe, GatewayStats, OpenedRequest, SafeGateway, SafeResponse};
pub use journal::{HttpRequestInfo, JournalError, MemoryJournal, NoopJournal, RequestJournal};
