//! Error taxonomy for the Chiral core.
//!
//! Every variant here is one of the abstract kinds from the error-handling
//! design: `NotFound`, `IntegrityFailure`, `Unauthorized`, `NetworkUnreachable`,
//! `Timeout`, `ResourceExhausted`, `ProtocolViolation`, `UserCanceled`, plus
//! the ambient system-level kinds (`Io`, `Config`, `Database`,
//! `Serialization`) every component still needs. Adapters and components
//! surface these typed errors; nothing crosses a component boundary as an
//! opaque string.

use std::fmt;

#[derive(Debug)]
pub enum ChiralError {
    /// A KAD key, provider, or chunk is absent.
    NotFound(String),
    /// A chunk or full-file hash mismatch. Fatal to the affected chunk/file;
    /// recoverable by refetching.
    IntegrityFailure(String),
    /// Signature verification failed on a record or control message.
    Unauthorized(String),
    /// No transport succeeded reaching a peer.
    NetworkUnreachable(String),
    /// A bounded operation exceeded its deadline.
    Timeout(String),
    /// Relay slots full, disk full, or a transfer's bitmap saturated.
    ResourceExhausted(String),
    /// An adapter reported malformed frames; the offending peer is demoted.
    ProtocolViolation(String),
    /// Explicit cancellation from the operator.
    UserCanceled(String),

    /// File system I/O failures.
    Io(String),
    /// Configuration loading/validation failures.
    Config(String),
    /// Local persistence (SQLite, checkpoint files) failures.
    Database(String),
    /// Encoding/decoding failures (JSON, TOML, bincode).
    Serialization(String),
    /// Catch-all for conditions that don't fit another category.
    Generic(String),
}

impl ChiralError {
    /// True for errors TE should retry (with backoff / peer demotion) rather
    /// than fail the transfer outright. See §7 propagation policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChiralError::NetworkUnreachable(_)
                | ChiralError::Timeout(_)
                | ChiralError::ResourceExhausted(_)
        )
    }

    /// Exit code per the §6 CLI convention.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChiralError::IntegrityFailure(_) => 4,
            ChiralError::NetworkUnreachable(_) | ChiralError::Timeout(_) => 3,
            ChiralError::NotFound(_)
            | ChiralError::Unauthorized(_)
            | ChiralError::Config(_)
            | ChiralError::UserCanceled(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ChiralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChiralError::NotFound(e) => write!(f, "not found: {}", e),
            ChiralError::IntegrityFailure(e) => write!(f, "integrity failure: {}", e),
            ChiralError::Unauthorized(e) => write!(f, "unauthorized: {}", e),
            ChiralError::NetworkUnreachable(e) => write!(f, "network unreachable: {}", e),
            ChiralError::Timeout(e) => write!(f, "timeout: {}", e),
            ChiralError::ResourceExhausted(e) => write!(f, "resource exhausted: {}", e),
            ChiralError::ProtocolViolation(e) => write!(f, "protocol violation: {}", e),
            ChiralError::UserCanceled(e) => write!(f, "canceled: {}", e),
            ChiralError::Io(e) => write!(f, "I/O error: {}", e),
            ChiralError::Config(e) => write!(f, "configuration error: {}", e),
            ChiralError::Database(e) => write!(f, "database error: {}", e),
            ChiralError::Serialization(e) => write!(f, "serialization error: {}", e),
            ChiralError::Generic(e) => write!(f, "error: {}", e),
        }
    }
}

impl std::error::Error for ChiralError {}

impl From<std::io::Error> for ChiralError {
    fn from(error: std::io::Error) -> Self {
        ChiralError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ChiralError {
    fn from(error: serde_json::Error) -> Self {
        ChiralError::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for ChiralError {
    fn from(error: toml::de::Error) -> Self {
        ChiralError::Config(format!("TOML parse error: {}", error))
    }
}

impl From<toml::ser::Error> for ChiralError {
    fn from(error: toml::ser::Error) -> Self {
        ChiralError::Config(format!("TOML serialize error: {}", error))
    }
}

impl From<rusqlite::Error> for ChiralError {
    fn from(error: rusqlite::Error) -> Self {
        ChiralError::Database(error.to_string())
    }
}

impl From<bincode::Error> for ChiralError {
    fn from(error: bincode::Error) -> Self {
        ChiralError::Serialization(format!("bincode error: {}", error))
    }
}

impl From<libp2p::kad::store::Error> for ChiralError {
    fn from(error: libp2p::kad::store::Error) -> Self {
        ChiralError::Generic(format!("Kademlia store error: {:?}", error))
    }
}

/// Result type alias for Chiral core operations.
pub type ChiralResult<T> = Result<T, ChiralError>;
