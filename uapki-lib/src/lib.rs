//! uapki-lib: certificate trust engine for OPC UA secure channels.
//!
//! Decides whether a peer certificate presented during a secure-channel
//! handshake is acceptable, reports the matching protocol status code and
//! archives rejected certificates so an operator can review and approve them.
//!
//! The trust configuration lives in a [`TrustStore`] whose immutable
//! [`TrustStoreSnapshot`]s can be validated against from any number of threads
//! while a reload swaps in a replacement.

mod archive;
mod certificate;
mod chain;
mod config;
mod handshake;
mod identity;
mod pem;
mod revocation;
mod status;
mod thumbprint;
mod trust_store;
mod util;
mod validator;
mod watch;

pub use archive::{ArchiveOutcome, RejectedArchive};
pub use certificate::{Certificate, SanEntry, MAX_CERTIFICATE_BYTES};
pub use chain::DEFAULT_MAX_CHAIN_DEPTH;
pub use config::{ArchiveConfig, PkiConfig, TrustConfig, ValidationConfig};
pub use handshake::{
    ArchiveMode, ArchiveStatus, Handshake, HandshakeCoordinator, HandshakeOutcome,
    HandshakeState, SecurityMode,
};
pub use identity::{IdentityKind, NetworkIdentity};
pub use pem::{der_to_pem, parse_pem_chain, parse_pem_crls, pem_to_der};
pub use revocation::{RevocationList, RevokedSerial};
pub use status::StatusCode;
pub use thumbprint::{
    compute_fingerprint, storage_key, thumbprint, DigestAlgorithm, Thumbprint, THUMBPRINT_LEN,
};
pub use util::is_pem;
pub use trust_store::{
    CertSource, CertificateSet, RevocationSource, TrustSource, TrustStore, TrustStoreSnapshot,
};
pub use validator::{
    ChainCertInfo, ChainValidator, RejectReason, Rejection, ValidationResult, ValidatorOptions,
};
pub use watch::DirectoryWatcher;

/// Errors returned by uapki-lib.
///
/// Validation outcomes are not errors; see [`ValidationResult`].
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PEM format: {0}")]
    Pem(String),

    #[error("Invalid DER format: {0}")]
    Der(String),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}
