//! Peer certificate validation against a trust snapshot.
//!
//! Checks run in a fixed order and the first failure decides the outcome:
//! well-formedness, revocation, trust, validity period, identity binding.
//! Trust is decided before time so that an untrusted certificate is never
//! reported as merely expired.

use crate::certificate::Certificate;
use crate::chain::{build_chain, DEFAULT_MAX_CHAIN_DEPTH};
use crate::identity::{IdentityKind, NetworkIdentity};
use crate::status::StatusCode;
use crate::thumbprint::thumbprint;
use crate::trust_store::TrustStoreSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Why a candidate certificate was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Malformed,
    Revoked,
    Untrusted,
    Expired,
    IdentityMismatch,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::Revoked => "revoked",
            RejectReason::Untrusted => "untrusted",
            RejectReason::Expired => "expired",
            RejectReason::IdentityMismatch => "identity mismatch",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refusal with its human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: String,
    /// The kind of identity that failed to match, for `IdentityMismatch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityKind>,
}

impl Rejection {
    fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Rejection {
            reason,
            detail: detail.into(),
            identity: None,
        }
    }

    /// The protocol status code for this refusal.
    pub fn status_code(&self) -> StatusCode {
        match (self.reason, self.identity) {
            (RejectReason::Malformed, _) => StatusCode::BAD_CERTIFICATE_INVALID,
            (RejectReason::Revoked, _) => StatusCode::BAD_CERTIFICATE_REVOKED,
            (RejectReason::Untrusted, _) => StatusCode::BAD_CERTIFICATE_UNTRUSTED,
            (RejectReason::Expired, _) => StatusCode::BAD_CERTIFICATE_TIME_INVALID,
            (RejectReason::IdentityMismatch, Some(IdentityKind::ApplicationUri)) => {
                StatusCode::BAD_CERTIFICATE_URI_INVALID
            }
            (RejectReason::IdentityMismatch, _) => StatusCode::BAD_CERTIFICATE_HOST_NAME_INVALID,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Information about a certificate in the accepted chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainCertInfo {
    /// Position in chain (0 = leaf).
    pub depth: usize,
    pub subject: String,
    pub issuer: String,
    /// Serial number as colon-separated hex.
    pub serial: String,
    /// Storage key of the certificate's thumbprint.
    pub thumbprint: String,
}

impl ChainCertInfo {
    fn from_cert(depth: usize, cert: &Certificate) -> Self {
        ChainCertInfo {
            depth,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.serial_hex(),
            thumbprint: cert.thumbprint().to_string(),
        }
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ValidationResult {
    /// Trusted. `chain` runs leaf to anchor; a directly trusted leaf yields a
    /// single entry.
    Accept { chain: Vec<ChainCertInfo> },
    Reject(Rejection),
}

impl ValidationResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, ValidationResult::Accept { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationResult::Accept { .. } => None,
            ValidationResult::Reject(r) => Some(r),
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        self.rejection().map(|r| r.reason)
    }

    pub fn status_code(&self) -> StatusCode {
        self.rejection()
            .map_or(StatusCode::GOOD, Rejection::status_code)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Accept { chain } => {
                if let Some(leaf) = chain.first() {
                    write!(f, "{}, {}, ", leaf.subject, leaf.serial)?;
                }
                write!(f, "OK")
            }
            ValidationResult::Reject(r) => write!(f, "FAIL, {}", r),
        }
    }
}

/// Options controlling validation behavior.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Maximum number of certificates in a chain, leaf and anchor included.
    pub max_chain_depth: usize,
    /// Whether to check certificate validity dates.
    pub check_time: bool,
    /// Validate at a specific Unix timestamp instead of the current time.
    pub at_time: Option<i64>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            check_time: true,
            at_time: None,
        }
    }
}

/// Stateless validator; safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct ChainValidator {
    options: ValidatorOptions,
}

impl ChainValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        ChainValidator { options }
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Validate DER bytes presented by a peer.
    pub fn validate(
        &self,
        candidate_der: &[u8],
        snapshot: &TrustStoreSnapshot,
        expected_identity: Option<&NetworkIdentity>,
    ) -> ValidationResult {
        let cert = match Certificate::from_der(candidate_der) {
            Ok(cert) => cert,
            Err(e) => {
                debug!(thumbprint = %thumbprint(candidate_der), error = %e, "malformed certificate");
                return ValidationResult::Reject(Rejection::new(
                    RejectReason::Malformed,
                    e.to_string(),
                ));
            }
        };
        self.validate_certificate(&cert, snapshot, expected_identity)
    }

    /// Validate an already-parsed certificate.
    pub fn validate_certificate(
        &self,
        cert: &Certificate,
        snapshot: &TrustStoreSnapshot,
        expected_identity: Option<&NetworkIdentity>,
    ) -> ValidationResult {
        match self.check(cert, snapshot, expected_identity) {
            Ok(chain) => {
                debug!(
                    thumbprint = %cert.thumbprint(),
                    chain_len = chain.len(),
                    generation = snapshot.generation(),
                    "certificate accepted"
                );
                ValidationResult::Accept { chain }
            }
            Err(rejection) => ValidationResult::Reject(rejection),
        }
    }

    fn check(
        &self,
        cert: &Certificate,
        snapshot: &TrustStoreSnapshot,
        expected_identity: Option<&NetworkIdentity>,
    ) -> Result<Vec<ChainCertInfo>, Rejection> {
        if snapshot.revocation().is_revoked(cert) {
            return Err(Rejection::new(
                RejectReason::Revoked,
                format!("serial {} revoked by {}", cert.serial_hex(), cert.issuer()),
            ));
        }

        let chain: Vec<&Certificate> = if snapshot.trusted().contains_der(cert.der()) {
            vec![cert]
        } else {
            build_chain(cert, snapshot, self.options.max_chain_depth).ok_or_else(|| {
                Rejection::new(
                    RejectReason::Untrusted,
                    format!("no trusted path for {}", cert.subject()),
                )
            })?
        };

        if let Some(revoked) = chain
            .iter()
            .skip(1)
            .find(|c| snapshot.revocation().is_revoked(c))
        {
            return Err(Rejection::new(
                RejectReason::Revoked,
                format!("issuer {} is revoked", revoked.subject()),
            ));
        }

        if self.options.check_time {
            let now = self.options.at_time.unwrap_or_else(unix_now);
            let outside = chain.iter().enumerate().find(|(_, c)| !c.is_valid_at(now));
            if let Some((depth, c)) = outside {
                let state = if now < c.not_before() {
                    "is not yet valid"
                } else {
                    "has expired"
                };
                return Err(Rejection::new(
                    RejectReason::Expired,
                    format!("certificate at depth {} {}", depth, state),
                ));
            }
        }

        if let Some(expected) = expected_identity {
            if !expected.matches(cert) {
                return Err(Rejection {
                    reason: RejectReason::IdentityMismatch,
                    detail: format!("certificate does not carry {}", expected),
                    identity: Some(expected.kind()),
                });
            }
        }

        Ok(chain
            .iter()
            .enumerate()
            .map(|(depth, c)| ChainCertInfo::from_cert(depth, c))
            .collect())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_reason() {
        let r = Rejection::new(RejectReason::Untrusted, "x");
        assert_eq!(r.status_code(), StatusCode::BAD_CERTIFICATE_UNTRUSTED);

        let uri = Rejection {
            reason: RejectReason::IdentityMismatch,
            detail: String::new(),
            identity: Some(IdentityKind::ApplicationUri),
        };
        assert_eq!(uri.status_code(), StatusCode::BAD_CERTIFICATE_URI_INVALID);

        let ip = Rejection {
            identity: Some(IdentityKind::Ip),
            ..uri
        };
        assert_eq!(ip.status_code(), StatusCode::BAD_CERTIFICATE_HOST_NAME_INVALID);
    }

    #[test]
    fn garbage_is_malformed() {
        let result = ChainValidator::default().validate(
            b"not a certificate",
            &TrustStoreSnapshot::empty(),
            None,
        );
        assert_eq!(result.reason(), Some(RejectReason::Malformed));
        assert_eq!(result.status_code(), StatusCode::BAD_CERTIFICATE_INVALID);
        assert!(result.to_string().starts_with("FAIL, malformed"));
    }
}
