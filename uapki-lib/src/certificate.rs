//! Immutable certificate model.
//!
//! A [`Certificate`] owns the exact DER bytes presented by a peer or loaded
//! from a trust list, together with the fields the trust decision needs. The
//! `x509-parser` view borrows from the bytes, so signature checks re-parse on
//! demand instead of storing a self-referential structure.

use crate::pem;
use crate::thumbprint::{thumbprint, Thumbprint};
use crate::util;
use crate::PkiError;
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use x509_parser::prelude::*;

/// Largest certificate accepted for parsing. Peer input beyond this is
/// treated as malformed without being decoded.
pub const MAX_CERTIFICATE_BYTES: usize = 64 * 1024;

/// A Subject Alternative Name entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
    Uri(String),
    Email(String),
    Other(String),
}

/// A parsed X.509 certificate with the fields used for trust decisions.
#[derive(Clone)]
pub struct Certificate {
    der: Arc<[u8]>,
    thumbprint: Thumbprint,
    version: u32,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    subject: String,
    issuer: String,
    serial: Vec<u8>,
    not_before: i64,
    not_after: i64,
    san: Vec<SanEntry>,
    is_ca: bool,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial_hex())
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl Certificate {
    /// Parse exactly one DER-encoded certificate.
    ///
    /// Trailing bytes after the certificate, oversized input and extensions
    /// that fail to decode are all rejected.
    pub fn from_der(der: &[u8]) -> Result<Self, PkiError> {
        if der.is_empty() {
            return Err(PkiError::Der("empty input".into()));
        }
        if der.len() > MAX_CERTIFICATE_BYTES {
            return Err(PkiError::Der(format!(
                "certificate of {} bytes exceeds the {} byte limit",
                der.len(),
                MAX_CERTIFICATE_BYTES
            )));
        }

        let (remaining, x509) =
            X509Certificate::from_der(der).map_err(|e| PkiError::Der(format!("{}", e)))?;
        if !remaining.is_empty() {
            return Err(PkiError::Der(format!(
                "{} trailing bytes after certificate",
                remaining.len()
            )));
        }

        let is_ca = match x509.basic_constraints() {
            Ok(Some(bc)) => bc.value.ca,
            // X.509 v1/v2 certificates have no extensions; treat them as
            // potential authorities like OpenSSL does for legacy roots.
            Ok(None) => x509.version().0 < 2,
            Err(e) => return Err(PkiError::Der(format!("basicConstraints: {}", e))),
        };
        let san = extract_san(&x509)?;

        Ok(Certificate {
            thumbprint: thumbprint(der),
            version: x509.version().0 + 1,
            subject_raw: x509.subject().as_raw().to_vec(),
            issuer_raw: x509.issuer().as_raw().to_vec(),
            subject: x509.subject().to_string(),
            issuer: x509.issuer().to_string(),
            serial: util::normalize_serial(x509.raw_serial()),
            not_before: x509.validity().not_before.timestamp(),
            not_after: x509.validity().not_after.timestamp(),
            san,
            is_ca,
            der: Arc::from(der),
        })
    }

    /// Parse the first certificate of a PEM document.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self, PkiError> {
        let der = pem::pem_to_der(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse a certificate from PEM or DER (auto-detected).
    pub fn parse(input: &[u8]) -> Result<Self, PkiError> {
        if util::is_pem(input) {
            Self::from_pem(input)
        } else {
            Self::from_der(input)
        }
    }

    /// The exact DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn thumbprint(&self) -> Thumbprint {
        self.thumbprint
    }

    /// Certificate version (1, 2, or 3).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Raw DER encoding of the subject name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// Raw DER encoding of the issuer name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number with leading zero octets removed.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as colon-separated hex.
    pub fn serial_hex(&self) -> String {
        util::hex_colon_upper(&self.serial)
    }

    /// Start of the validity window, Unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the validity window, Unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Whether `at` (Unix seconds) lies inside the validity window.
    pub fn is_valid_at(&self, at: i64) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn subject_alt_names(&self) -> &[SanEntry] {
        &self.san
    }

    /// Whether the certificate may act as an issuer.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Subject equals issuer.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Self-issued and carrying a valid signature under its own key.
    pub fn is_self_signed(&self) -> bool {
        self.is_self_issued()
            && X509Certificate::from_der(&self.der)
                .map(|(_, x509)| x509.verify_signature(None).is_ok())
                .unwrap_or(false)
    }

    /// Whether `issuer`'s public key verifies this certificate's signature.
    pub fn is_signed_by(&self, issuer: &Certificate) -> bool {
        let Ok((_, child)) = X509Certificate::from_der(&self.der) else {
            return false;
        };
        let Ok((_, parent)) = X509Certificate::from_der(&issuer.der) else {
            return false;
        };
        child.verify_signature(Some(parent.public_key())).is_ok()
    }
}

/// Extract the Subject Alternative Name entries.
fn extract_san(cert: &X509Certificate) -> Result<Vec<SanEntry>, PkiError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| PkiError::Der(format!("subjectAltName: {}", e)))?;
    let Some(san) = san else {
        return Ok(Vec::new());
    };

    let entries = san
        .value
        .general_names
        .iter()
        .map(|gn| match gn {
            GeneralName::DNSName(name) => SanEntry::Dns(name.to_string()),
            GeneralName::URI(uri) => SanEntry::Uri(uri.to_string()),
            GeneralName::RFC822Name(email) => SanEntry::Email(email.to_string()),
            GeneralName::IPAddress(bytes) => match ip_from_bytes(bytes) {
                Some(ip) => SanEntry::Ip(ip),
                None => SanEntry::Other(format!("IP:{}", hex::encode(bytes))),
            },
            other => SanEntry::Other(format!("{:?}", other)),
        })
        .collect();
    Ok(entries)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        Some(IpAddr::V4(Ipv4Addr::from(octets)))
    } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        Some(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        None
    }
}
