//! Revocation records and CRL ingestion.
//!
//! The validator only ever asks one question: is `(issuer, serial)` revoked?
//! Records come either from explicit entries or from DER-encoded CRLs parsed
//! at trust-store load time.

use crate::certificate::Certificate;
use crate::util;
use crate::PkiError;
use std::collections::HashSet;
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// One revoked `(issuer, serial)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevokedSerial {
    issuer_raw: Vec<u8>,
    serial: Vec<u8>,
}

impl RevokedSerial {
    /// Build an entry from a raw DER issuer name and a big-endian serial.
    pub fn new(issuer_raw: impl Into<Vec<u8>>, serial: &[u8]) -> Self {
        RevokedSerial {
            issuer_raw: issuer_raw.into(),
            serial: util::normalize_serial(serial),
        }
    }

    /// The entry that revokes `cert`.
    pub fn for_certificate(cert: &Certificate) -> Self {
        Self::new(cert.issuer_raw(), cert.serial())
    }

    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    pub fn serial(&self) -> &[u8] {
        &self.serial
    }
}

/// Set of revoked `(issuer, serial)` pairs.
#[derive(Debug, Clone, Default)]
pub struct RevocationList {
    entries: HashSet<RevokedSerial>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RevokedSerial) {
        self.entries.insert(entry);
    }

    /// Whether `cert` matches a revocation entry.
    pub fn is_revoked(&self, cert: &Certificate) -> bool {
        self.entries.contains(&RevokedSerial::for_certificate(cert))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RevokedSerial> {
        self.entries.iter()
    }

    /// Add every revoked serial of a DER-encoded CRL.
    ///
    /// `issuers` are the authority certificates known to the trust store.
    /// When one of them carries the CRL's issuer name, the CRL signature must
    /// verify under at least one such certificate or the CRL is refused. A CRL
    /// from an issuer the store does not know is accepted as-is: it can only
    /// make the store reject more, never less.
    ///
    /// Returns the number of entries read from the CRL.
    pub fn add_crl_der<'a>(
        &mut self,
        crl_der: &[u8],
        issuers: impl IntoIterator<Item = &'a Certificate>,
    ) -> Result<usize, PkiError> {
        let (_, crl) =
            x509_parser::revocation_list::CertificateRevocationList::from_der(crl_der)
                .map_err(|e| PkiError::Der(format!("CRL: {}", e)))?;
        let crl_issuer = crl.issuer().as_raw();

        let candidates: Vec<&Certificate> = issuers
            .into_iter()
            .filter(|c| c.subject_raw() == crl_issuer)
            .collect();
        if candidates.is_empty() {
            warn!(
                issuer = %crl.issuer(),
                "CRL issuer is not in the trust store; signature not checked"
            );
        } else if !candidates.iter().any(|issuer| crl_signed_by(&crl, issuer)) {
            return Err(PkiError::Config(format!(
                "CRL signature from {} does not verify",
                crl.issuer()
            )));
        }

        let mut added = 0;
        for revoked in crl.iter_revoked_certificates() {
            let reason = revoked
                .reason_code()
                .map(|rc| format_crl_reason(&rc.1))
                .unwrap_or("unspecified");
            debug!(
                serial = %util::hex_colon_upper(revoked.raw_serial()),
                reason,
                "revoked"
            );
            self.insert(RevokedSerial::new(crl_issuer, revoked.raw_serial()));
            added += 1;
        }
        debug!(issuer = %crl.issuer(), entries = added, "loaded CRL");
        Ok(added)
    }
}

fn crl_signed_by(
    crl: &x509_parser::revocation_list::CertificateRevocationList,
    issuer: &Certificate,
) -> bool {
    X509Certificate::from_der(issuer.der())
        .map(|(_, x509)| crl.verify_signature(x509.public_key()).is_ok())
        .unwrap_or(false)
}

/// Format a CRL revocation reason code as an RFC 5280-style string.
pub(crate) fn format_crl_reason(rc: &x509_parser::x509::ReasonCode) -> &'static str {
    match rc.0 {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        // 7 is unused per RFC 5280
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unspecified",
    }
}
