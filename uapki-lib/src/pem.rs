//! PEM <-> DER conversion and multi-object PEM parsing.

use crate::util;
use crate::PkiError;
use x509_parser::prelude::*;

const CERT_LABELS: &[&str] = &["CERTIFICATE", "TRUSTED CERTIFICATE", "X509 CERTIFICATE"];
const CRL_LABEL: &str = "X509 CRL";

/// Convert DER-encoded certificate bytes to a PEM string.
pub fn der_to_pem(der: &[u8]) -> String {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        util::base64_wrap(der)
    )
}

/// Convert a PEM-encoded certificate to DER bytes.
///
/// Only the first certificate block is returned.
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>, PkiError> {
    parse_pem_chain(pem)?
        .into_iter()
        .next()
        .ok_or_else(|| PkiError::Pem("no certificates found in PEM input".into()))
}

/// Parse a PEM-encoded file containing one or more certificates into
/// individual DER-encoded certificates.
///
/// A damaged block after at least one good certificate ends the scan
/// without an error.
pub fn parse_pem_chain(input: &[u8]) -> Result<Vec<Vec<u8>>, PkiError> {
    certs_from(input, BlockErrors::AfterFirstIgnored)
}

/// Like [`parse_pem_chain`], but any damaged block is an error.
pub(crate) fn parse_pem_chain_strict(input: &[u8]) -> Result<Vec<Vec<u8>>, PkiError> {
    certs_from(input, BlockErrors::Fatal)
}

/// Parse a PEM-encoded file into DER-encoded CRLs. Any damaged block is an
/// error.
pub fn parse_pem_crls(input: &[u8]) -> Result<Vec<Vec<u8>>, PkiError> {
    let crls = collect_pem_blocks(input, |label| label == CRL_LABEL, BlockErrors::Fatal)?;
    if crls.is_empty() {
        return Err(PkiError::Pem("no CRLs found in PEM input".into()));
    }
    Ok(crls)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockErrors {
    Fatal,
    AfterFirstIgnored,
}

fn certs_from(input: &[u8], errors: BlockErrors) -> Result<Vec<Vec<u8>>, PkiError> {
    let certs = collect_pem_blocks(input, |label| CERT_LABELS.contains(&label), errors)?;
    if certs.is_empty() {
        return Err(PkiError::Pem("no certificates found in PEM input".into()));
    }
    Ok(certs)
}

fn collect_pem_blocks(
    input: &[u8],
    wanted: impl Fn(&str) -> bool,
    errors: BlockErrors,
) -> Result<Vec<Vec<u8>>, PkiError> {
    let mut blocks = Vec::new();
    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if wanted(pem.label.as_str()) {
                    blocks.push(pem.contents);
                }
            }
            Err(e) => {
                if errors == BlockErrors::AfterFirstIgnored && !blocks.is_empty() {
                    break;
                }
                return Err(PkiError::Pem(format!("failed to parse PEM: {}", e)));
            }
        }
    }
    Ok(blocks)
}
