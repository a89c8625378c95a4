//! Certificate chain building via iterative depth-first search.
//!
//! Given a leaf certificate and a trust snapshot, finds a path from the leaf
//! through IssuerList authorities to a self-signed anchor held in the
//! IssuerList or TrustList. The search uses an explicit stack instead of
//! recursion, stops at a fixed depth, and spends at most
//! [`MAX_SIGNATURE_CHECKS`] signature verifications, so hostile or looping
//! issuer sets cannot cause unbounded work.

use crate::certificate::Certificate;
use crate::trust_store::TrustStoreSnapshot;

/// Default maximum number of certificates in a chain, leaf and anchor included.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;

/// Upper bound on signature verifications per chain search.
pub(crate) const MAX_SIGNATURE_CHECKS: usize = 256;

struct Frame<'a> {
    cert: &'a Certificate,
    candidates: Vec<&'a Certificate>,
    next: usize,
}

impl<'a> Frame<'a> {
    fn new(cert: &'a Certificate, snapshot: &'a TrustStoreSnapshot) -> Self {
        Frame {
            cert,
            candidates: issuer_candidates(cert, snapshot),
            next: 0,
        }
    }
}

/// Authorities whose subject matches `cert`'s issuer name, IssuerList first.
fn issuer_candidates<'a>(
    cert: &Certificate,
    snapshot: &'a TrustStoreSnapshot,
) -> Vec<&'a Certificate> {
    let mut out: Vec<&'a Certificate> = Vec::new();
    let found = snapshot
        .issuers()
        .find_by_subject_raw(cert.issuer_raw())
        .chain(snapshot.trusted().find_by_subject_raw(cert.issuer_raw()));
    for candidate in found {
        if candidate.is_ca() && !out.iter().any(|c| c.der() == candidate.der()) {
            out.push(candidate);
        }
    }
    out
}

/// Build a chain from `leaf` to a trust anchor.
///
/// Returns the chain leaf-first, anchor last, or `None` when no path exists
/// within `max_depth` certificates.
pub(crate) fn build_chain<'a>(
    leaf: &'a Certificate,
    snapshot: &'a TrustStoreSnapshot,
    max_depth: usize,
) -> Option<Vec<&'a Certificate>> {
    if max_depth == 0 {
        return None;
    }

    // Zero intermediates: the leaf is itself a self-signed IssuerList entry.
    if snapshot.issuers().contains_der(leaf.der()) && leaf.is_self_signed() {
        return Some(vec![leaf]);
    }

    let mut budget = MAX_SIGNATURE_CHECKS;
    let mut path: Vec<Frame<'a>> = vec![Frame::new(leaf, snapshot)];

    loop {
        let (child, candidate) = {
            let Some(top) = path.last_mut() else {
                return None;
            };
            match top.candidates.get(top.next).copied() {
                Some(candidate) => {
                    top.next += 1;
                    (top.cert, candidate)
                }
                None => {
                    path.pop();
                    continue;
                }
            }
        };

        if path.len() >= max_depth {
            continue;
        }
        if path.iter().any(|f| f.cert.der() == candidate.der()) {
            continue;
        }
        if budget == 0 {
            return None;
        }
        budget -= 1;
        if !child.is_signed_by(candidate) {
            continue;
        }

        if candidate.is_self_signed() {
            let mut chain: Vec<&'a Certificate> = path.iter().map(|f| f.cert).collect();
            chain.push(candidate);
            return Some(chain);
        }

        // Only IssuerList entries may serve as intermediates.
        if snapshot.issuers().contains_der(candidate.der()) {
            path.push(Frame::new(candidate, snapshot));
        }
    }
}
