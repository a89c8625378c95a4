//! Certificate thumbprints and the storage keys derived from them.
//!
//! A thumbprint is the SHA-1 digest of a certificate's exact DER bytes. It
//! identifies a certificate on disk (rejected-certificate archive) and in
//! trust-list lookups. Thumbprinting never parses the certificate, so it also
//! works for material that later turns out to be malformed.

use crate::util;
use digest::Digest;
use std::fmt;

/// Length of a SHA-1 thumbprint in bytes.
pub const THUMBPRINT_LEN: usize = 20;

/// Digest algorithm for display fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = crate::PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(crate::PkiError::Config(format!(
                "unsupported digest algorithm: {}",
                other
            ))),
        }
    }
}

/// SHA-1 digest of a certificate's DER encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thumbprint([u8; THUMBPRINT_LEN]);

impl Thumbprint {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; THUMBPRINT_LEN] {
        &self.0
    }

    /// Parse a storage key (40 hex characters, any case) back into a thumbprint.
    ///
    /// Returns `None` for anything that is not exactly one SHA-1 digest.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        if key.len() != THUMBPRINT_LEN * 2 {
            return None;
        }
        let bytes = hex::decode(key).ok()?;
        let digest: [u8; THUMBPRINT_LEN] = bytes.try_into().ok()?;
        Some(Thumbprint(digest))
    }
}

impl From<[u8; THUMBPRINT_LEN]> for Thumbprint {
    fn from(digest: [u8; THUMBPRINT_LEN]) -> Self {
        Thumbprint(digest)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&storage_key(self))
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", storage_key(self))
    }
}

/// Compute the thumbprint of DER-encoded certificate bytes.
pub fn thumbprint(der_bytes: &[u8]) -> Thumbprint {
    let digest = sha1::Sha1::digest(der_bytes);
    let mut out = [0u8; THUMBPRINT_LEN];
    out.copy_from_slice(&digest);
    Thumbprint(out)
}

/// Render a thumbprint as an uppercase hexadecimal file-name-safe key.
pub fn storage_key(digest: &Thumbprint) -> String {
    hex::encode_upper(digest.0)
}

/// Compute a display fingerprint of DER-encoded certificate bytes.
///
/// Returns a colon-separated uppercase hex string (e.g., "AB:CD:EF:...").
pub fn compute_fingerprint(der_bytes: &[u8], algorithm: DigestAlgorithm) -> String {
    let hash_bytes: Vec<u8> = match algorithm {
        DigestAlgorithm::Sha1 => sha1::Sha1::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha256 => sha2::Sha256::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha384 => sha2::Sha384::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha512 => sha2::Sha512::digest(der_bytes).to_vec(),
    };
    util::hex_colon_upper(&hash_bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sha1_of_known_input() {
        // SHA-1("abc")
        let tp = thumbprint(b"abc");
        assert_eq!(
            storage_key(&tp),
            "A9993E364706816ABA3E25717850C26C9CD0D89D"
        );
    }

    #[test]
    fn storage_key_round_trips_through_parse() {
        let tp = thumbprint(b"\x30\x03\x02\x01\x00");
        let key = storage_key(&tp);
        assert_eq!(Thumbprint::from_storage_key(&key), Some(tp));
        assert_eq!(
            Thumbprint::from_storage_key(&key.to_ascii_lowercase()),
            Some(tp)
        );
    }

    #[test]
    fn rejects_non_digest_keys() {
        assert_eq!(Thumbprint::from_storage_key(""), None);
        assert_eq!(Thumbprint::from_storage_key("ABCD"), None);
        assert_eq!(
            Thumbprint::from_storage_key("ZZ993E364706816ABA3E25717850C26C9CD0D89D"),
            None
        );
    }

    #[test]
    fn storage_key_is_file_name_safe() {
        let key = storage_key(&thumbprint(b"anything at all"));
        assert_eq!(key.len(), 40);
        assert!(key
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn colon_fingerprint_sha256_length() {
        let fp = compute_fingerprint(b"abc", DigestAlgorithm::Sha256);
        assert_eq!(fp.split(':').count(), 32);
        assert!(fp.starts_with("BA:78:16:BF"));
    }

    #[test]
    fn digest_algorithm_from_str() {
        assert_eq!(
            "SHA256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
