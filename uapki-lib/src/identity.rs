//! Expected peer identities and Subject Alternative Name matching.

use crate::certificate::{Certificate, SanEntry};
use crate::PkiError;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// The kind of identity a certificate is bound against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Dns,
    Ip,
    ApplicationUri,
}

/// The identity a peer certificate is expected to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkIdentity {
    /// A host name, matched against SAN dNSName entries.
    Dns(String),
    /// An address, matched against SAN iPAddress entries.
    Ip(IpAddr),
    /// An application URI, matched against SAN URI entries.
    ApplicationUri(String),
}

impl NetworkIdentity {
    pub fn kind(&self) -> IdentityKind {
        match self {
            NetworkIdentity::Dns(_) => IdentityKind::Dns,
            NetworkIdentity::Ip(_) => IdentityKind::Ip,
            NetworkIdentity::ApplicationUri(_) => IdentityKind::ApplicationUri,
        }
    }

    /// Host identity from a bare host string: an IP literal (brackets
    /// allowed for IPv6) becomes [`NetworkIdentity::Ip`], anything else a
    /// DNS name.
    pub fn host(host: &str) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => NetworkIdentity::Ip(ip),
            Err(_) => NetworkIdentity::Dns(host.to_string()),
        }
    }

    /// Derive the expected host identity from an endpoint URL such as
    /// `opc.tcp://10.0.0.5:4840/server`.
    pub fn from_endpoint_url(endpoint: &str) -> Result<Self, PkiError> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| PkiError::Config(format!("invalid endpoint URL {}: {}", endpoint, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PkiError::Config(format!("endpoint URL {} has no host", endpoint)))?;
        Ok(Self::host(host))
    }

    /// Whether any SAN entry of the matching kind equals this identity.
    pub fn matches(&self, cert: &Certificate) -> bool {
        cert.subject_alt_names()
            .iter()
            .any(|entry| match (self, entry) {
                (NetworkIdentity::Dns(expected), SanEntry::Dns(name)) => {
                    dns_names_equal(expected, name)
                }
                (NetworkIdentity::Ip(expected), SanEntry::Ip(ip)) => expected == ip,
                (NetworkIdentity::ApplicationUri(expected), SanEntry::Uri(uri)) => expected == uri,
                _ => false,
            })
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkIdentity::Dns(name) => write!(f, "DNS:{}", name),
            NetworkIdentity::Ip(ip) => write!(f, "IP:{}", ip),
            NetworkIdentity::ApplicationUri(uri) => write!(f, "URI:{}", uri),
        }
    }
}

/// DNS names compare case-insensitively; a single trailing dot is ignored.
fn dns_names_equal(a: &str, b: &str) -> bool {
    let a = a.strip_suffix('.').unwrap_or(a);
    let b = b.strip_suffix('.').unwrap_or(b);
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}
