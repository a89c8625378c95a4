//! OPC UA status codes reported to the secure-channel peer.

use serde::Serialize;
use std::fmt;

/// A 32-bit OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const BAD_CERTIFICATE_INVALID: StatusCode = StatusCode(0x8012_0000);
    pub const BAD_CERTIFICATE_TIME_INVALID: StatusCode = StatusCode(0x8014_0000);
    pub const BAD_CERTIFICATE_HOST_NAME_INVALID: StatusCode = StatusCode(0x8016_0000);
    pub const BAD_CERTIFICATE_URI_INVALID: StatusCode = StatusCode(0x8017_0000);
    pub const BAD_CERTIFICATE_UNTRUSTED: StatusCode = StatusCode(0x801A_0000);
    pub const BAD_CERTIFICATE_REVOKED: StatusCode = StatusCode(0x801D_0000);

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Symbolic name, or `None` for codes this crate never produces.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::GOOD => "Good",
            Self::BAD_CERTIFICATE_INVALID => "BadCertificateInvalid",
            Self::BAD_CERTIFICATE_TIME_INVALID => "BadCertificateTimeInvalid",
            Self::BAD_CERTIFICATE_HOST_NAME_INVALID => "BadCertificateHostNameInvalid",
            Self::BAD_CERTIFICATE_URI_INVALID => "BadCertificateUriInvalid",
            Self::BAD_CERTIFICATE_UNTRUSTED => "BadCertificateUntrusted",
            Self::BAD_CERTIFICATE_REVOKED => "BadCertificateRevoked",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_name_and_value() {
        assert_eq!(
            StatusCode::BAD_CERTIFICATE_UNTRUSTED.to_string(),
            "BadCertificateUntrusted (0x801A0000)"
        );
        assert_eq!(StatusCode(0x8001_0000).to_string(), "0x80010000");
    }

    #[test]
    fn severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::BAD_CERTIFICATE_REVOKED.is_bad());
    }
}
