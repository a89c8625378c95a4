#![no_main]

use libfuzzer_sys::fuzz_target;
use uapki_lib::{
    thumbprint, Certificate, ChainValidator, NetworkIdentity, RejectReason, TrustStoreSnapshot,
};

fuzz_target!(|data: &[u8]| {
    // Thumbprinting never parses, so it must accept anything.
    let _ = thumbprint(data);

    // Parsing and validation must never panic, regardless of input.
    if let Ok(cert) = Certificate::parse(data) {
        let _ = cert.serial_hex();
        let _ = cert.is_self_signed();
        let _ = NetworkIdentity::host("example.com").matches(&cert);
    }

    let snapshot = TrustStoreSnapshot::empty();
    let identity = NetworkIdentity::host("10.0.0.5");
    let result = ChainValidator::default().validate(data, &snapshot, Some(&identity));

    // An empty snapshot trusts nothing.
    assert!(matches!(
        result.reason(),
        Some(RejectReason::Malformed) | Some(RejectReason::Untrusted)
    ));
});
