#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Trust store loading, fail-closed reloads, snapshot isolation and watching.

mod common;

use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uapki_lib::*;

fn dir_source(root: &std::path::Path) -> TrustSource {
    TrustSource {
        trusted: CertSource::Directory(root.join("trusted")),
        issuers: CertSource::Directory(root.join("issuers")),
        revocation: RevocationSource::Directory(root.join("crl")),
    }
}

fn make_dirs(root: &std::path::Path) {
    for d in ["trusted", "issuers", "crl"] {
        std::fs::create_dir_all(root.join(d)).unwrap();
    }
}

#[test]
fn loads_der_and_pem_bundles_and_skips_noise() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    let b = self_signed_leaf("plc-b", 2, &server_sans());
    let c = self_signed_leaf("plc-c", 3, &server_sans());
    let trusted = tmp.path().join("trusted");

    write_file(&trusted, "a.der", &a.der());
    let bundle = format!("{}{}", der_to_pem(&b.der()), der_to_pem(&c.der()));
    write_file(&trusted, "bundle.pem", bundle.as_bytes());
    write_file(&trusted, "README.txt", b"not a certificate");
    write_file(&trusted, ".hidden.der", b"garbage");
    std::fs::create_dir_all(trusted.join("subdir.der")).unwrap();

    let store = TrustStore::from_source(&dir_source(tmp.path())).unwrap();
    let snap = store.snapshot();
    assert_eq!(snap.trusted().len(), 3);
    assert!(snap.trusted().contains_der(&a.der()));
    assert!(snap.trusted().contains_der(&c.der()));
    assert!(snap.trusted().contains_thumbprint(&thumbprint(&b.der())));
    assert_eq!(snap.generation(), 1);
}

#[test]
fn duplicate_certificates_are_stored_once() {
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    let source = TrustSource {
        trusted: CertSource::Memory(vec![a.der(), der_to_pem(&a.der()).into_bytes()]),
        ..TrustSource::default()
    };
    assert_eq!(source.load().unwrap().trusted().len(), 1);
}

#[test]
fn malformed_file_fails_reload_and_keeps_previous_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    write_file(&tmp.path().join("trusted"), "a.der", &a.der());

    let source = dir_source(tmp.path());
    let store = TrustStore::from_source(&source).unwrap();
    assert_eq!(store.snapshot().generation(), 1);

    let b = self_signed_leaf("plc-b", 2, &server_sans());
    write_file(&tmp.path().join("trusted"), "b.der", &b.der());
    write_file(&tmp.path().join("trusted"), "broken.der", b"\x30\x82\x00");

    let err = store.reload(&source).unwrap_err();
    assert!(matches!(err, PkiError::Config(_)));
    assert!(err.to_string().contains("broken.der"));

    let snap = store.snapshot();
    assert_eq!(snap.generation(), 1);
    assert!(snap.trusted().contains_der(&a.der()));
    assert!(!snap.trusted().contains_der(&b.der()));
}

fn without_end_line(pem: &str) -> String {
    pem.lines()
        .filter(|l| !l.starts_with("-----END"))
        .map(|l| format!("{l}\n"))
        .collect()
}

fn crl_pem(der: &[u8]) -> String {
    use base64::Engine;
    format!(
        "-----BEGIN X509 CRL-----\n{}\n-----END X509 CRL-----\n",
        base64::engine::general_purpose::STANDARD.encode(der)
    )
}

#[test]
fn truncated_block_in_cert_bundle_fails_reload() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    let b = self_signed_leaf("plc-b", 2, &server_sans());
    let trusted = tmp.path().join("trusted");
    write_file(&trusted, "a.der", &a.der());

    let source = dir_source(tmp.path());
    let store = TrustStore::from_source(&source).unwrap();

    let bundle = format!(
        "{}{}",
        der_to_pem(&a.der()),
        without_end_line(&der_to_pem(&b.der()))
    );
    write_file(&trusted, "bundle.pem", bundle.as_bytes());

    let err = store.reload(&source).unwrap_err();
    assert!(matches!(err, PkiError::Config(_)));
    assert!(err.to_string().contains("bundle.pem"));
    assert_eq!(store.snapshot().generation(), 1);
}

#[test]
fn truncated_block_in_crl_bundle_fails_reload() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let root = root_ca("Test Root");
    write_file(&tmp.path().join("issuers"), "root.der", &root.der());
    let bundle = format!(
        "{}{}",
        crl_pem(&crl(&root, &[41])),
        without_end_line(&crl_pem(&crl(&root, &[42])))
    );
    write_file(&tmp.path().join("crl"), "root.pem", bundle.as_bytes());

    let err = TrustStore::from_source(&dir_source(tmp.path())).unwrap_err();
    assert!(matches!(err, PkiError::Config(_)));
    assert!(err.to_string().contains("root.pem"));
}

#[test]
fn missing_directory_is_a_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = TrustStore::from_source(&dir_source(tmp.path())).unwrap_err();
    assert!(matches!(err, PkiError::Config(_)));
}

#[test]
fn crl_directory_is_loaded_and_verified() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let root = root_ca("Test Root");
    let leaf = leaf_signed_by("plc-1", 42, &server_sans(), &root);
    write_file(&tmp.path().join("issuers"), "root.der", &root.der());
    write_file(&tmp.path().join("crl"), "root.crl", &crl(&root, &[42, 43]));

    let store = TrustStore::from_source(&dir_source(tmp.path())).unwrap();
    let snap = store.snapshot();
    assert_eq!(snap.revocation().len(), 2);
    let cert = Certificate::from_der(&leaf.der()).unwrap();
    assert!(snap.revocation().is_revoked(&cert));
}

#[test]
fn crl_with_bad_signature_fails_reload() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let root = root_ca("Test Root");
    let impostor = root_ca("Test Root");
    write_file(&tmp.path().join("issuers"), "root.der", &root.der());
    write_file(&tmp.path().join("crl"), "forged.crl", &crl(&impostor, &[42]));

    let err = TrustStore::from_source(&dir_source(tmp.path())).unwrap_err();
    assert!(matches!(err, PkiError::Config(_)));
    assert!(err.to_string().contains("forged.crl"));
}

#[test]
fn crl_from_unknown_issuer_is_accepted() {
    let stranger = root_ca("Unknown Root");
    let source = TrustSource {
        revocation: RevocationSource::Memory {
            crls: vec![crl(&stranger, &[9])],
            entries: vec![],
        },
        ..TrustSource::default()
    };
    assert_eq!(source.load().unwrap().revocation().len(), 1);
}

#[test]
fn pem_crl_is_accepted() {
    let root = root_ca("Test Root");
    let pem = crl_pem(&crl(&root, &[42]));
    let source = TrustSource {
        issuers: CertSource::Memory(vec![root.der()]),
        revocation: RevocationSource::Memory {
            crls: vec![pem.into_bytes()],
            entries: vec![],
        },
        ..TrustSource::default()
    };
    assert_eq!(source.load().unwrap().revocation().len(), 1);
}

#[test]
fn held_snapshot_is_isolated_from_reload() {
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    let b = self_signed_leaf("plc-b", 2, &server_sans());
    let source_a = TrustSource {
        trusted: CertSource::Memory(vec![a.der()]),
        ..TrustSource::default()
    };
    let source_b = TrustSource {
        trusted: CertSource::Memory(vec![b.der()]),
        ..TrustSource::default()
    };

    let store = TrustStore::from_source(&source_a).unwrap();
    let held = store.snapshot();
    store.reload(&source_b).unwrap();

    let validator = ChainValidator::default();
    assert!(validator.validate(&a.der(), &held, None).is_accept());
    assert!(!validator.validate(&b.der(), &held, None).is_accept());

    let fresh = store.snapshot();
    assert_eq!(fresh.generation(), held.generation() + 1);
    assert!(validator.validate(&b.der(), &fresh, None).is_accept());
    assert!(!validator.validate(&a.der(), &fresh, None).is_accept());
}

#[test]
fn concurrent_reloads_never_expose_a_mixed_view() {
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    let b = self_signed_leaf("plc-b", 2, &server_sans());
    let (a_der, b_der) = (a.der(), b.der());
    // Each source trusts exactly one of the two certificates.
    let sources = [
        TrustSource {
            trusted: CertSource::Memory(vec![a_der.clone()]),
            issuers: CertSource::Memory(vec![a_der.clone()]),
            ..TrustSource::default()
        },
        TrustSource {
            trusted: CertSource::Memory(vec![b_der.clone()]),
            issuers: CertSource::Memory(vec![b_der.clone()]),
            ..TrustSource::default()
        },
    ];
    let store = Arc::new(TrustStore::from_source(&sources[0]).unwrap());
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            let (a_der, b_der) = (a_der.clone(), b_der.clone());
            std::thread::spawn(move || {
                let validator = ChainValidator::default();
                let mut checked = 0u32;
                while !stop.load(Ordering::Relaxed) || checked == 0 {
                    let snap = store.snapshot();
                    let trusts_a = snap.trusted().contains_der(&a_der);
                    let trusts_b = snap.trusted().contains_der(&b_der);
                    assert!(trusts_a ^ trusts_b);
                    // Both lists always come from the same source.
                    assert_eq!(snap.issuers().contains_der(&a_der), trusts_a);
                    let accepted = validator.validate(&a_der, &snap, None).is_accept();
                    assert_eq!(accepted, trusts_a);
                    checked += 1;
                }
            })
        })
        .collect();

    for i in 0..50 {
        store.reload(&sources[i % 2]).unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.snapshot().generation(), 51);
}

#[test]
fn watcher_picks_up_new_trusted_file() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let source = dir_source(tmp.path());
    let store = Arc::new(TrustStore::from_source(&source).unwrap());
    let watcher = store.watch(source, Duration::from_millis(20)).unwrap();

    let a = self_signed_leaf("plc-a", 1, &server_sans());
    write_file(&tmp.path().join("trusted"), "a.der", &a.der());

    let deadline = Instant::now() + Duration::from_secs(10);
    while !store.snapshot().trusted().contains_der(&a.der()) {
        assert!(Instant::now() < deadline, "watcher did not reload");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(store.snapshot().generation() >= 2);
    watcher.stop();
}

#[test]
fn watcher_keeps_snapshot_when_reload_fails() {
    let tmp = tempfile::tempdir().unwrap();
    make_dirs(tmp.path());
    let a = self_signed_leaf("plc-a", 1, &server_sans());
    write_file(&tmp.path().join("trusted"), "a.der", &a.der());
    let source = dir_source(tmp.path());
    let store = Arc::new(TrustStore::from_source(&source).unwrap());
    let watcher = store.watch(source, Duration::from_millis(20)).unwrap();

    write_file(&tmp.path().join("trusted"), "broken.der", b"garbage");
    std::thread::sleep(Duration::from_millis(300));
    drop(watcher);

    let snap = store.snapshot();
    assert_eq!(snap.generation(), 1);
    assert!(snap.trusted().contains_der(&a.der()));
}
