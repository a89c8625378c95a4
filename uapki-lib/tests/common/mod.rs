//! Certificate fixtures generated at test time.

#![allow(dead_code)]

use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, CertificateRevocationListParams, DnType,
    IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SanType,
    SerialNumber,
};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// A generated certificate with the key that signed it.
pub struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }
}

fn base_params(cn: &str, serial: u8) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, cn);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "uapki test");
    params.serial_number = Some(SerialNumber::from_slice(&[serial]));
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2090, 1, 1);
    params
}

fn ca_params(cn: &str, serial: u8) -> CertificateParams {
    let mut params = base_params(cn, serial);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

/// A self-signed root authority.
pub fn root_ca(cn: &str) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(cn, 1).self_signed(&key).unwrap();
    Issued { cert, key }
}

/// An intermediate authority signed by `issuer`.
pub fn intermediate_ca(cn: &str, serial: u8, issuer: &Issued) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(cn, serial)
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    Issued { cert, key }
}

/// Subject Alternative Names for an application instance certificate.
pub struct Sans<'a> {
    pub dns: &'a [&'a str],
    pub ips: &'a [IpAddr],
    pub uris: &'a [&'a str],
}

impl Sans<'_> {
    pub fn none() -> Sans<'static> {
        Sans {
            dns: &[],
            ips: &[],
            uris: &[],
        }
    }

    fn to_san_types(&self) -> Vec<SanType> {
        let mut out = Vec::new();
        for d in self.dns {
            out.push(SanType::DnsName((*d).try_into().unwrap()));
        }
        for ip in self.ips {
            out.push(SanType::IpAddress(*ip));
        }
        for u in self.uris {
            out.push(SanType::URI((*u).try_into().unwrap()));
        }
        out
    }
}

const SERVER_IPS: &[IpAddr] = &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))];

/// Default SANs of a test server.
pub fn server_sans() -> Sans<'static> {
    Sans {
        dns: &["plc-1.example"],
        ips: SERVER_IPS,
        uris: &["urn:example:plc-1"],
    }
}

fn leaf_params(cn: &str, serial: u8, sans: &Sans<'_>) -> CertificateParams {
    let mut params = base_params(cn, serial);
    params.subject_alt_names = sans.to_san_types();
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params
}

/// A self-signed application instance certificate, the usual OPC UA setup.
pub fn self_signed_leaf(cn: &str, serial: u8, sans: &Sans<'_>) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = leaf_params(cn, serial, sans).self_signed(&key).unwrap();
    Issued { cert, key }
}

/// A leaf certificate signed by `issuer`.
pub fn leaf_signed_by(cn: &str, serial: u8, sans: &Sans<'_>, issuer: &Issued) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = leaf_params(cn, serial, sans)
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    Issued { cert, key }
}

/// A self-signed leaf whose validity window ended in 2001.
pub fn expired_self_signed_leaf(cn: &str, sans: &Sans<'_>) -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = leaf_params(cn, 7, sans);
    params.not_before = date_time_ymd(2000, 1, 1);
    params.not_after = date_time_ymd(2001, 1, 1);
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// A CRL issued by `issuer` revoking the given serial numbers.
pub fn crl(issuer: &Issued, revoked_serials: &[u8]) -> Vec<u8> {
    let params = CertificateRevocationListParams {
        this_update: date_time_ymd(2024, 1, 1),
        next_update: date_time_ymd(2090, 1, 1),
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs: revoked_serials
            .iter()
            .map(|s| RevokedCertParams {
                serial_number: SerialNumber::from_slice(&[*s]),
                revocation_time: date_time_ymd(2024, 1, 1),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params
        .signed_by(&issuer.cert, &issuer.key)
        .unwrap()
        .der()
        .to_vec()
}

/// Write `data` to `dir/name`, creating `dir`.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), data).unwrap();
}
