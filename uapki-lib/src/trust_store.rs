//! Trust store: trusted leaves, issuer authorities and revocation entries.
//!
//! The active state is an immutable [`TrustStoreSnapshot`] behind an
//! [`ArcSwap`]. A reload builds a complete replacement and swaps it in, so a
//! validation that already holds a snapshot keeps seeing exactly the lists it
//! started with. Reloads fail closed: one unreadable or malformed file aborts
//! the whole reload and the previous snapshot stays active.

use crate::certificate::Certificate;
use crate::pem;
use crate::revocation::{RevocationList, RevokedSerial};
use crate::thumbprint::{thumbprint, Thumbprint};
use crate::util;
use crate::PkiError;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Check if a file looks like a certificate file for trust list loading.
///
/// Matches `.der`, `.cer`, `.crt`, `.pem` extensions and OpenSSL hash-linked
/// files (`XXXXXXXX.N` where the extension is a single digit).
fn is_cert_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    matches!(ext.as_str(), "der" | "cer" | "crt" | "pem")
        || (ext.len() == 1 && ext.bytes().next().is_some_and(|b| b.is_ascii_digit()))
}

/// Check if a file looks like a CRL file.
fn is_crl_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    matches!(ext.to_ascii_lowercase().as_str(), "crl" | "der" | "pem")
}

/// A set of certificates indexed by raw subject name and by thumbprint.
#[derive(Debug, Clone, Default)]
pub struct CertificateSet {
    certs: Vec<Certificate>,
    by_subject: HashMap<Vec<u8>, Vec<usize>>,
    by_thumbprint: HashMap<Thumbprint, usize>,
}

impl CertificateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. Byte-identical duplicates are ignored.
    ///
    /// Returns `true` when the certificate was new.
    pub fn insert(&mut self, cert: Certificate) -> bool {
        if self.contains_der(cert.der()) {
            return false;
        }
        let idx = self.certs.len();
        self.by_subject
            .entry(cert.subject_raw().to_vec())
            .or_default()
            .push(idx);
        self.by_thumbprint.insert(cert.thumbprint(), idx);
        self.certs.push(cert);
        true
    }

    /// Exact byte-equality membership. The thumbprint only narrows the
    /// search; the bytes decide.
    pub fn contains_der(&self, der: &[u8]) -> bool {
        self.get_by_thumbprint(&thumbprint(der))
            .is_some_and(|c| c.der() == der)
    }

    /// Membership by thumbprint.
    pub fn contains_thumbprint(&self, tp: &Thumbprint) -> bool {
        self.by_thumbprint.contains_key(tp)
    }

    pub fn get_by_thumbprint(&self, tp: &Thumbprint) -> Option<&Certificate> {
        self.by_thumbprint.get(tp).and_then(|&i| self.certs.get(i))
    }

    /// Certificates whose subject name equals `subject_raw`.
    pub fn find_by_subject_raw<'a>(
        &'a self,
        subject_raw: &[u8],
    ) -> impl Iterator<Item = &'a Certificate> + 'a {
        self.by_subject
            .get(subject_raw)
            .into_iter()
            .flatten()
            .filter_map(move |&i| self.certs.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs.iter()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// An immutable view of the trust configuration, valid for the duration of
/// any number of validation calls.
#[derive(Debug, Clone, Default)]
pub struct TrustStoreSnapshot {
    trusted: CertificateSet,
    issuers: CertificateSet,
    revocation: RevocationList,
    generation: u64,
}

impl TrustStoreSnapshot {
    /// A snapshot that trusts nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(
        trusted: CertificateSet,
        issuers: CertificateSet,
        revocation: RevocationList,
    ) -> Self {
        TrustStoreSnapshot {
            trusted,
            issuers,
            revocation,
            generation: 0,
        }
    }

    /// Certificates trusted as leaf endpoints.
    pub fn trusted(&self) -> &CertificateSet {
        &self.trusted
    }

    /// Certificates usable as authorities during chain building.
    pub fn issuers(&self) -> &CertificateSet {
        &self.issuers
    }

    pub fn revocation(&self) -> &RevocationList {
        &self.revocation
    }

    /// Reload counter; 0 for a snapshot never installed in a store.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Where one certificate list comes from.
#[derive(Debug, Clone, Default)]
pub enum CertSource {
    #[default]
    None,
    /// DER or PEM blobs held in memory.
    Memory(Vec<Vec<u8>>),
    /// A directory of `.der`, `.cer`, `.crt` or `.pem` files.
    Directory(PathBuf),
}

/// Where revocation information comes from.
#[derive(Debug, Clone, Default)]
pub enum RevocationSource {
    #[default]
    None,
    /// CRLs (DER or PEM) and explicit entries held in memory.
    Memory {
        crls: Vec<Vec<u8>>,
        entries: Vec<RevokedSerial>,
    },
    /// A directory of `.crl`, `.der` or `.pem` CRL files.
    Directory(PathBuf),
}

/// The complete, independently pluggable trust configuration.
#[derive(Debug, Clone, Default)]
pub struct TrustSource {
    pub trusted: CertSource,
    pub issuers: CertSource,
    pub revocation: RevocationSource,
}

impl TrustSource {
    /// Directories backing this source, for change watching.
    pub fn directories(&self) -> Vec<&Path> {
        let mut dirs = Vec::new();
        if let CertSource::Directory(p) = &self.trusted {
            dirs.push(p.as_path());
        }
        if let CertSource::Directory(p) = &self.issuers {
            dirs.push(p.as_path());
        }
        if let RevocationSource::Directory(p) = &self.revocation {
            dirs.push(p.as_path());
        }
        dirs
    }

    /// Read and parse everything. Any failure aborts the whole load.
    pub fn load(&self) -> Result<TrustStoreSnapshot, PkiError> {
        let trusted = load_cert_source(&self.trusted)?;
        let issuers = load_cert_source(&self.issuers)?;

        let authorities: Vec<&Certificate> = issuers.iter().chain(trusted.iter()).collect();
        let mut revocation = RevocationList::new();
        match &self.revocation {
            RevocationSource::None => {}
            RevocationSource::Memory { crls, entries } => {
                for (i, blob) in crls.iter().enumerate() {
                    add_crl_blob(&mut revocation, blob, &authorities)
                        .map_err(|e| PkiError::Config(format!("in-memory CRL #{}: {}", i, e)))?;
                }
                for entry in entries {
                    revocation.insert(entry.clone());
                }
            }
            RevocationSource::Directory(dir) => {
                for path in list_files(dir, is_crl_file)? {
                    let data = read_file(&path)?;
                    add_crl_blob(&mut revocation, &data, &authorities)
                        .map_err(|e| PkiError::Config(format!("{}: {}", path.display(), e)))?;
                }
            }
        }

        Ok(TrustStoreSnapshot::new(trusted, issuers, revocation))
    }
}

fn load_cert_source(source: &CertSource) -> Result<CertificateSet, PkiError> {
    let mut set = CertificateSet::new();
    match source {
        CertSource::None => {}
        CertSource::Memory(blobs) => {
            for (i, blob) in blobs.iter().enumerate() {
                add_cert_blob(&mut set, blob).map_err(|e| {
                    PkiError::Config(format!("in-memory certificate #{}: {}", i, e))
                })?;
            }
        }
        CertSource::Directory(dir) => {
            for path in list_files(dir, is_cert_file)? {
                let data = read_file(&path)?;
                add_cert_blob(&mut set, &data)
                    .map_err(|e| PkiError::Config(format!("{}: {}", path.display(), e)))?;
            }
        }
    }
    Ok(set)
}

/// Add one DER certificate or every certificate of a PEM bundle.
fn add_cert_blob(set: &mut CertificateSet, data: &[u8]) -> Result<(), PkiError> {
    if util::is_pem(data) {
        for der in pem::parse_pem_chain_strict(data)? {
            set.insert(Certificate::from_der(&der)?);
        }
    } else {
        set.insert(Certificate::from_der(data)?);
    }
    Ok(())
}

fn add_crl_blob(
    list: &mut RevocationList,
    data: &[u8],
    authorities: &[&Certificate],
) -> Result<(), PkiError> {
    if util::is_pem(data) {
        for der in pem::parse_pem_crls(data)? {
            list.add_crl_der(&der, authorities.iter().copied())?;
        }
    } else {
        list.add_crl_der(data, authorities.iter().copied())?;
    }
    Ok(())
}

/// Regular, non-hidden files in `dir` accepted by `filter`, sorted by name.
fn list_files(dir: &Path, filter: fn(&Path) -> bool) -> Result<Vec<PathBuf>, PkiError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PkiError::Config(format!("{}: {}", dir.display(), e)))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PkiError::Config(format!("{}: {}", dir.display(), e)))?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden || !path.is_file() {
            continue;
        }
        if filter(&path) {
            files.push(path);
        } else {
            debug!(path = %path.display(), "ignoring file with unrecognized extension");
        }
    }
    files.sort();
    Ok(files)
}

fn read_file(path: &Path) -> Result<Vec<u8>, PkiError> {
    std::fs::read(path).map_err(|e| PkiError::Config(format!("{}: {}", path.display(), e)))
}

/// Process-wide trust state with atomic, fail-closed reloads.
pub struct TrustStore {
    current: ArcSwap<TrustStoreSnapshot>,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("TrustStore")
            .field("generation", &snap.generation)
            .field("trusted", &snap.trusted.len())
            .field("issuers", &snap.issuers.len())
            .field("revoked", &snap.revocation.len())
            .finish()
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore {
    /// A store that trusts nothing until the first reload.
    pub fn new() -> Self {
        TrustStore {
            current: ArcSwap::from_pointee(TrustStoreSnapshot::empty()),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a store and perform the initial load.
    pub fn from_source(source: &TrustSource) -> Result<Self, PkiError> {
        let store = Self::new();
        store.reload(source)?;
        Ok(store)
    }

    /// The current immutable view.
    pub fn snapshot(&self) -> Arc<TrustStoreSnapshot> {
        self.current.load_full()
    }

    /// Replace the active snapshot with a freshly loaded one.
    ///
    /// Only one reload runs at a time. On error nothing changes.
    pub fn reload(&self, source: &TrustSource) -> Result<(), PkiError> {
        let _guard = self.reload_lock.lock();
        let previous_generation = self.current.load().generation;

        let mut next = match source.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    error = %e,
                    generation = previous_generation,
                    "trust store reload failed; keeping previous snapshot"
                );
                return Err(e);
            }
        };
        next.generation = previous_generation + 1;

        info!(
            generation = next.generation,
            trusted = next.trusted.len(),
            issuers = next.issuers.len(),
            revoked = next.revocation.len(),
            "trust store reloaded"
        );
        self.current.store(Arc::new(next));
        Ok(())
    }
}
