//! Durable archive of rejected peer certificates.
//!
//! Each distinct certificate is stored once as `<dir>/<THUMBPRINT>.der`
//! holding the exact bytes the peer presented. Writes go through a temporary
//! file in the same directory that is synced and then renamed into place, so
//! readers never observe a partial record.

use crate::certificate::Certificate;
use crate::thumbprint::{storage_key, thumbprint, Thumbprint};
use crate::PkiError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const RECORD_EXTENSION: &str = "der";

/// Result of an archive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A new record was written.
    Stored(Thumbprint),
    /// An identical record already existed; nothing was written.
    AlreadyPresent(Thumbprint),
}

impl ArchiveOutcome {
    pub fn thumbprint(&self) -> Thumbprint {
        match self {
            ArchiveOutcome::Stored(tp) | ArchiveOutcome::AlreadyPresent(tp) => *tp,
        }
    }
}

/// A directory of rejected certificates keyed by thumbprint.
#[derive(Debug, Clone)]
pub struct RejectedArchive {
    dir: PathBuf,
}

impl RejectedArchive {
    /// Use `dir` as the archive, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PkiError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(RejectedArchive { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path for a thumbprint.
    pub fn path_for(&self, tp: &Thumbprint) -> PathBuf {
        self.dir
            .join(format!("{}.{}", storage_key(tp), RECORD_EXTENSION))
    }

    /// Store `der` unless an identical record is already present.
    pub fn archive(&self, der: &[u8]) -> Result<ArchiveOutcome, PkiError> {
        let tp = thumbprint(der);
        let path = self.path_for(&tp);

        if let Ok(existing) = std::fs::read(&path) {
            if existing == der {
                debug!(thumbprint = %tp, "rejected certificate already archived");
                return Ok(ArchiveOutcome::AlreadyPresent(tp));
            }
        }

        write_atomic(&self.dir, &path, der)?;
        info!(thumbprint = %tp, path = %path.display(), "archived rejected certificate");
        Ok(ArchiveOutcome::Stored(tp))
    }

    pub fn archive_certificate(&self, cert: &Certificate) -> Result<ArchiveOutcome, PkiError> {
        self.archive(cert.der())
    }

    pub fn contains(&self, tp: &Thumbprint) -> bool {
        self.path_for(tp).is_file()
    }

    /// Bytes of an archived record.
    pub fn load(&self, tp: &Thumbprint) -> Result<Vec<u8>, PkiError> {
        Ok(std::fs::read(self.path_for(tp))?)
    }

    /// Thumbprints of all records, sorted. Files that are not records are
    /// skipped.
    pub fn list(&self) -> Result<Vec<Thumbprint>, PkiError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(tp) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Thumbprint::from_storage_key)
            {
                out.push(tp);
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn remove(&self, tp: &Thumbprint) -> Result<(), PkiError> {
        std::fs::remove_file(self.path_for(tp))?;
        info!(thumbprint = %tp, "removed rejected certificate");
        Ok(())
    }

    /// Move a rejected record into a trusted-certificate directory.
    ///
    /// The copy is written atomically before the record is removed, so a
    /// crash in between leaves the certificate in both places, never in
    /// neither. Returns the path of the new trusted file.
    pub fn approve(&self, tp: &Thumbprint, trusted_dir: &Path) -> Result<PathBuf, PkiError> {
        let der = self.load(tp)?;
        std::fs::create_dir_all(trusted_dir)?;
        let target = trusted_dir.join(format!("{}.{}", storage_key(tp), RECORD_EXTENSION));
        write_atomic(trusted_dir, &target, &der)?;
        self.remove(tp)?;
        info!(thumbprint = %tp, path = %target.display(), "approved rejected certificate");
        Ok(target)
    }
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> Result<(), PkiError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| PkiError::Io(e.error))?;
    Ok(())
}
