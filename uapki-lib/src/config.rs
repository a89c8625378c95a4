//! TOML configuration and construction of the runtime objects.
//!
//! ```toml
//! [trust]
//! trusted = "pki/trusted"
//! issuers = "pki/issuers"
//! revocation = "pki/crl"
//! watch = false
//! watch_interval_ms = 1000
//!
//! [validation]
//! max_chain_depth = 10
//! check_time = true
//!
//! [archive]
//! rejected = "pki/rejected"
//! background = false
//! ```
//!
//! Every section and key is optional. Relative paths in a file loaded with
//! [`PkiConfig::from_file`] resolve against that file's directory.

use crate::archive::RejectedArchive;
use crate::chain::DEFAULT_MAX_CHAIN_DEPTH;
use crate::handshake::{ArchiveMode, HandshakeCoordinator};
use crate::trust_store::{CertSource, RevocationSource, TrustSource, TrustStore};
use crate::validator::{ChainValidator, ValidatorOptions};
use crate::watch::DirectoryWatcher;
use crate::PkiError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PkiConfig {
    pub trust: TrustConfig,
    pub validation: ValidationConfig,
    pub archive: ArchiveConfig,
}

/// Trust list locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    pub trusted: Option<PathBuf>,
    pub issuers: Option<PathBuf>,
    pub revocation: Option<PathBuf>,
    pub watch: bool,
    pub watch_interval_ms: u64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted: None,
            issuers: None,
            revocation: None,
            watch: false,
            watch_interval_ms: 1000,
        }
    }
}

/// Validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub max_chain_depth: usize,
    pub check_time: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            check_time: true,
        }
    }
}

/// Rejected certificate archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub rejected: Option<PathBuf>,
    pub background: bool,
}

impl PkiConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PkiError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PkiError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse configuration from TOML text. Paths are kept as written.
    pub fn from_toml(contents: &str) -> Result<Self, PkiError> {
        let config: PkiConfig = toml::from_str(contents)?;
        if config.validation.max_chain_depth == 0 {
            return Err(PkiError::Config(
                "validation.max_chain_depth must be at least 1".into(),
            ));
        }
        if config.trust.watch && config.trust.watch_interval_ms == 0 {
            return Err(PkiError::Config(
                "trust.watch_interval_ms must be positive".into(),
            ));
        }
        Ok(config)
    }

    /// Make relative paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let slots = [
            &mut self.trust.trusted,
            &mut self.trust.issuers,
            &mut self.trust.revocation,
            &mut self.archive.rejected,
        ];
        for slot in slots {
            if let Some(p) = slot.as_mut() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
    }

    pub fn trust_source(&self) -> TrustSource {
        TrustSource {
            trusted: self
                .trust
                .trusted
                .clone()
                .map_or(CertSource::None, CertSource::Directory),
            issuers: self
                .trust
                .issuers
                .clone()
                .map_or(CertSource::None, CertSource::Directory),
            revocation: self
                .trust
                .revocation
                .clone()
                .map_or(RevocationSource::None, RevocationSource::Directory),
        }
    }

    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            max_chain_depth: self.validation.max_chain_depth,
            check_time: self.validation.check_time,
            at_time: None,
        }
    }

    /// The configured archive, or `None` when archiving is off.
    pub fn archive(&self) -> Result<Option<RejectedArchive>, PkiError> {
        self.archive
            .rejected
            .as_ref()
            .map(|dir| RejectedArchive::new(dir.clone()))
            .transpose()
    }

    pub fn archive_mode(&self) -> ArchiveMode {
        if self.archive.background {
            ArchiveMode::Background
        } else {
            ArchiveMode::Inline
        }
    }

    /// Load the trust store and build a coordinator around it.
    pub fn coordinator(&self, options: ValidatorOptions) -> Result<HandshakeCoordinator, PkiError> {
        let store = Arc::new(TrustStore::from_source(&self.trust_source())?);
        let coordinator = HandshakeCoordinator::new(store, ChainValidator::new(options));
        match self.archive()? {
            Some(archive) => coordinator.with_archive(archive, self.archive_mode()),
            None => Ok(coordinator),
        }
    }

    /// Start the directory watcher for `store` when `trust.watch` is set.
    pub fn watcher(&self, store: &Arc<TrustStore>) -> Result<Option<DirectoryWatcher>, PkiError> {
        if !self.trust.watch {
            return Ok(None);
        }
        let interval = Duration::from_millis(self.trust.watch_interval_ms);
        store.watch(self.trust_source(), interval).map(Some)
    }
}
