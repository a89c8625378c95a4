//! Secure-channel handshake coordination.
//!
//! A [`Handshake`] receives the peer certificate once, validates it against
//! the trust snapshot current at that moment, archives it when rejected and
//! reports the protocol status code. Archiving can run inline or on a
//! background worker so that disk latency stays out of the decision path.

use crate::archive::{ArchiveOutcome, RejectedArchive};
use crate::certificate::MAX_CERTIFICATE_BYTES;
use crate::identity::NetworkIdentity;
use crate::status::StatusCode;
use crate::thumbprint::{thumbprint, Thumbprint};
use crate::trust_store::TrustStore;
use crate::validator::{ChainValidator, ValidationResult};
use crate::PkiError;
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Message security requested for the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Unsecured exchange such as endpoint discovery; no certificate check.
    None,
    Sign,
    SignAndEncrypt,
}

/// Lifecycle of a single handshake. `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingCandidate,
    Validating,
    Accepted,
    Rejected,
}

/// When rejected certificates are written to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveMode {
    /// Before `submit` returns.
    #[default]
    Inline,
    /// On a worker thread; see [`HandshakeCoordinator::flush`].
    Background,
}

/// What happened to the rejected certificate. Never affects the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// The handshake was accepted.
    NotRequired,
    /// No archive is configured.
    Disabled,
    /// The input was empty or too large to be a certificate.
    Skipped,
    Stored(Thumbprint),
    AlreadyPresent(Thumbprint),
    /// Handed to the background worker.
    Queued(Thumbprint),
    Failed(String),
}

impl From<ArchiveOutcome> for ArchiveStatus {
    fn from(outcome: ArchiveOutcome) -> Self {
        match outcome {
            ArchiveOutcome::Stored(tp) => ArchiveStatus::Stored(tp),
            ArchiveOutcome::AlreadyPresent(tp) => ArchiveStatus::AlreadyPresent(tp),
        }
    }
}

/// Result of submitting a candidate certificate.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub state: HandshakeState,
    pub result: ValidationResult,
    pub status: StatusCode,
    pub archive: ArchiveStatus,
}

impl HandshakeOutcome {
    pub fn is_accepted(&self) -> bool {
        self.state == HandshakeState::Accepted
    }
}

type Pending = Arc<(Mutex<usize>, Condvar)>;

struct ArchiveWorker {
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    pending: Pending,
}

impl ArchiveWorker {
    fn spawn(archive: Arc<RejectedArchive>) -> Result<Self, PkiError> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let pending: Pending = Arc::new((Mutex::new(0), Condvar::new()));
        let worker_pending = Arc::clone(&pending);

        let handle = std::thread::Builder::new()
            .name("uapki-archive".into())
            .spawn(move || {
                for der in rx {
                    if let Err(e) = archive.archive(&der) {
                        error!(thumbprint = %thumbprint(&der), error = %e, "failed to archive rejected certificate");
                    }
                    let (count, done) = &*worker_pending;
                    let mut count = count.lock();
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        done.notify_all();
                    }
                }
                debug!("archive worker stopped");
            })?;

        Ok(ArchiveWorker {
            tx: Some(tx),
            handle: Some(handle),
            pending,
        })
    }

    fn enqueue(&self, der: Vec<u8>) -> Result<(), String> {
        let Some(tx) = &self.tx else {
            return Err("archive worker stopped".into());
        };
        *self.pending.0.lock() += 1;
        tx.send(der).map_err(|_| {
            let mut count = self.pending.0.lock();
            *count = count.saturating_sub(1);
            "archive worker stopped".to_string()
        })
    }

    fn flush(&self) {
        let (count, done) = &*self.pending;
        let mut count = count.lock();
        while *count > 0 {
            done.wait(&mut count);
        }
    }
}

impl Drop for ArchiveWorker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("archive worker thread panicked");
            }
        }
    }
}

/// Shared entry point for handshakes: trust store, validator and archive.
pub struct HandshakeCoordinator {
    store: Arc<TrustStore>,
    validator: ChainValidator,
    archive: Option<Arc<RejectedArchive>>,
    worker: Option<ArchiveWorker>,
}

impl std::fmt::Debug for HandshakeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("store", &self.store)
            .field("validator", &self.validator)
            .field("archive", &self.archive.as_ref().map(|a| a.dir().to_path_buf()))
            .field("background", &self.worker.is_some())
            .finish()
    }
}

impl HandshakeCoordinator {
    /// A coordinator that does not archive rejected certificates.
    pub fn new(store: Arc<TrustStore>, validator: ChainValidator) -> Self {
        HandshakeCoordinator {
            store,
            validator,
            archive: None,
            worker: None,
        }
    }

    /// Archive rejected certificates into `archive`.
    pub fn with_archive(
        mut self,
        archive: RejectedArchive,
        mode: ArchiveMode,
    ) -> Result<Self, PkiError> {
        let archive = Arc::new(archive);
        self.worker = match mode {
            ArchiveMode::Inline => None,
            ArchiveMode::Background => Some(ArchiveWorker::spawn(Arc::clone(&archive))?),
        };
        self.archive = Some(archive);
        Ok(self)
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn validator(&self) -> &ChainValidator {
        &self.validator
    }

    pub fn archive(&self) -> Option<&RejectedArchive> {
        self.archive.as_deref()
    }

    /// Start a handshake awaiting the peer certificate.
    pub fn begin(&self, mode: SecurityMode, expected: Option<NetworkIdentity>) -> Handshake<'_> {
        Handshake {
            coordinator: self,
            mode,
            expected,
            state: HandshakeState::AwaitingCandidate,
        }
    }

    /// Block until every queued background archive write has finished.
    /// Returns immediately in inline mode.
    pub fn flush(&self) {
        if let Some(worker) = &self.worker {
            worker.flush();
        }
    }

    fn archive_rejected(&self, der: &[u8]) -> ArchiveStatus {
        let Some(archive) = &self.archive else {
            return ArchiveStatus::Disabled;
        };
        if der.is_empty() || der.len() > MAX_CERTIFICATE_BYTES {
            return ArchiveStatus::Skipped;
        }
        let tp = thumbprint(der);
        match &self.worker {
            Some(worker) => match worker.enqueue(der.to_vec()) {
                Ok(()) => ArchiveStatus::Queued(tp),
                Err(e) => {
                    error!(thumbprint = %tp, error = %e, "failed to queue rejected certificate");
                    ArchiveStatus::Failed(e)
                }
            },
            None => match archive.archive(der) {
                Ok(outcome) => outcome.into(),
                Err(e) => {
                    error!(thumbprint = %tp, error = %e, "failed to archive rejected certificate");
                    ArchiveStatus::Failed(e.to_string())
                }
            },
        }
    }
}

/// One in-progress handshake.
#[derive(Debug)]
pub struct Handshake<'c> {
    coordinator: &'c HandshakeCoordinator,
    mode: SecurityMode,
    expected: Option<NetworkIdentity>,
    state: HandshakeState,
}

impl Handshake<'_> {
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.mode
    }

    /// Validate the peer certificate. Consumes the handshake: a decision is
    /// made exactly once.
    pub fn submit(mut self, candidate_der: &[u8]) -> HandshakeOutcome {
        if self.mode == SecurityMode::None {
            debug!("unsecured exchange; certificate not validated");
            return HandshakeOutcome {
                state: HandshakeState::Accepted,
                result: ValidationResult::Accept { chain: Vec::new() },
                status: StatusCode::GOOD,
                archive: ArchiveStatus::NotRequired,
            };
        }

        self.state = HandshakeState::Validating;
        let snapshot = self.coordinator.store.snapshot();
        let result =
            self.coordinator
                .validator
                .validate(candidate_der, &snapshot, self.expected.as_ref());
        let status = result.status_code();

        let archive = match result.rejection() {
            None => {
                self.state = HandshakeState::Accepted;
                ArchiveStatus::NotRequired
            }
            Some(rejection) => {
                self.state = HandshakeState::Rejected;
                warn!(
                    thumbprint = %thumbprint(candidate_der),
                    reason = %rejection.reason,
                    status = %status,
                    detail = %rejection.detail,
                    "peer certificate rejected"
                );
                self.coordinator.archive_rejected(candidate_der)
            }
        };

        HandshakeOutcome {
            state: self.state,
            result,
            status,
            archive,
        }
    }
}
