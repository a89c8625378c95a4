//! Polling watcher that reloads a [`TrustStore`] when its directories change.

use crate::trust_store::{TrustSource, TrustStore};
use crate::PkiError;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// One observed directory entry: name, size, modification time.
type EntryStamp = (PathBuf, u64, Option<SystemTime>);

/// Observed state of one directory; `None` when it cannot be read.
type DirStamp = Option<Vec<EntryStamp>>;

fn scan_dir(dir: &Path) -> DirStamp {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut stamps: Vec<EntryStamp> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let meta = entry.metadata().ok()?;
            meta.is_file()
                .then(|| (entry.path(), meta.len(), meta.modified().ok()))
        })
        .collect();
    stamps.sort();
    Some(stamps)
}

fn scan(dirs: &[PathBuf]) -> Vec<DirStamp> {
    dirs.iter().map(|d| scan_dir(d)).collect()
}

/// Handle to a running watcher thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct DirectoryWatcher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Stop polling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("trust store watcher thread panicked");
            }
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TrustStore {
    /// Poll `source`'s directories every `interval` and reload on change.
    ///
    /// A failed automatic reload is logged and the previous snapshot stays
    /// active; the next change triggers another attempt.
    pub fn watch(
        self: &Arc<Self>,
        source: TrustSource,
        interval: Duration,
    ) -> Result<DirectoryWatcher, PkiError> {
        let dirs: Vec<PathBuf> = source
            .directories()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        let store = Arc::clone(self);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        // Baseline taken before returning so no change after this call is missed.
        let mut last = scan(&dirs);

        let handle = std::thread::Builder::new()
            .name("uapki-trust-watch".into())
            .spawn(move || {
                if dirs.is_empty() {
                    debug!("no trust directories to watch");
                }
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let current = scan(&dirs);
                    if current == last {
                        continue;
                    }
                    info!("trust directories changed; reloading");
                    // Remember the new state even on failure so a broken file
                    // is reported once, not on every tick.
                    last = current;
                    if let Err(e) = store.reload(&source) {
                        warn!(error = %e, "automatic trust store reload failed");
                    }
                }
                debug!("trust store watcher stopped");
            })?;

        Ok(DirectoryWatcher {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}
