//! Filesystem watch bridge
//!
//! Watches the workspace roots and forwards debounced batches of catalog
//! [`WatchEvent`]s for Go test files and directories.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gosuite_core::catalog::WatchEvent;
use gosuite_core::error::{SuiteError, SuiteResult};
use gosuite_core::scan;

/// Poll interval when no events are available
const POLL_MILLIS: u64 = 50;

/// Capacity of the batch channel
const BATCH_CAPACITY: usize = 64;

/// Convert a notify Event to catalog watch events.
///
/// Renames become a delete of the old path and a create of the new one.
fn convert_event(event: &Event) -> Vec<WatchEvent> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| WatchEvent::Created(p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Metadata(_)) => event
            .paths
            .iter()
            .map(|p| WatchEvent::Changed(p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if event.paths.len() >= 2 {
                vec![
                    WatchEvent::Deleted(event.paths[0].clone()),
                    WatchEvent::Created(event.paths[1].clone()),
                ]
            } else {
                vec![]
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| WatchEvent::Deleted(p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| WatchEvent::Created(p.clone()))
            .collect(),

        _ => vec![],
    }
}

/// Keep events the catalog can act on.
///
/// A deleted path cannot be inspected any more, so every delete is kept;
/// the catalog ignores paths it holds no files under.
fn is_relevant(event: &WatchEvent, roots: &[PathBuf]) -> bool {
    match event {
        WatchEvent::Created(path) if path.is_dir() => true,
        WatchEvent::Created(path) | WatchEvent::Changed(path) => {
            scan::is_candidate_file(path, roots)
        }
        WatchEvent::Deleted(_) => true,
    }
}

/// Move everything currently queued by notify into `batch`.
///
/// Returns false once the watcher side has gone away.
fn drain(
    event_rx: &std_mpsc::Receiver<notify::Result<Event>>,
    roots: &[PathBuf],
    batch: &mut Vec<WatchEvent>,
) -> bool {
    loop {
        match event_rx.try_recv() {
            Ok(Ok(event)) => {
                for ev in convert_event(&event) {
                    if is_relevant(&ev, roots) && batch.last() != Some(&ev) {
                        batch.push(ev);
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "filesystem watcher error");
            }
            Err(std_mpsc::TryRecvError::Empty) => return true,
            Err(std_mpsc::TryRecvError::Disconnected) => {
                error!("filesystem watcher channel disconnected");
                return false;
            }
        }
    }
}

/// Recursive watch over the workspace roots.
pub struct WatchBridge {
    roots: Vec<PathBuf>,
    debounce: Duration,
}

impl WatchBridge {
    pub fn new(roots: Vec<PathBuf>, debounce: Duration) -> Self {
        Self { roots, debounce }
    }

    /// Register the watch and start forwarding batches until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> SuiteResult<mpsc::Receiver<Vec<WatchEvent>>> {
        let (event_tx, event_rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(event_tx)
            .map_err(|e| SuiteError::Watch(format!("failed to create watcher: {}", e)))?;
        for root in &self.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| SuiteError::Watch(format!("failed to watch {}: {}", root.display(), e)))?;
        }
        info!(roots = ?self.roots, "watching workspace");

        let (tx, rx) = mpsc::channel(BATCH_CAPACITY);
        tokio::spawn(async move {
            self.run(watcher, event_rx, tx, cancel).await;
        });
        Ok(rx)
    }

    async fn run(
        self,
        // Dropping the watcher ends the subscription.
        _watcher: RecommendedWatcher,
        event_rx: std_mpsc::Receiver<notify::Result<Event>>,
        tx: mpsc::Sender<Vec<WatchEvent>>,
        cancel: CancellationToken,
    ) {
        let poll_duration = Duration::from_millis(POLL_MILLIS);
        let mut batch: Vec<WatchEvent> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                info!("watch bridge shutting down");
                break;
            }

            if !drain(&event_rx, &self.roots, &mut batch) {
                return;
            }

            if batch.is_empty() {
                sleep(poll_duration).await;
                continue;
            }

            // Collect whatever else arrives within the debounce window
            sleep(self.debounce).await;
            if !drain(&event_rx, &self.roots, &mut batch) {
                return;
            }

            debug!(count = batch.len(), "watch events flushed");
            if tx.send(std::mem::take(&mut batch)).await.is_err() {
                debug!("watch batch receiver dropped");
                return;
            }
        }
    }
}
