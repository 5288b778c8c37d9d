//! Test explorer wiring.
//!
//! [`TestExplorer`] owns the shared catalog and is the only place that issues
//! structural mutations against it: full rescans, explicit refreshes, and the
//! batches coming from the watch bridge. All of them go through the catalog
//! lock one at a time. Every change is republished as the catalog revision on
//! a `tokio::sync::watch` channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gosuite_core::catalog::{NodeId, NodeKind, RescanSummary, TestCatalog, WatchEvent};
use gosuite_core::config::ExplorerConfig;
use gosuite_core::error::{SuiteError, SuiteResult};

use crate::orchestrator::Orchestrator;
use crate::toolchain::ToolchainResolver;
use crate::watch::WatchBridge;

/// Catalog shared between the explorer and orchestrators (thread-safe)
pub type SharedCatalog = Arc<Mutex<TestCatalog>>;

/// Wrap a catalog for sharing
pub fn new_shared_catalog(catalog: TestCatalog) -> SharedCatalog {
    Arc::new(Mutex::new(catalog))
}

fn lock(catalog: &SharedCatalog) -> MutexGuard<'_, TestCatalog> {
    catalog.lock().unwrap_or_else(|e| e.into_inner())
}

/// Apply one batch of watch events and publish the new revision if anything changed.
fn apply_batch(catalog: &SharedCatalog, revision: &watch::Sender<u64>, events: &[WatchEvent]) -> bool {
    let mut catalog = lock(catalog);
    let mut changed = false;
    for event in events {
        changed |= catalog.apply_watch_event(event);
    }
    if changed {
        revision.send_replace(catalog.revision());
        debug!(events = events.len(), revision = catalog.revision(), "applied watch batch");
    }
    changed
}

/// Owns the live catalog and keeps it in sync with the workspace.
pub struct TestExplorer {
    catalog: SharedCatalog,
    config: ExplorerConfig,
    revision: Arc<watch::Sender<u64>>,
    watching: AtomicBool,
    shutdown: CancellationToken,
}

impl TestExplorer {
    pub fn new(roots: Vec<PathBuf>, config: ExplorerConfig) -> Self {
        let catalog = TestCatalog::new(roots, config.libraries.clone());
        let (revision, _) = watch::channel(catalog.revision());
        TestExplorer {
            catalog: new_shared_catalog(catalog),
            config,
            revision: Arc::new(revision),
            watching: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> SharedCatalog {
        self.catalog.clone()
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// Receiver for catalog revisions; changes whenever the tree does.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// An orchestrator bound to this explorer's catalog and settings.
    pub fn orchestrator(&self, toolchain: Arc<dyn ToolchainResolver>) -> Orchestrator {
        Orchestrator::new(self.catalog.clone(), toolchain, self.config.clone())
    }

    fn publish(&self, catalog: &TestCatalog) {
        self.revision.send_replace(catalog.revision());
    }

    /// Rebuild the catalog from disk.
    ///
    /// The first call also registers the persistent workspace watch, so
    /// changes made while listing are not lost.
    pub async fn full_rescan(&self, cancel: &CancellationToken) -> SuiteResult<RescanSummary> {
        self.start_watching()?;

        let mut catalog = lock(&self.catalog);
        let summary = catalog.full_rescan(&|| cancel.is_cancelled());
        self.publish(&catalog);
        Ok(summary)
    }

    /// Rebuild without registering a watch (one-shot commands).
    pub fn scan_once(&self, cancel: &CancellationToken) -> RescanSummary {
        let mut catalog = lock(&self.catalog);
        let summary = catalog.full_rescan(&|| cancel.is_cancelled());
        self.publish(&catalog);
        summary
    }

    fn start_watching(&self) -> SuiteResult<()> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let roots = lock(&self.catalog).roots().to_vec();
        let debounce = Duration::from_millis(self.config.watch_debounce_millis);
        let mut batches = match WatchBridge::new(roots, debounce).start(self.shutdown.child_token()) {
            Ok(rx) => rx,
            Err(e) => {
                self.watching.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let catalog = self.catalog.clone();
        let revision = self.revision.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = batches.recv() => match batch {
                        Some(events) => {
                            apply_batch(&catalog, &revision, &events);
                        }
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            info!("catalog watch loop stopped");
        });
        Ok(())
    }

    /// Apply watch events directly, as the watch loop does.
    pub fn apply_events(&self, events: &[WatchEvent]) -> bool {
        apply_batch(&self.catalog, &self.revision, events)
    }

    /// Re-read a package or file node from disk.
    ///
    /// The catalog is pruned and any change published even when the
    /// refresh itself fails.
    pub fn refresh(&self, id: &NodeId) -> SuiteResult<bool> {
        let mut catalog = lock(&self.catalog);
        let kind = catalog
            .node(id)
            .map(|n| n.kind)
            .ok_or_else(|| SuiteError::NodeNotFound { id: id.clone() })?;
        let before = catalog.revision();
        let result = match kind {
            NodeKind::Package => catalog.refresh_package(id),
            _ => catalog.refresh_file(id),
        };
        catalog.prune_empty();
        let changed = catalog.revision() != before;
        if changed {
            self.publish(&catalog);
        }
        result.map(|refreshed| refreshed || changed)
    }

    /// Stop the watch loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestExplorer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SRC: &str = "package p\nimport \"gopkg.in/check.v1\"\nfunc (s *S) TestA(c *check.C) {}\n";

    #[test]
    fn test_scan_once_publishes_revision() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("p")).unwrap();
        fs::write(temp.path().join("p/a_test.go"), SRC).unwrap();

        let explorer = TestExplorer::new(vec![temp.path().to_path_buf()], ExplorerConfig::default());
        let rx = explorer.subscribe();
        let summary = explorer.scan_once(&CancellationToken::new());
        assert_eq!(summary.files_with_tests, 1);
        assert!(*rx.borrow() > 0);
    }

    #[test]
    fn test_refresh_removed_package_publishes_removal() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("p")).unwrap();
        fs::write(temp.path().join("p/a_test.go"), SRC).unwrap();
        let explorer = TestExplorer::new(vec![temp.path().to_path_buf()], ExplorerConfig::default());
        explorer.scan_once(&CancellationToken::new());
        let mut rx = explorer.subscribe();
        rx.borrow_and_update();

        let catalog = explorer.catalog();
        let package = lock(&catalog).packages()[0].clone();
        fs::remove_dir_all(temp.path().join("p")).unwrap();

        assert!(matches!(explorer.refresh(&package), Err(SuiteError::Io { .. })));
        assert!(lock(&catalog).is_empty());
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_refresh_unknown_node() {
        let explorer = TestExplorer::new(vec![], ExplorerConfig::default());
        assert!(matches!(
            explorer.refresh(&NodeId::from("nope")),
            Err(SuiteError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_refresh_function_node_is_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("p")).unwrap();
        fs::write(temp.path().join("p/a_test.go"), SRC).unwrap();
        let explorer = TestExplorer::new(vec![temp.path().to_path_buf()], ExplorerConfig::default());
        explorer.scan_once(&CancellationToken::new());

        let catalog = explorer.catalog();
        let package = lock(&catalog).packages()[0].clone();
        let function = lock(&catalog).function_descendants(&package)[0].clone();
        assert!(matches!(
            explorer.refresh(&function),
            Err(SuiteError::UnexpectedNodeKind { .. })
        ));
    }
}
