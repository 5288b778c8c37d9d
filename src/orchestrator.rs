//! Execution orchestrator.
//!
//! A request is first expanded against the catalog into an ordered queue:
//! packages and files expand into their function descendants, a suite is a
//! single entry that selects every method of its receiver, and anything in
//! the exclusion set (or beneath it) is dropped. Entries then run strictly one
//! after another, each moving `Enqueued -> Started -> terminal`.
//!
//! Outcomes are written back to the catalog as annotations. A suite entry
//! carries its function children along: they are marked `Passed` when the
//! suite passes and `Skipped` otherwise, so no child keeps a stale pass after
//! a suite failure that cannot be attributed to it.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gosuite_core::catalog::{NodeData, NodeId, NodeKind, TestCatalog, TestOutcome};
use gosuite_core::config::ExplorerConfig;
use gosuite_core::error::{SuiteError, SuiteResult};
use gosuite_core::library::{LibraryAdapter, TestTarget};
use gosuite_core::parser::Declaration;

use crate::debug::{
    classify_debug_transcript, correlation_token, DebugCorrelator, DebugHost, LaunchConfig,
};
use crate::explorer::SharedCatalog;
use crate::process::{run_process, OutputLog, ProcessExit, ProcessSpec};
use crate::toolchain::ToolchainResolver;

/// How long a cancelled debug entry waits for the host to report its session.
const DEBUG_CLAIM_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Requests and Queue
// ============================================================================

/// Run tests normally or under the interactive debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Run,
    Debug,
}

/// A selection of catalog nodes to execute.
///
/// An empty `include` list selects every package.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub include: Vec<NodeId>,
    pub exclude: Vec<NodeId>,
    pub mode: RunMode,
}

impl RunRequest {
    pub fn run(include: Vec<NodeId>) -> Self {
        RunRequest {
            include,
            exclude: Vec::new(),
            mode: RunMode::Run,
        }
    }

    pub fn debug(node: NodeId) -> Self {
        RunRequest {
            include: vec![node],
            exclude: Vec::new(),
            mode: RunMode::Debug,
        }
    }
}

/// One unit of execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub node: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub declaration: Declaration,
    /// Package directory the toolchain runs in.
    pub directory: PathBuf,
    pub target: TestTarget,
    /// Function children carried along with a suite entry.
    pub children: Vec<NodeId>,
}

/// Expand `request` into an ordered execution queue.
pub fn build_queue(catalog: &TestCatalog, request: &RunRequest) -> SuiteResult<Vec<QueueEntry>> {
    let excluded: HashSet<&NodeId> = request.exclude.iter().collect();
    let roots: Vec<NodeId> = if request.include.is_empty() {
        catalog.packages().to_vec()
    } else {
        request.include.clone()
    };

    let mut queue = Vec::new();
    let mut seen = HashSet::new();
    for root in &roots {
        if catalog.node(root).is_none() {
            return Err(SuiteError::NodeNotFound { id: root.clone() });
        }
        expand(catalog, root, true, &excluded, &mut seen, &mut queue);
    }

    if queue.is_empty() {
        return Err(SuiteError::EmptySelection);
    }
    if request.mode == RunMode::Debug && queue.len() > 1 {
        return Err(SuiteError::MultipleDebugTargets { count: queue.len() });
    }
    Ok(queue)
}

fn expand(
    catalog: &TestCatalog,
    id: &NodeId,
    selected: bool,
    excluded: &HashSet<&NodeId>,
    seen: &mut HashSet<NodeId>,
    queue: &mut Vec<QueueEntry>,
) {
    if excluded.contains(id) {
        return;
    }
    let Some(node) = catalog.node(id) else {
        return;
    };

    match node.kind {
        NodeKind::Package | NodeKind::File => {
            for child in &node.children {
                expand(catalog, child, false, excluded, seen, queue);
            }
        }
        // Suites reached through a package or file expand like containers.
        NodeKind::Suite if !selected => {
            for child in &node.children {
                expand(catalog, child, false, excluded, seen, queue);
            }
        }
        NodeKind::Suite | NodeKind::Function => {
            if !seen.insert(id.clone()) {
                return;
            }
            let Some(data) = catalog.data(id) else {
                return;
            };
            let Some(declaration) = data.declaration() else {
                return;
            };
            let (target, children) = match data {
                NodeData::Suite { .. } => (
                    TestTarget::suite(declaration),
                    catalog.function_descendants(id),
                ),
                _ => (TestTarget::function(declaration), Vec::new()),
            };
            queue.push(QueueEntry {
                node: id.clone(),
                kind: node.kind,
                label: node.label.clone(),
                declaration: declaration.clone(),
                directory: data.directory(),
                target,
                children,
            });
        }
    }
}

// ============================================================================
// Entry States and Reports
// ============================================================================

/// Per-entry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Enqueued,
    Started,
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EntryState::Enqueued | EntryState::Started)
    }

    fn outcome(self) -> Option<TestOutcome> {
        match self {
            EntryState::Passed => Some(TestOutcome::Passed),
            EntryState::Failed => Some(TestOutcome::Failed),
            EntryState::Skipped => Some(TestOutcome::Skipped),
            EntryState::Errored => Some(TestOutcome::Errored),
            EntryState::Enqueued | EntryState::Started => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Enqueued => "enqueued",
            EntryState::Started => "started",
            EntryState::Passed => "passed",
            EntryState::Failed => "failed",
            EntryState::Skipped => "skipped",
            EntryState::Errored => "errored",
        };
        f.pad(s)
    }
}

/// One state change of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub node: NodeId,
    pub state: EntryState,
    /// Failure detail or the reason an entry was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything a finished request produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub transitions: Vec<Transition>,
    pub output: String,
    pub cancelled: bool,
}

impl RunReport {
    /// Last state recorded for `node`.
    pub fn state_of(&self, node: &NodeId) -> Option<EntryState> {
        self.transitions
            .iter()
            .rev()
            .find(|t| &t.node == node)
            .map(|t| t.state)
    }

    /// Final state of every entry, in queue order.
    pub fn final_states(&self) -> Vec<(NodeId, EntryState)> {
        let mut order: Vec<NodeId> = Vec::new();
        for t in &self.transitions {
            if !order.contains(&t.node) {
                order.push(t.node.clone());
            }
        }
        order
            .into_iter()
            .filter_map(|node| self.state_of(&node).map(|state| (node, state)))
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.final_states()
            .iter()
            .all(|(_, state)| *state == EntryState::Passed)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Terminal result of one entry.
struct Settled {
    state: EntryState,
    message: Option<String>,
    cancelled: bool,
}

impl Settled {
    fn new(state: EntryState, message: Option<String>) -> Self {
        Settled {
            state,
            message,
            cancelled: false,
        }
    }

    fn cancelled() -> Self {
        Settled {
            state: EntryState::Skipped,
            message: Some("cancelled".to_string()),
            cancelled: true,
        }
    }
}

#[derive(Clone)]
struct DebugBridge {
    host: Arc<dyn DebugHost>,
    correlator: DebugCorrelator,
}

/// Drives run and debug requests against the shared catalog.
pub struct Orchestrator {
    catalog: SharedCatalog,
    toolchain: Arc<dyn ToolchainResolver>,
    debugger: Option<DebugBridge>,
    settings: ExplorerConfig,
}

impl Orchestrator {
    pub fn new(
        catalog: SharedCatalog,
        toolchain: Arc<dyn ToolchainResolver>,
        settings: ExplorerConfig,
    ) -> Self {
        Orchestrator {
            catalog,
            toolchain,
            debugger: None,
            settings,
        }
    }

    /// Enable debug requests through `host`; its events must be fed to `correlator`.
    pub fn with_debugger(mut self, host: Arc<dyn DebugHost>, correlator: DebugCorrelator) -> Self {
        self.debugger = Some(DebugBridge { host, correlator });
        self
    }

    fn lock_catalog(&self) -> MutexGuard<'_, TestCatalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute a request. Selection errors are returned before anything runs;
    /// everything after that is reported per entry.
    pub async fn execute(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> SuiteResult<RunReport> {
        let queue = {
            let catalog = self.lock_catalog();
            build_queue(&catalog, request)?
        };
        info!(entries = queue.len(), mode = ?request.mode, "executing test queue");

        let log = OutputLog::new();
        let mut report = RunReport::default();
        for entry in &queue {
            push(&mut report, &entry.node, EntryState::Enqueued, None);
        }

        for (index, entry) in queue.iter().enumerate() {
            if cancel.is_cancelled() {
                self.skip_remaining(&queue[index..], &mut report);
                report.cancelled = true;
                break;
            }

            push(&mut report, &entry.node, EntryState::Started, None);
            let settled = match request.mode {
                RunMode::Run => self.run_entry(entry, &log, cancel).await,
                RunMode::Debug => self.debug_entry(entry, &log, cancel).await,
            };
            self.settle(entry, &settled, &mut report);

            if settled.cancelled {
                self.skip_remaining(&queue[index + 1..], &mut report);
                report.cancelled = true;
                break;
            }
        }

        report.output = log.contents();
        Ok(report)
    }

    fn skip_remaining(&self, entries: &[QueueEntry], report: &mut RunReport) {
        for entry in entries {
            self.settle(entry, &Settled::cancelled(), report);
        }
    }

    fn settle(&self, entry: &QueueEntry, settled: &Settled, report: &mut RunReport) {
        push(report, &entry.node, settled.state, settled.message.clone());

        let Some(outcome) = settled.state.outcome() else {
            return;
        };
        let child_outcome = if settled.state == EntryState::Passed {
            TestOutcome::Passed
        } else {
            TestOutcome::Skipped
        };

        let mut catalog = self.lock_catalog();
        if !catalog.record_outcome(&entry.node, outcome) {
            warn!(node = %entry.node, "node disappeared before its outcome was recorded");
        }
        for child in &entry.children {
            catalog.record_outcome(child, child_outcome);
        }
    }

    async fn run_entry(
        &self,
        entry: &QueueEntry,
        log: &OutputLog,
        cancel: &CancellationToken,
    ) -> Settled {
        let toolchain = match self.toolchain.resolve().await {
            Ok(toolchain) => toolchain,
            Err(e) => {
                error!(node = %entry.node, error = %e, "cannot run test");
                log.append_line(&e.to_string());
                return Settled::new(EntryState::Skipped, Some(e.to_string()));
            }
        };

        let library = entry.declaration.library;
        let command = library.run_command(&entry.target, &self.settings.run_flags);
        let spec = ProcessSpec {
            program: toolchain.binary.clone(),
            args: command.args,
            cwd: entry.directory.clone(),
            env: toolchain.merged_env(&self.settings.test_env),
        };
        log.append_line(&format!("Running {}", spec.display_command()));

        match run_process(&spec, log, cancel).await {
            Ok(ProcessExit::Cancelled) => Settled::cancelled(),
            Ok(ProcessExit::Exited { code: Some(0), .. }) => Settled::new(EntryState::Passed, None),
            Ok(ProcessExit::Exited { stdout, stderr, .. }) => {
                Settled::new(EntryState::Failed, Some(format!("{}{}", stdout, stderr)))
            }
            Err(e) => {
                error!(node = %entry.node, error = %e, "test process failed to start");
                log.append_line(&e.to_string());
                Settled::new(EntryState::Errored, Some(e.to_string()))
            }
        }
    }

    async fn debug_entry(
        &self,
        entry: &QueueEntry,
        log: &OutputLog,
        cancel: &CancellationToken,
    ) -> Settled {
        let Some(bridge) = &self.debugger else {
            warn!(node = %entry.node, "debugging requested without a debugger");
            return Settled::new(
                EntryState::Skipped,
                Some("no debugger available".to_string()),
            );
        };

        let toolchain = match self.toolchain.resolve().await {
            Ok(toolchain) => toolchain,
            Err(e) => {
                error!(node = %entry.node, error = %e, "cannot debug test");
                log.append_line(&e.to_string());
                return Settled::new(EntryState::Skipped, Some(e.to_string()));
            }
        };

        let library = entry.declaration.library;
        let command = library.debug_command(&entry.target);
        let token = correlation_token();
        let config = LaunchConfig::go_test(
            format!("Debug {}", entry.label),
            command.program.unwrap_or_else(|| entry.directory.clone()),
            command.args,
            toolchain.merged_env(&self.settings.test_env),
            token.clone(),
            &self.settings.debug_log_dest,
        );

        let mut pending = bridge.correlator.register(token, log.clone());
        if !bridge.host.start_debugging(&config).await {
            let e = SuiteError::DebugStartFailed {
                name: config.name.clone(),
            };
            error!(node = %entry.node, error = %e, "debug session did not start");
            log.append_line(&e.to_string());
            return Settled::new(EntryState::Skipped, Some(e.to_string()));
        }
        info!(node = %entry.node, name = %config.name, "debug session launched");

        tokio::select! {
            transcript = pending.finished() => match transcript {
                Some(transcript) => {
                    let state = match classify_debug_transcript(&transcript) {
                        TestOutcome::Passed => EntryState::Passed,
                        TestOutcome::Failed => EntryState::Failed,
                        TestOutcome::Skipped => EntryState::Skipped,
                        TestOutcome::Errored => EntryState::Errored,
                    };
                    let message = (state == EntryState::Failed)
                        .then(|| [transcript.stdout.join("\n"), transcript.stderr.join("\n")].join("\n"));
                    Settled::new(state, message)
                }
                None => Settled::new(EntryState::Skipped, Some("debug session lost".to_string())),
            },
            _ = cancel.cancelled() => {
                let session = match pending.session() {
                    Some(session) => Some(session),
                    None => {
                        info!(node = %entry.node, "cancelled before the debug session was reported, waiting for it");
                        tokio::time::timeout(DEBUG_CLAIM_GRACE, pending.claimed())
                            .await
                            .ok()
                            .flatten()
                    }
                };
                match session {
                    Some(session) => {
                        info!(session = %session, "cancelled, stopping debug session");
                        bridge.host.stop_debugging(&session).await;
                        let _ = pending.finished().await;
                    }
                    None => warn!(node = %entry.node, "debug session never reported after cancellation"),
                }
                Settled::cancelled()
            }
        }
    }
}

fn push(report: &mut RunReport, node: &NodeId, state: EntryState, message: Option<String>) {
    report.transitions.push(Transition {
        node: node.clone(),
        state,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gosuite_core::library::TestLibrary;
    use std::path::Path;

    const SRC: &str = concat!(
        "package p\n",
        "import \"gopkg.in/check.v1\"\n",
        "func (s *Suite) TestA(c *check.C) {}\n",
        "func (s *Suite) TestB(c *check.C) {}\n",
        "func TestPlain(c *check.C) {}\n",
    );

    fn catalog() -> TestCatalog {
        let mut catalog = TestCatalog::new(vec![PathBuf::from("/ws")], TestLibrary::ALL.to_vec());
        catalog.discover_in_file(Path::new("/ws/p/a_test.go"), Some(SRC));
        catalog.discover_in_file(Path::new("/ws/q/b_test.go"), Some(SRC.replace("package p", "package q").as_str()));
        catalog
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn nodes(queue: &[QueueEntry]) -> Vec<&str> {
        queue.iter().map(|e| e.node.as_str()).collect()
    }

    #[test]
    fn test_package_expands_to_functions() {
        let queue = build_queue(&catalog(), &RunRequest::run(vec![id("/ws/p:p")])).unwrap();
        assert_eq!(
            nodes(&queue),
            vec![
                "/ws/p:p/a_test/Suite/Suite.TestA",
                "/ws/p:p/a_test/Suite/Suite.TestB",
                "/ws/p:p/a_test/TestPlain",
            ]
        );
        assert_eq!(queue[0].directory, PathBuf::from("/ws/p"));
        assert_eq!(
            queue[0].target,
            TestTarget::Function {
                receiver: Some("Suite".into()),
                name: "TestA".into()
            }
        );
        assert!(queue[0].children.is_empty());
    }

    #[test]
    fn test_suite_is_single_entry() {
        let queue = build_queue(&catalog(), &RunRequest::run(vec![id("/ws/p:p/a_test/Suite")])).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind, NodeKind::Suite);
        assert_eq!(
            queue[0].target,
            TestTarget::Suite {
                receiver: "Suite".into()
            }
        );
        assert_eq!(queue[0].children.len(), 2);
    }

    #[test]
    fn test_empty_include_selects_everything() {
        let queue = build_queue(&catalog(), &RunRequest::default()).unwrap();
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn test_exclusions_apply_to_descendants() {
        let request = RunRequest {
            include: vec![],
            exclude: vec![id("/ws/q:q"), id("/ws/p:p/a_test/Suite")],
            mode: RunMode::Run,
        };
        let queue = build_queue(&catalog(), &request).unwrap();
        assert_eq!(nodes(&queue), vec!["/ws/p:p/a_test/TestPlain"]);

        let request = RunRequest {
            include: vec![id("/ws/p:p/a_test/TestPlain")],
            exclude: vec![id("/ws/p:p/a_test/TestPlain")],
            mode: RunMode::Run,
        };
        assert!(matches!(
            build_queue(&catalog(), &request),
            Err(SuiteError::EmptySelection)
        ));
    }

    #[test]
    fn test_duplicate_selection_runs_once() {
        let request = RunRequest::run(vec![
            id("/ws/p:p/a_test/TestPlain"),
            id("/ws/p:p/a_test"),
        ]);
        let queue = build_queue(&catalog(), &request).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].node.as_str(), "/ws/p:p/a_test/TestPlain");
    }

    #[test]
    fn test_selection_errors() {
        let empty = TestCatalog::new(vec![], vec![]);
        assert!(matches!(
            build_queue(&empty, &RunRequest::default()),
            Err(SuiteError::EmptySelection)
        ));

        assert!(matches!(
            build_queue(&catalog(), &RunRequest::run(vec![id("missing")])),
            Err(SuiteError::NodeNotFound { .. })
        ));

        let debug = RunRequest {
            include: vec![id("/ws/p:p/a_test")],
            exclude: vec![],
            mode: RunMode::Debug,
        };
        assert!(matches!(
            build_queue(&catalog(), &debug),
            Err(SuiteError::MultipleDebugTargets { count: 3 })
        ));

        let single = RunRequest::debug(id("/ws/p:p/a_test/Suite"));
        assert_eq!(build_queue(&catalog(), &single).unwrap().len(), 1);
    }

    #[test]
    fn test_report_final_states() {
        let mut report = RunReport::default();
        push(&mut report, &id("a"), EntryState::Enqueued, None);
        push(&mut report, &id("b"), EntryState::Enqueued, None);
        push(&mut report, &id("a"), EntryState::Started, None);
        push(&mut report, &id("a"), EntryState::Passed, None);
        push(&mut report, &id("b"), EntryState::Skipped, None);
        assert_eq!(
            report.final_states(),
            vec![(id("a"), EntryState::Passed), (id("b"), EntryState::Skipped)]
        );
        assert!(!report.all_passed());
        assert!(EntryState::Skipped.is_terminal());
        assert!(!EntryState::Started.is_terminal());
    }
}
