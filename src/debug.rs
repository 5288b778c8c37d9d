//! Debugger collaborator and debug session correlation.
//!
//! The host debugger reports session lifecycle events on one shared stream.
//! Each debug attempt embeds a fresh correlation token in its launch
//! configuration and registers it with the [`DebugCorrelator`]; the first
//! `SessionStarted` event carrying that token claims the session, and every
//! later event for that session is captured into a [`DebugTranscript`] until
//! it terminates.
//!
//! Registrations are one-shot: they are removed when the session terminates
//! or when the [`PendingSession`] handle is dropped, whichever happens first,
//! so a stale token can never claim an unrelated later session.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use gosuite_core::catalog::TestOutcome;

use crate::process::OutputLog;

/// Bytes of randomness in a correlation token (hex-encoded to 32 characters).
const TOKEN_BYTES: usize = 16;

/// Exact stdout line the go test runner prints when every test passed.
pub const PASS_SENTINEL: &str = "PASS";

/// Exact stdout line the go test runner prints when any test failed.
pub const FAIL_SENTINEL: &str = "FAIL";

/// Generate a fresh correlation token (hex-encoded random bytes).
pub fn correlation_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::fill(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// Host Interface
// ============================================================================

/// Host-assigned debug session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugSessionId(pub String);

impl fmt::Display for DebugSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Launch configuration handed to the host debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    #[serde(rename = "type")]
    pub adapter: String,
    pub request: String,
    pub name: String,
    pub mode: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(rename = "gosuiteCorrelationId")]
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dest: Option<String>,
}

impl LaunchConfig {
    /// A `go` adapter launch in test mode.
    pub fn go_test(
        name: String,
        program: PathBuf,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        correlation_id: String,
        log_dest: &str,
    ) -> Self {
        LaunchConfig {
            adapter: "go".to_string(),
            request: "launch".to_string(),
            name,
            mode: "test".to_string(),
            program,
            args,
            env,
            correlation_id,
            log_dest: (!cfg!(windows)).then(|| log_dest.to_string()),
        }
    }
}

/// The host's interactive debugger.
#[async_trait]
pub trait DebugHost: Send + Sync {
    /// Start a session. Returns false when the host refused to start it.
    async fn start_debugging(&self, config: &LaunchConfig) -> bool;

    /// Ask the host to stop one session. Termination is reported as an event.
    async fn stop_debugging(&self, session: &DebugSessionId);
}

/// Output category reported by the debug adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Stdout,
    Stderr,
    Console,
}

/// Session lifecycle events from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// A session started; `correlation_id` echoes the launch configuration.
    SessionStarted {
        session: DebugSessionId,
        correlation_id: Option<String>,
    },
    Output {
        session: DebugSessionId,
        category: OutputCategory,
        text: String,
    },
    /// The debug adapter itself reported an error.
    AdapterError {
        session: DebugSessionId,
        message: String,
    },
    /// The debuggee exited.
    Exited { session: DebugSessionId, code: i32 },
    Terminated { session: DebugSessionId },
}

// ============================================================================
// Transcript
// ============================================================================

/// Everything captured for one correlated session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugTranscript {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub other: Vec<String>,
    pub adapter_error: Option<String>,
    pub exit_code: Option<i32>,
}

impl DebugTranscript {
    fn push_line(&mut self, category: OutputCategory, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        match category {
            OutputCategory::Stdout => self.stdout.push(line),
            OutputCategory::Stderr => self.stderr.push(line),
            OutputCategory::Console => self.other.push(line),
        }
    }
}

/// Reassembles lines that the adapter split across output events.
#[derive(Default)]
struct LineBuffers {
    partial: HashMap<OutputCategory, String>,
}

impl LineBuffers {
    fn record(&mut self, transcript: &mut DebugTranscript, category: OutputCategory, text: &str) {
        let buf = self.partial.entry(category).or_default();
        buf.push_str(text);
        while let Some(end) = buf.find('\n') {
            let line: String = buf.drain(..=end).collect();
            transcript.push_line(category, &line);
        }
    }

    /// Flush unterminated trailing lines.
    fn finish(&mut self, transcript: &mut DebugTranscript) {
        for category in [OutputCategory::Stdout, OutputCategory::Stderr, OutputCategory::Console] {
            if let Some(rest) = self.partial.remove(&category) {
                if !rest.is_empty() {
                    transcript.push_line(category, &rest);
                }
            }
        }
    }
}

/// Outcome of a finished debug session.
///
/// An adapter error fails the entry; otherwise an explicit exit code decides;
/// otherwise an exact `PASS` or `FAIL` stdout line; otherwise the result is
/// indeterminate and the entry is skipped.
pub fn classify_debug_transcript(transcript: &DebugTranscript) -> TestOutcome {
    if transcript.adapter_error.is_some() {
        return TestOutcome::Failed;
    }
    if let Some(code) = transcript.exit_code {
        return if code == 0 {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        };
    }
    let has_line = |sentinel: &str| transcript.stdout.iter().any(|l| l.trim_end() == sentinel);
    if has_line(PASS_SENTINEL) {
        TestOutcome::Passed
    } else if has_line(FAIL_SENTINEL) {
        TestOutcome::Failed
    } else {
        TestOutcome::Skipped
    }
}

// ============================================================================
// Correlator
// ============================================================================

struct Pending {
    claimed: watch::Sender<Option<DebugSessionId>>,
    transcript: DebugTranscript,
    lines: LineBuffers,
    log: OutputLog,
    done: Option<oneshot::Sender<DebugTranscript>>,
}

impl Pending {
    fn session(&self) -> Option<DebugSessionId> {
        self.claimed.borrow().clone()
    }
}

#[derive(Default)]
struct Registry {
    pending: HashMap<String, Pending>,
    sessions: HashMap<DebugSessionId, String>,
}

impl Registry {
    fn remove(&mut self, token: &str) -> Option<Pending> {
        let pending = self.pending.remove(token)?;
        if let Some(session) = pending.session() {
            self.sessions.remove(&session);
        }
        Some(pending)
    }
}

/// Registry of pending correlation tokens.
#[derive(Clone, Default)]
pub struct DebugCorrelator {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for DebugCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl DebugCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `token` before launching. Captured output is also appended to `log`.
    pub fn register(&self, token: String, log: OutputLog) -> PendingSession {
        let (tx, rx) = oneshot::channel();
        let (claimed, claimed_rx) = watch::channel(None);
        self.lock().pending.insert(
            token.clone(),
            Pending {
                claimed,
                transcript: DebugTranscript::default(),
                lines: LineBuffers::default(),
                log,
                done: Some(tx),
            },
        );
        PendingSession {
            token,
            correlator: self.clone(),
            claimed: claimed_rx,
            finished: rx,
        }
    }

    /// Number of registrations still waiting for termination.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Route one host event to the registration it belongs to.
    pub fn dispatch(&self, event: DebugEvent) {
        let mut registry = self.lock();
        match event {
            DebugEvent::SessionStarted {
                session,
                correlation_id: Some(token),
            } => {
                let Some(pending) = registry.pending.get_mut(&token) else {
                    return;
                };
                if pending.session().is_some() {
                    return;
                }
                debug!(session = %session, "debug session correlated");
                pending.claimed.send_replace(Some(session.clone()));
                registry.sessions.insert(session, token);
            }
            DebugEvent::SessionStarted { .. } => {}
            DebugEvent::Output {
                session,
                category,
                text,
            } => {
                if let Some(pending) = lookup(&mut registry, &session) {
                    pending.log.append(&text);
                    pending.lines.record(&mut pending.transcript, category, &text);
                }
            }
            DebugEvent::AdapterError { session, message } => {
                if let Some(pending) = lookup(&mut registry, &session) {
                    warn!(session = %session, error = %message, "debug adapter error");
                    pending.log.append_line(&message);
                    pending.transcript.adapter_error = Some(message);
                }
            }
            DebugEvent::Exited { session, code } => {
                if let Some(pending) = lookup(&mut registry, &session) {
                    pending.transcript.exit_code = Some(code);
                }
            }
            DebugEvent::Terminated { session } => {
                let Some(token) = registry.sessions.get(&session).cloned() else {
                    return;
                };
                if let Some(mut pending) = registry.remove(&token) {
                    debug!(session = %session, "debug session terminated");
                    pending.lines.finish(&mut pending.transcript);
                    if let Some(done) = pending.done.take() {
                        let _ = done.send(pending.transcript);
                    }
                }
            }
        }
    }
}

fn lookup<'a>(registry: &'a mut Registry, session: &DebugSessionId) -> Option<&'a mut Pending> {
    let token = registry.sessions.get(session)?.clone();
    registry.pending.get_mut(&token)
}

/// Handle for one registered token. Dropping it disposes the registration.
#[derive(Debug)]
pub struct PendingSession {
    token: String,
    correlator: DebugCorrelator,
    claimed: watch::Receiver<Option<DebugSessionId>>,
    finished: oneshot::Receiver<DebugTranscript>,
}

impl PendingSession {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The claimed session, once the host has reported it.
    pub fn session(&self) -> Option<DebugSessionId> {
        self.claimed.borrow().clone()
    }

    /// Wait until the host reports the session carrying this token.
    ///
    /// Returns `None` if the registration goes away unclaimed.
    pub async fn claimed(&mut self) -> Option<DebugSessionId> {
        self.claimed
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|session| (*session).clone())
    }

    /// Wait for the correlated session to terminate.
    ///
    /// Returns `None` if the registration was disposed without termination.
    pub async fn finished(&mut self) -> Option<DebugTranscript> {
        (&mut self.finished).await.ok()
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        self.correlator.lock().remove(&self.token);
    }
}
