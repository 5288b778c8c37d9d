//! Test process execution.
//!
//! Spawns one toolchain invocation, streams its stdout and stderr into the
//! run's shared [`OutputLog`] as chunks arrive, and races completion against
//! a cancellation token. Output is never interpreted here; the exit code is
//! the only verdict.
//!
//! On unix the child is placed in its own process group so cancellation can
//! take down the compiled test binary `go test` spawns, not only `go` itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gosuite_core::error::{SuiteError, SuiteResult};

const READ_CHUNK: usize = 8192;

// ============================================================================
// Output Log
// ============================================================================

/// Append-only output shared by every entry of a run.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    inner: Arc<Mutex<String>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: &str) {
        let mut log = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log.push_str(text);
    }

    /// Append `text` followed by a newline.
    pub fn append_line(&self, text: &str) {
        let mut log = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log.push_str(text);
        log.push('\n');
    }

    /// Snapshot of everything appended so far.
    pub fn contents(&self) -> String {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ============================================================================
// Process
// ============================================================================

/// What to spawn and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    /// Shell-like rendering for logs.
    pub fn display_command(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process ran to completion. `code` is `None` when it died from a signal.
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Cancellation won the race; the process (group) was killed and reaped.
    Cancelled,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited { code: Some(0), .. })
    }
}

/// Copy a child stream into `log` chunk by chunk, returning everything read.
async fn capture<R>(stream: Option<R>, log: OutputLog) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                log.append(&String::from_utf8_lossy(&buf[..n]));
                captured.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                warn!(error = %e, "error reading process output");
                break;
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // Negative pid addresses the whole group created by process_group(0).
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Spawn `spec` and wait for it or for `cancel`, whichever comes first.
///
/// Cancellation is honored until both output streams are closed, so a
/// leftover descendant holding the pipes open is killed with the group.
pub async fn run_process(
    spec: &ProcessSpec,
    log: &OutputLog,
    cancel: &CancellationToken,
) -> SuiteResult<ProcessExit> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| SuiteError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    info!(pid = ?pid, command = %spec.display_command(), cwd = ?spec.cwd, "spawned test process");

    let mut stdout_task = tokio::spawn(capture(child.stdout.take(), log.clone()));
    let mut stderr_task = tokio::spawn(capture(child.stderr.take(), log.clone()));

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    let Some(status) = status else {
        info!(pid = ?pid, "cancelled, killing test process");
        kill_process_group(pid);
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill test process");
        }
        stdout_task.abort();
        stderr_task.abort();
        return Ok(ProcessExit::Cancelled);
    };
    let status = status.map_err(|source| SuiteError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;

    let streams = tokio::select! {
        joined = async { tokio::join!(&mut stdout_task, &mut stderr_task) } => Some(joined),
        _ = cancel.cancelled() => None,
    };
    let Some((stdout, stderr)) = streams else {
        info!(pid = ?pid, "cancelled with output still open, killing process group");
        kill_process_group(pid);
        stdout_task.abort();
        stderr_task.abort();
        return Ok(ProcessExit::Cancelled);
    };

    info!(code = ?status.code(), "test process exited");
    Ok(ProcessExit::Exited {
        code: status.code(),
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
    })
}
