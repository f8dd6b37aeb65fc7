//! The client surface shared by every runtime target.
//!
//! `execute` hands back an [`Execution`]: an eventual normalized outcome
//! plus a close handle that can cut the run short. Closing is idempotent
//! and safe before, during and after natural completion, so orchestration
//! code never tracks target lifecycle state itself.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::outcome::ExecutionOutcome;
use crate::protocol::{read_envelope, EnvelopeKind};

/// One module execution as a caller asks for it.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Project-relative path of the file to execute, forward slashes.
    pub relative_path: String,
    pub collect_coverage: bool,
    /// Close the target as soon as the outcome is known.
    pub auto_close: bool,
    /// Close the target only when the outcome is a rejection.
    pub auto_close_on_error: bool,
}

impl ExecutionRequest {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            collect_coverage: false,
            auto_close: false,
            auto_close_on_error: false,
        }
    }
}

pub(crate) type ChildSlot = Arc<Mutex<Option<Child>>>;

/// Cloneable handle that interrupts a running execution.
///
/// The first close kills the target process; later calls, and calls after
/// natural completion, are no-ops.
#[derive(Clone)]
pub struct CloseHandle {
    runtime: Arc<str>,
    closed: Arc<AtomicBool>,
    child: ChildSlot,
}

impl CloseHandle {
    pub(crate) fn new(runtime: &str, child: ChildSlot) -> Self {
        Self {
            runtime: Arc::from(runtime),
            closed: Arc::new(AtomicBool::new(false)),
            child,
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.start_kill() {
                debug!(runtime = %self.runtime, "child already gone on close: {e}");
            }
            let _ = child.wait().await;
            debug!(runtime = %self.runtime, "execution closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Claims the child for reaping. Whoever takes it owns the final
    /// `wait`; the loser of the race sees `None`.
    pub(crate) async fn take_child(&self) -> Option<Child> {
        self.child.lock().await.take()
    }

    /// Parks the child once its pipes are taken. A close that already ran
    /// owns the child's fate, so a late store kills it on the spot.
    pub(crate) async fn store_child(&self, mut child: Child) {
        let mut slot = self.child.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return;
        }
        *slot = Some(child);
    }
}

/// A started execution: the eventual outcome plus the handle that can cut
/// it short.
pub struct Execution {
    runtime: String,
    handle: JoinHandle<ExecutionOutcome>,
    closer: CloseHandle,
    auto_close: bool,
    auto_close_on_error: bool,
}

impl Execution {
    pub(crate) fn new(
        runtime: &str,
        handle: JoinHandle<ExecutionOutcome>,
        closer: CloseHandle,
        request: &ExecutionRequest,
    ) -> Self {
        Self {
            runtime: runtime.to_string(),
            handle,
            closer,
            auto_close: request.auto_close,
            auto_close_on_error: request.auto_close_on_error,
        }
    }

    pub fn closer(&self) -> CloseHandle {
        self.closer.clone()
    }

    /// Waits for the outcome, honoring the request's auto-close policy.
    ///
    /// Target crashes and protocol violations surface as rejected outcomes;
    /// `Err` is reserved for the driver task itself dying.
    pub async fn wait(self) -> Result<ExecutionOutcome> {
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.closer.close().await;
                return Err(Error::protocol(format!(
                    "{} execution driver failed: {e}",
                    self.runtime
                )));
            }
        };
        if self.auto_close || (self.auto_close_on_error && outcome.is_rejected()) {
            self.closer.close().await;
        }
        Ok(outcome)
    }
}

/// A target able to execute compiled modules: a server-side interpreter or
/// an automated browser page.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Runtime name as it appears in reports and compatibility profiles.
    fn name(&self) -> &str;

    /// Starts executing one file. Launch failures are errors; everything
    /// after a successful launch is reported through the outcome.
    async fn execute(&self, request: ExecutionRequest) -> Result<Execution>;
}

/// Splits a shell-style command line and verifies the program resolves on
/// PATH.
pub(crate) fn parse_command(runtime: &str, command_line: &str) -> Result<(String, Vec<String>)> {
    let mut parts = shlex::split(command_line)
        .ok_or_else(|| {
            Error::configuration(format!(
                "{runtime} command has unbalanced quoting: {command_line}"
            ))
        })?
        .into_iter();
    let program = parts
        .next()
        .ok_or_else(|| Error::configuration(format!("{runtime} command is empty")))?;
    let program = which::which(&program)
        .map_err(|_| Error::runtime_launch(runtime, format!("program not found: {program}")))?
        .to_string_lossy()
        .into_owned();
    Ok((program, parts.collect()))
}

/// Spawns a target process with the standard pipe setup and parks the child
/// in a fresh slot for its close handle.
pub(crate) fn spawn_target(
    runtime: &str,
    program: &str,
    args: &[String],
    extra_args: &[String],
    stdin: Stdio,
) -> Result<(Child, CloseHandle)> {
    let child = Command::new(program)
        .args(args)
        .args(extra_args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::runtime_launch(runtime, format!("failed to spawn {program}: {e}")))?;
    let slot: ChildSlot = Arc::new(Mutex::new(None));
    let closer = CloseHandle::new(runtime, slot);
    Ok((child, closer))
}

/// Collects the child's stderr in the background so a chatty target cannot
/// block on a full pipe.
pub(crate) fn drain_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text).await;
        }
        text
    })
}

/// Reads envelopes until a result or error arrives. `expect_id` filters to
/// the response of one request, skipping stale ids. `None` means the
/// channel ended before any outcome.
pub(crate) async fn await_result<R>(
    reader: &mut R,
    expect_id: Option<u64>,
) -> Option<ExecutionOutcome>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_envelope(reader).await {
            Ok(Some(envelope)) => {
                if let Some(id) = expect_id {
                    if envelope.id != id {
                        debug!(got = envelope.id, want = id, "skipping stale envelope");
                        continue;
                    }
                }
                match envelope.kind {
                    EnvelopeKind::Result => {
                        return Some(ExecutionOutcome::from_payload(envelope.payload))
                    }
                    EnvelopeKind::Error => {
                        return Some(ExecutionOutcome::from_error_payload(envelope.payload))
                    }
                    _ => debug!(kind = ?envelope.kind, "ignoring unexpected envelope"),
                }
            }
            Ok(None) => return None,
            Err(e) => {
                debug!("envelope channel failed: {e}");
                return None;
            }
        }
    }
}

/// Builds the rejection reported when a child ends without delivering an
/// outcome: either the caller closed it, or it died on its own.
pub(crate) async fn exit_rejection(
    runtime: &str,
    closer: &CloseHandle,
    stderr: JoinHandle<String>,
) -> ExecutionOutcome {
    let taken = closer.take_child().await;
    if closer.is_closed() {
        return ExecutionOutcome::rejected(format!(
            "{runtime} execution closed before completion"
        ));
    }
    let code = match taken {
        Some(mut child) => child.wait().await.ok().and_then(|status| status.code()),
        None => None,
    };
    let mut message = Error::runtime_exited(runtime, code).to_string();
    let tail = stderr.await.unwrap_or_default();
    let tail = tail.trim();
    if !tail.is_empty() {
        message.push_str(": ");
        message.push_str(tail);
    }
    ExecutionOutcome::rejected(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_rejects_bad_lines() {
        assert!(parse_command("node", "node 'unterminated").is_err());
        assert!(parse_command("node", "   ").is_err());
        assert!(parse_command("node", "definitely-not-on-path-kiln").is_err());
    }

    #[test]
    fn command_parsing_resolves_and_splits() {
        let (program, args) = parse_command("shell", "sh -c 'exit 0'").unwrap();
        assert!(program.ends_with("sh"));
        assert_eq!(args, vec!["-c".to_string(), "exit 0".to_string()]);
    }

    #[tokio::test]
    async fn close_is_idempotent_without_a_child() {
        let slot: ChildSlot = Arc::new(Mutex::new(None));
        let closer = CloseHandle::new("node", slot);
        assert!(!closer.is_closed());
        closer.close().await;
        closer.close().await;
        assert!(closer.is_closed());
    }
}
