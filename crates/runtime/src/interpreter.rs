//! Server-side interpreter targets.
//!
//! Both variants launch the configured interpreter command as a child
//! process and read envelopes off its stdout. The direct variant is
//! one-shot: the module URL goes on the command line and the child exits
//! after printing its result. The isolated variant forks a child per
//! execution and drives it over stdin, which keeps module state out of the
//! parent interpreter and allows the child to be torn down independently.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_core::{Error, Result};
use tokio::io::BufReader;
use tokio::time::timeout;
use tracing::debug;

use crate::address::ModuleAddressing;
use crate::client::{
    await_result, drain_stderr, exit_rejection, parse_command, spawn_target, Execution,
    ExecutionRequest, RuntimeClient,
};
use crate::outcome::ExecutionOutcome;
use crate::protocol::{write_envelope, Envelope, ExecutePayload};

/// How long a child gets to exit after a close envelope before being
/// killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Runs the interpreter once per execution with the module URL as the
/// final argument. The child prints a result envelope on stdout and exits.
pub struct DirectInterpreter {
    name: String,
    program: String,
    args: Vec<String>,
    addressing: Arc<ModuleAddressing>,
}

impl DirectInterpreter {
    /// Parses the command line and verifies the interpreter resolves on
    /// PATH.
    pub fn new(
        name: impl Into<String>,
        command_line: &str,
        addressing: Arc<ModuleAddressing>,
    ) -> Result<Self> {
        let name = name.into();
        let (program, args) = parse_command(&name, command_line)?;
        Ok(Self {
            name,
            program,
            args,
            addressing,
        })
    }
}

#[async_trait]
impl RuntimeClient for DirectInterpreter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<Execution> {
        let url = self
            .addressing
            .module_url(&request.relative_path, request.collect_coverage)?;
        debug!(runtime = %self.name, url = %url, "launching direct execution");

        let (mut child, closer) = spawn_target(
            &self.name,
            &self.program,
            &self.args,
            &[url.to_string()],
            Stdio::null(),
        )?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::runtime_launch(&self.name, "stdout pipe missing"))?;
        let stderr = drain_stderr(child.stderr.take());
        closer.store_child(child).await;

        let name = self.name.clone();
        let driver_closer = closer.clone();
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            match await_result(&mut reader, None).await {
                Some(outcome) => {
                    if let Some(mut child) = driver_closer.take_child().await {
                        let _ = child.wait().await;
                    }
                    outcome
                }
                None => exit_rejection(&name, &driver_closer, stderr).await,
            }
        });
        Ok(Execution::new(&self.name, handle, closer, &request))
    }
}

/// Forks a fresh interpreter child per execution and drives it over the
/// envelope protocol: one execute request in, one result out, then a close.
pub struct IsolatedInterpreter {
    name: String,
    program: String,
    args: Vec<String>,
    addressing: Arc<ModuleAddressing>,
}

impl IsolatedInterpreter {
    pub fn new(
        name: impl Into<String>,
        command_line: &str,
        addressing: Arc<ModuleAddressing>,
    ) -> Result<Self> {
        let name = name.into();
        let (program, args) = parse_command(&name, command_line)?;
        Ok(Self {
            name,
            program,
            args,
            addressing,
        })
    }
}

#[async_trait]
impl RuntimeClient for IsolatedInterpreter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<Execution> {
        let url = self
            .addressing
            .module_url(&request.relative_path, request.collect_coverage)?;
        debug!(runtime = %self.name, url = %url, "launching isolated execution");

        let (mut child, closer) =
            spawn_target(&self.name, &self.program, &self.args, &[], Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::runtime_launch(&self.name, "stdout pipe missing"))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::runtime_launch(&self.name, "stdin pipe missing"))?;
        let stderr = drain_stderr(child.stderr.take());
        closer.store_child(child).await;

        let payload = ExecutePayload {
            url: url.to_string(),
            collect_coverage: request.collect_coverage,
        };
        let name = self.name.clone();
        let driver_closer = closer.clone();
        let handle = tokio::spawn(async move {
            match Envelope::execute(1, &payload) {
                Ok(envelope) => {
                    if let Err(e) = write_envelope(&mut stdin, &envelope).await {
                        // The read side will see the dead pipe as EOF.
                        debug!(runtime = %name, "failed to send execute request: {e}");
                    }
                }
                Err(e) => return ExecutionOutcome::rejected(e.to_string()),
            }

            let mut reader = BufReader::new(stdout);
            match await_result(&mut reader, Some(1)).await {
                Some(outcome) => {
                    let _ = write_envelope(&mut stdin, &Envelope::close(2)).await;
                    drop(stdin);
                    if let Some(child) = driver_closer.take_child().await {
                        reap_with_grace(&name, child).await;
                    }
                    outcome
                }
                None => exit_rejection(&name, &driver_closer, stderr).await,
            }
        });
        Ok(Execution::new(&self.name, handle, closer, &request))
    }
}

/// Waits for a child that was asked to close, killing it when the grace
/// period runs out.
async fn reap_with_grace(runtime: &str, mut child: tokio::process::Child) {
    if timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
        debug!(runtime, "child ignored close request, killing it");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}
