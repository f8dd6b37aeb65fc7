//! Browser targets driven through an automation driver process.
//!
//! The driver receives the compiled module URL as its final argument,
//! launches the browser, navigates a page to the URL and reports the
//! outcome through the envelope protocol on stdout. Unlike the server-side
//! interpreters the driver stays alive after the result so the page can be
//! inspected; closing the execution tears the driver and its browser down.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::{Error, Result};
use tokio::io::BufReader;
use tracing::debug;

use crate::address::ModuleAddressing;
use crate::client::{
    await_result, drain_stderr, exit_rejection, parse_command, spawn_target, Execution,
    ExecutionRequest, RuntimeClient,
};

pub struct BrowserRuntime {
    name: String,
    program: String,
    args: Vec<String>,
    addressing: Arc<ModuleAddressing>,
}

impl BrowserRuntime {
    /// Parses the driver command line and verifies it resolves on PATH.
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
impl RuntimeClient for BrowserRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<Execution> {
        let url = self
            .addressing
            .module_url(&request.relative_path, request.collect_coverage)?;
        debug!(runtime = %self.name, url = %url, "navigating browser page");

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
                // The driver keeps the page open; the close handle owns
                // teardown.
                Some(outcome) => outcome,
                None => exit_rejection(&name, &driver_closer, stderr).await,
            }
        });
        Ok(Execution::new(&self.name, handle, closer, &request))
    }
}
