//! Config-level description of runtime targets.

use std::sync::Arc;

use kiln_core::Result;
use serde::{Deserialize, Serialize};

use crate::address::ModuleAddressing;
use crate::browser::BrowserRuntime;
use crate::client::RuntimeClient;
use crate::interpreter::{DirectInterpreter, IsolatedInterpreter};

/// How a configured runtime is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// One-shot interpreter invocation per execution.
    Direct,
    /// Fresh interpreter child per execution, driven over stdin.
    Isolated,
    /// Automation driver that navigates a browser page.
    Browser,
}

/// One runtime target as project configuration declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDescriptor {
    /// Name matching the compatibility matrix ("node", "chrome", ...).
    pub name: String,
    pub kind: RuntimeKind,
    /// Shell-style command line of the interpreter or automation driver.
    pub command: String,
}

impl RuntimeDescriptor {
    /// Builds the client this descriptor describes. Fails when the command
    /// line does not parse or its program is not on PATH.
    pub fn into_client(self, addressing: Arc<ModuleAddressing>) -> Result<Arc<dyn RuntimeClient>> {
        let Self {
            name,
            kind,
            command,
        } = self;
        Ok(match kind {
            RuntimeKind::Direct => Arc::new(DirectInterpreter::new(name, &command, addressing)?),
            RuntimeKind::Isolated => {
                Arc::new(IsolatedInterpreter::new(name, &command, addressing)?)
            }
            RuntimeKind::Browser => Arc::new(BrowserRuntime::new(name, &command, addressing)?),
        })
    }
}
