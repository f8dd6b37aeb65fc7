//! Runtime execution for kiln: launching server-side interpreters and
//! automated browser pages against compiled module URLs, normalizing their
//! results, and aggregating coverage across a batch run.
//!
//! Targets only ever see the dev server's HTTP surface; nothing in this
//! crate touches the compile cache directly.

pub mod address;
pub mod browser;
pub mod client;
pub mod coverage;
pub mod descriptor;
pub mod interpreter;
pub mod outcome;
pub mod plan;
pub mod protocol;

pub use address::ModuleAddressing;
pub use browser::BrowserRuntime;
pub use client::{CloseHandle, Execution, ExecutionRequest, RuntimeClient};
pub use coverage::{merge_coverage, synthesize_zero_coverage, CoverageMap, FileCoverage};
pub use descriptor::{RuntimeDescriptor, RuntimeKind};
pub use interpreter::{DirectInterpreter, IsolatedInterpreter};
pub use outcome::{ExecutionError, ExecutionOutcome, ExecutionStatus};
pub use plan::{ExecutionPlan, ExecutionReport, PlanConfig};
pub use protocol::{read_envelope, write_envelope, Envelope, EnvelopeKind, ExecutePayload};
