//! The pluggable transform toolchain boundary.
//!
//! The pipeline never transforms source text itself. Each transforming stage
//! hands the current text to a [`Transformer`] and folds whatever comes back
//! into its context. The default production transformer shells out to an
//! external toolchain command speaking JSON over stdio.

use std::process::Stdio;

use async_trait::async_trait;
use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// The transforming stages of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStage {
    Transpile,
    Instrument,
    Minify,
    Optimize,
}

impl TransformStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transpile => "transpile",
            Self::Instrument => "instrument",
            Self::Minify => "minify",
            Self::Optimize => "optimize",
        }
    }
}

/// What a stage sends to the toolchain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub stage: TransformStage,
    pub relative_path: String,
    pub source: String,
    /// Plugins the selected profile requires; only meaningful for the
    /// transpile stage.
    pub plugin_names: Vec<String>,
}

/// What the toolchain returns. Every field is optional: an absent `code`
/// means the stage left the text unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOutput {
    pub code: Option<String>,
    pub source_map: Option<Value>,
    /// Per-file coverage skeleton, produced by the instrument stage.
    pub coverage: Option<Value>,
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, request: TransformRequest) -> Result<TransformOutput>;
}

/// Passes source through untouched. Useful when no toolchain is configured
/// and in tests that only exercise orchestration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransformer;

#[async_trait]
impl Transformer for IdentityTransformer {
    async fn transform(&self, _request: TransformRequest) -> Result<TransformOutput> {
        Ok(TransformOutput::default())
    }
}

/// Runs an external toolchain command once per stage invocation. The request
/// is written to the child's stdin as one JSON line; the child prints a
/// [`TransformOutput`] JSON document on stdout and exits.
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    /// Parses a shell-style command line and verifies the program resolves
    /// on PATH.
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = shlex::split(command_line)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "transformer command has unbalanced quoting: {command_line}"
                ))
            })?
            .into_iter();
        let program = parts.next().ok_or_else(|| {
            Error::configuration("transformer command is empty")
        })?;
        let program = which::which(&program)
            .map_err(|_| {
                Error::configuration(format!("transformer program not found: {program}"))
            })?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(&self, request: TransformRequest) -> Result<TransformOutput> {
        let stage = request.stage.as_str();
        debug!(stage, path = %request.relative_path, "invoking transformer");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                Error::transform(stage, format!("failed to spawn {}: {error}", self.program))
            })?;

        let request_json = serde_json::to_string(&request)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{request_json}\n").as_bytes())
                .await
                .map_err(|error| {
                    Error::transform(stage, format!("failed to write request: {error}"))
                })?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let output = child.wait_with_output().await.map_err(|error| {
            Error::transform(stage, format!("failed to collect output: {error}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::transform(
                stage,
                format!(
                    "toolchain exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|error| {
            Error::protocol(format!("malformed transformer output for {stage}: {error}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn identity_transformer_changes_nothing() {
        let output = IdentityTransformer
            .transform(TransformRequest {
                stage: TransformStage::Transpile,
                relative_path: "src/app.js".to_string(),
                source: "let a = 1".to_string(),
                plugin_names: vec![],
            })
            .await
            .unwrap();
        assert!(output.code.is_none());
        assert!(output.source_map.is_none());
    }

    #[test]
    fn command_parsing_rejects_garbage() {
        assert!(CommandTransformer::new("").is_err());
        assert!(CommandTransformer::new("sh -c 'unterminated").is_err());
        assert!(CommandTransformer::new("definitely-not-a-real-binary-42").is_err());
    }

    #[tokio::test]
    async fn command_transformer_round_trips_json() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "cat > /dev/null").unwrap();
        writeln!(script, r#"printf '{{"code":"transformed code"}}'"#).unwrap();
        let transformer =
            CommandTransformer::new(&format!("sh {}", script.path().display())).unwrap();

        let output = transformer
            .transform(TransformRequest {
                stage: TransformStage::Transpile,
                relative_path: "src/app.js".to_string(),
                source: "let a = 1".to_string(),
                plugin_names: vec!["transform-block-scoping".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(output.code.as_deref(), Some("transformed code"));
    }

    #[tokio::test]
    async fn command_transformer_surfaces_toolchain_failure() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "cat > /dev/null").unwrap();
        writeln!(script, "echo boom >&2").unwrap();
        writeln!(script, "exit 3").unwrap();
        let transformer =
            CommandTransformer::new(&format!("sh {}", script.path().display())).unwrap();

        let error = transformer
            .transform(TransformRequest {
                stage: TransformStage::Minify,
                relative_path: "src/app.js".to_string(),
                source: String::new(),
                plugin_names: vec![],
            })
            .await
            .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("minify"), "unexpected error: {message}");
        assert!(message.contains("boom"), "unexpected error: {message}");
    }
}
