//! The ordered compile pipeline.
//!
//! `plan` resolves the option set for a request without touching the
//! toolchain; `generate` threads the source through the enabled stages in a
//! fixed order. Stages never run twice and never out of order.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use kiln_core::Result;
use serde_json::Value;
use tracing::debug;

use crate::options::{CompileOptions, CompileOverrides, OutputFolderKind, RemapMode};
use crate::transformer::{TransformRequest, TransformStage, Transformer};

/// One file to compile, with everything option resolution needs.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Project-relative path of the input, forward slashes.
    pub relative_path: String,
    pub source: String,
    pub folder_kind: OutputFolderKind,
    /// Plugins required by the profile this request resolved to.
    pub plugin_names: Vec<String>,
    pub overrides: CompileOverrides,
}

/// A named side artifact of a compile (source map, coverage skeleton).
#[derive(Debug, Clone, PartialEq)]
pub struct OutputAsset {
    pub name: String,
    pub content: String,
}

/// The primary transformed text plus its side artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOutput {
    pub output: String,
    pub assets: Vec<OutputAsset>,
}

impl GeneratedOutput {
    pub fn asset(&self, name: &str) -> Option<&OutputAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

/// Name of the source-map asset for an input path.
pub fn map_asset_name(relative_path: &str) -> String {
    format!("{}.map", basename(relative_path))
}

/// Name of the coverage-skeleton asset for an input path.
pub fn coverage_asset_name(relative_path: &str) -> String {
    format!("{}.coverage.json", basename(relative_path))
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

type InstrumentPredicate = Box<dyn Fn(&CompileRequest) -> bool + Send + Sync>;

pub struct Pipeline {
    transformer: Arc<dyn Transformer>,
    instrument_predicate: Option<InstrumentPredicate>,
}

impl Pipeline {
    pub fn new(transformer: Arc<dyn Transformer>) -> Self {
        Self {
            transformer,
            instrument_predicate: None,
        }
    }

    /// Restricts instrumentation to requests the predicate accepts, even when
    /// the resolved options ask for it.
    pub fn with_instrument_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CompileRequest) -> bool + Send + Sync + 'static,
    {
        self.instrument_predicate = Some(Box::new(predicate));
        self
    }

    /// Resolves the options for a request without invoking the toolchain.
    /// The result is the cache's branch equality key.
    pub fn plan(&self, request: &CompileRequest) -> CompileOptions {
        CompileOptions::resolve(
            request.folder_kind,
            request.plugin_names.clone(),
            &request.overrides,
        )
    }

    /// Runs the enabled stages over the request's source.
    pub async fn generate(
        &self,
        request: &CompileRequest,
        options: &CompileOptions,
    ) -> Result<GeneratedOutput> {
        debug!(path = %request.relative_path, "generating compiled output");

        let instrument = options.instrument
            && self
                .instrument_predicate
                .as_ref()
                .map_or(true, |predicate| predicate(request));

        let mut code = request.source.clone();
        let mut source_map: Option<Value> = None;
        let mut coverage: Option<Value> = None;

        let stages = [
            (TransformStage::Transpile, options.transpile),
            (TransformStage::Instrument, instrument),
            (TransformStage::Minify, options.minify),
            (TransformStage::Optimize, options.optimize),
        ];
        for (stage, enabled) in stages {
            if !enabled {
                continue;
            }
            let result = self
                .transformer
                .transform(TransformRequest {
                    stage,
                    relative_path: request.relative_path.clone(),
                    source: code.clone(),
                    plugin_names: if stage == TransformStage::Transpile {
                        options.plugin_names.clone()
                    } else {
                        Vec::new()
                    },
                })
                .await?;
            // An absent field means the stage left that part untouched.
            if let Some(next) = result.code {
                code = next;
            }
            if result.source_map.is_some() {
                source_map = result.source_map;
            }
            if result.coverage.is_some() {
                coverage = result.coverage;
            }
        }

        let mut assets = Vec::new();
        if let Some(coverage) = &coverage {
            assets.push(OutputAsset {
                name: coverage_asset_name(&request.relative_path),
                content: serde_json::to_string(coverage)?,
            });
        }

        if options.identify {
            code.push_str(&format!("\n//# sourceURL={}", request.relative_path));
        }
        if options.remap {
            if let Some(map) = &source_map {
                let body = serde_json::to_string(map)?;
                match options.remap_mode {
                    RemapMode::Comment => {
                        let name = map_asset_name(&request.relative_path);
                        code.push_str(&format!("\n//# sourceMappingURL={name}"));
                        assets.push(OutputAsset {
                            name,
                            content: body,
                        });
                    }
                    RemapMode::Inline => {
                        code.push_str(&format!(
                            "\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{}",
                            STANDARD.encode(body.as_bytes())
                        ));
                    }
                }
            }
        }

        Ok(GeneratedOutput {
            output: code,
            assets,
        })
    }
}
