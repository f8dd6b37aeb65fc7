//! Layered project configuration.
//!
//! Values resolve in precedence order: built-in defaults, then the optional
//! `kiln.json` at the project root, then command line flags (applied by the
//! individual commands). Sections mirror the structs the library crates
//! consume so the CLI stays a thin translation layer.

use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use kiln_compile::{CommandTransformer, IdentityTransformer, Pipeline};
use kiln_core::{Error, Result, DEFAULT_CACHE_FOLDER, DEFAULT_PROFILE_COUNT};
use kiln_profile::{PluginMatrix, ProfileSet, UsageStats};
use kiln_runtime::{PlanConfig, RuntimeDescriptor};
use kiln_server::ServerConfig;
use serde::{Deserialize, Serialize};

pub const PROJECT_CONFIG_FILENAME: &str = "kiln.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub cache: CacheOptions,
    pub serve: ServeOptions,
    pub test: TestOptions,
    /// Execution targets for `kiln test`.
    pub runtimes: Vec<RuntimeDescriptor>,
    /// Toolchain command line; omitted means source passes through untouched.
    pub transform_command: Option<String>,
    /// How many compatibility profiles to derive beside the fallback.
    pub profile_count: Option<usize>,
    /// Plugin compatibility data; omitted means the bundled table.
    pub plugin_matrix: Option<PluginMatrix>,
    /// Runtime usage weights; omitted means the bundled distribution.
    pub usage_stats: Option<UsageStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    pub folder: String,
    pub auto_clean: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            folder: DEFAULT_CACHE_FOLDER.to_string(),
            auto_clean: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServeOptions {
    pub listen: String,
    pub watch: bool,
    pub max_connections: usize,
    pub history_length: usize,
    pub debounce_ms: u64,
}

impl Default for ServeOptions {
    fn default() -> Self {
        let base = ServerConfig::default();
        Self {
            listen: base.listen,
            watch: base.watch,
            max_connections: base.max_connections,
            history_length: base.history_length,
            debounce_ms: base.debounce_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestOptions {
    pub test_globs: Vec<String>,
    pub coverage_globs: Vec<String>,
    pub coverage: bool,
    /// Compile group test executions address; defaults to `best`.
    pub group: Option<String>,
    /// Dev server origin; defaults to `http://<serve.listen>`.
    pub server_url: Option<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        let base = PlanConfig::default();
        Self {
            test_globs: base.test_globs,
            coverage_globs: base.coverage_globs,
            coverage: base.collect_coverage,
            group: None,
            server_url: None,
        }
    }
}

impl ProjectConfig {
    /// Loads `kiln.json` from the project root, or defaults when absent.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(PROJECT_CONFIG_FILENAME);
        match kiln_utils::read_optional(&path)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::configuration(format!("cannot parse '{}': {e}", path.display()))
            }),
            None => Ok(Self::default()),
        }
    }

    /// Builds the compile pipeline this project is configured for:
    /// the subprocess toolchain when a command is given, passthrough
    /// otherwise, with instrumentation limited to the coverage globs.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let pipeline = match &self.transform_command {
            Some(command) => Pipeline::new(Arc::new(CommandTransformer::new(command)?)),
            None => Pipeline::new(Arc::new(IdentityTransformer)),
        };
        let coverage = build_globs(&self.test.coverage_globs)?;
        Ok(pipeline
            .with_instrument_predicate(move |request| coverage.is_match(&request.relative_path)))
    }

    /// Derives the profile family from the configured (or bundled)
    /// compatibility matrix and usage weights.
    pub fn build_profiles(&self) -> Result<ProfileSet> {
        let matrix = self
            .plugin_matrix
            .clone()
            .unwrap_or_else(PluginMatrix::builtin);
        let stats = self.usage_stats.clone().unwrap_or_else(UsageStats::builtin);
        let count = self.profile_count.unwrap_or(DEFAULT_PROFILE_COUNT);
        ProfileSet::build(&matrix, &stats, count)
    }

    /// The server configuration the `serve` command hands to the dev server.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.serve.listen.clone(),
            cache_folder: self.cache.folder.clone(),
            watch: self.serve.watch,
            max_connections: self.serve.max_connections,
            history_length: self.serve.history_length,
            debounce_ms: self.serve.debounce_ms,
        }
    }
}

fn build_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::configuration(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::configuration(format!("cannot build glob set: {e}")))
}
