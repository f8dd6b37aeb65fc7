//! Batch test execution across runtime targets.
//!
//! A plan discovers the files its globs select, runs each one on every
//! configured runtime, and folds the coverage each execution reports into
//! one aggregated map. Files that are coverage-eligible but never executed
//! get a synthesized zero entry, so the report's keyset always equals the
//! eligible fileset.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use kiln_compile::Pipeline;
use kiln_core::{Error, Result};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::client::{ExecutionRequest, RuntimeClient};
use crate::coverage::{merge_coverage, synthesize_zero_coverage, CoverageMap};
use crate::outcome::ExecutionOutcome;

/// What a batch run should execute and collect.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Globs selecting the files to execute, project-relative.
    pub test_globs: Vec<String>,
    /// Globs selecting files that belong in the coverage report even when
    /// nothing executes them.
    pub coverage_globs: Vec<String>,
    pub collect_coverage: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            test_globs: vec!["**/*.test.js".to_string()],
            coverage_globs: vec!["src/**/*.js".to_string()],
            collect_coverage: false,
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    /// Per-file, per-runtime outcomes. Coverage is stripped from the
    /// individual outcomes once folded into the aggregate.
    pub files: BTreeMap<String, BTreeMap<String, ExecutionOutcome>>,
    pub coverage: CoverageMap,
}

impl ExecutionReport {
    pub fn execution_count(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    pub fn rejection_count(&self) -> usize {
        self.files
            .values()
            .flat_map(BTreeMap::values)
            .filter(|outcome| outcome.is_rejected())
            .count()
    }

    pub fn passed(&self) -> bool {
        self.rejection_count() == 0
    }
}

pub struct ExecutionPlan {
    project_root: PathBuf,
    pipeline: Arc<Pipeline>,
    clients: Vec<Arc<dyn RuntimeClient>>,
    test_globs: GlobSet,
    coverage_globs: GlobSet,
    collect_coverage: bool,
}

impl ExecutionPlan {
    pub fn new(
        project_root: impl Into<PathBuf>,
        pipeline: Arc<Pipeline>,
        clients: Vec<Arc<dyn RuntimeClient>>,
        config: PlanConfig,
    ) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::configuration("no runtime targets configured"));
        }
        Ok(Self {
            project_root: project_root.into(),
            pipeline,
            clients,
            test_globs: compile_globs(&config.test_globs)?,
            coverage_globs: compile_globs(&config.coverage_globs)?,
            collect_coverage: config.collect_coverage,
        })
    }

    /// Files the test globs select, sorted for a stable run order.
    pub fn discover_tests(&self) -> Result<Vec<String>> {
        self.discover(&self.test_globs)
    }

    /// Runs every selected file on every runtime.
    pub async fn run(&self) -> Result<ExecutionReport> {
        let tests = self.discover(&self.test_globs)?;
        info!(
            files = tests.len(),
            runtimes = self.clients.len(),
            coverage = self.collect_coverage,
            "starting batch execution"
        );

        let mut report = ExecutionReport {
            files: BTreeMap::new(),
            coverage: CoverageMap::new(),
        };
        for relative_path in &tests {
            let mut per_runtime = BTreeMap::new();
            for client in &self.clients {
                let request = ExecutionRequest {
                    relative_path: relative_path.clone(),
                    collect_coverage: self.collect_coverage,
                    auto_close: true,
                    auto_close_on_error: false,
                };
                let mut outcome = client.execute(request).await?.wait().await?;
                if let Some(coverage) = outcome.coverage.take() {
                    merge_coverage(&mut report.coverage, coverage);
                }
                debug!(
                    file = %relative_path,
                    runtime = client.name(),
                    status = ?outcome.status,
                    "execution finished"
                );
                per_runtime.insert(client.name().to_string(), outcome);
            }
            report.files.insert(relative_path.clone(), per_runtime);
        }

        if self.collect_coverage {
            self.fill_missing_coverage(&mut report.coverage).await?;
        }
        Ok(report)
    }

    async fn fill_missing_coverage(&self, coverage: &mut CoverageMap) -> Result<()> {
        for relative_path in self.discover(&self.coverage_globs)? {
            if coverage.contains_key(&relative_path) {
                continue;
            }
            let path = self.project_root.join(&relative_path);
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::file_system(&path, "read source", e))?;
            let entry = synthesize_zero_coverage(&self.pipeline, &relative_path, source).await?;
            debug!(file = %relative_path, "synthesized zero coverage");
            coverage.insert(relative_path, entry);
        }
        Ok(())
    }

    fn discover(&self, globs: &GlobSet) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let walk = WalkDir::new(&self.project_root)
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));
        for entry in walk {
            let entry = entry
                .map_err(|e| Error::file_system(&self.project_root, "walk project", e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.project_root) else {
                continue;
            };
            if globs.is_match(relative) {
                files.push(relative.to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| Error::configuration(format!("invalid glob '{pattern}': {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::configuration(format!("cannot build glob set: {e}")))
}
