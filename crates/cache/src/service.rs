//! The compile service: branch-cache resolution in front of the pipeline.
//!
//! Every request for the same input file runs inside the lock slot keyed by
//! that file's record path, so concurrent requests never interleave writes.
//! Distinct files resolve fully concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_compile::{
    CompileOptions, CompileOverrides, CompileRequest, OutputAsset, OutputFolderKind, Pipeline,
};
use kiln_core::{epoch_ms, Error, Result};
use kiln_utils::{etag_from_str, LockRegistry};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::record::{Branch, CacheRecord};
use crate::store::RecordStore;

/// How the cache satisfied a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    /// Served from a verified existing branch, pipeline not invoked.
    Cached,
    /// No branch matched the resolved options; a new one was compiled.
    Created,
    /// A branch matched but was stale; its artifacts were recompiled.
    Updated,
}

impl CompileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// Why a matched branch could not be served as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaleReason {
    InputChanged,
    ArtifactsUnreadable,
}

impl StaleReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InputChanged => "input-changed",
            Self::ArtifactsUnreadable => "artifacts-unreadable",
        }
    }
}

/// One compile resolution request.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Project-relative input path, forward slashes.
    pub relative_path: String,
    pub folder_kind: OutputFolderKind,
    /// Plugins required by the profile the caller resolved for the client.
    pub plugin_names: Vec<String>,
    pub overrides: CompileOverrides,
    /// Value of the client's conditional header, if any.
    pub client_etag: Option<String>,
    /// Physical source override; pass only when the input does not live at
    /// `<project_root>/<relative_path>`.
    pub input_location: Option<PathBuf>,
}

impl ResolveRequest {
    pub fn new(relative_path: impl Into<String>, folder_kind: OutputFolderKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            folder_kind,
            plugin_names: Vec::new(),
            overrides: CompileOverrides::default(),
            client_etag: None,
            input_location: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub status: CompileStatus,
    pub output: String,
    pub assets: Vec<OutputAsset>,
    /// Location of the compiled output relative to the cache root.
    pub output_relative_location: String,
    pub input_etag: String,
    /// The client's conditional header matched; `output` and `assets` are
    /// empty and the caller may answer not-modified.
    pub client_match: bool,
}

pub struct CacheService {
    project_root: PathBuf,
    store: RecordStore,
    pipeline: Arc<Pipeline>,
    locks: LockRegistry,
    auto_clean: bool,
}

impl CacheService {
    pub fn new(
        project_root: impl Into<PathBuf>,
        cache_root: impl Into<PathBuf>,
        pipeline: Arc<Pipeline>,
        auto_clean: bool,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            store: RecordStore::new(cache_root),
            pipeline,
            locks: LockRegistry::new(),
            auto_clean,
        }
    }

    pub fn cache_root(&self) -> &Path {
        self.store.cache_root()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Resolves one request to compiled output, serialized per input file.
    pub async fn resolve(&self, request: ResolveRequest) -> Result<CompileResult> {
        let key = self
            .store
            .record_path(&request.relative_path)
            .to_string_lossy()
            .into_owned();
        self.locks.run(&key, self.resolve_locked(request)).await
    }

    /// Reads one asset of the branch matching the given options without
    /// compiling anything on miss.
    pub async fn peek_asset(
        &self,
        relative_path: &str,
        folder_kind: OutputFolderKind,
        plugin_names: Vec<String>,
        overrides: &CompileOverrides,
        asset_name: &str,
    ) -> Result<Option<String>> {
        let key = self
            .store
            .record_path(relative_path)
            .to_string_lossy()
            .into_owned();
        let task = async {
            let Some(record) = self.store.load(relative_path).await? else {
                return Ok(None);
            };
            let options = CompileOptions::resolve(folder_kind, plugin_names, overrides);
            let meta = serde_json::to_value(&options)?;
            let Some(index) = record.find_branch(&meta) else {
                return Ok(None);
            };
            self.store
                .read_asset(relative_path, &record.branches[index].name, asset_name)
                .await
        };
        self.locks.run(&key, task).await
    }

    async fn resolve_locked(&self, request: ResolveRequest) -> Result<CompileResult> {
        let relative_path = request.relative_path.clone();
        let input_path = request
            .input_location
            .clone()
            .unwrap_or_else(|| self.project_root.join(&relative_path));
        let source = fs::read_to_string(&input_path)
            .await
            .map_err(|e| Error::file_system(&input_path, "read input", e))?;
        let input_etag = etag_from_str(&source);

        let (mut record, input_changed) = match self.store.load(&relative_path).await? {
            Some(record) => {
                let changed = record.input_etag != input_etag;
                (record, changed)
            }
            None => (CacheRecord::new(&relative_path, &input_etag), false),
        };
        if let Some(location) = &request.input_location {
            record.input_location = Some(location.to_string_lossy().into_owned());
        }

        let compile_request = CompileRequest {
            relative_path: relative_path.clone(),
            source,
            folder_kind: request.folder_kind,
            plugin_names: request.plugin_names.clone(),
            overrides: request.overrides.clone(),
        };
        let options = self.pipeline.plan(&compile_request);
        let meta = serde_json::to_value(&options)?;

        match record.find_branch(&meta) {
            None => {
                self.compile_into_new_branch(
                    record,
                    compile_request,
                    options,
                    meta,
                    input_etag,
                    input_changed,
                )
                .await
            }
            Some(index) if input_changed => {
                self.recompile_branch(
                    record,
                    index,
                    compile_request,
                    options,
                    input_etag,
                    StaleReason::InputChanged,
                )
                .await
            }
            Some(index) => {
                // Input unchanged: the client's conditional header can spare
                // us the artifact verification entirely.
                if request.client_etag.as_deref() == Some(input_etag.as_str()) {
                    return self.record_hit(record, index, input_etag, true, Vec::new(), String::new()).await;
                }
                match self
                    .store
                    .read_branch_verified(&relative_path, &record.branches[index])
                    .await?
                {
                    Some((output, assets)) => {
                        self.record_hit(record, index, input_etag, false, assets, output)
                            .await
                    }
                    None => {
                        self.recompile_branch(
                            record,
                            index,
                            compile_request,
                            options,
                            input_etag,
                            StaleReason::ArtifactsUnreadable,
                        )
                        .await
                    }
                }
            }
        }
    }

    /// Cache miss: run the pipeline, persist a brand-new branch.
    async fn compile_into_new_branch(
        &self,
        mut record: CacheRecord,
        compile_request: CompileRequest,
        options: CompileOptions,
        meta: Value,
        input_etag: String,
        input_changed: bool,
    ) -> Result<CompileResult> {
        let relative_path = compile_request.relative_path.clone();
        let generated = self.pipeline.generate(&compile_request, &options).await?;

        let mut branch = Branch::new(meta, Vec::new());
        branch.output_assets = self
            .store
            .write_branch(&relative_path, &branch.name, &generated)
            .await?;

        if input_changed && self.auto_clean {
            self.prune_branches(&mut record, &relative_path, None).await?;
        }
        record.input_etag = input_etag.clone();
        let branch_name = branch.name.clone();
        record.branches.push(branch);
        self.store.save(&record).await?;

        info!(path = %relative_path, branch = %branch_name, "compiled new branch");
        Ok(CompileResult {
            status: CompileStatus::Created,
            output: generated.output,
            assets: generated.assets,
            output_relative_location: RecordStore::output_relative_location(
                &relative_path,
                &branch_name,
            ),
            input_etag,
            client_match: false,
        })
    }

    /// A branch matched but cannot be served: regenerate its artifacts in
    /// place and, on input change with auto-clean, drop every sibling.
    async fn recompile_branch(
        &self,
        mut record: CacheRecord,
        index: usize,
        compile_request: CompileRequest,
        options: CompileOptions,
        input_etag: String,
        reason: StaleReason,
    ) -> Result<CompileResult> {
        let relative_path = compile_request.relative_path.clone();
        let generated = self.pipeline.generate(&compile_request, &options).await?;

        let branch_name = record.branches[index].name.clone();
        let descriptors = self
            .store
            .write_branch(&relative_path, &branch_name, &generated)
            .await?;

        if reason == StaleReason::InputChanged && self.auto_clean {
            self.prune_branches(&mut record, &relative_path, Some(&branch_name))
                .await?;
        }
        // Prune may have reordered; address the branch by name.
        let branch = record
            .branches
            .iter_mut()
            .find(|branch| branch.name == branch_name)
            .ok_or_else(|| {
                Error::cache_record(
                    self.store.record_path(&relative_path),
                    "branch vanished during recompile",
                )
            })?;
        branch.output_assets = descriptors;
        branch.last_modified_ms = epoch_ms();
        record.input_etag = input_etag.clone();
        self.store.save(&record).await?;

        info!(
            path = %relative_path,
            branch = %branch_name,
            reason = reason.as_str(),
            "recompiled stale branch"
        );
        Ok(CompileResult {
            status: CompileStatus::Updated,
            output: generated.output,
            assets: generated.assets,
            output_relative_location: RecordStore::output_relative_location(
                &relative_path,
                &branch_name,
            ),
            input_etag,
            client_match: false,
        })
    }

    /// Valid hit: bump the branch counters and persist them.
    async fn record_hit(
        &self,
        mut record: CacheRecord,
        index: usize,
        input_etag: String,
        client_match: bool,
        assets: Vec<OutputAsset>,
        output: String,
    ) -> Result<CompileResult> {
        let relative_path = record.input_relative_location.clone();
        {
            let branch = &mut record.branches[index];
            branch.match_count += 1;
            branch.last_match_ms = epoch_ms();
        }
        let branch_name = record.branches[index].name.clone();
        self.store.save(&record).await?;

        debug!(path = %relative_path, branch = %branch_name, client_match, "cache hit");
        Ok(CompileResult {
            status: CompileStatus::Cached,
            output,
            assets,
            output_relative_location: RecordStore::output_relative_location(
                &relative_path,
                &branch_name,
            ),
            input_etag,
            client_match,
        })
    }

    /// Deletes every branch except `keep` (entry and on-disk folder). Stale
    /// branches never outlive an input change.
    async fn prune_branches(
        &self,
        record: &mut CacheRecord,
        relative_path: &str,
        keep: Option<&str>,
    ) -> Result<()> {
        let mut kept = Vec::new();
        for branch in std::mem::take(&mut record.branches) {
            if Some(branch.name.as_str()) == keep {
                kept.push(branch);
                continue;
            }
            self.store.remove_branch(relative_path, &branch.name).await?;
            debug!(path = %relative_path, branch = %branch.name, "pruned stale branch");
        }
        record.branches = kept;
        Ok(())
    }
}
