//! On-disk cache layout and raw record/branch I/O.
//!
//! Each input file gets a directory mirroring its relative path under the
//! cache root:
//!
//! ```text
//! <cache_root>/<relative_path>/record.json
//! <cache_root>/<relative_path>/<branch_name>/<input basename>
//! <cache_root>/<relative_path>/<branch_name>/<asset name>
//! ```

use std::path::{Path, PathBuf};

use kiln_compile::{GeneratedOutput, OutputAsset};
use kiln_core::{Error, Result, CACHE_RECORD_FILENAME};
use kiln_utils::{etag_from_str, read_optional_async, write_atomic_async};
use tokio::fs;

use crate::record::{Branch, BranchAsset, CacheRecord};

#[derive(Debug, Clone)]
pub struct RecordStore {
    cache_root: PathBuf,
}

impl RecordStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn record_dir(&self, relative_path: &str) -> PathBuf {
        self.cache_root.join(relative_path)
    }

    pub fn record_path(&self, relative_path: &str) -> PathBuf {
        self.record_dir(relative_path).join(CACHE_RECORD_FILENAME)
    }

    pub fn branch_dir(&self, relative_path: &str, branch_name: &str) -> PathBuf {
        self.record_dir(relative_path).join(branch_name)
    }

    /// Basename the compiled output is stored under inside a branch folder.
    pub fn output_name(relative_path: &str) -> &str {
        Path::new(relative_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(relative_path)
    }

    pub fn output_path(&self, relative_path: &str, branch_name: &str) -> PathBuf {
        self.branch_dir(relative_path, branch_name)
            .join(Self::output_name(relative_path))
    }

    pub fn asset_path(&self, relative_path: &str, branch_name: &str, asset: &str) -> PathBuf {
        self.branch_dir(relative_path, branch_name).join(asset)
    }

    /// Location of a branch's compiled output, relative to the cache root.
    pub fn output_relative_location(relative_path: &str, branch_name: &str) -> String {
        format!(
            "{relative_path}/{branch_name}/{}",
            Self::output_name(relative_path)
        )
    }

    /// Loads the record for an input file, if one exists.
    ///
    /// A record that fails to parse, or that claims a different input than
    /// the directory it lives under, is fatal rather than treated as a miss.
    pub async fn load(&self, relative_path: &str) -> Result<Option<CacheRecord>> {
        let path = self.record_path(relative_path);
        let Some(bytes) = read_optional_async(&path).await? else {
            return Ok(None);
        };
        let record: CacheRecord = serde_json::from_slice(&bytes)
            .map_err(|error| Error::cache_record(&path, format!("corrupted record: {error}")))?;
        if record.input_relative_location != relative_path {
            return Err(Error::cache_record(
                &path,
                format!(
                    "record claims input '{}' but lives under '{relative_path}'",
                    record.input_relative_location
                ),
            ));
        }
        Ok(Some(record))
    }

    pub async fn save(&self, record: &CacheRecord) -> Result<()> {
        let path = self.record_path(&record.input_relative_location);
        let body = serde_json::to_vec_pretty(record)?;
        write_atomic_async(&path, &body).await
    }

    /// Writes a branch's output and assets, returning asset descriptors with
    /// fresh etags. Artifacts always land before the record referencing them.
    pub async fn write_branch(
        &self,
        relative_path: &str,
        branch_name: &str,
        generated: &GeneratedOutput,
    ) -> Result<Vec<BranchAsset>> {
        let output_path = self.output_path(relative_path, branch_name);
        write_atomic_async(&output_path, generated.output.as_bytes()).await?;

        let mut descriptors = Vec::with_capacity(generated.assets.len());
        for asset in &generated.assets {
            let path = self.asset_path(relative_path, branch_name, &asset.name);
            write_atomic_async(&path, asset.content.as_bytes()).await?;
            descriptors.push(BranchAsset {
                name: asset.name.clone(),
                etag: etag_from_str(&asset.content),
            });
        }
        Ok(descriptors)
    }

    pub async fn read_output(
        &self,
        relative_path: &str,
        branch_name: &str,
    ) -> Result<Option<String>> {
        let path = self.output_path(relative_path, branch_name);
        read_text(&path).await
    }

    pub async fn read_asset(
        &self,
        relative_path: &str,
        branch_name: &str,
        asset: &str,
    ) -> Result<Option<String>> {
        let path = self.asset_path(relative_path, branch_name, asset);
        read_text(&path).await
    }

    /// Reads a branch's persisted output and assets, checking every asset's
    /// stored etag against its on-disk content. Anything missing or stale
    /// degrades the whole branch to `None`.
    pub async fn read_branch_verified(
        &self,
        relative_path: &str,
        branch: &Branch,
    ) -> Result<Option<(String, Vec<OutputAsset>)>> {
        let Some(output) = self.read_output(relative_path, &branch.name).await? else {
            return Ok(None);
        };
        let mut assets = Vec::with_capacity(branch.output_assets.len());
        for descriptor in &branch.output_assets {
            let Some(content) = self
                .read_asset(relative_path, &branch.name, &descriptor.name)
                .await?
            else {
                return Ok(None);
            };
            if etag_from_str(&content) != descriptor.etag {
                return Ok(None);
            }
            assets.push(OutputAsset {
                name: descriptor.name.clone(),
                content,
            });
        }
        Ok(Some((output, assets)))
    }

    /// Removes a branch folder and everything in it. Absent folders are fine.
    pub async fn remove_branch(&self, relative_path: &str, branch_name: &str) -> Result<()> {
        let dir = self.branch_dir(relative_path, branch_name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_system(dir, "remove branch directory", e)),
        }
    }
}

async fn read_text(path: &Path) -> Result<Option<String>> {
    let Some(bytes) = read_optional_async(path).await? else {
        return Ok(None);
    };
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| Error::cache_record(path, "artifact is not valid utf-8"))
}
