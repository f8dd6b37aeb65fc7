//! The persisted cache data model.

use kiln_core::epoch_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One cached compiled variant of an input file, keyed by its exact resolved
/// option set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Opaque unique id, also the branch folder name on disk.
    pub name: String,
    /// The full resolved options. Two branches are the same variant iff this
    /// value serializes identically.
    pub output_meta: Value,
    pub output_assets: Vec<BranchAsset>,
    /// Incremented on every valid cache hit.
    pub match_count: u64,
    pub created_ms: i64,
    pub last_modified_ms: i64,
    pub last_match_ms: i64,
}

impl Branch {
    pub fn new(output_meta: Value, output_assets: Vec<BranchAsset>) -> Self {
        let now = epoch_ms();
        Self {
            name: Uuid::new_v4().to_string(),
            output_meta,
            output_assets,
            match_count: 0,
            created_ms: now,
            last_modified_ms: now,
            last_match_ms: now,
        }
    }
}

/// A named side artifact persisted next to a branch's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchAsset {
    pub name: String,
    #[serde(rename = "eTag")]
    pub etag: String,
}

/// The cache record for one logical input file. Exactly one exists per input
/// file per cache root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// Stable key, never rewritten after creation.
    pub input_relative_location: String,
    #[serde(rename = "inputETag")]
    pub input_etag: String,
    /// Physical source location, set only when it diverges from the path
    /// derived from `input_relative_location`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_location: Option<String>,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

impl CacheRecord {
    pub fn new(input_relative_location: impl Into<String>, input_etag: impl Into<String>) -> Self {
        Self {
            input_relative_location: input_relative_location.into(),
            input_etag: input_etag.into(),
            input_location: None,
            branches: Vec::new(),
        }
    }

    /// Index of the branch whose resolved options equal `meta`, if any.
    pub fn find_branch(&self, meta: &Value) -> Option<usize> {
        self.branches
            .iter()
            .position(|branch| &branch.output_meta == meta)
    }
}
