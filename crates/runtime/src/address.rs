//! Where compiled modules live from a runtime's point of view.
//!
//! Runtimes never read the cache directly; they fetch compiled output over
//! HTTP from the dev server at
//! `<origin>/<cache folder>/<out folder>/<group>/<relative path>`. The out
//! folder flips to the instrumented one when coverage is requested, so the
//! same file executes with or without counters depending on the run.

use kiln_core::{
    Error, Result, DEFAULT_CACHE_FOLDER, OUT_FOLDER_COMPILED, OUT_FOLDER_INSTRUMENTED,
};
use url::Url;

#[derive(Debug, Clone)]
pub struct ModuleAddressing {
    origin: Url,
    cache_folder: String,
    group_id: String,
}

impl ModuleAddressing {
    /// Addresses modules served by `origin` for the given compatibility
    /// group.
    pub fn new(origin: Url, group_id: impl Into<String>) -> Self {
        Self {
            origin,
            cache_folder: DEFAULT_CACHE_FOLDER.to_string(),
            group_id: group_id.into(),
        }
    }

    /// Overrides the server's cache folder segment.
    pub fn with_cache_folder(mut self, folder: impl Into<String>) -> Self {
        self.cache_folder = folder.into();
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// URL a runtime imports to execute `relative_path`.
    pub fn module_url(&self, relative_path: &str, collect_coverage: bool) -> Result<Url> {
        let folder = if collect_coverage {
            OUT_FOLDER_INSTRUMENTED
        } else {
            OUT_FOLDER_COMPILED
        };
        let relative = relative_path.trim_start_matches('/');
        self.origin
            .join(&format!(
                "/{}/{}/{}/{}",
                self.cache_folder, folder, self.group_id, relative
            ))
            .map_err(|e| {
                Error::configuration(format!("cannot address module {relative_path}: {e}"))
            })
    }
}
