//! Derives the family of compile profiles served under the group segment of
//! compiled URLs.
//!
//! Profile derivation walks each runtime's version thresholds to build
//! per-runtime plugin groups, composes the groups across runtimes, scores
//! them against usage statistics and reduces them to a fixed-size family
//! ordered from least to most transforms applied.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use kiln_core::{
    Error, Result, BEST_PROFILE_ID, FALLBACK_PROFILE_ID, WORST_PROFILE_ID,
};
use serde::{Deserialize, Serialize};

use crate::matrix::{PluginMatrix, UsageStats};
use crate::version::RuntimeVersion;

/// One entry of the profile family: the plugins to apply and the minimum
/// runtime versions the result is good for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileProfile {
    pub id: String,
    /// Sorted plugin names this profile applies.
    pub plugin_names: Vec<String>,
    /// Minimum version per runtime. A runtime with no entry is considered
    /// compatible with this profile at any version.
    pub compat_map: BTreeMap<String, RuntimeVersion>,
}

impl CompileProfile {
    fn matches(&self, runtime: &str, version: RuntimeVersion) -> bool {
        match self.compat_map.get(runtime) {
            None => true,
            Some(minimum) => *minimum <= version,
        }
    }
}

/// The derived profile family plus the catch-all fallback profile.
///
/// Profiles are held in lookup order: ascending plugin count, so the first
/// match is always the one applying the fewest transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSet {
    profiles: Vec<CompileProfile>,
    fallback: CompileProfile,
}

#[derive(Debug, Clone)]
struct Group {
    plugin_names: BTreeSet<String>,
    compat_map: BTreeMap<String, RuntimeVersion>,
}

impl ProfileSet {
    /// Derives at most `count` profiles from the matrix, weighted by `stats`.
    pub fn build(matrix: &PluginMatrix, stats: &UsageStats, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::configuration("profile count must be at least 1"));
        }
        let mut groups: Vec<Group> = Vec::new();
        for runtime in matrix.runtime_names() {
            compose(&mut groups, runtime_groups(matrix, &runtime));
        }
        let profiles = label(reduce(groups, stats, count));
        let fallback = CompileProfile {
            id: FALLBACK_PROFILE_ID.to_string(),
            plugin_names: matrix.plugin_names().map(str::to_string).collect(),
            compat_map: BTreeMap::new(),
        };
        Ok(Self { profiles, fallback })
    }

    pub fn profiles(&self) -> &[CompileProfile] {
        &self.profiles
    }

    /// The profile applying every known plugin, served when nothing else
    /// matches. Its id is always `otherwise`.
    pub fn fallback(&self) -> &CompileProfile {
        &self.fallback
    }

    /// First profile compatible with the runtime at the given version.
    ///
    /// Profiles are scanned from fewest to most plugins, so the result is the
    /// least transformed output the client can run. A profile with no entry
    /// for the runtime matches unconditionally.
    pub fn lookup(&self, runtime: &str, version: RuntimeVersion) -> &CompileProfile {
        self.profiles
            .iter()
            .find(|profile| profile.matches(runtime, version))
            .unwrap_or(&self.fallback)
    }

    /// Finds a profile (or the fallback) by its id, for validating the group
    /// segment of compiled URLs.
    pub fn by_id(&self, id: &str) -> Option<&CompileProfile> {
        if id == self.fallback.id {
            return Some(&self.fallback);
        }
        self.profiles.iter().find(|profile| profile.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.iter().map(|p| p.id.as_str()).collect();
        ids.push(self.fallback.id.as_str());
        ids
    }
}

/// Builds the group chain for one runtime: for every version threshold found
/// in the matrix (plus a synthetic 0.0.0 floor), the set of plugins still
/// required at that version.
fn runtime_groups(matrix: &PluginMatrix, runtime: &str) -> Vec<Group> {
    let mut thresholds: BTreeSet<RuntimeVersion> = BTreeSet::new();
    thresholds.insert(RuntimeVersion::ZERO);
    for (_, compat) in matrix.iter() {
        if let Some(version) = compat.get(runtime) {
            thresholds.insert(*version);
        }
    }
    thresholds
        .into_iter()
        .map(|threshold| {
            let plugin_names = matrix
                .iter()
                .filter_map(|(name, compat)| match compat.get(runtime) {
                    Some(minimum) if threshold >= *minimum => None,
                    // Still below the version that drops the requirement, or
                    // no data for this runtime at all: keep the plugin.
                    _ => Some(name.clone()),
                })
                .collect();
            let mut compat_map = BTreeMap::new();
            compat_map.insert(runtime.to_string(), threshold);
            Group {
                plugin_names,
                compat_map,
            }
        })
        .collect()
}

/// Merges one runtime's chain into the accumulated cross-runtime groups.
/// Groups with identical plugin sets fuse, keeping the higher version for
/// any runtime both sides mention so no requirement is relaxed.
fn compose(groups: &mut Vec<Group>, incoming: Vec<Group>) {
    for candidate in incoming {
        match groups
            .iter_mut()
            .find(|group| group.plugin_names == candidate.plugin_names)
        {
            Some(existing) => {
                for (runtime, version) in candidate.compat_map {
                    existing
                        .compat_map
                        .entry(runtime)
                        .and_modify(|current| *current = (*current).max(version))
                        .or_insert(version);
                }
            }
            None => groups.push(candidate),
        }
    }
}

fn score(group: &Group, stats: &UsageStats) -> f64 {
    group
        .compat_map
        .iter()
        .map(|(runtime, version)| stats.weight(runtime, *version))
        .sum()
}

/// Sorts groups by usage score and folds them into at most `count` groups by
/// merging contiguous runs. A merged group unions the plugin sets and keeps
/// the lowest version per runtime, so it still covers every client its
/// members covered.
fn reduce(groups: Vec<Group>, stats: &UsageStats, count: usize) -> Vec<Group> {
    let mut scored: Vec<(f64, Group)> = groups
        .into_iter()
        .map(|group| (score(&group, stats), group))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let chunk_len = scored.len().div_ceil(count).max(1);
    scored
        .chunks(chunk_len)
        .map(|chunk| {
            let mut merged = chunk[0].1.clone();
            for (_, group) in &chunk[1..] {
                merged
                    .plugin_names
                    .extend(group.plugin_names.iter().cloned());
                for (runtime, version) in &group.compat_map {
                    merged
                        .compat_map
                        .entry(runtime.clone())
                        .and_modify(|current| *current = (*current).min(*version))
                        .or_insert(*version);
                }
            }
            merged
        })
        .collect()
}

/// Orders groups from fewest to most plugins and assigns stable ids.
fn label(mut groups: Vec<Group>) -> Vec<CompileProfile> {
    groups.sort_by_key(|group| group.plugin_names.len());
    let last = groups.len().saturating_sub(1);
    groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let id = if index == 0 {
                BEST_PROFILE_ID.to_string()
            } else if index == last {
                WORST_PROFILE_ID.to_string()
            } else {
                format!("intermediate-{index}")
            };
            CompileProfile {
                id,
                plugin_names: group.plugin_names.into_iter().collect(),
                compat_map: group.compat_map,
            }
        })
        .collect()
}
