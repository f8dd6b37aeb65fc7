//! Plugin compatibility data and runtime usage statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::version::RuntimeVersion;

/// For every transform plugin, the minimum runtime version that no longer
/// needs it. A plugin with no entry for a runtime is assumed to be required
/// on every version of that runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginMatrix {
    plugins: BTreeMap<String, BTreeMap<String, RuntimeVersion>>,
}

impl PluginMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `runtime` stops needing `plugin` at `version`.
    pub fn insert(&mut self, plugin: &str, runtime: &str, version: RuntimeVersion) {
        self.plugins
            .entry(plugin.to_string())
            .or_default()
            .insert(runtime.to_string(), version);
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&String, &BTreeMap<String, RuntimeVersion>)> {
        self.plugins.iter()
    }

    /// All plugin names, in sorted order.
    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Every runtime named by at least one plugin entry.
    pub fn runtime_names(&self) -> BTreeSet<String> {
        self.plugins
            .values()
            .flat_map(|compat| compat.keys().cloned())
            .collect()
    }

    pub fn requirement(&self, plugin: &str, runtime: &str) -> Option<RuntimeVersion> {
        self.plugins.get(plugin)?.get(runtime).copied()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// A baseline matrix for the transforms the bundled compiler applies,
    /// used when the project configuration does not supply its own.
    pub fn builtin() -> Self {
        let mut matrix = Self::new();
        let entries: &[(&str, &[(&str, &str)])] = &[
            (
                "transform-template-literals",
                &[("chrome", "41"), ("firefox", "34"), ("safari", "9"), ("node", "4")],
            ),
            (
                "transform-arrow-functions",
                &[("chrome", "47"), ("firefox", "45"), ("safari", "10"), ("node", "6")],
            ),
            (
                "transform-block-scoping",
                &[("chrome", "49"), ("firefox", "51"), ("safari", "10"), ("node", "6")],
            ),
            (
                "transform-classes",
                &[("chrome", "46"), ("firefox", "45"), ("safari", "10"), ("node", "6")],
            ),
            (
                "transform-spread",
                &[("chrome", "46"), ("firefox", "36"), ("safari", "10"), ("node", "5")],
            ),
            (
                "proposal-object-rest-spread",
                &[
                    ("chrome", "60"),
                    ("firefox", "55"),
                    ("safari", "11.1"),
                    ("node", "8.3"),
                ],
            ),
            (
                "proposal-optional-chaining",
                &[
                    ("chrome", "80"),
                    ("firefox", "74"),
                    ("safari", "13.1"),
                    ("node", "14"),
                ],
            ),
            (
                "proposal-nullish-coalescing-operator",
                &[
                    ("chrome", "80"),
                    ("firefox", "72"),
                    ("safari", "13.1"),
                    ("node", "14"),
                ],
            ),
        ];
        for (plugin, compat) in entries {
            for (runtime, version) in *compat {
                // Static table, every version literal parses.
                if let Ok(version) = RuntimeVersion::parse(version) {
                    matrix.insert(plugin, runtime, version);
                }
            }
        }
        matrix
    }
}

/// Usage weights per runtime version, driving which compatibility groups are
/// worth keeping as standalone profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageStats {
    pub runtimes: BTreeMap<String, BTreeMap<RuntimeVersion, f64>>,
    /// Weight applied when a runtime or version has no recorded usage.
    pub other: f64,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            runtimes: BTreeMap::new(),
            other: 0.001,
        }
    }
}

impl UsageStats {
    pub fn insert(&mut self, runtime: &str, version: RuntimeVersion, weight: f64) {
        self.runtimes
            .entry(runtime.to_string())
            .or_default()
            .insert(version, weight);
    }

    /// The weight of the closest recorded version at or below `version`,
    /// falling back to [`UsageStats::other`].
    pub fn weight(&self, runtime: &str, version: RuntimeVersion) -> f64 {
        self.runtimes
            .get(runtime)
            .and_then(|versions| versions.range(..=version).next_back())
            .map(|(_, weight)| *weight)
            .unwrap_or(self.other)
    }

    /// Rough traffic distribution matching the builtin plugin matrix.
    pub fn builtin() -> Self {
        let mut stats = Self::default();
        let entries: &[(&str, &str, f64)] = &[
            ("chrome", "80", 0.3),
            ("chrome", "60", 0.1),
            ("chrome", "49", 0.02),
            ("firefox", "74", 0.1),
            ("firefox", "55", 0.05),
            ("safari", "13.1", 0.1),
            ("safari", "11.1", 0.04),
            ("node", "14", 0.2),
            ("node", "8.3", 0.05),
        ];
        for (runtime, version, weight) in entries {
            if let Ok(version) = RuntimeVersion::parse(version) {
                stats.insert(runtime, version, *weight);
            }
        }
        stats
    }
}
