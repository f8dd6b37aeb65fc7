//! Layered compile option resolution.
//!
//! Options resolve in a fixed precedence order: built-in defaults, then the
//! output folder kind, then caller overrides. The resolved struct is also the
//! branch equality key in the cache, so resolution must be deterministic.

use kiln_core::{Error, Result, OUT_FOLDER_COMPILED, OUT_FOLDER_INSTRUMENTED};
use serde::{Deserialize, Serialize};

/// The abstract output folder a request compiles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFolderKind {
    /// Transpiled output, no coverage instrumentation.
    Compiled,
    /// Transpiled output with coverage instrumentation applied.
    Instrumented,
}

impl OutputFolderKind {
    pub fn from_folder_name(name: &str) -> Result<Self> {
        match name {
            OUT_FOLDER_COMPILED => Ok(Self::Compiled),
            OUT_FOLDER_INSTRUMENTED => Ok(Self::Instrumented),
            other => Err(Error::invalid_request(format!(
                "unknown output folder '{other}'"
            ))),
        }
    }

    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Compiled => OUT_FOLDER_COMPILED,
            Self::Instrumented => OUT_FOLDER_INSTRUMENTED,
        }
    }
}

/// How the source map reference is attached to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapMode {
    /// Write the map as a sibling asset and append a `sourceMappingURL`
    /// comment pointing at it.
    #[default]
    Comment,
    /// Embed the whole map as a base64 data url in the comment.
    Inline,
}

/// Fully resolved options for one compile. Serialized form is the branch
/// equality key, so field order and naming are load-bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    pub transpile: bool,
    pub instrument: bool,
    pub minify: bool,
    pub optimize: bool,
    pub identify: bool,
    pub remap: bool,
    pub remap_mode: RemapMode,
    /// Transform plugins the selected profile requires, sorted.
    pub plugin_names: Vec<String>,
}

/// Caller-supplied option overrides. Every populated field is applied; none
/// is ever silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOverrides {
    pub transpile: Option<bool>,
    pub instrument: Option<bool>,
    pub minify: Option<bool>,
    pub optimize: Option<bool>,
    pub identify: Option<bool>,
    pub remap: Option<bool>,
    pub remap_mode: Option<RemapMode>,
}

impl CompileOptions {
    /// Resolves the option set for one request.
    ///
    /// `identify` and `remap` would inject conflicting trailing comments, so
    /// whenever remapping ends up enabled the identifier comment is disabled,
    /// even when explicitly requested.
    pub fn resolve(
        kind: OutputFolderKind,
        plugin_names: Vec<String>,
        overrides: &CompileOverrides,
    ) -> Self {
        let mut options = Self {
            transpile: true,
            instrument: kind == OutputFolderKind::Instrumented,
            minify: false,
            optimize: false,
            identify: true,
            remap: true,
            remap_mode: RemapMode::default(),
            plugin_names,
        };
        if let Some(transpile) = overrides.transpile {
            options.transpile = transpile;
        }
        if let Some(instrument) = overrides.instrument {
            options.instrument = instrument;
        }
        if let Some(minify) = overrides.minify {
            options.minify = minify;
        }
        if let Some(optimize) = overrides.optimize {
            options.optimize = optimize;
        }
        if let Some(identify) = overrides.identify {
            options.identify = identify;
        }
        if let Some(remap) = overrides.remap {
            options.remap = remap;
        }
        if let Some(remap_mode) = overrides.remap_mode {
            options.remap_mode = remap_mode;
        }
        if options.remap {
            options.identify = false;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_round_trip() {
        for kind in [OutputFolderKind::Compiled, OutputFolderKind::Instrumented] {
            assert_eq!(
                OutputFolderKind::from_folder_name(kind.folder_name()).unwrap(),
                kind
            );
        }
        assert!(OutputFolderKind::from_folder_name("dist").is_err());
    }

    #[test]
    fn folder_kind_sets_instrumentation_baseline() {
        let compiled = CompileOptions::resolve(
            OutputFolderKind::Compiled,
            vec![],
            &CompileOverrides::default(),
        );
        assert!(compiled.transpile);
        assert!(!compiled.instrument);

        let instrumented = CompileOptions::resolve(
            OutputFolderKind::Instrumented,
            vec![],
            &CompileOverrides::default(),
        );
        assert!(instrumented.transpile);
        assert!(instrumented.instrument);
    }

    #[test]
    fn every_override_field_is_applied() {
        let overrides = CompileOverrides {
            transpile: Some(false),
            instrument: Some(true),
            minify: Some(true),
            optimize: Some(true),
            identify: Some(false),
            remap: Some(false),
            remap_mode: Some(RemapMode::Inline),
        };
        let options =
            CompileOptions::resolve(OutputFolderKind::Compiled, vec![], &overrides);
        assert!(!options.transpile);
        assert!(options.instrument);
        assert!(options.minify);
        assert!(options.optimize);
        assert!(!options.identify);
        assert!(!options.remap);
        assert_eq!(options.remap_mode, RemapMode::Inline);
    }

    #[test]
    fn remap_wins_over_identify() {
        let overrides = CompileOverrides {
            identify: Some(true),
            remap: Some(true),
            ..CompileOverrides::default()
        };
        let options =
            CompileOptions::resolve(OutputFolderKind::Compiled, vec![], &overrides);
        assert!(options.remap);
        assert!(!options.identify);

        let overrides = CompileOverrides {
            identify: Some(true),
            remap: Some(false),
            ..CompileOverrides::default()
        };
        let options =
            CompileOptions::resolve(OutputFolderKind::Compiled, vec![], &overrides);
        assert!(options.identify);
    }

    #[test]
    fn resolved_options_serialize_with_camel_case_keys() {
        let options = CompileOptions::resolve(
            OutputFolderKind::Instrumented,
            vec!["transform-block-scoping".to_string()],
            &CompileOverrides::default(),
        );
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"pluginNames\""));
        assert!(json.contains("\"remapMode\":\"comment\""));
    }
}
