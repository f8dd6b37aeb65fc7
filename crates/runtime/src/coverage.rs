//! Coverage aggregation across runtimes and files.
//!
//! Each execution reports per-file counters; merging sums them so a file
//! exercised by several runtimes (or several test files) accumulates hits
//! instead of keeping whichever report landed last. Files no execution
//! touched get a zero-count entry synthesized from the instrumentation
//! skeleton, which keeps the report keyset equal to the eligible fileset.

use std::collections::{btree_map, BTreeMap};

use kiln_compile::{
    coverage_asset_name, CompileOverrides, CompileRequest, OutputFolderKind, Pipeline,
};
use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Per-file execution counters: statement id to hit count, branch id to
/// per-arm hit counts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    #[serde(default, rename = "s")]
    pub statements: BTreeMap<String, u64>,
    #[serde(default, rename = "b")]
    pub branches: BTreeMap<String, Vec<u64>>,
}

impl FileCoverage {
    /// Same skeleton with every counter at zero.
    pub fn zeroed(mut self) -> Self {
        for count in self.statements.values_mut() {
            *count = 0;
        }
        for arms in self.branches.values_mut() {
            for count in arms.iter_mut() {
                *count = 0;
            }
        }
        self
    }

    /// Whether any statement or branch arm was hit at least once.
    pub fn is_touched(&self) -> bool {
        self.statements.values().any(|count| *count > 0)
            || self
                .branches
                .values()
                .any(|arms| arms.iter().any(|count| *count > 0))
    }
}

/// Coverage for a whole run, keyed by project-relative path.
pub type CoverageMap = BTreeMap<String, FileCoverage>;

/// Merges `incoming` into `into`, summing counters for files both sides
/// report. Counts are added, never overwritten.
pub fn merge_coverage(into: &mut CoverageMap, incoming: CoverageMap) {
    for (path, file) in incoming {
        match into.entry(path) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(file);
            }
            btree_map::Entry::Occupied(mut slot) => merge_file(slot.get_mut(), file),
        }
    }
}

fn merge_file(into: &mut FileCoverage, incoming: FileCoverage) {
    for (id, count) in incoming.statements {
        *into.statements.entry(id).or_insert(0) += count;
    }
    for (id, arms) in incoming.branches {
        let merged = into.branches.entry(id).or_default();
        if merged.len() < arms.len() {
            merged.resize(arms.len(), 0);
        }
        for (slot, count) in merged.iter_mut().zip(arms) {
            *slot += count;
        }
    }
}

/// Produces the zero-count entry for a file no execution touched.
///
/// The instrumentation stage already computes the statement and branch
/// skeleton during a normal compile, so running the pipeline against the
/// instrumented folder kind yields the same shape without executing
/// anything. A toolchain that emits no skeleton gets an empty entry, which
/// still marks the file as eligible but unexercised.
pub async fn synthesize_zero_coverage(
    pipeline: &Pipeline,
    relative_path: &str,
    source: String,
) -> Result<FileCoverage> {
    let request = CompileRequest {
        relative_path: relative_path.to_string(),
        source,
        folder_kind: OutputFolderKind::Instrumented,
        plugin_names: Vec::new(),
        overrides: CompileOverrides::default(),
    };
    let options = pipeline.plan(&request);
    let generated = pipeline.generate(&request, &options).await?;

    let skeleton = match generated.asset(&coverage_asset_name(relative_path)) {
        Some(asset) => serde_json::from_str::<FileCoverage>(&asset.content).map_err(|e| {
            Error::transform(
                "instrument",
                format!("invalid coverage skeleton for {relative_path}: {e}"),
            )
        })?,
        None => FileCoverage {
            path: relative_path.to_string(),
            ..FileCoverage::default()
        },
    };
    Ok(skeleton.zeroed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_compile::{TransformOutput, TransformRequest, TransformStage, Transformer};
    use serde_json::json;
    use std::sync::Arc;

    fn file(path: &str, statements: &[(&str, u64)], branches: &[(&str, &[u64])]) -> FileCoverage {
        FileCoverage {
            path: path.to_string(),
            statements: statements
                .iter()
                .map(|(id, count)| (id.to_string(), *count))
                .collect(),
            branches: branches
                .iter()
                .map(|(id, arms)| (id.to_string(), arms.to_vec()))
                .collect(),
        }
    }

    #[test]
    fn merge_sums_statements_and_branch_arms() {
        let mut report = CoverageMap::new();
        merge_coverage(
            &mut report,
            CoverageMap::from([(
                "src/app.js".to_string(),
                file("src/app.js", &[("0", 2), ("1", 0)], &[("0", &[1, 0])]),
            )]),
        );
        merge_coverage(
            &mut report,
            CoverageMap::from([(
                "src/app.js".to_string(),
                file("src/app.js", &[("0", 3), ("1", 1)], &[("0", &[0, 2])]),
            )]),
        );

        let merged = &report["src/app.js"];
        assert_eq!(merged.statements["0"], 5);
        assert_eq!(merged.statements["1"], 1);
        assert_eq!(merged.branches["0"], vec![1, 2]);
    }

    #[test]
    fn merge_unions_disjoint_files() {
        let mut report = CoverageMap::from([(
            "src/a.js".to_string(),
            file("src/a.js", &[("0", 1)], &[]),
        )]);
        merge_coverage(
            &mut report,
            CoverageMap::from([("src/b.js".to_string(), file("src/b.js", &[("0", 4)], &[]))]),
        );

        assert_eq!(report.len(), 2);
        assert_eq!(report["src/a.js"].statements["0"], 1);
        assert_eq!(report["src/b.js"].statements["0"], 4);
    }

    #[test]
    fn merge_grows_short_branch_arm_lists() {
        let mut report = CoverageMap::from([(
            "src/a.js".to_string(),
            file("src/a.js", &[], &[("0", &[1])]),
        )]);
        merge_coverage(
            &mut report,
            CoverageMap::from([(
                "src/a.js".to_string(),
                file("src/a.js", &[], &[("0", &[2, 3, 4])]),
            )]),
        );

        assert_eq!(report["src/a.js"].branches["0"], vec![3, 3, 4]);
    }

    #[test]
    fn touched_reflects_any_nonzero_counter() {
        assert!(!file("a", &[("0", 0)], &[("0", &[0, 0])]).is_touched());
        assert!(file("a", &[("0", 1)], &[]).is_touched());
        assert!(file("a", &[], &[("0", &[0, 2])]).is_touched());
    }

    struct SkeletonTransformer;

    #[async_trait]
    impl Transformer for SkeletonTransformer {
        async fn transform(&self, request: TransformRequest) -> kiln_core::Result<TransformOutput> {
            Ok(match request.stage {
                TransformStage::Instrument => TransformOutput {
                    code: Some(request.source),
                    coverage: Some(json!({
                        "path": request.relative_path,
                        "s": {"0": 9, "1": 3},
                        "b": {"0": [7, 2]},
                    })),
                    ..TransformOutput::default()
                },
                _ => TransformOutput::default(),
            })
        }
    }

    #[tokio::test]
    async fn zero_synthesis_keeps_the_skeleton_but_drops_the_counts() {
        let pipeline = Pipeline::new(Arc::new(SkeletonTransformer));
        let coverage = synthesize_zero_coverage(&pipeline, "src/untested.js", "let a = 1".into())
            .await
            .unwrap();

        assert_eq!(coverage.path, "src/untested.js");
        assert_eq!(coverage.statements["0"], 0);
        assert_eq!(coverage.statements["1"], 0);
        assert_eq!(coverage.branches["0"], vec![0, 0]);
        assert!(!coverage.is_touched());
    }

    #[tokio::test]
    async fn zero_synthesis_without_a_skeleton_yields_an_empty_entry() {
        let pipeline = Pipeline::new(Arc::new(kiln_compile::IdentityTransformer));
        let coverage = synthesize_zero_coverage(&pipeline, "src/plain.js", "let a = 1".into())
            .await
            .unwrap();

        assert_eq!(coverage.path, "src/plain.js");
        assert!(coverage.statements.is_empty());
        assert!(coverage.branches.is_empty());
    }
}
