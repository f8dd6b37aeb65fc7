//! The compile pipeline: option resolution, the fixed stage chain and the
//! pluggable transform toolchain boundary.

pub mod options;
pub mod pipeline;
pub mod transformer;

pub use options::{CompileOptions, CompileOverrides, OutputFolderKind, RemapMode};
pub use pipeline::{
    coverage_asset_name, map_asset_name, CompileRequest, GeneratedOutput, OutputAsset,
    Pipeline,
};
pub use transformer::{
    CommandTransformer, IdentityTransformer, TransformOutput, TransformRequest,
    TransformStage, Transformer,
};
