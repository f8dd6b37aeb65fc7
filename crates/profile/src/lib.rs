//! Compatibility profiles for compiled output.
//!
//! A compile profile names the transform plugins a class of runtimes still
//! needs, together with the minimum version per runtime the result is good
//! for. The server derives a small family of profiles once at startup from a
//! plugin compatibility matrix and usage statistics, then resolves incoming
//! requests to the profile applying the fewest transforms the client can
//! handle.

pub mod matrix;
pub mod selector;
pub mod version;

#[cfg(test)]
mod tests_proptest;

pub use matrix::{PluginMatrix, UsageStats};
pub use selector::{CompileProfile, ProfileSet};
pub use version::RuntimeVersion;
