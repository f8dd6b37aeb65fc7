//! The branch cache: persistent, content-addressed storage of compiled
//! output, one branch per resolved option set, serialized per input file
//! through the keyed lock registry.

pub mod record;
pub mod service;
pub mod store;

pub use record::{Branch, BranchAsset, CacheRecord};
pub use service::{CacheService, CompileResult, CompileStatus, ResolveRequest};
pub use store::RecordStore;
