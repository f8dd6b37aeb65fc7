//! Shared utilities for kiln.
//!
//! Small, dependency-light building blocks used across the workspace:
//! atomic file writes (so a crashed compile can never leave a half-written
//! cache record behind), content etags, and the keyed lock registry that
//! serializes concurrent work on the same cache record.

pub mod atomic_file;
pub mod etag;
pub mod lock;

pub use atomic_file::*;
pub use etag::*;
pub use lock::*;
