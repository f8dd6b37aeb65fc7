//! Core domain types, errors, and constants for kiln.
//!
//! Everything the other kiln crates share lives here: the central [`Error`]
//! enum with its [`Result`] alias, the constants that pin down on-disk and
//! URL naming, and the millisecond clock used by cache records.

pub mod constants;
pub mod errors;
pub mod time;

pub use self::{
    constants::*,
    errors::{Error, Result, ResultExt},
    time::epoch_ms,
};
