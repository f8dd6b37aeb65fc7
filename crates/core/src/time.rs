//! Millisecond clock for cache record bookkeeping.

use chrono::Utc;

/// Milliseconds since the unix epoch, as stored in `createdMs`,
/// `lastModifiedMs` and `lastMatchMs` of persisted branches.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
