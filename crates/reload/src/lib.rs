//! Live reload: a replayable server-sent event room plus the filesystem
//! watch that feeds it.

pub mod room;
pub mod watch;

pub use room::{ConnectRejection, EventRoom, ReloadEvent, RoomConnection};
pub use watch::{SourceWatcher, WatchEvent};
