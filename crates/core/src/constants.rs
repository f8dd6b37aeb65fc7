/// Constants used throughout the kiln codebase
// Cache layout
pub const CACHE_RECORD_FILENAME: &str = "record.json";
pub const PROFILE_MANIFEST_FILENAME: &str = "profiles.json";
pub const DEFAULT_CACHE_FOLDER: &str = ".kiln";

// Served folder names under the cache root. The folder name decides the
// default stage set: "out" compiles, "out-instrumented" compiles and
// instruments.
pub const OUT_FOLDER_COMPILED: &str = "out";
pub const OUT_FOLDER_INSTRUMENTED: &str = "out-instrumented";

// Profile ids
pub const BEST_PROFILE_ID: &str = "best";
pub const WORST_PROFILE_ID: &str = "worst";
pub const FALLBACK_PROFILE_ID: &str = "otherwise";

// Environment variable names
pub const KILN_LOG_VAR: &str = "KILN_LOG";

// Defaults
pub const DEFAULT_PROFILE_COUNT: usize = 2;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3678";
