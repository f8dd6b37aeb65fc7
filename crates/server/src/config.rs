use kiln_core::constants::{DEFAULT_CACHE_FOLDER, DEFAULT_LISTEN_ADDR};

/// Settings for the dev server's listener and reload channel.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to, e.g. `127.0.0.1:3678`.
    pub listen: String,
    /// Folder name under the project root that compiled URLs are served from.
    pub cache_folder: String,
    /// Watch project sources and push reload events when they change.
    pub watch: bool,
    /// Maximum number of concurrent reload connections.
    pub max_connections: usize,
    /// How many reload events are retained for replay to reconnecting clients.
    pub history_length: usize,
    /// Quiet window applied to filesystem events before they are forwarded.
    pub debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            cache_folder: DEFAULT_CACHE_FOLDER.to_string(),
            watch: true,
            max_connections: 100,
            history_length: 1000,
            debounce_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_standard_cache_folder() {
        let config = ServerConfig::default();
        assert_eq!(config.cache_folder, DEFAULT_CACHE_FOLDER);
        assert!(config.watch);
        assert!(config.max_connections > 0);
    }
}
