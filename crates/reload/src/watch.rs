//! Filesystem watch feeding the reload room.
//!
//! One recursive watcher covers the whole project root no matter how many
//! clients are connected. Raw notifications are filtered (dot directories,
//! ignored prefixes) and rate limited per path before they surface.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use kiln_core::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

/// A debounced, project-relative file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub relative_path: String,
}

pub struct SourceWatcher {
    // Dropping the watcher stops the underlying OS watches.
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<WatchEvent>,
}

impl SourceWatcher {
    /// Starts watching `project_root` recursively. `ignored` lists
    /// project-relative prefixes to skip in addition to dot directories.
    pub fn start(
        project_root: &Path,
        ignored: Vec<String>,
        debounce: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let root = project_root.to_path_buf();
        let mut last_emit: HashMap<PathBuf, Instant> = HashMap::new();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(error) => {
                    warn!(%error, "file watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                if is_filtered(relative, &ignored) {
                    continue;
                }
                let now = Instant::now();
                if let Some(last) = last_emit.get(relative) {
                    if now.duration_since(*last) < debounce {
                        continue;
                    }
                }
                last_emit.insert(relative.to_path_buf(), now);
                let _ = sender.send(WatchEvent {
                    relative_path: relative.to_string_lossy().into_owned(),
                });
            }
        })
        .map_err(|e| Error::configuration(format!("failed to create file watcher: {e}")))?;

        watcher
            .watch(project_root, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::configuration(format!(
                    "failed to watch {}: {e}",
                    project_root.display()
                ))
            })?;

        Ok(Self {
            _watcher: watcher,
            receiver,
        })
    }

    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}

fn is_filtered(relative: &Path, ignored: &[String]) -> bool {
    for component in relative.components() {
        if let Component::Normal(name) = component {
            if name.to_str().is_some_and(|text| text.starts_with('.')) {
                return true;
            }
        }
    }
    ignored.iter().any(|prefix| relative.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    async fn wait_for(
        watcher: &mut SourceWatcher,
        wanted: &str,
        window: Duration,
    ) -> Option<WatchEvent> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_default();
            match timeout(remaining, watcher.next()).await {
                Ok(Some(event)) if event.relative_path == wanted => return Some(event),
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn reports_changes_with_project_relative_paths() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let mut watcher =
            SourceWatcher::start(temp.path(), vec![], Duration::from_millis(20)).unwrap();

        fs::write(temp.path().join("src/app.js"), "let a = 1").unwrap();
        let event = wait_for(&mut watcher, "src/app.js", Duration::from_secs(5)).await;
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn dot_directories_and_ignored_prefixes_stay_silent() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".kiln/out")).unwrap();
        fs::create_dir_all(temp.path().join("vendor")).unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let mut watcher = SourceWatcher::start(
            temp.path(),
            vec!["vendor".to_string()],
            Duration::from_millis(20),
        )
        .unwrap();

        fs::write(temp.path().join(".kiln/out/record.json"), "{}").unwrap();
        fs::write(temp.path().join("vendor/lib.js"), "x").unwrap();
        // The visible write proves the watcher is alive; nothing from the
        // filtered paths may precede it.
        fs::write(temp.path().join("src/app.js"), "let a = 1").unwrap();

        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_default();
            match timeout(remaining, watcher.next()).await {
                Ok(Some(event)) => {
                    let done = event.relative_path == "src/app.js";
                    seen.push(event.relative_path);
                    if done {
                        break;
                    }
                }
                _ => break,
            }
        }
        assert!(seen.contains(&"src/app.js".to_string()));
        assert!(!seen.iter().any(|path| path.starts_with(".kiln")));
        assert!(!seen.iter().any(|path| path.starts_with("vendor")));
    }

    #[tokio::test]
    async fn rapid_rewrites_are_rate_limited() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let mut watcher =
            SourceWatcher::start(temp.path(), vec![], Duration::from_secs(5)).unwrap();

        fs::write(temp.path().join("src/app.js"), "one").unwrap();
        fs::write(temp.path().join("src/app.js"), "two").unwrap();

        assert!(
            wait_for(&mut watcher, "src/app.js", Duration::from_secs(5))
                .await
                .is_some()
        );
        // Within the debounce window the second write stays quiet.
        let extra = timeout(Duration::from_millis(300), watcher.next()).await;
        if let Ok(Some(event)) = extra {
            assert_ne!(event.relative_path, "src/app.js");
        }
    }
}
