//! Atomic file operations to prevent corrupted cache files

use kiln_core::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write data to a file atomically by writing to a temporary file and renaming
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::configuration("Invalid file path: no parent directory".to_string())
    })?;

    // Ensure parent directory exists
    fs::create_dir_all(parent)
        .map_err(|e| Error::file_system(parent.to_path_buf(), "create parent directory", e))?;

    // Create temporary file in the same directory to ensure atomic rename
    let temp_name = format!(".{}.tmp", Uuid::new_v4());
    let temp_path = parent.join(&temp_name);

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::file_system(&temp_path, "create temporary file", e))?;

        file.write_all(content)
            .map_err(|e| Error::file_system(&temp_path, "write to temporary file", e))?;

        file.sync_all()
            .map_err(|e| Error::file_system(&temp_path, "sync temporary file", e))?;

        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    // Atomic rename
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::file_system(path.to_path_buf(), "atomic rename", e)
    })?;

    Ok(())
}

/// Write string content to a file atomically
pub fn write_atomic_string(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Read a file, mapping not-found to `None` instead of an error.
///
/// Cache loading treats an absent file as an empty result, so callers can
/// distinguish "no cache yet" from real failures without inspecting errno.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file_system(path.to_path_buf(), "read", e)),
    }
}

/// Async variant of [`write_atomic`] for call sites on the event loop.
pub async fn write_atomic_async(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::configuration("Invalid file path: no parent directory".to_string())
    })?;

    async_fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::file_system(parent.to_path_buf(), "create parent directory", e))?;

    let temp_name = format!(".{}.tmp", Uuid::new_v4());
    let temp_path = parent.join(&temp_name);

    let write = async {
        let mut file = async_fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::file_system(&temp_path, "create temporary file", e))?;
        file.write_all(content)
            .await
            .map_err(|e| Error::file_system(&temp_path, "write to temporary file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::file_system(&temp_path, "sync temporary file", e))?;
        Ok(())
    }
    .await;

    if let Err(error) = write {
        let _ = async_fs::remove_file(&temp_path).await;
        return Err(error);
    }

    match async_fs::rename(&temp_path, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = async_fs::remove_file(&temp_path).await;
            Err(Error::file_system(path.to_path_buf(), "atomic rename", e))
        }
    }
}

/// Async variant of [`read_optional`].
pub async fn read_optional_async(path: &Path) -> Result<Option<Vec<u8>>> {
    match async_fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file_system(path.to_path_buf(), "read", e)),
    }
}
