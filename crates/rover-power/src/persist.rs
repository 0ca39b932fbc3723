//! Small JSON documents written atomically (temp file, then rename).

use std::fs;
use std::io::Write;
use std::path::Path;

use rover_types::RoverError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

/// Load `path`, creating it from `default` when it does not exist.
///
/// A document that exists but does not parse is left untouched on disk and
/// `default` is returned; the next successful update overwrites it.
pub fn load_or_init<T, F>(path: &Path, default: F) -> Result<T, RoverError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable document, using defaults");
                Ok(default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let value = default();
            save_atomic(path, &value)?;
            info!(path = %path.display(), "created default document");
            Ok(value)
        }
        Err(e) => Err(RoverError::Persistence(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

/// Serialize `value` to a temp file next to `path`, fsync it, and rename it
/// over `path`. Readers see either the old or the new document, never a
/// partial one.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RoverError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| {
        RoverError::Persistence(format!("failed to create {}: {e}", dir.display()))
    })?;

    let raw = serde_json::to_vec_pretty(value)
        .map_err(|e| RoverError::Persistence(format!("failed to serialize: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| RoverError::Persistence(format!("failed to create temp file: {e}")))?;
    tmp.write_all(&raw)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| RoverError::Persistence(format!("failed to write temp file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644)).map_err(|e| {
            RoverError::Persistence(format!("failed to set permissions: {e}"))
        })?;
    }

    tmp.persist(path).map_err(|e| {
        RoverError::Persistence(format!("failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}
