//! Resolution of object names to paths below a storage root.

use crate::error::{StorageError, VolumeError};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Why a name could not be resolved.
#[derive(Debug)]
pub(crate) enum PathError {
    Unsafe(String),
    Io(io::Error),
}

impl From<PathError> for VolumeError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Unsafe(msg) => VolumeError::InvalidName(msg),
            PathError::Io(e) => VolumeError::Io(e),
        }
    }
}

impl From<PathError> for StorageError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Unsafe(msg) => StorageError::InvalidName(msg),
            PathError::Io(e) => StorageError::Io(e),
        }
    }
}

/// Resolve `name` below `root` off the async runtime.
pub(crate) async fn resolve(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    let root = root.to_path_buf();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || resolve_sync(&root, &name))
        .await
        .map_err(|e| PathError::Io(io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

/// Join `name` onto `root`, refusing anything that would land outside it,
/// including through a symlink at the target or at any existing ancestor.
pub(crate) fn resolve_sync(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Unsafe("empty name".into()));
    }
    if Path::new(name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(PathError::Unsafe(format!("unsafe path component in {name}")));
    }

    let root_canonical = root.canonicalize().map_err(PathError::Io)?;
    let path = root.join(name);

    // nearest existing entry: the target itself or one of its ancestors
    let mut ancestor = Some(path.as_path());
    while let Some(candidate) = ancestor {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let canonical = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        PathError::Unsafe(format!("dangling symlink in {name}"))
                    } else {
                        PathError::Io(e)
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(PathError::Unsafe(format!("{name} escapes the storage root")));
                }
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => ancestor = candidate.parent(),
            Err(e) => return Err(PathError::Io(e)),
        }
    }

    Ok(path)
}
