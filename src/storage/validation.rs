//! Path validation
//!
//! Clients only ever see virtual paths rooted at `/`, which maps to the
//! user's home directory. Normalization clamps `..` at the root so a
//! virtual path can never name anything above the home, and the
//! canonical-path check below catches symlinks that point outside it.
//! Names used for staging uploads cannot be addressed at all.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

const STAGING_SUFFIX: &str = ".part";

/// Name of the hidden sibling an upload to `name` is written to.
pub fn staging_name(name: &str) -> String {
    format!(".{name}{STAGING_SUFFIX}")
}

pub fn is_staging_name(name: &str) -> bool {
    name.len() > STAGING_SUFFIX.len() + 1 && name.starts_with('.') && name.ends_with(STAGING_SUFFIX)
}

/// Resolves `target` against the current virtual directory.
///
/// Absolute targets start from `/`. `.` and empty components are dropped and
/// `..` above the root stays at the root.
pub fn resolve_virtual_path(cwd: &str, target: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    let base = if target.starts_with(['/', '\\']) { "" } else { cwd };

    for part in base.split(['/', '\\']).chain(target.split(['/', '\\'])) {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            name => components.push(name),
        }
    }

    format!("/{}", components.join("/"))
}

/// Maps a normalized virtual path onto the filesystem below `home`.
pub fn virtual_to_real_path(home: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        home.to_path_buf()
    } else {
        home.join(relative)
    }
}

/// Verifies that `real` does not lead outside `home` through a symlink.
///
/// The deepest existing ancestor of `real` is canonicalized and must lie
/// under the canonical home.
pub async fn ensure_within_home(
    home: &Path,
    real: &Path,
    virtual_path: &str,
) -> Result<(), StorageError> {
    let canonical_home = tokio::fs::canonicalize(home).await?;

    let mut existing = real.to_path_buf();
    let canonical = loop {
        match tokio::fs::canonicalize(&existing).await {
            Ok(path) => break path,
            Err(_) => {
                if !existing.pop() {
                    return Err(StorageError::NotFound(virtual_path.to_string()));
                }
            }
        }
    };

    if canonical.starts_with(&canonical_home) {
        Ok(())
    } else {
        Err(StorageError::PathEscapesHome(virtual_path.to_string()))
    }
}

/// Resolves a client-supplied path to its virtual and real forms.
pub async fn resolve_path(
    home: &Path,
    cwd: &str,
    target: &str,
) -> Result<(String, PathBuf), StorageError> {
    let virtual_path = resolve_virtual_path(cwd, target);
    if virtual_path.rsplit('/').next().is_some_and(is_staging_name) {
        return Err(StorageError::ReservedName(virtual_path));
    }
    let real_path = virtual_to_real_path(home, &virtual_path);
    ensure_within_home(home, &real_path, &virtual_path).await?;
    Ok((virtual_path, real_path))
}
