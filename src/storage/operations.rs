//! Storage operations
//!
//! Filesystem work behind LIST, DELE, MKD, RMD and RNFR/RNTO. Callers pass
//! real paths that have already been resolved inside the user's home.

use chrono::{DateTime, Local};
use log::{debug, info};
use std::fs::Metadata;
use std::path::Path;
use tokio::fs;

use crate::error::StorageError;
use crate::storage::validation::is_staging_name;

/// Lists the contents of a directory as `ls -l` style lines, sorted by name.
pub async fn list_directory(real_path: &Path, virtual_path: &str) -> Result<Vec<String>, StorageError> {
    let metadata = fs::metadata(real_path)
        .await
        .map_err(|_| StorageError::NotFound(virtual_path.to_string()))?;
    if !metadata.is_dir() {
        // LIST on a file describes just that file.
        let name = real_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![format_entry(&name, &metadata)]);
    }

    let mut entries = fs::read_dir(real_path).await?;
    let mut listed = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_staging_name(&name) {
            continue;
        }
        match entry.metadata().await {
            Ok(metadata) => listed.push((name.clone(), format_entry(&name, &metadata))),
            Err(e) => debug!("Skipping {} while listing {}: {}", name, virtual_path, e),
        }
    }
    listed.sort_by(|a, b| a.0.cmp(&b.0));

    info!("Listed directory {} - {} entries", virtual_path, listed.len());
    Ok(listed.into_iter().map(|(_, line)| line).collect())
}

fn format_entry(name: &str, metadata: &Metadata) -> String {
    let modified = metadata
        .modified()
        .map(DateTime::<Local>::from)
        .map(|time| time.format("%b %d %H:%M").to_string())
        .unwrap_or_else(|_| "Jan 01 00:00".to_string());
    let size = if metadata.is_dir() { 0 } else { metadata.len() };

    format!(
        "{} 1 owner group {:>12} {} {}",
        format_mode(metadata),
        size,
        modified,
        name
    )
}

#[cfg(unix)]
fn format_mode(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    let bits: String = (0..9)
        .rev()
        .map(|i| {
            if mode & (1 << i) == 0 {
                '-'
            } else {
                ['x', 'w', 'r'][i % 3]
            }
        })
        .collect();
    format!("{kind}{bits}")
}

#[cfg(not(unix))]
fn format_mode(metadata: &Metadata) -> String {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => "drwxr-xr-x".to_string(),
        (false, true) => "-r--r--r--".to_string(),
        (false, false) => "-rw-r--r--".to_string(),
    }
}

/// Deletes a regular file.
pub async fn delete_file(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    let metadata = fs::metadata(real_path)
        .await
        .map_err(|_| StorageError::NotFound(virtual_path.to_string()))?;
    if metadata.is_dir() {
        return Err(StorageError::NotFound(format!("{virtual_path} is a directory")));
    }
    fs::remove_file(real_path).await?;
    info!("Deleted file {} (real: {})", virtual_path, real_path.display());
    Ok(())
}

pub async fn make_directory(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    if fs::metadata(real_path).await.is_ok() {
        return Err(StorageError::AlreadyExists(virtual_path.to_string()));
    }
    fs::create_dir(real_path).await?;
    info!("Created directory {} (real: {})", virtual_path, real_path.display());
    Ok(())
}

/// Removes an empty directory. The home directory itself cannot be removed.
pub async fn remove_directory(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    if virtual_path == "/" {
        return Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "cannot remove home directory",
        )));
    }
    ensure_directory(real_path, virtual_path).await?;
    fs::remove_dir(real_path).await?;
    info!("Removed directory {} (real: {})", virtual_path, real_path.display());
    Ok(())
}

pub async fn rename(from: &Path, to: &Path, to_virtual: &str) -> Result<(), StorageError> {
    if fs::metadata(to).await.is_ok() {
        return Err(StorageError::AlreadyExists(to_virtual.to_string()));
    }
    fs::rename(from, to).await?;
    info!("Renamed {} -> {}", from.display(), to.display());
    Ok(())
}

/// Fails unless `real_path` exists and is a directory.
pub async fn ensure_directory(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    match fs::metadata(real_path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(StorageError::NotADirectory(virtual_path.to_string())),
        Err(_) => Err(StorageError::NotFound(virtual_path.to_string())),
    }
}

pub async fn ensure_exists(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    fs::symlink_metadata(real_path)
        .await
        .map(|_| ())
        .map_err(|_| StorageError::NotFound(virtual_path.to_string()))
}

/// Fails unless `real_path` exists and is a regular file.
pub async fn ensure_file(real_path: &Path, virtual_path: &str) -> Result<(), StorageError> {
    match fs::metadata(real_path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(StorageError::NotFound(virtual_path.to_string())),
    }
}
