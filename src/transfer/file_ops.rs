//! Module `file_ops`
//!
//! Streams file contents over an open data connection in bounded chunks.
//! Uploads land in a hidden `.<name>.part` sibling that only replaces the
//! destination once every byte has arrived, so an interrupted upload never
//! leaves a truncated file behind.

use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{StorageError, TransferError};
use crate::storage::staging_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server (STOR)
    Upload,
    /// Server to client (RETR)
    Download,
}

/// Progress of one RETR or STOR.
#[derive(Debug)]
pub struct TransferState {
    pub path: PathBuf,
    pub direction: Direction,
    pub bytes: u64,
}

impl TransferState {
    pub fn new(path: PathBuf, direction: Direction) -> Self {
        Self {
            path,
            direction,
            bytes: 0,
        }
    }
}

/// Chunk size and per-chunk stall limit.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub buffer_size: usize,
    pub timeout: Duration,
}

/// Copies `source` into `sink` chunk by chunk, counting bytes into `state`.
///
/// Socket failures surface as `ConnectionReset` and file failures as `Io`,
/// depending on which side is the socket for the given direction.
pub async fn stream<R, W>(
    source: &mut R,
    sink: &mut W,
    state: &mut TransferState,
    options: StreamOptions,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (read_err, write_err): (fn(io::Error) -> TransferError, fn(io::Error) -> TransferError) =
        match state.direction {
            Direction::Upload => (TransferError::ConnectionReset, TransferError::Io),
            Direction::Download => (TransferError::Io, TransferError::ConnectionReset),
        };

    let mut buffer = vec![0u8; options.buffer_size];
    loop {
        let n = timeout(options.timeout, source.read(&mut buffer))
            .await
            .map_err(|_| TransferError::Timeout)?
            .map_err(read_err)?;
        if n == 0 {
            break;
        }

        timeout(options.timeout, sink.write_all(&buffer[..n]))
            .await
            .map_err(|_| TransferError::Timeout)?
            .map_err(write_err)?;
        state.bytes += n as u64;
    }

    timeout(options.timeout, sink.flush())
        .await
        .map_err(|_| TransferError::Timeout)?
        .map_err(write_err)?;

    Ok(state.bytes)
}

/// Sends a file to the client and closes the write side of the data connection.
pub async fn send_file<W>(
    data: &mut W,
    state: &mut TransferState,
    options: StreamOptions,
) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let mut file = File::open(&state.path).await.map_err(TransferError::Io)?;
    let sent = stream(&mut file, data, state, options).await?;
    data.shutdown().await.map_err(TransferError::ConnectionReset)?;
    info!("File download completed: {} ({} bytes)", state.path.display(), sent);
    Ok(sent)
}

/// Temporary file for an upload in progress.
///
/// Dropping it without calling [`PartialUpload::commit`] removes the
/// temporary file, which covers error returns and cancelled futures alike.
#[derive(Debug)]
pub struct PartialUpload {
    file: Option<File>,
    temp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PartialUpload {
    /// Creates `.<dest>.part`. An existing temp file means another upload
    /// to the same destination is still running.
    pub async fn create(dest: &Path, virtual_path: &str) -> Result<Self, StorageError> {
        let temp = temp_path_for(dest);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StorageError::UploadInProgress(virtual_path.to_string())
                }
                _ => StorageError::Io(e),
            })?;
        debug!("Upload staging file {}", temp.display());

        Ok(Self {
            file: Some(file),
            temp,
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Receives the whole upload from `data` into the temp file.
    pub async fn receive<R>(
        &mut self,
        data: &mut R,
        state: &mut TransferState,
        options: StreamOptions,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TransferError::Io(io::Error::other("upload already finished")))?;
        stream(data, file, state, options).await
    }

    /// Moves the temp file over the destination.
    pub async fn commit(mut self) -> Result<(), TransferError> {
        if let Some(file) = self.file.take() {
            file.sync_all().await.map_err(TransferError::Io)?;
        }
        fs::rename(&self.temp, &self.dest)
            .await
            .map_err(TransferError::Io)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialUpload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        match std::fs::remove_file(&self.temp) {
            Ok(()) => warn!("Removed partial upload {}", self.temp.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial upload {}: {}", self.temp.display(), e),
        }
    }
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(staging_name(&name))
}
