//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::auth::Permission;

/// Authentication and authorization errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials for user: {0}")]
    InvalidCredentials(String),
    #[error("User not found: {0}")]
    UnknownUser(String),
    #[error("User not logged in")]
    NotLoggedIn,
    #[error("Permission denied: {0} not granted")]
    PermissionDenied(Permission),
    #[error("Too many failed login attempts")]
    TooManyAttempts,
}

/// Storage and path resolution errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No such file or directory: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Path escapes home directory: {0}")]
    PathEscapesHome(String),
    #[error("Upload already in progress: {0}")]
    UploadInProgress(String),
    #[error("Name reserved for uploads in progress: {0}")]
    ReservedName(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Data channel and transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Data connection reset: {0}")]
    ConnectionReset(io::Error),
    #[error("Timed out waiting for data connection")]
    Timeout,
    #[error("File IO error: {0}")]
    Io(io::Error),
    #[error("Use PORT or PASV first")]
    NoDataChannel,
    #[error("No available passive port")]
    NoPassivePort,
    #[error("Passive mode requires an IPv4 address, got {0}")]
    UnsupportedAddress(SocketAddr),
}

/// Malformed or unsupported commands
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Syntax error, command unrecognized: {0}")]
    Unrecognized(String),
    #[error("Command not implemented: {0}")]
    NotImplemented(String),
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Bad sequence of commands: {0}")]
    BadSequence(&'static str),
    #[error("Command too long")]
    CommandTooLong,
}

/// Any error a session can report to its client
#[derive(Debug, Error)]
pub enum FtpError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors that abort server startup
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Failed to bind control socket {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Cannot prepare served directory {path}: {source}")]
    ServerRoot { path: PathBuf, source: io::Error },
}
