//! Error handlers
//!
//! Maps errors onto FTP reply codes.

use crate::error::types::{AuthError, FtpError, ProtocolError, TransferError};

impl AuthError {
    pub fn reply_code(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials(_) | AuthError::UnknownUser(_) => 530,
            AuthError::NotLoggedIn => 530,
            AuthError::PermissionDenied(_) => 550,
            AuthError::TooManyAttempts => 421,
        }
    }
}

impl TransferError {
    pub fn reply_code(&self) -> u16 {
        match self {
            TransferError::NoDataChannel
            | TransferError::NoPassivePort
            | TransferError::UnsupportedAddress(_)
            | TransferError::Timeout => 425,
            TransferError::ConnectionReset(_) => 426,
            TransferError::Io(_) => 451,
        }
    }
}

impl ProtocolError {
    pub fn reply_code(&self) -> u16 {
        match self {
            ProtocolError::Unrecognized(_) | ProtocolError::CommandTooLong => 500,
            ProtocolError::MissingArgument(_) | ProtocolError::InvalidArgument(_) => 501,
            ProtocolError::NotImplemented(_) => 502,
            ProtocolError::BadSequence(_) => 503,
        }
    }
}

impl FtpError {
    /// Convert error to FTP response code
    pub fn reply_code(&self) -> u16 {
        match self {
            FtpError::Auth(e) => e.reply_code(),
            FtpError::Storage(_) => 550,
            FtpError::Transfer(e) => e.reply_code(),
            FtpError::Protocol(e) => e.reply_code(),
        }
    }
}
