//! FTP Response handling
//!
//! Defines FTP response codes and formatting.

use std::net::SocketAddrV4;

use crate::error::FtpError;

/// Standard FTP response codes
pub const OPENING_DATA: u16 = 150;
pub const OK: u16 = 200;
pub const SYSTEM_TYPE: u16 = 215;
pub const READY: u16 = 220;
pub const GOODBYE: u16 = 221;
pub const TRANSFER_COMPLETE: u16 = 226;
pub const ENTERING_PASSIVE: u16 = 227;
pub const LOGIN_SUCCESS: u16 = 230;
pub const FILE_ACTION_OK: u16 = 250;
pub const PATH_CREATED: u16 = 257;
pub const PASSWORD_REQUIRED: u16 = 331;
pub const PENDING_FURTHER_INFO: u16 = 350;
pub const SERVICE_UNAVAILABLE: u16 = 421;
pub const CANT_OPEN_DATA: u16 = 425;
pub const CONNECTION_CLOSED: u16 = 426;
pub const AUTH_FAILED: u16 = 530;

/// A single-line reply on the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn to_wire(&self) -> String {
        format_response(self.code, &self.text)
    }
}

impl From<&FtpError> for Reply {
    fn from(err: &FtpError) -> Self {
        Reply::new(err.reply_code(), err.to_string())
    }
}

/// Format an FTP response message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Formats the 227 reply text for a passive listener.
pub fn passive_reply(endpoint: SocketAddrV4) -> Reply {
    let [h1, h2, h3, h4] = endpoint.ip().octets();
    let port = endpoint.port();
    Reply::new(
        ENTERING_PASSIVE,
        format!(
            "Entering Passive Mode ({},{},{},{},{},{}).",
            h1,
            h2,
            h3,
            h4,
            port >> 8,
            port & 0xff
        ),
    )
}

/// Quotes a path for a 257 reply, doubling embedded quotes.
pub fn quote_path(path: &str) -> String {
    format!("\"{}\"", path.replace('"', "\"\""))
}
