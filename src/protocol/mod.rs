//! FTP Protocol implementation
//!
//! Handles FTP command parsing and response generation.

pub mod commands;
pub mod responses;

pub use commands::{Command, TransferType, parse_command};
pub use responses::Reply;
